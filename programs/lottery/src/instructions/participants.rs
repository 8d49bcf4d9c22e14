use tracing::info;

use crate::constants::MAX_WEIGHT;
use crate::error::{LotteryError, Result};
use crate::instructions::LotteryEngine;
use crate::state::{Lottery, LotteryStatus, PrizeWeight};
use crate::store::StoreTx;

/// Loads the lottery inside `tx` and refuses changes once it has been drawn.
async fn open_lottery(tx: &mut dyn StoreTx, id: &str) -> Result<Lottery> {
    let lottery = tx.get_lottery(id).await?.ok_or(LotteryError::NotFound)?;
    if lottery.status == LotteryStatus::Completed {
        return Err(LotteryError::Ended);
    }
    Ok(lottery)
}

fn check_weight(weight: u32) -> Result<()> {
    if weight > MAX_WEIGHT {
        return Err(LotteryError::Invalid(format!("weight must be at most {MAX_WEIGHT}")));
    }
    Ok(())
}

pub(crate) async fn process_set_participant_weight(
    engine: &LotteryEngine,
    id: &str,
    user_id: i64,
    weight: u32,
) -> Result<()> {
    check_weight(weight)?;
    let mut tx = engine.store.begin().await?;
    open_lottery(tx.as_mut(), id).await?;

    if !tx.update_participant_weight(id, user_id, weight).await? {
        return Err(LotteryError::NotFound);
    }
    tx.commit().await?;

    info!(lottery_id = %id, user_id, weight, "participant weight set");
    Ok(())
}

pub(crate) async fn process_set_prize_weight(
    engine: &LotteryEngine,
    id: &str,
    user_id: i64,
    prize_id: i64,
    weight: u32,
) -> Result<()> {
    check_weight(weight)?;
    let mut tx = engine.store.begin().await?;
    open_lottery(tx.as_mut(), id).await?;

    if !tx.prizes(id).await?.iter().any(|prize| prize.id == prize_id) {
        return Err(LotteryError::NotFound);
    }
    if !tx.participants(id).await?.iter().any(|p| p.user_id == user_id) {
        return Err(LotteryError::NotFound);
    }

    tx.set_prize_weight(&PrizeWeight {
        lottery_id: id.to_string(),
        user_id,
        prize_id,
        weight,
    })
    .await?;
    tx.commit().await?;

    info!(lottery_id = %id, user_id, prize_id, weight, "prize weight set");
    Ok(())
}

/// Drops a per-prize override so the participant's default weight applies
/// again. Clearing an override that does not exist is not an error.
pub(crate) async fn process_clear_prize_weight(
    engine: &LotteryEngine,
    id: &str,
    user_id: i64,
    prize_id: i64,
) -> Result<()> {
    let mut tx = engine.store.begin().await?;
    open_lottery(tx.as_mut(), id).await?;

    let removed = tx.delete_prize_weight(id, user_id, prize_id).await?;
    tx.commit().await?;

    if removed {
        info!(lottery_id = %id, user_id, prize_id, "prize weight cleared");
    }
    Ok(())
}

pub(crate) async fn process_remove_participant(engine: &LotteryEngine, id: &str, user_id: i64) -> Result<()> {
    let mut tx = engine.store.begin().await?;
    open_lottery(tx.as_mut(), id).await?;

    if !tx.remove_participant(id, user_id).await? {
        return Err(LotteryError::NotFound);
    }
    tx.commit().await?;

    info!(lottery_id = %id, user_id, "participant removed");
    Ok(())
}
