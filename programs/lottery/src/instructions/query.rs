use chrono::{TimeZone, Utc};

use crate::error::{LotteryError, Result};
use crate::instructions::LotteryEngine;
use crate::state::{Lottery, LotterySnapshot, LotteryStats, LotteryStatus, Participant, Prize, Winner};

pub(crate) async fn process_snapshot(engine: &LotteryEngine, id: &str) -> Result<LotterySnapshot> {
    let lottery = engine.store.get_lottery(id).await?.ok_or(LotteryError::NotFound)?;
    let prizes = engine.store.prizes(id).await?;
    let participant_count = engine.store.participant_count(id).await?;
    let winners = if lottery.status == LotteryStatus::Completed {
        engine.store.winners(id).await?
    } else {
        Vec::new()
    };

    Ok(LotterySnapshot {
        lottery,
        prizes,
        participant_count,
        winners,
    })
}

pub(crate) async fn process_results(
    engine: &LotteryEngine,
    id: &str,
) -> Result<(Lottery, Vec<Prize>, Vec<Winner>)> {
    let lottery = engine.store.get_lottery(id).await?.ok_or(LotteryError::NotFound)?;
    if lottery.status != LotteryStatus::Completed {
        return Err(LotteryError::NotDrawn);
    }

    let winners = engine.store.winners(id).await?;
    let prizes = engine.store.prizes(id).await?;
    Ok((lottery, prizes, winners))
}

pub(crate) async fn process_participants(engine: &LotteryEngine, id: &str) -> Result<Vec<Participant>> {
    if !engine.store.lottery_exists(id).await? {
        return Err(LotteryError::NotFound);
    }
    Ok(engine.store.participants(id).await?)
}

pub(crate) async fn process_stats(engine: &LotteryEngine) -> Result<LotteryStats> {
    let midnight = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| LotteryError::Internal("invalid midnight".into()))?;
    let today_start = Utc.from_utc_datetime(&midnight);

    Ok(engine.store.stats(today_start).await?)
}

pub(crate) async fn process_due_lotteries(engine: &LotteryEngine) -> Result<Vec<String>> {
    Ok(engine.store.due_lotteries(Utc::now()).await?)
}
