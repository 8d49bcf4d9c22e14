use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LotteryError, Result};
use crate::instructions::{DrawSource, LotteryEngine};
use crate::state::{DrawMode, Lottery, LotteryStatus, NewParticipant, Participant};
use crate::store::StoreError;

/// Identity of the user entering a lottery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinInput {
    pub user_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl JoinInput {
    fn into_participant(self, lottery_id: &str) -> NewParticipant {
        NewParticipant {
            lottery_id: lottery_id.to_string(),
            user_id: self.user_id,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            joined_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Joined {
    /// The lottery as it was when the entry was accepted.
    pub lottery: Lottery,
    pub participant: Participant,
}

pub(crate) async fn process_join(engine: &LotteryEngine, id: &str, input: JoinInput) -> Result<Joined> {
    let mut tx = engine.store.begin().await?;

    let mut lottery = tx.get_lottery(id).await?.ok_or(LotteryError::NotFound)?;
    if lottery.status != LotteryStatus::Active {
        return Err(LotteryError::NotActive);
    }
    if lottery.is_full(lottery.participant_count) {
        return Err(LotteryError::Full);
    }

    let participant = tx
        .add_participant(&input.into_participant(id))
        .await
        .map_err(|err| match err {
            StoreError::Duplicate => LotteryError::AlreadyJoined,
            other => other.into(),
        })?;
    tx.commit().await?;
    lottery.participant_count += 1;

    info!(
        lottery_id = %id,
        user_id = participant.user_id,
        participants = lottery.participant_count,
        "participant joined"
    );

    if lottery.draw_mode == DrawMode::Full {
        trigger_capacity_draw(engine, &lottery).await;
    }

    Ok(Joined { lottery, participant })
}

pub(crate) async fn process_add_participant(
    engine: &LotteryEngine,
    id: &str,
    input: JoinInput,
) -> Result<Participant> {
    let mut tx = engine.store.begin().await?;

    let lottery = tx.get_lottery(id).await?.ok_or(LotteryError::NotFound)?;
    if lottery.status == LotteryStatus::Completed {
        return Err(LotteryError::Ended);
    }

    let participant = tx
        .add_participant(&input.into_participant(id))
        .await
        .map_err(|err| match err {
            StoreError::Duplicate => LotteryError::AlreadyJoined,
            other => other.into(),
        })?;
    tx.commit().await?;

    info!(lottery_id = %id, user_id = participant.user_id, "participant added by creator");
    Ok(participant)
}

/// Hands a lottery that just reached capacity to the retrying draw path
/// without making the joining caller wait for it.
async fn trigger_capacity_draw(engine: &LotteryEngine, lottery: &Lottery) {
    let count = match engine.store.participant_count(&lottery.id).await {
        Ok(count) => count,
        Err(err) => {
            // the scheduler picks the lottery up on its next poll
            debug!(lottery_id = %lottery.id, error = %err, "capacity re-check failed");
            return;
        }
    };
    if !lottery.is_full(count) {
        return;
    }

    info!(lottery_id = %lottery.id, count, "capacity reached, drawing");
    let engine = engine.clone();
    let id = lottery.id.clone();
    tokio::spawn(async move {
        engine.draw_with_retry(&id, DrawSource::Capacity).await;
    });
}
