use std::fmt;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use crate::allocator::{allocate, Entrant};
use crate::error::{LotteryError, Result};
use crate::instructions::LotteryEngine;
use crate::notifier::LotteryEvent;
use crate::state::{LotteryStatus, Winner};

/// What asked for a draw. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawSource {
    Manual,
    Scheduler,
    Capacity,
}

impl fmt::Display for DrawSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Scheduler => "scheduler",
            Self::Capacity => "capacity",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOutcome {
    /// This call completed the lottery with the given number of winners.
    Drawn(usize),
    /// Another trigger got there first, or the lottery is not drawable.
    AlreadySettled,
    /// Every attempt failed with a storage error.
    Exhausted,
}

/// Completes an active lottery.
///
/// The status is re-read inside the transaction, so of several concurrent
/// callers exactly one sees `Active` and the rest get `Ended`.
pub(crate) async fn process_draw(engine: &LotteryEngine, id: &str) -> Result<Vec<Winner>> {
    let mut tx = engine.store.begin().await?;

    let mut lottery = tx.get_lottery(id).await?.ok_or(LotteryError::NotFound)?;
    match lottery.status {
        LotteryStatus::Completed => return Err(LotteryError::Ended),
        LotteryStatus::Draft => return Err(LotteryError::NotActive),
        LotteryStatus::Active => {}
    }

    let prizes = tx.prizes(id).await?;
    let entrants: Vec<Entrant> = tx
        .participants(id)
        .await?
        .iter()
        .map(|participant| Entrant::from_participant(participant, lottery.weights_disabled))
        .collect();

    let allocation = allocate(id, &prizes, &entrants, &mut StdRng::from_entropy());
    for void in &allocation.void_units {
        warn!(
            lottery_id = %id,
            prize_id = void.prize_id,
            prize = %void.prize_name,
            units = void.count,
            "prize units left unawarded"
        );
    }

    let mut winners = Vec::with_capacity(allocation.winners.len());
    for winner in &allocation.winners {
        winners.push(tx.insert_winner(winner).await?);
    }

    lottery.transition_to(LotteryStatus::Completed)?;
    tx.update_lottery(&lottery).await?;
    tx.commit().await?;

    info!(
        lottery_id = %id,
        participants = entrants.len(),
        winners = winners.len(),
        "lottery drawn"
    );

    if !winners.is_empty() {
        engine.notifications.submit(LotteryEvent::WinnersDrawn {
            lottery,
            winners: winners.clone(),
        });
    }

    Ok(winners)
}

pub(crate) async fn process_draw_with_retry(engine: &LotteryEngine, id: &str, source: DrawSource) -> DrawOutcome {
    let result = engine
        .retry
        .run(
            engine.sleeper.as_ref(),
            || process_draw(engine, id),
            |err: &LotteryError| !err.is_business(),
        )
        .await;

    match result {
        Ok(winners) => DrawOutcome::Drawn(winners.len()),
        Err(err) if err.is_terminal_for_draw() => {
            info!(lottery_id = %id, %source, reason = %err, "draw skipped");
            DrawOutcome::AlreadySettled
        }
        Err(err) => {
            error!(
                lottery_id = %id,
                %source,
                attempts = engine.retry.max_attempts,
                error = %err,
                "draw failed after retries"
            );
            DrawOutcome::Exhausted
        }
    }
}
