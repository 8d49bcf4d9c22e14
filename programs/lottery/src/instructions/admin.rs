use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::{ID_GENERATION_ATTEMPTS, ID_SPACE};
use crate::error::{LotteryError, Result};
use crate::instructions::LotteryEngine;
use crate::notifier::LotteryEvent;
use crate::state::{DrawMode, Lottery, LotteryStatus, NewPrize, Prize};

/// Full definition submitted when a draft is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub draw_mode: DrawMode,
    #[serde(default)]
    pub draw_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_entries: Option<u32>,
    pub prizes: Vec<NewPrize>,
    /// Used only when no draft exists at the id.
    pub creator_id: i64,
    #[serde(default)]
    pub weights_disabled: bool,
}

/// Partial update. Empty strings, `None` and an empty prize list leave the
/// stored value alone; `weights_disabled` is always applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryPatch {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub draw_mode: Option<DrawMode>,
    #[serde(default)]
    pub draw_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_entries: Option<u32>,
    #[serde(default)]
    pub prizes: Vec<NewPrize>,
    #[serde(default)]
    pub weights_disabled: bool,
}

pub(crate) async fn process_create_draft(engine: &LotteryEngine, creator_id: i64) -> Result<Lottery> {
    let now = Utc::now();
    let limits = &engine.config;

    if limits.create_limit_per_minute > 0 {
        let recent = engine
            .store
            .count_created_since(creator_id, now - chrono::Duration::minutes(1))
            .await?;
        if recent >= limits.create_limit_per_minute {
            return Err(LotteryError::TooFrequent);
        }
    }
    if limits.create_limit_per_day > 0 {
        let today = engine
            .store
            .count_created_since(creator_id, now - chrono::Duration::days(1))
            .await?;
        if today >= limits.create_limit_per_day {
            return Err(LotteryError::DailyLimitExceeded);
        }
    }

    for _ in 0..ID_GENERATION_ATTEMPTS {
        let id = random_lottery_id();
        if engine.store.lottery_exists(&id).await? {
            continue;
        }

        let lottery = Lottery::draft(id, creator_id, now);
        match engine.store.insert_lottery(&lottery).await {
            Ok(()) => {
                info!(lottery_id = %lottery.id, creator_id, "draft created");
                return Ok(lottery);
            }
            // lost a race for the same id; try another
            Err(crate::store::StoreError::Duplicate) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(LotteryError::Internal(format!(
        "no free lottery id after {ID_GENERATION_ATTEMPTS} attempts"
    )))
}

pub(crate) async fn process_create_or_replace(
    engine: &LotteryEngine,
    id: &str,
    input: LotteryInput,
) -> Result<(Lottery, Vec<Prize>)> {
    validate_title(&input.title)?;
    validate_prizes(&input.prizes)?;
    if input.prizes.is_empty() {
        return Err(LotteryError::Invalid("at least one prize is required".into()));
    }
    validate_schedule(input.draw_mode, input.draw_time, input.max_entries)?;

    let mut tx = engine.store.begin().await?;
    let existing = tx.get_lottery(id).await?;
    if matches!(&existing, Some(lottery) if lottery.status != LotteryStatus::Draft) {
        return Err(LotteryError::Conflict);
    }

    let mut lottery = match &existing {
        Some(draft) => draft.clone(),
        None => Lottery::draft(id.to_string(), input.creator_id, Utc::now()),
    };
    lottery.title = input.title;
    lottery.description = input.description;
    lottery.draw_mode = input.draw_mode;
    lottery.draw_time = input.draw_time;
    lottery.max_entries = input.max_entries;
    lottery.weights_disabled = input.weights_disabled;
    lottery.transition_to(LotteryStatus::Active)?;

    if existing.is_some() {
        tx.update_lottery(&lottery).await?;
    } else {
        tx.insert_lottery(&lottery).await?;
    }
    let prizes = tx.replace_prizes(id, &input.prizes).await?;
    tx.commit().await?;

    info!(
        lottery_id = %lottery.id,
        draw_mode = %lottery.draw_mode,
        prizes = prizes.len(),
        "lottery published"
    );
    engine.notifications.submit(LotteryEvent::Created {
        lottery: lottery.clone(),
        prizes: prizes.clone(),
    });

    Ok((lottery, prizes))
}

pub(crate) async fn process_update(
    engine: &LotteryEngine,
    id: &str,
    patch: LotteryPatch,
) -> Result<(Lottery, Vec<Prize>)> {
    validate_prizes(&patch.prizes)?;

    let mut tx = engine.store.begin().await?;
    let mut lottery = tx.get_lottery(id).await?.ok_or(LotteryError::NotFound)?;
    if lottery.status == LotteryStatus::Completed {
        return Err(LotteryError::Ended);
    }

    if !patch.title.is_empty() {
        lottery.title = patch.title;
    }
    if !patch.description.is_empty() {
        lottery.description = patch.description;
    }
    if let Some(draw_mode) = patch.draw_mode {
        lottery.draw_mode = draw_mode;
    }
    if patch.draw_time.is_some() {
        lottery.draw_time = patch.draw_time;
    }
    if patch.max_entries.is_some() {
        lottery.max_entries = patch.max_entries;
    }
    lottery.weights_disabled = patch.weights_disabled;

    if lottery.status == LotteryStatus::Active {
        validate_schedule(lottery.draw_mode, lottery.draw_time, lottery.max_entries)?;
    }

    tx.update_lottery(&lottery).await?;
    let prizes = if patch.prizes.is_empty() {
        tx.prizes(id).await?
    } else {
        tx.replace_prizes(id, &patch.prizes).await?
    };
    tx.commit().await?;

    info!(lottery_id = %lottery.id, prizes = prizes.len(), "lottery updated");
    Ok((lottery, prizes))
}

/// Six decimal digits, zero padded.
fn random_lottery_id() -> String {
    let n = rand::thread_rng().gen_range(0..ID_SPACE);
    format!("{n:06}")
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(LotteryError::Invalid("title must not be empty".into()));
    }
    Ok(())
}

fn validate_prizes(prizes: &[NewPrize]) -> Result<()> {
    for prize in prizes {
        if prize.name.trim().is_empty() {
            return Err(LotteryError::Invalid("prize name must not be empty".into()));
        }
        if prize.quantity == 0 {
            return Err(LotteryError::Invalid(format!(
                "prize `{}` must have a quantity of at least 1",
                prize.name
            )));
        }
    }
    Ok(())
}

fn validate_schedule(
    draw_mode: DrawMode,
    draw_time: Option<DateTime<Utc>>,
    max_entries: Option<u32>,
) -> Result<()> {
    match draw_mode {
        DrawMode::Timed if draw_time.is_none() => {
            Err(LotteryError::Invalid("timed lotteries need a draw time".into()))
        }
        DrawMode::Full if !matches!(max_entries, Some(n) if n >= 1) => Err(LotteryError::Invalid(
            "full lotteries need max entries of at least 1".into(),
        )),
        _ => Ok(()),
    }
}
