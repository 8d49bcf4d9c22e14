use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LotteryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawMode {
    /// Drawn by the scheduler once `draw_time` has passed.
    Timed,
    /// Drawn as soon as the participant count reaches `max_entries`.
    Full,
    /// Drawn only on explicit request.
    Manual,
}

impl DrawMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timed => "timed",
            Self::Full => "full",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for DrawMode {
    type Err = LotteryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "timed" => Ok(Self::Timed),
            "full" => Ok(Self::Full),
            "manual" => Ok(Self::Manual),
            other => Err(LotteryError::Invalid(format!("unknown draw mode `{other}`"))),
        }
    }
}

impl fmt::Display for DrawMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LotteryStatus {
    Draft,
    Active,
    Completed,
}

impl LotteryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    /// Status moves forward only: draft -> active -> completed. Re-applying
    /// the current status is allowed for draft and active.
    pub fn can_transition_to(&self, next: LotteryStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Draft)
                | (Self::Draft, Self::Active)
                | (Self::Active, Self::Active)
                | (Self::Active, Self::Completed)
        )
    }
}

impl FromStr for LotteryStatus {
    type Err = LotteryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(LotteryError::Invalid(format!("unknown status `{other}`"))),
        }
    }
}

impl fmt::Display for LotteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lottery {
    /// Opaque identifier, six decimal digits when generated by the engine.
    pub id: String,

    pub title: String,

    pub description: String,

    /// The user that opened the draft. Only they may issue edit tokens.
    pub creator_id: i64,

    pub draw_mode: DrawMode,

    /// Deadline for `timed` lotteries. Ignored for other modes.
    pub draw_time: Option<DateTime<Utc>>,

    /// Capacity. Joins are refused once reached; `full` lotteries draw at it.
    pub max_entries: Option<u32>,

    pub status: LotteryStatus,

    pub created_at: DateTime<Utc>,

    /// When set every participant draws with weight 1 and overrides are ignored.
    pub weights_disabled: bool,

    /// Denormalised participant counter, kept in step with inserts and
    /// removals inside the same transaction.
    pub participant_count: u32,
}

impl Lottery {
    pub fn draft(id: String, creator_id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: String::new(),
            description: String::new(),
            creator_id,
            draw_mode: DrawMode::Manual,
            draw_time: None,
            max_entries: None,
            status: LotteryStatus::Draft,
            created_at,
            weights_disabled: false,
            participant_count: 0,
        }
    }

    /// Moves the lottery to `next`, refusing backward or skipping moves.
    pub fn transition_to(&mut self, next: LotteryStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(match self.status {
                LotteryStatus::Completed => LotteryError::Ended,
                _ => LotteryError::NotActive,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_full(&self, participant_count: u32) -> bool {
        self.max_entries
            .map_or(false, |max_entries| participant_count >= max_entries)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prize {
    pub id: i64,
    pub lottery_id: String,
    pub name: String,
    /// Number of independent units that can be won.
    pub quantity: u32,
}

/// A prize that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPrize {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub lottery_id: String,
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    /// Default weight, used for every prize without an override.
    pub weight: u32,
    /// Per-prize overrides keyed by prize id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prize_weights: BTreeMap<i64, u32>,
    pub joined_at: DateTime<Utc>,
}

/// A participant that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParticipant {
    pub lottery_id: String,
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeWeight {
    pub lottery_id: String,
    pub user_id: i64,
    pub prize_id: i64,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub id: i64,
    pub lottery_id: String,
    pub participant_id: i64,
    pub prize_id: i64,
    pub user_id: i64,
    pub username: String,
    pub prize_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditToken {
    pub token: String,
    pub lottery_id: String,
    pub expires_at: DateTime<Utc>,
}

impl EditToken {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotterySnapshot {
    pub lottery: Lottery,
    pub prizes: Vec<Prize>,
    pub participant_count: u32,
    /// Empty until the lottery is completed.
    pub winners: Vec<Winner>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryStats {
    /// Lotteries that left the draft stage.
    pub total_count: u64,
    /// Of those, the ones created since UTC midnight.
    pub today_count: u64,
    /// Active timed lotteries waiting for their deadline.
    pub scheduled_count: u64,
}
