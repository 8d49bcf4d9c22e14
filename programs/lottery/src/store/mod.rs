//! Persistence gateway used by the engine.
//!
//! `Store` serves point reads and hands out transactions. A `StoreTx` stages
//! writes that become visible on `commit`; dropping it uncommitted rolls back.
//! Implementations must serialise transactions so that a status re-read inside
//! one is authoritative until it commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::state::{
    EditToken, Lottery, LotteryStats, NewParticipant, NewPrize, Participant, Prize, PrizeWeight,
    Winner,
};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate row")]
    Duplicate,
    #[error("storage backend: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    async fn get_lottery(&self, id: &str) -> StoreResult<Option<Lottery>>;

    async fn lottery_exists(&self, id: &str) -> StoreResult<bool>;

    /// Fails with `Duplicate` when the id is taken.
    async fn insert_lottery(&self, lottery: &Lottery) -> StoreResult<()>;

    /// Lotteries of any status created by `creator_id` at or after `since`.
    async fn count_created_since(&self, creator_id: i64, since: DateTime<Utc>) -> StoreResult<u32>;

    async fn prizes(&self, lottery_id: &str) -> StoreResult<Vec<Prize>>;

    async fn participant_count(&self, lottery_id: &str) -> StoreResult<u32>;

    /// Participants in join order, with their prize overrides resolved.
    async fn participants(&self, lottery_id: &str) -> StoreResult<Vec<Participant>>;

    async fn winners(&self, lottery_id: &str) -> StoreResult<Vec<Winner>>;

    async fn find_edit_token(&self, lottery_id: &str, token: &str) -> StoreResult<Option<EditToken>>;

    /// Ids of active lotteries that should be drawn now: timed ones whose
    /// deadline has passed and full ones at capacity.
    async fn due_lotteries(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>>;

    async fn stats(&self, today_start: DateTime<Utc>) -> StoreResult<LotteryStats>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn get_lottery(&mut self, id: &str) -> StoreResult<Option<Lottery>>;

    async fn insert_lottery(&mut self, lottery: &Lottery) -> StoreResult<()>;

    /// Writes every mutable column of the lottery row.
    async fn update_lottery(&mut self, lottery: &Lottery) -> StoreResult<()>;

    /// Deletes the prize set (and overrides pointing at it) and inserts `prizes`.
    async fn replace_prizes(&mut self, lottery_id: &str, prizes: &[NewPrize]) -> StoreResult<Vec<Prize>>;

    async fn prizes(&mut self, lottery_id: &str) -> StoreResult<Vec<Prize>>;

    async fn participants(&mut self, lottery_id: &str) -> StoreResult<Vec<Participant>>;

    /// Inserts with the default weight and bumps the lottery's participant
    /// counter. Fails with `Duplicate` if the user already joined.
    async fn add_participant(&mut self, participant: &NewParticipant) -> StoreResult<Participant>;

    /// Returns false when no such participant exists.
    async fn update_participant_weight(
        &mut self,
        lottery_id: &str,
        user_id: i64,
        weight: u32,
    ) -> StoreResult<bool>;

    async fn set_prize_weight(&mut self, weight: &PrizeWeight) -> StoreResult<()>;

    async fn delete_prize_weight(
        &mut self,
        lottery_id: &str,
        user_id: i64,
        prize_id: i64,
    ) -> StoreResult<bool>;

    /// Removes the participant and their overrides and decrements the counter.
    /// Returns false when no such participant exists.
    async fn remove_participant(&mut self, lottery_id: &str, user_id: i64) -> StoreResult<bool>;

    /// Returns the winner with its assigned id.
    async fn insert_winner(&mut self, winner: &Winner) -> StoreResult<Winner>;

    /// Drops every token of the lottery and stores `token`.
    async fn replace_edit_token(&mut self, token: &EditToken) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
