/// Defaults for ids, weights, retry timing and rate limits.
pub mod constants;

/// The `LotteryError` enum returned by every engine operation.
pub mod error;

/// Operation handlers, one file per group, and the `LotteryEngine` context
/// they run against.
pub mod instructions;

/// Lottery, prize, participant, winner and token records.
pub mod state;

/// Weighted prize allocation over a seeded random source.
pub mod allocator;

/// Environment-driven configuration.
pub mod config;

/// Outbound events and the background queue that delivers them.
pub mod notifier;

/// Backoff policy for the retrying draw path.
pub mod retry;

/// Periodic auto-draw of due lotteries.
pub mod scheduler;

/// Persistence gateway with in-memory and SQLite backends.
pub mod store;

use instructions::*;

pub use config::{Config, EngineConfig};
pub use error::{LotteryError, Result};
pub use instructions::{DrawOutcome, DrawSource, JoinInput, Joined, LotteryEngine, LotteryInput, LotteryPatch};
pub use notifier::{LotteryEvent, NotificationQueue, Notifier, TracingNotifier};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use scheduler::{AutoDrawScheduler, CycleReport, SchedulerHandle, SchedulerPhase};
pub use state::*;
pub use store::{MemoryStore, SqliteStore, Store, StoreError, StoreTx};

impl LotteryEngine {
    /// Opens an empty draft owned by `creator_id`, subject to the per-creator
    /// rate limits.
    pub async fn create_draft(&self, creator_id: i64) -> Result<Lottery> {
        process_create_draft(self, creator_id).await
    }

    /// Publishes a lottery at `id`, replacing a draft if there is one.
    pub async fn create_or_replace(&self, id: &str, input: LotteryInput) -> Result<(Lottery, Vec<Prize>)> {
        process_create_or_replace(self, id, input).await
    }

    /// Patches a lottery until it is drawn. A non-empty prize list replaces
    /// the current prizes.
    pub async fn update(&self, id: &str, patch: LotteryPatch) -> Result<(Lottery, Vec<Prize>)> {
        process_update(self, id, patch).await
    }

    /// Enters a user. Reaching `max_entries` on a `full` lottery triggers a
    /// background draw.
    pub async fn join(&self, id: &str, input: JoinInput) -> Result<Joined> {
        process_join(self, id, input).await
    }

    /// Creator-side entry that also accepts drafts and never triggers a draw.
    pub async fn add_participant(&self, id: &str, input: JoinInput) -> Result<Participant> {
        process_add_participant(self, id, input).await
    }

    /// Sets the default weight used for every prize without an override.
    pub async fn set_participant_weight(&self, id: &str, user_id: i64, weight: u32) -> Result<()> {
        process_set_participant_weight(self, id, user_id, weight).await
    }

    /// Overrides the weight for one prize. Zero keeps the user out of it.
    pub async fn set_prize_weight(&self, id: &str, user_id: i64, prize_id: i64, weight: u32) -> Result<()> {
        process_set_prize_weight(self, id, user_id, prize_id, weight).await
    }

    /// Removes an override. Clearing a missing override is not an error.
    pub async fn clear_prize_weight(&self, id: &str, user_id: i64, prize_id: i64) -> Result<()> {
        process_clear_prize_weight(self, id, user_id, prize_id).await
    }

    /// Removes a participant along with their overrides.
    pub async fn remove_participant(&self, id: &str, user_id: i64) -> Result<()> {
        process_remove_participant(self, id, user_id).await
    }

    /// Draws winners and completes the lottery. Fails with `Ended` if it was
    /// already drawn.
    pub async fn draw(&self, id: &str) -> Result<Vec<Winner>> {
        process_draw(self, id).await
    }

    /// Draws with backoff on transient failures. Never returns an error.
    pub async fn draw_with_retry(&self, id: &str, source: DrawSource) -> DrawOutcome {
        process_draw_with_retry(self, id, source).await
    }

    /// Uses the configured lifetime when `ttl` is `None`.
    pub async fn issue_edit_token(
        &self,
        id: &str,
        requester_id: i64,
        ttl: Option<chrono::Duration>,
    ) -> Result<EditToken> {
        let ttl = ttl.unwrap_or(self.config.edit_token_ttl);
        process_issue_edit_token(self, id, requester_id, ttl).await
    }

    /// Checks that `token` is the live edit token for `id`.
    pub async fn validate_edit_token(&self, id: &str, token: &str) -> Result<()> {
        process_validate_edit_token(self, id, token).await
    }

    /// Lottery, prizes, participant count and any winners.
    pub async fn snapshot(&self, id: &str) -> Result<LotterySnapshot> {
        process_snapshot(self, id).await
    }

    /// Winners of a completed lottery. `NotDrawn` until then.
    pub async fn results(&self, id: &str) -> Result<(Lottery, Vec<Prize>, Vec<Winner>)> {
        process_results(self, id).await
    }

    /// Participants in join order.
    pub async fn participants(&self, id: &str) -> Result<Vec<Participant>> {
        process_participants(self, id).await
    }

    /// Counts over published lotteries.
    pub async fn stats(&self) -> Result<LotteryStats> {
        process_stats(self).await
    }

    /// Ids of active lotteries whose draw condition holds now.
    pub async fn due_lotteries(&self) -> Result<Vec<String>> {
        process_due_lotteries(self).await
    }
}
