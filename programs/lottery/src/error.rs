use thiserror::Error;

use crate::store::StoreError;

pub type Result<T, E = LotteryError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LotteryError {
    #[error("Lottery not found")]
    NotFound,
    #[error("Lottery already exists")]
    Conflict,
    #[error("Lottery already completed")]
    Ended,
    #[error("Lottery is not active")]
    NotActive,
    #[error("Lottery is full")]
    Full,
    #[error("Participant already joined")]
    AlreadyJoined,
    #[error("Invalid or expired edit token")]
    TokenInvalid,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Lotteries created too frequently")]
    TooFrequent,
    #[error("Daily lottery creation limit exceeded")]
    DailyLimitExceeded,
    #[error("Lottery not yet drawn")]
    NotDrawn,
    #[error("Invalid lottery input: {0}")]
    Invalid(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LotteryError {
    /// Errors that mean another trigger already settled the lottery. A retrying
    /// draw treats them as a no-op.
    pub fn is_terminal_for_draw(&self) -> bool {
        matches!(self, Self::Ended | Self::NotActive | Self::NotFound)
    }

    /// Business-rule violations are returned to the caller and never retried.
    pub fn is_business(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

impl From<StoreError> for LotteryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => Self::Conflict,
            StoreError::Backend(message) => Self::Internal(message),
        }
    }
}
