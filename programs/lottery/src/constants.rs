use std::time::Duration;

/// Number of random ids tried before draft creation gives up.
pub const ID_GENERATION_ATTEMPTS: usize = 10;

/// Lottery ids are six decimal digits.
pub const ID_SPACE: u32 = 1_000_000;

/// Weight given to every participant on join.
pub const DEFAULT_WEIGHT: u32 = 1;

/// Largest weight a participant may carry, globally or for a single prize.
/// The allocator also clamps to this when expanding the pool.
pub const MAX_WEIGHT: u32 = 1_000;

/// Auto-draw polling interval.
pub const DRAW_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Attempts made by the retrying draw path before giving up for the cycle.
pub const DRAW_RETRY_ATTEMPTS: u32 = 3;

/// Delay after the first failed draw attempt; doubled after each failure.
pub const DRAW_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

pub const DRAW_RETRY_MULTIPLIER: u32 = 2;

/// Drafts a single creator may open per trailing minute.
pub const CREATE_LIMIT_PER_MINUTE: u32 = 3;

/// Drafts a single creator may open per trailing day.
pub const CREATE_LIMIT_PER_DAY: u32 = 20;

/// Lifetime of an edit token, in seconds.
pub const EDIT_TOKEN_TTL_SECS: i64 = 60 * 60;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://lottery.db";
