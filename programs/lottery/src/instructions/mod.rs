pub mod admin;
pub mod draw;
pub mod edit_token;
pub mod join;
pub mod participants;
pub mod query;

pub use admin::*;
pub use draw::*;
pub(crate) use edit_token::*;
pub use join::*;
pub(crate) use participants::*;
pub(crate) use query::*;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::notifier::NotificationQueue;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::store::Store;

/// Business rules over a `Store`. Every handler in this module takes the
/// engine as its context; the public entry points are the methods in the
/// crate root.
#[derive(Clone)]
pub struct LotteryEngine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) notifications: NotificationQueue,
    pub(crate) config: EngineConfig,
    pub(crate) retry: RetryPolicy,
    pub(crate) sleeper: Arc<dyn Sleeper>,
}

impl LotteryEngine {
    pub fn new(store: Arc<dyn Store>, notifications: NotificationQueue, config: EngineConfig) -> Self {
        Self {
            store,
            notifications,
            config,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
