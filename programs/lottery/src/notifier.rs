//! Outbound lottery events.
//!
//! The engine only ever enqueues. A single worker task drains the queue and
//! hands each event to the configured `Notifier`; delivery failures are logged
//! and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::state::{Lottery, Prize, Winner};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn on_lottery_created(&self, lottery: &Lottery, prizes: &[Prize]) -> anyhow::Result<()>;

    async fn on_winners_drawn(&self, lottery: &Lottery, winners: &[Winner]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LotteryEvent {
    Created {
        lottery: Lottery,
        prizes: Vec<Prize>,
    },
    WinnersDrawn {
        lottery: Lottery,
        winners: Vec<Winner>,
    },
}

impl LotteryEvent {
    pub fn lottery_id(&self) -> &str {
        match self {
            Self::Created { lottery, .. } | Self::WinnersDrawn { lottery, .. } => &lottery.id,
        }
    }

    async fn deliver(&self, notifier: &dyn Notifier) -> anyhow::Result<()> {
        match self {
            Self::Created { lottery, prizes } => notifier.on_lottery_created(lottery, prizes).await,
            Self::WinnersDrawn { lottery, winners } => {
                notifier.on_winners_drawn(lottery, winners).await
            }
        }
    }
}

/// Sending half of the notification queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<LotteryEvent>,
}

impl NotificationQueue {
    /// Spawns the delivery worker. The worker exits once every queue handle
    /// has been dropped and the backlog is drained.
    pub fn start(notifier: Arc<dyn Notifier>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LotteryEvent>();

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = event.deliver(notifier.as_ref()).await {
                    error!(lottery_id = event.lottery_id(), error = %err, "notification delivery failed");
                }
            }
        });

        (Self { tx }, worker)
    }

    /// Enqueues without waiting for delivery.
    pub fn submit(&self, event: LotteryEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            warn!(lottery_id = event.lottery_id(), "notification queue closed, event dropped");
        }
    }
}

/// Writes events to the log. Stands in for a chat bot or webhook.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn on_lottery_created(&self, lottery: &Lottery, prizes: &[Prize]) -> anyhow::Result<()> {
        info!(
            lottery_id = %lottery.id,
            title = %lottery.title,
            draw_mode = %lottery.draw_mode,
            prizes = prizes.len(),
            "lottery created"
        );
        Ok(())
    }

    async fn on_winners_drawn(&self, lottery: &Lottery, winners: &[Winner]) -> anyhow::Result<()> {
        for winner in winners {
            info!(
                lottery_id = %lottery.id,
                user_id = winner.user_id,
                username = %winner.username,
                prize = %winner.prize_name,
                "winner"
            );
        }
        Ok(())
    }
}
