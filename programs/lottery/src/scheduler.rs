//! Background auto-draw loop.
//!
//! Each cycle asks the store for due lotteries and feeds them one by one to
//! the retrying draw path. The first cycle runs immediately on start, which
//! catches lotteries that became due while the process was down.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::instructions::{DrawOutcome, DrawSource, LotteryEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Polling,
    Triggering,
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Triggering => "triggering",
        })
    }
}

/// Tally of one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub due: usize,
    pub drawn: usize,
    pub settled: usize,
    pub failed: usize,
}

pub struct AutoDrawScheduler {
    engine: LotteryEngine,
    interval: Duration,
}

impl AutoDrawScheduler {
    pub fn new(engine: LotteryEngine, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Polls once and draws everything that is due, sequentially.
    pub async fn run_once(&self) -> Result<CycleReport> {
        debug!(phase = %SchedulerPhase::Polling, "auto-draw cycle");
        let due = self.engine.due_lotteries().await?;

        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        debug!(phase = %SchedulerPhase::Triggering, due = due.len(), "auto-draw cycle");
        for id in &due {
            match self.engine.draw_with_retry(id, DrawSource::Scheduler).await {
                DrawOutcome::Drawn(_) => report.drawn += 1,
                DrawOutcome::AlreadySettled => report.settled += 1,
                DrawOutcome::Exhausted => report.failed += 1,
            }
        }

        info!(
            due = report.due,
            drawn = report.drawn,
            settled = report.settled,
            failed = report.failed,
            "auto-draw cycle finished"
        );
        Ok(report)
    }

    /// Runs until `shutdown` flips to true or its sender is dropped. Shutdown
    /// is observed between cycles; a cycle in progress is allowed to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "auto-draw scheduler started");

        loop {
            debug!(phase = %SchedulerPhase::Idle, "auto-draw scheduler waiting");
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.run_once().await {
                error!(error = %err, "auto-draw poll failed");
            }
        }

        info!("auto-draw scheduler stopped");
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        SchedulerHandle { shutdown, task }
    }
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "auto-draw scheduler task ended abnormally");
        }
    }
}
