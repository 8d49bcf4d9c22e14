#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lottery::{
    DrawMode, EngineConfig, JoinInput, Lottery, LotteryEngine, LotteryEvent, LotteryInput,
    LotteryStatus, NewPrize, NotificationQueue, Notifier, Prize, RetryPolicy, Sleeper, Store,
    Winner,
};

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<LotteryEvent>>,
    pub fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn on_lottery_created(&self, lottery: &Lottery, prizes: &[Prize]) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(LotteryEvent::Created {
            lottery: lottery.clone(),
            prizes: prizes.to_vec(),
        });
        if self.fail {
            anyhow::bail!("chat unreachable");
        }
        Ok(())
    }

    async fn on_winners_drawn(&self, lottery: &Lottery, winners: &[Winner]) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(LotteryEvent::WinnersDrawn {
            lottery: lottery.clone(),
            winners: winners.to_vec(),
        });
        if self.fail {
            anyhow::bail!("chat unreachable");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

pub struct Harness {
    pub engine: LotteryEngine,
    pub notifier: Arc<RecordingNotifier>,
    pub sleeper: Arc<RecordingSleeper>,
}

/// Rate limits off; retries recorded instead of slept.
pub fn unlimited() -> EngineConfig {
    EngineConfig {
        create_limit_per_minute: 0,
        create_limit_per_day: 0,
        ..EngineConfig::default()
    }
}

pub fn harness(store: Arc<dyn Store>, config: EngineConfig) -> Harness {
    harness_with_notifier(store, config, RecordingNotifier::default())
}

pub fn harness_with_notifier(store: Arc<dyn Store>, config: EngineConfig, notifier: RecordingNotifier) -> Harness {
    let notifier = Arc::new(notifier);
    let sleeper = Arc::new(RecordingSleeper::default());
    let (queue, _worker) = NotificationQueue::start(notifier.clone());
    let engine = LotteryEngine::new(store, queue, config).with_retry(RetryPolicy::default(), sleeper.clone());
    Harness {
        engine,
        notifier,
        sleeper,
    }
}

pub fn prizes(items: &[(&str, u32)]) -> Vec<NewPrize> {
    items.iter()
        .map(|(name, quantity)| NewPrize {
            name: name.to_string(),
            quantity: *quantity,
        })
        .collect()
}

pub fn manual(creator_id: i64, items: &[(&str, u32)]) -> LotteryInput {
    LotteryInput {
        title: "Friday giveaway".into(),
        description: "stickers and mugs".into(),
        draw_mode: DrawMode::Manual,
        draw_time: None,
        max_entries: None,
        prizes: prizes(items),
        creator_id,
        weights_disabled: false,
    }
}

pub fn user(user_id: i64) -> JoinInput {
    JoinInput {
        user_id,
        username: format!("user{user_id}"),
        first_name: "Test".into(),
        last_name: String::new(),
    }
}

pub async fn publish(engine: &LotteryEngine, input: LotteryInput) -> Lottery {
    let draft = engine.create_draft(input.creator_id).await.unwrap();
    let (lottery, _) = engine.create_or_replace(&draft.id, input).await.unwrap();
    lottery
}

/// Polls until the lottery completes or two seconds pass.
pub async fn wait_until_completed(engine: &LotteryEngine, id: &str) -> bool {
    for _ in 0..200 {
        let snapshot = engine.snapshot(id).await.unwrap();
        if snapshot.lottery.status == LotteryStatus::Completed {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Polls until the notifier has seen `count` events or two seconds pass.
pub async fn wait_for_events(notifier: &RecordingNotifier, count: usize) -> Vec<LotteryEvent> {
    for _ in 0..200 {
        {
            let events = notifier.events.lock().unwrap();
            if events.len() >= count {
                return events.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    notifier.events.lock().unwrap().clone()
}
