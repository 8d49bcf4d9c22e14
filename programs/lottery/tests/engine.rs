mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::*;
use lottery::constants::MAX_WEIGHT;
use lottery::store::StoreResult;
use lottery::{
    DrawMode, DrawOutcome, DrawSource, EditToken, EngineConfig, Lottery, LotteryError,
    LotteryEvent, LotteryPatch, LotteryStats, LotteryStatus, MemoryStore, Participant, Prize,
    Store, StoreError, StoreTx, Winner,
};

fn memory() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

#[tokio::test]
async fn publishing_a_draft_activates_it_and_notifies() {
    let h = harness(memory(), unlimited());

    let draft = h.engine.create_draft(7).await.unwrap();
    assert_eq!(draft.status, LotteryStatus::Draft);
    assert_eq!(draft.id.len(), 6);

    let (lottery, prizes) = h
        .engine
        .create_or_replace(&draft.id, manual(99, &[("Mug", 1), ("Sticker", 2)]))
        .await
        .unwrap();

    assert_eq!(lottery.status, LotteryStatus::Active);
    // the draft's creator wins over the one in the input
    assert_eq!(lottery.creator_id, 7);
    assert_eq!(lottery.created_at, draft.created_at);
    assert_eq!(prizes.len(), 2);

    let events = wait_for_events(&h.notifier, 1).await;
    assert!(matches!(&events[0], LotteryEvent::Created { lottery, .. } if lottery.id == draft.id));
}

#[tokio::test]
async fn publishing_over_an_active_lottery_conflicts() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;

    let err = h
        .engine
        .create_or_replace(&lottery.id, manual(1, &[("Hat", 1)]))
        .await
        .unwrap_err();
    assert_eq!(err, LotteryError::Conflict);
}

#[tokio::test]
async fn publishing_validates_input() {
    let h = harness(memory(), unlimited());
    let draft = h.engine.create_draft(1).await.unwrap();

    let mut untitled = manual(1, &[("Mug", 1)]);
    untitled.title = "  ".into();
    let mut timed = manual(1, &[("Mug", 1)]);
    timed.draw_mode = DrawMode::Timed;

    for input in [untitled, manual(1, &[]), manual(1, &[("Mug", 0)]), timed] {
        let err = h.engine.create_or_replace(&draft.id, input).await.unwrap_err();
        assert!(matches!(err, LotteryError::Invalid(_)), "{err:?}");
    }

    let snapshot = h.engine.snapshot(&draft.id).await.unwrap();
    assert_eq!(snapshot.lottery.status, LotteryStatus::Draft);
}

#[tokio::test]
async fn drafts_are_rate_limited_per_creator() {
    let config = EngineConfig {
        create_limit_per_minute: 2,
        create_limit_per_day: 0,
        ..EngineConfig::default()
    };
    let h = harness(memory(), config);

    h.engine.create_draft(1).await.unwrap();
    h.engine.create_draft(1).await.unwrap();
    assert_eq!(h.engine.create_draft(1).await.unwrap_err(), LotteryError::TooFrequent);
    // other creators are unaffected
    h.engine.create_draft(2).await.unwrap();

    let daily = harness(
        memory(),
        EngineConfig {
            create_limit_per_minute: 0,
            create_limit_per_day: 1,
            ..EngineConfig::default()
        },
    );
    daily.engine.create_draft(1).await.unwrap();
    assert_eq!(
        daily.engine.create_draft(1).await.unwrap_err(),
        LotteryError::DailyLimitExceeded
    );
}

#[tokio::test]
async fn update_patches_fields_until_drawn() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;

    let (updated, prizes) = h
        .engine
        .update(
            &lottery.id,
            LotteryPatch {
                title: "Renamed".into(),
                weights_disabled: true,
                ..LotteryPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.description, lottery.description);
    assert!(updated.weights_disabled);
    assert_eq!(prizes.len(), 1);

    let (_, prizes) = h
        .engine
        .update(
            &lottery.id,
            LotteryPatch {
                prizes: prizes_of(&[("Hat", 2), ("Pen", 1)]),
                ..LotteryPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(prizes.len(), 2);

    h.engine.draw(&lottery.id).await.unwrap();
    let err = h.engine.update(&lottery.id, LotteryPatch::default()).await.unwrap_err();
    assert_eq!(err, LotteryError::Ended);
    assert_eq!(
        h.engine.update("000000", LotteryPatch::default()).await.unwrap_err(),
        LotteryError::NotFound
    );
}

fn prizes_of(items: &[(&str, u32)]) -> Vec<lottery::NewPrize> {
    common::prizes(items)
}

#[tokio::test]
async fn a_user_joins_only_once() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;

    let joined = h.engine.join(&lottery.id, user(10)).await.unwrap();
    assert_eq!(joined.participant.weight, 1);
    assert_eq!(joined.lottery.participant_count, 1);

    let err = h.engine.join(&lottery.id, user(10)).await.unwrap_err();
    assert_eq!(err, LotteryError::AlreadyJoined);

    let snapshot = h.engine.snapshot(&lottery.id).await.unwrap();
    assert_eq!(snapshot.participant_count, 1);
}

#[tokio::test]
async fn join_requires_an_active_lottery_with_room() {
    let h = harness(memory(), unlimited());

    assert_eq!(h.engine.join("123456", user(1)).await.unwrap_err(), LotteryError::NotFound);

    let draft = h.engine.create_draft(1).await.unwrap();
    assert_eq!(h.engine.join(&draft.id, user(1)).await.unwrap_err(), LotteryError::NotActive);

    let mut capped = manual(1, &[("Mug", 1)]);
    capped.max_entries = Some(1);
    let capped = publish(&h.engine, capped).await;
    h.engine.join(&capped.id, user(1)).await.unwrap();
    assert_eq!(h.engine.join(&capped.id, user(2)).await.unwrap_err(), LotteryError::Full);

    h.engine.draw(&capped.id).await.unwrap();
    assert_eq!(h.engine.join(&capped.id, user(3)).await.unwrap_err(), LotteryError::NotActive);
}

#[tokio::test]
async fn two_prizes_three_users() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("A", 1), ("B", 2)])).await;
    for id in 1..=3 {
        h.engine.join(&lottery.id, user(id)).await.unwrap();
    }

    let winners = h.engine.draw(&lottery.id).await.unwrap();

    assert_eq!(winners.len(), 3);
    let a: Vec<_> = winners.iter().filter(|w| w.prize_name == "A").collect();
    let b: Vec<_> = winners.iter().filter(|w| w.prize_name == "B").collect();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 2);
    assert_ne!(b[0].user_id, b[1].user_id);
    assert!(winners.iter().all(|w| w.id > 0));

    let (drawn, _, stored) = h.engine.results(&lottery.id).await.unwrap();
    assert_eq!(drawn.status, LotteryStatus::Completed);
    assert_eq!(stored, winners);
}

#[tokio::test]
async fn winners_never_repeat_a_prize_or_exceed_its_quantity() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Gold", 2), ("Silver", 5)])).await;
    for id in 1..=4 {
        h.engine.join(&lottery.id, user(id)).await.unwrap();
    }
    h.engine.set_participant_weight(&lottery.id, 1, 40).await.unwrap();

    let winners = h.engine.draw(&lottery.id).await.unwrap();

    let pairs: HashSet<_> = winners.iter().map(|w| (w.user_id, w.prize_id)).collect();
    assert_eq!(pairs.len(), winners.len());
    assert_eq!(winners.iter().filter(|w| w.prize_name == "Gold").count(), 2);
    // four distinct users for five units
    assert_eq!(winners.iter().filter(|w| w.prize_name == "Silver").count(), 4);
}

#[tokio::test]
async fn drawing_an_empty_lottery_completes_it() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 3)])).await;

    let winners = h.engine.draw(&lottery.id).await.unwrap();

    assert!(winners.is_empty());
    let snapshot = h.engine.snapshot(&lottery.id).await.unwrap();
    assert_eq!(snapshot.lottery.status, LotteryStatus::Completed);
    assert!(snapshot.winners.is_empty());
    // only the creation event, no winners announcement
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.notifier.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn a_second_draw_is_rejected_and_changes_nothing() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;
    h.engine.join(&lottery.id, user(5)).await.unwrap();

    let first = h.engine.draw(&lottery.id).await.unwrap();
    assert_eq!(h.engine.draw(&lottery.id).await.unwrap_err(), LotteryError::Ended);

    let (_, _, winners) = h.engine.results(&lottery.id).await.unwrap();
    assert_eq!(winners, first);
}

#[tokio::test]
async fn concurrent_draws_complete_exactly_once() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 2)])).await;
    for id in 1..=5 {
        h.engine.join(&lottery.id, user(id)).await.unwrap();
    }

    let (a, b) = tokio::join!(h.engine.draw(&lottery.id), h.engine.draw(&lottery.id));

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| r == &Err(LotteryError::Ended)));
    let (_, _, winners) = h.engine.results(&lottery.id).await.unwrap();
    assert_eq!(winners.len(), 2);
}

#[tokio::test]
async fn draft_lotteries_cannot_be_drawn() {
    let h = harness(memory(), unlimited());
    let draft = h.engine.create_draft(1).await.unwrap();

    assert_eq!(h.engine.draw(&draft.id).await.unwrap_err(), LotteryError::NotActive);
    assert_eq!(h.engine.draw("999999").await.unwrap_err(), LotteryError::NotFound);
    assert_eq!(h.engine.results(&draft.id).await.unwrap_err(), LotteryError::NotDrawn);
}

#[tokio::test]
async fn zero_prize_weight_excludes_only_that_prize() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("A", 1), ("B", 1)])).await;
    h.engine.join(&lottery.id, user(1)).await.unwrap();
    let prize_a = h.engine.snapshot(&lottery.id).await.unwrap().prizes[0].clone();
    h.engine.set_prize_weight(&lottery.id, 1, prize_a.id, 0).await.unwrap();

    let winners = h.engine.draw(&lottery.id).await.unwrap();

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].prize_name, "B");
}

#[tokio::test]
async fn disabled_weights_ignore_overrides() {
    let h = harness(memory(), unlimited());
    let mut input = manual(1, &[("A", 1), ("B", 1)]);
    input.weights_disabled = true;
    let lottery = publish(&h.engine, input).await;
    h.engine.join(&lottery.id, user(1)).await.unwrap();
    let prize_a = h.engine.snapshot(&lottery.id).await.unwrap().prizes[0].clone();
    h.engine.set_prize_weight(&lottery.id, 1, prize_a.id, 0).await.unwrap();

    let winners = h.engine.draw(&lottery.id).await.unwrap();

    assert_eq!(winners.len(), 2);
}

#[tokio::test]
async fn weights_above_the_ceiling_are_refused() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;
    h.engine.join(&lottery.id, user(1)).await.unwrap();
    h.engine.join(&lottery.id, user(2)).await.unwrap();
    let prize = h.engine.snapshot(&lottery.id).await.unwrap().prizes[0].clone();

    assert!(matches!(
        h.engine.set_participant_weight(&lottery.id, 1, u32::MAX).await.unwrap_err(),
        LotteryError::Invalid(_)
    ));
    assert!(matches!(
        h.engine.set_prize_weight(&lottery.id, 1, prize.id, MAX_WEIGHT + 1).await.unwrap_err(),
        LotteryError::Invalid(_)
    ));
    let participants = h.engine.participants(&lottery.id).await.unwrap();
    assert_eq!(participants[0].weight, 1);
    assert!(participants[0].prize_weights.is_empty());

    h.engine.set_participant_weight(&lottery.id, 1, MAX_WEIGHT).await.unwrap();
    h.engine.set_prize_weight(&lottery.id, 2, prize.id, MAX_WEIGHT).await.unwrap();

    let winners = h.engine.draw(&lottery.id).await.unwrap();
    assert_eq!(winners.len(), 1);
}

#[tokio::test]
async fn weights_and_removals_are_sealed_after_the_draw() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;
    h.engine.join(&lottery.id, user(1)).await.unwrap();
    h.engine.join(&lottery.id, user(2)).await.unwrap();
    let prize = h.engine.snapshot(&lottery.id).await.unwrap().prizes[0].clone();

    assert_eq!(
        h.engine.set_participant_weight(&lottery.id, 42, 3).await.unwrap_err(),
        LotteryError::NotFound
    );
    assert_eq!(
        h.engine.set_prize_weight(&lottery.id, 1, prize.id + 1000, 3).await.unwrap_err(),
        LotteryError::NotFound
    );

    h.engine.set_prize_weight(&lottery.id, 2, prize.id, 5).await.unwrap();
    let participants = h.engine.participants(&lottery.id).await.unwrap();
    assert_eq!(participants[1].prize_weights.get(&prize.id), Some(&5));
    h.engine.clear_prize_weight(&lottery.id, 2, prize.id).await.unwrap();
    let participants = h.engine.participants(&lottery.id).await.unwrap();
    assert!(participants[1].prize_weights.is_empty());

    h.engine.remove_participant(&lottery.id, 2).await.unwrap();
    assert_eq!(h.engine.snapshot(&lottery.id).await.unwrap().participant_count, 1);
    assert_eq!(
        h.engine.remove_participant(&lottery.id, 2).await.unwrap_err(),
        LotteryError::NotFound
    );

    h.engine.draw(&lottery.id).await.unwrap();
    assert_eq!(
        h.engine.set_participant_weight(&lottery.id, 1, 3).await.unwrap_err(),
        LotteryError::Ended
    );
    assert_eq!(
        h.engine.remove_participant(&lottery.id, 1).await.unwrap_err(),
        LotteryError::Ended
    );
}

#[tokio::test]
async fn creators_can_add_participants_before_publishing() {
    let h = harness(memory(), unlimited());
    let draft = h.engine.create_draft(1).await.unwrap();

    h.engine.add_participant(&draft.id, user(3)).await.unwrap();
    assert_eq!(
        h.engine.add_participant(&draft.id, user(3)).await.unwrap_err(),
        LotteryError::AlreadyJoined
    );

    let (lottery, _) = h
        .engine
        .create_or_replace(&draft.id, manual(1, &[("Mug", 1)]))
        .await
        .unwrap();
    assert_eq!(lottery.participant_count, 1);

    h.engine.draw(&lottery.id).await.unwrap();
    assert_eq!(
        h.engine.add_participant(&lottery.id, user(4)).await.unwrap_err(),
        LotteryError::Ended
    );
}

#[tokio::test]
async fn reaching_capacity_draws_in_the_background() {
    let h = harness(memory(), unlimited());
    let mut input = manual(1, &[("Mug", 1)]);
    input.draw_mode = DrawMode::Full;
    input.max_entries = Some(2);
    let lottery = publish(&h.engine, input).await;

    h.engine.join(&lottery.id, user(1)).await.unwrap();
    h.engine.join(&lottery.id, user(2)).await.unwrap();

    assert!(wait_until_completed(&h.engine, &lottery.id).await);
    let (_, _, winners) = h.engine.results(&lottery.id).await.unwrap();
    assert_eq!(winners.len(), 1);

    let events = wait_for_events(&h.notifier, 2).await;
    assert!(matches!(&events[1], LotteryEvent::WinnersDrawn { winners, .. } if winners.len() == 1));
}

#[tokio::test]
async fn a_new_edit_token_replaces_the_old_one() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;

    let first = h.engine.issue_edit_token(&lottery.id, 1, None).await.unwrap();
    h.engine.validate_edit_token(&lottery.id, &first.token).await.unwrap();

    let second = h.engine.issue_edit_token(&lottery.id, 1, None).await.unwrap();
    assert_ne!(first.token, second.token);
    assert_eq!(
        h.engine.validate_edit_token(&lottery.id, &first.token).await.unwrap_err(),
        LotteryError::TokenInvalid
    );
    h.engine.validate_edit_token(&lottery.id, &second.token).await.unwrap();

    let other = publish(&h.engine, manual(1, &[("Hat", 1)])).await;
    assert_eq!(
        h.engine.validate_edit_token(&other.id, &second.token).await.unwrap_err(),
        LotteryError::TokenInvalid
    );
}

#[tokio::test]
async fn edit_tokens_belong_to_the_creator_and_expire() {
    let h = harness(memory(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;

    assert_eq!(
        h.engine.issue_edit_token(&lottery.id, 2, None).await.unwrap_err(),
        LotteryError::PermissionDenied
    );
    assert_eq!(
        h.engine.issue_edit_token("000000", 1, None).await.unwrap_err(),
        LotteryError::NotFound
    );

    let expired = h
        .engine
        .issue_edit_token(&lottery.id, 1, Some(chrono::Duration::seconds(-1)))
        .await
        .unwrap();
    assert_eq!(
        h.engine.validate_edit_token(&lottery.id, &expired.token).await.unwrap_err(),
        LotteryError::TokenInvalid
    );
}

#[tokio::test]
async fn stats_count_published_lotteries() {
    let h = harness(memory(), unlimited());
    h.engine.create_draft(1).await.unwrap();
    publish(&h.engine, manual(1, &[("Mug", 1)])).await;
    let mut timed = manual(1, &[("Hat", 1)]);
    timed.draw_mode = DrawMode::Timed;
    timed.draw_time = Some(Utc::now() + chrono::Duration::hours(1));
    publish(&h.engine, timed).await;

    let stats = h.engine.stats().await.unwrap();

    assert_eq!(
        stats,
        LotteryStats {
            total_count: 2,
            today_count: 2,
            scheduled_count: 1,
        }
    );
}

#[tokio::test]
async fn a_failing_notifier_does_not_undo_the_draw() {
    let notifier = RecordingNotifier {
        fail: true,
        ..RecordingNotifier::default()
    };
    let h = harness_with_notifier(memory(), unlimited(), notifier);
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;
    h.engine.join(&lottery.id, user(1)).await.unwrap();

    let winners = h.engine.draw(&lottery.id).await.unwrap();

    assert_eq!(winners.len(), 1);
    assert_eq!(wait_for_events(&h.notifier, 2).await.len(), 2);
    let (drawn, _, _) = h.engine.results(&lottery.id).await.unwrap();
    assert_eq!(drawn.status, LotteryStatus::Completed);
}

/// Fails `begin` while `failures` is positive, otherwise defers to memory.
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicU32,
}

#[async_trait]
impl Store for FlakyStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("database is locked".into()));
        }
        self.inner.begin().await
    }

    async fn get_lottery(&self, id: &str) -> StoreResult<Option<Lottery>> {
        self.inner.get_lottery(id).await
    }

    async fn lottery_exists(&self, id: &str) -> StoreResult<bool> {
        self.inner.lottery_exists(id).await
    }

    async fn insert_lottery(&self, lottery: &Lottery) -> StoreResult<()> {
        self.inner.insert_lottery(lottery).await
    }

    async fn count_created_since(&self, creator_id: i64, since: DateTime<Utc>) -> StoreResult<u32> {
        self.inner.count_created_since(creator_id, since).await
    }

    async fn prizes(&self, lottery_id: &str) -> StoreResult<Vec<Prize>> {
        self.inner.prizes(lottery_id).await
    }

    async fn participant_count(&self, lottery_id: &str) -> StoreResult<u32> {
        self.inner.participant_count(lottery_id).await
    }

    async fn participants(&self, lottery_id: &str) -> StoreResult<Vec<Participant>> {
        self.inner.participants(lottery_id).await
    }

    async fn winners(&self, lottery_id: &str) -> StoreResult<Vec<Winner>> {
        self.inner.winners(lottery_id).await
    }

    async fn find_edit_token(&self, lottery_id: &str, token: &str) -> StoreResult<Option<EditToken>> {
        self.inner.find_edit_token(lottery_id, token).await
    }

    async fn due_lotteries(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        self.inner.due_lotteries(now).await
    }

    async fn stats(&self, today_start: DateTime<Utc>) -> StoreResult<LotteryStats> {
        self.inner.stats(today_start).await
    }
}

#[tokio::test]
async fn draw_with_retry_recovers_from_transient_failures() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        failures: AtomicU32::new(0),
    });
    let h = harness(store.clone(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;
    h.engine.join(&lottery.id, user(1)).await.unwrap();

    store.failures.store(2, Ordering::SeqCst);
    let outcome = h.engine.draw_with_retry(&lottery.id, DrawSource::Manual).await;

    assert_eq!(outcome, DrawOutcome::Drawn(1));
    assert_eq!(
        *h.sleeper.slept.lock().unwrap(),
        vec![Duration::from_millis(200), Duration::from_millis(400)]
    );

    let again = h.engine.draw_with_retry(&lottery.id, DrawSource::Scheduler).await;
    assert_eq!(again, DrawOutcome::AlreadySettled);
}

#[tokio::test]
async fn draw_with_retry_gives_up_and_leaves_the_lottery_active() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        failures: AtomicU32::new(0),
    });
    let h = harness(store.clone(), unlimited());
    let lottery = publish(&h.engine, manual(1, &[("Mug", 1)])).await;

    store.failures.store(10, Ordering::SeqCst);
    let outcome = h.engine.draw_with_retry(&lottery.id, DrawSource::Scheduler).await;

    assert_eq!(outcome, DrawOutcome::Exhausted);
    assert_eq!(h.sleeper.slept.lock().unwrap().len(), 2);
    let snapshot = h.engine.snapshot(&lottery.id).await.unwrap();
    assert_eq!(snapshot.lottery.status, LotteryStatus::Active);
}
