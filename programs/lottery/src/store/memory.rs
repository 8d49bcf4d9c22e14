//! In-process gateway.
//!
//! All state sits behind one async mutex. A transaction holds the lock for its
//! whole life, so transactions are fully serialised. The first write in a
//! transaction copies every table and later writes go to that copy, so a
//! rollback is just dropping it. That copy grows with the whole store, which
//! keeps this backend to tests and small embeddings; use the SQLite gateway
//! for anything long-lived.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, StoreError, StoreResult, StoreTx};
use crate::constants::DEFAULT_WEIGHT;
use crate::state::{
    DrawMode, EditToken, Lottery, LotteryStats, LotteryStatus, NewParticipant, NewPrize,
    Participant, Prize, PrizeWeight, Winner,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    lotteries: HashMap<String, Lottery>,
    prizes: BTreeMap<i64, Prize>,
    participants: BTreeMap<i64, Participant>,
    prize_weights: BTreeMap<(String, i64, i64), u32>,
    winners: BTreeMap<i64, Winner>,
    edit_tokens: HashMap<String, EditToken>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn prizes_of(&self, lottery_id: &str) -> Vec<Prize> {
        self.prizes
            .values()
            .filter(|prize| prize.lottery_id == lottery_id)
            .cloned()
            .collect()
    }

    fn count_participants(&self, lottery_id: &str) -> u32 {
        self.participants
            .values()
            .filter(|participant| participant.lottery_id == lottery_id)
            .count() as u32
    }

    fn participants_of(&self, lottery_id: &str) -> Vec<Participant> {
        let mut participants: Vec<Participant> = self
            .participants
            .values()
            .filter(|participant| participant.lottery_id == lottery_id)
            .cloned()
            .collect();
        participants.sort_by_key(|participant| (participant.joined_at, participant.id));

        for participant in &mut participants {
            participant.prize_weights = self
                .prize_weights
                .iter()
                .filter(|((lottery, user, _), _)| lottery == lottery_id && *user == participant.user_id)
                .map(|((_, _, prize_id), weight)| (*prize_id, *weight))
                .collect();
        }
        participants
    }

    fn find_participant_mut(&mut self, lottery_id: &str, user_id: i64) -> Option<&mut Participant> {
        self.participants
            .values_mut()
            .find(|participant| participant.lottery_id == lottery_id && participant.user_id == user_id)
    }

    fn adjust_counter(&mut self, lottery_id: &str, delta: i64) {
        if let Some(lottery) = self.lotteries.get_mut(lottery_id) {
            let next = (lottery.participant_count as i64 + delta).max(0);
            lottery.participant_count = next as u32;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock(&self) -> MemoryTx {
        MemoryTx {
            guard: self.tables.clone().lock_owned().await,
            staged: None,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(self.lock().await))
    }

    async fn get_lottery(&self, id: &str) -> StoreResult<Option<Lottery>> {
        Ok(self.tables.lock().await.lotteries.get(id).cloned())
    }

    async fn lottery_exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().await.lotteries.contains_key(id))
    }

    async fn insert_lottery(&self, lottery: &Lottery) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.lotteries.contains_key(&lottery.id) {
            return Err(StoreError::Duplicate);
        }
        tables.lotteries.insert(lottery.id.clone(), lottery.clone());
        Ok(())
    }

    async fn count_created_since(&self, creator_id: i64, since: DateTime<Utc>) -> StoreResult<u32> {
        let tables = self.tables.lock().await;
        Ok(tables
            .lotteries
            .values()
            .filter(|lottery| lottery.creator_id == creator_id && lottery.created_at >= since)
            .count() as u32)
    }

    async fn prizes(&self, lottery_id: &str) -> StoreResult<Vec<Prize>> {
        Ok(self.tables.lock().await.prizes_of(lottery_id))
    }

    async fn participant_count(&self, lottery_id: &str) -> StoreResult<u32> {
        Ok(self.tables.lock().await.count_participants(lottery_id))
    }

    async fn participants(&self, lottery_id: &str) -> StoreResult<Vec<Participant>> {
        Ok(self.tables.lock().await.participants_of(lottery_id))
    }

    async fn winners(&self, lottery_id: &str) -> StoreResult<Vec<Winner>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .winners
            .values()
            .filter(|winner| winner.lottery_id == lottery_id)
            .cloned()
            .collect())
    }

    async fn find_edit_token(&self, lottery_id: &str, token: &str) -> StoreResult<Option<EditToken>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .edit_tokens
            .get(token)
            .filter(|edit_token| edit_token.lottery_id == lottery_id)
            .cloned())
    }

    async fn due_lotteries(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let tables = self.tables.lock().await;
        let mut due: Vec<String> = tables
            .lotteries
            .values()
            .filter(|lottery| lottery.status == LotteryStatus::Active)
            .filter(|lottery| match lottery.draw_mode {
                DrawMode::Timed => lottery.draw_time.map_or(false, |at| at <= now),
                DrawMode::Full => lottery.is_full(tables.count_participants(&lottery.id)),
                DrawMode::Manual => false,
            })
            .map(|lottery| lottery.id.clone())
            .collect();
        due.sort();
        Ok(due)
    }

    async fn stats(&self, today_start: DateTime<Utc>) -> StoreResult<LotteryStats> {
        let tables = self.tables.lock().await;
        let mut stats = LotteryStats::default();
        for lottery in tables.lotteries.values() {
            if lottery.status == LotteryStatus::Draft {
                continue;
            }
            stats.total_count += 1;
            if lottery.created_at >= today_start {
                stats.today_count += 1;
            }
            if lottery.status == LotteryStatus::Active && lottery.draw_mode == DrawMode::Timed {
                stats.scheduled_count += 1;
            }
        }
        Ok(stats)
    }
}

/// Holds the store lock for its whole life. Reads go straight to the locked
/// tables until the first write, which stages a full copy of every table;
/// commit swaps that copy in.
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Option<Tables>,
}

impl MemoryTx {
    fn read(&self) -> &Tables {
        self.staged.as_ref().unwrap_or(&*self.guard)
    }

    fn write(&mut self) -> &mut Tables {
        let current: &Tables = &self.guard;
        self.staged.get_or_insert_with(|| current.clone())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_lottery(&mut self, id: &str) -> StoreResult<Option<Lottery>> {
        Ok(self.read().lotteries.get(id).cloned())
    }

    async fn insert_lottery(&mut self, lottery: &Lottery) -> StoreResult<()> {
        let tables = self.write();
        if tables.lotteries.contains_key(&lottery.id) {
            return Err(StoreError::Duplicate);
        }
        tables.lotteries.insert(lottery.id.clone(), lottery.clone());
        Ok(())
    }

    async fn update_lottery(&mut self, lottery: &Lottery) -> StoreResult<()> {
        let tables = self.write();
        match tables.lotteries.get_mut(&lottery.id) {
            Some(row) => {
                let participant_count = row.participant_count;
                *row = lottery.clone();
                row.participant_count = participant_count;
                Ok(())
            }
            None => Err(StoreError::Backend(format!("lottery {} does not exist", lottery.id))),
        }
    }

    async fn replace_prizes(&mut self, lottery_id: &str, prizes: &[NewPrize]) -> StoreResult<Vec<Prize>> {
        let tables = self.write();
        tables.prizes.retain(|_, prize| prize.lottery_id != lottery_id);
        tables
            .prize_weights
            .retain(|(lottery, _, _), _| lottery != lottery_id);

        for prize in prizes {
            let id = tables.next_id();
            tables.prizes.insert(
                id,
                Prize {
                    id,
                    lottery_id: lottery_id.to_string(),
                    name: prize.name.clone(),
                    quantity: prize.quantity,
                },
            );
        }
        Ok(tables.prizes_of(lottery_id))
    }

    async fn prizes(&mut self, lottery_id: &str) -> StoreResult<Vec<Prize>> {
        Ok(self.read().prizes_of(lottery_id))
    }

    async fn participants(&mut self, lottery_id: &str) -> StoreResult<Vec<Participant>> {
        Ok(self.read().participants_of(lottery_id))
    }

    async fn add_participant(&mut self, participant: &NewParticipant) -> StoreResult<Participant> {
        let tables = self.write();
        if tables
            .find_participant_mut(&participant.lottery_id, participant.user_id)
            .is_some()
        {
            return Err(StoreError::Duplicate);
        }

        let id = tables.next_id();
        let row = Participant {
            id,
            lottery_id: participant.lottery_id.clone(),
            user_id: participant.user_id,
            username: participant.username.clone(),
            first_name: participant.first_name.clone(),
            last_name: participant.last_name.clone(),
            weight: DEFAULT_WEIGHT,
            prize_weights: BTreeMap::new(),
            joined_at: participant.joined_at,
        };
        tables.participants.insert(id, row.clone());
        tables.adjust_counter(&participant.lottery_id, 1);
        Ok(row)
    }

    async fn update_participant_weight(
        &mut self,
        lottery_id: &str,
        user_id: i64,
        weight: u32,
    ) -> StoreResult<bool> {
        let tables = self.write();
        match tables.find_participant_mut(lottery_id, user_id) {
            Some(participant) => {
                participant.weight = weight;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_prize_weight(&mut self, weight: &PrizeWeight) -> StoreResult<()> {
        let tables = self.write();
        tables.prize_weights.insert(
            (weight.lottery_id.clone(), weight.user_id, weight.prize_id),
            weight.weight,
        );
        Ok(())
    }

    async fn delete_prize_weight(
        &mut self,
        lottery_id: &str,
        user_id: i64,
        prize_id: i64,
    ) -> StoreResult<bool> {
        let tables = self.write();
        Ok(tables
            .prize_weights
            .remove(&(lottery_id.to_string(), user_id, prize_id))
            .is_some())
    }

    async fn remove_participant(&mut self, lottery_id: &str, user_id: i64) -> StoreResult<bool> {
        let tables = self.write();
        let Some(id) = tables
            .find_participant_mut(lottery_id, user_id)
            .map(|participant| participant.id)
        else {
            return Ok(false);
        };

        tables.participants.remove(&id);
        tables
            .prize_weights
            .retain(|(lottery, user, _), _| !(lottery == lottery_id && *user == user_id));
        tables.adjust_counter(lottery_id, -1);
        Ok(true)
    }

    async fn insert_winner(&mut self, winner: &Winner) -> StoreResult<Winner> {
        let tables = self.write();
        let id = tables.next_id();
        let row = Winner {
            id,
            ..winner.clone()
        };
        tables.winners.insert(id, row.clone());
        Ok(row)
    }

    async fn replace_edit_token(&mut self, token: &EditToken) -> StoreResult<()> {
        let tables = self.write();
        tables
            .edit_tokens
            .retain(|_, existing| existing.lottery_id != token.lottery_id);
        tables
            .edit_tokens
            .insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, staged } = *self;
        if let Some(staged) = staged {
            *guard = staged;
        }
        Ok(())
    }
}
