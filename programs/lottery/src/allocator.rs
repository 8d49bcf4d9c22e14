//! Weighted prize allocation.
//!
//! Pure: takes prizes and entrants, returns winners. All persistence happens in
//! the engine. The random source is passed in so draws are reproducible under a
//! fixed seed.

use std::collections::{BTreeMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::constants::MAX_WEIGHT;
use crate::state::{Participant, Prize, Winner};

/// A participant as seen by the allocator, with weights already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrant {
    pub participant_id: i64,
    pub user_id: i64,
    pub username: String,
    pub default_weight: u32,
    pub overrides: BTreeMap<i64, u32>,
}

impl Entrant {
    /// Builds an entrant from a stored participant. With weighting disabled
    /// every entrant has weight 1 for every prize.
    pub fn from_participant(participant: &Participant, weights_disabled: bool) -> Self {
        let (default_weight, overrides) = if weights_disabled {
            (1, BTreeMap::new())
        } else {
            (participant.weight, participant.prize_weights.clone())
        };

        Self {
            participant_id: participant.id,
            user_id: participant.user_id,
            username: participant.username.clone(),
            default_weight,
            overrides,
        }
    }

    pub fn weight_for(&self, prize_id: i64) -> u32 {
        self.overrides
            .get(&prize_id)
            .copied()
            .unwrap_or(self.default_weight)
    }
}

/// Units of a prize left unawarded because the attempt ceiling was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoidUnits {
    pub prize_id: i64,
    pub prize_name: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Winners in prize order. Ids are zero until persisted.
    pub winners: Vec<Winner>,
    pub void_units: Vec<VoidUnits>,
}

/// Assigns prize units to entrants.
///
/// Each prize is handled independently:
/// 1. every entrant appears in the pool once per unit of their weight for the
///    prize (weight 0 keeps them out of this prize only);
/// 2. the pool is shuffled;
/// 3. the pool is walked, accepting a candidate only if that user has not
///    already won this prize; an exhausted pool is reshuffled and walked again;
/// 4. each unit gets at most `2 * pool.len()` attempts, after which it is void.
///
/// A prize with an empty pool awards nothing and reports no void units.
pub fn allocate<R: Rng + ?Sized>(
    lottery_id: &str,
    prizes: &[Prize],
    entrants: &[Entrant],
    rng: &mut R,
) -> Allocation {
    let mut awarded: HashSet<(i64, i64)> = HashSet::new();
    let mut allocation = Allocation::default();

    for prize in prizes {
        let mut pool = weighted_pool(prize.id, entrants);
        if pool.is_empty() {
            continue;
        }

        let eligible_users = pool
            .iter()
            .map(|entrant| entrant.user_id)
            .collect::<HashSet<_>>()
            .len();
        let max_attempts = pool.len() * 2;
        let mut winners_of_prize = 0usize;
        let mut void = 0u32;
        let mut cursor = 0usize;

        pool.shuffle(rng);

        for _ in 0..prize.quantity {
            // every distinct user already holds a unit: no candidate can be accepted
            if winners_of_prize == eligible_users {
                void += 1;
                continue;
            }

            let mut placed = false;
            for _ in 0..max_attempts {
                if cursor >= pool.len() {
                    cursor = 0;
                    pool.shuffle(rng);
                }

                let candidate = pool[cursor];
                cursor += 1;

                if !awarded.insert((candidate.user_id, prize.id)) {
                    continue;
                }

                allocation.winners.push(Winner {
                    id: 0,
                    lottery_id: lottery_id.to_string(),
                    participant_id: candidate.participant_id,
                    prize_id: prize.id,
                    user_id: candidate.user_id,
                    username: candidate.username.clone(),
                    prize_name: prize.name.clone(),
                });
                winners_of_prize += 1;
                placed = true;
                break;
            }

            if !placed {
                void += 1;
            }
        }

        if void > 0 {
            allocation.void_units.push(VoidUnits {
                prize_id: prize.id,
                prize_name: prize.name.clone(),
                count: void,
            });
        }
    }

    allocation
}

fn weighted_pool(prize_id: i64, entrants: &[Entrant]) -> Vec<&Entrant> {
    let mut pool = Vec::new();
    for entrant in entrants {
        let weight = entrant.weight_for(prize_id).min(MAX_WEIGHT) as usize;
        pool.extend(std::iter::repeat(entrant).take(weight));
    }
    pool
}
