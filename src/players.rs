use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::constants::{MAX_ACTIONS, NAME_MAX_LEN, REFILL_INTERVAL_MS};
use crate::types::{PlayerView, RegisterError, Team};

#[derive(Clone, Debug)]
pub struct PlayerRecord {
    pub id: String,
    pub name: String,
    pub team: Team,
    pub actions_remaining: i32,
    pub last_action_time: u64,
    pub last_seen: u64,
    join_seq: u64,
}

impl PlayerRecord {
    /// Grants one action per whole refill interval elapsed since the last
    /// anchor, advancing the anchor by the interval each time (not to
    /// `now`), so missed intervals refill multiple actions at once. Capped
    /// at MAX_ACTIONS; at the cap the anchor resets to `now`.
    pub fn refill_if_due(&mut self, now_ms: u64) -> i32 {
        let mut refilled = 0;
        while self.actions_remaining < MAX_ACTIONS
            && now_ms.saturating_sub(self.last_action_time) >= REFILL_INTERVAL_MS
        {
            self.actions_remaining += 1;
            self.last_action_time += REFILL_INTERVAL_MS;
            refilled += 1;
        }
        if self.actions_remaining >= MAX_ACTIONS {
            self.last_action_time = now_ms;
        }
        refilled
    }

    pub fn spend(&mut self, now_ms: u64) {
        self.actions_remaining -= 1;
        self.last_action_time = now_ms;
        self.last_seen = now_ms;
    }

    pub fn view(&self, now_ms: u64) -> PlayerView {
        let next_refill_in_ms = if self.actions_remaining >= MAX_ACTIONS {
            None
        } else {
            Some((self.last_action_time + REFILL_INTERVAL_MS).saturating_sub(now_ms))
        };
        PlayerView {
            id: self.id.clone(),
            name: self.name.clone(),
            team: self.team,
            actions_remaining: self.actions_remaining,
            last_action_time: self.last_action_time,
            last_seen: self.last_seen,
            next_refill_in_ms,
        }
    }
}

pub fn sanitize_name(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(NAME_MAX_LEN).collect())
}

pub fn player_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Tracks every player in the match. Records are keyed by the normalized
/// display name and each sits behind its own mutex, so budget mutations on
/// different players never contend.
pub struct PlayerRegistry {
    players: DashMap<String, Arc<Mutex<PlayerRecord>>>,
    join_counter: AtomicU64,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self {
            players: DashMap::new(),
            join_counter: AtomicU64::new(0),
        }
    }

    /// Creates the player on first join with a full action budget.
    /// Re-registering the same name+team is idempotent apart from
    /// refreshing `last_seen`; the same name on the other team is a
    /// conflict. Returns the view plus whether a record was created.
    pub fn register(
        &self,
        display_name: &str,
        team: Team,
        now_ms: u64,
    ) -> Result<(PlayerView, bool), RegisterError> {
        let name = sanitize_name(display_name).ok_or(RegisterError::InvalidName)?;
        let key = player_key(&name);

        match self.players.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let mut record = existing.get().lock().expect("player lock poisoned");
                if record.team != team {
                    return Err(RegisterError::DuplicateNameConflict(record.name.clone()));
                }
                record.last_seen = now_ms;
                Ok((record.view(now_ms), false))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let record = PlayerRecord {
                    id: key,
                    name,
                    team,
                    actions_remaining: MAX_ACTIONS,
                    last_action_time: now_ms,
                    last_seen: now_ms,
                    join_seq: self.join_counter.fetch_add(1, Ordering::Relaxed),
                };
                let view = record.view(now_ms);
                slot.insert(Arc::new(Mutex::new(record)));
                Ok((view, true))
            }
        }
    }

    /// Reinstates a player loaded from the store, preserving iteration
    /// order as join order.
    pub fn restore(&self, player: &PlayerView) {
        let key = player_key(&player.name);
        let record = PlayerRecord {
            id: key.clone(),
            name: player.name.clone(),
            team: player.team,
            actions_remaining: player.actions_remaining.clamp(0, MAX_ACTIONS),
            last_action_time: player.last_action_time,
            last_seen: player.last_seen,
            join_seq: self.join_counter.fetch_add(1, Ordering::Relaxed),
        };
        self.players.insert(key, Arc::new(Mutex::new(record)));
    }

    pub fn get(&self, player_id: &str) -> Option<Arc<Mutex<PlayerRecord>>> {
        self.players.get(player_id).map(|entry| entry.value().clone())
    }

    pub fn touch(&self, player_id: &str, now_ms: u64) -> bool {
        match self.get(player_id) {
            Some(record) => {
                record.lock().expect("player lock poisoned").last_seen = now_ms;
                true
            }
            None => false,
        }
    }

    pub fn refill_if_due(&self, player_id: &str, now_ms: u64) -> Option<i32> {
        let record = self.get(player_id)?;
        let mut guard = record.lock().expect("player lock poisoned");
        Some(guard.refill_if_due(now_ms))
    }

    pub fn members(&self, team: Team, now_ms: u64) -> Vec<PlayerView> {
        let mut rows: Vec<(u64, PlayerView)> = self
            .players
            .iter()
            .filter_map(|entry| {
                let record = entry.value().lock().expect("player lock poisoned");
                if record.team == team {
                    Some((record.join_seq, record.view(now_ms)))
                } else {
                    None
                }
            })
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, view)| view).collect()
    }

    pub fn all(&self, now_ms: u64) -> Vec<PlayerView> {
        let mut rows: Vec<(u64, PlayerView)> = self
            .players
            .iter()
            .map(|entry| {
                let record = entry.value().lock().expect("player lock poisoned");
                (record.join_seq, record.view(now_ms))
            })
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, view)| view).collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
