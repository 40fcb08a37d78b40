use std::sync::{Mutex, MutexGuard};

use crate::constants::{GRID_HEIGHT, GRID_WIDTH};
use crate::types::{Team, TeamScores, TileView};

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("tile ({x},{y}) is outside the grid")]
pub struct OutOfBounds {
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Debug, Default)]
struct TileState {
    owner: Option<Team>,
    claimed_by: Option<String>,
    claimed_at: Option<u64>,
}

/// Owns ownership state for the fixed 100x100 tile universe. One mutex per
/// tile so claims on unrelated tiles never contend; the running score
/// counters are adjusted inside the same tile critical section as the
/// ownership write.
pub struct GridStore {
    tiles: Vec<Mutex<TileState>>,
    scores: Mutex<TeamScores>,
}

impl GridStore {
    pub fn new() -> Self {
        let cell_count = (GRID_WIDTH * GRID_HEIGHT) as usize;
        let mut tiles = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            tiles.push(Mutex::new(TileState::default()));
        }
        Self {
            tiles,
            scores: Mutex::new(TeamScores::default()),
        }
    }

    pub fn contains(x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < GRID_WIDTH && y < GRID_HEIGHT
    }

    fn index(x: i32, y: i32) -> usize {
        (y * GRID_WIDTH + x) as usize
    }

    pub fn get(&self, x: i32, y: i32) -> Result<TileView, OutOfBounds> {
        Ok(self.entry(x, y)?.view())
    }

    /// Locks a single tile. Held across the ownership gate, the durable
    /// write and the in-memory update so concurrent claims on the same
    /// tile serialize and losers observe the post-update state.
    pub fn entry(&self, x: i32, y: i32) -> Result<TileEntry<'_>, OutOfBounds> {
        if !Self::contains(x, y) {
            return Err(OutOfBounds { x, y });
        }
        let guard = self.tiles[Self::index(x, y)]
            .lock()
            .expect("tile lock poisoned");
        Ok(TileEntry {
            x,
            y,
            store: self,
            guard,
        })
    }

    pub fn scores(&self) -> TeamScores {
        *self.scores.lock().expect("score lock poisoned")
    }

    /// All currently owned tiles in row-major order. Each tile is locked
    /// briefly on its own, so the result is consistent with the last fully
    /// applied claim per tile without blocking writers elsewhere.
    pub fn owned_tiles(&self) -> Vec<TileView> {
        let mut out = Vec::new();
        for y in 0..GRID_HEIGHT {
            for x in 0..GRID_WIDTH {
                let state = self.tiles[Self::index(x, y)]
                    .lock()
                    .expect("tile lock poisoned");
                if state.owner.is_some() {
                    out.push(TileView {
                        x,
                        y,
                        owner: state.owner,
                        claimed_by: state.claimed_by.clone(),
                        claimed_at: state.claimed_at,
                    });
                }
            }
        }
        out
    }
}

impl Default for GridStore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TileEntry<'a> {
    x: i32,
    y: i32,
    store: &'a GridStore,
    guard: MutexGuard<'a, TileState>,
}

impl TileEntry<'_> {
    pub fn owner(&self) -> Option<Team> {
        self.guard.owner
    }

    pub fn view(&self) -> TileView {
        TileView {
            x: self.x,
            y: self.y,
            owner: self.guard.owner,
            claimed_by: self.guard.claimed_by.clone(),
            claimed_at: self.guard.claimed_at,
        }
    }

    /// Unconditional ownership write. Business rules live in the claim
    /// coordinator; this only mutates tile state and keeps the score
    /// counters in step.
    pub fn set_owner(&mut self, team: Team, player_id: &str, at_ms: u64) {
        let previous = self.guard.owner;
        self.guard.owner = Some(team);
        self.guard.claimed_by = Some(player_id.to_string());
        self.guard.claimed_at = Some(at_ms);

        if previous == Some(team) {
            return;
        }
        let mut scores = self.store.scores.lock().expect("score lock poisoned");
        match previous {
            Some(Team::Blue) => scores.blue -= 1,
            Some(Team::Pink) => scores.pink -= 1,
            None => {}
        }
        match team {
            Team::Blue => scores.blue += 1,
            Team::Pink => scores.pink += 1,
        }
    }
}
