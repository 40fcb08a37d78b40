use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::chat::ChatLog;
use crate::claim::ClaimCoordinator;
use crate::clock::GameClock;
use crate::constants::{CHAT_RETAINED, EVENT_CHANNEL_CAPACITY, MATCH_DURATION_MS};
use crate::events::EventBroadcaster;
use crate::grid::GridStore;
use crate::match_control::MatchController;
use crate::players::PlayerRegistry;
use crate::store::{MatchStore, PersistedMatch, StoreError, SNAPSHOT_VERSION};
use crate::types::{
    ChatError, ChatMessageView, ClaimError, ClaimSuccess, GameEvent, MatchPhase, PlayerView,
    RegisterError, SnapshotView, Team, TeamScores,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct GameEngineOptions {
    pub start_ms_override: Option<u64>,
    pub duration_ms_override: Option<u64>,
}

/// The authoritative match instance. Owns every component, is created
/// once per process and injected into transport handlers; all mutation
/// goes through its gated entry points.
pub struct GameEngine {
    clock: Arc<dyn GameClock>,
    store: Arc<dyn MatchStore>,
    registry: Arc<PlayerRegistry>,
    grid: Arc<GridStore>,
    control: Arc<MatchController>,
    events: EventBroadcaster,
    chat: ChatLog,
    coordinator: ClaimCoordinator,
    finalized: AtomicBool,
}

impl GameEngine {
    /// Resumes the match found in the store, or creates a fresh one.
    pub fn new(
        clock: Arc<dyn GameClock>,
        store: Arc<dyn MatchStore>,
        options: GameEngineOptions,
    ) -> Result<Self, StoreError> {
        match store.load_snapshot()? {
            Some(snapshot) => Self::resume(clock, store, snapshot),
            None => Self::create(clock, store, options),
        }
    }

    fn assemble(
        clock: Arc<dyn GameClock>,
        store: Arc<dyn MatchStore>,
        control: MatchController,
    ) -> Self {
        let registry = Arc::new(PlayerRegistry::new());
        let grid = Arc::new(GridStore::new());
        let control = Arc::new(control);
        let events = EventBroadcaster::new(EVENT_CHANNEL_CAPACITY);
        let coordinator = ClaimCoordinator::new(
            registry.clone(),
            grid.clone(),
            control.clone(),
            events.clone(),
            store.clone(),
        );
        Self {
            clock,
            store,
            registry,
            grid,
            control,
            events,
            chat: ChatLog::new(),
            coordinator,
            finalized: AtomicBool::new(false),
        }
    }

    fn create(
        clock: Arc<dyn GameClock>,
        store: Arc<dyn MatchStore>,
        options: GameEngineOptions,
    ) -> Result<Self, StoreError> {
        let start_ms = options.start_ms_override.unwrap_or_else(|| clock.now_ms());
        let duration_ms = options.duration_ms_override.unwrap_or(MATCH_DURATION_MS);
        let engine = Self::assemble(
            clock,
            store,
            MatchController::new(start_ms, duration_ms),
        );
        engine.persist_snapshot()?;
        tracing::info!(
            start_ms,
            end_ms = engine.control.end_ms(),
            "match created"
        );
        Ok(engine)
    }

    fn resume(
        clock: Arc<dyn GameClock>,
        store: Arc<dyn MatchStore>,
        snapshot: PersistedMatch,
    ) -> Result<Self, StoreError> {
        let duration_ms = snapshot.ends_at_ms.saturating_sub(snapshot.started_at_ms);
        let engine = Self::assemble(
            clock,
            store,
            MatchController::new(snapshot.started_at_ms, duration_ms),
        );

        for player in &snapshot.players {
            engine.registry.restore(player);
        }
        for tile in &snapshot.tiles {
            let Some(team) = tile.owner else { continue };
            match engine.grid.entry(tile.x, tile.y) {
                Ok(mut entry) => entry.set_owner(
                    team,
                    tile.claimed_by.as_deref().unwrap_or(""),
                    tile.claimed_at.unwrap_or(snapshot.started_at_ms),
                ),
                Err(error) => {
                    tracing::warn!(%error, "skipping persisted tile outside the grid");
                }
            }
        }
        let tail_start = snapshot.chat.len().saturating_sub(CHAT_RETAINED);
        for message in &snapshot.chat[tail_start..] {
            engine.chat.restore(message.clone());
        }

        tracing::info!(
            players = snapshot.players.len(),
            tiles = snapshot.tiles.len(),
            chat = snapshot.chat.len(),
            "match resumed from snapshot"
        );
        Ok(engine)
    }

    pub fn join(&self, display_name: &str, team: Team) -> Result<PlayerView, RegisterError> {
        let now_ms = self.clock.now_ms();
        let (player, created) = self.registry.register(display_name, team, now_ms)?;
        if created {
            tracing::debug!(player = %player.id, team = team.as_str(), "player joined");
            self.events.publish(GameEvent::PlayerJoined {
                player: player.clone(),
            });
        }
        Ok(player)
    }

    pub fn claim_tile(&self, player_id: &str, x: i32, y: i32) -> Result<ClaimSuccess, ClaimError> {
        self.coordinator.claim(player_id, x, y, self.clock.now_ms())
    }

    pub fn send_chat(&self, player_id: &str, text: &str) -> Result<ChatMessageView, ChatError> {
        let now_ms = self.clock.now_ms();
        let record = self
            .registry
            .get(player_id)
            .ok_or_else(|| ChatError::UnknownPlayer(player_id.to_string()))?;
        let (name, team) = {
            let mut player = record.lock().expect("player lock poisoned");
            player.last_seen = now_ms;
            (player.name.clone(), player.team)
        };

        let message = self
            .chat
            .append_persisted(player_id, &name, team, text, now_ms, |message| {
                self.store.append_chat(message)
            })?;
        self.events.publish(GameEvent::ChatPosted {
            message: message.clone(),
        });
        Ok(message)
    }

    pub fn heartbeat(&self, player_id: &str) -> bool {
        self.registry.touch(player_id, self.clock.now_ms())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> MatchPhase {
        self.control.phase(self.clock.now_ms())
    }

    pub fn scores(&self) -> TeamScores {
        self.grid.scores()
    }

    pub fn final_score(&self) -> Option<TeamScores> {
        self.control.final_score()
    }

    pub fn members(&self, team: Team) -> Vec<PlayerView> {
        self.registry.members(team, self.clock.now_ms())
    }

    pub fn player_count(&self) -> usize {
        self.registry.len()
    }

    pub fn snapshot(&self) -> SnapshotView {
        let now_ms = self.clock.now_ms();
        SnapshotView {
            phase: self.control.phase(now_ms),
            now_ms,
            started_at_ms: self.control.start_ms(),
            ends_at_ms: self.control.end_ms(),
            time_left_ms: self.control.time_remaining_ms(now_ms),
            scores: self.grid.scores(),
            tiles: self.grid.owned_tiles(),
            players: self.registry.all(now_ms),
            chat: self.chat.tail(),
        }
    }

    /// Transitions the engine into its ended state once the clock passes
    /// the match end: freezes the final score, persists a closing
    /// snapshot and notifies subscribers. Returns the frozen result on
    /// the transition, `None` on every other call.
    pub fn poll_end(&self) -> Option<(TeamScores, Option<Team>)> {
        if self.control.phase(self.clock.now_ms()) != MatchPhase::Ended {
            return None;
        }
        if self.finalized.swap(true, Ordering::SeqCst) {
            return None;
        }

        let scores = self.control.freeze_final(self.grid.scores());
        let winner = MatchController::winner(scores);
        if let Err(error) = self.persist_snapshot() {
            tracing::warn!(%error, "failed to persist closing snapshot");
        }
        self.events.publish(GameEvent::MatchEnded { scores, winner });
        tracing::info!(
            blue = scores.blue,
            pink = scores.pink,
            winner = winner.map(Team::as_str).unwrap_or("tie"),
            "match ended"
        );
        Some((scores, winner))
    }

    /// Writes the full current state through the store. Called at match
    /// creation and end, and periodically by the server so a restart
    /// loses at most the window since the last save.
    pub fn persist_snapshot(&self) -> Result<(), StoreError> {
        let now_ms = self.clock.now_ms();
        self.store.save_snapshot(&PersistedMatch {
            version: SNAPSHOT_VERSION,
            started_at_ms: self.control.start_ms(),
            ends_at_ms: self.control.end_ms(),
            saved_at_ms: now_ms,
            saved_at_iso: String::new(),
            tiles: self.grid.owned_tiles(),
            players: self.registry.all(now_ms),
            chat: self.chat.tail(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::constants::{MAX_ACTIONS, REFILL_INTERVAL_MS};
    use crate::store::MemoryStore;

    fn engine_at(start_ms: u64, duration_ms: u64) -> (Arc<ManualClock>, Arc<MemoryStore>, GameEngine) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let store = Arc::new(MemoryStore::new());
        let engine = GameEngine::new(
            clock.clone(),
            store.clone(),
            GameEngineOptions {
                start_ms_override: Some(start_ms),
                duration_ms_override: Some(duration_ms),
            },
        )
        .expect("engine builds");
        (clock, store, engine)
    }

    #[test]
    fn alice_and_bob_play_out_the_basic_scenario() {
        let (clock, _, engine) = engine_at(1_000, MATCH_DURATION_MS);

        let alice = engine.join("alice", Team::Blue).unwrap();
        assert_eq!(alice.actions_remaining, MAX_ACTIONS);

        clock.advance(10);
        let claimed = engine.claim_tile("alice", 3, 3).unwrap();
        assert_eq!(claimed.scores, TeamScores { blue: 1, pink: 0 });
        assert_eq!(claimed.actions_remaining, MAX_ACTIONS - 1);

        // Re-claiming her own team's tile is rejected and costs nothing.
        clock.advance(10);
        assert!(matches!(
            engine.claim_tile("alice", 3, 3),
            Err(ClaimError::AlreadyOwnedBySameTeam)
        ));

        let bob = engine.join("bob", Team::Pink).unwrap();
        assert_eq!(bob.actions_remaining, MAX_ACTIONS);
        clock.advance(10);
        let flipped = engine.claim_tile("bob", 3, 3).unwrap();
        assert_eq!(flipped.scores, TeamScores { blue: 0, pink: 1 });
        assert_eq!(flipped.tile.owner, Some(Team::Pink));
    }

    #[test]
    fn sixth_claim_waits_for_the_refill_interval() {
        let (clock, _, engine) = engine_at(0, MATCH_DURATION_MS);
        engine.join("alice", Team::Blue).unwrap();

        for x in 0..MAX_ACTIONS {
            engine.claim_tile("alice", x, 0).unwrap();
        }
        assert!(matches!(
            engine.claim_tile("alice", 50, 50),
            Err(ClaimError::NoActionsRemaining)
        ));

        clock.advance(REFILL_INTERVAL_MS);
        let result = engine.claim_tile("alice", 50, 50).unwrap();
        assert_eq!(result.scores.blue, (MAX_ACTIONS + 1) as u32);
    }

    #[test]
    fn claims_after_the_end_fail_and_the_final_score_freezes() {
        let (clock, _, engine) = engine_at(0, 10_000);
        engine.join("alice", Team::Blue).unwrap();
        clock.advance(100);
        engine.claim_tile("alice", 1, 1).unwrap();

        clock.set(10_000);
        assert!(matches!(
            engine.claim_tile("alice", 2, 2),
            Err(ClaimError::MatchNotActive)
        ));

        let (scores, winner) = engine.poll_end().expect("first poll finalizes");
        assert_eq!(scores, TeamScores { blue: 1, pink: 0 });
        assert_eq!(winner, Some(Team::Blue));
        assert_eq!(engine.poll_end(), None);
        assert_eq!(engine.final_score(), Some(scores));
    }

    #[test]
    fn join_is_idempotent_and_conflicts_across_teams() {
        let (_, _, engine) = engine_at(0, MATCH_DURATION_MS);
        engine.join("alice", Team::Blue).unwrap();
        assert!(engine.join("Alice", Team::Blue).is_ok());
        assert!(matches!(
            engine.join("alice", Team::Pink),
            Err(RegisterError::DuplicateNameConflict(_))
        ));
        assert_eq!(engine.player_count(), 1);
    }

    #[test]
    fn chat_messages_are_persisted_and_broadcast() {
        let (_, _, engine) = engine_at(0, MATCH_DURATION_MS);
        engine.join("alice", Team::Blue).unwrap();
        let mut rx = engine.subscribe();

        let message = engine.send_chat("alice", "  go blue!  ").unwrap();
        assert_eq!(message.text, "go blue!");
        assert_eq!(message.seq, 1);

        match rx.try_recv().unwrap() {
            GameEvent::ChatPosted { message: event } => assert_eq!(event.seq, 1),
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(matches!(
            engine.send_chat("ghost", "hi"),
            Err(ChatError::UnknownPlayer(_))
        ));
    }

    #[test]
    fn snapshot_reflects_the_current_state() {
        let (clock, _, engine) = engine_at(1_000, 100_000);
        engine.join("alice", Team::Blue).unwrap();
        clock.advance(500);
        engine.claim_tile("alice", 4, 7).unwrap();
        engine.send_chat("alice", "first").unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, MatchPhase::Active);
        assert_eq!(snapshot.time_left_ms, 99_500);
        assert_eq!(snapshot.scores.blue, 1);
        assert_eq!(snapshot.tiles.len(), 1);
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.chat.len(), 1);
    }

    #[test]
    fn engine_resumes_from_a_persisted_match() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new());
        {
            let engine = GameEngine::new(
                clock.clone(),
                store.clone(),
                GameEngineOptions {
                    start_ms_override: Some(0),
                    duration_ms_override: Some(MATCH_DURATION_MS),
                },
            )
            .unwrap();
            engine.join("alice", Team::Blue).unwrap();
            clock.advance(100);
            engine.claim_tile("alice", 3, 3).unwrap();
            engine.send_chat("alice", "hold the line").unwrap();
            engine.persist_snapshot().unwrap();
        }

        clock.advance(1_000);
        let revived = GameEngine::new(clock.clone(), store, GameEngineOptions::default()).unwrap();
        assert_eq!(revived.scores(), TeamScores { blue: 1, pink: 0 });
        assert_eq!(revived.player_count(), 1);
        let snapshot = revived.snapshot();
        assert_eq!(snapshot.tiles.len(), 1);
        assert_eq!(snapshot.chat.len(), 1);
        assert_eq!(snapshot.started_at_ms, 0);

        // The restored player can keep claiming with their saved budget.
        let result = revived.claim_tile("alice", 4, 4).unwrap();
        assert_eq!(result.actions_remaining, MAX_ACTIONS - 2);
    }

    #[test]
    fn resume_folds_journaled_claims_without_an_explicit_save() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new());
        {
            let engine = GameEngine::new(
                clock.clone(),
                store.clone(),
                GameEngineOptions {
                    start_ms_override: Some(0),
                    duration_ms_override: Some(MATCH_DURATION_MS),
                },
            )
            .unwrap();
            engine.join("alice", Team::Blue).unwrap();
            clock.advance(100);
            // Journaled by the claim itself; no snapshot save afterwards.
            engine.claim_tile("alice", 9, 9).unwrap();
        }

        let revived = GameEngine::new(clock, store, GameEngineOptions::default()).unwrap();
        assert_eq!(revived.scores(), TeamScores { blue: 1, pink: 0 });
        let tile = revived.snapshot().tiles.remove(0);
        assert_eq!(tile.owner, Some(Team::Blue));
        assert_eq!(tile.claimed_by.as_deref(), Some("alice"));
    }
}
