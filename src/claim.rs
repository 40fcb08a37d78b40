use std::sync::Arc;

use crate::events::EventBroadcaster;
use crate::grid::{GridStore, OutOfBounds};
use crate::match_control::MatchController;
use crate::players::PlayerRegistry;
use crate::store::{ClaimRecord, MatchStore};
use crate::types::{ClaimError, ClaimSuccess, GameEvent};

/// Serializes claim attempts per player and per tile and applies the
/// claim gates in order: bounds, match phase, rate limit, ownership.
///
/// Locks are always acquired player-first, tile-second. A same-team
/// re-claim is rejected with `AlreadyOwnedBySameTeam` and does not consume
/// an action, which also makes a retried, already-applied claim a no-op
/// instead of a double spend. The action budget only moves after the
/// store has confirmed the claim, so a persistence failure leaves every
/// piece of in-memory state untouched.
pub struct ClaimCoordinator {
    registry: Arc<PlayerRegistry>,
    grid: Arc<GridStore>,
    control: Arc<MatchController>,
    events: EventBroadcaster,
    store: Arc<dyn MatchStore>,
}

impl ClaimCoordinator {
    pub fn new(
        registry: Arc<PlayerRegistry>,
        grid: Arc<GridStore>,
        control: Arc<MatchController>,
        events: EventBroadcaster,
        store: Arc<dyn MatchStore>,
    ) -> Self {
        Self {
            registry,
            grid,
            control,
            events,
            store,
        }
    }

    pub fn claim(
        &self,
        player_id: &str,
        x: i32,
        y: i32,
        at_ms: u64,
    ) -> Result<ClaimSuccess, ClaimError> {
        if !GridStore::contains(x, y) {
            return Err(OutOfBounds { x, y }.into());
        }
        if !self.control.is_active(at_ms) {
            return Err(ClaimError::MatchNotActive);
        }

        let record = self
            .registry
            .get(player_id)
            .ok_or_else(|| ClaimError::UnknownPlayer(player_id.to_string()))?;
        let mut player = record.lock().expect("player lock poisoned");
        player.last_seen = at_ms;
        player.refill_if_due(at_ms);
        if player.actions_remaining == 0 {
            return Err(ClaimError::NoActionsRemaining);
        }

        let mut tile = self.grid.entry(x, y)?;
        if tile.owner() == Some(player.team) {
            return Err(ClaimError::AlreadyOwnedBySameTeam);
        }

        self.store.apply_claim(&ClaimRecord {
            x,
            y,
            team: player.team,
            player_id: player.id.clone(),
            at_ms,
        })?;

        tile.set_owner(player.team, &player.id, at_ms);
        player.spend(at_ms);
        let view = tile.view();
        // Scores read and the event published while the tile is still
        // held, so same-tile events leave in application order.
        let scores = self.grid.scores();
        self.events.publish(GameEvent::TileClaimed {
            tile: view.clone(),
            scores,
        });

        Ok(ClaimSuccess {
            tile: view,
            scores,
            actions_remaining: player.actions_remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MAX_ACTIONS, REFILL_INTERVAL_MS};
    use crate::store::MemoryStore;
    use crate::types::{Team, TeamScores};

    struct Harness {
        coordinator: ClaimCoordinator,
        registry: Arc<PlayerRegistry>,
        grid: Arc<GridStore>,
        store: Arc<MemoryStore>,
    }

    fn setup(start_ms: u64, duration_ms: u64) -> Harness {
        let registry = Arc::new(PlayerRegistry::new());
        let grid = Arc::new(GridStore::new());
        let control = Arc::new(MatchController::new(start_ms, duration_ms));
        let store = Arc::new(MemoryStore::new());
        let coordinator = ClaimCoordinator::new(
            registry.clone(),
            grid.clone(),
            control,
            EventBroadcaster::default(),
            store.clone(),
        );
        Harness {
            coordinator,
            registry,
            grid,
            store,
        }
    }

    #[test]
    fn successful_claim_spends_one_action_and_scores() {
        let harness = setup(0, 1_000_000);
        harness.registry.register("Alice", Team::Blue, 0).unwrap();

        let result = harness.coordinator.claim("alice", 3, 3, 100).unwrap();
        assert_eq!(result.scores, TeamScores { blue: 1, pink: 0 });
        assert_eq!(result.actions_remaining, MAX_ACTIONS - 1);
        assert_eq!(result.tile.owner, Some(Team::Blue));
        assert_eq!(harness.store.claim_count(), 1);
    }

    #[test]
    fn same_team_reclaim_is_rejected_without_spending() {
        let harness = setup(0, 1_000_000);
        harness.registry.register("Alice", Team::Blue, 0).unwrap();
        harness.coordinator.claim("alice", 3, 3, 100).unwrap();

        let result = harness.coordinator.claim("alice", 3, 3, 200);
        assert!(matches!(result, Err(ClaimError::AlreadyOwnedBySameTeam)));

        let record = harness.registry.get("alice").unwrap();
        assert_eq!(record.lock().unwrap().actions_remaining, MAX_ACTIONS - 1);
        assert_eq!(harness.store.claim_count(), 1);
    }

    #[test]
    fn opposing_team_claim_flips_the_tile() {
        let harness = setup(0, 1_000_000);
        harness.registry.register("Alice", Team::Blue, 0).unwrap();
        harness.registry.register("Bob", Team::Pink, 0).unwrap();
        harness.coordinator.claim("alice", 3, 3, 100).unwrap();

        let result = harness.coordinator.claim("bob", 3, 3, 200).unwrap();
        assert_eq!(result.scores, TeamScores { blue: 0, pink: 1 });
        assert_eq!(result.tile.owner, Some(Team::Pink));
        assert_eq!(result.tile.claimed_by.as_deref(), Some("bob"));
    }

    #[test]
    fn out_of_bounds_fails_before_anything_else() {
        let harness = setup(0, 1_000_000);
        let result = harness.coordinator.claim("nobody", 100, 0, 100);
        assert!(matches!(result, Err(ClaimError::OutOfBounds(_))));
    }

    #[test]
    fn claims_outside_the_match_window_are_rejected() {
        let harness = setup(1_000, 500);
        harness.registry.register("Alice", Team::Blue, 0).unwrap();

        assert!(matches!(
            harness.coordinator.claim("alice", 0, 0, 999),
            Err(ClaimError::MatchNotActive)
        ));
        assert!(matches!(
            harness.coordinator.claim("alice", 0, 0, 1_500),
            Err(ClaimError::MatchNotActive)
        ));
        assert!(harness.coordinator.claim("alice", 0, 0, 1_200).is_ok());
    }

    #[test]
    fn exhausted_budget_refills_after_the_interval() {
        let harness = setup(0, REFILL_INTERVAL_MS * 100);
        harness.registry.register("Alice", Team::Blue, 0).unwrap();

        for index in 0..MAX_ACTIONS {
            harness
                .coordinator
                .claim("alice", index, 0, 100)
                .expect("budget not yet exhausted");
        }
        assert!(matches!(
            harness.coordinator.claim("alice", 50, 50, 200),
            Err(ClaimError::NoActionsRemaining)
        ));

        let later = 100 + REFILL_INTERVAL_MS;
        let result = harness.coordinator.claim("alice", 50, 50, later).unwrap();
        assert_eq!(result.actions_remaining, 0);
        assert_eq!(result.scores.blue, (MAX_ACTIONS + 1) as u32);
    }

    #[test]
    fn persistence_failure_rolls_back_everything() {
        let harness = setup(0, 1_000_000);
        harness.registry.register("Alice", Team::Blue, 0).unwrap();
        harness.store.set_fail_writes(true);

        let result = harness.coordinator.claim("alice", 3, 3, 100);
        assert!(matches!(result, Err(ClaimError::Persistence(_))));

        assert_eq!(harness.grid.get(3, 3).unwrap().owner, None);
        assert_eq!(harness.grid.scores(), TeamScores::default());
        let record = harness.registry.get("alice").unwrap();
        assert_eq!(record.lock().unwrap().actions_remaining, MAX_ACTIONS);
    }

    #[test]
    fn unknown_player_cannot_claim() {
        let harness = setup(0, 1_000_000);
        assert!(matches!(
            harness.coordinator.claim("ghost", 0, 0, 100),
            Err(ClaimError::UnknownPlayer(_))
        ));
    }

    #[test]
    fn concurrent_same_tile_claims_resolve_to_one_winner() {
        let harness = setup(0, 1_000_000);
        harness.registry.register("Alice", Team::Blue, 0).unwrap();
        harness.registry.register("Carol", Team::Blue, 0).unwrap();

        let (wins, rejections) = std::thread::scope(|scope| {
            let handles: Vec<_> = ["alice", "carol"]
                .into_iter()
                .map(|player| {
                    let coordinator = &harness.coordinator;
                    scope.spawn(move || coordinator.claim(player, 7, 7, 100))
                })
                .collect();
            let mut wins = 0;
            let mut rejections = 0;
            for handle in handles {
                match handle.join().expect("claim thread panicked") {
                    Ok(_) => wins += 1,
                    Err(ClaimError::AlreadyOwnedBySameTeam) => rejections += 1,
                    Err(other) => panic!("unexpected failure: {other:?}"),
                }
            }
            (wins, rejections)
        });

        assert_eq!(wins, 1);
        assert_eq!(rejections, 1);
        assert_eq!(harness.grid.scores(), TeamScores { blue: 1, pink: 0 });

        // Exactly one of the two spent an action.
        let spent: i32 = ["alice", "carol"]
            .into_iter()
            .map(|player| {
                let record = harness.registry.get(player).unwrap();
                let remaining = record.lock().unwrap().actions_remaining;
                MAX_ACTIONS - remaining
            })
            .sum();
        assert_eq!(spent, 1);
    }
}
