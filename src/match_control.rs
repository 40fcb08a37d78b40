use std::sync::OnceLock;

use crate::types::{MatchPhase, Team, TeamScores};

/// Match timing plus the frozen end-of-match result. The phase is always
/// derived from the clock against the fixed window, never stored, so it
/// cannot drift or regress.
pub struct MatchController {
    start_ms: u64,
    end_ms: u64,
    final_score: OnceLock<TeamScores>,
}

impl MatchController {
    pub fn new(start_ms: u64, duration_ms: u64) -> Self {
        Self {
            start_ms,
            end_ms: start_ms.saturating_add(duration_ms),
            final_score: OnceLock::new(),
        }
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> u64 {
        self.end_ms
    }

    pub fn phase(&self, now_ms: u64) -> MatchPhase {
        if now_ms < self.start_ms {
            MatchPhase::Pending
        } else if now_ms < self.end_ms {
            MatchPhase::Active
        } else {
            MatchPhase::Ended
        }
    }

    pub fn is_active(&self, now_ms: u64) -> bool {
        self.phase(now_ms) == MatchPhase::Active
    }

    pub fn time_remaining_ms(&self, now_ms: u64) -> u64 {
        self.end_ms.saturating_sub(now_ms.max(self.start_ms))
    }

    /// Freezes the final score on first call after the match ends; later
    /// calls return the same snapshot regardless of the argument.
    pub fn freeze_final(&self, scores: TeamScores) -> TeamScores {
        *self.final_score.get_or_init(|| scores)
    }

    pub fn final_score(&self) -> Option<TeamScores> {
        self.final_score.get().copied()
    }

    pub fn winner(scores: TeamScores) -> Option<Team> {
        scores.leader()
    }
}
