use serde::{Deserialize, Serialize};

use crate::grid::OutOfBounds;
use crate::store::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Blue,
    Pink,
}

impl Team {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "blue" => Some(Self::Blue),
            "pink" => Some(Self::Pink),
            _ => None,
        }
    }

    pub fn opponent(self) -> Self {
        match self {
            Self::Blue => Self::Pink,
            Self::Pink => Self::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::Pink => "pink",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Pending,
    Active,
    Ended,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamScores {
    pub blue: u32,
    pub pink: u32,
}

impl TeamScores {
    pub fn get(&self, team: Team) -> u32 {
        match team {
            Team::Blue => self.blue,
            Team::Pink => self.pink,
        }
    }

    pub fn leader(&self) -> Option<Team> {
        match self.blue.cmp(&self.pink) {
            std::cmp::Ordering::Greater => Some(Team::Blue),
            std::cmp::Ordering::Less => Some(Team::Pink),
            std::cmp::Ordering::Equal => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileView {
    pub x: i32,
    pub y: i32,
    pub owner: Option<Team>,
    #[serde(rename = "claimedBy")]
    pub claimed_by: Option<String>,
    #[serde(rename = "claimedAt")]
    pub claimed_at: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    pub team: Team,
    #[serde(rename = "actionsRemaining")]
    pub actions_remaining: i32,
    #[serde(rename = "lastActionTime")]
    pub last_action_time: u64,
    #[serde(rename = "lastSeen")]
    pub last_seen: u64,
    #[serde(rename = "nextRefillInMs", default)]
    pub next_refill_in_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessageView {
    pub seq: u64,
    #[serde(rename = "playerId")]
    pub player_id: String,
    pub name: String,
    pub team: Team,
    pub text: String,
    #[serde(rename = "atMs")]
    pub at_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClaimSuccess {
    pub tile: TileView,
    pub scores: TeamScores,
    #[serde(rename = "actionsRemaining")]
    pub actions_remaining: i32,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    TileClaimed {
        tile: TileView,
        scores: TeamScores,
    },
    PlayerJoined {
        player: PlayerView,
    },
    ChatPosted {
        message: ChatMessageView,
    },
    MatchEnded {
        scores: TeamScores,
        winner: Option<Team>,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct SnapshotView {
    pub phase: MatchPhase,
    #[serde(rename = "nowMs")]
    pub now_ms: u64,
    #[serde(rename = "startedAtMs")]
    pub started_at_ms: u64,
    #[serde(rename = "endsAtMs")]
    pub ends_at_ms: u64,
    #[serde(rename = "timeLeftMs")]
    pub time_left_ms: u64,
    pub scores: TeamScores,
    pub tiles: Vec<TileView>,
    pub players: Vec<PlayerView>,
    pub chat: Vec<ChatMessageView>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error(transparent)]
    OutOfBounds(#[from] OutOfBounds),
    #[error("match is not active")]
    MatchNotActive,
    #[error("no actions remaining")]
    NoActionsRemaining,
    #[error("tile is already owned by your team")]
    AlreadyOwnedBySameTeam,
    #[error("player '{0}' is not registered")]
    UnknownPlayer(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl ClaimError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfBounds(_) => "out_of_bounds",
            Self::MatchNotActive => "match_not_active",
            Self::NoActionsRemaining => "no_actions_remaining",
            Self::AlreadyOwnedBySameTeam => "already_owned_by_same_team",
            Self::UnknownPlayer(_) => "unknown_player",
            Self::Persistence(_) => "persistence_error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("name '{0}' is already registered on the other team")]
    DuplicateNameConflict(String),
    #[error("display name must not be empty")]
    InvalidName,
}

impl RegisterError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateNameConflict(_) => "duplicate_name_conflict",
            Self::InvalidName => "invalid_name",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("message exceeds {0} characters")]
    MessageTooLong(usize),
    #[error("player '{0}' is not registered")]
    UnknownPlayer(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "empty_message",
            Self::MessageTooLong(_) => "message_too_long",
            Self::UnknownPlayer(_) => "unknown_player",
            Self::Persistence(_) => "persistence_error",
        }
    }
}
