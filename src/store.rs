use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::{ChatMessageView, PlayerView, Team, TileView};

pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),
    #[error("store rejected the write")]
    WriteRejected,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub x: i32,
    pub y: i32,
    pub team: Team,
    #[serde(rename = "playerId")]
    pub player_id: String,
    #[serde(rename = "atMs")]
    pub at_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedMatch {
    pub version: u8,
    #[serde(rename = "startedAtMs")]
    pub started_at_ms: u64,
    #[serde(rename = "endsAtMs")]
    pub ends_at_ms: u64,
    #[serde(rename = "savedAtMs")]
    pub saved_at_ms: u64,
    #[serde(rename = "savedAtIso", default)]
    pub saved_at_iso: String,
    pub tiles: Vec<TileView>,
    pub players: Vec<PlayerView>,
    pub chat: Vec<ChatMessageView>,
}

/// Storage-agnostic durability interface. Claims and chat messages are
/// journaled as they happen; snapshots capture the whole match state.
/// Every failure surfaces as a `StoreError` so the caller can refuse the
/// operation instead of silently dropping it.
pub trait MatchStore: Send + Sync {
    /// Loads the last snapshot with any later journal entries folded in,
    /// or `None` when this store has never seen a match.
    fn load_snapshot(&self) -> Result<Option<PersistedMatch>, StoreError>;
    fn apply_claim(&self, claim: &ClaimRecord) -> Result<(), StoreError>;
    fn append_chat(&self, message: &ChatMessageView) -> Result<(), StoreError>;
    fn save_snapshot(&self, snapshot: &PersistedMatch) -> Result<(), StoreError>;
}

fn fold_journal(
    mut snapshot: PersistedMatch,
    claims: &[ClaimRecord],
    chat: &[ChatMessageView],
) -> PersistedMatch {
    let mut tiles: BTreeMap<(i32, i32), TileView> = snapshot
        .tiles
        .into_iter()
        .map(|tile| ((tile.y, tile.x), tile))
        .collect();
    for claim in claims {
        tiles.insert(
            (claim.y, claim.x),
            TileView {
                x: claim.x,
                y: claim.y,
                owner: Some(claim.team),
                claimed_by: Some(claim.player_id.clone()),
                claimed_at: Some(claim.at_ms),
            },
        );
    }
    snapshot.tiles = tiles.into_values().collect();

    let max_seq = snapshot
        .chat
        .iter()
        .map(|message| message.seq)
        .max()
        .unwrap_or(0);
    snapshot
        .chat
        .extend(chat.iter().filter(|message| message.seq > max_seq).cloned());
    snapshot
}

/// JSON snapshot plus JSONL journals under one data directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("match.json")
    }

    fn claims_path(&self) -> PathBuf {
        self.dir.join("claims.jsonl")
    }

    fn chat_path(&self) -> PathBuf {
        self.dir.join("chat.jsonl")
    }

    fn append_line<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

fn read_journal<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };

    let mut out = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => out.push(record),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    %error,
                    "skipping malformed journal line"
                );
            }
        }
    }
    Ok(out)
}

impl MatchStore for JsonFileStore {
    fn load_snapshot(&self) -> Result<Option<PersistedMatch>, StoreError> {
        let text = match fs::read_to_string(self.snapshot_path()) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let snapshot: PersistedMatch = serde_json::from_str(&text)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion(snapshot.version));
        }

        let claims: Vec<ClaimRecord> = read_journal(&self.claims_path())?;
        let chat: Vec<ChatMessageView> = read_journal(&self.chat_path())?;
        Ok(Some(fold_journal(snapshot, &claims, &chat)))
    }

    fn apply_claim(&self, claim: &ClaimRecord) -> Result<(), StoreError> {
        self.append_line(&self.claims_path(), claim)
    }

    fn append_chat(&self, message: &ChatMessageView) -> Result<(), StoreError> {
        self.append_line(&self.chat_path(), message)
    }

    fn save_snapshot(&self, snapshot: &PersistedMatch) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let mut payload = snapshot.clone();
        payload.saved_at_iso = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let text = serde_json::to_string_pretty(&payload)?;
        fs::write(self.snapshot_path(), text)?;
        Ok(())
    }
}

/// In-memory store for tests and headless simulation. `set_fail_writes`
/// makes every journal append fail, for exercising rollback paths.
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<PersistedMatch>>,
    claims: Mutex<Vec<ClaimRecord>>,
    chat: Mutex<Vec<ChatMessageView>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn claim_count(&self) -> usize {
        self.claims.lock().expect("claims lock poisoned").len()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected);
        }
        Ok(())
    }
}

impl MatchStore for MemoryStore {
    fn load_snapshot(&self) -> Result<Option<PersistedMatch>, StoreError> {
        let snapshot = self.snapshot.lock().expect("snapshot lock poisoned");
        let Some(snapshot) = snapshot.clone() else {
            return Ok(None);
        };
        let claims = self.claims.lock().expect("claims lock poisoned");
        let chat = self.chat.lock().expect("chat lock poisoned");
        Ok(Some(fold_journal(snapshot, &claims, &chat)))
    }

    fn apply_claim(&self, claim: &ClaimRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.claims
            .lock()
            .expect("claims lock poisoned")
            .push(claim.clone());
        Ok(())
    }

    fn append_chat(&self, message: &ChatMessageView) -> Result<(), StoreError> {
        self.check_writable()?;
        self.chat
            .lock()
            .expect("chat lock poisoned")
            .push(message.clone());
        Ok(())
    }

    fn save_snapshot(&self, snapshot: &PersistedMatch) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.snapshot.lock().expect("snapshot lock poisoned") = Some(snapshot.clone());
        Ok(())
    }
}
