//! Per-user conversation memory and personalization.
//!
//! Each user owns one sessions document (`<sessions_dir>/<user_id>.json`, holding every
//! session keyed by id) and one personalization document
//! (`<personalization_dir>/<user_id>.json`). Histories are trimmed to the configured
//! bounds on every write. A document that cannot be parsed reads as empty.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use salesdesk_core::config::SessionConfig;
use salesdesk_core::execution::StepStatus;

pub const DEFAULT_MAX_HISTORY: usize = 10;
pub const DEFAULT_MAX_TRACES: usize = 5;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("invalid store key `{0}`")]
    InvalidKey(String),
    #[error("session store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_history: usize,
    pub max_traces: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self { max_history: DEFAULT_MAX_HISTORY, max_traces: DEFAULT_MAX_TRACES }
    }
}

impl From<&SessionConfig> for SessionLimits {
    fn from(config: &SessionConfig) -> Self {
        Self { max_history: config.max_history, max_traces: config.max_traces }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub user: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub response: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub action: String,
    pub status: StepStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub intent: String,
    #[serde(default)]
    pub steps: Vec<StepSummary>,
}

/// One completed request, appended after the reply is produced.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionTurn {
    pub message: String,
    pub intent: String,
    pub response: String,
    pub steps: Vec<StepSummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_intent: Option<String>,
    #[serde(default)]
    pub message_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub trace_history: Vec<TraceEntry>,
    /// Free-form keys written through `save_session_context`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionRecord {
    pub fn is_empty(&self) -> bool {
        self.last_message.is_none()
            && self.last_intent.is_none()
            && self.message_history.is_empty()
            && self.trace_history.is_empty()
            && self.extra.is_empty()
    }

    pub fn apply_turn(&mut self, turn: SessionTurn, limits: SessionLimits) {
        self.last_message = Some(turn.message.clone());
        self.last_intent = Some(turn.intent.clone());
        self.message_history.push(HistoryEntry {
            user: turn.message,
            intent: turn.intent.clone(),
            response: turn.response,
        });
        self.trace_history.push(TraceEntry { intent: turn.intent, steps: turn.steps });
        self.bound(limits);
    }

    /// Keeps only the most recent entries of each history.
    pub fn bound(&mut self, limits: SessionLimits) {
        keep_last(&mut self.message_history, limits.max_history);
        keep_last(&mut self.trace_history, limits.max_traces);
    }
}

fn keep_last<T>(entries: &mut Vec<T>, limit: usize) {
    if entries.len() > limit {
        entries.drain(..entries.len() - limit);
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserMemory {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    sessions: BTreeMap<String, SessionRecord>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Missing users and sessions read as an empty record.
    async fn get(&self, user_id: &str, session_id: &str)
        -> Result<SessionRecord, SessionStoreError>;

    /// Replaces the record after bounding its histories.
    async fn put(
        &self,
        user_id: &str,
        session_id: &str,
        record: SessionRecord,
    ) -> Result<SessionRecord, SessionStoreError>;

    async fn append(
        &self,
        user_id: &str,
        session_id: &str,
        turn: SessionTurn,
    ) -> Result<SessionRecord, SessionStoreError>;

    /// Returns whether the session existed.
    async fn clear_session(&self, user_id: &str, session_id: &str)
        -> Result<bool, SessionStoreError>;

    /// Drops every session and the personalization of a user.
    async fn clear_user(&self, user_id: &str) -> Result<bool, SessionStoreError>;

    async fn personalization(&self, user_id: &str) -> Result<Map<String, Value>, SessionStoreError>;

    /// Shallow merge: keys in `updates` overwrite stored keys.
    async fn merge_personalization(
        &self,
        user_id: &str,
        updates: Map<String, Value>,
    ) -> Result<Map<String, Value>, SessionStoreError>;
}

fn validate_key(key: &str) -> Result<(), SessionStoreError> {
    let acceptable = !key.is_empty()
        && !key.starts_with('.')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'));
    if acceptable {
        Ok(())
    } else {
        Err(SessionStoreError::InvalidKey(key.to_string()))
    }
}

/// JSON documents on disk. Writes go through one mutex per store instance, which
/// gives read-your-writes per user key within a process.
pub struct FileSessionStore {
    sessions_dir: PathBuf,
    personalization_dir: PathBuf,
    limits: SessionLimits,
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(
        sessions_dir: impl Into<PathBuf>,
        personalization_dir: impl Into<PathBuf>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            personalization_dir: personalization_dir.into(),
            limits,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.sessions_dir, &config.personalization_dir, SessionLimits::from(config))
    }

    fn sessions_path(&self, user_id: &str) -> Result<PathBuf, SessionStoreError> {
        validate_key(user_id)?;
        Ok(self.sessions_dir.join(format!("{user_id}.json")))
    }

    fn personalization_path(&self, user_id: &str) -> Result<PathBuf, SessionStoreError> {
        validate_key(user_id)?;
        Ok(self.personalization_dir.join(format!("{user_id}.json")))
    }

    async fn load_memory(&self, user_id: &str) -> Result<UserMemory, SessionStoreError> {
        let path = self.sessions_path(user_id)?;
        Ok(read_document::<UserMemory>(&path).await?.unwrap_or_default())
    }

    async fn store_memory(&self, user_id: &str, mut memory: UserMemory) -> Result<(), SessionStoreError> {
        let path = self.sessions_path(user_id)?;
        memory.user_id = user_id.to_string();
        write_document(&path, &memory).await
    }

    async fn load_personalization(&self, user_id: &str) -> Result<Map<String, Value>, SessionStoreError> {
        let path = self.personalization_path(user_id)?;
        Ok(read_document::<Map<String, Value>>(&path).await?.unwrap_or_default())
    }
}

async fn read_document<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, SessionStoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(SessionStoreError::Io { path: path.to_path_buf(), source }),
    };

    match serde_json::from_slice(&bytes) {
        Ok(document) => Ok(Some(document)),
        Err(error) => {
            tracing::warn!(
                event_name = "system.session.corrupt_document",
                path = %path.display(),
                error = %error,
                "unreadable session document treated as empty"
            );
            Ok(None)
        }
    }
}

async fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<(), SessionStoreError> {
    let io_err = |source| SessionStoreError::Io { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let body = serde_json::to_vec_pretty(document)?;
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, body).await.map_err(io_err)?;
    tokio::fs::rename(&staging, path).await.map_err(io_err)
}

async fn remove_document(path: &Path) -> Result<bool, SessionStoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(SessionStoreError::Io { path: path.to_path_buf(), source }),
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<SessionRecord, SessionStoreError> {
        let memory = self.load_memory(user_id).await?;
        Ok(memory.sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn put(
        &self,
        user_id: &str,
        session_id: &str,
        mut record: SessionRecord,
    ) -> Result<SessionRecord, SessionStoreError> {
        let _guard = self.write_lock.lock().await;
        record.bound(self.limits);
        let mut memory = self.load_memory(user_id).await?;
        memory.sessions.insert(session_id.to_string(), record.clone());
        self.store_memory(user_id, memory).await?;
        Ok(record)
    }

    async fn append(
        &self,
        user_id: &str,
        session_id: &str,
        turn: SessionTurn,
    ) -> Result<SessionRecord, SessionStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut memory = self.load_memory(user_id).await?;
        let record = memory.sessions.entry(session_id.to_string()).or_default();
        record.apply_turn(turn, self.limits);
        let updated = record.clone();
        self.store_memory(user_id, memory).await?;
        Ok(updated)
    }

    async fn clear_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<bool, SessionStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut memory = self.load_memory(user_id).await?;
        if memory.sessions.remove(session_id).is_none() {
            return Ok(false);
        }
        self.store_memory(user_id, memory).await?;
        Ok(true)
    }

    async fn clear_user(&self, user_id: &str) -> Result<bool, SessionStoreError> {
        let _guard = self.write_lock.lock().await;
        let sessions = remove_document(&self.sessions_path(user_id)?).await?;
        let personalization = remove_document(&self.personalization_path(user_id)?).await?;
        Ok(sessions || personalization)
    }

    async fn personalization(&self, user_id: &str) -> Result<Map<String, Value>, SessionStoreError> {
        self.load_personalization(user_id).await
    }

    async fn merge_personalization(
        &self,
        user_id: &str,
        updates: Map<String, Value>,
    ) -> Result<Map<String, Value>, SessionStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut current = self.load_personalization(user_id).await?;
        if updates.is_empty() {
            return Ok(current);
        }
        current.extend(updates);
        write_document(&self.personalization_path(user_id)?, &current).await?;
        Ok(current)
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    limits: SessionLimits,
    sessions: RwLock<HashMap<String, BTreeMap<String, SessionRecord>>>,
    personalization: RwLock<HashMap<String, Map<String, Value>>>,
}

impl InMemorySessionStore {
    pub fn with_limits(limits: SessionLimits) -> Self {
        Self { limits, ..Self::default() }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<SessionRecord, SessionStoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(user_id)
            .and_then(|user| user.get(session_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn put(
        &self,
        user_id: &str,
        session_id: &str,
        mut record: SessionRecord,
    ) -> Result<SessionRecord, SessionStoreError> {
        record.bound(self.limits);
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user_id.to_string())
            .or_default()
            .insert(session_id.to_string(), record.clone());
        Ok(record)
    }

    async fn append(
        &self,
        user_id: &str,
        session_id: &str,
        turn: SessionTurn,
    ) -> Result<SessionRecord, SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .entry(user_id.to_string())
            .or_default()
            .entry(session_id.to_string())
            .or_default();
        record.apply_turn(turn, self.limits);
        Ok(record.clone())
    }

    async fn clear_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<bool, SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(user_id).and_then(|user| user.remove(session_id)).is_some())
    }

    async fn clear_user(&self, user_id: &str) -> Result<bool, SessionStoreError> {
        let sessions = self.sessions.write().await.remove(user_id).is_some();
        let personalization = self.personalization.write().await.remove(user_id).is_some();
        Ok(sessions || personalization)
    }

    async fn personalization(&self, user_id: &str) -> Result<Map<String, Value>, SessionStoreError> {
        Ok(self.personalization.read().await.get(user_id).cloned().unwrap_or_default())
    }

    async fn merge_personalization(
        &self,
        user_id: &str,
        updates: Map<String, Value>,
    ) -> Result<Map<String, Value>, SessionStoreError> {
        let mut personalization = self.personalization.write().await;
        let current = personalization.entry(user_id.to_string()).or_default();
        current.extend(updates);
        Ok(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use salesdesk_core::execution::StepStatus;

    use super::{
        FileSessionStore, InMemorySessionStore, SessionLimits, SessionRecord, SessionStore,
        SessionStoreError, SessionTurn, StepSummary,
    };

    fn turn(index: usize) -> SessionTurn {
        SessionTurn {
            message: format!("message {index}"),
            intent: "check_inventory".to_string(),
            response: format!("reply {index}"),
            steps: vec![StepSummary { action: "check_inventory".to_string(), status: StepStatus::Ok }],
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn file_store(dir: &tempfile::TempDir) -> FileSessionStore {
        FileSessionStore::new(
            dir.path().join("sessions"),
            dir.path().join("personalization"),
            SessionLimits { max_history: 3, max_traces: 2 },
        )
    }

    #[tokio::test]
    async fn append_bounds_history_and_traces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = file_store(&dir);

        for index in 0..5 {
            store.append("user_001", "web", turn(index)).await.expect("append");
        }

        let record = store.get("user_001", "web").await.expect("get");
        assert_eq!(record.last_message.as_deref(), Some("message 4"));
        assert_eq!(record.message_history.len(), 3);
        assert_eq!(record.message_history[0].user, "message 2");
        assert_eq!(record.trace_history.len(), 2);
    }

    #[tokio::test]
    async fn sessions_share_one_user_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = file_store(&dir);
        store.append("user_001", "web", turn(1)).await.expect("append web");
        store.append("user_001", "mobile", turn(2)).await.expect("append mobile");

        let raw = std::fs::read_to_string(dir.path().join("sessions/user_001.json")).expect("read");
        let document: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(document["user_id"], "user_001");
        assert!(document["sessions"]["web"].is_object());
        assert!(document["sessions"]["mobile"].is_object());

        assert!(store.clear_session("user_001", "web").await.expect("clear"));
        assert!(!store.clear_session("user_001", "web").await.expect("clear again"));
        assert!(store.get("user_001", "web").await.expect("get").is_empty());
        assert!(!store.get("user_001", "mobile").await.expect("get").is_empty());
    }

    #[tokio::test]
    async fn corrupt_document_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("sessions")).expect("mkdir");
        std::fs::write(dir.path().join("sessions/user_002.json"), "{not json").expect("write");

        let store = file_store(&dir);
        let record = store.get("user_002", "web").await.expect("get");
        assert_eq!(record, SessionRecord::default());
    }

    #[tokio::test]
    async fn personalization_merges_and_clear_user_removes_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = file_store(&dir);

        store
            .merge_personalization("user_003", object(json!({"gender": "female", "preferred_size": "M"})))
            .await
            .expect("merge");
        let merged = store
            .merge_personalization("user_003", object(json!({"preferred_size": "L"})))
            .await
            .expect("merge");
        assert_eq!(merged["gender"], "female");
        assert_eq!(merged["preferred_size"], "L");

        store.append("user_003", "web", turn(0)).await.expect("append");
        assert!(store.clear_user("user_003").await.expect("clear user"));
        assert!(store.personalization("user_003").await.expect("read").is_empty());
        assert!(!store.clear_user("user_003").await.expect("clear again"));
    }

    #[tokio::test]
    async fn path_like_user_ids_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = file_store(&dir);
        let result = store.get("../etc/passwd", "web").await;
        assert!(matches!(result, Err(SessionStoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn put_keeps_free_form_keys() {
        let store = InMemorySessionStore::with_limits(SessionLimits { max_history: 1, max_traces: 1 });
        let record: SessionRecord = serde_json::from_value(json!({
            "last_intent": "browse",
            "budget": "500-1000",
            "message_history": [{"user": "a"}, {"user": "b"}]
        }))
        .expect("record");

        let stored = store.put("user_004", "web", record).await.expect("put");
        assert_eq!(stored.message_history.len(), 1);
        assert_eq!(stored.extra["budget"], "500-1000");

        let serialized = serde_json::to_value(&stored).expect("serialize");
        assert_eq!(serialized["budget"], "500-1000");
        assert_eq!(serialized["last_intent"], "browse");
    }
}
