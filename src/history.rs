//! Task history and portable snapshots.
//!
//! A [`HistoryItem`] is the one-line summary a host keeps per task. A
//! [`TaskSnapshot`] bundles that summary with the full message log so a task
//! can be exported and imported elsewhere. The log travels base64-encoded
//! with a BLAKE3 checksum over the raw bytes.

use crate::api::API_VERSION;
use crate::errors::{ApiError, ApiResult, ErrorCode};
use crate::message::ClineMessage;
use crate::tasks::TaskRecord;
use crate::types::{TaskId, Timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Summary of one task, as shown in a task history list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: TaskId,
    pub number: u64,
    pub ts: Timestamp,
    pub task: String,
    pub tokens_in: u64,
    pub tokens_out: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_writes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_reads: Option<u64>,

    pub total_cost: f64,

    /// Size of the serialized message log in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

impl HistoryItem {
    /// Summarize a task. `ts` is the time of the last message, or the
    /// task's creation time when it has none.
    pub fn from_task(record: &TaskRecord) -> Self {
        let usage = record.usage();
        let ts = record
            .messages()
            .last()
            .map(|m| m.ts)
            .unwrap_or_else(|| Timestamp::from_datetime(record.created_at));

        Self {
            id: record.id,
            number: record.number,
            ts,
            task: record.task_text().unwrap_or_default().to_string(),
            tokens_in: usage.total_tokens_in,
            tokens_out: usage.total_tokens_out,
            cache_writes: usage.total_cache_writes,
            cache_reads: usage.total_cache_reads,
            total_cost: usage.total_cost,
            size: None,
            workspace: None,
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }
}

/// Exportable task (for backup/transfer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Contract version of the exporting host.
    pub api_version: semver::Version,

    pub history: HistoryItem,

    /// Serialized message log (JSON array of `ClineMessage`).
    #[serde(with = "base64_serde")]
    pub data: Vec<u8>,

    /// BLAKE3 of `data`.
    #[serde(with = "hex_serde")]
    pub checksum: [u8; 32],

    pub exported_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn new(history: HistoryItem, messages: &[ClineMessage]) -> ApiResult<Self> {
        let data = serde_json::to_vec(messages)?;
        let checksum = *blake3::hash(&data).as_bytes();
        let mut history = history;
        history.size = Some(data.len() as u64);

        Ok(Self {
            api_version: API_VERSION,
            history,
            data,
            checksum,
            exported_at: Utc::now(),
        })
    }

    /// Snapshot a live task.
    pub fn from_task(record: &TaskRecord) -> ApiResult<Self> {
        Self::new(HistoryItem::from_task(record), record.messages())
    }

    pub fn task_id(&self) -> TaskId {
        self.history.id
    }

    /// Verify the checksum
    pub fn verify(&self) -> bool {
        blake3::hash(&self.data).as_bytes() == &self.checksum
    }

    /// Decode the message log after checking integrity and version.
    pub fn messages(&self) -> ApiResult<Vec<ClineMessage>> {
        if !self.verify() {
            return Err(ApiError::checksum_mismatch(format!(
                "snapshot of task {} failed checksum verification",
                self.task_id()
            ))
            .with_context("checksum", hex::encode(self.checksum)));
        }
        if self.api_version.major != API_VERSION.major {
            return Err(ApiError::new(
                ErrorCode::VersionMismatch,
                format!(
                    "snapshot was exported by contract {}, this host speaks {}",
                    self.api_version, API_VERSION
                ),
            ));
        }
        Ok(serde_json::from_slice(&self.data)?)
    }
}

/// Directory of `<taskId>.json` snapshot files.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, task_id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    pub fn save(&self, snapshot: &TaskSnapshot) -> ApiResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&snapshot.task_id());
        std::fs::write(&path, serde_json::to_vec_pretty(snapshot)?)?;
        tracing::debug!(task_id = %snapshot.task_id(), path = %path.display(), "saved task snapshot");
        Ok(path)
    }

    pub fn load(&self, task_id: &TaskId) -> ApiResult<TaskSnapshot> {
        let path = self.path_for(task_id);
        let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ApiError::task_not_found(task_id),
            _ => ApiError::from(e),
        })?;
        let snapshot: TaskSnapshot = serde_json::from_slice(&bytes)?;
        if !snapshot.verify() {
            return Err(ApiError::checksum_mismatch(format!(
                "snapshot file {} is corrupted",
                path.display()
            )));
        }
        Ok(snapshot)
    }

    /// History items of every readable snapshot, newest first.
    ///
    /// Unreadable files are skipped with a warning.
    pub fn list(&self) -> ApiResult<Vec<HistoryItem>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(ApiError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<TaskSnapshot>(&bytes)?));
            match parsed {
                Ok(snapshot) => items.push(snapshot.history),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable snapshot")
                }
            }
        }

        items.sort_by(|a, b| b.ts.cmp(&a.ts));
        Ok(items)
    }

    pub fn delete(&self, task_id: &TaskId) -> ApiResult<()> {
        match std::fs::remove_file(self.path_for(task_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ApiError::task_not_found(task_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// Base64 serialization for binary data
mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

// Hex serialization for checksums
mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid checksum length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventManager;
    use crate::message::ClineSay;
    use crate::tasks::TaskRegistry;
    use crate::types::TokenUsage;
    use std::sync::Arc;

    fn sample_task() -> (TaskRegistry, TaskId) {
        let mut registry = TaskRegistry::new(Arc::new(EventManager::default()));
        let id = registry.start_task(Some("refactor auth".into()), None).unwrap();
        registry
            .append(id, ClineMessage::say(ClineSay::Text).with_text("on it"))
            .unwrap();
        registry
            .update_token_usage(id, TokenUsage::new(120, 30, 0.05).with_cache(4, 8))
            .unwrap();
        (registry, id)
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("roo-history-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_history_item_from_task() {
        let (registry, id) = sample_task();
        let item = HistoryItem::from_task(registry.task(&id).unwrap());

        assert_eq!(item.task, "refactor auth");
        assert_eq!(item.number, 1);
        assert_eq!(item.tokens_in, 120);
        assert_eq!(item.cache_reads, Some(8));

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["totalCost"], 0.05);
        assert!(json.get("workspace").is_none());
    }

    #[test]
    fn test_snapshot_verify_and_decode() {
        let (registry, id) = sample_task();
        let snapshot = TaskSnapshot::from_task(registry.task(&id).unwrap()).unwrap();

        assert!(snapshot.verify());
        assert_eq!(snapshot.history.size, Some(snapshot.data.len() as u64));
        assert_eq!(snapshot.messages().unwrap(), registry.messages(&id).unwrap());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["checksum"].as_str().unwrap().len(), 64);
        assert_eq!(json["apiVersion"], API_VERSION.to_string());
    }

    #[test]
    fn test_tampered_snapshot_is_rejected() {
        let (registry, id) = sample_task();
        let mut snapshot = TaskSnapshot::from_task(registry.task(&id).unwrap()).unwrap();
        snapshot.data[0] ^= 0xff;

        assert!(!snapshot.verify());
        let err = snapshot.messages().unwrap_err();
        assert_eq!(err.code, ErrorCode::ChecksumMismatch);
    }

    #[test]
    fn test_major_version_mismatch() {
        let (registry, id) = sample_task();
        let mut snapshot = TaskSnapshot::from_task(registry.task(&id).unwrap()).unwrap();
        snapshot.api_version = semver::Version::new(API_VERSION.major + 1, 0, 0);

        let err = snapshot.messages().unwrap_err();
        assert_eq!(err.code, ErrorCode::VersionMismatch);
    }

    #[test]
    fn test_store_save_load_list() {
        let (registry, id) = sample_task();
        let store = HistoryStore::new(scratch_dir());
        assert!(store.list().unwrap().is_empty());

        let snapshot = TaskSnapshot::from_task(registry.task(&id).unwrap()).unwrap();
        store.save(&snapshot).unwrap();
        std::fs::write(store.dir().join("junk.json"), "{").unwrap();

        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded.checksum, snapshot.checksum);

        let items = store.list().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);

        store.delete(&id).unwrap();
        let err = store.load(&id).unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);

        let _ = std::fs::remove_dir_all(store.dir());
    }
}
