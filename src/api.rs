//! The command/query surface a host exposes to consumers.

use crate::config::ConfigurationValues;
use crate::errors::{ApiError, ApiResult};
use crate::events::{EventEmitter, EventManager, RooCodeEventName};
use crate::history::HistoryStore;
use crate::message::ClineMessage;
use crate::types::{TaskId, TokenUsage};
use async_trait::async_trait;
use semver::{Comparator, Op, Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Version of the contract this crate describes.
pub const API_VERSION: Version = Version::new(1, 0, 0);

/// What a host exposes (for discovery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiInfo {
    /// Host name, e.g. the extension id.
    pub name: String,

    pub api_version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_version: Option<String>,

    /// Event names the host emits.
    pub events: Vec<RooCodeEventName>,
}

impl ApiInfo {
    /// Describe a host speaking the current contract.
    pub fn current(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_version: API_VERSION,
            host_version: None,
            events: RooCodeEventName::ALL.to_vec(),
        }
    }

    pub fn with_host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = Some(version.into());
        self
    }

    /// Whether this host satisfies `^required`.
    pub fn is_compatible_with(&self, required: &Version) -> bool {
        let req = VersionReq {
            comparators: vec![Comparator {
                op: Op::Caret,
                major: required.major,
                minor: Some(required.minor),
                patch: Some(required.patch),
                pre: required.pre.clone(),
            }],
        };
        req.matches(&self.api_version)
    }

    /// Fail with `VersionMismatch` unless compatible.
    pub fn require(&self, required: &Version) -> ApiResult<()> {
        if self.is_compatible_with(required) {
            return Ok(());
        }
        Err(ApiError::new(
            crate::errors::ErrorCode::VersionMismatch,
            format!(
                "{} speaks contract {}, consumer requires ^{}",
                self.name, self.api_version, required
            ),
        ))
    }
}

/// Host wiring: channel sizes, storage locations, log level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Broadcast channel capacity.
    pub event_capacity: usize,

    /// Events kept for `recent_events`.
    pub max_recent_events: usize,

    /// Directory for task snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,

    /// JSON file for global state. Secrets are never written here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_state_path: Option<PathBuf>,

    /// Default `tracing` filter; `RUST_LOG` wins when set.
    pub log_level: String,

    /// Custom options (host-specific)
    pub options: HashMap<String, serde_json::Value>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            max_recent_events: 100,
            history_dir: None,
            global_state_path: None,
            log_level: "info".to_string(),
            options: HashMap::new(),
        }
    }
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> ApiResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            ApiError::configuration("host_config", format!("cannot read config: {}", e))
                .with_context("path", path.display().to_string())
        })?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ApiResult<()> {
        if self.event_capacity == 0 {
            return Err(ApiError::configuration(
                "event_capacity",
                "event capacity must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn max_recent_events(mut self, max: usize) -> Self {
        self.max_recent_events = max;
        self
    }

    pub fn history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history_dir = Some(dir.into());
        self
    }

    pub fn global_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_state_path = Some(path.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Add a custom option
    pub fn option(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.options.insert(key.into(), v);
        }
        self
    }

    /// Get a custom option
    pub fn get_option<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.options
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn event_manager(&self) -> EventManager {
        EventManager::new(self.event_capacity).with_max_recent(self.max_recent_events)
    }

    pub fn history_store(&self) -> Option<HistoryStore> {
        self.history_dir.clone().map(HistoryStore::new)
    }
}

/// Commands and queries a host accepts.
///
/// Commands are async and reject with an [`ApiError`] instead of panicking.
/// Events are delivered through the [`EventEmitter`] supertrait.
#[async_trait]
pub trait RooCodeApi: EventEmitter + Send + Sync {
    /// Start a new task, optionally seeded with text and `data:` URL images.
    ///
    /// Fails with `NOT_READY` until [`is_ready`](Self::is_ready) is true.
    async fn start_new_task(
        &self,
        task: Option<String>,
        images: Option<Vec<String>>,
    ) -> ApiResult<TaskId>;

    /// Task ids from the root task to the innermost subtask.
    fn get_current_task_stack(&self) -> Vec<TaskId>;

    /// Drop the current task. A subtask hands `last_message` to its parent.
    async fn clear_current_task(&self, last_message: Option<String>) -> ApiResult<()>;

    async fn cancel_current_task(&self) -> ApiResult<()>;

    /// Answer the pending ask with text and/or images.
    async fn send_message(
        &self,
        message: Option<String>,
        images: Option<Vec<String>>,
    ) -> ApiResult<()>;

    async fn press_primary_button(&self) -> ApiResult<()>;

    async fn press_secondary_button(&self) -> ApiResult<()>;

    /// Merge `values` into the configuration. Unspecified keys are untouched.
    async fn set_configuration(&self, values: ConfigurationValues) -> ApiResult<()>;

    fn is_ready(&self) -> bool;

    fn get_messages(&self, task_id: &TaskId) -> ApiResult<Vec<ClineMessage>>;

    fn get_token_usage(&self, task_id: &TaskId) -> ApiResult<TokenUsage>;

    /// Best-effort diagnostic output.
    fn log(&self, message: &str) {
        tracing::info!(target: "roo_code::api", "{}", message);
    }

    fn info(&self) -> ApiInfo {
        ApiInfo::current("roo-code")
    }

    fn current_task_id(&self) -> Option<TaskId> {
        self.get_current_task_stack().last().copied()
    }
}
