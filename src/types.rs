//! Shared types used across the contract.

use crate::errors::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Generic metadata map.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Stable identifier of a task.
///
/// Serialized as the bare hyphenated UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for TaskId {
    type Err = ApiError;

    fn from_str(s: &str) -> ApiResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ApiError::invalid_input(format!("invalid task id {:?}: {}", s, e)))
    }
}

/// Milliseconds since the Unix epoch.
///
/// A message's timestamp doubles as its identity within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// The next representable timestamp.
    pub fn succ(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl From<i64> for Timestamp {
    fn from(ms: i64) -> Self {
        Self(ms)
    }
}

/// Cumulative token accounting for a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub total_tokens_in: u64,

    pub total_tokens_out: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cache_writes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cache_reads: Option<u64>,

    /// Cumulative cost; never decreases within a task.
    pub total_cost: f64,

    /// Size of the current context window.
    pub context_tokens: u64,
}

impl TokenUsage {
    pub fn new(total_tokens_in: u64, total_tokens_out: u64, total_cost: f64) -> Self {
        Self {
            total_tokens_in,
            total_tokens_out,
            total_cost,
            ..Default::default()
        }
    }

    pub fn with_cache(mut self, writes: u64, reads: u64) -> Self {
        self.total_cache_writes = Some(writes);
        self.total_cache_reads = Some(reads);
        self
    }

    pub fn with_context_tokens(mut self, context_tokens: u64) -> Self {
        self.context_tokens = context_tokens;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens_in == 0
            && self.total_tokens_out == 0
            && self.total_cache_writes.unwrap_or(0) == 0
            && self.total_cache_reads.unwrap_or(0) == 0
            && self.total_cost == 0.0
    }

    /// Cost must be a finite, non-negative number.
    pub fn validate(&self) -> ApiResult<()> {
        if !self.total_cost.is_finite() || self.total_cost < 0.0 {
            return Err(ApiError::invalid_input(format!(
                "totalCost must be a non-negative number, got {}",
                self.total_cost
            ))
            .with_context("field", "totalCost"));
        }
        Ok(())
    }

    /// Whether `self` can follow `previous` for the same task.
    ///
    /// Cumulative totals may only grow. `contextTokens` is a gauge, not a
    /// total, and may shrink when the conversation is truncated.
    pub fn is_successor_of(&self, previous: &TokenUsage) -> bool {
        self.total_cost >= previous.total_cost
            && self.total_tokens_in >= previous.total_tokens_in
            && self.total_tokens_out >= previous.total_tokens_out
            && self.total_cache_writes.unwrap_or(0) >= previous.total_cache_writes.unwrap_or(0)
            && self.total_cache_reads.unwrap_or(0) >= previous.total_cache_reads.unwrap_or(0)
    }
}

/// Progress indicator attached to a tool message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProgressStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ToolProgressStatus {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            icon: None,
            text: Some(text.into()),
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_wire_format() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }

    #[test]
    fn test_timestamp_conversion() {
        let ts = Timestamp(1_700_000_000_123);
        let dt = ts.to_datetime().unwrap();
        assert_eq!(Timestamp::from_datetime(dt), ts);
        assert_eq!(ts.succ().as_millis(), 1_700_000_000_124);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1700000000123");
    }

    #[test]
    fn test_token_usage_field_names() {
        let usage = TokenUsage::new(10, 20, 0.5).with_context_tokens(30);
        let json = serde_json::to_value(&usage).unwrap();
        assert_eq!(json["totalTokensIn"], 10);
        assert_eq!(json["totalTokensOut"], 20);
        assert_eq!(json["totalCost"], 0.5);
        assert_eq!(json["contextTokens"], 30);
        assert!(json.get("totalCacheWrites").is_none());
        assert!(json.get("totalCacheReads").is_none());
    }

    #[test]
    fn test_token_usage_rejects_negative_counts() {
        let json = r#"{"totalTokensIn":-1,"totalTokensOut":0,"totalCost":0,"contextTokens":0}"#;
        assert!(serde_json::from_str::<TokenUsage>(json).is_err());

        let usage = TokenUsage::new(0, 0, -0.01);
        assert!(usage.validate().is_err());
    }

    #[test]
    fn test_token_usage_successor() {
        let first = TokenUsage::new(100, 50, 0.01).with_context_tokens(150);
        let second = TokenUsage::new(200, 80, 0.02).with_context_tokens(90);
        assert!(second.is_successor_of(&first));
        assert!(!first.is_successor_of(&second));

        let cheaper = TokenUsage::new(300, 100, 0.015);
        assert!(!cheaper.is_successor_of(&second));
    }

    #[test]
    fn test_tool_progress_status() {
        let status = ToolProgressStatus::new("Applying diff").with_icon("sync");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["icon"], "sync");
        assert_eq!(json["text"], "Applying diff");
    }
}
