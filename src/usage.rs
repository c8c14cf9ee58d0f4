//! Token usage derived from the message log.
//!
//! Every provider request is narrated by a `say: "api_req_started"` message
//! whose text is a JSON [`ApiReqInfo`]. Token and cost totals for a task are
//! the sums over those messages.

use crate::errors::{ApiError, ApiResult};
use crate::message::{ClineMessage, ClineMessageType, ClineSay};
use crate::types::TokenUsage;
use serde::{Deserialize, Serialize};

/// Why a provider request ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiReqCancelReason {
    StreamingFailed,
    UserCancelled,
}

/// JSON body of an `api_req_started` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReqInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_writes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_reads: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<ApiReqCancelReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_failed_message: Option<String>,
}

impl ApiReqInfo {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: Some(request.into()),
            ..Default::default()
        }
    }

    pub fn with_tokens(mut self, tokens_in: u64, tokens_out: u64) -> Self {
        self.tokens_in = Some(tokens_in);
        self.tokens_out = Some(tokens_out);
        self
    }

    pub fn with_cache(mut self, writes: u64, reads: u64) -> Self {
        self.cache_writes = Some(writes);
        self.cache_reads = Some(reads);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn cancelled(mut self, reason: ApiReqCancelReason) -> Self {
        self.cancel_reason = Some(reason);
        self
    }

    /// Parse the text of an `api_req_started` message.
    pub fn from_message(message: &ClineMessage) -> Option<Self> {
        if !is_say(message, ClineSay::ApiReqStarted) {
            return None;
        }
        message
            .text
            .as_deref()
            .and_then(|text| serde_json::from_str(text).ok())
    }

    /// Render as an `api_req_started` message.
    pub fn to_message(&self) -> ApiResult<ClineMessage> {
        Ok(ClineMessage::say(ClineSay::ApiReqStarted).with_text(serde_json::to_string(self)?))
    }

    /// Sum of every token count carried by this request (saturating).
    pub fn context_tokens(&self) -> u64 {
        [
            self.tokens_in,
            self.tokens_out,
            self.cache_writes,
            self.cache_reads,
        ]
        .into_iter()
        .flatten()
        .fold(0u64, u64::saturating_add)
    }

    /// The provider failure this request ended with, if it failed mid-stream.
    pub fn failure(&self) -> Option<ApiError> {
        if self.cancel_reason != Some(ApiReqCancelReason::StreamingFailed) {
            return None;
        }
        let message = self
            .streaming_failed_message
            .clone()
            .unwrap_or_else(|| "the provider stream failed".to_string());
        let mut error = ApiError::provider(message);
        if let Some(request) = &self.request {
            error = error.with_context("request", request);
        }
        Some(error)
    }
}

fn is_say(message: &ClineMessage, say: ClineSay) -> bool {
    message.message_type == ClineMessageType::Say && message.say == Some(say)
}

/// Accumulate token usage over a task's messages.
///
/// Unparseable request bodies are skipped. Totals saturate at `u64::MAX`.
/// `contextTokens` comes from the last `api_req_started` message only.
pub fn get_api_metrics(messages: &[ClineMessage]) -> TokenUsage {
    let mut usage = TokenUsage::default();

    let last_request = messages
        .iter()
        .rposition(|m| is_say(m, ClineSay::ApiReqStarted));

    for (index, message) in messages.iter().enumerate() {
        let Some(info) = ApiReqInfo::from_message(message) else {
            continue;
        };

        usage.total_tokens_in = usage
            .total_tokens_in
            .saturating_add(info.tokens_in.unwrap_or(0));
        usage.total_tokens_out = usage
            .total_tokens_out
            .saturating_add(info.tokens_out.unwrap_or(0));
        if let Some(writes) = info.cache_writes {
            let total = usage.total_cache_writes.get_or_insert(0);
            *total = total.saturating_add(writes);
        }
        if let Some(reads) = info.cache_reads {
            let total = usage.total_cache_reads.get_or_insert(0);
            *total = total.saturating_add(reads);
        }
        if let Some(cost) = info.cost.filter(|c| c.is_finite() && *c >= 0.0) {
            usage.total_cost += cost;
        }

        if Some(index) == last_request {
            usage.context_tokens = info.context_tokens();
        }
    }

    usage
}

/// Fold each `api_req_finished` message into the `api_req_started` message
/// before it.
///
/// The finished message's JSON fields override the started message's. A
/// finished message with no started message before it (since the previous
/// request) is dropped.
pub fn combine_api_requests(messages: &[ClineMessage]) -> Vec<ClineMessage> {
    let mut combined: Vec<ClineMessage> = Vec::with_capacity(messages.len());
    let mut open_request: Option<usize> = None;

    for message in messages {
        if is_say(message, ClineSay::ApiReqStarted) {
            open_request = Some(combined.len());
            combined.push(message.clone());
        } else if is_say(message, ClineSay::ApiReqFinished) {
            if let Some(index) = open_request.take() {
                let merged = merge_json_text(combined[index].text.as_deref(), message.text.as_deref());
                combined[index].text = Some(merged);
            }
        } else {
            combined.push(message.clone());
        }
    }

    combined
}

fn merge_json_text(started: Option<&str>, finished: Option<&str>) -> String {
    let parse = |text: Option<&str>| -> serde_json::Map<String, serde_json::Value> {
        text.and_then(|t| serde_json::from_str(t).ok())
            .unwrap_or_default()
    };

    let mut merged = parse(started);
    merged.extend(parse(finished));
    serde_json::Value::Object(merged).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(info: ApiReqInfo) -> ClineMessage {
        info.to_message().unwrap()
    }

    #[test]
    fn test_metrics_sum_requests() {
        let messages = vec![
            ClineMessage::say(ClineSay::Text).with_text("thinking"),
            request(ApiReqInfo::new("a").with_tokens(100, 20).with_cost(0.01)),
            request(
                ApiReqInfo::new("b")
                    .with_tokens(50, 10)
                    .with_cache(5, 40)
                    .with_cost(0.02),
            ),
        ];

        let usage = get_api_metrics(&messages);
        assert_eq!(usage.total_tokens_in, 150);
        assert_eq!(usage.total_tokens_out, 30);
        assert_eq!(usage.total_cache_writes, Some(5));
        assert_eq!(usage.total_cache_reads, Some(40));
        assert!((usage.total_cost - 0.03).abs() < 1e-9);
        assert_eq!(usage.context_tokens, 105);
    }

    #[test]
    fn test_metrics_skip_bad_bodies() {
        let messages = vec![
            ClineMessage::say(ClineSay::ApiReqStarted).with_text("not json"),
            ClineMessage::say(ClineSay::Text).with_text(r#"{"tokensIn": 999}"#),
        ];
        let usage = get_api_metrics(&messages);
        assert!(usage.is_empty());
        assert_eq!(usage.total_cache_writes, None);
    }

    #[test]
    fn test_context_tokens_from_last_request() {
        let messages = vec![
            request(ApiReqInfo::new("a").with_tokens(1000, 100)),
            request(ApiReqInfo::new("b")),
        ];
        assert_eq!(get_api_metrics(&messages).context_tokens, 0);
    }

    #[test]
    fn test_metrics_saturate_on_huge_counts() {
        let huge = || request(ApiReqInfo::new("big").with_tokens(u64::MAX, 1).with_cache(u64::MAX, 0));
        let usage = get_api_metrics(&[huge(), huge()]);

        assert_eq!(usage.total_tokens_in, u64::MAX);
        assert_eq!(usage.total_tokens_out, 2);
        assert_eq!(usage.total_cache_writes, Some(u64::MAX));
        assert_eq!(usage.context_tokens, u64::MAX);

        let info = ApiReqInfo::new("x").with_tokens(u64::MAX, 1);
        assert_eq!(info.context_tokens(), u64::MAX);
    }

    #[test]
    fn test_streaming_failure_as_provider_error() {
        assert!(ApiReqInfo::new("ok").failure().is_none());

        let mut info = ApiReqInfo::new("req").cancelled(ApiReqCancelReason::StreamingFailed);
        info.streaming_failed_message = Some("overloaded".into());
        let err = info.failure().unwrap();
        assert_eq!(err.code, crate::errors::ErrorCode::ProviderError);
        assert_eq!(err.message, "overloaded");
        assert!(err.recoverable);

        let cancelled = ApiReqInfo::new("req").cancelled(ApiReqCancelReason::UserCancelled);
        assert!(cancelled.failure().is_none());
    }

    #[test]
    fn test_combine_api_requests() {
        let finished = ClineMessage::say(ClineSay::ApiReqFinished)
            .with_text(r#"{"tokensIn":10,"tokensOut":5,"cost":0.5}"#);
        let messages = vec![
            request(ApiReqInfo::new("hello")),
            ClineMessage::say(ClineSay::Text).with_text("reply"),
            finished.clone(),
            finished,
        ];

        let combined = combine_api_requests(&messages);
        assert_eq!(combined.len(), 2);

        let info = ApiReqInfo::from_message(&combined[0]).unwrap();
        assert_eq!(info.request.as_deref(), Some("hello"));
        assert_eq!(info.tokens_in, Some(10));
        assert_eq!(info.cost, Some(0.5));
        assert_eq!(combined[1].say, Some(ClineSay::Text));
    }

    #[test]
    fn test_cancel_reason_spelling() {
        let info = ApiReqInfo::new("x").cancelled(ApiReqCancelReason::UserCancelled);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["cancelReason"], "user_cancelled");
    }
}
