//! Chat message vocabulary.
//!
//! Every message a task produces is either an **ask** (the consumer must
//! respond) or a **say** (purely informational). The sub-kind is one of the
//! closed [`ClineAsk`] / [`ClineSay`] tag sets.

use crate::errors::{ApiError, ApiResult};
use crate::types::{Metadata, Timestamp, ToolProgressStatus};
use serde::{Deserialize, Serialize};

closed_set! {
    /// A pending question or permission request.
    pub enum ClineAsk {
        Followup => "followup",
        Command => "command",
        CommandOutput => "command_output",
        CompletionResult => "completion_result",
        Tool => "tool",
        ApiReqFailed => "api_req_failed",
        ResumeTask => "resume_task",
        ResumeCompletedTask => "resume_completed_task",
        MistakeLimitReached => "mistake_limit_reached",
        BrowserActionLaunch => "browser_action_launch",
        UseMcpServer => "use_mcp_server",
        FinishTask => "finishTask",
        AutoApprovalMaxReqReached => "auto_approval_max_req_reached",
    }
}

closed_set! {
    /// An informational narration event.
    pub enum ClineSay {
        /// Reserved: the task text is carried by the first message instead.
        Task => "task",
        Error => "error",
        ApiReqStarted => "api_req_started",
        ApiReqFinished => "api_req_finished",
        ApiReqRetried => "api_req_retried",
        Text => "text",
        Reasoning => "reasoning",
        CompletionResult => "completion_result",
        UserFeedback => "user_feedback",
        UserFeedbackDiff => "user_feedback_diff",
        CommandOutput => "command_output",
        /// Reserved: tool use is reported through `ask: "tool"`.
        Tool => "tool",
        ShellIntegrationWarning => "shell_integration_warning",
        BrowserAction => "browser_action",
        BrowserActionResult => "browser_action_result",
        /// Reserved: commands are reported through `ask: "command"`.
        Command => "command",
        McpServerRequestStarted => "mcp_server_request_started",
        McpServerResponse => "mcp_server_response",
        /// Reserved: subtask creation is signalled by `taskSpawned`.
        NewTaskStarted => "new_task_started",
        CheckpointSaved => "checkpoint_saved",
    }
}

impl ClineSay {
    /// Tags kept for exhaustive matching that hosts are not expected to emit.
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            Self::Task | Self::Tool | Self::Command | Self::NewTaskStarted
        )
    }
}

/// What the consumer is expected to do about a pending ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedResponse {
    /// Press the primary button (and, when offered, the secondary one).
    Approval {
        primary: &'static str,
        secondary: Option<&'static str>,
    },

    /// Answer with free text via `send_message`.
    Text,

    /// Output is streaming; the primary button lets the task continue.
    Acknowledge { primary: &'static str },
}

impl ClineAsk {
    /// How a consumer answers this ask.
    pub fn expected_response(&self) -> ExpectedResponse {
        use ExpectedResponse::*;
        match self {
            Self::Followup => Text,
            Self::Command => Approval {
                primary: "Run Command",
                secondary: Some("Reject"),
            },
            Self::CommandOutput => Acknowledge {
                primary: "Proceed While Running",
            },
            Self::CompletionResult | Self::ResumeCompletedTask => Approval {
                primary: "Start New Task",
                secondary: None,
            },
            Self::Tool | Self::BrowserActionLaunch | Self::UseMcpServer => Approval {
                primary: "Approve",
                secondary: Some("Reject"),
            },
            Self::ApiReqFailed => Approval {
                primary: "Retry",
                secondary: Some("Start New Task"),
            },
            Self::ResumeTask => Approval {
                primary: "Resume Task",
                secondary: Some("Terminate"),
            },
            Self::MistakeLimitReached => Approval {
                primary: "Proceed Anyway",
                secondary: Some("Start New Task"),
            },
            Self::FinishTask => Approval {
                primary: "Finish Subtask",
                secondary: None,
            },
            Self::AutoApprovalMaxReqReached => Approval {
                primary: "Reset and Continue",
                secondary: None,
            },
        }
    }

    /// Whether pressing the secondary button is meaningful.
    pub fn has_secondary_action(&self) -> bool {
        matches!(
            self.expected_response(),
            ExpectedResponse::Approval {
                secondary: Some(_),
                ..
            }
        )
    }
}

/// A consumer's answer to a pending ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AskResponse {
    YesButtonClicked,
    NoButtonClicked,
    MessageResponse,
}

/// Discriminator of [`ClineMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClineMessageType {
    Ask,
    Say,
}

/// The sub-kind of a message, resolved from its `type` and tag fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ask(ClineAsk),
    Say(ClineSay),
}

/// A timestamped chat record.
///
/// Field set and names mirror the wire format. Exactly one of `ask`/`say`
/// is meaningful depending on `type`; [`ClineMessage::kind`] resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClineMessage {
    /// Creation time; also the identity of the message within its task.
    pub ts: Timestamp,

    #[serde(rename = "type")]
    pub message_type: ClineMessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<ClineAsk>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub say: Option<ClineSay>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Image data URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,

    /// Set while the message is still streaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Index into the API conversation history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_history_index: Option<usize>,

    /// Opaque checkpoint reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Metadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_status: Option<ToolProgressStatus>,
}

impl ClineMessage {
    fn new(message_type: ClineMessageType) -> Self {
        Self {
            ts: Timestamp::now(),
            message_type,
            ask: None,
            say: None,
            text: None,
            images: None,
            partial: None,
            reasoning: None,
            conversation_history_index: None,
            checkpoint: None,
            progress_status: None,
        }
    }

    /// Create an ask message.
    pub fn ask(ask: ClineAsk) -> Self {
        Self {
            ask: Some(ask),
            ..Self::new(ClineMessageType::Ask)
        }
    }

    /// Create a say message.
    pub fn say(say: ClineSay) -> Self {
        Self {
            say: Some(say),
            ..Self::new(ClineMessageType::Say)
        }
    }

    pub fn with_ts(mut self, ts: impl Into<Timestamp>) -> Self {
        self.ts = ts.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = Some(partial);
        self
    }

    pub fn with_history_index(mut self, index: usize) -> Self {
        self.conversation_history_index = Some(index);
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Metadata) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_progress(mut self, status: ToolProgressStatus) -> Self {
        self.progress_status = Some(status);
        self
    }

    pub fn is_partial(&self) -> bool {
        self.partial.unwrap_or(false)
    }

    pub fn is_ask(&self) -> bool {
        self.message_type == ClineMessageType::Ask
    }

    /// Resolve the sub-kind. `None` if the tag matching `type` is missing.
    pub fn kind(&self) -> Option<MessageKind> {
        match self.message_type {
            ClineMessageType::Ask => self.ask.map(MessageKind::Ask),
            ClineMessageType::Say => self.say.map(MessageKind::Say),
        }
    }

    /// Check that the tag field agrees with `type`.
    pub fn validate(&self) -> ApiResult<()> {
        match (self.message_type, self.ask, self.say) {
            (ClineMessageType::Ask, Some(_), None) | (ClineMessageType::Say, None, Some(_)) => {
                Ok(())
            }
            (message_type, ask, say) => Err(ApiError::invalid_input(format!(
                "message of type {:?} must carry exactly the matching tag",
                message_type
            ))
            .with_context("ts", self.ts)
            .with_context("ask", ask)
            .with_context("say", say)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_sizes() {
        assert_eq!(ClineAsk::ALL.len(), 13);
        assert_eq!(ClineSay::ALL.len(), 20);
    }

    #[test]
    fn test_tag_spelling_survives_serde() {
        for ask in ClineAsk::ALL {
            let json = serde_json::to_string(ask).unwrap();
            assert_eq!(json, format!("\"{}\"", ask.as_str()));
        }
        assert_eq!(ClineAsk::FinishTask.as_str(), "finishTask");
        assert_eq!(ClineSay::ApiReqStarted.as_str(), "api_req_started");
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let json = r#"{"ts":1,"type":"say","say":"whisper"}"#;
        let err = serde_json::from_str::<ClineMessage>(json).unwrap_err();
        assert!(err.to_string().contains("whisper"));

        assert!("approve".parse::<ClineAsk>().is_err());
    }

    #[test]
    fn test_reserved_tags() {
        let reserved: Vec<_> = ClineSay::ALL.iter().filter(|s| s.is_reserved()).collect();
        assert_eq!(reserved.len(), 4);
        assert!(!ClineSay::Text.is_reserved());
    }

    #[test]
    fn test_message_wire_format() {
        let msg = ClineMessage::ask(ClineAsk::Tool)
            .with_ts(1_700_000_000_000)
            .with_text("{\"tool\":\"readFile\"}")
            .partial(true)
            .with_history_index(3)
            .with_progress(ToolProgressStatus::new("reading"));

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["ts"], 1_700_000_000_000i64);
        assert_eq!(json["type"], "ask");
        assert_eq!(json["ask"], "tool");
        assert_eq!(json["partial"], true);
        assert_eq!(json["conversationHistoryIndex"], 3);
        assert_eq!(json["progressStatus"]["text"], "reading");
        assert!(json.get("say").is_none());
        assert!(json.get("images").is_none());
    }

    #[test]
    fn test_message_kind_and_validation() {
        let msg = ClineMessage::say(ClineSay::Text).with_text("hi");
        assert_eq!(msg.kind(), Some(MessageKind::Say(ClineSay::Text)));
        assert!(msg.validate().is_ok());

        let mut bad = msg.clone();
        bad.ask = Some(ClineAsk::Followup);
        assert!(bad.validate().is_err());

        let mut missing = ClineMessage::ask(ClineAsk::Followup);
        missing.ask = None;
        assert_eq!(missing.kind(), None);
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_expected_responses() {
        assert_eq!(ClineAsk::Followup.expected_response(), ExpectedResponse::Text);
        assert_eq!(
            ClineAsk::ApiReqFailed.expected_response(),
            ExpectedResponse::Approval {
                primary: "Retry",
                secondary: Some("Start New Task"),
            }
        );
        assert!(ClineAsk::Tool.has_secondary_action());
        assert!(!ClineAsk::CompletionResult.has_secondary_action());
    }

    #[test]
    fn test_ask_response_spelling() {
        assert_eq!(
            serde_json::to_string(&AskResponse::YesButtonClicked).unwrap(),
            "\"yesButtonClicked\""
        );
        assert_eq!(
            serde_json::to_string(&AskResponse::MessageResponse).unwrap(),
            "\"messageResponse\""
        );
    }
}
