//! Task lifecycle events.
//!
//! Hosts emit a fixed set of named events, each with a positional payload.
//! On the wire an event is `{"eventName": <name>, "args": [...]}` where
//! `args` has exactly the arity of the event:
//!
//! | event | args |
//! |---|---|
//! | `message` | `[{taskId, action, message}]` |
//! | `taskStarted`, `taskPaused`, `taskUnpaused`, `taskAskResponded`, `taskAborted` | `[taskId]` |
//! | `taskSpawned` | `[taskId, childTaskId]` |
//! | `taskCompleted`, `taskTokenUsageUpdated` | `[taskId, usage]` |

use crate::errors::{ApiError, ApiResult};
use crate::message::ClineMessage;
use crate::types::{TaskId, TokenUsage};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

closed_set! {
    /// Names of the events a host emits.
    pub enum RooCodeEventName {
        Message => "message",
        TaskStarted => "taskStarted",
        TaskPaused => "taskPaused",
        TaskUnpaused => "taskUnpaused",
        TaskAskResponded => "taskAskResponded",
        TaskAborted => "taskAborted",
        TaskSpawned => "taskSpawned",
        TaskCompleted => "taskCompleted",
        TaskTokenUsageUpdated => "taskTokenUsageUpdated",
    }
}

impl RooCodeEventName {
    /// Number of positional arguments the event carries.
    pub fn arity(&self) -> usize {
        match self {
            Self::TaskSpawned | Self::TaskCompleted | Self::TaskTokenUsageUpdated => 2,
            _ => 1,
        }
    }
}

/// Whether a `message` event announces a new message or a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageAction {
    Created,
    Updated,
}

/// Payload of the `message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEventPayload {
    pub task_id: TaskId,
    pub action: MessageAction,
    pub message: ClineMessage,
}

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EventEnvelope", into = "EventEnvelope")]
pub enum RooCodeEvent {
    /// A message was created or mutated.
    Message(MessageEventPayload),

    TaskStarted(TaskId),

    TaskPaused(TaskId),

    TaskUnpaused(TaskId),

    TaskAskResponded(TaskId),

    TaskAborted(TaskId),

    /// `(parent, child)`
    TaskSpawned(TaskId, TaskId),

    /// Terminal for the task.
    TaskCompleted(TaskId, TokenUsage),

    TaskTokenUsageUpdated(TaskId, TokenUsage),
}

impl RooCodeEvent {
    pub fn message_created(task_id: TaskId, message: ClineMessage) -> Self {
        Self::Message(MessageEventPayload {
            task_id,
            action: MessageAction::Created,
            message,
        })
    }

    pub fn message_updated(task_id: TaskId, message: ClineMessage) -> Self {
        Self::Message(MessageEventPayload {
            task_id,
            action: MessageAction::Updated,
            message,
        })
    }

    pub fn name(&self) -> RooCodeEventName {
        match self {
            Self::Message(_) => RooCodeEventName::Message,
            Self::TaskStarted(_) => RooCodeEventName::TaskStarted,
            Self::TaskPaused(_) => RooCodeEventName::TaskPaused,
            Self::TaskUnpaused(_) => RooCodeEventName::TaskUnpaused,
            Self::TaskAskResponded(_) => RooCodeEventName::TaskAskResponded,
            Self::TaskAborted(_) => RooCodeEventName::TaskAborted,
            Self::TaskSpawned(_, _) => RooCodeEventName::TaskSpawned,
            Self::TaskCompleted(_, _) => RooCodeEventName::TaskCompleted,
            Self::TaskTokenUsageUpdated(_, _) => RooCodeEventName::TaskTokenUsageUpdated,
        }
    }

    /// The task the event is about. For `taskSpawned` this is the parent.
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Message(payload) => payload.task_id,
            Self::TaskStarted(id)
            | Self::TaskPaused(id)
            | Self::TaskUnpaused(id)
            | Self::TaskAskResponded(id)
            | Self::TaskAborted(id)
            | Self::TaskSpawned(id, _)
            | Self::TaskCompleted(id, _)
            | Self::TaskTokenUsageUpdated(id, _) => *id,
        }
    }

    /// Positional payload, as delivered to listeners.
    pub fn args(&self) -> Vec<serde_json::Value> {
        fn value(v: impl Serialize) -> serde_json::Value {
            serde_json::to_value(v).unwrap_or(serde_json::Value::Null)
        }

        match self {
            Self::Message(payload) => vec![value(payload)],
            Self::TaskStarted(id)
            | Self::TaskPaused(id)
            | Self::TaskUnpaused(id)
            | Self::TaskAskResponded(id)
            | Self::TaskAborted(id) => vec![value(id)],
            Self::TaskSpawned(parent, child) => vec![value(parent), value(child)],
            Self::TaskCompleted(id, usage) | Self::TaskTokenUsageUpdated(id, usage) => {
                vec![value(id), value(usage)]
            }
        }
    }

    /// Rebuild an event from its name and positional payload.
    pub fn from_args(name: RooCodeEventName, args: Vec<serde_json::Value>) -> ApiResult<Self> {
        if args.len() != name.arity() {
            return Err(ApiError::invalid_input(format!(
                "event {} takes {} argument(s), got {}",
                name,
                name.arity(),
                args.len()
            )));
        }

        let mut args = args.into_iter();
        let mut next = || args.next().unwrap_or(serde_json::Value::Null);

        let event = match name {
            RooCodeEventName::Message => Self::Message(serde_json::from_value(next())?),
            RooCodeEventName::TaskStarted => Self::TaskStarted(serde_json::from_value(next())?),
            RooCodeEventName::TaskPaused => Self::TaskPaused(serde_json::from_value(next())?),
            RooCodeEventName::TaskUnpaused => Self::TaskUnpaused(serde_json::from_value(next())?),
            RooCodeEventName::TaskAskResponded => {
                Self::TaskAskResponded(serde_json::from_value(next())?)
            }
            RooCodeEventName::TaskAborted => Self::TaskAborted(serde_json::from_value(next())?),
            RooCodeEventName::TaskSpawned => Self::TaskSpawned(
                serde_json::from_value(next())?,
                serde_json::from_value(next())?,
            ),
            RooCodeEventName::TaskCompleted => Self::TaskCompleted(
                serde_json::from_value(next())?,
                serde_json::from_value(next())?,
            ),
            RooCodeEventName::TaskTokenUsageUpdated => Self::TaskTokenUsageUpdated(
                serde_json::from_value(next())?,
                serde_json::from_value(next())?,
            ),
        };
        Ok(event)
    }
}

/// Wire form of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_name: RooCodeEventName,
    pub args: Vec<serde_json::Value>,
}

impl From<RooCodeEvent> for EventEnvelope {
    fn from(event: RooCodeEvent) -> Self {
        Self {
            event_name: event.name(),
            args: event.args(),
        }
    }
}

impl TryFrom<EventEnvelope> for RooCodeEvent {
    type Error = ApiError;

    fn try_from(envelope: EventEnvelope) -> ApiResult<Self> {
        RooCodeEvent::from_args(envelope.event_name, envelope.args)
    }
}

/// Filter for subscribing to events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events about these tasks.
    pub task_ids: Option<Vec<TaskId>>,

    /// Only these event names.
    pub event_names: Option<Vec<RooCodeEventName>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match events about `task_id`, including `taskSpawned` where it is the child.
    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_ids.get_or_insert_with(Vec::new).push(task_id);
        self
    }

    pub fn named(mut self, name: RooCodeEventName) -> Self {
        self.event_names.get_or_insert_with(Vec::new).push(name);
        self
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &RooCodeEvent) -> bool {
        if let Some(names) = &self.event_names {
            if !names.contains(&event.name()) {
                return false;
            }
        }

        if let Some(ids) = &self.task_ids {
            let child = match event {
                RooCodeEvent::TaskSpawned(_, child) => Some(child),
                _ => None,
            };
            let about = event.task_id();
            if !ids.contains(&about) && !child.is_some_and(|c| ids.contains(c)) {
                return false;
            }
        }

        true
    }
}

/// Event sender (broadcast channel).
pub type EventSender = broadcast::Sender<RooCodeEvent>;

/// Receiver that only yields events matching a filter.
pub struct EventReceiver {
    inner: broadcast::Receiver<RooCodeEvent>,
    filter: EventFilter,
}

impl EventReceiver {
    pub fn new(inner: broadcast::Receiver<RooCodeEvent>, filter: EventFilter) -> Self {
        Self { inner, filter }
    }

    /// Wait for the next matching event.
    pub async fn recv(&mut self) -> Result<RooCodeEvent, RecvError> {
        loop {
            let event = self.inner.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Take the next matching event without waiting.
    pub fn try_recv(&mut self) -> Result<RooCodeEvent, TryRecvError> {
        loop {
            let event = self.inner.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Drain every matching event currently buffered.
    ///
    /// Lagged receivers skip the events they missed and keep draining.
    pub fn drain(&mut self) -> Vec<RooCodeEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event receiver lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        events
    }
}

/// Event emission trait implemented by hosts.
pub trait EventEmitter {
    /// Subscribe to events with optional filter.
    fn subscribe(&self, filter: EventFilter) -> EventReceiver;

    /// Get recent events, newest first.
    fn recent_events(&self, limit: usize) -> Vec<RooCodeEvent>;

    /// Emit an event.
    fn emit(&self, event: RooCodeEvent);
}

/// Helper struct for managing event emission.
pub struct EventManager {
    sender: EventSender,
    recent: Mutex<VecDeque<RooCodeEvent>>,
    max_recent: usize,
}

impl EventManager {
    /// Create a new event manager.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            recent: Mutex::new(VecDeque::new()),
            max_recent: 100,
        }
    }

    pub fn with_max_recent(mut self, max_recent: usize) -> Self {
        self.max_recent = max_recent;
        self
    }

    /// Emit an event.
    pub fn emit(&self, event: RooCodeEvent) {
        tracing::trace!(event = %event.name(), task_id = %event.task_id(), "emit");

        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            recent.push_back(event.clone());
            while recent.len() > self.max_recent {
                recent.pop_front();
            }
        }

        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self, filter: EventFilter) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RooCodeEvent> {
        let recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        recent.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventEmitter for EventManager {
    fn subscribe(&self, filter: EventFilter) -> EventReceiver {
        EventManager::subscribe(self, filter)
    }

    fn recent_events(&self, limit: usize) -> Vec<RooCodeEvent> {
        self.recent(limit)
    }

    fn emit(&self, event: RooCodeEvent) {
        EventManager::emit(self, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ClineSay;

    #[test]
    fn test_event_wire_shape() {
        let parent = TaskId::new();
        let child = TaskId::new();
        let event = RooCodeEvent::TaskSpawned(parent, child);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventName"], "taskSpawned");
        assert_eq!(json["args"][0], parent.to_string());
        assert_eq!(json["args"][1], child.to_string());

        let back: RooCodeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_single_argument_events_are_arrays() {
        let id = TaskId::new();
        let json = serde_json::to_value(RooCodeEvent::TaskAborted(id)).unwrap();
        assert_eq!(json["args"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_message_event_payload() {
        let id = TaskId::new();
        let msg = ClineMessage::say(ClineSay::Text).with_text("hello");
        let json = serde_json::to_value(RooCodeEvent::message_created(id, msg)).unwrap();

        let payload = &json["args"][0];
        assert_eq!(payload["taskId"], id.to_string());
        assert_eq!(payload["action"], "created");
        assert_eq!(payload["message"]["say"], "text");
    }

    #[test]
    fn test_wrong_arity_rejected() {
        let id = TaskId::new();
        let json = serde_json::json!({
            "eventName": "taskCompleted",
            "args": [id.to_string()],
        });
        assert!(serde_json::from_value::<RooCodeEvent>(json).is_err());

        let unknown = serde_json::json!({"eventName": "taskExploded", "args": []});
        assert!(serde_json::from_value::<RooCodeEvent>(unknown).is_err());
    }

    #[test]
    fn test_event_filter() {
        let a = TaskId::new();
        let b = TaskId::new();

        let by_task = EventFilter::new().for_task(a);
        assert!(by_task.matches(&RooCodeEvent::TaskStarted(a)));
        assert!(!by_task.matches(&RooCodeEvent::TaskStarted(b)));

        let child_filter = EventFilter::new().for_task(b);
        assert!(child_filter.matches(&RooCodeEvent::TaskSpawned(a, b)));

        let by_name = EventFilter::new().named(RooCodeEventName::TaskAborted);
        assert!(by_name.matches(&RooCodeEvent::TaskAborted(a)));
        assert!(!by_name.matches(&RooCodeEvent::TaskPaused(a)));
    }

    #[test]
    fn test_event_manager() {
        let manager = EventManager::new(10).with_max_recent(2);
        let mut rx = manager.subscribe(EventFilter::new().named(RooCodeEventName::TaskStarted));

        let id = TaskId::new();
        manager.emit(RooCodeEvent::TaskStarted(id));
        manager.emit(RooCodeEvent::TaskPaused(id));
        manager.emit(RooCodeEvent::TaskUnpaused(id));

        let recent = manager.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], RooCodeEvent::TaskUnpaused(id));

        let received = rx.drain();
        assert_eq!(received, vec![RooCodeEvent::TaskStarted(id)]);
    }
}
