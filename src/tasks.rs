//! Task bookkeeping for hosts.
//!
//! [`TaskRegistry`] keeps the task stack, each task's message log and token
//! usage, and emits the matching lifecycle events. It holds the invariants
//! consumers rely on:
//!
//! - `taskStarted` is emitted before any `message` event of a task.
//! - A message whose `ts` matches a partial message replaces it and is
//!   announced as `updated`; every other message is `created`.
//! - Finalized messages are immutable.
//! - No message is created after `taskCompleted`, which fires once.
//! - Token usage never decreases.
//!
//! The registry is not synchronized; hosts wrap it in a lock.

use crate::errors::{ApiError, ApiResult};
use crate::events::{EventManager, MessageAction, MessageEventPayload, RooCodeEvent};
use crate::images::validate_images;
use crate::message::{ClineAsk, ClineMessage, ClineSay, MessageKind};
use crate::types::{TaskId, Timestamp, TokenUsage};
use crate::usage::get_api_metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Paused,
    Completed,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Everything the registry knows about one task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,

    /// Sequential number among tasks started by this registry (1-based).
    pub number: u64,

    /// Parent task for subtasks.
    pub parent: Option<TaskId>,

    pub status: TaskStatus,

    pub created_at: DateTime<Utc>,

    messages: Vec<ClineMessage>,
    usage: TokenUsage,
    answered_ask: Option<Timestamp>,

    /// Requested `ts` -> assigned `ts` for partial messages that were moved
    /// forward on creation.
    restamped: HashMap<Timestamp, Timestamp>,
}

impl TaskRecord {
    fn new(id: TaskId, number: u64, parent: Option<TaskId>) -> Self {
        Self {
            id,
            number,
            parent,
            status: TaskStatus::Running,
            created_at: Utc::now(),
            messages: Vec::new(),
            usage: TokenUsage::default(),
            answered_ask: None,
            restamped: HashMap::new(),
        }
    }

    pub fn messages(&self) -> &[ClineMessage] {
        &self.messages
    }

    pub fn usage(&self) -> &TokenUsage {
        &self.usage
    }

    /// A `ts` later than every message so far, close to now.
    pub fn next_ts(&self) -> Timestamp {
        let now = Timestamp::now();
        match self.messages.last() {
            Some(last) if last.ts >= now => last.ts.succ(),
            _ => now,
        }
    }

    /// The text the task was started with.
    pub fn task_text(&self) -> Option<&str> {
        self.messages.first().and_then(|m| m.text.as_deref())
    }

    /// The ask awaiting a response, if the last message is a finalized,
    /// unanswered ask.
    pub fn pending_ask(&self) -> Option<ClineAsk> {
        let last = self.messages.last()?;
        if last.is_partial() || self.answered_ask == Some(last.ts) {
            return None;
        }
        match last.kind()? {
            MessageKind::Ask(ask) => Some(ask),
            MessageKind::Say(_) => None,
        }
    }
}

/// Task stack, message logs, and event emission.
pub struct TaskRegistry {
    tasks: HashMap<TaskId, TaskRecord>,
    stack: Vec<TaskId>,
    events: Arc<EventManager>,
    started: u64,
}

impl TaskRegistry {
    pub fn new(events: Arc<EventManager>) -> Self {
        Self {
            tasks: HashMap::new(),
            stack: Vec::new(),
            events,
            started: 0,
        }
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// Ordered task ids, innermost (most recently spawned) last.
    pub fn task_stack(&self) -> Vec<TaskId> {
        self.stack.clone()
    }

    pub fn current_task_id(&self) -> Option<TaskId> {
        self.stack.last().copied()
    }

    pub fn task(&self, task_id: &TaskId) -> ApiResult<&TaskRecord> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| ApiError::task_not_found(task_id))
    }

    fn task_mut(&mut self, task_id: &TaskId) -> ApiResult<&mut TaskRecord> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| ApiError::task_not_found(task_id))
    }

    pub fn messages(&self, task_id: &TaskId) -> ApiResult<Vec<ClineMessage>> {
        Ok(self.task(task_id)?.messages.clone())
    }

    pub fn token_usage(&self, task_id: &TaskId) -> ApiResult<TokenUsage> {
        Ok(self.task(task_id)?.usage.clone())
    }

    /// Subtasks spawned by `parent`, in creation order.
    pub fn children(&self, parent: &TaskId) -> Vec<TaskId> {
        let mut children: Vec<&TaskRecord> = self
            .tasks
            .values()
            .filter(|t| t.parent.as_ref() == Some(parent))
            .collect();
        children.sort_by_key(|t| t.number);
        children.into_iter().map(|t| t.id).collect()
    }

    /// All known tasks, oldest first.
    pub fn tasks(&self) -> Vec<&TaskRecord> {
        let mut tasks: Vec<&TaskRecord> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.number);
        tasks
    }

    fn register(&mut self, parent: Option<TaskId>) -> TaskId {
        self.started += 1;
        let id = TaskId::new();
        self.tasks
            .insert(id, TaskRecord::new(id, self.started, parent));
        id
    }

    fn push_initial_message(
        &mut self,
        task_id: TaskId,
        text: Option<String>,
        images: Option<Vec<String>>,
    ) -> ApiResult<()> {
        if text.is_none() && images.is_none() {
            return Ok(());
        }
        let mut message = ClineMessage::say(ClineSay::Text);
        message.text = text;
        message.images = images;
        self.append(task_id, message).map(|_| ())
    }

    /// Stamp `message` with a fresh `ts` and append it.
    pub fn append(&mut self, task_id: TaskId, mut message: ClineMessage) -> ApiResult<Timestamp> {
        message.ts = self.task(&task_id)?.next_ts();
        let (_, ts) = self.push_message(task_id, message)?;
        Ok(ts)
    }

    /// Begin a new top-level task. Any tasks on the stack are aborted first.
    pub fn start_task(
        &mut self,
        text: Option<String>,
        images: Option<Vec<String>>,
    ) -> ApiResult<TaskId> {
        validate_images(images.as_deref())?;

        while let Some(top) = self.stack.last().copied() {
            self.abort(top)?;
        }

        let id = self.register(None);
        self.stack.push(id);
        tracing::info!(task_id = %id, "task started");
        self.events.emit(RooCodeEvent::TaskStarted(id));

        self.push_initial_message(id, text, images)?;
        Ok(id)
    }

    /// Spawn a subtask of the current task. The parent is paused until the
    /// child leaves the stack.
    pub fn spawn_subtask(
        &mut self,
        parent: TaskId,
        text: Option<String>,
        images: Option<Vec<String>>,
    ) -> ApiResult<TaskId> {
        validate_images(images.as_deref())?;

        if self.current_task_id() != Some(parent) {
            return Err(ApiError::invalid_state(format!(
                "only the current task can spawn subtasks, {} is not current",
                parent
            )));
        }
        if self.task(&parent)?.status.is_terminal() {
            return Err(ApiError::already_completed(parent));
        }

        let child = self.register(Some(parent));
        tracing::info!(task_id = %parent, child_task_id = %child, "subtask spawned");
        self.events.emit(RooCodeEvent::TaskSpawned(parent, child));
        self.pause(parent)?;

        self.stack.push(child);
        self.events.emit(RooCodeEvent::TaskStarted(child));

        self.push_initial_message(child, text, images)?;
        Ok(child)
    }

    /// Append a new message or replace the partial message with the same `ts`.
    ///
    /// A new message whose `ts` is not after the last one is moved to
    /// `last + 1`. The returned `ts` is the one the message is stored under;
    /// later fragments of a moved partial message may use either.
    pub fn push_message(
        &mut self,
        task_id: TaskId,
        mut message: ClineMessage,
    ) -> ApiResult<(MessageAction, Timestamp)> {
        message.validate()?;
        let record = self.task_mut(&task_id)?;

        let partial_at = |ts: Timestamp| {
            record
                .messages
                .iter()
                .rposition(|m| m.ts == ts && m.is_partial())
        };
        let existing = partial_at(message.ts).or_else(|| {
            record
                .restamped
                .get(&message.ts)
                .and_then(|assigned| partial_at(*assigned))
        });

        let action = match existing {
            Some(index) => {
                let current = &record.messages[index];
                if current.kind() != message.kind() {
                    return Err(ApiError::invalid_input(format!(
                        "message {} of task {} cannot change its kind",
                        current.ts.as_millis(),
                        task_id
                    ))
                    .with_context("ask", message.ask)
                    .with_context("say", message.say));
                }
                let requested = message.ts;
                message.ts = current.ts;
                if !message.is_partial() {
                    record.restamped.retain(|_, assigned| *assigned != message.ts);
                } else if requested != message.ts {
                    record.restamped.insert(requested, message.ts);
                }
                record.messages[index] = message.clone();
                MessageAction::Updated
            }
            None => {
                if record.status == TaskStatus::Completed {
                    return Err(ApiError::already_completed(task_id));
                }
                if record.status == TaskStatus::Aborted {
                    return Err(ApiError::invalid_state(format!(
                        "task {} was aborted",
                        task_id
                    )));
                }
                let requested = message.ts;
                if let Some(last) = record.messages.last() {
                    if message.ts <= last.ts {
                        message.ts = last.ts.succ();
                    }
                }
                if message.is_partial() && requested != message.ts {
                    record.restamped.insert(requested, message.ts);
                }
                record.messages.push(message.clone());
                MessageAction::Created
            }
        };

        let ts = message.ts;
        tracing::debug!(task_id = %task_id, ts = ts.as_millis(), ?action, "message");
        self.events.emit(RooCodeEvent::Message(MessageEventPayload {
            task_id,
            action,
            message,
        }));
        Ok((action, ts))
    }

    /// Record new cumulative usage. Returns `false` if nothing changed.
    pub fn update_token_usage(&mut self, task_id: TaskId, usage: TokenUsage) -> ApiResult<bool> {
        usage.validate()?;
        let record = self.task_mut(&task_id)?;

        if usage == record.usage {
            return Ok(false);
        }
        if !usage.is_successor_of(&record.usage) {
            return Err(ApiError::invalid_input(format!(
                "token usage for task {} cannot decrease",
                task_id
            ))
            .with_context("previous_cost", record.usage.total_cost)
            .with_context("new_cost", usage.total_cost));
        }

        record.usage = usage.clone();
        self.events
            .emit(RooCodeEvent::TaskTokenUsageUpdated(task_id, usage));
        Ok(true)
    }

    /// Recompute usage from the task's `api_req_started` messages.
    pub fn refresh_token_usage(&mut self, task_id: TaskId) -> ApiResult<TokenUsage> {
        let usage = get_api_metrics(&self.task(&task_id)?.messages);
        self.update_token_usage(task_id, usage.clone())?;
        Ok(usage)
    }

    pub fn pause(&mut self, task_id: TaskId) -> ApiResult<()> {
        let record = self.task_mut(&task_id)?;
        if record.status != TaskStatus::Running {
            return Err(ApiError::invalid_state(format!(
                "task {} is {:?}, not running",
                task_id, record.status
            )));
        }
        record.status = TaskStatus::Paused;
        self.events.emit(RooCodeEvent::TaskPaused(task_id));
        Ok(())
    }

    pub fn unpause(&mut self, task_id: TaskId) -> ApiResult<()> {
        let record = self.task_mut(&task_id)?;
        if record.status != TaskStatus::Paused {
            return Err(ApiError::invalid_state(format!(
                "task {} is {:?}, not paused",
                task_id, record.status
            )));
        }
        record.status = TaskStatus::Running;
        self.events.emit(RooCodeEvent::TaskUnpaused(task_id));
        Ok(())
    }

    /// Mark the pending ask of a task as answered.
    pub fn ask_responded(&mut self, task_id: TaskId) -> ApiResult<ClineAsk> {
        let record = self.task_mut(&task_id)?;
        let ask = record.pending_ask().ok_or_else(ApiError::no_pending_ask)?;
        record.answered_ask = record.messages.last().map(|m| m.ts);
        self.events.emit(RooCodeEvent::TaskAskResponded(task_id));
        Ok(ask)
    }

    fn resume_top(&mut self) -> ApiResult<()> {
        if let Some(top) = self.current_task_id() {
            if self.task(&top)?.status == TaskStatus::Paused {
                self.unpause(top)?;
            }
        }
        Ok(())
    }

    /// Complete a task. Fires `taskCompleted` exactly once.
    ///
    /// Subtasks still above it on the stack are aborted first.
    pub fn complete(&mut self, task_id: TaskId) -> ApiResult<TokenUsage> {
        let record = self.task_mut(&task_id)?;
        match record.status {
            TaskStatus::Completed => return Err(ApiError::already_completed(task_id)),
            TaskStatus::Aborted => {
                return Err(ApiError::invalid_state(format!(
                    "task {} was aborted",
                    task_id
                )))
            }
            TaskStatus::Running | TaskStatus::Paused => {}
        }

        if let Some(position) = self.stack.iter().position(|id| *id == task_id) {
            let above = self.stack.split_off(position + 1);
            self.abort_all(above)?;
        }

        let record = self.task_mut(&task_id)?;
        record.status = TaskStatus::Completed;
        let usage = record.usage.clone();

        tracing::info!(task_id = %task_id, cost = usage.total_cost, "task completed");
        self.events
            .emit(RooCodeEvent::TaskCompleted(task_id, usage.clone()));

        if self.stack.contains(&task_id) {
            self.stack.retain(|id| *id != task_id);
            self.resume_top()?;
        }
        Ok(usage)
    }

    /// Abort a task and every subtask above it on the stack.
    pub fn abort(&mut self, task_id: TaskId) -> ApiResult<()> {
        if self.task(&task_id)?.status.is_terminal() {
            return Err(ApiError::invalid_state(format!(
                "task {} has already finished",
                task_id
            )));
        }

        let above = match self.stack.iter().position(|id| *id == task_id) {
            Some(position) => self.stack.split_off(position),
            None => vec![task_id],
        };
        self.abort_all(above)
    }

    /// Abort `ids` innermost first, skipping finished tasks.
    fn abort_all(&mut self, ids: Vec<TaskId>) -> ApiResult<()> {
        for id in ids.into_iter().rev() {
            let record = self.task_mut(&id)?;
            if record.status.is_terminal() {
                continue;
            }
            record.status = TaskStatus::Aborted;
            tracing::info!(task_id = %id, "task aborted");
            self.events.emit(RooCodeEvent::TaskAborted(id));
        }
        Ok(())
    }

    /// Abort the current task and resume its parent.
    pub fn cancel_current(&mut self) -> ApiResult<TaskId> {
        let current = self.current_task_id().ok_or_else(ApiError::no_active_task)?;
        self.abort(current)?;
        self.resume_top()?;
        Ok(current)
    }

    /// Remove the current task. If it is a subtask, the parent resumes and
    /// receives `last_message` as a `say: "text"` message.
    pub fn clear_current(&mut self, last_message: Option<String>) -> ApiResult<TaskId> {
        let current = self.current_task_id().ok_or_else(ApiError::no_active_task)?;
        let parent = self.task(&current)?.parent;

        if self.task(&current)?.status.is_terminal() {
            self.stack.pop();
        } else {
            self.abort(current)?;
        }
        self.resume_top()?;

        if let (Some(parent), Some(text)) = (parent, last_message) {
            if self.current_task_id() == Some(parent) {
                self.append(parent, ClineMessage::say(ClineSay::Text).with_text(text))?;
            }
        }
        Ok(current)
    }
}
