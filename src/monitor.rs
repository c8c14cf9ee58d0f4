//! Event stream validation.
//!
//! [`ContractMonitor`] replays events and reports the first ordering rule
//! each one breaks. Consumers can run it over a live subscription; hosts use
//! it in tests to check what they emit.

use crate::events::{MessageAction, RooCodeEvent, RooCodeEventName};
use crate::types::{TaskId, Timestamp, TokenUsage};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// A broken event-ordering rule.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("{event} for task {task_id} before taskStarted")]
    BeforeStart {
        task_id: TaskId,
        event: RooCodeEventName,
    },

    #[error("task {task_id} started twice")]
    DuplicateStart { task_id: TaskId },

    #[error("message {ts} of task {task_id} updated before it was created")]
    UpdateBeforeCreate { task_id: TaskId, ts: Timestamp },

    #[error("message {ts} of task {task_id} created after taskCompleted")]
    MessageAfterCompletion { task_id: TaskId, ts: Timestamp },

    #[error("message {ts} of task {task_id} is malformed: {reason}")]
    InvalidMessage {
        task_id: TaskId,
        ts: Timestamp,
        reason: String,
    },

    #[error("task {task_id} completed more than once")]
    DuplicateCompletion { task_id: TaskId },

    #[error("token usage of task {task_id} decreased (cost {previous} -> {current})")]
    UsageDecreased {
        task_id: TaskId,
        previous: f64,
        current: f64,
    },
}

#[derive(Debug, Default)]
struct TaskState {
    started: bool,
    completed: bool,
    created: HashSet<Timestamp>,
    usage: Option<TokenUsage>,
    parent: Option<TaskId>,
    children: Vec<TaskId>,
}

/// Tracks per-task state across an event stream.
#[derive(Debug, Default)]
pub struct ContractMonitor {
    tasks: HashMap<TaskId, TaskState>,
    observed: usize,
}

impl ContractMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events accepted so far.
    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Check one event and fold it into the tracked state.
    ///
    /// A rejected event leaves the state unchanged.
    pub fn observe(&mut self, event: &RooCodeEvent) -> Result<(), ContractViolation> {
        let task_id = event.task_id();

        match event {
            RooCodeEvent::TaskStarted(_) => {
                let state = self.tasks.entry(task_id).or_default();
                if state.started {
                    return Err(ContractViolation::DuplicateStart { task_id });
                }
                state.started = true;
            }

            RooCodeEvent::TaskSpawned(parent, child) => {
                self.require_started(*parent, event.name())?;
                self.tasks.entry(*parent).or_default().children.push(*child);
                self.tasks.entry(*child).or_default().parent = Some(*parent);
            }

            RooCodeEvent::Message(payload) => {
                let state = self.require_started(task_id, event.name())?;
                let ts = payload.message.ts;

                if let Err(e) = payload.message.validate() {
                    return Err(ContractViolation::InvalidMessage {
                        task_id,
                        ts,
                        reason: e.message,
                    });
                }

                match payload.action {
                    MessageAction::Created => {
                        if state.completed {
                            return Err(ContractViolation::MessageAfterCompletion { task_id, ts });
                        }
                        state.created.insert(ts);
                    }
                    MessageAction::Updated => {
                        if !state.created.contains(&ts) {
                            return Err(ContractViolation::UpdateBeforeCreate { task_id, ts });
                        }
                    }
                }
            }

            RooCodeEvent::TaskCompleted(_, usage) => {
                let state = self.require_started(task_id, event.name())?;
                if state.completed {
                    return Err(ContractViolation::DuplicateCompletion { task_id });
                }
                check_usage(task_id, state, usage)?;
                state.completed = true;
                state.usage = Some(usage.clone());
            }

            RooCodeEvent::TaskTokenUsageUpdated(_, usage) => {
                let state = self.require_started(task_id, event.name())?;
                check_usage(task_id, state, usage)?;
                state.usage = Some(usage.clone());
            }

            RooCodeEvent::TaskPaused(_)
            | RooCodeEvent::TaskUnpaused(_)
            | RooCodeEvent::TaskAskResponded(_)
            | RooCodeEvent::TaskAborted(_) => {
                self.require_started(task_id, event.name())?;
            }
        }

        self.observed += 1;
        Ok(())
    }

    /// Observe every event, collecting all violations.
    pub fn observe_all<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a RooCodeEvent>,
    ) -> Vec<ContractViolation> {
        events
            .into_iter()
            .filter_map(|event| self.observe(event).err())
            .collect()
    }

    fn require_started(
        &mut self,
        task_id: TaskId,
        event: RooCodeEventName,
    ) -> Result<&mut TaskState, ContractViolation> {
        match self.tasks.get_mut(&task_id) {
            Some(state) if state.started => Ok(state),
            _ => Err(ContractViolation::BeforeStart { task_id, event }),
        }
    }

    pub fn is_completed(&self, task_id: &TaskId) -> bool {
        self.tasks.get(task_id).is_some_and(|s| s.completed)
    }

    /// Latest usage seen for a task.
    pub fn usage(&self, task_id: &TaskId) -> Option<&TokenUsage> {
        self.tasks.get(task_id).and_then(|s| s.usage.as_ref())
    }

    pub fn parent_of(&self, task_id: &TaskId) -> Option<TaskId> {
        self.tasks.get(task_id).and_then(|s| s.parent)
    }

    /// Subtasks announced by `taskSpawned`, in spawn order.
    pub fn child_tasks(&self, parent: &TaskId) -> Vec<TaskId> {
        self.tasks
            .get(parent)
            .map(|s| s.children.clone())
            .unwrap_or_default()
    }
}

fn check_usage(
    task_id: TaskId,
    state: &TaskState,
    usage: &TokenUsage,
) -> Result<(), ContractViolation> {
    match &state.usage {
        Some(previous) if !usage.is_successor_of(previous) => {
            Err(ContractViolation::UsageDecreased {
                task_id,
                previous: previous.total_cost,
                current: usage.total_cost,
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ClineMessage, ClineSay};

    fn text(ts: i64) -> ClineMessage {
        ClineMessage::say(ClineSay::Text).with_ts(ts).with_text("hi")
    }

    #[test]
    fn test_accepts_well_formed_stream() {
        let id = TaskId::new();
        let child = TaskId::new();
        let events = vec![
            RooCodeEvent::TaskStarted(id),
            RooCodeEvent::message_created(id, text(1).partial(true)),
            RooCodeEvent::message_updated(id, text(1)),
            RooCodeEvent::TaskTokenUsageUpdated(id, TokenUsage::new(10, 1, 0.1)),
            RooCodeEvent::TaskSpawned(id, child),
            RooCodeEvent::TaskPaused(id),
            RooCodeEvent::TaskStarted(child),
            RooCodeEvent::TaskCompleted(child, TokenUsage::default()),
            RooCodeEvent::TaskUnpaused(id),
            RooCodeEvent::TaskCompleted(id, TokenUsage::new(10, 1, 0.1)),
            RooCodeEvent::TaskTokenUsageUpdated(id, TokenUsage::new(12, 1, 0.1)),
        ];

        let mut monitor = ContractMonitor::new();
        assert!(monitor.observe_all(&events).is_empty());
        assert_eq!(monitor.observed(), events.len());
        assert_eq!(monitor.child_tasks(&id), vec![child]);
        assert_eq!(monitor.parent_of(&child), Some(id));
        assert!(monitor.is_completed(&child));
    }

    #[test]
    fn test_message_before_start() {
        let id = TaskId::new();
        let mut monitor = ContractMonitor::new();
        let err = monitor
            .observe(&RooCodeEvent::message_created(id, text(1)))
            .unwrap_err();
        assert!(matches!(err, ContractViolation::BeforeStart { .. }));
    }

    #[test]
    fn test_update_before_create() {
        let id = TaskId::new();
        let mut monitor = ContractMonitor::new();
        monitor.observe(&RooCodeEvent::TaskStarted(id)).unwrap();
        let err = monitor
            .observe(&RooCodeEvent::message_updated(id, text(7)))
            .unwrap_err();
        assert_eq!(
            err,
            ContractViolation::UpdateBeforeCreate {
                task_id: id,
                ts: Timestamp(7)
            }
        );
    }

    #[test]
    fn test_completion_rules() {
        let id = TaskId::new();
        let mut monitor = ContractMonitor::new();
        monitor.observe(&RooCodeEvent::TaskStarted(id)).unwrap();
        monitor
            .observe(&RooCodeEvent::TaskCompleted(id, TokenUsage::default()))
            .unwrap();

        let err = monitor
            .observe(&RooCodeEvent::TaskCompleted(id, TokenUsage::default()))
            .unwrap_err();
        assert_eq!(err, ContractViolation::DuplicateCompletion { task_id: id });

        let err = monitor
            .observe(&RooCodeEvent::message_created(id, text(2)))
            .unwrap_err();
        assert!(matches!(err, ContractViolation::MessageAfterCompletion { .. }));
    }

    #[test]
    fn test_usage_decrease() {
        let id = TaskId::new();
        let mut monitor = ContractMonitor::new();
        monitor.observe(&RooCodeEvent::TaskStarted(id)).unwrap();
        monitor
            .observe(&RooCodeEvent::TaskTokenUsageUpdated(
                id,
                TokenUsage::new(5, 5, 0.5),
            ))
            .unwrap();

        let err = monitor
            .observe(&RooCodeEvent::TaskTokenUsageUpdated(
                id,
                TokenUsage::new(5, 5, 0.25),
            ))
            .unwrap_err();
        assert!(matches!(err, ContractViolation::UsageDecreased { .. }));
        assert_eq!(monitor.usage(&id).unwrap().total_cost, 0.5);
    }

    #[test]
    fn test_invalid_message() {
        let id = TaskId::new();
        let mut monitor = ContractMonitor::new();
        monitor.observe(&RooCodeEvent::TaskStarted(id)).unwrap();

        let mut message = text(3);
        message.ask = Some(crate::message::ClineAsk::Tool);
        let err = monitor
            .observe(&RooCodeEvent::message_created(id, message))
            .unwrap_err();
        assert!(matches!(err, ContractViolation::InvalidMessage { .. }));
    }
}
