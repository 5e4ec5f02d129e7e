//! Domain events emitted at task lifecycle edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurex_core::{ActorId, TenantId};
use procurex_events::Event;

use crate::store::DeadLetterAction;
use crate::task::TaskId;

/// Task lifecycle facts published for operator tooling and audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskEvent {
    TaskDeadLettered {
        tenant_id: TenantId,
        task_id: TaskId,
        operation: String,
        error: String,
        attempts: u32,
        rollback_triggered: bool,
        occurred_at: DateTime<Utc>,
    },
    DeadLetterResolved {
        tenant_id: TenantId,
        task_id: TaskId,
        action: DeadLetterAction,
        actor: ActorId,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for TaskEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TaskEvent::TaskDeadLettered { .. } => "retry.task.dead_lettered",
            TaskEvent::DeadLetterResolved { .. } => "retry.task.dead_letter_resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TaskEvent::TaskDeadLettered { occurred_at, .. } => *occurred_at,
            TaskEvent::DeadLetterResolved { occurred_at, .. } => *occurred_at,
        }
    }
}
