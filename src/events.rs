use serde::{Deserialize, Serialize};

use crate::types::{ProcessingStage, QueueStatusSummary};

/// Lifecycle events broadcast to subscribers of
/// [`QueueService::subscribe`](crate::QueueService::subscribe).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// An item was accepted into the queue.
    Enqueued {
        target: String,
        priority: i32,
        sequence: u64,
    },
    /// An item entered PROCESSING.
    Started { target: String },
    /// The handler reported progress.
    Progress {
        target: String,
        stage: ProcessingStage,
        stage_progress: u8,
        overall_progress: u8,
        message: String,
    },
    /// The handler finished successfully.
    Completed { target: String, duration_ms: u64 },
    /// The handler failed.
    Failed {
        target: String,
        error_type: String,
        error: String,
    },
    /// A drain pass found the queue empty and returned.
    Drained { summary: QueueStatusSummary },
}

impl QueueEvent {
    /// The target this event concerns, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            QueueEvent::Enqueued { target, .. }
            | QueueEvent::Started { target }
            | QueueEvent::Progress { target, .. }
            | QueueEvent::Completed { target, .. }
            | QueueEvent::Failed { target, .. } => Some(target),
            QueueEvent::Drained { .. } => None,
        }
    }
}
