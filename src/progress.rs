//! Progress reporting from ingestion handlers back into scheduler state.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::QueueEvent;
use crate::queue::{lock_state, QueueState};
use crate::types::{ProcessingStage, QueueItem, QueueStatus};

/// A single progress report. Percentages are clamped to 100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: ProcessingStage,
    pub stage_progress: u8,
    pub overall_progress: u8,
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(
        stage: ProcessingStage,
        stage_progress: u8,
        overall_progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            stage_progress: stage_progress.min(100),
            overall_progress: overall_progress.min(100),
            message: message.into(),
        }
    }

    /// Apply this report to `item`, returning the updated snapshot.
    ///
    /// Stage, stage progress and message are replaced; overall progress only
    /// ever moves forward.
    pub fn apply(&self, item: &QueueItem) -> QueueItem {
        QueueItem {
            current_stage: Some(self.stage),
            stage_progress_percent: self.stage_progress.min(100),
            overall_progress_percent: item
                .overall_progress_percent
                .max(self.overall_progress.min(100)),
            message: Some(self.message.clone()),
            ..item.clone()
        }
    }
}

/// Per-item progress callback handed to the ingestion handler.
///
/// Reporting never blocks on observers and never fails. Reports that
/// arrive after the item left PROCESSING are dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    target: String,
    sequence: u64,
    state: Arc<Mutex<QueueState>>,
    events: broadcast::Sender<QueueEvent>,
}

impl ProgressReporter {
    pub(crate) fn new(
        target: String,
        sequence: u64,
        state: Arc<Mutex<QueueState>>,
        events: broadcast::Sender<QueueEvent>,
    ) -> Self {
        Self {
            target,
            sequence,
            state,
            events,
        }
    }

    /// The target this reporter updates.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn report(
        &self,
        stage: ProcessingStage,
        stage_progress: u8,
        overall_progress: u8,
        message: impl Into<String>,
    ) {
        self.report_update(ProgressUpdate::new(
            stage,
            stage_progress,
            overall_progress,
            message,
        ));
    }

    pub fn report_update(&self, update: ProgressUpdate) {
        let snapshot = {
            let mut state = lock_state(&self.state);
            let Some(current) = state.items.get(&self.target) else {
                return;
            };
            if current.sequence != self.sequence || current.status != QueueStatus::Processing {
                debug!(url = %self.target, "Dropping progress report for inactive item");
                return;
            }
            let next = update.apply(current);
            state.items.insert(self.target.clone(), next.clone());
            next
        };

        let _ = self.events.send(QueueEvent::Progress {
            target: snapshot.target,
            stage: update.stage,
            stage_progress: snapshot.stage_progress_percent,
            overall_progress: snapshot.overall_progress_percent,
            message: update.message,
        });
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("target", &self.target)
            .field("sequence", &self.sequence)
            .finish()
    }
}
