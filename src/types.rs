use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Item lifecycle: Queued -> Processing -> Completed/Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Queued, QueueStatus::Processing)
                | (QueueStatus::Processing, QueueStatus::Completed)
                | (QueueStatus::Processing, QueueStatus::Failed)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Ingestion pipeline stages, in pipeline order.
///
/// `Complete` and `Failed` are terminal markers set by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Validating,
    Downloading,
    Transcribing,
    Summarizing,
    Storing,
    Complete,
    Failed,
}

impl ProcessingStage {
    /// The stage every item enters when processing starts.
    pub const FIRST: ProcessingStage = ProcessingStage::Validating;

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Validating => "validating",
            ProcessingStage::Downloading => "downloading",
            ProcessingStage::Transcribing => "transcribing",
            ProcessingStage::Summarizing => "summarizing",
            ProcessingStage::Storing => "storing",
            ProcessingStage::Complete => "complete",
            ProcessingStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStage::Complete | ProcessingStage::Failed)
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Per-item processing preferences, fixed at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestPreferences {
    /// Tags attached by the user in addition to generated ones.
    pub tags: Vec<String>,
    /// Whether to produce a summary (also throttles the summarization service).
    pub summarize: bool,
    /// Upper bound on summary length, in words.
    pub summary_length: u32,
    /// Strip timestamps from the stored transcript.
    pub remove_timestamps: bool,
    /// Overwrite previously stored results.
    pub force: bool,
}

impl Default for IngestPreferences {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            summarize: true,
            summary_length: 300,
            remove_timestamps: false,
            force: false,
        }
    }
}

impl IngestPreferences {
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_summarize(mut self, summarize: bool) -> Self {
        self.summarize = summarize;
        self
    }

    pub fn with_summary_length(mut self, words: u32) -> Self {
        self.summary_length = words;
        self
    }

    pub fn with_remove_timestamps(mut self, remove: bool) -> Self {
        self.remove_timestamps = remove;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// One unit of scheduled work.
///
/// Items are immutable snapshots: every state change produces a new value
/// that the scheduler stores in place of the old one. Handlers only ever
/// see a clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identifier of this attempt.
    pub id: String,
    /// Normalized target URL; also the lookup key.
    pub target: String,
    /// Scheduler-assigned enqueue order.
    pub sequence: u64,
    pub status: QueueStatus,
    /// Higher runs sooner.
    pub priority: i32,
    pub preferences: IngestPreferences,
    pub current_stage: Option<ProcessingStage>,
    pub stage_progress_percent: u8,
    pub overall_progress_percent: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    /// Last human-readable progress note.
    pub message: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(
        target: String,
        sequence: u64,
        priority: i32,
        preferences: IngestPreferences,
        max_retries: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target,
            sequence,
            status: QueueStatus::Queued,
            priority,
            preferences,
            current_stage: None,
            stage_progress_percent: 0,
            overall_progress_percent: 0,
            retry_count: 0,
            max_retries,
            error_message: None,
            error_type: None,
            message: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Snapshot in PROCESSING state. No-op unless the item is queued.
    pub fn started(&self, now: DateTime<Utc>) -> Self {
        if !self.status.can_transition_to(QueueStatus::Processing) {
            return self.clone();
        }
        Self {
            status: QueueStatus::Processing,
            started_at: Some(now),
            current_stage: Some(ProcessingStage::FIRST),
            stage_progress_percent: 0,
            ..self.clone()
        }
    }

    /// Snapshot in COMPLETED state with progress forced to 100.
    pub fn completed(&self, now: DateTime<Utc>) -> Self {
        if !self.status.can_transition_to(QueueStatus::Completed) {
            return self.clone();
        }
        Self {
            status: QueueStatus::Completed,
            completed_at: Some(now),
            current_stage: Some(ProcessingStage::Complete),
            stage_progress_percent: 100,
            overall_progress_percent: 100,
            ..self.clone()
        }
    }

    /// Snapshot in FAILED state carrying the handler's error. Progress is
    /// left where the last report put it.
    pub fn failed(&self, now: DateTime<Utc>, error: &IngestError) -> Self {
        if !self.status.can_transition_to(QueueStatus::Failed) {
            return self.clone();
        }
        Self {
            status: QueueStatus::Failed,
            completed_at: Some(now),
            current_stage: Some(ProcessingStage::Failed),
            error_message: Some(format!("{:#}", error)),
            error_type: Some(error.kind().to_string()),
            ..self.clone()
        }
    }
}

/// Aggregate counts over every known item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatusSummary {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueStatusSummary {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a QueueItem>) -> Self {
        let mut summary = Self::default();
        for item in items {
            match item.status {
                QueueStatus::Queued => summary.queued += 1,
                QueueStatus::Processing => summary.processing += 1,
                QueueStatus::Completed => summary.completed += 1,
                QueueStatus::Failed => summary.failed += 1,
            }
            summary.total += 1;
        }
        summary
    }
}
