//! # Video Ingest Queue
//!
//! In-memory priority scheduler for video ingestion jobs.
//!
//! ## Key Features
//!
//! - **Priority scheduling** — higher priority first, FIFO among equals
//! - **Per-service token buckets** — every item is admitted through the rate
//!   limits of the services it needs; bursts are pooled across items
//! - **Stage progress tracking** — handlers report stage and overall progress,
//!   overall progress never goes backwards
//! - **Failure isolation** — a failed item records its error and the drain
//!   loop moves on
//! - **Live events** — subscribe to lifecycle events for rendering
//!
//! ## Quick Start
//!
//! 1. Implement [`IngestionHandler`] for your processing logic
//! 2. Build a [`SchedulerConfig`] (load rate limits with [`RateLimitConfig::load`])
//! 3. Create a [`QueueService`], [`enqueue`](QueueService::enqueue) targets
//! 4. Call [`drain()`](QueueService::drain) to process them
//!
//! See the `demos/` directory for complete usage examples.

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod progress;
pub mod queue;
pub mod rate_limit;
pub mod types;

pub use config::{RateLimitConfig, SchedulerConfig, SchedulerConfigBuilder, ServiceRateLimit};
pub use error::{IngestError, QueueError, QueueResult};
pub use events::QueueEvent;
pub use progress::{ProgressReporter, ProgressUpdate};
pub use queue::{normalize_target, QueueService};
pub use rate_limit::{RateLimiter, RateLimiterRegistry};
pub use types::{
    IngestPreferences, ProcessingStage, QueueItem, QueueStatus, QueueStatusSummary,
};

/// Trait for the work performed on each queued item.
///
/// The scheduler calls [`handle`](Self::handle) once per item, after the
/// item has been admitted by every rate limiter it needs. The item is a
/// read-only snapshot; report progress through the [`ProgressReporter`]
/// and signal failure by returning an error.
///
/// # Example
///
/// ```ignore
/// use video_ingest_queue::*;
///
/// struct Ingestor;
///
/// impl IngestionHandler for Ingestor {
///     async fn handle(
///         &self,
///         item: &QueueItem,
///         progress: &ProgressReporter,
///     ) -> Result<(), IngestError> {
///         progress.report(ProcessingStage::Downloading, 0, 10, "Fetching transcript");
///         let transcript = fetch_transcript(&item.target).await?;
///         progress.report(ProcessingStage::Storing, 50, 90, "Saving");
///         save(transcript).await?;
///         Ok(())
///     }
/// }
/// ```
pub trait IngestionHandler: Send + Sync + 'static {
    /// Process a single item.
    ///
    /// # Arguments
    /// * `item` — snapshot of the item in PROCESSING state
    /// * `progress` — callback for stage/overall progress reports
    fn handle(
        &self,
        item: &QueueItem,
        progress: &ProgressReporter,
    ) -> impl std::future::Future<Output = Result<(), IngestError>> + Send;
}
