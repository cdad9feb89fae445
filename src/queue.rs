use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::error::{QueueError, QueueResult};
use crate::events::QueueEvent;
use crate::rate_limit::RateLimiterRegistry;
use crate::types::{IngestPreferences, QueueItem, QueueStatus, QueueStatusSummary};
use crate::IngestionHandler;

/// Heap key: higher priority first, then lower sequence (FIFO).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    pub(crate) priority: i32,
    pub(crate) sequence: u64,
    pub(crate) target: String,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Everything guarded by the scheduler lock.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub(crate) items: HashMap<String, QueueItem>,
    pub(crate) heap: BinaryHeap<QueueEntry>,
    pub(crate) next_sequence: u64,
}

impl QueueState {
    fn push(&mut self, item: QueueItem) {
        self.heap.push(QueueEntry {
            priority: item.priority,
            sequence: item.sequence,
            target: item.target.clone(),
        });
        self.items.insert(item.target.clone(), item);
    }

    /// Pop the next runnable item, discarding heap entries whose item has
    /// since been replaced.
    pub(crate) fn pop_next(&mut self) -> Option<QueueItem> {
        while let Some(entry) = self.heap.pop() {
            match self.items.get(&entry.target) {
                Some(item)
                    if item.sequence == entry.sequence && item.status == QueueStatus::Queued =>
                {
                    return Some(item.clone());
                }
                _ => debug!(
                    url = %entry.target,
                    sequence = entry.sequence,
                    "Skipping stale queue entry"
                ),
            }
        }
        None
    }

    /// Replace the stored item with `f(current)` if it is still the same
    /// attempt. Returns the stored snapshot.
    pub(crate) fn update<F>(&mut self, item: &QueueItem, f: F) -> QueueItem
    where
        F: FnOnce(&QueueItem) -> QueueItem,
    {
        let current = self
            .items
            .get(&item.target)
            .filter(|current| current.sequence == item.sequence)
            .unwrap_or(item);
        let next = f(current);
        if current.sequence == item.sequence {
            self.items.insert(item.target.clone(), next.clone());
        }
        next
    }
}

/// Scheduler lock accessor. A poisoned lock only means a panic happened
/// while the guard was held; the state is plain data and still usable.
pub(crate) fn lock_state(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory priority scheduler for ingestion work.
///
/// Items are enqueued with a priority and preferences, then drained one at
/// a time by [`drain()`](Self::drain): each item is admitted through the
/// rate limiters of the services it needs and handed to the injected
/// [`IngestionHandler`].
///
/// # Example
///
/// ```ignore
/// let config = SchedulerConfig::builder()
///     .with_rate_limits(RateLimitConfig::load(Path::new("rate_limits.yaml"))?)
///     .build();
///
/// let service = QueueService::new(MyHandler::new(), config)?;
/// let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
/// service.enqueue(url, 5, IngestPreferences::default())?;
/// service.drain().await;
/// println!("{:?}", service.status());
/// ```
pub struct QueueService<H> {
    pub(crate) handler: H,
    pub(crate) config: SchedulerConfig,
    pub(crate) limiters: RateLimiterRegistry,
    pub(crate) state: Arc<Mutex<QueueState>>,
    pub(crate) events: broadcast::Sender<QueueEvent>,
    pub(crate) drain_lock: tokio::sync::Mutex<()>,
}

impl<H> QueueService<H>
where
    H: IngestionHandler,
{
    /// Create a scheduler. Invalid rate-limit configuration fails here, never
    /// during a drain.
    pub fn new(handler: H, config: SchedulerConfig) -> QueueResult<Self> {
        config.validate()?;
        let limiters = RateLimiterRegistry::from_config(&config)?;
        let (events, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            handler,
            config,
            limiters,
            state: Arc::new(Mutex::new(QueueState::default())),
            events,
            drain_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Add a target to the queue. Returns the queued item immediately.
    ///
    /// A target that is already queued or processing is rejected; a target
    /// whose previous attempt finished may be enqueued again and replaces
    /// that record.
    pub fn enqueue(
        &self,
        target: &str,
        priority: i32,
        preferences: IngestPreferences,
    ) -> QueueResult<QueueItem> {
        let target = normalize_target(target)?;
        if preferences.summary_length == 0 {
            return Err(QueueError::InvalidPreferences(
                "summary_length must be at least 1".to_string(),
            ));
        }

        let item = {
            let mut state = lock_state(&self.state);
            if let Some(existing) = state.items.get(&target) {
                if !existing.status.is_terminal() {
                    return Err(QueueError::AlreadyQueued(target));
                }
            }
            state.next_sequence += 1;
            let item = QueueItem::new(
                target,
                state.next_sequence,
                priority,
                preferences,
                self.config.max_retries,
            );
            state.push(item.clone());
            item
        };

        info!(
            url = %item.target,
            priority = item.priority,
            sequence = item.sequence,
            "Enqueued item"
        );
        let _ = self.events.send(QueueEvent::Enqueued {
            target: item.target.clone(),
            priority: item.priority,
            sequence: item.sequence,
        });
        Ok(item)
    }

    /// Re-enqueue a failed item as a fresh attempt with `retry_count + 1`.
    pub fn requeue_failed(&self, target: &str) -> QueueResult<QueueItem> {
        let key = normalize_target(target)?;

        let item = {
            let mut state = lock_state(&self.state);
            let previous = state
                .items
                .get(&key)
                .cloned()
                .ok_or_else(|| QueueError::NotFound(key.clone()))?;

            if previous.status != QueueStatus::Failed {
                return Err(QueueError::NotRetryable {
                    target: key,
                    status: previous.status.to_string(),
                });
            }
            if previous.retry_count >= previous.max_retries {
                return Err(QueueError::RetryLimitReached {
                    target: key,
                    max_retries: previous.max_retries,
                });
            }

            state.next_sequence += 1;
            let mut item = QueueItem::new(
                key,
                state.next_sequence,
                previous.priority,
                previous.preferences,
                previous.max_retries,
            );
            item.retry_count = previous.retry_count + 1;
            state.push(item.clone());
            item
        };

        info!(
            url = %item.target,
            retry_count = item.retry_count,
            max_retries = item.max_retries,
            "Requeued failed item"
        );
        let _ = self.events.send(QueueEvent::Enqueued {
            target: item.target.clone(),
            priority: item.priority,
            sequence: item.sequence,
        });
        Ok(item)
    }

    /// Counts per status, computed from the current items.
    pub fn status(&self) -> QueueStatusSummary {
        let state = lock_state(&self.state);
        QueueStatusSummary::from_items(state.items.values())
    }

    /// Snapshot of every known item (terminal ones included), in enqueue
    /// order.
    pub fn list_items(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = lock_state(&self.state).items.values().cloned().collect();
        items.sort_by_key(|item| item.sequence);
        items
    }

    /// Snapshot of one item.
    pub fn get_item(&self, target: &str) -> Option<QueueItem> {
        let key = normalize_target(target).unwrap_or_else(|_| target.to_string());
        lock_state(&self.state).items.get(&key).cloned()
    }

    /// Number of items waiting to be processed.
    pub fn queued_count(&self) -> usize {
        self.status().queued
    }

    /// Receive lifecycle events. Slow receivers miss events rather than
    /// slowing the scheduler.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn rate_limiters(&self) -> &RateLimiterRegistry {
        &self.limiters
    }
}

/// Parse and normalize a target URL. Only absolute http(s) URLs with a
/// host are accepted.
pub fn normalize_target(target: &str) -> QueueResult<String> {
    let trimmed = target.trim();
    let url = url::Url::parse(trimmed)
        .map_err(|e| QueueError::invalid_target(trimmed, e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(QueueError::invalid_target(
            trimmed,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(QueueError::invalid_target(trimmed, "missing host"));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::progress::ProgressReporter;

    struct NoopHandler;

    impl IngestionHandler for NoopHandler {
        async fn handle(
            &self,
            _item: &QueueItem,
            _progress: &ProgressReporter,
        ) -> Result<(), IngestError> {
            Ok(())
        }
    }

    fn make_service() -> QueueService<NoopHandler> {
        QueueService::new(NoopHandler, SchedulerConfig::default()).unwrap()
    }

    fn url(n: usize) -> String {
        format!("https://www.youtube.com/watch?v=video{:06}", n)
    }

    #[test]
    fn test_entry_ordering() {
        let mut heap = BinaryHeap::new();
        for (priority, sequence) in [(1, 1), (5, 2), (5, 3), (0, 4), (5, 5)] {
            heap.push(QueueEntry {
                priority,
                sequence,
                target: format!("t{}", sequence),
            });
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.sequence)).collect();
        assert_eq!(order, vec![2, 3, 5, 1, 4]);
    }

    #[test]
    fn test_negative_priorities_order_last() {
        let mut heap = BinaryHeap::new();
        heap.push(QueueEntry {
            priority: -3,
            sequence: 1,
            target: "a".into(),
        });
        heap.push(QueueEntry {
            priority: 0,
            sequence: 2,
            target: "b".into(),
        });
        assert_eq!(heap.pop().unwrap().target, "b");
    }

    #[test]
    fn test_enqueue_returns_queued_item() {
        let service = make_service();
        let item = service.enqueue(&url(1), 3, IngestPreferences::default()).unwrap();
        assert_eq!(item.status, QueueStatus::Queued);
        assert_eq!(item.priority, 3);
        assert_eq!(item.sequence, 1);
        assert_eq!(item.max_retries, 3);
        assert_eq!(service.queued_count(), 1);
    }

    #[test]
    fn test_sequence_strictly_increases() {
        let service = make_service();
        let a = service.enqueue(&url(1), 0, IngestPreferences::default()).unwrap();
        let b = service.enqueue(&url(2), 0, IngestPreferences::default()).unwrap();
        assert!(b.sequence > a.sequence);
    }

    #[test]
    fn test_duplicate_active_target_rejected() {
        let service = make_service();
        service.enqueue(&url(1), 0, IngestPreferences::default()).unwrap();
        let err = service
            .enqueue(&url(1), 9, IngestPreferences::default())
            .unwrap_err();
        assert!(matches!(err, QueueError::AlreadyQueued(_)));
        assert_eq!(service.status().total, 1);
    }

    #[test]
    fn test_invalid_targets_rejected() {
        let service = make_service();
        for bad in ["not a url", "ftp://example.com/file", "dQw4w9WgXcQ", ""] {
            let err = service
                .enqueue(bad, 0, IngestPreferences::default())
                .unwrap_err();
            assert!(matches!(err, QueueError::InvalidTarget { .. }), "{}", bad);
        }
        assert_eq!(service.status().total, 0);
    }

    #[test]
    fn test_zero_summary_length_rejected() {
        let service = make_service();
        let prefs = IngestPreferences::default().with_summary_length(0);
        let err = service.enqueue(&url(1), 0, prefs).unwrap_err();
        assert!(matches!(err, QueueError::InvalidPreferences(_)));
    }

    #[test]
    fn test_target_normalized() {
        let service = make_service();
        let item = service
            .enqueue("  https://YouTu.be/abc  ", 0, IngestPreferences::default())
            .unwrap();
        assert_eq!(item.target, "https://youtu.be/abc");
        assert!(service.get_item("https://youtu.be/abc").is_some());
    }

    #[test]
    fn test_pop_skips_stale_entries() {
        let mut state = QueueState::default();
        let old = QueueItem::new("t".into(), 1, 9, IngestPreferences::default(), 3);
        let new = QueueItem::new("t".into(), 2, 0, IngestPreferences::default(), 3);
        state.push(old);
        state.push(new);

        let popped = state.pop_next().unwrap();
        assert_eq!(popped.sequence, 2);
        assert!(state.pop_next().is_none());
    }

    #[test]
    fn test_list_items_in_enqueue_order() {
        let service = make_service();
        for n in 0..5 {
            service.enqueue(&url(n), (n % 2) as i32, IngestPreferences::default()).unwrap();
        }
        let sequences: Vec<u64> = service.list_items().iter().map(|i| i.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_requeue_requires_failed_item() {
        let service = make_service();
        service.enqueue(&url(1), 0, IngestPreferences::default()).unwrap();
        assert!(matches!(
            service.requeue_failed(&url(1)),
            Err(QueueError::NotRetryable { .. })
        ));
        assert!(matches!(
            service.requeue_failed(&url(2)),
            Err(QueueError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let config = SchedulerConfig::builder()
            .with_service_limit(
                "youtube_api",
                crate::config::ServiceRateLimit::per_minute(10).with_burst(0),
            )
            .build();
        assert!(matches!(
            QueueService::new(NoopHandler, config),
            Err(QueueError::InvalidConfig(_))
        ));
    }
}
