use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, info, info_span, Instrument};

use crate::error::IngestError;
use crate::events::QueueEvent;
use crate::progress::ProgressReporter;
use crate::queue::{lock_state, QueueService};
use crate::types::{QueueItem, QueueStatusSummary};
use crate::IngestionHandler;

impl<H> QueueService<H>
where
    H: IngestionHandler,
{
    /// Process queued items one at a time, in priority then FIFO order,
    /// until the queue is empty and stays empty for `idle_wait`.
    ///
    /// Handler failures are recorded on the item and logged; they never
    /// abort the loop. Concurrent calls are serialized, so at most one item
    /// is ever PROCESSING.
    pub async fn drain(&self) -> QueueStatusSummary {
        let _running = self.drain_lock.lock().await;
        let mut processed: usize = 0;

        loop {
            let item = match self.pop_next() {
                Some(item) => item,
                None => {
                    // Give concurrent enqueuers a moment before giving up
                    tokio::time::sleep(self.config.idle_wait).await;
                    match self.pop_next() {
                        Some(item) => item,
                        None => break,
                    }
                }
            };

            let span = info_span!("ingest", url = %item.target, sequence = item.sequence);
            self.process_item(item).instrument(span).await;
            processed += 1;
        }

        let summary = self.status();
        info!(
            processed,
            completed = summary.completed,
            failed = summary.failed,
            "Queue drained"
        );
        let _ = self.events.send(QueueEvent::Drained { summary });
        summary
    }

    fn pop_next(&self) -> Option<QueueItem> {
        lock_state(&self.state).pop_next()
    }

    fn store<F>(&self, item: &QueueItem, f: F) -> QueueItem
    where
        F: FnOnce(&QueueItem) -> QueueItem,
    {
        lock_state(&self.state).update(item, f)
    }

    async fn process_item(&self, item: QueueItem) {
        let item = self.store(&item, |current| current.started(Utc::now()));
        info!(priority = item.priority, retry_count = item.retry_count, "Processing item");
        let _ = self.events.send(QueueEvent::Started {
            target: item.target.clone(),
        });

        for service in self.config.services_for(item.preferences.summarize) {
            self.limiters.acquire(service).await;
        }

        let reporter = ProgressReporter::new(
            item.target.clone(),
            item.sequence,
            self.state.clone(),
            self.events.clone(),
        );

        let start = Instant::now();
        let result = match self.config.handler_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.handler.handle(&item, &reporter)).await {
                    Ok(result) => result,
                    Err(_) => Err(IngestError::Timeout(limit)),
                }
            }
            None => self.handler.handle(&item, &reporter).await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                let done = self.store(&item, |current| current.completed(Utc::now()));
                info!(duration_ms, "Item completed");
                let _ = self.events.send(QueueEvent::Completed {
                    target: done.target,
                    duration_ms,
                });
            }
            Err(e) => {
                let failed = self.store(&item, |current| current.failed(Utc::now(), &e));
                error!(
                    error_type = e.kind(),
                    error = %format!("{:#}", e),
                    duration_ms,
                    "Batch item failed"
                );
                let _ = self.events.send(QueueEvent::Failed {
                    target: failed.target,
                    error_type: failed.error_type.unwrap_or_default(),
                    error: failed.error_message.unwrap_or_default(),
                });
            }
        }
    }
}
