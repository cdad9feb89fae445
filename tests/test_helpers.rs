use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use video_ingest_queue::*;

/// Handler that records every call and fails for configured targets.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub calls: Arc<Mutex<Vec<(String, Instant)>>>,
    pub fail_on: Arc<HashSet<String>>,
}

impl RecordingHandler {
    pub fn failing_on(targets: &[&str]) -> Self {
        Self {
            calls: Arc::default(),
            fail_on: Arc::new(targets.iter().map(|t| t.to_string()).collect()),
        }
    }

    pub fn targets(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(target, _)| target.clone())
            .collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

impl IngestionHandler for RecordingHandler {
    async fn handle(
        &self,
        item: &QueueItem,
        progress: &ProgressReporter,
    ) -> Result<(), IngestError> {
        self.calls
            .lock()
            .unwrap()
            .push((item.target.clone(), Instant::now()));

        progress.report(ProcessingStage::Downloading, 100, 20, "Downloaded metadata");
        progress.report(ProcessingStage::Transcribing, 50, 50, "Transcribing");

        if self.fail_on.contains(&item.target) {
            return Err(anyhow::anyhow!("transcript service returned 503").into());
        }

        progress.report(ProcessingStage::Storing, 100, 95, "Stored");
        Ok(())
    }
}

/// Handler that replays a fixed list of progress reports.
#[derive(Clone)]
pub struct ScriptedProgressHandler {
    pub script: Vec<(ProcessingStage, u8, u8)>,
}

impl IngestionHandler for ScriptedProgressHandler {
    async fn handle(
        &self,
        _item: &QueueItem,
        progress: &ProgressReporter,
    ) -> Result<(), IngestError> {
        for (stage, stage_progress, overall) in &self.script {
            progress.report(*stage, *stage_progress, *overall, stage.as_str());
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// Handler that sleeps for a fixed time per item and tracks how many calls
/// overlap.
#[derive(Clone, Default)]
pub struct SlowHandler {
    pub delay: Duration,
    pub seen: Arc<Mutex<Vec<String>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl SlowHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn targets(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn max_overlap(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl IngestionHandler for SlowHandler {
    async fn handle(
        &self,
        item: &QueueItem,
        _progress: &ProgressReporter,
    ) -> Result<(), IngestError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.seen.lock().unwrap().push(item.target.clone());

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn video_url(n: usize) -> String {
    format!("https://www.youtube.com/watch?v=vid{:08}", n)
}
