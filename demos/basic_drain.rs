use std::time::Duration;

use video_ingest_queue::*;

struct SimulatedIngestor;

impl IngestionHandler for SimulatedIngestor {
    async fn handle(
        &self,
        item: &QueueItem,
        progress: &ProgressReporter,
    ) -> Result<(), IngestError> {
        progress.report(ProcessingStage::Downloading, 0, 10, "Fetching metadata");
        tokio::time::sleep(Duration::from_millis(100)).await;

        progress.report(ProcessingStage::Transcribing, 50, 40, "Fetching transcript");
        if item.target.contains("private") {
            return Err(IngestError::Transcript("video is private".into()));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        if item.preferences.summarize {
            progress.report(ProcessingStage::Summarizing, 0, 70, "Summarizing");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        progress.report(ProcessingStage::Storing, 100, 95, "Saving");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let service = QueueService::new(SimulatedIngestor, SchedulerConfig::default())?;

    service.enqueue(
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        1,
        IngestPreferences::default(),
    )?;
    service.enqueue(
        "https://www.youtube.com/watch?v=private0001",
        5,
        IngestPreferences::default(),
    )?;
    service.enqueue(
        "https://www.youtube.com/watch?v=jNQXAC9IVRw",
        5,
        IngestPreferences::default()
            .with_summarize(false)
            .with_tags(["history"]),
    )?;
    println!("Queued items: {}", service.queued_count());

    let summary = service.drain().await;
    println!(
        "Completed: {}, failed: {}, total: {}",
        summary.completed, summary.failed, summary.total
    );

    for item in service.list_items() {
        println!(
            "{:<48} {:<10} {:>3}% {}",
            item.target,
            item.status,
            item.overall_progress_percent,
            item.error_message.unwrap_or_default()
        );
    }
    Ok(())
}
