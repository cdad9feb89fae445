use std::path::Path;

use video_ingest_queue::*;

struct CountingIngestor;

impl IngestionHandler for CountingIngestor {
    async fn handle(
        &self,
        item: &QueueItem,
        progress: &ProgressReporter,
    ) -> Result<(), IngestError> {
        progress.report(ProcessingStage::Storing, 100, 95, format!("Stored {}", item.id));
        Ok(())
    }
}

const DEFAULT_LIMITS: &str = r#"
services:
  youtube_api:
    requests_per_minute: 30
    burst: 2
  openai_api:
    requests_per_minute: 20
    burst: 1
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,video_ingest_queue=debug")
            }),
        )
        .init();

    // Pass a YAML file path to override the built-in limits
    let rate_limits = match std::env::args().nth(1) {
        Some(path) => RateLimitConfig::load(Path::new(&path))?,
        None => RateLimitConfig::from_yaml_str(DEFAULT_LIMITS)?,
    };

    let config = SchedulerConfig::builder()
        .with_rate_limits(rate_limits)
        .with_handler_timeout(std::time::Duration::from_secs(30))
        .build();
    let service = QueueService::new(CountingIngestor, config)?;

    let mut events = service.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                QueueEvent::Started { target } => println!("-> {}", target),
                QueueEvent::Completed { target, duration_ms } => {
                    println!("<- {} ({} ms)", target, duration_ms)
                }
                QueueEvent::Failed { target, error, .. } => println!("!! {}: {}", target, error),
                QueueEvent::Drained { summary } => {
                    println!("Drained: {} of {} completed", summary.completed, summary.total);
                    break;
                }
                _ => {}
            }
        }
    });

    for n in 0..5 {
        let preferences = IngestPreferences::default().with_summarize(n % 2 == 0);
        service.enqueue(
            &format!("https://www.youtube.com/watch?v=demo{:07}", n),
            0,
            preferences,
        )?;
    }

    service.drain().await;
    printer.await?;
    Ok(())
}
