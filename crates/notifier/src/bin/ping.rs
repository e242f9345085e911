//! Sends one test notification to the operations webhook and reports the result.
//!
//! ```bash
//! DOORAY_NEWS_WEBHOOK_URL=... DOORAY_OPS_WEBHOOK_URL=... cargo run --bin dooray-ping
//! ```

use std::sync::Arc;
use std::time::Duration;

use posco_common::config::NotifierConfig;
use posco_notifier::template::TestData;
use posco_notifier::{HttpTransport, Notification, WebhookDispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "posco_notifier=info".into()),
        )
        .json()
        .init();

    let config = NotifierConfig::from_env()?;
    let transport = Arc::new(HttpTransport::new(config.http_timeout())?);
    let dispatcher = WebhookDispatcher::new(&config, transport)?;
    dispatcher.start();

    let note = std::env::args().nth(1).unwrap_or_else(|| "dooray-ping".to_string());
    let outcome = dispatcher.notify(&Notification::Test(TestData { note: Some(note) }))?;
    tracing::info!(?outcome, "Test notification queued");

    // Worst case: every attempt times out plus the capped backoffs.
    let budget = config.http_timeout() * (config.max_retries + 1)
        + Duration::from_millis(config.retry_max_delay_ms) * config.max_retries;
    if tokio::time::timeout(budget, dispatcher.drain()).await.is_err() {
        tracing::warn!("Timed out waiting for delivery");
    }

    let stats = dispatcher.stats();
    dispatcher.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if stats.delivered == 0 {
        anyhow::bail!("test notification was not delivered");
    }
    Ok(())
}
