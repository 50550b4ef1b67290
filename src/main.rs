use tickerboard::{ChartEvent, FeedArgs, FeedError, FeedState};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), FeedError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state = FeedState::new();
    let args = FeedArgs {
        history_url: std::env::var("TICKERBOARD_HISTORY_URL").ok(),
        stream_url: std::env::var("TICKERBOARD_STREAM_URL").ok(),
        ..FeedArgs::default()
    };

    let mut events = state.subscribe();
    let session = state.start(args).await?;
    info!(symbols = ?session.symbols, stream_url = %session.stream_url, "feed started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ChartEvent::ChartBootstrap(bootstrap)) => {
                    info!(symbol = %bootstrap.symbol, points = bootstrap.points.len(), "chart bootstrapped");
                }
                Ok(ChartEvent::WindowUpdate(update)) => {
                    if let Some(latest) = update.points.last() {
                        info!(symbol = %update.symbol, label = %latest.label, price = latest.price, "window updated");
                    }
                }
                Ok(ChartEvent::FeedStatus(status)) => {
                    debug!(state = ?status.state, reason = ?status.reason, "feed status");
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    let _ = state.stop().await;
    info!("feed stopped");
    Ok(())
}
