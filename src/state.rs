use crate::chart::ingest::{ChartBus, IngestPipeline};
use crate::chart::registry::SymbolRegistry;
use crate::chart::stream::run_feed;
use crate::chart::types::{
    ChartEvent, ConnectionState, FeedArgs, FeedSession, FeedStatusSnapshot, FeedStopResult,
    DEFAULT_SYMBOLS,
};
use crate::error::FeedError;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

pub struct FeedHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: tokio::task::JoinHandle<()>,
}

/// Owns the running feed: the cancellation token, the status store, and the
/// event bus renderers subscribe to.
pub struct FeedState {
    feed: Mutex<Option<FeedHandle>>,
    status: Arc<RwLock<FeedStatusSnapshot>>,
    bus: ChartBus,
}

impl FeedState {
    pub fn new() -> Self {
        let status = FeedStatusSnapshot::stopped(
            DEFAULT_SYMBOLS
                .iter()
                .map(|symbol| (*symbol).to_string())
                .collect(),
            Some("feed idle".to_string()),
        );

        Self {
            feed: Mutex::new(None),
            status: Arc::new(RwLock::new(status)),
            bus: ChartBus::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChartEvent> {
        self.bus.subscribe()
    }

    /// Starts a feed session, cancelling and awaiting any previous one first.
    pub async fn start(&self, args: FeedArgs) -> Result<FeedSession, FeedError> {
        let config = args.normalize()?;

        let existing_handle = {
            let mut feed_slot = self.feed.lock().await;
            feed_slot.take()
        };
        if let Some(handle) = existing_handle {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
        }

        let registry = SymbolRegistry::new(&config.symbols, config.dedup_policy);
        let pipeline = Arc::new(SyncMutex::new(IngestPipeline::new(
            registry,
            self.bus.clone(),
        )));

        let cancellation_token = CancellationToken::new();
        let task_token = cancellation_token.clone();
        let status_store = Arc::clone(&self.status);
        let bus = self.bus.clone();
        let runtime_config = config.clone();

        let join_handle = tokio::spawn(async move {
            run_feed(runtime_config, pipeline, status_store, bus, task_token).await;
        });

        {
            let mut feed_slot = self.feed.lock().await;
            *feed_slot = Some(FeedHandle {
                cancellation_token,
                join_handle,
            });
        }

        Ok(FeedSession::from_config(&config))
    }

    pub async fn stop(&self) -> FeedStopResult {
        let existing_handle = {
            let mut feed_slot = self.feed.lock().await;
            feed_slot.take()
        };

        let stopped = if let Some(handle) = existing_handle {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
            true
        } else {
            false
        };

        {
            let mut writable = self.status.write().await;
            writable.state = ConnectionState::Stopped;
            writable.reason = Some("feed stopped by request".to_string());
        }

        FeedStopResult { stopped }
    }

    pub async fn status(&self) -> FeedStatusSnapshot {
        self.status.read().await.clone()
    }
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}
