use crate::chart::ingest::{ChartBus, IngestPipeline, IngestSummary};
use crate::chart::types::{
    parse_observation_wire, ChartEvent, ConnectionState, FeedConfig, FeedStatusSnapshot,
};
use crate::chart::upstream::{connect_observation_stream, fetch_history};
use crate::error::FeedError;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STATUS_ERROR_THROTTLE_MS: u64 = 500;

#[derive(Debug, Default)]
struct StatusPublishThrottle {
    last_state: Option<ConnectionState>,
    last_reason: Option<String>,
    last_emit: Option<Instant>,
}

struct StreamRuntimeContext<'a> {
    config: &'a FeedConfig,
    pipeline: &'a Arc<Mutex<IngestPipeline>>,
    status_store: &'a Arc<RwLock<FeedStatusSnapshot>>,
    status_throttle: &'a Arc<Mutex<StatusPublishThrottle>>,
    bus: &'a ChartBus,
}

enum StreamDirective {
    Continue,
    ImmediateReconnect,
}

/// Drives one feed session: backfill, then the live websocket with
/// reconnect-and-backoff, until the token is cancelled.
///
/// The backfill is requested and fully processed (success or failure) before
/// the live connection is established, so the initial window ordering is
/// never interleaved with live pushes.
pub async fn run_feed(
    config: FeedConfig,
    pipeline: Arc<Mutex<IngestPipeline>>,
    status_store: Arc<RwLock<FeedStatusSnapshot>>,
    bus: ChartBus,
    cancel_token: CancellationToken,
) {
    let status_throttle = Arc::new(Mutex::new(StatusPublishThrottle::default()));
    let http_client = Client::new();

    publish_status(
        &status_store,
        &bus,
        &pipeline,
        ConnectionState::Connecting,
        &config.symbols,
        Some("loading historical observations".to_string()),
    )
    .await;

    match load_history(&config, &http_client, &pipeline).await {
        Ok(summary) => {
            info!(
                accepted = summary.accepted,
                skipped = summary.skipped,
                unknown = summary.unknown,
                rejected = summary.rejected,
                "backfill processed"
            );
            publish_status(
                &status_store,
                &bus,
                &pipeline,
                ConnectionState::Connecting,
                &config.symbols,
                Some("historical observations loaded".to_string()),
            )
            .await;
        }
        Err(error) => {
            // Non-fatal: proceed to the live path with empty windows.
            warn!(%error, "backfill unavailable");
            pipeline.lock().emit_bootstrap();
            publish_status(
                &status_store,
                &bus,
                &pipeline,
                ConnectionState::Connecting,
                &config.symbols,
                Some(format!("backfill unavailable: {error}")),
            )
            .await;
        }
    }

    let heartbeat_cancel = cancel_token.clone();
    let heartbeat_status_store = Arc::clone(&status_store);
    let heartbeat_pipeline = Arc::clone(&pipeline);
    let heartbeat_bus = bus.clone();
    let heartbeat_symbols = config.symbols.clone();
    let heartbeat_interval_ms = config.heartbeat_interval_ms;
    let heartbeat_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(heartbeat_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = heartbeat_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let (current_state, current_reason) = {
                        let readable = heartbeat_status_store.read().await;
                        (readable.state, readable.reason.clone())
                    };
                    publish_status(
                        &heartbeat_status_store,
                        &heartbeat_bus,
                        &heartbeat_pipeline,
                        current_state,
                        &heartbeat_symbols,
                        current_reason,
                    ).await;
                }
            }
        }
    });

    let mut reconnect_attempt = 0_u32;
    let context = StreamRuntimeContext {
        config: &config,
        pipeline: &pipeline,
        status_store: &status_store,
        status_throttle: &status_throttle,
        bus: &bus,
    };
    while !cancel_token.is_cancelled() {
        let phase = if reconnect_attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };

        let reason = if reconnect_attempt == 0 {
            Some("opening websocket stream".to_string())
        } else {
            Some(format!("reconnect attempt {reconnect_attempt}"))
        };

        publish_status(
            &status_store,
            &bus,
            &pipeline,
            phase,
            &config.symbols,
            reason,
        )
        .await;

        match connect_observation_stream(&config.stream_url).await {
            Ok(mut websocket_stream) => {
                reconnect_attempt = 0;
                publish_status(
                    &status_store,
                    &bus,
                    &pipeline,
                    ConnectionState::Live,
                    &config.symbols,
                    Some("websocket connected".to_string()),
                )
                .await;

                let mut immediate_reconnect = false;
                loop {
                    let frame = tokio::select! {
                        _ = cancel_token.cancelled() => {
                            break;
                        }
                        next_message = websocket_stream.next() => next_message,
                    };

                    let Some(frame_result) = frame else {
                        break;
                    };

                    match frame_result {
                        Ok(message) => match handle_message(message, &context).await {
                            StreamDirective::Continue => {}
                            StreamDirective::ImmediateReconnect => {
                                immediate_reconnect = true;
                                break;
                            }
                        },
                        Err(error) => {
                            publish_status_throttled(
                                &context,
                                ConnectionState::Reconnecting,
                                Some(format!("websocket frame error: {error}")),
                            )
                            .await;
                            break;
                        }
                    }
                }

                if cancel_token.is_cancelled() {
                    break;
                }

                if immediate_reconnect {
                    reconnect_attempt = 0;
                    continue;
                }
            }
            Err(error) => {
                publish_status_throttled(
                    &context,
                    ConnectionState::Reconnecting,
                    Some(format!("websocket connect error: {error}")),
                )
                .await;
            }
        }

        reconnect_attempt = reconnect_attempt.saturating_add(1);
        let delay = reconnect_delay(reconnect_attempt);
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    cancel_token.cancel();
    let _ = heartbeat_handle.await;

    publish_status(
        &status_store,
        &bus,
        &pipeline,
        ConnectionState::Stopped,
        &config.symbols,
        Some("feed stopped".to_string()),
    )
    .await;
}

async fn load_history(
    config: &FeedConfig,
    http_client: &Client,
    pipeline: &Arc<Mutex<IngestPipeline>>,
) -> Result<IngestSummary, FeedError> {
    let batch = fetch_history(http_client, &config.history_url).await?;
    if batch.is_empty() {
        debug!("backfill returned no observations");
    }
    let summary = pipeline.lock().ingest_batch(batch);
    Ok(summary)
}

async fn handle_message(
    message: Message,
    context: &StreamRuntimeContext<'_>,
) -> StreamDirective {
    let parsed = match message {
        Message::Text(text_payload) => {
            let mut owned_payload = text_payload.into_bytes();
            parse_observation_wire(owned_payload.as_mut_slice())
        }
        Message::Binary(mut binary_payload) => {
            parse_observation_wire(binary_payload.as_mut_slice())
        }
        Message::Close(_) => return StreamDirective::ImmediateReconnect,
        _ => return StreamDirective::Continue,
    };

    match parsed {
        Ok(wire) => {
            // Synchronous, run-to-completion: the lock is released before the
            // next frame is read.
            let _ = context.pipeline.lock().ingest_one(wire);
        }
        Err(error) => {
            context.pipeline.lock().mark_rejected(&error);
        }
    }

    StreamDirective::Continue
}

async fn publish_status(
    status_store: &Arc<RwLock<FeedStatusSnapshot>>,
    bus: &ChartBus,
    pipeline: &Arc<Mutex<IngestPipeline>>,
    state: ConnectionState,
    symbols: &[String],
    reason: Option<String>,
) {
    let totals = pipeline.lock().totals();
    let snapshot = FeedStatusSnapshot {
        state,
        symbols: symbols.to_vec(),
        accepted: totals.accepted,
        skipped: totals.skipped,
        unknown: totals.unknown,
        rejected: totals.rejected,
        reason,
    };

    {
        let mut writable = status_store.write().await;
        *writable = snapshot.clone();
    }

    bus.publish(ChartEvent::FeedStatus(snapshot));
}

fn allow_status_publish(
    throttle: &Arc<Mutex<StatusPublishThrottle>>,
    state: ConnectionState,
    reason: &Option<String>,
) -> bool {
    let mut writable = throttle.lock();
    let now = Instant::now();
    let should_throttle = matches!(
        state,
        ConnectionState::Error | ConnectionState::Reconnecting
    );

    if should_throttle
        && writable.last_state == Some(state)
        && writable.last_reason == *reason
        && writable
            .last_emit
            .map(|instant| {
                now.duration_since(instant) < Duration::from_millis(STATUS_ERROR_THROTTLE_MS)
            })
            .unwrap_or(false)
    {
        return false;
    }

    writable.last_state = Some(state);
    writable.last_reason = reason.clone();
    writable.last_emit = Some(now);
    true
}

async fn publish_status_throttled(
    context: &StreamRuntimeContext<'_>,
    state: ConnectionState,
    reason: Option<String>,
) {
    if !allow_status_publish(context.status_throttle, state, &reason) {
        return;
    }

    publish_status(
        context.status_store,
        context.bus,
        context.pipeline,
        state,
        &context.config.symbols,
        reason,
    )
    .await;
}

fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(6);
    let base_ms = 200_u64.saturating_mul(1_u64 << exponent);
    let jitter_ms = (now_unix_ms().unsigned_abs() % 250).min(249);
    Duration::from_millis((base_ms + jitter_ms).min(5_000))
}

fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::registry::SymbolRegistry;
    use crate::chart::types::FeedArgs;
    use crate::chart::window::DedupPolicy;

    fn test_context_parts() -> (
        FeedConfig,
        Arc<Mutex<IngestPipeline>>,
        Arc<RwLock<FeedStatusSnapshot>>,
        Arc<Mutex<StatusPublishThrottle>>,
        ChartBus,
    ) {
        let config = FeedArgs::default()
            .normalize()
            .expect("default args should normalize");
        let registry = SymbolRegistry::new(&config.symbols, DedupPolicy::LabelOnly);
        let bus = ChartBus::new();
        let pipeline = Arc::new(Mutex::new(IngestPipeline::new(registry, bus.clone())));
        let status_store = Arc::new(RwLock::new(FeedStatusSnapshot::stopped(
            config.symbols.clone(),
            None,
        )));
        let throttle = Arc::new(Mutex::new(StatusPublishThrottle::default()));
        (config, pipeline, status_store, throttle, bus)
    }

    #[test]
    fn reconnect_delay_is_bounded_and_grows() {
        let first = reconnect_delay(1);
        let sixth = reconnect_delay(6);
        let huge = reconnect_delay(60);

        assert!(first >= Duration::from_millis(400));
        assert!(sixth >= first);
        assert!(huge <= Duration::from_millis(5_000));
    }

    #[test]
    fn throttle_suppresses_repeated_error_publish() {
        let throttle = Arc::new(Mutex::new(StatusPublishThrottle::default()));
        let reason = Some("websocket connect error: refused".to_string());

        assert!(allow_status_publish(
            &throttle,
            ConnectionState::Reconnecting,
            &reason
        ));
        assert!(!allow_status_publish(
            &throttle,
            ConnectionState::Reconnecting,
            &reason
        ));
    }

    #[test]
    fn throttle_lets_state_changes_through() {
        let throttle = Arc::new(Mutex::new(StatusPublishThrottle::default()));
        let reason = Some("websocket frame error: reset".to_string());

        assert!(allow_status_publish(
            &throttle,
            ConnectionState::Reconnecting,
            &reason
        ));
        assert!(allow_status_publish(
            &throttle,
            ConnectionState::Live,
            &Some("websocket connected".to_string())
        ));
    }

    #[test]
    fn throttle_never_applies_to_live_state() {
        let throttle = Arc::new(Mutex::new(StatusPublishThrottle::default()));
        let reason = Some("websocket connected".to_string());

        assert!(allow_status_publish(&throttle, ConnectionState::Live, &reason));
        assert!(allow_status_publish(&throttle, ConnectionState::Live, &reason));
    }

    #[tokio::test]
    async fn text_message_routes_into_the_window() {
        let (config, pipeline, status_store, throttle, bus) = test_context_parts();
        let context = StreamRuntimeContext {
            config: &config,
            pipeline: &pipeline,
            status_store: &status_store,
            status_throttle: &throttle,
            bus: &bus,
        };

        let payload =
            r#"{"symbol":"BTC-USD","timestamp":"2024-01-01 10:00:00","price":42000}"#.to_string();
        let directive = handle_message(Message::Text(payload), &context).await;

        assert!(matches!(directive, StreamDirective::Continue));
        let pipeline = pipeline.lock();
        assert_eq!(pipeline.totals().accepted, 1);
        assert_eq!(
            pipeline
                .registry()
                .window("BTC-USD")
                .map(|window| window.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn undecodable_message_is_counted_not_fatal() {
        let (config, pipeline, status_store, throttle, bus) = test_context_parts();
        let context = StreamRuntimeContext {
            config: &config,
            pipeline: &pipeline,
            status_store: &status_store,
            status_throttle: &throttle,
            bus: &bus,
        };

        let directive = handle_message(Message::Text("not json".to_string()), &context).await;
        assert!(matches!(directive, StreamDirective::Continue));
        assert_eq!(pipeline.lock().totals().rejected, 1);
    }

    #[tokio::test]
    async fn close_frame_requests_immediate_reconnect() {
        let (config, pipeline, status_store, throttle, bus) = test_context_parts();
        let context = StreamRuntimeContext {
            config: &config,
            pipeline: &pipeline,
            status_store: &status_store,
            status_throttle: &throttle,
            bus: &bus,
        };

        let directive = handle_message(Message::Close(None), &context).await;
        assert!(matches!(directive, StreamDirective::ImmediateReconnect));
    }
}
