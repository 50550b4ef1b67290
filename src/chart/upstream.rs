use crate::chart::types::ObservationWire;
use crate::error::FeedError;
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

pub type ObservationWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Observation payloads are tiny; keep frame limits tight.
const WS_MAX_MESSAGE_SIZE: usize = 1 << 20;
const WS_MAX_FRAME_SIZE: usize = 256 << 10;

pub async fn connect_observation_stream(endpoint: &str) -> Result<ObservationWsStream, FeedError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(WS_MAX_MESSAGE_SIZE),
        max_frame_size: Some(WS_MAX_FRAME_SIZE),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(endpoint, Some(ws_config), true).await?;
    Ok(stream)
}

/// One-shot historical fetch: a JSON array of observation records, oldest
/// first. The caller treats an error or an empty array as non-fatal.
pub async fn fetch_history(
    client: &Client,
    endpoint: &str,
) -> Result<Vec<ObservationWire>, FeedError> {
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<Vec<ObservationWire>>().await?;
    Ok(payload)
}
