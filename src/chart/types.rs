use crate::chart::window::DedupPolicy;
use crate::error::FeedError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYMBOLS: [&str; 3] = ["BTC-USD", "DOGE-USD", "SOL-USD"];
pub const DEFAULT_HISTORY_URL: &str = "http://127.0.0.1:5000/api/data";
pub const DEFAULT_STREAM_URL: &str = "ws://127.0.0.1:5000/stream";
pub const DEFAULT_DEDUP_POLICY: DedupPolicy = DedupPolicy::LabelOnly;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 250;
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 60_000;
pub const MAX_SYMBOLS: usize = 16;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Live,
    Reconnecting,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatusSnapshot {
    pub state: ConnectionState,
    pub symbols: Vec<String>,
    pub accepted: u64,
    pub skipped: u64,
    pub unknown: u64,
    pub rejected: u64,
    pub reason: Option<String>,
}

impl FeedStatusSnapshot {
    pub fn stopped(symbols: Vec<String>, reason: Option<String>) -> Self {
        Self {
            state: ConnectionState::Stopped,
            symbols,
            accepted: 0,
            skipped: 0,
            unknown: 0,
            rejected: 0,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeedArgs {
    pub symbols: Option<Vec<String>>,
    pub history_url: Option<String>,
    pub stream_url: Option<String>,
    pub dedup_policy: Option<DedupPolicy>,
    pub heartbeat_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub symbols: Vec<String>,
    pub history_url: String,
    pub stream_url: String,
    pub dedup_policy: DedupPolicy,
    pub heartbeat_interval_ms: u64,
}

impl FeedArgs {
    pub fn normalize(self) -> Result<FeedConfig, FeedError> {
        let raw_symbols = self.symbols.unwrap_or_else(|| {
            DEFAULT_SYMBOLS
                .iter()
                .map(|symbol| (*symbol).to_string())
                .collect()
        });

        if raw_symbols.is_empty() || raw_symbols.len() > MAX_SYMBOLS {
            return Err(FeedError::InvalidArgument(format!(
                "symbols must list between 1 and {MAX_SYMBOLS} entries"
            )));
        }

        let mut symbols = Vec::with_capacity(raw_symbols.len());
        for raw in raw_symbols {
            let symbol = raw.trim().to_ascii_uppercase();
            if symbol.is_empty()
                || !symbol
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
            {
                return Err(FeedError::InvalidArgument(format!(
                    "symbol '{raw}' must be non-empty alphanumeric ASCII (dashes allowed)"
                )));
            }
            if symbols.contains(&symbol) {
                return Err(FeedError::InvalidArgument(format!(
                    "symbol '{symbol}' listed more than once"
                )));
            }
            symbols.push(symbol);
        }

        let history_url = self
            .history_url
            .unwrap_or_else(|| DEFAULT_HISTORY_URL.to_string());
        if !history_url.starts_with("http://") && !history_url.starts_with("https://") {
            return Err(FeedError::InvalidArgument(
                "historyUrl must use http:// or https://".to_string(),
            ));
        }

        let stream_url = self
            .stream_url
            .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string());
        if !stream_url.starts_with("ws://") && !stream_url.starts_with("wss://") {
            return Err(FeedError::InvalidArgument(
                "streamUrl must use ws:// or wss://".to_string(),
            ));
        }

        let dedup_policy = self.dedup_policy.unwrap_or(DEFAULT_DEDUP_POLICY);
        let heartbeat_interval_ms = self
            .heartbeat_interval_ms
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        if !(MIN_HEARTBEAT_INTERVAL_MS..=MAX_HEARTBEAT_INTERVAL_MS).contains(&heartbeat_interval_ms)
        {
            return Err(FeedError::InvalidArgument(format!(
                "heartbeatIntervalMs must be between {MIN_HEARTBEAT_INTERVAL_MS} and {MAX_HEARTBEAT_INTERVAL_MS}"
            )));
        }

        Ok(FeedConfig {
            symbols,
            history_url,
            stream_url,
            dedup_policy,
            heartbeat_interval_ms,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSession {
    pub running: bool,
    pub symbols: Vec<String>,
    pub history_url: String,
    pub stream_url: String,
    pub dedup_policy: DedupPolicy,
    pub heartbeat_interval_ms: u64,
}

impl FeedSession {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            running: true,
            symbols: config.symbols.clone(),
            history_url: config.history_url.clone(),
            stream_url: config.stream_url.clone(),
            dedup_policy: config.dedup_policy,
            heartbeat_interval_ms: config.heartbeat_interval_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStopResult {
    pub stopped: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct ObservationWire {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub price: Option<RawPrice>,
}

/// Tolerant price field: number, numeric string, or anything else (kept so a
/// single bad record cannot fail the whole array decode).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPrice {
    Number(f64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub symbol: String,
    pub timestamp: String,
    pub price: f64,
}

impl Observation {
    pub fn display_point(&self) -> DisplayPoint {
        DisplayPoint {
            label: time_label(&self.timestamp).to_string(),
            price: self.price,
        }
    }
}

impl TryFrom<ObservationWire> for Observation {
    type Error = FeedError;

    fn try_from(value: ObservationWire) -> Result<Self, Self::Error> {
        let symbol = value
            .symbol
            .filter(|symbol| !symbol.trim().is_empty())
            .ok_or_else(|| FeedError::MalformedObservation("missing symbol".to_string()))?;
        let timestamp = value
            .timestamp
            .filter(|timestamp| !timestamp.trim().is_empty())
            .ok_or_else(|| FeedError::MalformedObservation("missing timestamp".to_string()))?;

        let price = match value.price {
            Some(RawPrice::Number(price)) => price,
            Some(RawPrice::Text(text)) => text.trim().parse::<f64>()?,
            Some(RawPrice::Other(_)) => {
                return Err(FeedError::MalformedObservation(
                    "price is not numeric".to_string(),
                ))
            }
            None => {
                return Err(FeedError::MalformedObservation(
                    "missing price".to_string(),
                ))
            }
        };

        Ok(Self {
            symbol,
            timestamp,
            price,
        })
    }
}

/// Stored chart point: time-of-day label + price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayPoint {
    pub label: String,
    pub price: f64,
}

/// Extracts the time-of-day portion of a composite `date time` timestamp.
/// Falls back to the full timestamp when no space is present.
pub fn time_label(timestamp: &str) -> &str {
    match timestamp.split_once(' ') {
        Some((_, time)) => time,
        None => timestamp,
    }
}

pub fn parse_observation_wire(payload: &mut [u8]) -> Result<ObservationWire, FeedError> {
    let wire: ObservationWire = simd_json::serde::from_slice(payload)?;
    Ok(wire)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WindowUpdate {
    pub symbol: String,
    pub points: Vec<DisplayPoint>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartBootstrap {
    pub symbol: String,
    pub points: Vec<DisplayPoint>,
}

/// Renderer-facing event published on the chart bus.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ChartEvent {
    ChartBootstrap(ChartBootstrap),
    WindowUpdate(WindowUpdate),
    FeedStatus(FeedStatusSnapshot),
}
