pub mod chart;
pub mod error;
pub mod state;

pub use chart::ingest::{ChartBus, IngestOutcome, IngestPipeline, IngestSummary};
pub use chart::registry::{RouteResult, SymbolRegistry};
pub use chart::types::{
    ChartBootstrap, ChartEvent, ConnectionState, DisplayPoint, FeedArgs, FeedConfig, FeedSession,
    FeedStatusSnapshot, FeedStopResult, Observation, ObservationWire, WindowUpdate,
};
pub use chart::window::{AppendResult, DedupPolicy, PriceWindow, WINDOW_CAPACITY};
pub use error::FeedError;
pub use state::{FeedHandle, FeedState};
