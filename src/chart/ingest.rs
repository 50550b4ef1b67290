use crate::chart::registry::{RouteResult, SymbolRegistry};
use crate::chart::types::{ChartBootstrap, ChartEvent, Observation, ObservationWire, WindowUpdate};
use crate::chart::window::AppendResult;
use crate::error::FeedError;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

pub const CHART_BUS_CAPACITY: usize = 256;

/// Broadcast bus carrying chart events to whatever renders them.
///
/// Publishing never blocks and never fails: with no subscribers the event is
/// simply dropped, and slow subscribers observe lag on their receiver.
#[derive(Debug, Clone)]
pub struct ChartBus {
    sender: broadcast::Sender<ChartEvent>,
}

impl ChartBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHART_BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChartEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ChartEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for ChartBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub accepted: u64,
    pub skipped: u64,
    pub unknown: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Routed(AppendResult),
    UnknownSymbol,
    Rejected,
}

/// Routes raw observation records into the registry and publishes
/// window-changed events.
///
/// Both the backfill path and the live path go through this pipeline; nothing
/// else mutates a window.
#[derive(Debug)]
pub struct IngestPipeline {
    registry: SymbolRegistry,
    bus: ChartBus,
    totals: IngestSummary,
}

impl IngestPipeline {
    pub fn new(registry: SymbolRegistry, bus: ChartBus) -> Self {
        Self {
            registry,
            bus,
            totals: IngestSummary::default(),
        }
    }

    /// Ingests one live-stream record and, on an accepted insertion,
    /// immediately publishes the updated window.
    pub fn ingest_one(&mut self, wire: ObservationWire) -> IngestOutcome {
        let (outcome, inserted_symbol) = self.apply(wire);
        if let Some(symbol) = inserted_symbol {
            self.publish_window_update(&symbol);
        }
        outcome
    }

    /// Ingests a backfill batch in input order.
    ///
    /// Per-record notifications are coalesced: after the batch, one bootstrap
    /// snapshot is published per configured symbol.
    pub fn ingest_batch(&mut self, batch: Vec<ObservationWire>) -> IngestSummary {
        let before = self.totals;
        for wire in batch {
            let _ = self.apply(wire);
        }
        self.emit_bootstrap();

        IngestSummary {
            accepted: self.totals.accepted - before.accepted,
            skipped: self.totals.skipped - before.skipped,
            unknown: self.totals.unknown - before.unknown,
            rejected: self.totals.rejected - before.rejected,
        }
    }

    fn apply(&mut self, wire: ObservationWire) -> (IngestOutcome, Option<String>) {
        let observation = match Observation::try_from(wire) {
            Ok(observation) => observation,
            Err(error) => {
                self.totals.rejected += 1;
                debug!(%error, "rejected malformed observation");
                return (IngestOutcome::Rejected, None);
            }
        };

        match self.registry.route(&observation) {
            RouteResult::Routed(AppendResult::Inserted) => {
                self.totals.accepted += 1;
                (
                    IngestOutcome::Routed(AppendResult::Inserted),
                    Some(observation.symbol),
                )
            }
            RouteResult::Routed(AppendResult::Skipped) => {
                self.totals.skipped += 1;
                (IngestOutcome::Routed(AppendResult::Skipped), None)
            }
            RouteResult::UnknownSymbol => {
                self.totals.unknown += 1;
                debug!(symbol = %observation.symbol, "dropped observation for unknown symbol");
                (IngestOutcome::UnknownSymbol, None)
            }
        }
    }

    /// Counts a record that could not even be decoded from the wire.
    pub fn mark_rejected(&mut self, error: &FeedError) {
        self.totals.rejected += 1;
        debug!(%error, "rejected undecodable payload");
    }

    /// Publishes one bootstrap snapshot per configured symbol.
    pub fn emit_bootstrap(&self) {
        for symbol in self.registry.symbols() {
            let points = self
                .registry
                .window(symbol)
                .map(|window| window.snapshot())
                .unwrap_or_default();
            self.bus.publish(ChartEvent::ChartBootstrap(ChartBootstrap {
                symbol: symbol.clone(),
                points,
            }));
        }
    }

    fn publish_window_update(&self, symbol: &str) {
        if let Some(window) = self.registry.window(symbol) {
            self.bus.publish(ChartEvent::WindowUpdate(WindowUpdate {
                symbol: symbol.to_string(),
                points: window.snapshot(),
            }));
        }
    }

    /// Cumulative counters across all ingestion since construction.
    pub fn totals(&self) -> IngestSummary {
        self.totals
    }

    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }
}
