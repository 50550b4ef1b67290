use crate::chart::types::Observation;
use crate::chart::window::{AppendResult, DedupPolicy, PriceWindow};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteResult {
    Routed(AppendResult),
    UnknownSymbol,
}

/// Fixed mapping from symbol to its chart window.
///
/// The symbol set is closed at construction; observations for symbols outside
/// the set are dropped without error.
#[derive(Debug)]
pub struct SymbolRegistry {
    symbols: Vec<String>,
    windows: HashMap<String, PriceWindow>,
}

impl SymbolRegistry {
    pub fn new(symbols: &[String], policy: DedupPolicy) -> Self {
        let windows = symbols
            .iter()
            .map(|symbol| (symbol.clone(), PriceWindow::new(policy)))
            .collect();

        Self {
            symbols: symbols.to_vec(),
            windows,
        }
    }

    /// Symbols in configuration order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn route(&mut self, observation: &Observation) -> RouteResult {
        match self.windows.get_mut(&observation.symbol) {
            Some(window) => RouteResult::Routed(window.append(observation.display_point())),
            None => RouteResult::UnknownSymbol,
        }
    }

    pub fn window(&self, symbol: &str) -> Option<&PriceWindow> {
        self.windows.get(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SymbolRegistry {
        let symbols = vec![
            "BTC-USD".to_string(),
            "DOGE-USD".to_string(),
            "SOL-USD".to_string(),
        ];
        SymbolRegistry::new(&symbols, DedupPolicy::LabelOnly)
    }

    fn observation(symbol: &str, timestamp: &str, price: f64) -> Observation {
        Observation {
            symbol: symbol.to_string(),
            timestamp: timestamp.to_string(),
            price,
        }
    }

    #[test]
    fn routes_known_symbol_into_its_window() {
        let mut registry = registry();
        let outcome = registry.route(&observation("BTC-USD", "2024-01-01 10:00:00", 42000.0));

        assert_eq!(outcome, RouteResult::Routed(AppendResult::Inserted));
        let window = registry.window("BTC-USD").expect("window should exist");
        assert_eq!(window.len(), 1);
        assert_eq!(window.snapshot()[0].label, "10:00:00");
    }

    #[test]
    fn unknown_symbol_is_dropped_without_mutation() {
        let mut registry = registry();
        let outcome = registry.route(&observation("ETH-USD", "2024-01-01 10:00:00", 2500.0));

        assert_eq!(outcome, RouteResult::UnknownSymbol);
        assert!(registry.window("ETH-USD").is_none());
        for symbol in ["BTC-USD", "DOGE-USD", "SOL-USD"] {
            assert!(registry
                .window(symbol)
                .expect("configured window should exist")
                .is_empty());
        }
    }

    #[test]
    fn routing_does_not_leak_across_symbols() {
        let mut registry = registry();
        let _ = registry.route(&observation("BTC-USD", "2024-01-01 10:00:00", 42000.0));
        let _ = registry.route(&observation("DOGE-USD", "2024-01-01 10:00:00", 0.08));

        assert_eq!(registry.window("BTC-USD").map(PriceWindow::len), Some(1));
        assert_eq!(registry.window("DOGE-USD").map(PriceWindow::len), Some(1));
        assert_eq!(registry.window("SOL-USD").map(PriceWindow::len), Some(0));
    }

    #[test]
    fn preserves_configured_symbol_order() {
        let registry = registry();
        assert_eq!(registry.symbols(), ["BTC-USD", "DOGE-USD", "SOL-USD"]);
    }
}
