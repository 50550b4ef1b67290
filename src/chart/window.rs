use crate::chart::types::DisplayPoint;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of points a chart window keeps on screen.
pub const WINDOW_CAPACITY: usize = 50;

/// Price tolerance used by [`DedupPolicy::LabelAndPrice`].
pub const PRICE_EPSILON: f64 = 0.01;

/// How an incoming point is compared against the window's last point.
///
/// Both variants only ever look at the most recent point, so a reconnect
/// replaying a single stale record is absorbed, but replays of more than one
/// record are not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Skip when the label matches the last point, regardless of price.
    #[default]
    LabelOnly,
    /// Skip only when the label matches and the price is within
    /// [`PRICE_EPSILON`] of the last point.
    LabelAndPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    Inserted,
    Skipped,
}

/// Bounded FIFO window of display points for one symbol.
///
/// Points are kept in arrival order; the window never holds more than
/// [`WINDOW_CAPACITY`] points after any mutation.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    points: VecDeque<DisplayPoint>,
    policy: DedupPolicy,
}

impl PriceWindow {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            points: VecDeque::with_capacity(WINDOW_CAPACITY + 1),
            policy,
        }
    }

    pub fn append(&mut self, point: DisplayPoint) -> AppendResult {
        if let Some(last) = self.points.back() {
            if self.is_duplicate(&point, last) {
                return AppendResult::Skipped;
            }
        }

        self.points.push_back(point);
        if self.points.len() > WINDOW_CAPACITY {
            self.points.pop_front();
        }
        AppendResult::Inserted
    }

    fn is_duplicate(&self, point: &DisplayPoint, last: &DisplayPoint) -> bool {
        if point.label != last.label {
            return false;
        }
        match self.policy {
            DedupPolicy::LabelOnly => true,
            DedupPolicy::LabelAndPrice => (point.price - last.price).abs() < PRICE_EPSILON,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Owned copy of the window contents, safe to hand out across later
    /// mutations.
    pub fn snapshot(&self) -> Vec<DisplayPoint> {
        self.points.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(label: &str, price: f64) -> DisplayPoint {
        DisplayPoint {
            label: label.to_string(),
            price,
        }
    }

    #[test]
    fn appends_in_arrival_order() {
        let mut window = PriceWindow::new(DedupPolicy::LabelOnly);
        assert_eq!(window.append(point("10:00:00", 1.0)), AppendResult::Inserted);
        assert_eq!(window.append(point("10:00:05", 2.0)), AppendResult::Inserted);
        assert_eq!(window.append(point("09:59:55", 3.0)), AppendResult::Inserted);

        let labels: Vec<String> = window.snapshot().into_iter().map(|p| p.label).collect();
        assert_eq!(labels, vec!["10:00:00", "10:00:05", "09:59:55"]);
    }

    #[test]
    fn skips_back_to_back_duplicate_label() {
        let mut window = PriceWindow::new(DedupPolicy::LabelOnly);
        assert_eq!(
            window.append(point("10:00:00", 42000.0)),
            AppendResult::Inserted
        );
        assert_eq!(
            window.append(point("10:00:00", 42500.0)),
            AppendResult::Skipped
        );
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn duplicate_check_only_looks_at_last_point() {
        let mut window = PriceWindow::new(DedupPolicy::LabelOnly);
        let _ = window.append(point("10:00:00", 1.0));
        let _ = window.append(point("10:00:05", 2.0));

        // Same label as the first point, but not the last: accepted.
        assert_eq!(window.append(point("10:00:00", 3.0)), AppendResult::Inserted);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn label_and_price_policy_admits_changed_price() {
        let mut window = PriceWindow::new(DedupPolicy::LabelAndPrice);
        let _ = window.append(point("10:00:00", 42000.0));

        assert_eq!(
            window.append(point("10:00:00", 42000.005)),
            AppendResult::Skipped
        );
        assert_eq!(
            window.append(point("10:00:00", 42000.02)),
            AppendResult::Inserted
        );
    }

    #[test]
    fn evicts_exactly_one_oldest_point_per_overflow_insert() {
        let mut window = PriceWindow::new(DedupPolicy::LabelOnly);
        for index in 0..51 {
            let outcome = window.append(point(&format!("10:00:{index:02}"), index as f64));
            assert_eq!(outcome, AppendResult::Inserted);
            assert!(window.len() <= WINDOW_CAPACITY);
        }

        let snapshot = window.snapshot();
        assert_eq!(snapshot.len(), WINDOW_CAPACITY);
        assert_eq!(snapshot[0].label, "10:00:01");
        assert_eq!(snapshot[WINDOW_CAPACITY - 1].label, "10:00:50");
    }

    #[test]
    fn skipped_append_causes_no_eviction() {
        let mut window = PriceWindow::new(DedupPolicy::LabelOnly);
        for index in 0..WINDOW_CAPACITY {
            let _ = window.append(point(&format!("10:00:{index:02}"), index as f64));
        }
        let before = window.snapshot();

        let outcome = window.append(point(&format!("10:00:{:02}", WINDOW_CAPACITY - 1), 99.0));
        assert_eq!(outcome, AppendResult::Skipped);
        assert_eq!(window.snapshot(), before);
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let mut window = PriceWindow::new(DedupPolicy::LabelOnly);
        let _ = window.append(point("10:00:00", 1.0));
        let snapshot = window.snapshot();

        let _ = window.append(point("10:00:05", 2.0));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(window.len(), 2);
    }
}
