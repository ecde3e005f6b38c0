// ── Daily Token/Cost Tracker ─────────────────────────────────────────────
// Atomic per-day accumulation of token and cost accounting. All monetary
// amounts use fixed-precision arithmetic: cost is stored as integer
// micro-dollars so concurrent `record` calls from parallel scheduler
// workers never race on a float.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Budget warning thresholds, checked highest-first so only the crossed
/// threshold fires once per day.
const WARNING_THRESHOLDS: [u8; 3] = [90, 75, 50];

pub struct DailyTokenTracker {
    date: Mutex<String>,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_microdollars: AtomicU64,
    last_model: Mutex<String>,
    warnings_emitted: Mutex<Vec<u8>>,
}

impl Default for DailyTokenTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DailyTokenTracker {
    pub fn new() -> Self {
        DailyTokenTracker {
            date: Mutex::new(today()),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            cost_microdollars: AtomicU64::new(0),
            last_model: Mutex::new(String::from("unknown")),
            warnings_emitted: Mutex::new(Vec::new()),
        }
    }

    fn maybe_reset(&self) {
        let current = today();
        let mut date = self.date.lock();
        if *date != current {
            *date = current;
            self.input_tokens.store(0, Ordering::Relaxed);
            self.output_tokens.store(0, Ordering::Relaxed);
            self.cost_microdollars.store(0, Ordering::Relaxed);
            self.warnings_emitted.lock().clear();
        }
    }

    /// Records one iteration's usage. `cost` is a fixed-precision decimal
    /// (six fractional digits) expressed as an `f64` at this
    /// boundary and converted to integer micro-dollars for atomic storage.
    pub fn record(&self, model: &str, input_tokens: i64, output_tokens: i64, cost: f64) {
        self.maybe_reset();
        self.input_tokens.fetch_add(input_tokens.max(0) as u64, Ordering::Relaxed);
        self.output_tokens.fetch_add(output_tokens.max(0) as u64, Ordering::Relaxed);
        let micro = (cost.max(0.0) * 1_000_000.0).round() as u64;
        self.cost_microdollars.fetch_add(micro, Ordering::Relaxed);
        *self.last_model.lock() = model.to_string();
    }

    /// `(input_tokens, output_tokens, cost_usd)` for the current tracking day.
    pub fn spend(&self) -> (u64, u64, f64) {
        self.maybe_reset();
        let input = self.input_tokens.load(Ordering::Relaxed);
        let output = self.output_tokens.load(Ordering::Relaxed);
        let cost = self.cost_microdollars.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        (input, output, cost)
    }

    /// Returns the threshold percentage (50/75/90) the first time spend
    /// crosses it today; `None` once already emitted or still under 50%.
    pub fn check_budget_warning(&self, budget_usd: f64) -> Option<u8> {
        if budget_usd <= 0.0 {
            return None;
        }
        let (_, _, spent) = self.spend();
        let pct = ((spent / budget_usd) * 100.0) as u8;
        let mut emitted = self.warnings_emitted.lock();
        for threshold in WARNING_THRESHOLDS {
            if pct >= threshold && !emitted.contains(&threshold) {
                emitted.push(threshold);
                return Some(threshold);
            }
        }
        None
    }
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates_across_calls() {
        let tracker = DailyTokenTracker::new();
        tracker.record("gpt-4o-mini", 100, 50, 0.002);
        tracker.record("gpt-4o-mini", 200, 80, 0.004);
        let (input, output, cost) = tracker.spend();
        assert_eq!(input, 300);
        assert_eq!(output, 130);
        assert!((cost - 0.006).abs() < 1e-9);
    }

    #[test]
    fn budget_warning_fires_once_per_threshold() {
        let tracker = DailyTokenTracker::new();
        tracker.record("m", 0, 0, 0.55);
        assert_eq!(tracker.check_budget_warning(1.0), Some(50));
        assert_eq!(tracker.check_budget_warning(1.0), None);
        tracker.record("m", 0, 0, 0.30);
        assert_eq!(tracker.check_budget_warning(1.0), Some(75));
    }

    #[test]
    fn zero_budget_never_warns() {
        let tracker = DailyTokenTracker::new();
        tracker.record("m", 0, 0, 100.0);
        assert_eq!(tracker.check_budget_warning(0.0), None);
    }
}
