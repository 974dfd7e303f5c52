//! Paper-trading statistics and the pre-live readiness checklist.
//!
//! Tracks each order's lifecycle timestamps so the checklist can answer
//! the only question that matters before flipping to live: has this system
//! run long enough, cleanly enough, to be trusted with real money.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

// Checklist thresholds.
const MIN_ORDERS_SIMULATED: usize = 200;
const MIN_ORDERS_SUBMITTED: usize = 50;
const MAX_UNINTENDED_ORDERS: usize = 0;
const MAX_REJECT_RATE: f64 = 0.20;
const MIN_RECONCILIATION_STREAK_DAYS: u32 = 30;

// ---------------------------------------------------------------------------
// Per-order record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleOutcome {
    Pending,
    Filled,
    RiskRejected,
    ApprovalDenied,
    BrokerRejected,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub proposed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulated_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<f64>,
    pub outcome: LifecycleOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_detail: Option<String>,
}

impl OrderRecord {
    /// Submission-to-fill latency in seconds.
    pub fn latency_seconds(&self) -> Option<f64> {
        match (self.submitted_at, self.filled_at) {
            (Some(s), Some(f)) => Some((f - s).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }

    /// 0..=1 where 1 means the simulator predicted the fill price exactly.
    pub fn simulator_accuracy(&self) -> Option<f64> {
        match (self.simulated_price, self.fill_price) {
            (Some(sim), Some(fill)) if sim > 0.0 => {
                Some((1.0 - ((fill - sim).abs() / sim)).max(0.0))
            }
            _ => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(
            self.outcome,
            LifecycleOutcome::RiskRejected
                | LifecycleOutcome::ApprovalDenied
                | LifecycleOutcome::BrokerRejected
        )
    }
}

// ---------------------------------------------------------------------------
// Summary / checklist
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_orders: usize,
    pub orders_simulated: usize,
    pub orders_submitted: usize,
    pub orders_filled: usize,
    pub orders_rejected: usize,
    pub success_rate: f64,
    pub reject_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_simulator_accuracy: Option<f64>,
    pub unintended_orders: usize,
    pub reconciliation_streak_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreLiveStatus {
    pub ready_for_live: bool,
    pub checks_passed: usize,
    pub checks_total: usize,
    pub orders_simulated_ok: bool,
    pub orders_submitted_ok: bool,
    pub unintended_orders_ok: bool,
    pub reject_rate_ok: bool,
    pub reconciliation_ok: bool,
    pub blocking_issues: Vec<String>,
}

// ---------------------------------------------------------------------------
// StatisticsCollector
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    orders: HashMap<String, OrderRecord>,
    unintended_orders: usize,
    reconciliation_streak_days: u32,
}

/// In-memory statistics with optional JSON snapshot persistence for
/// cross-restart continuity.
pub struct StatisticsCollector {
    state: Mutex<State>,
    snapshot_path: Option<PathBuf>,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            snapshot_path: None,
        }
    }

    /// Load from `path` if it exists; subsequent mutations snapshot back.
    pub fn with_snapshot(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(error = %e, "corrupt statistics snapshot; starting fresh");
                State::default()
            }),
            Err(_) => State::default(),
        };
        Self {
            state: Mutex::new(state),
            snapshot_path: Some(path),
        }
    }

    pub fn record_proposed(
        &self,
        order_id: &str,
        symbol: &str,
        side: &str,
        at: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().expect("stats lock poisoned");
        state
            .orders
            .entry(order_id.to_string())
            .or_insert_with(|| OrderRecord {
                order_id: order_id.to_string(),
                symbol: symbol.to_string(),
                side: side.to_string(),
                proposed_at: at,
                simulated_at: None,
                simulated_price: None,
                submitted_at: None,
                filled_at: None,
                fill_price: None,
                outcome: LifecycleOutcome::Pending,
                rejection_detail: None,
            });
        self.snapshot(&state);
    }

    pub fn record_simulated(&self, order_id: &str, simulated_price: f64, at: DateTime<Utc>) {
        let mut state = self.state.lock().expect("stats lock poisoned");
        if let Some(rec) = state.orders.get_mut(order_id) {
            rec.simulated_at = Some(at);
            rec.simulated_price = Some(simulated_price);
        }
        self.snapshot(&state);
    }

    pub fn record_submitted(&self, order_id: &str, at: DateTime<Utc>) {
        let mut state = self.state.lock().expect("stats lock poisoned");
        if let Some(rec) = state.orders.get_mut(order_id) {
            rec.submitted_at = Some(at);
        }
        self.snapshot(&state);
    }

    pub fn record_filled(&self, order_id: &str, fill_price: f64, at: DateTime<Utc>) {
        let mut state = self.state.lock().expect("stats lock poisoned");
        if let Some(rec) = state.orders.get_mut(order_id) {
            rec.filled_at = Some(at);
            rec.fill_price = Some(fill_price);
            rec.outcome = LifecycleOutcome::Filled;
        }
        self.snapshot(&state);
    }

    pub fn record_rejected(&self, order_id: &str, outcome: LifecycleOutcome, detail: &str) {
        let mut state = self.state.lock().expect("stats lock poisoned");
        if let Some(rec) = state.orders.get_mut(order_id) {
            rec.outcome = outcome;
            rec.rejection_detail = Some(detail.to_string());
        }
        self.snapshot(&state);
    }

    /// An order the system cannot account for: the checklist's hard zero.
    pub fn record_unintended_order(&self) {
        let mut state = self.state.lock().expect("stats lock poisoned");
        state.unintended_orders += 1;
        self.snapshot(&state);
    }

    pub fn set_reconciliation_streak_days(&self, days: u32) {
        let mut state = self.state.lock().expect("stats lock poisoned");
        state.reconciliation_streak_days = days;
        self.snapshot(&state);
    }

    pub fn summary(&self) -> StatsSummary {
        let state = self.state.lock().expect("stats lock poisoned");
        let total = state.orders.len();
        let simulated = state
            .orders
            .values()
            .filter(|o| o.simulated_at.is_some())
            .count();
        let submitted = state
            .orders
            .values()
            .filter(|o| o.submitted_at.is_some())
            .count();
        let filled = state
            .orders
            .values()
            .filter(|o| o.outcome == LifecycleOutcome::Filled)
            .count();
        let rejected = state.orders.values().filter(|o| o.is_rejected()).count();

        let latencies: Vec<f64> = state
            .orders
            .values()
            .filter_map(OrderRecord::latency_seconds)
            .collect();
        let accuracies: Vec<f64> = state
            .orders
            .values()
            .filter_map(OrderRecord::simulator_accuracy)
            .collect();

        StatsSummary {
            total_orders: total,
            orders_simulated: simulated,
            orders_submitted: submitted,
            orders_filled: filled,
            orders_rejected: rejected,
            success_rate: ratio(filled, submitted),
            reject_rate: ratio(rejected, total),
            avg_latency_seconds: mean(&latencies),
            avg_simulator_accuracy: mean(&accuracies),
            unintended_orders: state.unintended_orders,
            reconciliation_streak_days: state.reconciliation_streak_days,
        }
    }

    /// Evaluate the five-point readiness checklist.
    pub fn pre_live_status(&self) -> PreLiveStatus {
        let summary = self.summary();
        let mut blocking = Vec::new();

        let simulated_ok = summary.orders_simulated >= MIN_ORDERS_SIMULATED;
        if !simulated_ok {
            blocking.push(format!(
                "only {} orders simulated; need {MIN_ORDERS_SIMULATED}",
                summary.orders_simulated
            ));
        }
        let submitted_ok = summary.orders_submitted >= MIN_ORDERS_SUBMITTED;
        if !submitted_ok {
            blocking.push(format!(
                "only {} orders submitted; need {MIN_ORDERS_SUBMITTED}",
                summary.orders_submitted
            ));
        }
        let unintended_ok = summary.unintended_orders <= MAX_UNINTENDED_ORDERS;
        if !unintended_ok {
            blocking.push(format!(
                "{} unintended orders recorded; must be zero",
                summary.unintended_orders
            ));
        }
        let reject_ok = summary.reject_rate < MAX_REJECT_RATE;
        if !reject_ok {
            blocking.push(format!(
                "reject rate {:.1}% at or above {:.0}% threshold",
                summary.reject_rate * 100.0,
                MAX_REJECT_RATE * 100.0
            ));
        }
        let reconciliation_ok =
            summary.reconciliation_streak_days >= MIN_RECONCILIATION_STREAK_DAYS;
        if !reconciliation_ok {
            blocking.push(format!(
                "reconciliation streak {} days; need {MIN_RECONCILIATION_STREAK_DAYS}",
                summary.reconciliation_streak_days
            ));
        }

        let checks = [
            simulated_ok,
            submitted_ok,
            unintended_ok,
            reject_ok,
            reconciliation_ok,
        ];
        PreLiveStatus {
            ready_for_live: checks.iter().all(|c| *c),
            checks_passed: checks.iter().filter(|c| **c).count(),
            checks_total: checks.len(),
            orders_simulated_ok: simulated_ok,
            orders_submitted_ok: submitted_ok,
            unintended_orders_ok: unintended_ok,
            reject_rate_ok: reject_ok,
            reconciliation_ok,
            blocking_issues: blocking,
        }
    }

    /// Force a snapshot write (normally done on every mutation).
    pub fn save(&self) -> Result<()> {
        let state = self.state.lock().expect("stats lock poisoned");
        if let Some(path) = &self.snapshot_path {
            write_snapshot(path, &state)?;
        }
        Ok(())
    }

    fn snapshot(&self, state: &State) {
        if let Some(path) = &self.snapshot_path {
            if let Err(e) = write_snapshot(path, state) {
                warn!(error = %e, "failed to write statistics snapshot");
            }
        }
    }
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn write_snapshot(path: &Path, state: &State) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create snapshot dir")?;
    }
    let json = serde_json::to_string_pretty(state).context("serialize statistics")?;
    std::fs::write(path, json).context("write statistics snapshot")?;
    Ok(())
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn drive_filled_order(stats: &StatisticsCollector, id: &str, now: DateTime<Utc>) {
        stats.record_proposed(id, "AAPL", "BUY", now);
        stats.record_simulated(id, 150.0, now);
        stats.record_submitted(id, now + Duration::seconds(1));
        stats.record_filled(id, 150.5, now + Duration::seconds(3));
    }

    #[test]
    fn summary_tracks_rates_latency_and_accuracy() {
        let stats = StatisticsCollector::new();
        let now = Utc::now();
        drive_filled_order(&stats, "o1", now);
        stats.record_proposed("o2", "TSLA", "BUY", now);
        stats.record_simulated("o2", 300.0, now);
        stats.record_rejected("o2", LifecycleOutcome::RiskRejected, "R1");

        let summary = stats.summary();
        assert_eq!(summary.total_orders, 2);
        assert_eq!(summary.orders_simulated, 2);
        assert_eq!(summary.orders_submitted, 1);
        assert_eq!(summary.orders_filled, 1);
        assert_eq!(summary.orders_rejected, 1);
        assert_eq!(summary.success_rate, 1.0);
        assert_eq!(summary.reject_rate, 0.5);
        assert_eq!(summary.avg_latency_seconds, Some(2.0));
        let accuracy = summary.avg_simulator_accuracy.unwrap();
        assert!(accuracy > 0.99 && accuracy < 1.0);
    }

    #[test]
    fn checklist_blocks_until_all_thresholds_met() {
        let stats = StatisticsCollector::new();
        let status = stats.pre_live_status();
        assert!(!status.ready_for_live);
        assert!(status.blocking_issues.len() >= 3);
        assert!(!status.orders_simulated_ok);
        assert!(status.unintended_orders_ok, "zero unintended is fine");
    }

    #[test]
    fn checklist_passes_with_sufficient_clean_history() {
        let stats = StatisticsCollector::new();
        let now = Utc::now();
        for i in 0..MIN_ORDERS_SIMULATED {
            drive_filled_order(&stats, &format!("o{i}"), now);
        }
        stats.set_reconciliation_streak_days(30);

        let status = stats.pre_live_status();
        assert!(status.ready_for_live, "{:?}", status.blocking_issues);
        assert_eq!(status.checks_passed, status.checks_total);
    }

    #[test]
    fn unintended_order_is_always_blocking() {
        let stats = StatisticsCollector::new();
        let now = Utc::now();
        for i in 0..MIN_ORDERS_SIMULATED {
            drive_filled_order(&stats, &format!("o{i}"), now);
        }
        stats.set_reconciliation_streak_days(30);
        stats.record_unintended_order();

        let status = stats.pre_live_status();
        assert!(!status.ready_for_live);
        assert!(status
            .blocking_issues
            .iter()
            .any(|b| b.contains("unintended")));
    }

    #[test]
    fn snapshot_round_trips_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statistics.json");
        let now = Utc::now();
        {
            let stats = StatisticsCollector::with_snapshot(&path);
            drive_filled_order(&stats, "o1", now);
            stats.set_reconciliation_streak_days(12);
        }
        let stats = StatisticsCollector::with_snapshot(&path);
        let summary = stats.summary();
        assert_eq!(summary.total_orders, 1);
        assert_eq!(summary.orders_filled, 1);
        assert_eq!(summary.reconciliation_streak_days, 12);
    }

    #[test]
    fn corrupt_snapshot_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statistics.json");
        std::fs::write(&path, "{ nope").unwrap();
        let stats = StatisticsCollector::with_snapshot(&path);
        assert_eq!(stats.summary().total_orders, 0);
    }
}
