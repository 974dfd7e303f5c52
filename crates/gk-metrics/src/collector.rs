use std::time::Instant;

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use tracing::warn;

/// Prometheus-format metrics for the order pipeline.
///
/// Each collector owns its own [`Registry`] (no process globals), so tests
/// and embedded instances never collide on metric names.
pub struct MetricsCollector {
    registry: Registry,
    proposal_total: IntCounterVec,
    risk_rejection_total: IntCounterVec,
    broker_error_total: IntCounter,
    daily_pnl_usd: Gauge,
    order_latency_seconds: HistogramVec,
    uptime_seconds: Gauge,
    started: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let registry = Registry::new();

        let proposal_total = IntCounterVec::new(
            Opts::new("gk_proposal_total", "Proposals by symbol and state"),
            &["symbol", "state"],
        )
        .expect("static metric definition");
        let risk_rejection_total = IntCounterVec::new(
            Opts::new("gk_risk_rejection_total", "Risk rejections by rule"),
            &["rule"],
        )
        .expect("static metric definition");
        let broker_error_total =
            IntCounter::new("gk_broker_error_total", "Broker adapter errors")
                .expect("static metric definition");
        let daily_pnl_usd = Gauge::new("gk_daily_pnl_usd", "Current daily P&L in USD")
            .expect("static metric definition");
        let order_latency_seconds = HistogramVec::new(
            HistogramOpts::new("gk_order_latency_seconds", "Order operation latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["operation"],
        )
        .expect("static metric definition");
        let uptime_seconds = Gauge::new("gk_uptime_seconds", "Process uptime in seconds")
            .expect("static metric definition");

        for collector in [
            Box::new(proposal_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(risk_rejection_total.clone()),
            Box::new(broker_error_total.clone()),
            Box::new(daily_pnl_usd.clone()),
            Box::new(order_latency_seconds.clone()),
            Box::new(uptime_seconds.clone()),
        ] {
            registry.register(collector).expect("unique metric names");
        }

        Self {
            registry,
            proposal_total,
            risk_rejection_total,
            broker_error_total,
            daily_pnl_usd,
            order_latency_seconds,
            uptime_seconds,
            started: Instant::now(),
        }
    }

    pub fn record_proposal(&self, symbol: &str, state: &str) {
        self.proposal_total.with_label_values(&[symbol, state]).inc();
    }

    pub fn record_risk_rejection(&self, rule: &str) {
        self.risk_rejection_total.with_label_values(&[rule]).inc();
    }

    pub fn record_broker_error(&self) {
        self.broker_error_total.inc();
    }

    pub fn set_daily_pnl(&self, pnl_usd: f64) {
        self.daily_pnl_usd.set(pnl_usd);
    }

    /// `operation` is `submission` or `fill`.
    pub fn observe_order_latency(&self, operation: &str, seconds: f64) {
        self.order_latency_seconds
            .with_label_values(&[operation])
            .observe(seconds);
    }

    /// Render the Prometheus text exposition format.
    pub fn export(&self) -> String {
        self.uptime_seconds.set(self.started.elapsed().as_secs_f64());
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
