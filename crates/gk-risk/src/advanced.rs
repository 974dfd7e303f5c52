//! Advanced rules R9–R12: volatility-aware sizing, correlation exposure,
//! drawdown halt, and time-of-day restrictions.
//!
//! Active only when an advanced policy block is configured. R9 additionally
//! requires volatility metrics on the call; without them it records a skip
//! metric and passes.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gk_schemas::{OrderIntent, Portfolio};
use gk_sim::SimulationResult;

use crate::format::{usd, usd_whole};
use crate::types::{hhmm, MetricValue, Metrics, RuleId};

// ---------------------------------------------------------------------------
// VolatilityMetrics
// ---------------------------------------------------------------------------

/// Volatility inputs for R9. All figures are annualized fractions
/// (0.20 = 20%).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VolatilityMetrics {
    pub symbol_volatility: Option<f64>,
    pub market_volatility: Option<f64>,
    pub beta: Option<f64>,
}

impl VolatilityMetrics {
    pub fn symbol(vol: f64) -> Self {
        Self {
            symbol_volatility: Some(vol),
            ..Default::default()
        }
    }

    /// Symbol-specific volatility when available, else `beta × market_vol`.
    pub fn effective_volatility(&self) -> Option<f64> {
        if let Some(v) = self.symbol_volatility {
            return Some(v);
        }
        match (self.beta, self.market_volatility) {
            (Some(beta), Some(market)) => Some(beta * market),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AdvancedRiskLimits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedRiskLimits {
    // R9
    /// Maximum volatility contribution per position, as a fraction of
    /// portfolio value (0.02 = 2%).
    pub max_position_volatility: f64,
    pub volatility_scaling_enabled: bool,
    pub min_position_size: Decimal,
    pub max_position_size: Decimal,

    // R10
    pub max_correlated_exposure_pct: f64,
    pub correlation_threshold: f64,
    pub correlation_enabled: bool,

    // R11
    pub max_drawdown_pct: Decimal,
    pub enable_drawdown_halt: bool,

    // R12
    pub avoid_market_open_minutes: i64,
    pub avoid_market_close_minutes: i64,
    pub enable_time_restrictions: bool,
    #[serde(with = "hhmm")]
    pub market_open_utc: NaiveTime,
    #[serde(with = "hhmm")]
    pub market_close_utc: NaiveTime,
}

impl Default for AdvancedRiskLimits {
    fn default() -> Self {
        Self {
            max_position_volatility: 0.02,
            volatility_scaling_enabled: true,
            min_position_size: Decimal::ONE_HUNDRED,
            max_position_size: Decimal::new(50_000, 0),
            max_correlated_exposure_pct: 30.0,
            correlation_threshold: 0.7,
            correlation_enabled: false,
            max_drawdown_pct: Decimal::new(100, 1),
            enable_drawdown_halt: true,
            avoid_market_open_minutes: 10,
            avoid_market_close_minutes: 10,
            enable_time_restrictions: true,
            market_open_utc: NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
            market_close_utc: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
        }
    }
}

// ---------------------------------------------------------------------------
// AdvancedRiskEngine
// ---------------------------------------------------------------------------

/// Outcome of one advanced evaluation pass, merged by the caller into the
/// overall decision.
#[derive(Debug, Clone, Default)]
pub(crate) struct AdvancedOutcome {
    pub violated: Vec<RuleId>,
    pub phrases: Vec<String>,
    pub warnings: Vec<String>,
    pub metrics: Metrics,
}

/// Stateless evaluator for R9–R12. The portfolio high-water mark is an
/// explicit input owned by the caller; this engine never mutates it.
#[derive(Debug, Clone)]
pub struct AdvancedRiskEngine {
    limits: AdvancedRiskLimits,
    high_water_mark: Option<Decimal>,
}

impl AdvancedRiskEngine {
    pub fn new(limits: AdvancedRiskLimits, high_water_mark: Option<Decimal>) -> Self {
        Self {
            limits,
            high_water_mark,
        }
    }

    pub fn limits(&self) -> &AdvancedRiskLimits {
        &self.limits
    }

    pub(crate) fn evaluate(
        &self,
        _intent: &OrderIntent,
        portfolio: &Portfolio,
        simulation: &SimulationResult,
        volatility: Option<&VolatilityMetrics>,
        now: DateTime<Utc>,
    ) -> AdvancedOutcome {
        let mut out = AdvancedOutcome::default();

        // R9: volatility-adjusted sizing.
        if self.limits.volatility_scaling_enabled {
            if let Some(vol) = volatility {
                self.check_volatility_sizing(portfolio, simulation, vol, &mut out);
            }
        }

        // R10: correlation exposure. Needs a correlation matrix; without one
        // the rule records a skip and never violates.
        if self.limits.correlation_enabled {
            out.metrics
                .insert("correlation_data_available".into(), MetricValue::Bool(false));
        }

        // R11: drawdown halt.
        if self.limits.enable_drawdown_halt {
            self.check_drawdown(portfolio, &mut out);
        }

        // R12: time-of-day restrictions.
        if self.limits.enable_time_restrictions {
            self.check_time_restrictions(now, &mut out);
        }

        // Approve-path advisory.
        if out.violated.is_empty() {
            if let Some(effective) = volatility.and_then(|v| v.effective_volatility()) {
                if effective > 0.30 {
                    out.warnings.push(format!(
                        "High volatility detected ({:.1}% annual) - consider reduced size",
                        effective * 100.0
                    ));
                }
            }
        }

        out
    }

    fn check_volatility_sizing(
        &self,
        portfolio: &Portfolio,
        simulation: &SimulationResult,
        volatility: &VolatilityMetrics,
        out: &mut AdvancedOutcome,
    ) {
        let effective_vol = match volatility.effective_volatility() {
            Some(v) => v,
            None => {
                out.metrics
                    .insert("volatility_available".into(), MetricValue::Bool(false));
                return;
            }
        };
        out.metrics
            .insert("symbol_volatility".into(), MetricValue::Float(effective_vol));

        let position_value = simulation.gross_notional.unwrap_or(Decimal::ZERO);
        let portfolio_value = portfolio.total_value;

        if portfolio_value <= Decimal::ZERO {
            out.violated.push(RuleId::R9);
            out.phrases
                .push("R9: Portfolio value invalid for volatility sizing".to_string());
            return;
        }

        // Absolute size bounds first.
        if position_value < self.limits.min_position_size {
            out.violated.push(RuleId::R9);
            out.phrases.push(format!(
                "R9: Position size {} below minimum {}",
                usd(position_value),
                usd(self.limits.min_position_size)
            ));
            return;
        }
        if position_value > self.limits.max_position_size {
            out.violated.push(RuleId::R9);
            out.phrases.push(format!(
                "R9: Position size {} exceeds maximum {}",
                usd(position_value),
                usd(self.limits.max_position_size)
            ));
            return;
        }

        // Position risk as % of portfolio: gross × vol / value × 100.
        let position_f = position_value.to_f64().unwrap_or(0.0);
        let portfolio_f = portfolio_value.to_f64().unwrap_or(f64::MAX);
        let position_risk_pct = position_f * effective_vol / portfolio_f * 100.0;
        out.metrics.insert(
            "position_risk_pct".into(),
            MetricValue::Float(position_risk_pct),
        );

        let max_risk_pct = self.limits.max_position_volatility * 100.0;
        if position_risk_pct > max_risk_pct {
            let suggested = portfolio_f * self.limits.max_position_volatility / effective_vol;
            out.metrics.insert(
                "suggested_position_size".into(),
                MetricValue::Float(suggested),
            );
            out.violated.push(RuleId::R9);
            out.phrases.push(format!(
                "R9: Position risk {position_risk_pct:.2}% exceeds limit {max_risk_pct:.2}%. \
                 Suggested max size: {}",
                usd_whole(Decimal::from_f64(suggested).unwrap_or(Decimal::ZERO))
            ));
        }
    }

    fn check_drawdown(&self, portfolio: &Portfolio, out: &mut AdvancedOutcome) {
        let current = portfolio.total_value;
        // High-water mark is monotone: max of what the caller has observed
        // and what we see now.
        let hwm = match self.high_water_mark {
            Some(h) => h.max(current),
            None => current,
        };
        out.metrics
            .insert("high_water_mark".into(), MetricValue::Decimal(hwm));

        if hwm <= Decimal::ZERO || current >= hwm {
            out.metrics
                .insert("drawdown_pct".into(), MetricValue::Decimal(Decimal::ZERO));
            return;
        }

        let drawdown_pct = (hwm - current) / hwm * Decimal::ONE_HUNDRED;
        out.metrics
            .insert("current_value".into(), MetricValue::Decimal(current));
        out.metrics
            .insert("drawdown_pct".into(), MetricValue::Decimal(drawdown_pct));

        if drawdown_pct > self.limits.max_drawdown_pct {
            out.violated.push(RuleId::R11);
            out.phrases.push(format!(
                "R11: Portfolio drawdown {drawdown_pct:.2}% exceeds limit {:.1}%. \
                 Trading halted until recovery.",
                self.limits.max_drawdown_pct
            ));
        }
    }

    fn check_time_restrictions(&self, now: DateTime<Utc>, out: &mut AdvancedOutcome) {
        let t = now.time();
        out.metrics.insert(
            "trade_time".into(),
            MetricValue::Text(t.format("%H:%M:%S").to_string()),
        );

        let open = self.limits.market_open_utc;
        let close = self.limits.market_close_utc;
        let open_avoid_end = open
            .overflowing_add_signed(Duration::minutes(self.limits.avoid_market_open_minutes))
            .0;
        let close_avoid_start = close
            .overflowing_sub_signed(Duration::minutes(self.limits.avoid_market_close_minutes))
            .0;

        if t >= open && t < open_avoid_end {
            let since_open = (t - open).num_minutes();
            out.violated.push(RuleId::R12);
            out.phrases.push(format!(
                "R12: Too close to market open ({since_open} min). Wait {} more minutes.",
                self.limits.avoid_market_open_minutes - since_open
            ));
            return;
        }

        if t >= close_avoid_start && t < close {
            let to_close = (close - t).num_minutes();
            out.violated.push(RuleId::R12);
            out.phrases.push(format!(
                "R12: Too close to market close ({to_close} min remaining). \
                 Trading restricted in final {} minutes.",
                self.limits.avoid_market_close_minutes
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gk_schemas::{Cash, Instrument, OrderSide, OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    fn portfolio(total: Decimal) -> Portfolio {
        Portfolio {
            account_id: "DU123456".to_string(),
            positions: Vec::new(),
            cash: vec![Cash {
                currency: "USD".to_string(),
                available: total,
                total,
            }],
            total_value: total,
            captured_at: Utc::now(),
        }
    }

    fn intent() -> OrderIntent {
        OrderIntent {
            account_id: "DU123456".to_string(),
            instrument: Instrument::stock("GME"),
            side: OrderSide::Buy,
            quantity: dec!(100),
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            reason: "Momentum entry after volatility screen".to_string(),
            strategy_tag: "vol_entry_v2".to_string(),
            constraints: None,
        }
    }

    fn sim_with_gross(gross: Decimal) -> SimulationResult {
        SimulationResult {
            status: gk_sim::SimStatus::Success,
            gross_notional: Some(gross),
            ..Default::default()
        }
    }

    fn midday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 16, 17, 0, 0).unwrap()
    }

    fn engine() -> AdvancedRiskEngine {
        AdvancedRiskEngine::new(AdvancedRiskLimits::default(), None)
    }

    #[test]
    fn r9_rejects_high_volatility_position_with_suggested_size() {
        // Portfolio 100k, gross 30k, vol 0.50, budget 0.02:
        // risk = 30_000 × 0.50 / 100_000 × 100 = 15% > 2%
        // suggested = 100_000 × 0.02 / 0.50 = 4_000
        let out = engine().evaluate(
            &intent(),
            &portfolio(dec!(100000)),
            &sim_with_gross(dec!(30000)),
            Some(&VolatilityMetrics::symbol(0.50)),
            midday(),
        );
        assert_eq!(out.violated, vec![RuleId::R9]);
        let phrase = &out.phrases[0];
        assert!(phrase.contains("Position risk 15.00% exceeds limit 2.00%"), "{phrase}");
        assert!(phrase.contains("Suggested max size: $4,000"), "{phrase}");
        match out.metrics.get("suggested_position_size") {
            Some(MetricValue::Float(s)) => assert!((s - 4000.0).abs() < 1e-6),
            other => panic!("missing suggested size: {other:?}"),
        }
    }

    #[test]
    fn r9_uses_beta_times_market_vol_when_symbol_vol_absent() {
        let vol = VolatilityMetrics {
            symbol_volatility: None,
            market_volatility: Some(0.25),
            beta: Some(2.0),
        };
        assert_eq!(vol.effective_volatility(), Some(0.5));
    }

    #[test]
    fn r9_skips_without_volatility_data() {
        let vol = VolatilityMetrics::default();
        let out = engine().evaluate(
            &intent(),
            &portfolio(dec!(100000)),
            &sim_with_gross(dec!(30000)),
            Some(&vol),
            midday(),
        );
        assert!(out.violated.is_empty());
        assert_eq!(
            out.metrics.get("volatility_available"),
            Some(&MetricValue::Bool(false))
        );
    }

    #[test]
    fn r9_enforces_absolute_size_bounds_first() {
        let out = engine().evaluate(
            &intent(),
            &portfolio(dec!(100000)),
            &sim_with_gross(dec!(50)),
            Some(&VolatilityMetrics::symbol(0.10)),
            midday(),
        );
        assert_eq!(out.violated, vec![RuleId::R9]);
        assert!(out.phrases[0].contains("below minimum"));

        let out = engine().evaluate(
            &intent(),
            &portfolio(dec!(10000000)),
            &sim_with_gross(dec!(60000)),
            Some(&VolatilityMetrics::symbol(0.01)),
            midday(),
        );
        assert_eq!(out.violated, vec![RuleId::R9]);
        assert!(out.phrases[0].contains("exceeds maximum"));
    }

    #[test]
    fn r11_rejects_beyond_drawdown_limit() {
        // HWM 100k, current 85k → 15% drawdown > 10% limit.
        let engine = AdvancedRiskEngine::new(AdvancedRiskLimits::default(), Some(dec!(100000)));
        let out = engine.evaluate(
            &intent(),
            &portfolio(dec!(85000)),
            &sim_with_gross(dec!(1000)),
            None,
            midday(),
        );
        assert_eq!(out.violated, vec![RuleId::R11]);
        assert!(out.phrases[0].contains("drawdown 15.00% exceeds limit 10.0%"));
    }

    #[test]
    fn r11_high_water_mark_is_max_of_observed_and_current() {
        let engine = AdvancedRiskEngine::new(AdvancedRiskLimits::default(), Some(dec!(90000)));
        let out = engine.evaluate(
            &intent(),
            &portfolio(dec!(100000)),
            &sim_with_gross(dec!(1000)),
            None,
            midday(),
        );
        assert!(out.violated.is_empty());
        assert_eq!(
            out.metrics.get("high_water_mark"),
            Some(&MetricValue::Decimal(dec!(100000)))
        );
        assert_eq!(
            out.metrics.get("drawdown_pct"),
            Some(&MetricValue::Decimal(Decimal::ZERO))
        );
    }

    #[test]
    fn r12_rejects_near_open_and_near_close() {
        // Open 14:30 + 10min window: 14:35 rejected.
        let near_open = Utc.with_ymd_and_hms(2025, 6, 16, 14, 35, 0).unwrap();
        let out = engine().evaluate(
            &intent(),
            &portfolio(dec!(100000)),
            &sim_with_gross(dec!(1000)),
            None,
            near_open,
        );
        assert_eq!(out.violated, vec![RuleId::R12]);
        assert!(out.phrases[0].contains("Too close to market open (5 min)"));

        // Close 21:00 − 10min window: 20:55 rejected.
        let near_close = Utc.with_ymd_and_hms(2025, 6, 16, 20, 55, 0).unwrap();
        let out = engine().evaluate(
            &intent(),
            &portfolio(dec!(100000)),
            &sim_with_gross(dec!(1000)),
            None,
            near_close,
        );
        assert_eq!(out.violated, vec![RuleId::R12]);
        assert!(out.phrases[0].contains("Too close to market close (5 min remaining)"));
    }

    #[test]
    fn r12_allows_exactly_at_window_end() {
        let at_window_end = Utc.with_ymd_and_hms(2025, 6, 16, 14, 40, 0).unwrap();
        let out = engine().evaluate(
            &intent(),
            &portfolio(dec!(100000)),
            &sim_with_gross(dec!(1000)),
            None,
            at_window_end,
        );
        assert!(out.violated.is_empty());
    }

    #[test]
    fn high_volatility_advisory_on_approve_path() {
        let out = engine().evaluate(
            &intent(),
            &portfolio(dec!(10000000)),
            &sim_with_gross(dec!(1000)),
            Some(&VolatilityMetrics::symbol(0.50)),
            midday(),
        );
        assert!(out.violated.is_empty());
        assert!(out
            .warnings
            .iter()
            .any(|w| w.contains("High volatility detected (50.0% annual)")));
    }
}
