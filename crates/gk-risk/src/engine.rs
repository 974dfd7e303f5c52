use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use gk_schemas::{OrderIntent, OrderSide, Portfolio};
use gk_sim::SimulationResult;

use crate::advanced::{AdvancedRiskEngine, VolatilityMetrics};
use crate::format::usd;
use crate::types::{
    Decision, MetricValue, Metrics, RiskDecision, RiskLimits, RuleId, RulesEnabled, TradingHours,
};

const TEN_THOUSAND: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);
// Soft-warning threshold: metrics within 80% of a limit get flagged.
const WARN_FRACTION: Decimal = Decimal::from_parts(8, 0, 0, false, 1);

/// Deterministic risk gate.
///
/// Pure function of its construction parameters and `evaluate` arguments:
/// the daily trade count, daily P&L, and (for the advanced engine) the
/// portfolio high-water mark are explicit inputs owned by the caller, and
/// `current_time` is always passed in. Repeated calls with equal inputs
/// produce equal decisions and equal metric maps.
pub struct RiskEngine {
    limits: RiskLimits,
    trading_hours: TradingHours,
    rules_enabled: RulesEnabled,
    daily_trades_count: u32,
    daily_pnl: Decimal,
    advanced: Option<AdvancedRiskEngine>,
}

impl RiskEngine {
    pub fn new(
        limits: RiskLimits,
        trading_hours: TradingHours,
        rules_enabled: RulesEnabled,
        daily_trades_count: u32,
        daily_pnl: Decimal,
    ) -> Self {
        Self {
            limits,
            trading_hours,
            rules_enabled,
            daily_trades_count,
            daily_pnl,
            advanced: None,
        }
    }

    /// Compose the advanced engine (R9–R12) into this gate.
    pub fn with_advanced(mut self, advanced: AdvancedRiskEngine) -> Self {
        self.advanced = Some(advanced);
        self
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Evaluate all enabled rules against the given state.
    pub fn evaluate(
        &self,
        intent: &OrderIntent,
        portfolio: &Portfolio,
        simulation: &SimulationResult,
        volatility: Option<&VolatilityMetrics>,
        current_time: DateTime<Utc>,
    ) -> RiskDecision {
        // A failed simulation short-circuits everything.
        if !simulation.status.is_success() {
            return RiskDecision {
                decision: Decision::Reject,
                reason: format!(
                    "Simulation failed: {}",
                    simulation
                        .error_message
                        .as_deref()
                        .unwrap_or("unknown error")
                ),
                violated_rules: vec![RuleId::SimulationFailed],
                warnings: Vec::new(),
                metrics: Metrics::new(),
            };
        }

        let mut violated: Vec<RuleId> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut metrics = Metrics::new();

        let gross_notional = simulation.gross_notional.unwrap_or(Decimal::ZERO);

        // R1: maximum gross notional per order. Exactly at the limit passes.
        if self.rules_enabled.r1 {
            metrics.insert("gross_notional".into(), MetricValue::Decimal(gross_notional));
            if gross_notional > self.limits.max_notional {
                violated.push(RuleId::R1);
            }
        }

        // R2: post-trade position value as % of portfolio, per symbol.
        if self.rules_enabled.r2 && portfolio.total_value > Decimal::ZERO {
            let current_position = portfolio.position_value(&intent.instrument.symbol);
            let position_after = match intent.side {
                OrderSide::Buy => current_position + gross_notional,
                OrderSide::Sell => current_position - gross_notional,
            };
            let position_pct = position_after / portfolio.total_value * Decimal::ONE_HUNDRED;
            metrics.insert("position_pct".into(), MetricValue::Decimal(position_pct));
            if position_pct > self.limits.max_position_pct {
                violated.push(RuleId::R2);
            }
        }

        // R3: sector exposure. No sector data source is wired; the rule
        // records the skip and never violates.
        if self.rules_enabled.r3 {
            metrics.insert("sector_data_available".into(), MetricValue::Bool(false));
        }

        // R4: slippage in basis points over gross notional.
        if self.rules_enabled.r4 {
            if let Some(slippage) = simulation.estimated_slippage {
                if slippage > Decimal::ZERO && gross_notional > Decimal::ZERO {
                    let slippage_bps = slippage / gross_notional * TEN_THOUSAND;
                    metrics.insert("slippage_bps".into(), MetricValue::Decimal(slippage_bps));
                    if slippage_bps > Decimal::from(self.limits.max_slippage_bps) {
                        violated.push(RuleId::R4);
                    }
                }
            }
        }

        // R5: trading hours. The open boundary itself is tradable.
        if self.rules_enabled.r5 && !self.is_market_open(current_time) {
            violated.push(RuleId::R5);
        }

        // R6: minimum daily volume. Same skip treatment as R3.
        if self.rules_enabled.r6 {
            metrics.insert("daily_volume_available".into(), MetricValue::Bool(false));
        }

        // R7: daily trade count.
        if self.rules_enabled.r7 {
            metrics.insert(
                "daily_trades_count".into(),
                MetricValue::Int(self.daily_trades_count as i64),
            );
            if self.daily_trades_count >= self.limits.max_daily_trades {
                violated.push(RuleId::R7);
            }
        }

        // R8: daily loss floor.
        if self.rules_enabled.r8 {
            metrics.insert("daily_pnl".into(), MetricValue::Decimal(self.daily_pnl));
            if self.daily_pnl < -self.limits.max_daily_loss {
                violated.push(RuleId::R8);
            }
        }

        let mut phrases = self.rejection_phrases(&violated, &metrics);

        // Advanced rules, merged in the same style.
        if let Some(advanced) = &self.advanced {
            let outcome = advanced.evaluate(intent, portfolio, simulation, volatility, current_time);
            violated.extend(outcome.violated);
            phrases.extend(outcome.phrases);
            warnings.extend(outcome.warnings);
            metrics.extend(outcome.metrics);
        }

        if !violated.is_empty() {
            return RiskDecision {
                decision: Decision::Reject,
                reason: phrases.join("; "),
                violated_rules: violated,
                warnings,
                metrics,
            };
        }

        // Soft warnings for metrics within 80% of their limits.
        if self.rules_enabled.r1 && gross_notional > self.limits.max_notional * WARN_FRACTION {
            warnings.push(format!(
                "Notional {} is close to limit {}",
                usd(gross_notional),
                usd(self.limits.max_notional)
            ));
        }
        if let Some(MetricValue::Decimal(pct)) = metrics.get("position_pct") {
            if *pct >= self.limits.max_position_pct * WARN_FRACTION {
                warnings.push(format!(
                    "Position size {pct:.1}% approaching limit {}%",
                    self.limits.max_position_pct
                ));
            }
        }

        RiskDecision {
            decision: Decision::Approve,
            reason: "All risk checks passed".to_string(),
            violated_rules: Vec::new(),
            warnings,
            metrics,
        }
    }

    /// R5: trade allowed iff inside `[market_open, market_close]`, extended
    /// by the pre-market / after-hours flags.
    fn is_market_open(&self, current_time: DateTime<Utc>) -> bool {
        let t = current_time.time();
        let open = self.trading_hours.market_open_utc;
        let close = self.trading_hours.market_close_utc;

        if open <= t && t <= close {
            return true;
        }
        if self.trading_hours.allow_pre_market && t < open {
            return true;
        }
        if self.trading_hours.allow_after_hours && t > close {
            return true;
        }
        false
    }

    fn rejection_phrases(&self, violated: &[RuleId], metrics: &Metrics) -> Vec<String> {
        let mut phrases = Vec::new();
        for rule in violated {
            let phrase = match rule {
                RuleId::R1 => {
                    let gross = decimal_metric(metrics, "gross_notional");
                    format!(
                        "R1: Notional {} exceeds limit {}",
                        usd(gross),
                        usd(self.limits.max_notional)
                    )
                }
                RuleId::R2 => {
                    let pct = decimal_metric(metrics, "position_pct");
                    format!(
                        "R2: Position size {pct:.1}% exceeds limit {}%",
                        self.limits.max_position_pct
                    )
                }
                RuleId::R3 => "R3: Sector exposure limit exceeded".to_string(),
                RuleId::R4 => {
                    let bps = decimal_metric(metrics, "slippage_bps");
                    format!(
                        "R4: Slippage {bps:.1} bps exceeds limit {} bps",
                        self.limits.max_slippage_bps
                    )
                }
                RuleId::R5 => "R5: Trading outside allowed market hours".to_string(),
                RuleId::R6 => "R6: Insufficient liquidity (daily volume too low)".to_string(),
                RuleId::R7 => format!(
                    "R7: Daily trade limit reached ({}/{})",
                    self.daily_trades_count, self.limits.max_daily_trades
                ),
                RuleId::R8 => format!(
                    "R8: Daily loss limit exceeded ({} / -{})",
                    usd(self.daily_pnl),
                    usd(self.limits.max_daily_loss)
                ),
                // Advanced rules build their own phrases.
                _ => continue,
            };
            phrases.push(phrase);
        }
        phrases
    }
}

fn decimal_metric(metrics: &Metrics, key: &str) -> Decimal {
    match metrics.get(key) {
        Some(MetricValue::Decimal(d)) => *d,
        _ => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advanced::AdvancedRiskLimits;
    use chrono::TimeZone;
    use gk_schemas::{Cash, Instrument, OrderType, Position, TimeInForce};
    use gk_sim::SimStatus;
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

    fn intent(symbol: &str, side: OrderSide, quantity: Decimal) -> OrderIntent {
        OrderIntent {
            account_id: "DU123456".to_string(),
            instrument: Instrument::stock(symbol),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            reason: "Portfolio rebalancing to target allocation".to_string(),
            strategy_tag: "rebal_monthly_v1".to_string(),
            constraints: None,
        }
    }

    fn success_sim(gross: Decimal) -> SimulationResult {
        SimulationResult {
            status: SimStatus::Success,
            gross_notional: Some(gross),
            estimated_slippage: Some(Decimal::ZERO),
            ..Default::default()
        }
    }

    fn market_hours_noon() -> DateTime<Utc> {
        // 17:00 UTC, inside the default 14:30–21:00 window.
        Utc.with_ymd_and_hms(2025, 6, 16, 17, 0, 0).unwrap()
    }

    fn engine() -> RiskEngine {
        RiskEngine::new(
            RiskLimits::default(),
            TradingHours::default(),
            RulesEnabled::default(),
            0,
            Decimal::ZERO,
        )
    }

    #[test]
    fn clean_order_approves() {
        let decision = engine().evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(10)),
            &portfolio(dec!(100000)),
            &success_sim(dec!(1500.00)),
            None,
            market_hours_noon(),
        );
        assert_eq!(decision.decision, Decision::Approve);
        assert!(decision.violated_rules.is_empty());
        assert_eq!(decision.reason, "All risk checks passed");
    }

    #[test]
    fn evaluate_is_pure() {
        let i = intent("AAPL", OrderSide::Buy, dec!(10));
        let p = portfolio(dec!(100000));
        let s = success_sim(dec!(1500.00));
        let t = market_hours_noon();
        let a = engine().evaluate(&i, &p, &s, None, t);
        let b = engine().evaluate(&i, &p, &s, None, t);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn failed_simulation_rejects_without_rule_evaluation() {
        let sim = SimulationResult::failure(SimStatus::InsufficientCash, "not enough cash");
        let decision = engine().evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(10)),
            &portfolio(dec!(100000)),
            &sim,
            None,
            market_hours_noon(),
        );
        assert_eq!(decision.decision, Decision::Reject);
        assert_eq!(decision.violated_rules, vec![RuleId::SimulationFailed]);
        assert_eq!(decision.reason, "Simulation failed: not enough cash");
        assert!(decision.metrics.is_empty());
    }

    #[test]
    fn r1_violation_formats_reason_with_amounts() {
        // BUY 200 TSLA @ 300.00 → gross 60,000 vs limit 50,000.
        let decision = engine().evaluate(
            &intent("TSLA", OrderSide::Buy, dec!(200)),
            &portfolio(dec!(1000000)),
            &success_sim(dec!(60000.00)),
            None,
            market_hours_noon(),
        );
        assert_eq!(decision.decision, Decision::Reject);
        assert!(decision.violated_rules.contains(&RuleId::R1));
        assert!(
            decision
                .reason
                .contains("Notional $60,000.00 exceeds limit $50,000.00"),
            "{}",
            decision.reason
        );
    }

    #[test]
    fn r1_exactly_at_limit_does_not_violate() {
        let decision = engine().evaluate(
            &intent("TSLA", OrderSide::Buy, dec!(1)),
            &portfolio(dec!(10000000)),
            &success_sim(dec!(50000.00)),
            None,
            market_hours_noon(),
        );
        assert!(!decision.violated_rules.contains(&RuleId::R1));
    }

    #[test]
    fn r1_one_cent_over_limit_violates() {
        let decision = engine().evaluate(
            &intent("TSLA", OrderSide::Buy, dec!(1)),
            &portfolio(dec!(10000000)),
            &success_sim(dec!(50000.01)),
            None,
            market_hours_noon(),
        );
        assert!(decision.violated_rules.contains(&RuleId::R1));
    }

    #[test]
    fn r2_counts_existing_position() {
        let mut pf = portfolio(dec!(100000));
        pf.positions.push(Position {
            instrument: Instrument::stock("AAPL"),
            quantity: dec!(50),
            average_cost: dec!(150),
            market_value: dec!(9000),
            unrealized_pnl: dec!(500),
            realized_pnl: Decimal::ZERO,
        });
        // 9,000 existing + 2,000 new = 11% > 10% limit.
        let decision = engine().evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(10)),
            &pf,
            &success_sim(dec!(2000.00)),
            None,
            market_hours_noon(),
        );
        assert!(decision.violated_rules.contains(&RuleId::R2));
        assert!(decision.reason.contains("R2: Position size 11.0% exceeds limit 10.0%"));
    }

    #[test]
    fn r2_sell_reduces_position() {
        let mut pf = portfolio(dec!(100000));
        pf.positions.push(Position {
            instrument: Instrument::stock("AAPL"),
            quantity: dec!(50),
            average_cost: dec!(150),
            market_value: dec!(10500),
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        });
        let decision = engine().evaluate(
            &intent("AAPL", OrderSide::Sell, dec!(10)),
            &pf,
            &success_sim(dec!(2000.00)),
            None,
            market_hours_noon(),
        );
        assert!(!decision.violated_rules.contains(&RuleId::R2));
    }

    #[test]
    fn r4_slippage_over_limit_violates() {
        let mut sim = success_sim(dec!(10000.00));
        // 60 bps on 10,000 = 60.
        sim.estimated_slippage = Some(dec!(60.00));
        let decision = engine().evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(100)),
            &portfolio(dec!(10000000)),
            &sim,
            None,
            market_hours_noon(),
        );
        assert!(decision.violated_rules.contains(&RuleId::R4));
        assert!(decision.reason.contains("R4: Slippage 60.0 bps exceeds limit 50 bps"));
    }

    #[test]
    fn r5_exactly_at_open_is_allowed() {
        let at_open = Utc.with_ymd_and_hms(2025, 6, 16, 14, 30, 0).unwrap();
        let decision = engine().evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(1)),
            &portfolio(dec!(100000)),
            &success_sim(dec!(100.00)),
            None,
            at_open,
        );
        assert!(!decision.violated_rules.contains(&RuleId::R5));
    }

    #[test]
    fn r5_one_second_before_open_is_rejected_unless_pre_market() {
        let before_open = Utc.with_ymd_and_hms(2025, 6, 16, 14, 29, 59).unwrap();
        let decision = engine().evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(1)),
            &portfolio(dec!(100000)),
            &success_sim(dec!(100.00)),
            None,
            before_open,
        );
        assert!(decision.violated_rules.contains(&RuleId::R5));
        assert!(decision.reason.contains("R5: Trading outside allowed market hours"));

        let pre_market_engine = RiskEngine::new(
            RiskLimits::default(),
            TradingHours {
                allow_pre_market: true,
                ..Default::default()
            },
            RulesEnabled::default(),
            0,
            Decimal::ZERO,
        );
        let decision = pre_market_engine.evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(1)),
            &portfolio(dec!(100000)),
            &success_sim(dec!(100.00)),
            None,
            before_open,
        );
        assert!(!decision.violated_rules.contains(&RuleId::R5));
    }

    #[test]
    fn r7_daily_trade_limit() {
        let engine = RiskEngine::new(
            RiskLimits::default(),
            TradingHours::default(),
            RulesEnabled::default(),
            50,
            Decimal::ZERO,
        );
        let decision = engine.evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(1)),
            &portfolio(dec!(100000)),
            &success_sim(dec!(100.00)),
            None,
            market_hours_noon(),
        );
        assert!(decision.violated_rules.contains(&RuleId::R7));
        assert!(decision.reason.contains("R7: Daily trade limit reached (50/50)"));
    }

    #[test]
    fn r8_daily_loss_breach() {
        let engine = RiskEngine::new(
            RiskLimits::default(),
            TradingHours::default(),
            RulesEnabled::default(),
            0,
            dec!(-6000.00),
        );
        let decision = engine.evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(1)),
            &portfolio(dec!(100000)),
            &success_sim(dec!(100.00)),
            None,
            market_hours_noon(),
        );
        assert!(decision.violated_rules.contains(&RuleId::R8));
        assert!(decision.reason.contains("R8: Daily loss limit exceeded"));
    }

    #[test]
    fn r8_exactly_at_floor_passes() {
        let engine = RiskEngine::new(
            RiskLimits::default(),
            TradingHours::default(),
            RulesEnabled::default(),
            0,
            dec!(-5000.00),
        );
        let decision = engine.evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(1)),
            &portfolio(dec!(100000)),
            &success_sim(dec!(100.00)),
            None,
            market_hours_noon(),
        );
        assert!(!decision.violated_rules.contains(&RuleId::R8));
    }

    #[test]
    fn multiple_violations_concatenate_reasons_in_rule_order() {
        let engine = RiskEngine::new(
            RiskLimits::default(),
            TradingHours::default(),
            RulesEnabled::default(),
            50,
            dec!(-6000.00),
        );
        let decision = engine.evaluate(
            &intent("TSLA", OrderSide::Buy, dec!(200)),
            &portfolio(dec!(1000000)),
            &success_sim(dec!(60000.00)),
            None,
            market_hours_noon(),
        );
        assert_eq!(
            decision.violated_rules,
            vec![RuleId::R1, RuleId::R7, RuleId::R8]
        );
        let reason = &decision.reason;
        let r1 = reason.find("R1:").unwrap();
        let r7 = reason.find("R7:").unwrap();
        let r8 = reason.find("R8:").unwrap();
        assert!(r1 < r7 && r7 < r8, "{reason}");
        assert!(reason.contains("; "));
    }

    #[test]
    fn notional_near_limit_warns() {
        let decision = engine().evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(1)),
            &portfolio(dec!(10000000)),
            &success_sim(dec!(45000.00)),
            None,
            market_hours_noon(),
        );
        assert_eq!(decision.decision, Decision::Approve);
        assert!(decision
            .warnings
            .iter()
            .any(|w| w.contains("Notional $45,000.00 is close to limit $50,000.00")));
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let engine = RiskEngine::new(
            RiskLimits::default(),
            TradingHours::default(),
            RulesEnabled {
                r1: false,
                ..Default::default()
            },
            0,
            Decimal::ZERO,
        );
        let decision = engine.evaluate(
            &intent("TSLA", OrderSide::Buy, dec!(200)),
            &portfolio(dec!(1000000)),
            &success_sim(dec!(60000.00)),
            None,
            market_hours_noon(),
        );
        assert!(!decision.violated_rules.contains(&RuleId::R1));
        assert!(!decision.metrics.contains_key("gross_notional"));
    }

    #[test]
    fn stub_rules_record_skip_metrics() {
        let decision = engine().evaluate(
            &intent("AAPL", OrderSide::Buy, dec!(1)),
            &portfolio(dec!(100000)),
            &success_sim(dec!(100.00)),
            None,
            market_hours_noon(),
        );
        assert_eq!(
            decision.metrics.get("sector_data_available"),
            Some(&MetricValue::Bool(false))
        );
        assert_eq!(
            decision.metrics.get("daily_volume_available"),
            Some(&MetricValue::Bool(false))
        );
    }

    #[test]
    fn advanced_violations_merge_with_basic() {
        // R1 violation (gross 60k) plus R9 violation (vol 0.50, budget 2%).
        let engine = engine().with_advanced(AdvancedRiskEngine::new(
            AdvancedRiskLimits {
                max_position_size: dec!(100000),
                ..Default::default()
            },
            None,
        ));
        let decision = engine.evaluate(
            &intent("GME", OrderSide::Buy, dec!(200)),
            &portfolio(dec!(100000)),
            &success_sim(dec!(60000.00)),
            Some(&crate::VolatilityMetrics::symbol(0.50)),
            market_hours_noon(),
        );
        assert_eq!(decision.decision, Decision::Reject);
        assert!(decision.violated_rules.contains(&RuleId::R1));
        assert!(decision.violated_rules.contains(&RuleId::R9));
        assert!(decision.reason.contains("R1:"));
        assert!(decision.reason.contains("R9:"));
    }

    #[test]
    fn scenario_r9_volatility_rejection_with_suggested_size() {
        // Portfolio 100k, BUY 100 GME MKT @ 300 (gross 30k), vol 0.50,
        // budget 0.02 → risk 15% > 2%, suggested ≈ 4,000.
        let engine = engine().with_advanced(AdvancedRiskEngine::new(
            AdvancedRiskLimits::default(),
            None,
        ));
        let decision = engine.evaluate(
            &intent("GME", OrderSide::Buy, dec!(100)),
            &portfolio(dec!(100000)),
            &success_sim(dec!(30000.00)),
            Some(&crate::VolatilityMetrics::symbol(0.50)),
            market_hours_noon(),
        );
        assert_eq!(decision.decision, Decision::Reject);
        assert!(decision.violated_rules.contains(&RuleId::R9));
        assert!(decision.reason.contains("Suggested max size: $4,000"));
        match decision.metrics.get("suggested_position_size") {
            Some(MetricValue::Float(s)) => assert!((s - 4000.0).abs() < 1e-6),
            other => panic!("expected suggested size metric, got {other:?}"),
        }
    }
}
