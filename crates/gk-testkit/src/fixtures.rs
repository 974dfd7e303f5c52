//! Canonical test fixtures used across scenario suites.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use gk_risk::{Decision, RiskDecision};
use gk_schemas::{
    Cash, Instrument, OrderIntent, OrderSide, OrderType, Portfolio, TimeInForce,
};
use gk_sim::{SimStatus, SimulationResult};

/// BUY 10 AAPL LMT 150.00 on `DU123456`: the happy-path order.
pub fn aapl_limit_buy() -> OrderIntent {
    OrderIntent {
        account_id: "DU123456".to_string(),
        instrument: Instrument::stock("AAPL"),
        side: OrderSide::Buy,
        quantity: dec!(10),
        order_type: OrderType::Limit,
        limit_price: Some(dec!(150.00)),
        stop_price: None,
        time_in_force: TimeInForce::Day,
        reason: "Portfolio rebalancing to target allocation".to_string(),
        strategy_tag: "rebal_monthly_v1".to_string(),
        constraints: None,
    }
}

/// BUY 200 TSLA MKT violates the default $50,000 notional limit at a
/// $300 market price.
pub fn tsla_market_buy() -> OrderIntent {
    OrderIntent {
        account_id: "DU123456".to_string(),
        instrument: Instrument::stock("TSLA"),
        side: OrderSide::Buy,
        quantity: dec!(200),
        order_type: OrderType::Market,
        limit_price: None,
        stop_price: None,
        time_in_force: TimeInForce::Day,
        reason: "Momentum entry on earnings announcement".to_string(),
        strategy_tag: "momo_earnings_v1".to_string(),
        constraints: None,
    }
}

/// BUY 100 GME MKT: the volatility-sizing rejection case at a $300
/// market price.
pub fn gme_market_buy() -> OrderIntent {
    OrderIntent {
        account_id: "DU123456".to_string(),
        instrument: Instrument::stock("GME"),
        side: OrderSide::Buy,
        quantity: dec!(100),
        order_type: OrderType::Market,
        limit_price: None,
        stop_price: None,
        time_in_force: TimeInForce::Day,
        reason: "Volatility breakout entry signal fired".to_string(),
        strategy_tag: "vol_breakout_v2".to_string(),
        constraints: None,
    }
}

/// All-cash portfolio snapshot of the given size.
pub fn portfolio_with_cash(cash: Decimal) -> Portfolio {
    Portfolio {
        account_id: "DU123456".to_string(),
        positions: Vec::new(),
        cash: vec![Cash {
            currency: "USD".to_string(),
            available: cash,
            total: cash,
        }],
        total_value: cash,
        captured_at: Utc::now(),
    }
}

/// Minimal successful simulation with the given gross notional.
pub fn success_sim(gross_notional: Decimal) -> SimulationResult {
    SimulationResult {
        status: SimStatus::Success,
        gross_notional: Some(gross_notional),
        estimated_slippage: Some(Decimal::ZERO),
        ..Default::default()
    }
}

pub fn approve_decision() -> RiskDecision {
    RiskDecision {
        decision: Decision::Approve,
        reason: "All risk checks passed".to_string(),
        violated_rules: Vec::new(),
        warnings: Vec::new(),
        metrics: Default::default(),
    }
}
