use rust_decimal::Decimal;

use gk_schemas::{OrderIntent, OrderSide, OrderType, Portfolio};

use crate::types::{SimConfig, SimStatus, SimulationResult};

const TEN_THOUSAND: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Simulate executing `intent` against `portfolio` at `market_price`.
///
/// Execution price selection by order type: MKT at market, LMT / STP_LMT at
/// the limit (assuming a fill), STP at the stop. Limit-capped orders are
/// modeled with zero slippage.
pub fn simulate(
    intent: &OrderIntent,
    portfolio: &Portfolio,
    market_price: Decimal,
    config: &SimConfig,
) -> SimulationResult {
    let mut warnings = Vec::new();

    if intent.quantity <= Decimal::ZERO {
        return SimulationResult::failure(
            SimStatus::InvalidQuantity,
            format!("Invalid quantity: {}", intent.quantity),
        );
    }

    let execution_price = match estimate_execution_price(intent, market_price) {
        Some(p) => p,
        None => {
            return SimulationResult::failure(
                SimStatus::PriceUnavailable,
                "Cannot determine execution price",
            )
        }
    };

    let gross_notional = execution_price * intent.quantity;
    let estimated_slippage = estimate_slippage(gross_notional, intent.order_type, config);

    // > 0.1% of notional is worth flagging even when within constraints.
    if estimated_slippage > gross_notional * Decimal::new(1, 3) {
        let pct = estimated_slippage / gross_notional * Decimal::ONE_HUNDRED;
        warnings.push(format!(
            "Significant estimated slippage: ${estimated_slippage:.2} ({pct:.2}%)"
        ));
    }

    let estimated_fee = estimate_fee(gross_notional, intent.quantity, config);

    let net_notional = match intent.side {
        OrderSide::Buy => gross_notional + estimated_fee + estimated_slippage,
        OrderSide::Sell => gross_notional - estimated_fee - estimated_slippage,
    };

    let cash_before = portfolio.total_cash();
    let cash_after = match intent.side {
        OrderSide::Buy => cash_before - net_notional,
        OrderSide::Sell => cash_before + net_notional,
    };

    if intent.side == OrderSide::Buy && cash_after < Decimal::ZERO {
        return SimulationResult {
            status: SimStatus::InsufficientCash,
            execution_price: Some(execution_price),
            gross_notional: Some(gross_notional),
            estimated_fee: Some(estimated_fee),
            estimated_slippage: Some(estimated_slippage),
            net_notional: Some(net_notional),
            cash_before: Some(cash_before),
            cash_after: Some(cash_after),
            error_message: Some(format!(
                "Insufficient cash: need ${net_notional:.2}, have ${cash_before:.2}"
            )),
            ..Default::default()
        };
    }

    let exposure_before = portfolio.total_value;
    let exposure_after = match intent.side {
        OrderSide::Buy => exposure_before + gross_notional,
        OrderSide::Sell => exposure_before - gross_notional,
    };

    if let Some(error) = check_constraints(intent, estimated_slippage, gross_notional, net_notional)
    {
        return SimulationResult {
            status: SimStatus::ConstraintViolated,
            execution_price: Some(execution_price),
            gross_notional: Some(gross_notional),
            estimated_fee: Some(estimated_fee),
            estimated_slippage: Some(estimated_slippage),
            net_notional: Some(net_notional),
            cash_before: Some(cash_before),
            cash_after: Some(cash_after),
            exposure_before: Some(exposure_before),
            exposure_after: Some(exposure_after),
            error_message: Some(error),
            ..Default::default()
        };
    }

    if portfolio.total_value > Decimal::ZERO
        && gross_notional > portfolio.total_value * Decimal::new(2, 1)
    {
        let pct = gross_notional / portfolio.total_value * Decimal::ONE_HUNDRED;
        warnings.push(format!(
            "Large trade: ${gross_notional:.2} is {pct:.1}% of portfolio"
        ));
    }

    SimulationResult {
        status: SimStatus::Success,
        execution_price: Some(execution_price),
        gross_notional: Some(gross_notional),
        estimated_fee: Some(estimated_fee),
        estimated_slippage: Some(estimated_slippage),
        net_notional: Some(net_notional),
        cash_before: Some(cash_before),
        cash_after: Some(cash_after),
        exposure_before: Some(exposure_before),
        exposure_after: Some(exposure_after),
        warnings,
        error_message: None,
    }
}

fn estimate_execution_price(intent: &OrderIntent, market_price: Decimal) -> Option<Decimal> {
    match intent.order_type {
        OrderType::Market => Some(market_price),
        OrderType::Limit | OrderType::StopLimit => intent.limit_price,
        OrderType::Stop => intent.stop_price,
    }
}

fn estimate_slippage(
    gross_notional: Decimal,
    order_type: OrderType,
    config: &SimConfig,
) -> Decimal {
    // Limit-capped orders cannot slip past their price.
    if matches!(order_type, OrderType::Limit | OrderType::StopLimit) {
        return Decimal::ZERO;
    }

    let base = gross_notional * config.base_slippage_bps / TEN_THOUSAND;
    let size_factor = gross_notional / TEN_THOUSAND;
    let impact_bps = config.market_impact_factor * size_factor;
    let impact = gross_notional * impact_bps / TEN_THOUSAND;
    base + impact
}

fn estimate_fee(gross_notional: Decimal, quantity: Decimal, config: &SimConfig) -> Decimal {
    let per_share = config.fee_per_share * quantity;
    let fee = per_share.max(config.min_fee);
    fee.min(gross_notional * config.max_fee_pct)
}

fn check_constraints(
    intent: &OrderIntent,
    estimated_slippage: Decimal,
    gross_notional: Decimal,
    net_notional: Decimal,
) -> Option<String> {
    let constraints = intent.constraints.as_ref()?;

    if let Some(max_bps) = constraints.max_slippage_bps {
        if gross_notional > Decimal::ZERO {
            let slippage_bps = estimated_slippage / gross_notional * TEN_THOUSAND;
            if slippage_bps > Decimal::from(max_bps) {
                return Some(format!(
                    "Estimated slippage {slippage_bps:.1} bps exceeds max {max_bps} bps"
                ));
            }
        }
    }

    if let Some(max_notional) = constraints.max_notional {
        if net_notional > max_notional {
            return Some(format!(
                "Net notional ${net_notional:.2} exceeds max ${max_notional:.2}"
            ));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gk_schemas::{Cash, Instrument, OrderConstraints, TimeInForce};
    use rust_decimal_macros::dec;

    fn portfolio(cash: Decimal) -> Portfolio {
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

    fn limit_buy(quantity: Decimal, limit: Decimal) -> OrderIntent {
        OrderIntent {
            account_id: "DU123456".to_string(),
            instrument: Instrument::stock("AAPL"),
            side: OrderSide::Buy,
            quantity,
            order_type: OrderType::Limit,
            limit_price: Some(limit),
            stop_price: None,
            time_in_force: TimeInForce::Day,
            reason: "Portfolio rebalancing to target allocation".to_string(),
            strategy_tag: "rebal_monthly_v1".to_string(),
            constraints: None,
        }
    }

    fn market_buy(quantity: Decimal) -> OrderIntent {
        let mut intent = limit_buy(quantity, dec!(1));
        intent.order_type = OrderType::Market;
        intent.limit_price = None;
        intent
    }

    #[test]
    fn limit_buy_happy_path() {
        let result = simulate(
            &limit_buy(dec!(10), dec!(150.00)),
            &portfolio(dec!(100000.00)),
            dec!(150.00),
            &SimConfig::default(),
        );
        assert_eq!(result.status, SimStatus::Success);
        assert_eq!(result.gross_notional, Some(dec!(1500.0000)));
        assert_eq!(result.estimated_slippage, Some(Decimal::ZERO));
        // 10 × 0.005 = 0.05 < min fee 1.00
        assert_eq!(result.estimated_fee, Some(dec!(1.00)));
        assert_eq!(result.net_notional, Some(dec!(1501.00)));
        assert_eq!(result.cash_after, Some(dec!(98499.00)));
        assert!(result.cash_after.unwrap() < result.cash_before.unwrap());
        assert_eq!(result.exposure_after, Some(dec!(101500.0000)));
    }

    #[test]
    fn market_order_accrues_slippage() {
        let result = simulate(
            &market_buy(dec!(100)),
            &portfolio(dec!(100000.00)),
            dec!(100.00),
            &SimConfig::default(),
        );
        assert_eq!(result.status, SimStatus::Success);
        // gross 10_000; base = 10_000 × 5 / 10_000 = 5; impact = 10_000 × (0.1 × 1) / 10_000 = 0.1
        assert_eq!(result.estimated_slippage, Some(dec!(5.1000)));
    }

    #[test]
    fn sell_credits_cash() {
        let mut intent = limit_buy(dec!(10), dec!(150.00));
        intent.side = OrderSide::Sell;
        let result = simulate(
            &intent,
            &portfolio(dec!(1000.00)),
            dec!(150.00),
            &SimConfig::default(),
        );
        assert_eq!(result.status, SimStatus::Success);
        assert!(result.cash_after.unwrap() > result.cash_before.unwrap());
    }

    #[test]
    fn insufficient_cash_rejected() {
        let result = simulate(
            &limit_buy(dec!(100), dec!(150.00)),
            &portfolio(dec!(1000.00)),
            dec!(150.00),
            &SimConfig::default(),
        );
        assert_eq!(result.status, SimStatus::InsufficientCash);
        assert!(result.error_message.unwrap().contains("Insufficient cash"));
    }

    #[test]
    fn zero_quantity_is_invalid() {
        let result = simulate(
            &limit_buy(Decimal::ZERO, dec!(150.00)),
            &portfolio(dec!(1000.00)),
            dec!(150.00),
            &SimConfig::default(),
        );
        assert_eq!(result.status, SimStatus::InvalidQuantity);
    }

    #[test]
    fn stop_order_without_stop_price_has_no_execution_price() {
        let mut intent = market_buy(dec!(10));
        intent.order_type = OrderType::Stop;
        intent.stop_price = None;
        let result = simulate(
            &intent,
            &portfolio(dec!(100000.00)),
            dec!(100.00),
            &SimConfig::default(),
        );
        assert_eq!(result.status, SimStatus::PriceUnavailable);
    }

    #[test]
    fn max_notional_constraint_violation() {
        let mut intent = limit_buy(dec!(10), dec!(150.00));
        intent.constraints = Some(OrderConstraints {
            max_notional: Some(dec!(1000.00)),
            ..Default::default()
        });
        let result = simulate(
            &intent,
            &portfolio(dec!(100000.00)),
            dec!(150.00),
            &SimConfig::default(),
        );
        assert_eq!(result.status, SimStatus::ConstraintViolated);
        assert!(result.error_message.unwrap().contains("Net notional"));
    }

    #[test]
    fn max_slippage_constraint_violation_on_market_order() {
        let mut intent = market_buy(dec!(1000));
        intent.constraints = Some(OrderConstraints {
            max_slippage_bps: Some(1),
            ..Default::default()
        });
        let result = simulate(
            &intent,
            &portfolio(dec!(1000000.00)),
            dec!(100.00),
            &SimConfig::default(),
        );
        assert_eq!(result.status, SimStatus::ConstraintViolated);
        assert!(result.error_message.unwrap().contains("bps exceeds max"));
    }

    #[test]
    fn large_trade_warning_over_twenty_percent() {
        let result = simulate(
            &limit_buy(dec!(200), dec!(150.00)),
            &portfolio(dec!(100000.00)),
            dec!(150.00),
            &SimConfig::default(),
        );
        assert_eq!(result.status, SimStatus::Success);
        assert!(result.warnings.iter().any(|w| w.contains("Large trade")));
    }

    #[test]
    fn simulate_is_deterministic() {
        let intent = market_buy(dec!(42));
        let pf = portfolio(dec!(500000.00));
        let a = simulate(&intent, &pf, dec!(123.45), &SimConfig::default());
        let b = simulate(&intent, &pf, dec!(123.45), &SimConfig::default());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
