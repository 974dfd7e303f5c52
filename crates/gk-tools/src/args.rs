//! Strict argument schemas for the agent tool surface.
//!
//! Every tool decodes its arguments into one of these structs with
//! `deny_unknown_fields`: an argument outside the schema fails the call
//! before any service is touched. This is the compile-time rendering of
//! "extra field forbidden".

use rust_decimal::Decimal;
use serde::Deserialize;

use gk_schemas::{
    Instrument, OrderConstraints, OrderIntent, OrderSide, OrderType, TimeInForce,
};

fn default_order_type() -> OrderType {
    OrderType::Market
}

fn default_strategy_tag() -> String {
    "agent_request".to_string()
}

fn default_pending_limit() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountArgs {
    pub account_id: String,
}

/// Arguments shared by `simulate_order`, `evaluate_risk`, and the single
/// write tool `request_approval`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderArgs {
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    pub market_price: Decimal,
    pub reason: String,
    #[serde(default = "default_strategy_tag")]
    pub strategy_tag: String,
    #[serde(default)]
    pub max_slippage_bps: Option<u32>,
    #[serde(default)]
    pub max_notional: Option<Decimal>,
}

impl OrderArgs {
    pub fn to_intent(&self) -> OrderIntent {
        let constraints = if self.max_slippage_bps.is_some() || self.max_notional.is_some() {
            Some(OrderConstraints {
                max_slippage_bps: self.max_slippage_bps,
                max_notional: self.max_notional,
                ..Default::default()
            })
        } else {
            None
        };
        OrderIntent {
            account_id: self.account_id.trim().to_string(),
            instrument: Instrument::stock(self.symbol.trim().to_uppercase()),
            side: self.side,
            quantity: self.quantity,
            order_type: self.order_type,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            time_in_force: TimeInForce::Day,
            reason: self.reason.trim().to_string(),
            strategy_tag: self.strategy_tag.clone(),
            constraints,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PendingArgs {
    #[serde(default = "default_pending_limit")]
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn extra_field_is_rejected() {
        let err = serde_json::from_value::<AccountArgs>(json!({
            "account_id": "DU123456",
            "sneaky": true,
        }))
        .unwrap_err();
        assert!(err.to_string().contains("sneaky"));
    }

    #[test]
    fn order_args_decode_with_defaults() {
        let args: OrderArgs = serde_json::from_value(json!({
            "account_id": "DU123456",
            "symbol": "aapl",
            "side": "BUY",
            "quantity": "10",
            "market_price": "150.00",
            "reason": "Portfolio rebalancing to target allocation",
        }))
        .unwrap();
        assert_eq!(args.order_type, OrderType::Market);
        assert_eq!(args.strategy_tag, "agent_request");

        let intent = args.to_intent();
        assert_eq!(intent.instrument.symbol, "AAPL");
        assert_eq!(intent.quantity, dec!(10));
        assert!(intent.constraints.is_none());
    }

    #[test]
    fn constraints_materialize_when_present() {
        let args: OrderArgs = serde_json::from_value(json!({
            "account_id": "DU123456",
            "symbol": "AAPL",
            "side": "BUY",
            "quantity": "10",
            "market_price": "150.00",
            "reason": "Portfolio rebalancing to target allocation",
            "max_slippage_bps": 25,
        }))
        .unwrap();
        let intent = args.to_intent();
        assert_eq!(intent.constraints.unwrap().max_slippage_bps, Some(25));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let err = serde_json::from_value::<OrderArgs>(json!({
            "account_id": "DU123456",
            "symbol": "AAPL",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn pending_args_default_limit() {
        let args: PendingArgs = serde_json::from_value(json!({})).unwrap();
        assert_eq!(args.limit, 100);
    }
}
