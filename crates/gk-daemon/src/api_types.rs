//! Request / response DTOs for the HTTP surface.
//!
//! Request bodies use `deny_unknown_fields` so a stray field is a 422, not
//! a silent ignore.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gk_approval::{OrderState, Proposal};
use gk_risk::RiskDecision;
use gk_schemas::{
    FieldError, Instrument, InstrumentType, OrderConstraints, OrderIntent, OrderSide, OrderType,
    TimeInForce,
};
use gk_sim::SimulationResult;

// ---------------------------------------------------------------------------
// Propose
// ---------------------------------------------------------------------------

fn default_order_type() -> OrderType {
    OrderType::Limit
}

fn default_strategy_tag() -> String {
    "manual".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Flat order proposal as submitted by an operator or agent; normalized
/// into an [`OrderIntent`] by the handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposeRequest {
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
    #[serde(default)]
    pub time_in_force: TimeInForce,
    pub reason: String,
    #[serde(default = "default_strategy_tag")]
    pub strategy_tag: String,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub instrument_type: Option<InstrumentType>,
    #[serde(default)]
    pub max_slippage_bps: Option<u32>,
    #[serde(default)]
    pub max_notional: Option<Decimal>,
}

impl ProposeRequest {
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
            instrument: Instrument {
                instrument_type: self.instrument_type.unwrap_or(InstrumentType::Stock),
                symbol: self.symbol.trim().to_uppercase(),
                exchange: self.exchange.clone(),
                currency: self.currency.clone(),
            },
            side: self.side,
            quantity: self.quantity,
            order_type: self.order_type,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            time_in_force: self.time_in_force,
            reason: self.reason.trim().to_string(),
            strategy_tag: self.strategy_tag.clone(),
            constraints,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposeResponse {
    pub intent: OrderIntent,
    pub validation_passed: bool,
    pub warnings: Vec<String>,
    pub correlation_id: String,
}

// ---------------------------------------------------------------------------
// Simulate / risk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulateRequest {
    pub intent: OrderIntent,
    pub market_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulateResponse {
    pub result: SimulationResult,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskEvaluateRequest {
    pub intent: OrderIntent,
    pub simulation: SimulationResult,
    pub portfolio_value: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskEvaluateResponse {
    pub decision: RiskDecision,
    pub correlation_id: String,
}

// ---------------------------------------------------------------------------
// Approval lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalRequestBody {
    pub proposal_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantApprovalBody {
    pub proposal_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DenyApprovalBody {
    pub proposal_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalResponse {
    pub proposal_id: String,
    pub state: OrderState,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantApprovalResponse {
    pub proposal_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingProposalsResponse {
    pub proposals: Vec<Proposal>,
    pub count: usize,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitOrderBody {
    pub proposal_id: String,
    pub token_id: String,
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOrderResponse {
    pub proposal_id: String,
    pub broker_order_id: String,
    pub status: gk_schemas::OrderStatus,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CancelOrderBody {
    pub proposal_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOrderResponse {
    pub proposal_id: String,
    pub state: OrderState,
    pub action: String,
    pub correlation_id: String,
}

// ---------------------------------------------------------------------------
// Kill switch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KillSwitchActivateBody {
    #[serde(default)]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCallBody {
    pub session_id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error payload: a stable machine code, a human message, the correlation
/// id, and (for validation failures) field-keyed detail.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub error: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Vec<FieldError>>,
}
