use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Instrument, OrderSide, OrderType, TimeInForce};

// ---------------------------------------------------------------------------
// OrderConstraints
// ---------------------------------------------------------------------------

/// Optional caller-supplied execution constraints, checked by the simulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_slippage_bps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_notional: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_liquidity: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_window_minutes: Option<u32>,
}

// ---------------------------------------------------------------------------
// OrderIntent
// ---------------------------------------------------------------------------

/// Canonical description of a single prospective order.
///
/// Immutable once validated; everything downstream (simulation, risk
/// evaluation, approval tokens) references the same intent. The approval
/// token binds to [`crate::intent_hash`] of this struct, so any field edit
/// after approval invalidates the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub account_id: String,
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    pub reason: String,
    pub strategy_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<OrderConstraints>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// One field-level validation problem. `field` is the dotted path of the
/// offending field, `code` a stable machine-readable tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Aggregate validation failure: every violated field is reported, not just
/// the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub errors: Vec<FieldError>,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<&str> = self.errors.iter().map(|e| e.field.as_str()).collect();
        write!(f, "validation failed: {}", fields.join(", "))
    }
}

impl std::error::Error for ValidationFailure {}

const MIN_REASON_CHARS: usize = 10;
const MAX_REASON_CHARS: usize = 500;
const MIN_REASON_WORDS: usize = 3;
const MAX_STRATEGY_TAG_CHARS: usize = 50;
const MAX_SLIPPAGE_BPS: u32 = 1000;
const MAX_EXECUTION_WINDOW_MINUTES: u32 = 480;

impl OrderIntent {
    /// Validate all semantic field constraints.
    ///
    /// Returns every violation at once so the caller can surface a complete
    /// field-keyed error payload.
    pub fn validate(&self) -> Result<(), ValidationFailure> {
        let mut errors = Vec::new();

        if self.account_id.trim().is_empty() {
            errors.push(FieldError::new(
                "account_id",
                "empty",
                "account_id must be non-empty",
            ));
        }

        if self.instrument.symbol.trim().is_empty() {
            errors.push(FieldError::new(
                "instrument.symbol",
                "empty",
                "symbol must be non-empty",
            ));
        }

        if self.quantity <= Decimal::ZERO {
            errors.push(FieldError::new(
                "quantity",
                "not_positive",
                format!("quantity must be positive, got {}", self.quantity),
            ));
        }

        if self.order_type.requires_limit_price() {
            match self.limit_price {
                None => errors.push(FieldError::new(
                    "limit_price",
                    "required",
                    format!(
                        "limit_price is required for {} orders",
                        self.order_type.as_str()
                    ),
                )),
                Some(p) if p <= Decimal::ZERO => errors.push(FieldError::new(
                    "limit_price",
                    "not_positive",
                    "limit_price must be positive",
                )),
                _ => {}
            }
        }

        if self.order_type.requires_stop_price() {
            match self.stop_price {
                None => errors.push(FieldError::new(
                    "stop_price",
                    "required",
                    format!(
                        "stop_price is required for {} orders",
                        self.order_type.as_str()
                    ),
                )),
                Some(p) if p <= Decimal::ZERO => errors.push(FieldError::new(
                    "stop_price",
                    "not_positive",
                    "stop_price must be positive",
                )),
                _ => {}
            }
        }

        let reason = self.reason.trim();
        if reason.chars().count() < MIN_REASON_CHARS {
            errors.push(FieldError::new(
                "reason",
                "too_short",
                format!("reason must be at least {MIN_REASON_CHARS} characters"),
            ));
        } else if reason.chars().count() > MAX_REASON_CHARS {
            errors.push(FieldError::new(
                "reason",
                "too_long",
                format!("reason must be at most {MAX_REASON_CHARS} characters"),
            ));
        }
        if reason.split_whitespace().count() < MIN_REASON_WORDS {
            errors.push(FieldError::new(
                "reason",
                "not_descriptive",
                format!("reason must be descriptive (at least {MIN_REASON_WORDS} words)"),
            ));
        }

        let tag = self.strategy_tag.trim();
        if tag.is_empty() {
            errors.push(FieldError::new(
                "strategy_tag",
                "empty",
                "strategy_tag must be non-empty",
            ));
        } else if tag.chars().count() > MAX_STRATEGY_TAG_CHARS {
            errors.push(FieldError::new(
                "strategy_tag",
                "too_long",
                format!("strategy_tag must be at most {MAX_STRATEGY_TAG_CHARS} characters"),
            ));
        }

        if let Some(c) = &self.constraints {
            if let Some(bps) = c.max_slippage_bps {
                if bps > MAX_SLIPPAGE_BPS {
                    errors.push(FieldError::new(
                        "constraints.max_slippage_bps",
                        "out_of_range",
                        format!("max_slippage_bps must be at most {MAX_SLIPPAGE_BPS}"),
                    ));
                }
            }
            if let Some(n) = c.max_notional {
                if n <= Decimal::ZERO {
                    errors.push(FieldError::new(
                        "constraints.max_notional",
                        "not_positive",
                        "max_notional must be positive",
                    ));
                }
            }
            if let Some(w) = c.execution_window_minutes {
                if w == 0 || w > MAX_EXECUTION_WINDOW_MINUTES {
                    errors.push(FieldError::new(
                        "constraints.execution_window_minutes",
                        "out_of_range",
                        format!(
                            "execution_window_minutes must be in 1..={MAX_EXECUTION_WINDOW_MINUTES}"
                        ),
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure { errors })
        }
    }
}
