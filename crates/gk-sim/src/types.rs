use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome class of a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimStatus {
    Success,
    InsufficientCash,
    InvalidQuantity,
    PriceUnavailable,
    ConstraintViolated,
}

impl SimStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SimStatus::Success)
    }
}

/// Fee and slippage model parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Commission per share (USD).
    pub fee_per_share: Decimal,
    /// Minimum commission per order (USD).
    pub min_fee: Decimal,
    /// Maximum commission as a fraction of gross notional.
    pub max_fee_pct: Decimal,
    /// Base slippage in basis points (market orders only).
    pub base_slippage_bps: Decimal,
    /// Additional slippage bps per $10k of notional.
    pub market_impact_factor: Decimal,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fee_per_share: Decimal::new(5, 3),       // 0.005
            min_fee: Decimal::ONE,                   // 1.00
            max_fee_pct: Decimal::new(1, 2),         // 1% of notional
            base_slippage_bps: Decimal::new(5, 0),   // 5 bps
            market_impact_factor: Decimal::new(1, 1), // 0.1 bps per $10k
        }
    }
}

/// Result of simulating one intent. All monetary fields are present on
/// success; failure statuses carry whatever was computed before the check
/// tripped, plus `error_message`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationResult {
    pub status: SimStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gross_notional: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_fee: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_slippage: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_notional: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_before: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_after: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_before: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_after: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Default for SimStatus {
    fn default() -> Self {
        SimStatus::PriceUnavailable
    }
}

impl SimulationResult {
    pub fn failure(status: SimStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }
}
