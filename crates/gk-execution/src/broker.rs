use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gk_schemas::{OrderIntent, OrderStatus, Portfolio};

// ---------------------------------------------------------------------------
// BrokerError
// ---------------------------------------------------------------------------

/// Failures at the broker boundary. `Unavailable` is retryable at the
/// submitter layer; `Rejected` is a synchronous, terminal refusal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    Unavailable(String),
    Rejected(String),
    UnknownOrder(String),
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Unavailable(msg) => write!(f, "broker unavailable: {msg}"),
            BrokerError::Rejected(msg) => write!(f, "broker rejected order: {msg}"),
            BrokerError::UnknownOrder(id) => write!(f, "unknown broker order: {id}"),
        }
    }
}

impl std::error::Error for BrokerError {}

// ---------------------------------------------------------------------------
// Wire structs
// ---------------------------------------------------------------------------

/// Broker acknowledgement of a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSubmitAck {
    pub broker_order_id: String,
    pub status: OrderStatus,
    pub submitted_at: DateTime<Utc>,
}

/// Point-in-time status of a broker order, as observed by polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub broker_order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_fill_price: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// BrokerAdapter
// ---------------------------------------------------------------------------

/// Minimal interface every broker implementation provides. Implementations
/// handle the actual transport (paper simulation, REST, FIX) and stay
/// opaque to the submitter.
pub trait BrokerAdapter: Send + Sync {
    /// Current portfolio snapshot for the account.
    fn portfolio(&self, account_id: &str) -> Result<Portfolio, BrokerError>;

    /// Submit a new order; returns the broker's acknowledgement.
    fn submit_order(&self, intent: &OrderIntent) -> Result<BrokerSubmitAck, BrokerError>;

    /// Observe the current status of a previously submitted order.
    fn order_status(&self, broker_order_id: &str) -> Result<OrderStatusReport, BrokerError>;

    /// Request cancellation of a live order.
    fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;
}

// A shared adapter is still an adapter; the submitter and the tool router
// hold the same underlying broker.
impl<T: BrokerAdapter + ?Sized> BrokerAdapter for std::sync::Arc<T> {
    fn portfolio(&self, account_id: &str) -> Result<Portfolio, BrokerError> {
        (**self).portfolio(account_id)
    }

    fn submit_order(&self, intent: &OrderIntent) -> Result<BrokerSubmitAck, BrokerError> {
        (**self).submit_order(intent)
    }

    fn order_status(&self, broker_order_id: &str) -> Result<OrderStatusReport, BrokerError> {
        (**self).order_status(broker_order_id)
    }

    fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        (**self).cancel_order(broker_order_id)
    }
}
