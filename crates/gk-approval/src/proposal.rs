use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gk_risk::RiskDecision;
use gk_schemas::OrderIntent;
use gk_sim::SimulationResult;

use crate::state::OrderState;

/// Persisted record binding an intent, its simulation, and its risk
/// decision to a lifecycle state.
///
/// The intent, simulation, and decision are frozen at creation; only
/// `state`, `broker_order_id`, `approval_reason`, and `updated_at` change,
/// and only through the service's transition methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: String,
    pub correlation_id: String,
    pub intent: OrderIntent,
    pub simulation: SimulationResult,
    pub risk_decision: RiskDecision,
    pub state: OrderState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Short display summary used in logs and audit payloads.
    pub fn summary(&self) -> String {
        format!(
            "{} {} {} {}",
            self.intent.side.as_str(),
            self.intent.quantity,
            self.intent.instrument.symbol,
            self.intent.order_type.as_str()
        )
    }
}
