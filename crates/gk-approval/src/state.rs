//! Proposal lifecycle states and the transition legality matrix.
//!
//! ```text
//!  (initial) ──► RiskRejected (terminal)
//!  (initial) ──► RiskApproved ──► ApprovalRequested ──► ApprovalDenied (terminal)
//!                                        │
//!                                        ▼
//!                                 ApprovalGranted ──► Submitted ──► Filled    (terminal)
//!                                                          │  ────► Cancelled (terminal)
//!                                                          └──────► Rejected  (terminal)
//! ```
//!
//! Any pair not in this diagram is illegal. Illegal transitions are refused
//! and audited; a proposal's state never moves backwards.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    RiskRejected,
    RiskApproved,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    Submitted,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderState {
    /// States with no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::RiskRejected
                | OrderState::ApprovalDenied
                | OrderState::Filled
                | OrderState::Cancelled
                | OrderState::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::RiskRejected => "RISK_REJECTED",
            OrderState::RiskApproved => "RISK_APPROVED",
            OrderState::ApprovalRequested => "APPROVAL_REQUESTED",
            OrderState::ApprovalGranted => "APPROVAL_GRANTED",
            OrderState::ApprovalDenied => "APPROVAL_DENIED",
            OrderState::Submitted => "SUBMITTED",
            OrderState::Filled => "FILLED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Rejected => "REJECTED",
        }
    }

    /// Whether `from → to` is an edge of the lifecycle diagram.
    pub fn can_transition(from: OrderState, to: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (from, to),
            (RiskApproved, ApprovalRequested)
                | (ApprovalRequested, ApprovalGranted)
                | (ApprovalRequested, ApprovalDenied)
                | (ApprovalGranted, Submitted)
                | (Submitted, Filled)
                | (Submitted, Cancelled)
                | (Submitted, Rejected)
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::OrderState::*;
    use super::*;

    const ALL: [OrderState; 9] = [
        RiskRejected,
        RiskApproved,
        ApprovalRequested,
        ApprovalGranted,
        ApprovalDenied,
        Submitted,
        Filled,
        Cancelled,
        Rejected,
    ];

    #[test]
    fn exactly_seven_edges_are_legal() {
        let mut legal = 0;
        for from in ALL {
            for to in ALL {
                if OrderState::can_transition(from, to) {
                    legal += 1;
                }
            }
        }
        assert_eq!(legal, 7);
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(
                    !OrderState::can_transition(*from, to),
                    "terminal {from} must not transition to {to}"
                );
            }
        }
    }

    #[test]
    fn no_backwards_transitions() {
        assert!(!OrderState::can_transition(Submitted, ApprovalGranted));
        assert!(!OrderState::can_transition(ApprovalGranted, ApprovalRequested));
        assert!(!OrderState::can_transition(Filled, Submitted));
        assert!(!OrderState::can_transition(ApprovalDenied, ApprovalRequested));
    }

    #[test]
    fn serializes_to_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&RiskApproved).unwrap(),
            "\"RISK_APPROVED\""
        );
        assert_eq!(
            serde_json::to_string(&ApprovalRequested).unwrap(),
            "\"APPROVAL_REQUESTED\""
        );
    }
}
