use gk_audit::AuditError;

use crate::state::OrderState;

/// Every way an approval-service operation can fail, one variant per
/// distinct caller-visible case. None of these succeed silently: the
/// service audits each failure before returning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    UnknownProposal { proposal_id: String },
    IllegalTransition { from: OrderState, to: OrderState },
    /// Token id unknown, not bound to this proposal, or revoked.
    TokenInvalid { token_id: String },
    TokenExpired { token_id: String },
    TokenAlreadyConsumed { token_id: String },
    /// The bound intent no longer hashes to the value the token committed
    /// to at grant time.
    IntentHashMismatch { proposal_id: String },
    AccountMismatch { expected: String, got: String },
    /// Deny requires a human-readable reason.
    ReasonRequired,
    /// The audit append backing a mutation failed; the mutation was not
    /// committed.
    Audit(AuditError),
}

impl ApprovalError {
    /// Stable machine-readable code, surfaced in HTTP error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ApprovalError::UnknownProposal { .. } => "UNKNOWN_PROPOSAL",
            ApprovalError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            ApprovalError::TokenInvalid { .. } => "TOKEN_INVALID",
            ApprovalError::TokenExpired { .. } => "TOKEN_EXPIRED",
            ApprovalError::TokenAlreadyConsumed { .. } => "TOKEN_ALREADY_CONSUMED",
            ApprovalError::IntentHashMismatch { .. } => "INTENT_HASH_MISMATCH",
            ApprovalError::AccountMismatch { .. } => "ACCOUNT_MISMATCH",
            ApprovalError::ReasonRequired => "REASON_REQUIRED",
            ApprovalError::Audit(_) => "PERSISTENCE_FAILED",
        }
    }
}

impl std::fmt::Display for ApprovalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalError::UnknownProposal { proposal_id } => {
                write!(f, "unknown proposal: {proposal_id}")
            }
            ApprovalError::IllegalTransition { from, to } => {
                write!(f, "illegal transition: {from} -> {to}")
            }
            ApprovalError::TokenInvalid { token_id } => {
                write!(f, "invalid approval token: {token_id}")
            }
            ApprovalError::TokenExpired { token_id } => {
                write!(f, "approval token expired: {token_id}")
            }
            ApprovalError::TokenAlreadyConsumed { token_id } => {
                write!(f, "approval token already consumed: {token_id}")
            }
            ApprovalError::IntentHashMismatch { proposal_id } => {
                write!(f, "intent hash mismatch for proposal {proposal_id}")
            }
            ApprovalError::AccountMismatch { expected, got } => {
                write!(f, "account mismatch: token bound to {expected}, request for {got}")
            }
            ApprovalError::ReasonRequired => write!(f, "a denial reason is required"),
            ApprovalError::Audit(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ApprovalError {}

impl From<AuditError> for ApprovalError {
    fn from(e: AuditError) -> Self {
        ApprovalError::Audit(e)
    }
}
