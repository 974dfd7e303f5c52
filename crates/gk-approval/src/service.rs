use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::warn;

use gk_audit::{AuditEventCreate, AuditLog, EventType, NO_CORRELATION_ID};
use gk_risk::{Decision, RiskDecision};
use gk_schemas::{intent_hash, OrderIntent, OrderStatus};
use gk_sim::SimulationResult;

use crate::error::ApprovalError;
use crate::proposal::Proposal;
use crate::state::OrderState;
use crate::token::{ApprovalToken, DEFAULT_TOKEN_TTL_MINUTES};

// ---------------------------------------------------------------------------
// ApprovalService
// ---------------------------------------------------------------------------

/// Owns the proposal store, the lifecycle state machine, and the token
/// table.
///
/// # Concurrency
///
/// Each proposal lives in its own `Arc<Mutex<Slot>>`; the outer map lock is
/// held only for lookup and insert. A proposal's token shares its slot
/// mutex, which makes token consumption atomic with the
/// `ApprovalGranted → Submitted` transition: two concurrent consumers see
/// exactly one success.
///
/// # Audit discipline
///
/// Every mutation appends its audit event *before* the in-memory state is
/// committed. If the append fails, the mutation does not happen and the
/// caller sees [`ApprovalError::Audit`]. Every failure is audited as
/// `ErrorOccurred` (best-effort) before being returned.
pub struct ApprovalService {
    audit: Arc<AuditLog>,
    max_proposals: usize,
    token_ttl: Duration,
    slots: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
    insertion_order: Mutex<VecDeque<String>>,
}

struct Slot {
    proposal: Proposal,
    token: Option<ApprovalToken>,
}

impl ApprovalService {
    pub fn new(audit: Arc<AuditLog>, max_proposals: usize, token_ttl: Duration) -> Self {
        Self {
            audit,
            max_proposals,
            token_ttl,
            slots: RwLock::new(HashMap::new()),
            insertion_order: Mutex::new(VecDeque::new()),
        }
    }

    /// Service with the default 5-minute token TTL.
    pub fn with_defaults(audit: Arc<AuditLog>, max_proposals: usize) -> Self {
        Self::new(
            audit,
            max_proposals,
            Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES),
        )
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    // -----------------------------------------------------------------------
    // Store
    // -----------------------------------------------------------------------

    /// Persist a freshly evaluated proposal. The initial state follows the
    /// risk decision: `Reject → RiskRejected`, everything else (including
    /// manual review, which the mandatory human gate covers) →
    /// `RiskApproved`.
    pub fn store_proposal(
        &self,
        intent: OrderIntent,
        simulation: SimulationResult,
        risk_decision: RiskDecision,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal, ApprovalError> {
        let state = match risk_decision.decision {
            Decision::Reject => OrderState::RiskRejected,
            Decision::Approve | Decision::ManualReview => OrderState::RiskApproved,
        };

        let proposal = Proposal {
            proposal_id: uuid::Uuid::new_v4().to_string(),
            correlation_id: correlation_id.to_string(),
            intent,
            simulation,
            risk_decision,
            state,
            broker_order_id: None,
            approval_reason: None,
            created_at: now,
            updated_at: now,
        };

        if state == OrderState::RiskApproved {
            self.audit.append(AuditEventCreate::new(
                EventType::OrderProposed,
                correlation_id,
                json!({
                    "proposal_id": proposal.proposal_id,
                    "account_id": proposal.intent.account_id,
                    "symbol": proposal.intent.instrument.symbol,
                    "side": proposal.intent.side.as_str(),
                    "quantity": proposal.intent.quantity.to_string(),
                    "order_type": proposal.intent.order_type.as_str(),
                    "reason": proposal.intent.reason,
                    "strategy_tag": proposal.intent.strategy_tag,
                }),
            ))?;
        }
        self.audit.append(AuditEventCreate::new(
            EventType::RiskGateEvaluated,
            correlation_id,
            json!({
                "proposal_id": proposal.proposal_id,
                "decision": proposal.risk_decision.decision,
                "violated_rules": proposal.risk_decision.violated_rules,
                "reason": proposal.risk_decision.reason,
                "state": proposal.state.as_str(),
            }),
        ))?;

        {
            let mut slots = self.slots.write().expect("slots lock poisoned");
            slots.insert(
                proposal.proposal_id.clone(),
                Arc::new(Mutex::new(Slot {
                    proposal: proposal.clone(),
                    token: None,
                })),
            );
        }
        self.insertion_order
            .lock()
            .expect("order lock poisoned")
            .push_back(proposal.proposal_id.clone());
        self.evict_excess_terminal();

        Ok(proposal)
    }

    // Oldest-first eviction of terminal proposals once the store exceeds
    // its bound. Non-terminal proposals are never evicted, so the store may
    // legitimately exceed `max_proposals` while work is in flight.
    fn evict_excess_terminal(&self) {
        let mut order = self.insertion_order.lock().expect("order lock poisoned");
        let mut slots = self.slots.write().expect("slots lock poisoned");
        while slots.len() > self.max_proposals {
            let victim = order.iter().position(|id| {
                slots
                    .get(id)
                    .map(|slot| slot.lock().expect("slot lock poisoned").proposal.is_terminal())
                    .unwrap_or(true)
            });
            match victim {
                Some(pos) => {
                    let id = order.remove(pos).expect("position is in range");
                    slots.remove(&id);
                }
                None => break,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get_proposal(&self, proposal_id: &str) -> Option<Proposal> {
        let slots = self.slots.read().expect("slots lock poisoned");
        slots
            .get(proposal_id)
            .map(|slot| slot.lock().expect("slot lock poisoned").proposal.clone())
    }

    /// Non-terminal proposals, newest first, at most `limit`.
    pub fn list_pending(&self, limit: usize) -> Vec<Proposal> {
        let slots = self.slots.read().expect("slots lock poisoned");
        let mut pending: Vec<Proposal> = slots
            .values()
            .map(|slot| slot.lock().expect("slot lock poisoned").proposal.clone())
            .filter(|p| !p.is_terminal())
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pending.truncate(limit);
        pending
    }

    pub fn proposal_count(&self) -> usize {
        self.slots.read().expect("slots lock poisoned").len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------------

    /// `RiskApproved → ApprovalRequested`.
    pub fn request_approval(
        &self,
        proposal_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal, ApprovalError> {
        let slot = self.get_slot(proposal_id)?;
        let mut slot = slot.lock().expect("slot lock poisoned");

        self.check_transition(&slot.proposal, OrderState::ApprovalRequested)?;
        self.audit
            .append(AuditEventCreate::new(
                EventType::ApprovalRequested,
                &slot.proposal.correlation_id,
                json!({
                    "proposal_id": proposal_id,
                    "summary": slot.proposal.summary(),
                }),
            ))
            .map_err(ApprovalError::Audit)?;

        slot.proposal.state = OrderState::ApprovalRequested;
        slot.proposal.updated_at = now;
        Ok(slot.proposal.clone())
    }

    /// `ApprovalRequested → ApprovalGranted`: issues a single-use token
    /// bound to the proposal's account and intent hash.
    ///
    /// A proposal already in `ApprovalGranted` whose token is no longer
    /// live (expired or revoked) may be granted again; the token is
    /// replaced without a state transition. A still-live token refuses the
    /// re-grant.
    pub fn grant_approval(
        &self,
        proposal_id: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(Proposal, ApprovalToken), ApprovalError> {
        let slot = self.get_slot(proposal_id)?;
        let mut slot = slot.lock().expect("slot lock poisoned");

        let regrant = match slot.proposal.state {
            OrderState::ApprovalRequested => false,
            OrderState::ApprovalGranted
                if slot.token.as_ref().map_or(true, |t| !t.is_live(now)) =>
            {
                true
            }
            from => {
                return Err(self.fail(
                    &slot.proposal.correlation_id,
                    ApprovalError::IllegalTransition {
                        from,
                        to: OrderState::ApprovalGranted,
                    },
                ))
            }
        };

        let token = ApprovalToken::issue(
            proposal_id,
            &slot.proposal.intent.account_id,
            intent_hash(&slot.proposal.intent),
            now,
            self.token_ttl,
        );

        self.audit
            .append(AuditEventCreate::new(
                EventType::ApprovalGranted,
                &slot.proposal.correlation_id,
                json!({
                    "proposal_id": proposal_id,
                    "token_id": token.token_id,
                    "expires_at": token.expires_at,
                    "reason": reason,
                    "regrant": regrant,
                }),
            ))
            .map_err(ApprovalError::Audit)?;

        slot.proposal.state = OrderState::ApprovalGranted;
        slot.proposal.approval_reason = reason.map(str::to_string);
        slot.proposal.updated_at = now;
        slot.token = Some(token.clone());
        Ok((slot.proposal.clone(), token))
    }

    /// `ApprovalRequested → ApprovalDenied`. A non-empty reason is
    /// mandatory.
    pub fn deny_approval(
        &self,
        proposal_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal, ApprovalError> {
        let slot = self.get_slot(proposal_id)?;
        let mut slot = slot.lock().expect("slot lock poisoned");

        if reason.trim().is_empty() {
            return Err(self.fail(&slot.proposal.correlation_id, ApprovalError::ReasonRequired));
        }
        self.check_transition(&slot.proposal, OrderState::ApprovalDenied)?;

        self.audit
            .append(AuditEventCreate::new(
                EventType::ApprovalDenied,
                &slot.proposal.correlation_id,
                json!({
                    "proposal_id": proposal_id,
                    "reason": reason,
                }),
            ))
            .map_err(ApprovalError::Audit)?;

        slot.proposal.state = OrderState::ApprovalDenied;
        slot.proposal.approval_reason = Some(reason.to_string());
        slot.proposal.updated_at = now;
        if let Some(token) = slot.token.as_mut() {
            token.revoked = true;
        }
        Ok(slot.proposal.clone())
    }

    /// Invalidate a granted-but-unconsumed token without moving the
    /// proposal. Re-approval mints a fresh token via
    /// [`ApprovalService::grant_approval`].
    pub fn revoke_token(
        &self,
        proposal_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal, ApprovalError> {
        let slot = self.get_slot(proposal_id)?;
        let mut slot = slot.lock().expect("slot lock poisoned");

        let live = slot
            .token
            .as_ref()
            .map(|t| t.is_live(now))
            .unwrap_or(false);
        if slot.proposal.state != OrderState::ApprovalGranted || !live {
            let token_id = slot
                .token
                .as_ref()
                .map(|t| t.token_id.clone())
                .unwrap_or_default();
            return Err(self.fail(
                &slot.proposal.correlation_id,
                ApprovalError::TokenInvalid { token_id },
            ));
        }

        let token_id = slot.token.as_ref().expect("checked above").token_id.clone();
        self.audit
            .append(AuditEventCreate::new(
                EventType::ApprovalDenied,
                &slot.proposal.correlation_id,
                json!({
                    "proposal_id": proposal_id,
                    "token_id": token_id,
                    "action": "token_revoked",
                }),
            ))
            .map_err(ApprovalError::Audit)?;

        slot.token.as_mut().expect("checked above").revoked = true;
        slot.proposal.updated_at = now;
        Ok(slot.proposal.clone())
    }

    /// Atomically consume a token and transition
    /// `ApprovalGranted → Submitted`.
    ///
    /// The full validation chain runs under the slot mutex, each failure
    /// with its own error: unknown token, already consumed, revoked,
    /// expired, wrong proposal state, intent-hash mismatch, account
    /// mismatch. On success the token is burned and cannot authorize a
    /// second submission.
    pub fn consume_token(
        &self,
        proposal_id: &str,
        token_id: &str,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal, ApprovalError> {
        let slot = self.get_slot(proposal_id)?;
        let mut slot = slot.lock().expect("slot lock poisoned");
        let correlation = slot.proposal.correlation_id.clone();

        let token = match &slot.token {
            Some(t) if t.token_id == token_id => t.clone(),
            _ => {
                return Err(self.fail(
                    &correlation,
                    ApprovalError::TokenInvalid {
                        token_id: token_id.to_string(),
                    },
                ))
            }
        };

        if token.consumed {
            return Err(self.fail(
                &correlation,
                ApprovalError::TokenAlreadyConsumed {
                    token_id: token_id.to_string(),
                },
            ));
        }
        if token.revoked {
            return Err(self.fail(
                &correlation,
                ApprovalError::TokenInvalid {
                    token_id: token_id.to_string(),
                },
            ));
        }
        if token.is_expired(now) {
            return Err(self.fail(
                &correlation,
                ApprovalError::TokenExpired {
                    token_id: token_id.to_string(),
                },
            ));
        }
        if slot.proposal.state != OrderState::ApprovalGranted {
            return Err(self.fail(
                &correlation,
                ApprovalError::IllegalTransition {
                    from: slot.proposal.state,
                    to: OrderState::Submitted,
                },
            ));
        }
        if intent_hash(&slot.proposal.intent) != token.intent_hash {
            return Err(self.fail(
                &correlation,
                ApprovalError::IntentHashMismatch {
                    proposal_id: proposal_id.to_string(),
                },
            ));
        }
        if token.account_id != account_id {
            return Err(self.fail(
                &correlation,
                ApprovalError::AccountMismatch {
                    expected: token.account_id.clone(),
                    got: account_id.to_string(),
                },
            ));
        }

        self.audit
            .append(AuditEventCreate::new(
                EventType::OrderSubmitted,
                &correlation,
                json!({
                    "proposal_id": proposal_id,
                    "token_id": token_id,
                    "account_id": account_id,
                    "symbol": slot.proposal.intent.instrument.symbol,
                    "side": slot.proposal.intent.side.as_str(),
                    "quantity": slot.proposal.intent.quantity.to_string(),
                    "order_type": slot.proposal.intent.order_type.as_str(),
                }),
            ))
            .map_err(ApprovalError::Audit)?;

        slot.token.as_mut().expect("token present").consumed = true;
        slot.proposal.state = OrderState::Submitted;
        slot.proposal.updated_at = now;
        Ok(slot.proposal.clone())
    }

    /// Record the broker order id on a `Submitted` proposal. Distinct from
    /// the submission transition so restart reconciliation can tell an
    /// acknowledged submission from one that died in flight.
    pub fn record_broker_order_id(
        &self,
        proposal_id: &str,
        broker_order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal, ApprovalError> {
        let slot = self.get_slot(proposal_id)?;
        let mut slot = slot.lock().expect("slot lock poisoned");

        if slot.proposal.state != OrderState::Submitted {
            return Err(self.fail(
                &slot.proposal.correlation_id,
                ApprovalError::IllegalTransition {
                    from: slot.proposal.state,
                    to: OrderState::Submitted,
                },
            ));
        }

        self.audit
            .append(AuditEventCreate::new(
                EventType::OrderConfirmed,
                &slot.proposal.correlation_id,
                json!({
                    "proposal_id": proposal_id,
                    "broker_order_id": broker_order_id,
                }),
            ))
            .map_err(ApprovalError::Audit)?;

        slot.proposal.broker_order_id = Some(broker_order_id.to_string());
        slot.proposal.updated_at = now;
        Ok(slot.proposal.clone())
    }

    /// Drive `Submitted` to the observed broker terminal status, exactly
    /// once. A repeat observation is an illegal transition.
    pub fn mark_terminal(
        &self,
        proposal_id: &str,
        status: OrderStatus,
        data: Value,
        now: DateTime<Utc>,
    ) -> Result<Proposal, ApprovalError> {
        let (target, event_type) = match status {
            OrderStatus::Filled => (OrderState::Filled, EventType::OrderFilled),
            OrderStatus::Cancelled => (OrderState::Cancelled, EventType::OrderCancelled),
            OrderStatus::Rejected => (OrderState::Rejected, EventType::OrderRejected),
            other => {
                let slot = self.get_slot(proposal_id)?;
                let slot = slot.lock().expect("slot lock poisoned");
                warn!(proposal_id, status = other.as_str(), "non-terminal status");
                return Err(self.fail(
                    &slot.proposal.correlation_id,
                    ApprovalError::IllegalTransition {
                        from: slot.proposal.state,
                        to: slot.proposal.state,
                    },
                ));
            }
        };

        let slot = self.get_slot(proposal_id)?;
        let mut slot = slot.lock().expect("slot lock poisoned");
        self.check_transition(&slot.proposal, target)?;

        let mut payload = match data {
            Value::Object(map) => Value::Object(map),
            Value::Null => json!({}),
            other => json!({ "detail": other }),
        };
        payload["proposal_id"] = json!(proposal_id);
        payload["broker_order_id"] = json!(slot.proposal.broker_order_id);

        self.audit
            .append(AuditEventCreate::new(
                event_type,
                &slot.proposal.correlation_id,
                payload,
            ))
            .map_err(ApprovalError::Audit)?;

        slot.proposal.state = target;
        slot.proposal.updated_at = now;
        Ok(slot.proposal.clone())
    }

    // -----------------------------------------------------------------------
    // Restart reconciliation
    // -----------------------------------------------------------------------

    /// Find `Submitted` proposals with no broker order id: submissions
    /// that consumed a token but died before the broker acknowledged.
    /// Each is audited as `ErrorOccurred`; none is silently fixed.
    pub fn detect_orphaned_submissions(&self) -> Vec<String> {
        let slots = self.slots.read().expect("slots lock poisoned");
        let mut orphaned = Vec::new();
        for slot in slots.values() {
            let slot = slot.lock().expect("slot lock poisoned");
            if slot.proposal.state == OrderState::Submitted
                && slot.proposal.broker_order_id.is_none()
            {
                orphaned.push(slot.proposal.proposal_id.clone());
                let _ = self.audit.append(AuditEventCreate::new(
                    EventType::ErrorOccurred,
                    &slot.proposal.correlation_id,
                    json!({
                        "proposal_id": slot.proposal.proposal_id,
                        "error": "submitted proposal has no broker order id; manual reconciliation required",
                    }),
                ));
            }
        }
        orphaned
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn get_slot(&self, proposal_id: &str) -> Result<Arc<Mutex<Slot>>, ApprovalError> {
        let slots = self.slots.read().expect("slots lock poisoned");
        match slots.get(proposal_id) {
            Some(slot) => Ok(Arc::clone(slot)),
            None => {
                drop(slots);
                Err(self.fail(
                    NO_CORRELATION_ID,
                    ApprovalError::UnknownProposal {
                        proposal_id: proposal_id.to_string(),
                    },
                ))
            }
        }
    }

    fn check_transition(
        &self,
        proposal: &Proposal,
        to: OrderState,
    ) -> Result<(), ApprovalError> {
        if OrderState::can_transition(proposal.state, to) {
            Ok(())
        } else {
            Err(self.fail(
                &proposal.correlation_id,
                ApprovalError::IllegalTransition {
                    from: proposal.state,
                    to,
                },
            ))
        }
    }

    /// Audit a failure (best-effort) and hand the error back. Audit-append
    /// failures themselves are not re-audited.
    fn fail(&self, correlation_id: &str, err: ApprovalError) -> ApprovalError {
        if !matches!(err, ApprovalError::Audit(_)) {
            let result = self.audit.append(AuditEventCreate::new(
                EventType::ErrorOccurred,
                correlation_id,
                json!({
                    "code": err.code(),
                    "error": err.to_string(),
                }),
            ));
            if let Err(audit_err) = result {
                warn!(error = %audit_err, "failed to audit approval error");
            }
        }
        err
    }
}
