use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use gk_approval::{ApprovalError, ApprovalService, OrderState};
use gk_audit::{AuditEventCreate, AuditLog, EventType};
use gk_killswitch::KillSwitch;
use gk_schemas::{OrderSide, OrderStatus, OrderType};

use crate::broker::{BrokerAdapter, BrokerError, OrderStatusReport};
use crate::retry::{retry_with_backoff, RetryPolicy};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitError {
    /// Kill switch is enabled; nothing was consumed or submitted.
    TradingHalted(String),
    /// Token/state validation failed; nothing reached the broker.
    Approval(ApprovalError),
    /// Broker could not be reached within the retry budget. The token is
    /// consumed and the proposal sits in `Submitted` without a broker id;
    /// restart reconciliation picks it up.
    BrokerUnavailable(String),
    /// Broker refused the order synchronously; the proposal is `Rejected`.
    BrokerRejected(String),
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::TradingHalted(msg) => write!(f, "{msg}"),
            SubmitError::Approval(e) => write!(f, "{e}"),
            SubmitError::BrokerUnavailable(msg) => write!(f, "broker unavailable: {msg}"),
            SubmitError::BrokerRejected(msg) => write!(f, "broker rejected order: {msg}"),
        }
    }
}

impl std::error::Error for SubmitError {}

impl From<ApprovalError> for SubmitError {
    fn from(e: ApprovalError) -> Self {
        SubmitError::Approval(e)
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Descriptor of an order that reached the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedOrder {
    pub proposal_id: String,
    pub broker_order_id: String,
    pub status: OrderStatus,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
}

/// Outcome of a polling run. `terminal == false` is the soft-failure case:
/// the poll budget ran out with the order still live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOutcome {
    pub terminal: bool,
    pub last_report: OrderStatusReport,
    pub polls_used: u32,
}

// ---------------------------------------------------------------------------
// OrderSubmitter
// ---------------------------------------------------------------------------

/// The only path that hands an order to the broker.
///
/// Submission order of operations is fixed: kill-switch gate, then atomic
/// token consumption (which is the `ApprovalGranted → Submitted`
/// transition), then the broker call with bounded exponential-backoff
/// retries, then broker-id recording or the reject transition.
pub struct OrderSubmitter<B: BrokerAdapter> {
    broker: B,
    approvals: Arc<ApprovalService>,
    audit: Arc<AuditLog>,
    kill_switch: Arc<KillSwitch>,
    retry: RetryPolicy,
}

impl<B: BrokerAdapter> OrderSubmitter<B> {
    pub fn new(
        broker: B,
        approvals: Arc<ApprovalService>,
        audit: Arc<AuditLog>,
        kill_switch: Arc<KillSwitch>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            broker,
            approvals,
            audit,
            kill_switch,
            retry,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn submit_order(
        &self,
        proposal_id: &str,
        token_id: &str,
        account_id: &str,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmittedOrder, SubmitError> {
        if let Err(e) = self.kill_switch.check_or_raise("submit_order") {
            self.audit_error(correlation_id, "TRADING_HALTED", &e.to_string());
            return Err(SubmitError::TradingHalted(e.to_string()));
        }

        // Atomic with the ApprovalGranted → Submitted transition; audited
        // inside the approval service.
        let proposal = self
            .approvals
            .consume_token(proposal_id, token_id, account_id, now)?;

        let ack = retry_with_backoff(self.retry, BrokerError::is_retryable, || {
            self.broker.submit_order(&proposal.intent)
        });

        match ack {
            Ok(ack) => {
                self.approvals
                    .record_broker_order_id(proposal_id, &ack.broker_order_id, now)?;
                info!(
                    proposal_id,
                    broker_order_id = %ack.broker_order_id,
                    correlation_id,
                    "order submitted"
                );
                Ok(SubmittedOrder {
                    proposal_id: proposal_id.to_string(),
                    broker_order_id: ack.broker_order_id,
                    status: ack.status,
                    symbol: proposal.intent.instrument.symbol.clone(),
                    side: proposal.intent.side,
                    quantity: proposal.intent.quantity,
                    order_type: proposal.intent.order_type,
                    limit_price: proposal.intent.limit_price,
                    submitted_at: ack.submitted_at,
                })
            }
            Err(BrokerError::Rejected(msg)) => {
                self.approvals.mark_terminal(
                    proposal_id,
                    OrderStatus::Rejected,
                    json!({ "error": msg, "stage": "synchronous" }),
                    now,
                )?;
                Err(SubmitError::BrokerRejected(msg))
            }
            Err(e) => {
                // Token is burned, proposal stays Submitted without a
                // broker id; reconciliation on restart reports it.
                warn!(proposal_id, error = %e, "broker unreachable after retries");
                self.audit_error(correlation_id, "BROKER_UNAVAILABLE", &e.to_string());
                Err(SubmitError::BrokerUnavailable(e.to_string()))
            }
        }
    }

    /// Poll broker status until terminal or `max_polls` is exhausted.
    ///
    /// Each observed terminal status drives the proposal transition and its
    /// audit event exactly once; exhaustion without a terminal status
    /// returns the last observed report and fabricates nothing.
    pub fn poll_order_until_terminal(
        &self,
        broker_order_id: &str,
        proposal_id: &str,
        correlation_id: &str,
        max_polls: u32,
        interval: Duration,
    ) -> Result<PollOutcome, SubmitError> {
        let mut last_report: Option<OrderStatusReport> = None;

        for poll in 1..=max_polls.max(1) {
            let report = match self.broker.order_status(broker_order_id) {
                Ok(r) => r,
                Err(e) => {
                    self.audit_error(correlation_id, "BROKER_UNAVAILABLE", &e.to_string());
                    return Err(SubmitError::BrokerUnavailable(e.to_string()));
                }
            };

            if report.status.is_terminal() {
                self.apply_terminal(proposal_id, &report)?;
                return Ok(PollOutcome {
                    terminal: true,
                    last_report: report,
                    polls_used: poll,
                });
            }

            last_report = Some(report);
            if poll < max_polls && !interval.is_zero() {
                std::thread::sleep(interval);
            }
        }

        let last_report = last_report.expect("at least one poll ran");
        warn!(
            broker_order_id,
            proposal_id,
            status = last_report.status.as_str(),
            "poll budget exhausted before terminal status"
        );
        Ok(PollOutcome {
            terminal: false,
            last_report,
            polls_used: max_polls.max(1),
        })
    }

    // Drive the proposal to the observed terminal state, tolerating a
    // repeat observation of a state we already applied.
    fn apply_terminal(
        &self,
        proposal_id: &str,
        report: &OrderStatusReport,
    ) -> Result<(), SubmitError> {
        if let Some(current) = self.approvals.get_proposal(proposal_id) {
            let already = matches!(
                (current.state, report.status),
                (OrderState::Filled, OrderStatus::Filled)
                    | (OrderState::Cancelled, OrderStatus::Cancelled)
                    | (OrderState::Rejected, OrderStatus::Rejected)
            );
            if already {
                return Ok(());
            }
        }
        self.approvals.mark_terminal(
            proposal_id,
            report.status,
            json!({
                "filled_quantity": report.filled_quantity.to_string(),
                "average_fill_price": report.average_fill_price.map(|p| p.to_string()),
            }),
            Utc::now(),
        )?;
        Ok(())
    }

    fn audit_error(&self, correlation_id: &str, code: &str, message: &str) {
        let result = self.audit.append(AuditEventCreate::new(
            EventType::ErrorOccurred,
            correlation_id,
            json!({ "code": code, "error": message }),
        ));
        if let Err(e) = result {
            warn!(error = %e, "failed to audit submitter error");
        }
    }
}
