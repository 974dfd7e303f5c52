use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::info;

use gk_approval::{ApprovalError, ApprovalService, OrderState};
use gk_audit::{AuditEventCreate, AuditError, AuditLog, EventType};
use gk_execution::BrokerAdapter;
use gk_killswitch::KillSwitch;
use gk_risk::{DailyCounters, RiskPolicy};
use gk_schemas::ValidationFailure;
use gk_sim::{simulate, SimConfig};

use crate::args::{AccountArgs, OrderArgs, PendingArgs};
use crate::rate_limiter::{RateLimitConfig, RateLimitRefusal, RateLimiter};

/// The fixed allow-list. `request_approval` is the only write.
pub const TOOL_ALLOW_LIST: &[&str] = &[
    "get_portfolio",
    "get_positions",
    "get_cash",
    "simulate_order",
    "evaluate_risk",
    "request_approval",
    "get_pending_approvals",
];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ToolError {
    UnknownTool(String),
    /// The argument payload failed schema decoding (missing field, wrong
    /// type, or a field outside the schema).
    InvalidArguments(String),
    /// The decoded intent failed semantic validation.
    Validation(ValidationFailure),
    RateLimited(RateLimitRefusal),
    TradingHalted(String),
    Broker(String),
    Approval(ApprovalError),
    Audit(AuditError),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "UNKNOWN_TOOL",
            ToolError::InvalidArguments(_) => "INVALID_ARGUMENTS",
            ToolError::Validation(_) => "VALIDATION_FAILED",
            ToolError::RateLimited(RateLimitRefusal::CircuitOpen { .. }) => "CIRCUIT_OPEN",
            ToolError::RateLimited(_) => "RATE_LIMITED",
            ToolError::TradingHalted(_) => "TRADING_HALTED",
            ToolError::Broker(_) => "BROKER_ERROR",
            ToolError::Approval(e) => e.code(),
            ToolError::Audit(_) => "PERSISTENCE_FAILED",
        }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::UnknownTool(name) => write!(f, "unknown tool: {name}"),
            ToolError::InvalidArguments(msg) => write!(f, "invalid arguments: {msg}"),
            ToolError::Validation(v) => write!(f, "{v}"),
            ToolError::RateLimited(r) => write!(f, "{r}"),
            ToolError::TradingHalted(msg) => write!(f, "{msg}"),
            ToolError::Broker(msg) => write!(f, "{msg}"),
            ToolError::Approval(e) => write!(f, "{e}"),
            ToolError::Audit(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<ApprovalError> for ToolError {
    fn from(e: ApprovalError) -> Self {
        ToolError::Approval(e)
    }
}

// ---------------------------------------------------------------------------
// ToolRouter
// ---------------------------------------------------------------------------

/// Thin input router for the agent surface.
///
/// Validates arguments against strict per-tool schemas, applies rate
/// limits, and delegates to the real services. All writes funnel through
/// `request_approval`, which ends at `ApprovalRequested`: a human must
/// still grant, and only the submitter can reach the broker.
pub struct ToolRouter<B: BrokerAdapter> {
    broker: Arc<B>,
    approvals: Arc<ApprovalService>,
    audit: Arc<AuditLog>,
    kill_switch: Arc<KillSwitch>,
    policy: Arc<RwLock<RiskPolicy>>,
    counters: Arc<Mutex<DailyCounters>>,
    sim_config: SimConfig,
    limiter: RateLimiter,
}

impl<B: BrokerAdapter> ToolRouter<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<B>,
        approvals: Arc<ApprovalService>,
        audit: Arc<AuditLog>,
        kill_switch: Arc<KillSwitch>,
        policy: Arc<RwLock<RiskPolicy>>,
        counters: Arc<Mutex<DailyCounters>>,
        sim_config: SimConfig,
        rate_limits: RateLimitConfig,
    ) -> Self {
        Self {
            broker,
            approvals,
            audit,
            kill_switch,
            policy,
            counters,
            sim_config,
            limiter: RateLimiter::new(rate_limits),
        }
    }

    /// Handle one tool invocation.
    ///
    /// Audit shape: `ToolCalled` on entry, then `ToolCompleted` or
    /// `ToolFailed` with the error code. `now` drives both rate-limit
    /// windows and risk/token time arithmetic.
    pub fn call(
        &self,
        session_id: &str,
        tool: &str,
        arguments: Value,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Value, ToolError> {
        self.audit
            .append(AuditEventCreate::new(
                EventType::ToolCalled,
                correlation_id,
                json!({ "tool": tool, "session_id": session_id }),
            ))
            .map_err(ToolError::Audit)?;

        let result = self.dispatch(session_id, tool, arguments, correlation_id, now);

        match &result {
            Ok(_) => {
                let _ = self.audit.append(AuditEventCreate::new(
                    EventType::ToolCompleted,
                    correlation_id,
                    json!({ "tool": tool, "session_id": session_id }),
                ));
            }
            Err(e) => {
                let _ = self.audit.append(AuditEventCreate::new(
                    EventType::ToolFailed,
                    correlation_id,
                    json!({
                        "tool": tool,
                        "session_id": session_id,
                        "code": e.code(),
                        "error": e.to_string(),
                    }),
                ));
            }
        }
        result
    }

    fn dispatch(
        &self,
        session_id: &str,
        tool: &str,
        arguments: Value,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Value, ToolError> {
        if !TOOL_ALLOW_LIST.contains(&tool) {
            return Err(ToolError::UnknownTool(tool.to_string()));
        }

        self.limiter
            .check(tool, session_id, now.timestamp_millis() as f64 / 1000.0)
            .map_err(ToolError::RateLimited)?;

        match tool {
            "get_portfolio" => {
                let args: AccountArgs = decode(arguments)?;
                let portfolio = self.portfolio(&args.account_id)?;
                Ok(json!({ "portfolio": portfolio }))
            }
            "get_positions" => {
                let args: AccountArgs = decode(arguments)?;
                let portfolio = self.portfolio(&args.account_id)?;
                Ok(json!({ "positions": portfolio.positions }))
            }
            "get_cash" => {
                let args: AccountArgs = decode(arguments)?;
                let portfolio = self.portfolio(&args.account_id)?;
                Ok(json!({ "cash": portfolio.cash }))
            }
            "simulate_order" => {
                let args: OrderArgs = decode(arguments)?;
                let intent = args.to_intent();
                intent.validate().map_err(ToolError::Validation)?;
                let portfolio = self.portfolio(&intent.account_id)?;
                let result = simulate(&intent, &portfolio, args.market_price, &self.sim_config);
                let _ = self.audit.append(AuditEventCreate::new(
                    EventType::OrderSimulated,
                    correlation_id,
                    json!({
                        "symbol": intent.instrument.symbol,
                        "market_price": args.market_price.to_string(),
                        "status": result.status,
                    }),
                ));
                Ok(json!({ "simulation": result }))
            }
            "evaluate_risk" => {
                let args: OrderArgs = decode(arguments)?;
                let intent = args.to_intent();
                intent.validate().map_err(ToolError::Validation)?;
                let portfolio = self.portfolio(&intent.account_id)?;
                let simulation =
                    simulate(&intent, &portfolio, args.market_price, &self.sim_config);
                let decision = self.evaluate(&intent, &portfolio, &simulation, now);
                Ok(json!({ "decision": decision, "simulation": simulation }))
            }
            "request_approval" => {
                self.request_approval(decode(arguments)?, correlation_id, now)
            }
            "get_pending_approvals" => {
                let args: PendingArgs = decode(arguments)?;
                let pending = self.approvals.list_pending(args.limit);
                Ok(json!({ "count": pending.len(), "proposals": pending }))
            }
            _ => unreachable!("allow-list checked above"),
        }
    }

    /// The single gated write: validate, snapshot, simulate, risk-check,
    /// store, and park the proposal at `ApprovalRequested` for a human.
    fn request_approval(
        &self,
        args: OrderArgs,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Value, ToolError> {
        self.kill_switch
            .check_or_raise("request_approval")
            .map_err(|e| ToolError::TradingHalted(e.to_string()))?;

        let intent = args.to_intent();
        intent.validate().map_err(ToolError::Validation)?;

        let portfolio = self.portfolio(&intent.account_id)?;
        let _ = self.audit.append(AuditEventCreate::new(
            EventType::PortfolioSnapshotTaken,
            correlation_id,
            json!({
                "account_id": portfolio.account_id,
                "total_value": portfolio.total_value.to_string(),
            }),
        ));

        let simulation = simulate(&intent, &portfolio, args.market_price, &self.sim_config);
        let _ = self.audit.append(AuditEventCreate::new(
            EventType::OrderSimulated,
            correlation_id,
            json!({
                "symbol": intent.instrument.symbol,
                "market_price": args.market_price.to_string(),
                "status": simulation.status,
            }),
        ));

        let decision = self.evaluate(&intent, &portfolio, &simulation, now);

        let proposal = self.approvals.store_proposal(
            intent,
            simulation,
            decision.clone(),
            correlation_id,
            now,
        )?;

        if proposal.state == OrderState::RiskApproved {
            let updated = self.approvals.request_approval(&proposal.proposal_id, now)?;
            info!(
                proposal_id = %updated.proposal_id,
                correlation_id,
                "approval requested via agent tool"
            );
            Ok(json!({
                "proposal_id": updated.proposal_id,
                "state": updated.state,
                "decision": decision,
                "message": "Proposal stored; awaiting human approval",
            }))
        } else {
            Ok(json!({
                "proposal_id": proposal.proposal_id,
                "state": proposal.state,
                "decision": decision,
                "message": "Proposal rejected by risk gate",
            }))
        }
    }

    fn portfolio(&self, account_id: &str) -> Result<gk_schemas::Portfolio, ToolError> {
        self.broker
            .portfolio(account_id)
            .map_err(|e| ToolError::Broker(e.to_string()))
    }

    fn evaluate(
        &self,
        intent: &gk_schemas::OrderIntent,
        portfolio: &gk_schemas::Portfolio,
        simulation: &gk_sim::SimulationResult,
        now: DateTime<Utc>,
    ) -> gk_risk::RiskDecision {
        let counters = self.counters.lock().expect("counters lock poisoned").clone();
        let policy = self.policy.read().expect("policy lock poisoned");
        let engine = policy.build_engine(
            counters.trades_count,
            counters.daily_pnl,
            counters.high_water_mark,
        );
        engine.evaluate(intent, portfolio, simulation, None, now)
    }
}

fn decode<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
