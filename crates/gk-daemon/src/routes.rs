//! Axum router and all HTTP handlers.
//!
//! `build_router` is the single entry point; it attaches the correlation
//! middleware so in-process tests see exactly the production surface.
//! Every mutating handler consults the kill switch before touching state.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use gk_approval::{ApprovalError, OrderState};
use gk_audit::{AuditEventCreate, EventType};
use gk_execution::{BrokerAdapter, SubmitError};
use gk_killswitch::KillSwitchError;
use gk_metrics::LifecycleOutcome;
use gk_schemas::{Cash, OrderType, Portfolio, ValidationFailure};
use gk_sim::simulate;
use gk_tools::ToolError;

use crate::api_types::*;
use crate::correlation::{correlation_middleware, Correlation};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/v1/health", get(health))
        .route("/api/v1/metrics", get(metrics))
        .route("/api/v1/propose", post(propose))
        .route("/api/v1/simulate", post(simulate_order))
        .route("/api/v1/risk/evaluate", post(evaluate_risk))
        .route("/api/v1/approval/request", post(approval_request))
        .route("/api/v1/approval/grant", post(approval_grant))
        .route("/api/v1/approval/deny", post(approval_deny))
        .route("/api/v1/approval/pending", get(approval_pending))
        .route("/api/v1/orders/submit", post(orders_submit))
        .route("/api/v1/orders/cancel", post(orders_cancel))
        .route("/api/v1/kill-switch/status", get(kill_switch_status))
        .route("/api/v1/kill-switch/activate", post(kill_switch_activate))
        .route("/api/v1/kill-switch/deactivate", post(kill_switch_deactivate))
        .route("/api/v1/statistics/summary", get(statistics_summary))
        .route(
            "/api/v1/statistics/pre-live-checklist",
            get(statistics_checklist),
        )
        .route("/api/v1/tools/call", post(tools_call))
        .layer(middleware::from_fn(correlation_middleware))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub(crate) enum ApiError {
    Validation {
        correlation: String,
        failure: ValidationFailure,
    },
    Approval {
        correlation: String,
        error: ApprovalError,
    },
    Submit {
        correlation: String,
        error: SubmitError,
    },
    KillSwitch {
        correlation: String,
        error: KillSwitchError,
    },
    Broker {
        correlation: String,
        message: String,
    },
    Tool {
        correlation: String,
        error: ToolError,
    },
}

fn approval_status(error: &ApprovalError) -> StatusCode {
    match error {
        ApprovalError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, correlation, code, message, detail) = match self {
            ApiError::Validation {
                correlation,
                failure,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                correlation,
                "VALIDATION_FAILED".to_string(),
                failure.to_string(),
                Some(failure.errors),
            ),
            ApiError::Approval { correlation, error } => (
                approval_status(&error),
                correlation,
                error.code().to_string(),
                error.to_string(),
                None,
            ),
            ApiError::Submit { correlation, error } => {
                let (status, code) = match &error {
                    SubmitError::TradingHalted(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "TRADING_HALTED".to_string())
                    }
                    SubmitError::Approval(e) => (approval_status(e), e.code().to_string()),
                    SubmitError::BrokerUnavailable(_) => {
                        (StatusCode::BAD_GATEWAY, "BROKER_UNAVAILABLE".to_string())
                    }
                    SubmitError::BrokerRejected(_) => {
                        (StatusCode::BAD_GATEWAY, "BROKER_REJECTED".to_string())
                    }
                };
                (status, correlation, code, error.to_string(), None)
            }
            ApiError::KillSwitch { correlation, error } => {
                let (status, code) = match &error {
                    KillSwitchError::TradingHalted { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "TRADING_HALTED")
                    }
                    KillSwitchError::CannotDeactivate => {
                        (StatusCode::BAD_REQUEST, "CANNOT_DEACTIVATE")
                    }
                    KillSwitchError::PersistenceFailed(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_FAILED")
                    }
                };
                (status, correlation, code.to_string(), error.to_string(), None)
            }
            ApiError::Broker {
                correlation,
                message,
            } => (
                StatusCode::BAD_GATEWAY,
                correlation,
                "BROKER_ERROR".to_string(),
                message,
                None,
            ),
            ApiError::Tool { correlation, error } => {
                let status = match &error {
                    ToolError::UnknownTool(_) => StatusCode::BAD_REQUEST,
                    ToolError::InvalidArguments(_) | ToolError::Validation(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    ToolError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                    ToolError::TradingHalted(_) => StatusCode::SERVICE_UNAVAILABLE,
                    ToolError::Broker(_) => StatusCode::BAD_GATEWAY,
                    ToolError::Approval(e) => approval_status(e),
                    ToolError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let detail = match &error {
                    ToolError::Validation(v) => Some(v.errors.clone()),
                    _ => None,
                };
                (
                    status,
                    correlation,
                    error.code().to_string(),
                    error.to_string(),
                    detail,
                )
            }
        };

        (
            status,
            Json(ErrorBody {
                code,
                error: message,
                correlation_id: correlation,
                detail,
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// GET /  and  GET /api/v1/health
// ---------------------------------------------------------------------------

async fn root(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "service": st.build.service,
        "version": st.build.version,
        "status": "healthy",
    }))
}

async fn health(State(st): State<Arc<AppState>>, correlation: Correlation) -> impl IntoResponse {
    let kill_switch_active = st.kill_switch.is_enabled();
    let broker_ok = st.broker.portfolio(&st.settings.account_id).is_ok();

    let status = if !broker_ok {
        "unhealthy"
    } else if kill_switch_active {
        "degraded"
    } else {
        "healthy"
    };

    Json(json!({
        "status": status,
        "timestamp": Utc::now(),
        "correlation_id": correlation.as_str(),
        "env": st.settings.env.as_str(),
        "components": {
            "kill_switch": {
                "status": if kill_switch_active { "active" } else { "inactive" },
            },
            "audit_store": {
                "status": "connected",
                "total_events": st.audit.len(),
            },
            "broker": {
                "status": if broker_ok { "connected" } else { "disconnected" },
                "mode": "paper",
            },
            "approval_service": {
                "status": "operational",
                "proposals": st.approvals.proposal_count(),
            },
            "risk_engine": { "status": "operational" },
        },
    }))
}

// ---------------------------------------------------------------------------
// GET /api/v1/metrics
// ---------------------------------------------------------------------------

async fn metrics(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        st.metrics.export(),
    )
}

// ---------------------------------------------------------------------------
// POST /api/v1/propose
// ---------------------------------------------------------------------------

async fn propose(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
    Json(body): Json<ProposeRequest>,
) -> Result<Json<ProposeResponse>, ApiError> {
    check_kill_switch(&st, &correlation, "propose")?;

    let intent = body.to_intent();
    if let Err(failure) = intent.validate() {
        let _ = st.audit.append(AuditEventCreate::new(
            EventType::ErrorOccurred,
            correlation.as_str(),
            json!({
                "code": "VALIDATION_FAILED",
                "errors": failure.errors,
                "path": "/api/v1/propose",
            }),
        ));
        return Err(ApiError::Validation {
            correlation: correlation.0,
            failure,
        });
    }

    let mut warnings = Vec::new();
    if intent.order_type == OrderType::Market {
        warnings.push(
            "Market orders have unbounded slippage risk. Consider using LIMIT orders.".to_string(),
        );
    }
    if let Some(bps) = intent.constraints.as_ref().and_then(|c| c.max_slippage_bps) {
        if bps > 50 {
            warnings.push(format!("High slippage tolerance: {bps} bps"));
        }
    }

    st.audit
        .append(AuditEventCreate::new(
            EventType::OrderProposed,
            correlation.as_str(),
            json!({
                "account_id": intent.account_id,
                "symbol": intent.instrument.symbol,
                "side": intent.side.as_str(),
                "quantity": intent.quantity.to_string(),
                "order_type": intent.order_type.as_str(),
                "reason": intent.reason,
                "strategy_tag": intent.strategy_tag,
                "warnings": warnings,
            }),
        ))
        .map_err(|e| ApiError::Approval {
            correlation: correlation.0.clone(),
            error: ApprovalError::Audit(e),
        })?;

    Ok(Json(ProposeResponse {
        intent,
        validation_passed: true,
        warnings,
        correlation_id: correlation.0,
    }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/simulate
// ---------------------------------------------------------------------------

async fn simulate_order(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
    Json(body): Json<SimulateRequest>,
) -> Result<Json<SimulateResponse>, ApiError> {
    if let Err(failure) = body.intent.validate() {
        return Err(ApiError::Validation {
            correlation: correlation.0,
            failure,
        });
    }

    let portfolio = st
        .broker
        .portfolio(&body.intent.account_id)
        .map_err(|e| ApiError::Broker {
            correlation: correlation.0.clone(),
            message: e.to_string(),
        })?;

    let result = simulate(&body.intent, &portfolio, body.market_price, &st.sim_config);

    let _ = st.audit.append(AuditEventCreate::new(
        EventType::OrderSimulated,
        correlation.as_str(),
        json!({
            "symbol": body.intent.instrument.symbol,
            "market_price": body.market_price.to_string(),
            "status": result.status,
        }),
    ));

    Ok(Json(SimulateResponse {
        result,
        correlation_id: correlation.0,
    }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/risk/evaluate
// ---------------------------------------------------------------------------

async fn evaluate_risk(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
    Json(body): Json<RiskEvaluateRequest>,
) -> Result<Json<RiskEvaluateResponse>, ApiError> {
    if let Err(failure) = body.intent.validate() {
        return Err(ApiError::Validation {
            correlation: correlation.0,
            failure,
        });
    }

    // The caller supplies the portfolio value; evaluation runs against a
    // synthetic all-cash snapshot of that size.
    let portfolio = Portfolio {
        account_id: body.intent.account_id.clone(),
        positions: Vec::new(),
        cash: vec![Cash {
            currency: "USD".to_string(),
            available: body.portfolio_value,
            total: body.portfolio_value,
        }],
        total_value: body.portfolio_value,
        captured_at: Utc::now(),
    };

    let decision = {
        let counters = st.counters.lock().expect("counters lock poisoned").clone();
        let policy = st.policy.read().expect("policy lock poisoned");
        let engine = policy.build_engine(
            counters.trades_count,
            counters.daily_pnl,
            counters.high_water_mark,
        );
        engine.evaluate(&body.intent, &portfolio, &body.simulation, None, Utc::now())
    };

    let _ = st.audit.append(AuditEventCreate::new(
        EventType::RiskGateEvaluated,
        correlation.as_str(),
        json!({
            "symbol": body.intent.instrument.symbol,
            "decision": decision.decision,
            "violated_rules": decision.violated_rules,
            "reason": decision.reason,
        }),
    ));
    if decision.is_rejected() {
        for rule in &decision.violated_rules {
            st.metrics.record_risk_rejection(rule.as_str());
        }
    }

    Ok(Json(RiskEvaluateResponse {
        decision,
        correlation_id: correlation.0,
    }))
}

// ---------------------------------------------------------------------------
// Approval endpoints
// ---------------------------------------------------------------------------

async fn approval_request(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
    Json(body): Json<ApprovalRequestBody>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let updated = st
        .approvals
        .request_approval(&body.proposal_id, Utc::now())
        .map_err(|error| ApiError::Approval {
            correlation: correlation.0.clone(),
            error,
        })?;

    st.metrics
        .record_proposal(&updated.intent.instrument.symbol, updated.state.as_str());

    Ok(Json(ApprovalResponse {
        proposal_id: updated.proposal_id.clone(),
        state: updated.state,
        message: format!("Approval requested for proposal {}", updated.proposal_id),
        correlation_id: correlation.0,
    }))
}

async fn approval_grant(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
    Json(body): Json<GrantApprovalBody>,
) -> Result<Json<GrantApprovalResponse>, ApiError> {
    let (updated, token) = st
        .approvals
        .grant_approval(&body.proposal_id, body.reason.as_deref(), Utc::now())
        .map_err(|error| ApiError::Approval {
            correlation: correlation.0.clone(),
            error,
        })?;

    st.metrics
        .record_proposal(&updated.intent.instrument.symbol, updated.state.as_str());

    Ok(Json(GrantApprovalResponse {
        proposal_id: updated.proposal_id,
        token: token.token_id,
        expires_at: token.expires_at,
        message: format!("Approval granted. Token expires at {}", token.expires_at),
        correlation_id: correlation.0,
    }))
}

async fn approval_deny(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
    Json(body): Json<DenyApprovalBody>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let updated = st
        .approvals
        .deny_approval(&body.proposal_id, &body.reason, Utc::now())
        .map_err(|error| ApiError::Approval {
            correlation: correlation.0.clone(),
            error,
        })?;

    st.stats.record_rejected(
        &updated.proposal_id,
        LifecycleOutcome::ApprovalDenied,
        &body.reason,
    );

    Ok(Json(ApprovalResponse {
        proposal_id: updated.proposal_id,
        state: updated.state,
        message: format!("Approval denied: {}", body.reason),
        correlation_id: correlation.0,
    }))
}

#[derive(serde::Deserialize)]
struct PendingQuery {
    #[serde(default = "default_pending_limit")]
    limit: usize,
}

fn default_pending_limit() -> usize {
    100
}

async fn approval_pending(
    State(st): State<Arc<AppState>>,
    Query(query): Query<PendingQuery>,
) -> Json<PendingProposalsResponse> {
    let proposals = st.approvals.list_pending(query.limit);
    Json(PendingProposalsResponse {
        count: proposals.len(),
        proposals,
    })
}

// ---------------------------------------------------------------------------
// POST /api/v1/orders/submit
// ---------------------------------------------------------------------------

async fn orders_submit(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
    Json(body): Json<SubmitOrderBody>,
) -> Result<Json<SubmitOrderResponse>, ApiError> {
    let started = Instant::now();
    let now = Utc::now();

    let order = st
        .submitter
        .submit_order(
            &body.proposal_id,
            &body.token_id,
            &body.account_id,
            correlation.as_str(),
            now,
        )
        .map_err(|error| ApiError::Submit {
            correlation: correlation.0.clone(),
            error,
        })?;

    st.metrics
        .observe_order_latency("submission", started.elapsed().as_secs_f64());
    st.stats.record_proposed(
        &order.proposal_id,
        &order.symbol,
        order.side.as_str(),
        now,
    );
    st.stats.record_submitted(&order.proposal_id, now);
    {
        let mut counters = st.counters.lock().expect("counters lock poisoned");
        counters.trades_count += 1;
    }

    info!(
        proposal_id = %order.proposal_id,
        broker_order_id = %order.broker_order_id,
        "order submitted via API"
    );

    Ok(Json(SubmitOrderResponse {
        proposal_id: order.proposal_id,
        broker_order_id: order.broker_order_id,
        status: order.status,
        symbol: order.symbol,
        side: order.side,
        quantity: order.quantity,
        order_type: order.order_type,
        limit_price: order.limit_price,
        submitted_at: order.submitted_at,
        correlation_id: correlation.0,
    }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/orders/cancel
// ---------------------------------------------------------------------------

/// Cancel verb split: before submission a cancel is an approval denial (or
/// a token revocation); after submission it is forwarded to the broker and
/// the proposal only reaches `Cancelled` when polling observes the
/// broker-side terminal status.
async fn orders_cancel(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
    Json(body): Json<CancelOrderBody>,
) -> Result<Json<CancelOrderResponse>, ApiError> {
    check_kill_switch(&st, &correlation, "cancel_order")?;
    let now = Utc::now();

    let proposal = st
        .approvals
        .get_proposal(&body.proposal_id)
        .ok_or_else(|| ApiError::Approval {
            correlation: correlation.0.clone(),
            error: ApprovalError::UnknownProposal {
                proposal_id: body.proposal_id.clone(),
            },
        })?;

    let (updated, action) = match proposal.state {
        OrderState::ApprovalRequested => {
            let updated = st
                .approvals
                .deny_approval(&body.proposal_id, &body.reason, now)
                .map_err(|error| ApiError::Approval {
                    correlation: correlation.0.clone(),
                    error,
                })?;
            (updated, "approval_denied")
        }
        OrderState::ApprovalGranted => {
            let updated = st
                .approvals
                .revoke_token(&body.proposal_id, now)
                .map_err(|error| ApiError::Approval {
                    correlation: correlation.0.clone(),
                    error,
                })?;
            (updated, "token_revoked")
        }
        OrderState::Submitted => {
            let broker_order_id =
                proposal
                    .broker_order_id
                    .clone()
                    .ok_or_else(|| ApiError::Broker {
                        correlation: correlation.0.clone(),
                        message: "submitted proposal has no broker order id yet".to_string(),
                    })?;
            st.broker
                .cancel_order(&broker_order_id)
                .map_err(|e| ApiError::Broker {
                    correlation: correlation.0.clone(),
                    message: e.to_string(),
                })?;
            // The broker drives the terminal transition; observe it now.
            st.submitter
                .poll_order_until_terminal(
                    &broker_order_id,
                    &body.proposal_id,
                    correlation.as_str(),
                    5,
                    std::time::Duration::ZERO,
                )
                .map_err(|error| ApiError::Submit {
                    correlation: correlation.0.clone(),
                    error,
                })?;
            let updated = st
                .approvals
                .get_proposal(&body.proposal_id)
                .expect("proposal existed above");
            (updated, "cancel_requested")
        }
        from => {
            return Err(ApiError::Approval {
                correlation: correlation.0.clone(),
                error: ApprovalError::IllegalTransition {
                    from,
                    to: OrderState::Cancelled,
                },
            })
        }
    };

    Ok(Json(CancelOrderResponse {
        proposal_id: updated.proposal_id,
        state: updated.state,
        action: action.to_string(),
        correlation_id: correlation.0,
    }))
}

// ---------------------------------------------------------------------------
// Kill switch endpoints
// ---------------------------------------------------------------------------

async fn kill_switch_status(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let state = st.kill_switch.state();
    Json(json!({
        "enabled": st.kill_switch.is_enabled(),
        "activated_at": state.activated_at,
        "activated_by": state.activated_by,
        "reason": state.reason,
    }))
}

async fn kill_switch_activate(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
    body: Option<Json<KillSwitchActivateBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "Manual activation via API".to_string());

    let state = st.kill_switch.activate("api", &reason);
    st.audit
        .append(AuditEventCreate::new(
            EventType::KillSwitchActivated,
            correlation.as_str(),
            json!({
                "reason": reason,
                "activated_at": state.activated_at,
            }),
        ))
        .map_err(|e| ApiError::Approval {
            correlation: correlation.0.clone(),
            error: ApprovalError::Audit(e),
        })?;

    Ok(Json(json!({
        "success": true,
        "enabled": true,
        "activated_at": state.activated_at,
        "activated_by": state.activated_by,
        "reason": state.reason,
        "message": "Kill switch activated - all trading operations are now blocked",
    })))
}

async fn kill_switch_deactivate(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
) -> Result<impl IntoResponse, ApiError> {
    let state = st
        .kill_switch
        .deactivate("api")
        .map_err(|error| ApiError::KillSwitch {
            correlation: correlation.0.clone(),
            error,
        })?;

    st.audit
        .append(AuditEventCreate::new(
            EventType::KillSwitchReleased,
            correlation.as_str(),
            json!({ "deactivated_by": "api" }),
        ))
        .map_err(|e| ApiError::Approval {
            correlation: correlation.0.clone(),
            error: ApprovalError::Audit(e),
        })?;

    Ok(Json(json!({
        "success": true,
        "enabled": state.enabled,
        "message": "Kill switch deactivated - trading operations resumed",
    })))
}

// ---------------------------------------------------------------------------
// Statistics endpoints
// ---------------------------------------------------------------------------

async fn statistics_summary(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(st.stats.summary())
}

async fn statistics_checklist(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(st.stats.pre_live_status())
}

// ---------------------------------------------------------------------------
// POST /api/v1/tools/call
// ---------------------------------------------------------------------------

async fn tools_call(
    State(st): State<Arc<AppState>>,
    correlation: Correlation,
    Json(body): Json<ToolCallBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let result = st
        .tools
        .call(
            &body.session_id,
            &body.tool,
            body.arguments,
            correlation.as_str(),
            Utc::now(),
        )
        .map_err(|error| ApiError::Tool {
            correlation: correlation.0.clone(),
            error,
        })?;
    Ok(Json(json!({
        "result": result,
        "correlation_id": correlation.0,
    })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_kill_switch(
    st: &AppState,
    correlation: &Correlation,
    operation: &str,
) -> Result<(), ApiError> {
    st.kill_switch.check_or_raise(operation).map_err(|error| {
        let _ = st.audit.append(AuditEventCreate::new(
            EventType::ErrorOccurred,
            correlation.as_str(),
            json!({ "code": "TRADING_HALTED", "operation": operation }),
        ));
        ApiError::KillSwitch {
            correlation: correlation.0.clone(),
            error,
        }
    })
}
