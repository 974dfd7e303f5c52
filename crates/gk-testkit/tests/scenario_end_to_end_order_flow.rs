//! End-to-end order flow against the full in-process service graph:
//! simulate → risk gate → approval protocol → paper broker → fill, with
//! the audit trail checked at the end.

use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::json;

use gk_approval::OrderState;
use gk_audit::{AuditQuery, EventType};
use gk_execution::{BrokerAdapter, SubmitError};
use gk_killswitch::KillSwitchError;
use gk_risk::{AdvancedRiskLimits, Decision, RuleId, VolatilityMetrics};
use gk_schemas::OrderStatus;
use gk_sim::{simulate, SimConfig, SimStatus};
use gk_testkit::{aapl_limit_buy, gme_market_buy, tsla_market_buy, ServiceHarness};

// ---------------------------------------------------------------------------
// Scenario: happy path to FILLED
// ---------------------------------------------------------------------------

#[test]
fn happy_path_buy_10_aapl_fills_at_150_50() {
    let h = ServiceHarness::new("GK_E2E_KS_HAPPY");
    let now = Utc::now();
    let corr = "corr-e2e-happy";

    // Portfolio snapshot: $100,000 cash.
    let portfolio = h.broker.portfolio("DU123456").unwrap();
    assert_eq!(portfolio.total_value, dec!(100000.00));

    // Simulate at market price 150.00.
    let intent = aapl_limit_buy();
    let sim = simulate(&intent, &portfolio, dec!(150.00), &SimConfig::default());
    assert_eq!(sim.status, SimStatus::Success);
    assert_eq!(sim.gross_notional, Some(dec!(1500.00)));

    // Deterministic risk gate: approve, no violations.
    let engine = h.policy.build_engine(0, dec!(0), None);
    let decision = engine.evaluate(&intent, &portfolio, &sim, None, now);
    assert_eq!(decision.decision, Decision::Approve);
    assert!(decision.violated_rules.is_empty());

    // Lifecycle: store → request → grant.
    let proposal = h
        .approvals
        .store_proposal(intent, sim, decision, corr, now)
        .unwrap();
    assert_eq!(proposal.state, OrderState::RiskApproved);
    h.approvals.request_approval(&proposal.proposal_id, now).unwrap();
    let (_, token) = h
        .approvals
        .grant_approval(&proposal.proposal_id, Some("rebalance approved"), now)
        .unwrap();
    assert_eq!(token.expires_at, now + chrono::Duration::minutes(5));

    // Submit consumes the token and reaches the paper broker.
    let order = h
        .submitter
        .submit_order(&proposal.proposal_id, &token.token_id, "DU123456", corr, now)
        .unwrap();
    assert_eq!(order.broker_order_id, "PAPER-1");
    assert_eq!(
        h.approvals.get_proposal(&proposal.proposal_id).unwrap().state,
        OrderState::Submitted
    );

    // Broker fills at 150.50; polling observes it.
    h.broker.simulate_fill("PAPER-1", dec!(150.50)).unwrap();
    let outcome = h
        .submitter
        .poll_order_until_terminal("PAPER-1", &proposal.proposal_id, corr, 10, Duration::ZERO)
        .unwrap();
    assert!(outcome.terminal);
    assert_eq!(outcome.last_report.status, OrderStatus::Filled);
    assert_eq!(outcome.last_report.average_fill_price, Some(dec!(150.50)));
    assert_eq!(
        h.approvals.get_proposal(&proposal.proposal_id).unwrap().state,
        OrderState::Filled
    );

    // Audit trail: every lifecycle event shares the one correlation id.
    let events = h.audit.query(&AuditQuery::for_correlation(corr));
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    for expected in [
        EventType::OrderProposed,
        EventType::RiskGateEvaluated,
        EventType::ApprovalRequested,
        EventType::ApprovalGranted,
        EventType::OrderSubmitted,
        EventType::OrderConfirmed,
        EventType::OrderFilled,
    ] {
        assert!(types.contains(&expected), "missing {expected:?}");
    }
    assert!(events.iter().all(|e| e.correlation_id == corr));

    // ApprovalGranted strictly precedes OrderSubmitted (query is newest
    // first, so the granted event sits at a higher index).
    let granted = types.iter().position(|t| *t == EventType::ApprovalGranted).unwrap();
    let submitted = types.iter().position(|t| *t == EventType::OrderSubmitted).unwrap();
    assert!(granted > submitted);
}

// ---------------------------------------------------------------------------
// Scenario: R1 rejection stops the lifecycle cold
// ---------------------------------------------------------------------------

#[test]
fn oversized_tsla_order_is_rejected_by_r1_and_cannot_proceed() {
    let h = ServiceHarness::new("GK_E2E_KS_R1");
    let now = Utc::now();
    let corr = "corr-e2e-r1";

    let portfolio = h.broker.portfolio("DU123456").unwrap();
    let intent = tsla_market_buy();
    // 200 × $300.00 = $60,000 gross against the $50,000 limit.
    let sim = simulate(&intent, &portfolio, dec!(300.00), &SimConfig::default());
    assert_eq!(sim.status, SimStatus::Success);
    assert_eq!(sim.gross_notional, Some(dec!(60000.00)));

    let engine = h.policy.build_engine(0, dec!(0), None);
    let decision = engine.evaluate(&intent, &portfolio, &sim, None, now);
    assert_eq!(decision.decision, Decision::Reject);
    assert!(decision.violated_rules.contains(&RuleId::R1));
    assert!(decision
        .reason
        .contains("Notional $60,000.00 exceeds limit $50,000.00"));

    let proposal = h
        .approvals
        .store_proposal(intent, sim, decision, corr, now)
        .unwrap();
    assert_eq!(proposal.state, OrderState::RiskRejected);

    let err = h.approvals.request_approval(&proposal.proposal_id, now).unwrap_err();
    assert_eq!(
        err,
        gk_approval::ApprovalError::IllegalTransition {
            from: OrderState::RiskRejected,
            to: OrderState::ApprovalRequested,
        }
    );
}

// ---------------------------------------------------------------------------
// Scenario: kill switch halts every entry point
// ---------------------------------------------------------------------------

#[test]
fn kill_switch_halts_submission_and_deactivation_respects_env_override() {
    let h = ServiceHarness::new("GK_E2E_KS_HALT");
    let now = Utc::now();
    let corr = "corr-e2e-halt";

    // Set up a granted proposal first.
    let portfolio = h.broker.portfolio("DU123456").unwrap();
    let intent = aapl_limit_buy();
    let sim = simulate(&intent, &portfolio, dec!(150.00), &SimConfig::default());
    let engine = h.policy.build_engine(0, dec!(0), None);
    let decision = engine.evaluate(&intent, &portfolio, &sim, None, now);
    let proposal = h
        .approvals
        .store_proposal(intent, sim, decision, corr, now)
        .unwrap();
    h.approvals.request_approval(&proposal.proposal_id, now).unwrap();
    let (_, token) = h.approvals.grant_approval(&proposal.proposal_id, None, now).unwrap();

    // Halt.
    h.kill_switch.activate("ops", "emergency halt for reconciliation");
    assert!(h.kill_switch.is_enabled());

    let err = h
        .submitter
        .submit_order(&proposal.proposal_id, &token.token_id, "DU123456", corr, now)
        .unwrap_err();
    assert!(matches!(err, SubmitError::TradingHalted(_)));
    assert_eq!(
        h.approvals.get_proposal(&proposal.proposal_id).unwrap().state,
        OrderState::ApprovalGranted,
        "token must not be consumed while halted"
    );

    // The blocked attempt itself is audited.
    let events = h.audit.query(&AuditQuery::for_correlation(corr));
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::ErrorOccurred
            && e.data["code"] == json!("TRADING_HALTED")));

    // Env override present: deactivation refused.
    std::env::set_var("GK_E2E_KS_HALT", "1");
    let err = h.kill_switch.deactivate("ops").unwrap_err();
    assert_eq!(err, KillSwitchError::CannotDeactivate);
    std::env::remove_var("GK_E2E_KS_HALT");

    // Override gone: deactivate and the submission goes through.
    h.kill_switch.deactivate("ops").unwrap();
    h.submitter
        .submit_order(&proposal.proposal_id, &token.token_id, "DU123456", corr, now)
        .unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: R9 volatility rejection with suggested size
// ---------------------------------------------------------------------------

#[test]
fn gme_volatility_rejection_reports_suggested_size() {
    let h = ServiceHarness::new("GK_E2E_KS_R9");
    let now = Utc::now();

    let portfolio = h.broker.portfolio("DU123456").unwrap();
    let intent = gme_market_buy();
    // 100 × $300.00 = $30,000 gross.
    let sim = simulate(&intent, &portfolio, dec!(300.00), &SimConfig::default());
    assert_eq!(sim.status, SimStatus::Success);
    assert_eq!(sim.gross_notional, Some(dec!(30000.00)));

    let mut policy = h.policy.clone();
    policy.advanced = Some(AdvancedRiskLimits::default());
    let engine = policy.build_engine(0, dec!(0), None);

    // 0.50 annual vol against a 2% volatility budget:
    // 30,000 × 0.50 / 100,000 × 100 = 15% → reject, suggest
    // 100,000 × 0.02 / 0.50 = 4,000.
    let decision = engine.evaluate(
        &intent,
        &portfolio,
        &sim,
        Some(&VolatilityMetrics::symbol(0.50)),
        now,
    );
    assert_eq!(decision.decision, Decision::Reject);
    assert!(decision.violated_rules.contains(&RuleId::R9));
    assert!(decision.reason.contains("Suggested max size: $4,000"));

    let proposal = h
        .approvals
        .store_proposal(intent, sim, decision, "corr-e2e-r9", now)
        .unwrap();
    assert_eq!(proposal.state, OrderState::RiskRejected);
}

// ---------------------------------------------------------------------------
// Scenario: broker-side rejection observed by polling
// ---------------------------------------------------------------------------

#[test]
fn broker_side_reject_drives_proposal_to_rejected() {
    let h = ServiceHarness::new("GK_E2E_KS_BRKREJ");
    let now = Utc::now();
    let corr = "corr-e2e-brkrej";

    let portfolio = h.broker.portfolio("DU123456").unwrap();
    let intent = aapl_limit_buy();
    let sim = simulate(&intent, &portfolio, dec!(150.00), &SimConfig::default());
    let engine = h.policy.build_engine(0, dec!(0), None);
    let decision = engine.evaluate(&intent, &portfolio, &sim, None, now);
    let proposal = h
        .approvals
        .store_proposal(intent, sim, decision, corr, now)
        .unwrap();
    h.approvals.request_approval(&proposal.proposal_id, now).unwrap();
    let (_, token) = h.approvals.grant_approval(&proposal.proposal_id, None, now).unwrap();
    let order = h
        .submitter
        .submit_order(&proposal.proposal_id, &token.token_id, "DU123456", corr, now)
        .unwrap();

    h.broker.simulate_reject(&order.broker_order_id).unwrap();
    let outcome = h
        .submitter
        .poll_order_until_terminal(&order.broker_order_id, &proposal.proposal_id, corr, 5, Duration::ZERO)
        .unwrap();
    assert!(outcome.terminal);
    assert_eq!(outcome.last_report.status, OrderStatus::Rejected);
    assert_eq!(
        h.approvals.get_proposal(&proposal.proposal_id).unwrap().state,
        OrderState::Rejected
    );

    let events = h.audit.query(&AuditQuery::for_correlation(corr));
    assert!(events.iter().any(|e| e.event_type == EventType::OrderRejected));
}
