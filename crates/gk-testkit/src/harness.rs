use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use gk_approval::ApprovalService;
use gk_audit::AuditLog;
use gk_broker_paper::PaperBroker;
use gk_execution::{OrderSubmitter, RetryPolicy};
use gk_killswitch::KillSwitch;
use gk_risk::{RiskPolicy, TradingHours};

/// The full service graph wired in-process, against temp state files.
pub struct ServiceHarness {
    pub audit: Arc<AuditLog>,
    pub kill_switch: Arc<KillSwitch>,
    pub approvals: Arc<ApprovalService>,
    pub broker: Arc<PaperBroker>,
    pub submitter: OrderSubmitter<Arc<PaperBroker>>,
    pub policy: RiskPolicy,
    _tmp: tempfile::TempDir,
}

impl ServiceHarness {
    /// Build a harness seeded with $100,000 of paper cash. `env_key` names
    /// the kill-switch override variable; use a unique one per test so
    /// suites can run in parallel.
    pub fn new(env_key: &str) -> Self {
        Self::with_cash(env_key, dec!(100000.00))
    }

    pub fn with_cash(env_key: &str, cash: Decimal) -> Self {
        let tmp = tempfile::tempdir().expect("create temp dir");
        let audit = Arc::new(AuditLog::in_memory());
        let kill_switch = Arc::new(KillSwitch::with_env_key(
            tmp.path().join("kill_switch.json"),
            env_key,
        ));
        let approvals = Arc::new(ApprovalService::with_defaults(Arc::clone(&audit), 1000));
        let broker = Arc::new(PaperBroker::new("DU123456", cash));
        let submitter = OrderSubmitter::new(
            Arc::clone(&broker),
            Arc::clone(&approvals),
            Arc::clone(&audit),
            Arc::clone(&kill_switch),
            RetryPolicy::immediate(3),
        );

        let policy = RiskPolicy {
            trading_hours: TradingHours::always_open(),
            ..Default::default()
        };

        Self {
            audit,
            kill_switch,
            approvals,
            broker,
            submitter,
            policy,
            _tmp: tmp,
        }
    }
}
