//! Shared runtime state for the daemon.
//!
//! All process-wide singletons (audit log, kill switch, approval service,
//! submitter, metrics, statistics) are constructed once here and handed to
//! handlers as `State<Arc<AppState>>`. No implicit globals.

use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use tracing::warn;

use gk_approval::ApprovalService;
use gk_audit::AuditLog;
use gk_broker_paper::PaperBroker;
use gk_config::Settings;
use gk_execution::{OrderSubmitter, RetryPolicy};
use gk_killswitch::KillSwitch;
use gk_metrics::{MetricsCollector, StatisticsCollector};
use gk_risk::{load_policy, DailyCounters, RiskPolicy};
use gk_sim::SimConfig;
use gk_tools::{RateLimitConfig, ToolRouter};

/// Static build metadata included in liveness / health responses.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (via `Arc`) handle shared across all Axum handlers.
pub struct AppState {
    pub build: BuildInfo,
    pub settings: Settings,
    pub audit: Arc<AuditLog>,
    pub kill_switch: Arc<KillSwitch>,
    pub approvals: Arc<ApprovalService>,
    pub broker: Arc<PaperBroker>,
    pub submitter: OrderSubmitter<Arc<PaperBroker>>,
    pub policy: Arc<RwLock<RiskPolicy>>,
    pub counters: Arc<Mutex<DailyCounters>>,
    pub sim_config: SimConfig,
    pub metrics: Arc<MetricsCollector>,
    pub stats: Arc<StatisticsCollector>,
    pub tools: ToolRouter<PaperBroker>,
}

impl AppState {
    /// Wire the full service graph from settings.
    ///
    /// The risk policy file is optional at boot: a missing or invalid file
    /// falls back to policy defaults with a warning, matching the
    /// fail-to-defaults posture of the rest of the stack. A policy whose
    /// own kill-switch block is active refuses startup.
    pub fn build(settings: Settings) -> Result<Arc<Self>> {
        let audit = Arc::new(
            AuditLog::with_jsonl_sink(&settings.audit_log_path, settings.audit_hash_chain)
                .context("open audit log")?,
        );
        let kill_switch = Arc::new(KillSwitch::with_env_key(
            &settings.kill_switch_path,
            &settings.kill_switch_env_key,
        ));

        let policy = match load_policy(&settings.risk_policy_path) {
            Ok(policy) => policy,
            Err(gk_risk::PolicyError::KillSwitchActive(reason)) => {
                anyhow::bail!("risk policy declares an active kill switch: {reason}")
            }
            Err(e) => {
                warn!(error = %e, "failed to load risk policy; using defaults");
                RiskPolicy::default()
            }
        };
        let policy = Arc::new(RwLock::new(policy));

        let approvals = Arc::new(ApprovalService::new(
            Arc::clone(&audit),
            settings.max_proposals,
            chrono::Duration::minutes(settings.token_ttl_minutes),
        ));

        let broker = Arc::new(PaperBroker::new(
            settings.account_id.clone(),
            settings.paper_starting_cash,
        ));

        let submitter = OrderSubmitter::new(
            Arc::clone(&broker),
            Arc::clone(&approvals),
            Arc::clone(&audit),
            Arc::clone(&kill_switch),
            RetryPolicy::default(),
        );

        let counters = Arc::new(Mutex::new(DailyCounters::default()));
        let stats = Arc::new(StatisticsCollector::with_snapshot(
            &settings.statistics_path,
        ));
        let sim_config = SimConfig::default();

        let tools = ToolRouter::new(
            Arc::clone(&broker),
            Arc::clone(&approvals),
            Arc::clone(&audit),
            Arc::clone(&kill_switch),
            Arc::clone(&policy),
            Arc::clone(&counters),
            sim_config.clone(),
            RateLimitConfig::default(),
        );

        let state = Arc::new(Self {
            build: BuildInfo {
                service: "gk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            settings,
            audit,
            kill_switch,
            approvals,
            broker,
            submitter,
            policy,
            counters,
            sim_config,
            metrics: Arc::new(MetricsCollector::new()),
            stats,
            tools,
        });

        let _ = state.audit.append(gk_audit::AuditEventCreate::new(
            gk_audit::EventType::BrokerConnected,
            gk_audit::NO_CORRELATION_ID,
            serde_json::json!({
                "mode": "paper",
                "account_id": state.settings.account_id,
            }),
        ));

        // Restart reconciliation: surface, never silently fix.
        let orphaned = state.approvals.detect_orphaned_submissions();
        if !orphaned.is_empty() {
            warn!(count = orphaned.len(), "orphaned submissions detected at boot");
        }

        Ok(state)
    }
}
