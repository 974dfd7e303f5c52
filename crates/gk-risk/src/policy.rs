//! Declarative risk policy, loaded from YAML.
//!
//! ```yaml
//! limits:
//!   max_notional: "50000.00"
//!   max_position_pct: "10.0"
//! trading_hours:
//!   market_open_utc: "14:30"
//!   market_close_utc: "21:00"
//! rules_enabled:
//!   R5: true
//! advanced:
//!   max_position_volatility: 0.02
//! ```
//!
//! The policy is replaced wholesale on reload; engines are constructed from
//! a loaded policy plus the caller-maintained daily counters.

use std::fs;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::advanced::{AdvancedRiskEngine, AdvancedRiskLimits};
use crate::engine::RiskEngine;
use crate::types::{RiskLimits, RulesEnabled, TradingHours};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum PolicyError {
    NotFound(String),
    InvalidYaml(String),
    /// The policy document itself declares an active kill switch; refusing
    /// to load is the fail-closed interpretation.
    KillSwitchActive(String),
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::NotFound(path) => write!(f, "policy file not found: {path}"),
            PolicyError::InvalidYaml(msg) => write!(f, "invalid policy: {msg}"),
            PolicyError::KillSwitchActive(reason) => {
                write!(f, "KILL SWITCH ACTIVE: {reason}")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

// ---------------------------------------------------------------------------
// RiskPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    pub limits: RiskLimits,
    pub trading_hours: TradingHours,
    pub rules_enabled: RulesEnabled,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedRiskLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_switch: Option<PolicyKillSwitch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyKillSwitch {
    enabled: bool,
    reason: Option<String>,
}

impl RiskPolicy {
    /// Build the evaluation engine for this policy with the caller-owned
    /// daily counters. The advanced engine is composed iff the policy
    /// carries an `advanced` block.
    pub fn build_engine(
        &self,
        daily_trades_count: u32,
        daily_pnl: Decimal,
        high_water_mark: Option<Decimal>,
    ) -> RiskEngine {
        let engine = RiskEngine::new(
            self.limits.clone(),
            self.trading_hours.clone(),
            self.rules_enabled.clone(),
            daily_trades_count,
            daily_pnl,
        );
        match &self.advanced {
            Some(advanced) => engine.with_advanced(AdvancedRiskEngine::new(
                advanced.clone(),
                high_water_mark,
            )),
            None => engine,
        }
    }
}

/// Load and validate a policy document.
pub fn load_policy(path: impl AsRef<Path>) -> Result<RiskPolicy, PolicyError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(PolicyError::NotFound(path.display().to_string()));
    }
    let content =
        fs::read_to_string(path).map_err(|e| PolicyError::InvalidYaml(e.to_string()))?;
    parse_policy(&content)
}

/// Parse a policy from YAML text. Exposed separately so reload paths and
/// tests can avoid the filesystem.
pub fn parse_policy(content: &str) -> Result<RiskPolicy, PolicyError> {
    let policy: RiskPolicy =
        serde_yaml::from_str(content).map_err(|e| PolicyError::InvalidYaml(e.to_string()))?;

    if let Some(ks) = &policy.kill_switch {
        if ks.enabled {
            return Err(PolicyError::KillSwitchActive(
                ks.reason
                    .clone()
                    .unwrap_or_else(|| "Kill switch activated".to_string()),
            ));
        }
    }

    Ok(policy)
}
