use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// EnvTier
// ---------------------------------------------------------------------------

/// Deployment tier. `Live` changes nothing in code paths by itself but is
/// surfaced in health output and gates operator expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvTier {
    Dev,
    Paper,
    Live,
}

impl Default for EnvTier {
    fn default() -> Self {
        EnvTier::Dev
    }
}

impl FromStr for EnvTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(EnvTier::Dev),
            "paper" => Ok(EnvTier::Paper),
            "live" => Ok(EnvTier::Live),
            other => bail!("unknown ENV tier: {other:?} (expected dev, paper, or live)"),
        }
    }
}

impl EnvTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvTier::Dev => "dev",
            EnvTier::Paper => "paper",
            EnvTier::Live => "live",
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: u32,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 1,
        }
    }
}

/// Typed service settings, deserialized from the merged config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub env: EnvTier,
    pub bind_addr: String,
    pub account_id: String,
    pub audit_log_path: PathBuf,
    pub audit_hash_chain: bool,
    pub kill_switch_path: PathBuf,
    /// Environment variable consulted for the kill-switch override.
    pub kill_switch_env_key: String,
    pub statistics_path: PathBuf,
    pub risk_policy_path: PathBuf,
    pub max_proposals: usize,
    pub token_ttl_minutes: i64,
    pub paper_starting_cash: Decimal,
    pub broker: BrokerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: EnvTier::Dev,
            bind_addr: "127.0.0.1:8080".to_string(),
            account_id: "DU123456".to_string(),
            audit_log_path: PathBuf::from("data/audit.jsonl"),
            audit_hash_chain: true,
            kill_switch_path: PathBuf::from("data/kill_switch.json"),
            kill_switch_env_key: "KILL_SWITCH_ENABLED".to_string(),
            statistics_path: PathBuf::from("data/statistics.json"),
            risk_policy_path: PathBuf::from("risk_policy.yml"),
            max_proposals: 1000,
            token_ttl_minutes: 5,
            paper_starting_cash: Decimal::new(100_000_00, 2),
            broker: BrokerSettings::default(),
        }
    }
}

impl Settings {
    /// Build settings from a merged config document and apply recognized
    /// environment variables (`ENV`, `BROKER_HOST`, `BROKER_PORT`,
    /// `BROKER_CLIENT_ID`) on top.
    pub fn from_config(config_json: &Value) -> Result<Self> {
        let mut settings: Settings = serde_json::from_value(config_json.clone())
            .context("deserialize settings from config document")?;
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(env) = std::env::var("ENV") {
            self.env = env.parse()?;
        }
        if let Ok(host) = std::env::var("BROKER_HOST") {
            self.broker.host = host;
        }
        if let Ok(port) = std::env::var("BROKER_PORT") {
            self.broker.port = port.parse().context("BROKER_PORT must be a port number")?;
        }
        if let Ok(client_id) = std::env::var("BROKER_CLIENT_ID") {
            self.broker.client_id = client_id
                .parse()
                .context("BROKER_CLIENT_ID must be an integer")?;
        }
        Ok(())
    }
}
