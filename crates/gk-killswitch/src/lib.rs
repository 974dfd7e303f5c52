//! Process-wide emergency trading halt.
//!
//! A single [`KillSwitch`] instance is constructed at startup and shared by
//! every mutating entry point. Its effective state is
//! `env-override OR persisted-enabled`:
//!
//! - The persisted flag lives in a small JSON state file and survives
//!   restarts.
//! - The environment override (`KILL_SWITCH_ENABLED` ∈ {true, 1, yes},
//!   case-insensitive) forces the switch on and blocks deactivation until
//!   the variable is removed and the service restarted.
//!
//! Activation is first-wins: a second activation does not overwrite the
//! original metadata. Callers gate every mutating operation with
//! [`KillSwitch::check_or_raise`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default environment variable consulted for the override.
pub const ENV_OVERRIDE_KEY: &str = "KILL_SWITCH_ENABLED";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchState {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillSwitchError {
    /// The environment override is present: deactivation is refused until
    /// the variable is removed and the service restarted.
    CannotDeactivate,
    /// The switch is enabled and a mutating operation was attempted.
    TradingHalted { operation: String },
    /// State file could not be written.
    PersistenceFailed(String),
}

impl std::fmt::Display for KillSwitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillSwitchError::CannotDeactivate => write!(
                f,
                "cannot deactivate kill switch: {ENV_OVERRIDE_KEY} environment override is set; \
                 remove the variable and restart the service"
            ),
            KillSwitchError::TradingHalted { operation } => {
                write!(f, "trading is halted - {operation} blocked by kill switch")
            }
            KillSwitchError::PersistenceFailed(msg) => {
                write!(f, "failed to persist kill switch state: {msg}")
            }
        }
    }
}

impl std::error::Error for KillSwitchError {}

// ---------------------------------------------------------------------------
// KillSwitch
// ---------------------------------------------------------------------------

pub struct KillSwitch {
    state_path: PathBuf,
    env_key: String,
    state: Mutex<KillSwitchState>,
}

impl KillSwitch {
    /// Load (or initialize) the switch from `state_path` using the default
    /// environment override key.
    pub fn new(state_path: impl AsRef<Path>) -> Self {
        Self::with_env_key(state_path, ENV_OVERRIDE_KEY)
    }

    /// Same as [`KillSwitch::new`] but with a custom override variable.
    /// Tests use per-test keys so they can run in parallel.
    pub fn with_env_key(state_path: impl AsRef<Path>, env_key: impl Into<String>) -> Self {
        let state_path = state_path.as_ref().to_path_buf();
        let state = load_state(&state_path);
        Self {
            state_path,
            env_key: env_key.into(),
            state: Mutex::new(state),
        }
    }

    fn env_override_present(&self) -> bool {
        match std::env::var(&self.env_key) {
            Ok(v) => {
                let v = v.trim().to_ascii_lowercase();
                v == "true" || v == "1" || v == "yes"
            }
            Err(_) => false,
        }
    }

    /// Effective state: env override OR persisted flag.
    pub fn is_enabled(&self) -> bool {
        if self.env_override_present() {
            return true;
        }
        self.state.lock().expect("kill switch lock poisoned").enabled
    }

    /// Snapshot of the persisted state (env override not folded in; use
    /// [`KillSwitch::is_enabled`] for the effective reading).
    pub fn state(&self) -> KillSwitchState {
        self.state.lock().expect("kill switch lock poisoned").clone()
    }

    /// Activate. First activation wins: if already enabled, the original
    /// metadata is preserved and returned.
    pub fn activate(&self, activated_by: &str, reason: &str) -> KillSwitchState {
        let mut st = self.state.lock().expect("kill switch lock poisoned");
        if !st.enabled {
            st.enabled = true;
            st.activated_at = Some(Utc::now());
            st.activated_by = Some(activated_by.to_string());
            st.reason = Some(reason.to_string());
            self.save(&st);
        }
        st.clone()
    }

    /// Deactivate. Refused with [`KillSwitchError::CannotDeactivate`] while
    /// the environment override is present. The last activation's metadata
    /// is kept for the record; only the flag flips.
    pub fn deactivate(&self, _deactivated_by: &str) -> Result<KillSwitchState, KillSwitchError> {
        let mut st = self.state.lock().expect("kill switch lock poisoned");
        if self.env_override_present() {
            return Err(KillSwitchError::CannotDeactivate);
        }
        if st.enabled {
            st.enabled = false;
            self.save(&st);
        }
        Ok(st.clone())
    }

    /// Gate for mutating entry points: `Err(TradingHalted)` when enabled.
    pub fn check_or_raise(&self, operation: &str) -> Result<(), KillSwitchError> {
        if self.is_enabled() {
            return Err(KillSwitchError::TradingHalted {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    // State persistence is best-effort: the in-memory flag is authoritative
    // for this process, and a write failure must not turn activation into a
    // no-op.
    fn save(&self, st: &KillSwitchState) {
        let json = match serde_json::to_string_pretty(st) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize kill switch state");
                return;
            }
        };
        if let Some(parent) = self.state_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(&self.state_path, json) {
            warn!(error = %e, path = ?self.state_path, "failed to save kill switch state");
        }
    }
}

/// Load persisted state; a missing or corrupted file starts fresh.
fn load_state(path: &Path) -> KillSwitchState {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, path = ?path, "corrupt kill switch state file; starting fresh");
                KillSwitchState::default()
            }
        },
        Err(_) => KillSwitchState::default(),
    }
}
