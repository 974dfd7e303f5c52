//! Sliding-window rate limiting for the agent tool surface.
//!
//! Three scopes are enforced on every call (`tool:{name}`,
//! `session:{id}`, and `global`), each with a per-minute and per-hour
//! window. A scope that keeps getting rejected trips a circuit breaker
//! that refuses everything for a cooldown period. Time is an explicit
//! argument (seconds, monotone) so behaviour is testable.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

const MINUTE: f64 = 60.0;
const HOUR: f64 = 3600.0;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub tool_calls_per_minute: usize,
    pub tool_calls_per_hour: usize,
    pub session_calls_per_minute: usize,
    pub session_calls_per_hour: usize,
    pub global_calls_per_minute: usize,
    pub global_calls_per_hour: usize,
    pub circuit_breaker_enabled: bool,
    /// Consecutive rejections on one scope before its breaker opens.
    pub circuit_breaker_threshold: u32,
    /// How long an open breaker refuses calls, in seconds.
    pub circuit_breaker_cooldown_secs: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tool_calls_per_minute: 60,
            tool_calls_per_hour: 500,
            session_calls_per_minute: 100,
            session_calls_per_hour: 1000,
            global_calls_per_minute: 1000,
            global_calls_per_hour: 10_000,
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: 100,
            circuit_breaker_cooldown_secs: 300.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Refusal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitRefusal {
    LimitExceeded { scope: String, detail: String },
    CircuitOpen { scope: String, remaining_secs: u64 },
}

impl std::fmt::Display for RateLimitRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitRefusal::LimitExceeded { scope, detail } => {
                write!(f, "rate limit exceeded for {scope}: {detail}")
            }
            RateLimitRefusal::CircuitOpen {
                scope,
                remaining_secs,
            } => {
                write!(f, "circuit breaker open for {scope} ({remaining_secs}s remaining)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ScopeState {
    calls_minute: Vec<f64>,
    calls_hour: Vec<f64>,
    consecutive_rejections: u32,
    open_until: Option<f64>,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    scopes: Mutex<HashMap<String, ScopeState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or refuse one call at time `now_secs`. An admitted call is
    /// recorded against all three scopes.
    pub fn check(
        &self,
        tool: &str,
        session_id: &str,
        now_secs: f64,
    ) -> Result<(), RateLimitRefusal> {
        let scope_limits = [
            (
                format!("tool:{tool}"),
                self.config.tool_calls_per_minute,
                self.config.tool_calls_per_hour,
            ),
            (
                format!("session:{session_id}"),
                self.config.session_calls_per_minute,
                self.config.session_calls_per_hour,
            ),
            (
                "global".to_string(),
                self.config.global_calls_per_minute,
                self.config.global_calls_per_hour,
            ),
        ];

        let mut scopes = self.scopes.lock().expect("rate limiter lock poisoned");

        // Open breakers refuse before any window accounting.
        if self.config.circuit_breaker_enabled {
            for (scope, _, _) in &scope_limits {
                if let Some(state) = scopes.get(scope) {
                    if let Some(until) = state.open_until {
                        if now_secs < until {
                            return Err(RateLimitRefusal::CircuitOpen {
                                scope: scope.clone(),
                                remaining_secs: (until - now_secs).ceil() as u64,
                            });
                        }
                    }
                }
            }
        }

        for (scope, limit_minute, limit_hour) in &scope_limits {
            let state = scopes.entry(scope.clone()).or_default();
            state.calls_minute.retain(|t| now_secs - t < MINUTE);
            state.calls_hour.retain(|t| now_secs - t < HOUR);

            let refusal = if state.calls_minute.len() >= *limit_minute {
                Some(format!(
                    "{}/{} calls in the last minute",
                    state.calls_minute.len(),
                    limit_minute
                ))
            } else if state.calls_hour.len() >= *limit_hour {
                Some(format!(
                    "{}/{} calls in the last hour",
                    state.calls_hour.len(),
                    limit_hour
                ))
            } else {
                None
            };

            if let Some(detail) = refusal {
                self.record_rejection(state, scope, now_secs);
                return Err(RateLimitRefusal::LimitExceeded {
                    scope: scope.clone(),
                    detail,
                });
            }
        }

        // Admitted: record against every scope and reset rejection runs.
        for (scope, _, _) in &scope_limits {
            let state = scopes.entry(scope.clone()).or_default();
            state.calls_minute.push(now_secs);
            state.calls_hour.push(now_secs);
            state.consecutive_rejections = 0;
        }
        Ok(())
    }

    fn record_rejection(&self, state: &mut ScopeState, scope: &str, now_secs: f64) {
        state.consecutive_rejections += 1;
        if self.config.circuit_breaker_enabled
            && state.consecutive_rejections >= self.config.circuit_breaker_threshold
        {
            state.open_until = Some(now_secs + self.config.circuit_breaker_cooldown_secs);
            warn!(
                scope,
                consecutive_rejections = state.consecutive_rejections,
                cooldown_secs = self.config.circuit_breaker_cooldown_secs,
                "circuit breaker opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_config() -> RateLimitConfig {
        RateLimitConfig {
            tool_calls_per_minute: 3,
            tool_calls_per_hour: 100,
            session_calls_per_minute: 100,
            session_calls_per_hour: 1000,
            global_calls_per_minute: 1000,
            global_calls_per_hour: 10_000,
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: 2,
            circuit_breaker_cooldown_secs: 300.0,
        }
    }

    #[test]
    fn admits_until_minute_limit_then_refuses() {
        let limiter = RateLimiter::new(tight_config());
        for i in 0..3 {
            limiter.check("get_portfolio", "s1", i as f64).unwrap();
        }
        let err = limiter.check("get_portfolio", "s1", 3.0).unwrap_err();
        assert!(matches!(err, RateLimitRefusal::LimitExceeded { .. }));
        assert!(err.to_string().contains("tool:get_portfolio"));
    }

    #[test]
    fn window_slides_and_admits_again() {
        let limiter = RateLimiter::new(tight_config());
        for i in 0..3 {
            limiter.check("get_portfolio", "s1", i as f64).unwrap();
        }
        assert!(limiter.check("get_portfolio", "s1", 10.0).is_err());
        // 61 seconds after the first call, that call has aged out.
        limiter.check("get_portfolio", "s1", 61.5).unwrap();
    }

    #[test]
    fn limits_are_per_tool() {
        let limiter = RateLimiter::new(tight_config());
        for i in 0..3 {
            limiter.check("get_portfolio", "s1", i as f64).unwrap();
        }
        assert!(limiter.check("get_portfolio", "s1", 3.0).is_err());
        // A different tool has its own window.
        limiter.check("get_cash", "s1", 3.0).unwrap();
    }

    #[test]
    fn breaker_opens_after_consecutive_rejections_and_cools_down() {
        let limiter = RateLimiter::new(tight_config());
        for i in 0..3 {
            limiter.check("get_portfolio", "s1", i as f64).unwrap();
        }
        // Two consecutive rejections trip the breaker (threshold = 2).
        assert!(limiter.check("get_portfolio", "s1", 3.0).is_err());
        assert!(limiter.check("get_portfolio", "s1", 4.0).is_err());

        // Now even an otherwise-admissible call is refused by the breaker.
        let err = limiter.check("get_portfolio", "s1", 120.0).unwrap_err();
        assert!(matches!(err, RateLimitRefusal::CircuitOpen { .. }));

        // After the cooldown the breaker closes.
        limiter.check("get_portfolio", "s1", 4.0 + 301.0).unwrap();
    }

    #[test]
    fn successful_call_resets_rejection_run() {
        let mut config = tight_config();
        config.circuit_breaker_threshold = 3;
        let limiter = RateLimiter::new(config);
        for i in 0..3 {
            limiter.check("t", "s1", i as f64).unwrap();
        }
        assert!(limiter.check("t", "s1", 3.0).is_err());
        assert!(limiter.check("t", "s1", 4.0).is_err());
        // Window slides; this one is admitted and resets the run.
        limiter.check("t", "s1", 65.0).unwrap();
        // Breaker did not open despite 2 earlier rejections.
        assert!(limiter.check("t", "s1", 65.1).is_ok());
    }
}
