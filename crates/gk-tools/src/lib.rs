//! Agent-facing tool surface.
//!
//! A fixed allow-list of named operations, each with a strict argument
//! schema that rejects unknown fields, fronted by per-tool / per-session /
//! global rate limits with a circuit breaker. The only write operation is
//! `request_approval`, and it stops at `ApprovalRequested`: the human
//! grant and the submitter remain the only path to a broker.

mod args;
mod rate_limiter;
mod router;

pub use args::{AccountArgs, OrderArgs, PendingArgs};
pub use rate_limiter::{RateLimitConfig, RateLimitRefusal, RateLimiter};
pub use router::{ToolError, ToolRouter, TOOL_ALLOW_LIST};
