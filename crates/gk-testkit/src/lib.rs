//! Shared fixtures and an in-process service harness for scenario tests.
//!
//! Mirrors the production wiring (audit log, kill switch, approval
//! service, paper broker, submitter) against temp state files, with a
//! per-harness kill-switch override variable so test binaries can run in
//! parallel.

mod fixtures;
mod harness;

pub use fixtures::{
    aapl_limit_buy, approve_decision, gme_market_buy, portfolio_with_cash, success_sim,
    tsla_market_buy,
};
pub use harness::ServiceHarness;
