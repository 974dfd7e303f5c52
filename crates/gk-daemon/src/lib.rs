//! HTTP daemon for the safety-gated order-brokering service.
//!
//! Handlers are thin: the correlation middleware threads
//! `X-Correlation-ID` into request scope, the kill switch gates every
//! mutating route, and all domain work happens in the service crates.

pub mod api_types;
pub mod correlation;
pub mod routes;
pub mod state;
