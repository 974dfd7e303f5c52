//! Append-only audit substrate.
//!
//! Every state transition and decision in the system lands here as an
//! immutable [`AuditEvent`] keyed by correlation id. The store is indexed
//! (id / correlation / type / timestamp), optionally persisted as JSON
//! Lines with a hash chain, and exposes no update or delete.

mod chain;
mod event;
mod store;

pub use chain::{verify_chain, verify_chain_file, ChainStatus};
pub use event::{
    correlation_or_fallback, AuditEvent, AuditEventCreate, EventType, NO_CORRELATION_ID,
};
pub use store::{AuditError, AuditLog, AuditQuery, AuditStats, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
