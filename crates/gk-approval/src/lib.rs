//! Proposal lifecycle and the human-approval token protocol.
//!
//! A [`Proposal`] binds an order intent, its simulation, and its risk
//! decision to a lifecycle state; [`ApprovalService`] owns the store, the
//! transition matrix, and the single-use expiring [`ApprovalToken`]s that
//! carry a human decision to the submitter. Every mutation is audited
//! before it is committed.

mod error;
mod proposal;
mod service;
mod state;
mod token;

pub use error::ApprovalError;
pub use proposal::Proposal;
pub use service::ApprovalService;
pub use state::OrderState;
pub use token::{ApprovalToken, DEFAULT_TOKEN_TTL_MINUTES};
