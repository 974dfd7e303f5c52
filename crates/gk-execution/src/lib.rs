//! Execution boundary: the only path that hands an order to a broker.
//!
//! [`BrokerAdapter`] is the thin, broker-agnostic seam; [`OrderSubmitter`]
//! is the choke-point that consults the kill switch, atomically consumes
//! the approval token, submits with bounded retries, and drives terminal
//! status back into the proposal store.

mod broker;
mod retry;
mod submitter;

pub use broker::{BrokerAdapter, BrokerError, BrokerSubmitAck, OrderStatusReport};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use submitter::{OrderSubmitter, PollOutcome, SubmitError, SubmittedOrder};
