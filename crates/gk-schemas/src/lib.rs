//! Shared wire and domain types for the gatekeeper workspace.
//!
//! Everything that crosses a crate boundary lives here: order intents and
//! their validation, broker-facing snapshot types, and the canonical-JSON
//! hashing used to bind approval tokens to the exact payload that was
//! approved.

mod canonical;
mod intent;
mod types;

pub use canonical::{canonical_json, intent_hash, sha256_hex, sort_keys};
pub use intent::{FieldError, OrderConstraints, OrderIntent, ValidationFailure};
pub use types::{
    Cash, Instrument, InstrumentType, OpenOrder, OrderSide, OrderStatus, OrderType, Portfolio,
    Position, TimeInForce,
};
