use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 5;

/// Single-use capability authorising one broker submission of one
/// proposal's intent.
///
/// The token commits to the intent payload via `intent_hash`; consumption
/// recomputes the hash of the bound proposal's intent and refuses on any
/// mismatch, so an intent cannot be swapped after approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub token_id: String,
    pub proposal_id: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub intent_hash: String,
    pub consumed: bool,
    pub revoked: bool,
}

impl ApprovalToken {
    pub fn issue(
        proposal_id: impl Into<String>,
        account_id: impl Into<String>,
        intent_hash: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            token_id: new_token_id(),
            proposal_id: proposal_id.into(),
            account_id: account_id.into(),
            created_at: now,
            expires_at: now + ttl,
            intent_hash: intent_hash.into(),
            consumed: false,
            revoked: false,
        }
    }

    /// Expiry is a closed bound: a token is dead at exactly `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Live for consumption: not consumed, not revoked, not expired. The
    /// remaining validation (proposal state, intent hash, account binding)
    /// needs the bound proposal and lives in the service.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && !self.revoked && !self.is_expired(now)
    }
}

/// Opaque, unguessable token id: 256 bits from the OS CSPRNG, hex-encoded.
fn new_token_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
