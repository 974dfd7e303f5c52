use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Fallback correlation id for code paths that run outside any request or
/// job scope. Never an empty string: the audit store rejects those.
pub const NO_CORRELATION_ID: &str = "no-correlation-id";

/// Normalize a caller-supplied correlation id: trimmed, with the literal
/// fallback substituted for empty input.
pub fn correlation_or_fallback(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        NO_CORRELATION_ID.to_string()
    } else {
        trimmed.to_string()
    }
}

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Closed set of audit event types. Adding a variant is an audit-schema
/// change and must be reflected in every downstream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Portfolio & market data
    PortfolioSnapshotTaken,
    MarketSnapshotTaken,

    // Broker connection
    BrokerConnected,
    BrokerDisconnected,
    BrokerReconnecting,

    // Order lifecycle
    OrderProposed,
    OrderSimulated,
    RiskGateEvaluated,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    OrderSubmitted,
    OrderConfirmed,
    OrderFilled,
    OrderCancelled,
    OrderRejected,

    // System
    KillSwitchActivated,
    KillSwitchReleased,
    ErrorOccurred,

    // Agent tool surface
    ToolCalled,
    ToolCompleted,
    ToolFailed,

    // Background report jobs
    ScheduledReportStarted,
    ScheduledReportCompleted,
    ScheduledReportFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PortfolioSnapshotTaken => "PortfolioSnapshotTaken",
            EventType::MarketSnapshotTaken => "MarketSnapshotTaken",
            EventType::BrokerConnected => "BrokerConnected",
            EventType::BrokerDisconnected => "BrokerDisconnected",
            EventType::BrokerReconnecting => "BrokerReconnecting",
            EventType::OrderProposed => "OrderProposed",
            EventType::OrderSimulated => "OrderSimulated",
            EventType::RiskGateEvaluated => "RiskGateEvaluated",
            EventType::ApprovalRequested => "ApprovalRequested",
            EventType::ApprovalGranted => "ApprovalGranted",
            EventType::ApprovalDenied => "ApprovalDenied",
            EventType::OrderSubmitted => "OrderSubmitted",
            EventType::OrderConfirmed => "OrderConfirmed",
            EventType::OrderFilled => "OrderFilled",
            EventType::OrderCancelled => "OrderCancelled",
            EventType::OrderRejected => "OrderRejected",
            EventType::KillSwitchActivated => "KillSwitchActivated",
            EventType::KillSwitchReleased => "KillSwitchReleased",
            EventType::ErrorOccurred => "ErrorOccurred",
            EventType::ToolCalled => "ToolCalled",
            EventType::ToolCompleted => "ToolCompleted",
            EventType::ToolFailed => "ToolFailed",
            EventType::ScheduledReportStarted => "ScheduledReportStarted",
            EventType::ScheduledReportCompleted => "ScheduledReportCompleted",
            EventType::ScheduledReportFailed => "ScheduledReportFailed",
        }
    }
}

// ---------------------------------------------------------------------------
// AuditEvent
// ---------------------------------------------------------------------------

/// Immutable record of a state transition or decision. Append-only: once
/// written, never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub correlation_id: String,
    pub ts_utc: DateTime<Utc>,
    pub data: Value,
    pub metadata: Value,
    /// Hash chain: previous event's `hash_self` (None for the first event
    /// or when chaining is disabled).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_prev: Option<String>,
    /// Hash chain: SHA-256 over this event's canonical JSON with
    /// `hash_self` nulled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_self: Option<String>,
}

impl AuditEvent {
    /// Digest of this event's content: SHA-256 over the canonical JSON of
    /// every field except `hash_self` (an event commits to everything
    /// else, then carries the digest alongside).
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        let mut fields = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut fields {
            map.remove("hash_self");
        }
        let canonical = gk_schemas::canonical_json(&fields)?;
        Ok(gk_schemas::sha256_hex(canonical.as_bytes()))
    }
}

/// Input for [`crate::AuditLog::append`]: the caller-controlled fields of an
/// event, before id and timestamp assignment.
#[derive(Debug, Clone)]
pub struct AuditEventCreate {
    pub event_type: EventType,
    pub correlation_id: String,
    pub data: Value,
    pub metadata: Value,
}

impl AuditEventCreate {
    pub fn new(event_type: EventType, correlation_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            correlation_id: correlation_id.into(),
            data,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}
