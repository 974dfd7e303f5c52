use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use gk_schemas::canonical_json;

use crate::chain::{self, ChainStatus};
use crate::event::{AuditEvent, AuditEventCreate, EventType};

pub const DEFAULT_QUERY_LIMIT: usize = 100;
pub const MAX_QUERY_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// The caller supplied an empty correlation id. Context-less code paths
    /// must use [`crate::NO_CORRELATION_ID`], never an empty string.
    EmptyCorrelationId,
    /// The event could not be durably written. Fatal for the triggering
    /// state transition: the event is NOT admitted to the in-memory store.
    PersistenceFailed(String),
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditError::EmptyCorrelationId => write!(f, "correlation_id cannot be empty"),
            AuditError::PersistenceFailed(msg) => {
                write!(f, "failed to append audit event: {msg}")
            }
        }
    }
}

impl std::error::Error for AuditError {}

// ---------------------------------------------------------------------------
// Query / stats models
// ---------------------------------------------------------------------------

/// Filter parameters for [`AuditLog::query`]. `limit` of 0 means the
/// default; anything above [`MAX_QUERY_LIMIT`] is clamped.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_types: Option<Vec<EventType>>,
    pub correlation_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl AuditQuery {
    pub fn for_correlation(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Default::default()
        }
    }

    fn effective_limit(&self) -> usize {
        match self.limit {
            0 => DEFAULT_QUERY_LIMIT,
            n => n.min(MAX_QUERY_LIMIT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditStats {
    pub total_events: usize,
    pub event_type_counts: BTreeMap<String, usize>,
    pub earliest_event: Option<DateTime<Utc>>,
    pub latest_event: Option<DateTime<Utc>>,
    pub unique_correlation_ids: usize,
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// Append-only, indexed audit log.
///
/// Writes are atomic per event and totally ordered within the process (a
/// single internal mutex covers the JSONL sink and the indexes, so
/// concurrent appenders cannot lose or interleave events). Lookups by id,
/// correlation id, event type, and timestamp range are served from
/// secondary indexes and are sub-linear in the total event count.
///
/// There is deliberately no update and no delete anywhere on this type.
pub struct AuditLog {
    inner: Mutex<Inner>,
}

struct Inner {
    events: Vec<Arc<AuditEvent>>,
    by_id: HashMap<Uuid, usize>,
    by_correlation: HashMap<String, Vec<usize>>,
    by_type: HashMap<EventType, Vec<usize>>,
    by_ts: BTreeMap<DateTime<Utc>, Vec<usize>>,
    last_hash: Option<String>,
    sink: Option<Sink>,
}

struct Sink {
    path: PathBuf,
    hash_chain: bool,
}

impl AuditLog {
    /// Purely in-memory log (tests, ephemeral runs).
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                by_id: HashMap::new(),
                by_correlation: HashMap::new(),
                by_type: HashMap::new(),
                by_ts: BTreeMap::new(),
                last_hash: None,
                sink: None,
            }),
        }
    }

    /// Log backed by an append-only JSONL file with a hash chain.
    ///
    /// Parent directories are created; an existing log file is replayed so
    /// indexes and the chain tip survive restarts.
    pub fn with_jsonl_sink(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AuditError::PersistenceFailed(format!("create_dir_all: {e}")))?;
        }

        let log = Self::in_memory();
        {
            let mut inner = log.inner.lock().expect("audit lock poisoned");
            if path.exists() {
                let content = fs::read_to_string(&path)
                    .map_err(|e| AuditError::PersistenceFailed(format!("read existing log: {e}")))?;
                for line in content.lines().filter(|l| !l.trim().is_empty()) {
                    let ev: AuditEvent = serde_json::from_str(line).map_err(|e| {
                        AuditError::PersistenceFailed(format!("corrupt audit line: {e}"))
                    })?;
                    inner.last_hash = ev.hash_self.clone();
                    inner.index(Arc::new(ev));
                }
            }
            inner.sink = Some(Sink { path, hash_chain });
        }
        Ok(log)
    }

    /// Assign id + UTC timestamp, persist, index, and return the completed
    /// event. On a sink write failure nothing is committed.
    pub fn append(&self, create: AuditEventCreate) -> Result<AuditEvent, AuditError> {
        let correlation_id = create.correlation_id.trim().to_string();
        if correlation_id.is_empty() {
            return Err(AuditError::EmptyCorrelationId);
        }

        let mut inner = self.inner.lock().expect("audit lock poisoned");

        let mut ev = AuditEvent {
            event_id: Uuid::new_v4(),
            event_type: create.event_type,
            correlation_id,
            ts_utc: Utc::now(),
            data: create.data,
            metadata: create.metadata,
            hash_prev: None,
            hash_self: None,
        };

        if let Some(sink) = &inner.sink {
            if sink.hash_chain {
                ev.hash_prev = inner.last_hash.clone();
                let self_hash = ev
                    .content_hash()
                    .map_err(|e| AuditError::PersistenceFailed(e.to_string()))?;
                ev.hash_self = Some(self_hash);
            }
            let line = canonical_json(&ev)
                .map_err(|e| AuditError::PersistenceFailed(format!("serialize: {e}")))?;
            append_line(&sink.path, &line)
                .map_err(|e| AuditError::PersistenceFailed(e.to_string()))?;
        }

        inner.last_hash = ev.hash_self.clone();
        let ev = Arc::new(ev);
        inner.index(Arc::clone(&ev));
        Ok((*ev).clone())
    }

    pub fn get(&self, event_id: Uuid) -> Option<AuditEvent> {
        let inner = self.inner.lock().expect("audit lock poisoned");
        inner
            .by_id
            .get(&event_id)
            .map(|&slot| (*inner.events[slot]).clone())
    }

    /// Query events ordered by timestamp descending (ties broken by append
    /// order, newest first).
    pub fn query(&self, q: &AuditQuery) -> Vec<AuditEvent> {
        let inner = self.inner.lock().expect("audit lock poisoned");

        // Candidate selection from the most selective available index.
        let mut candidates: Vec<usize> = if let Some(corr) = &q.correlation_id {
            inner.by_correlation.get(corr).cloned().unwrap_or_default()
        } else if let Some(types) = &q.event_types {
            let mut slots: Vec<usize> = types
                .iter()
                .flat_map(|t| inner.by_type.get(t).cloned().unwrap_or_default())
                .collect();
            slots.sort_unstable();
            slots.dedup();
            slots
        } else if q.start_time.is_some() || q.end_time.is_some() {
            let lo = q.start_time.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let hi = q.end_time.unwrap_or(DateTime::<Utc>::MAX_UTC);
            inner
                .by_ts
                .range(lo..=hi)
                .flat_map(|(_, slots)| slots.iter().copied())
                .collect()
        } else {
            (0..inner.events.len()).collect()
        };

        candidates.retain(|&slot| {
            let ev = &inner.events[slot];
            if let Some(types) = &q.event_types {
                if !types.contains(&ev.event_type) {
                    return false;
                }
            }
            if let Some(corr) = &q.correlation_id {
                if &ev.correlation_id != corr {
                    return false;
                }
            }
            if let Some(start) = q.start_time {
                if ev.ts_utc < start {
                    return false;
                }
            }
            if let Some(end) = q.end_time {
                if ev.ts_utc > end {
                    return false;
                }
            }
            true
        });

        candidates.sort_by(|&a, &b| {
            let (ea, eb) = (&inner.events[a], &inner.events[b]);
            eb.ts_utc.cmp(&ea.ts_utc).then(b.cmp(&a))
        });

        candidates
            .into_iter()
            .skip(q.offset)
            .take(q.effective_limit())
            .map(|slot| (*inner.events[slot]).clone())
            .collect()
    }

    pub fn stats(&self) -> AuditStats {
        let inner = self.inner.lock().expect("audit lock poisoned");
        let mut counts = BTreeMap::new();
        for (ty, slots) in &inner.by_type {
            counts.insert(ty.as_str().to_string(), slots.len());
        }
        AuditStats {
            total_events: inner.events.len(),
            event_type_counts: counts,
            earliest_event: inner.by_ts.keys().next().copied(),
            latest_event: inner.by_ts.keys().next_back().copied(),
            unique_correlation_ids: inner.by_correlation.len(),
        }
    }

    /// Verify the hash chain across everything this log holds. A
    /// sink-backed log includes the events replayed from disk at open, so
    /// this also vouches for the persisted file's integrity.
    pub fn verify_chain(&self) -> anyhow::Result<ChainStatus> {
        let inner = self.inner.lock().expect("audit lock poisoned");
        chain::verify_chain(inner.events.iter().map(Arc::as_ref))
    }

    /// Number of events appended so far.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("audit lock poisoned").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn index(&mut self, ev: Arc<AuditEvent>) {
        let slot = self.events.len();
        self.by_id.insert(ev.event_id, slot);
        self.by_correlation
            .entry(ev.correlation_id.clone())
            .or_default()
            .push(slot);
        self.by_type.entry(ev.event_type).or_default().push(slot);
        self.by_ts.entry(ev.ts_utc).or_default().push(slot);
        self.events.push(ev);
    }
}

/// Write one line plus newline, append-only.
fn append_line(path: &Path, line: &str) -> anyhow::Result<()> {
    use anyhow::Context;
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {path:?}"))?;
    f.write_all(line.as_bytes()).context("write audit line")?;
    f.write_all(b"\n").context("write newline")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::verify_chain_file;
    use crate::event::NO_CORRELATION_ID;
    use serde_json::json;

    fn ev(event_type: EventType, corr: &str) -> AuditEventCreate {
        AuditEventCreate::new(event_type, corr, json!({"k": "v"}))
    }

    #[test]
    fn append_assigns_id_and_timestamp() {
        let log = AuditLog::in_memory();
        let event = log.append(ev(EventType::OrderProposed, "corr-1")).unwrap();
        assert_eq!(event.correlation_id, "corr-1");
        assert!(log.get(event.event_id).is_some());
    }

    #[test]
    fn empty_correlation_id_is_rejected() {
        let log = AuditLog::in_memory();
        let err = log.append(ev(EventType::OrderProposed, "  ")).unwrap_err();
        assert_eq!(err, AuditError::EmptyCorrelationId);
        assert!(log.is_empty());
    }

    #[test]
    fn fallback_correlation_id_is_accepted() {
        let log = AuditLog::in_memory();
        let event = log
            .append(ev(EventType::ErrorOccurred, NO_CORRELATION_ID))
            .unwrap();
        assert_eq!(event.correlation_id, NO_CORRELATION_ID);
    }

    #[test]
    fn query_by_correlation_id_returns_only_matching() {
        let log = AuditLog::in_memory();
        log.append(ev(EventType::OrderProposed, "a")).unwrap();
        log.append(ev(EventType::OrderSimulated, "a")).unwrap();
        log.append(ev(EventType::OrderProposed, "b")).unwrap();

        let events = log.query(&AuditQuery::for_correlation("a"));
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.correlation_id == "a"));
    }

    #[test]
    fn query_orders_timestamp_descending() {
        let log = AuditLog::in_memory();
        log.append(ev(EventType::OrderProposed, "c")).unwrap();
        log.append(ev(EventType::OrderSimulated, "c")).unwrap();
        log.append(ev(EventType::RiskGateEvaluated, "c")).unwrap();

        let events = log.query(&AuditQuery::for_correlation("c"));
        assert_eq!(events[0].event_type, EventType::RiskGateEvaluated);
        assert_eq!(events[2].event_type, EventType::OrderProposed);
        for pair in events.windows(2) {
            assert!(pair[0].ts_utc >= pair[1].ts_utc);
        }
    }

    #[test]
    fn query_by_event_type() {
        let log = AuditLog::in_memory();
        for _ in 0..3 {
            log.append(ev(EventType::OrderProposed, "x")).unwrap();
        }
        log.append(ev(EventType::OrderFilled, "x")).unwrap();

        let events = log.query(&AuditQuery {
            event_types: Some(vec![EventType::OrderFilled]),
            ..Default::default()
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::OrderFilled);
    }

    #[test]
    fn query_limit_defaults_and_clamps() {
        let q = AuditQuery::default();
        assert_eq!(q.effective_limit(), DEFAULT_QUERY_LIMIT);
        let q = AuditQuery {
            limit: 5000,
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), MAX_QUERY_LIMIT);
    }

    #[test]
    fn query_offset_paginates() {
        let log = AuditLog::in_memory();
        for _ in 0..5 {
            log.append(ev(EventType::OrderProposed, "p")).unwrap();
        }
        let page = log.query(&AuditQuery {
            correlation_id: Some("p".to_string()),
            limit: 2,
            offset: 4,
            ..Default::default()
        });
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn stats_counts_types_and_correlations() {
        let log = AuditLog::in_memory();
        log.append(ev(EventType::OrderProposed, "a")).unwrap();
        log.append(ev(EventType::OrderProposed, "b")).unwrap();
        log.append(ev(EventType::OrderFilled, "a")).unwrap();

        let stats = log.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.event_type_counts["OrderProposed"], 2);
        assert_eq!(stats.event_type_counts["OrderFilled"], 1);
        assert_eq!(stats.unique_correlation_ids, 2);
        assert!(stats.earliest_event <= stats.latest_event);
    }

    #[test]
    fn jsonl_sink_builds_verifiable_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::with_jsonl_sink(&path, true).unwrap();
        for i in 0..4 {
            log.append(ev(EventType::OrderProposed, &format!("c{i}")))
                .unwrap();
        }
        assert_eq!(
            log.verify_chain().unwrap(),
            ChainStatus::Intact { events: 4 }
        );
        assert_eq!(
            verify_chain_file(&path).unwrap(),
            ChainStatus::Intact { events: 4 }
        );
    }

    #[test]
    fn restart_replays_existing_log_and_extends_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = AuditLog::with_jsonl_sink(&path, true).unwrap();
            log.append(ev(EventType::OrderProposed, "r1")).unwrap();
        }
        let log = AuditLog::with_jsonl_sink(&path, true).unwrap();
        assert_eq!(log.len(), 1);
        log.append(ev(EventType::OrderFilled, "r1")).unwrap();

        assert_eq!(
            log.verify_chain().unwrap(),
            ChainStatus::Intact { events: 2 }
        );
        assert_eq!(log.query(&AuditQuery::for_correlation("r1")).len(), 2);
    }

    #[test]
    fn unwritable_sink_fails_and_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the sink path makes the open fail.
        let path = dir.path().join("audit.jsonl");
        std::fs::create_dir(&path).unwrap();
        let log = AuditLog::in_memory();
        {
            let mut inner = log.inner.lock().unwrap();
            inner.sink = Some(Sink {
                path: path.clone(),
                hash_chain: false,
            });
        }
        let err = log.append(ev(EventType::OrderProposed, "x")).unwrap_err();
        assert!(matches!(err, AuditError::PersistenceFailed(_)));
        assert!(log.is_empty());
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let log = Arc::new(AuditLog::in_memory());
        let mut handles = Vec::new();
        for t in 0..8 {
            let log = Arc::clone(&log);
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    log.append(AuditEventCreate::new(
                        EventType::OrderProposed,
                        format!("t{t}"),
                        json!({ "i": i }),
                    ))
                    .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.len(), 200);
        assert_eq!(log.stats().unique_correlation_ids, 8);
    }
}
