//! Hash-chain integrity checking.
//!
//! A sink-backed log links its events: every event records the previous
//! event's `hash_self` as its `hash_prev` and carries its own
//! [`content_hash`](crate::AuditEvent::content_hash) as `hash_self`.
//! Verification walks an event sequence in append order and checks both
//! halves of every link. The walk runs over the in-memory store (which a
//! restarted log repopulates from disk), so tampering with a persisted
//! line surfaces the moment the log is reopened and checked.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::event::AuditEvent;

/// Chain-integrity verdict for an event sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// Every link holds.
    Intact { events: usize },
    /// The chain fails at the event with the given append position.
    Broken {
        position: usize,
        event_id: Uuid,
        detail: String,
    },
}

impl ChainStatus {
    pub fn is_intact(&self) -> bool {
        matches!(self, ChainStatus::Intact { .. })
    }
}

/// Walk `events` in append order and check every link.
///
/// Two things must hold per event: its `hash_prev` continues the running
/// chain tip, and a carried `hash_self` matches the recomputed content
/// digest. Events without chain fields (an in-memory log) verify
/// trivially.
pub fn verify_chain<'a, I>(events: I) -> Result<ChainStatus>
where
    I: IntoIterator<Item = &'a AuditEvent>,
{
    let mut tip: Option<&'a str> = None;
    let mut checked = 0usize;

    for (position, event) in events.into_iter().enumerate() {
        if event.hash_prev.as_deref() != tip {
            return Ok(ChainStatus::Broken {
                position,
                event_id: event.event_id,
                detail: format!(
                    "hash_prev {:?} does not continue the chain tip {:?}",
                    event.hash_prev, tip
                ),
            });
        }
        if let Some(carried) = event.hash_self.as_deref() {
            let recomputed = event.content_hash().context("recompute content hash")?;
            if carried != recomputed {
                return Ok(ChainStatus::Broken {
                    position,
                    event_id: event.event_id,
                    detail: "carried hash_self does not match the content digest".to_string(),
                });
            }
        }
        tip = event.hash_self.as_deref();
        checked += 1;
    }

    Ok(ChainStatus::Intact { events: checked })
}

/// Parse a persisted JSONL audit file and verify its chain, without
/// opening the file for appending.
pub fn verify_chain_file(path: impl AsRef<Path>) -> Result<ChainStatus> {
    let path = path.as_ref();
    let content =
        fs::read_to_string(path).with_context(|| format!("read audit log {}", path.display()))?;

    let events = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str::<AuditEvent>)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parse audit log {}", path.display()))?;

    verify_chain(events.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AuditEventCreate, EventType};
    use crate::store::AuditLog;
    use serde_json::json;

    fn chained_log(dir: &tempfile::TempDir, events: usize) -> (AuditLog, std::path::PathBuf) {
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::with_jsonl_sink(&path, true).unwrap();
        for i in 0..events {
            log.append(AuditEventCreate::new(
                EventType::OrderProposed,
                format!("chain-{i}"),
                json!({ "seq": i }),
            ))
            .unwrap();
        }
        (log, path)
    }

    #[test]
    fn empty_sequence_is_trivially_intact() {
        assert_eq!(
            verify_chain(std::iter::empty()).unwrap(),
            ChainStatus::Intact { events: 0 }
        );
    }

    #[test]
    fn unchained_events_verify_trivially() {
        let log = AuditLog::in_memory();
        for i in 0..3 {
            log.append(AuditEventCreate::new(
                EventType::OrderProposed,
                format!("mem-{i}"),
                json!({}),
            ))
            .unwrap();
        }
        assert!(log.verify_chain().unwrap().is_intact());
    }

    #[test]
    fn sink_backed_log_verifies_in_memory_and_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (log, path) = chained_log(&dir, 4);

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
    fn tampered_payload_breaks_the_chain_at_that_event() {
        let dir = tempfile::tempdir().unwrap();
        let (_, path) = chained_log(&dir, 3);

        // Doctor the middle line's payload without touching its hashes.
        let content = std::fs::read_to_string(&path).unwrap();
        let doctored: Vec<String> = content
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 1 {
                    line.replace("\"seq\":1", "\"seq\":999")
                } else {
                    line.to_string()
                }
            })
            .collect();
        std::fs::write(&path, doctored.join("\n")).unwrap();

        match verify_chain_file(&path).unwrap() {
            ChainStatus::Broken { position, detail, .. } => {
                assert_eq!(position, 1);
                assert!(detail.contains("content digest"), "{detail}");
            }
            other => panic!("tampering must break the chain, got {other:?}"),
        }
    }

    #[test]
    fn deleted_event_breaks_the_link() {
        let dir = tempfile::tempdir().unwrap();
        let (_, path) = chained_log(&dir, 3);

        // Drop the middle line entirely.
        let content = std::fs::read_to_string(&path).unwrap();
        let pruned: Vec<&str> = content
            .lines()
            .enumerate()
            .filter_map(|(i, line)| (i != 1).then_some(line))
            .collect();
        std::fs::write(&path, pruned.join("\n")).unwrap();

        match verify_chain_file(&path).unwrap() {
            ChainStatus::Broken { position, detail, .. } => {
                assert_eq!(position, 1);
                assert!(detail.contains("chain tip"), "{detail}");
            }
            other => panic!("a gap must break the chain, got {other:?}"),
        }
    }

    #[test]
    fn content_hash_ignores_hash_self_but_nothing_else() {
        let log = AuditLog::in_memory();
        let mut event = log
            .append(AuditEventCreate::new(
                EventType::OrderProposed,
                "hash-test",
                json!({ "qty": 10 }),
            ))
            .unwrap();

        let base = event.content_hash().unwrap();
        event.hash_self = Some("anything".to_string());
        assert_eq!(event.content_hash().unwrap(), base);

        event.hash_prev = Some("different-prev".to_string());
        assert_ne!(event.content_hash().unwrap(), base);

        event.hash_prev = None;
        event.data = json!({ "qty": 11 });
        assert_ne!(event.content_hash().unwrap(), base);
    }
}
