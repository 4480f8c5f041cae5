//! Audit chain: tamper evidence for the event log.
//!
//! Every appended event carries a rolling SHA-256 hash chained to its
//! predecessor: `hash_n = SHA256(hash_{n-1} | id | timestamp | type |
//! canonical_payload)`, with an all-zero genesis. The head lives in
//! `chain_state`. [`verify`] walks the log in order, recomputes every
//! link, and reports the first offending position; hash comparison is
//! constant-time. [`initialize`] rebuilds the derived hashes from
//! scratch, which is also the recovery path after a retention prune.

#[cfg(test)]
mod tests;

use chrono::SecondsFormat;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::event::{Event, EventType};
use crate::log::EventLog;
use crate::store::{ChainState, EventFilter, StoreError};

/// The all-zero genesis hash (hex).
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Page size while streaming the log.
const VERIFY_PAGE: usize = 1000;

/// Computes the chained hash of one event.
///
/// The hash covers the previous hash, the event id, the timestamp, the
/// event type, and the canonical (sorted-key) JSON payload. Evidence is
/// excluded: it is a derived summary, not part of the decision record.
#[must_use]
pub fn compute_event_hash(prev_hash: &str, event: &Event) -> String {
    let canonical_payload = canonical_json(&event.payload);
    let material = format!(
        "{prev_hash}|{}|{}|{}|{canonical_payload}",
        event.id,
        event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        event.event_type.as_str(),
    );
    let digest = Sha256::digest(material.as_bytes());
    hex_encode(&digest)
}

/// Renders JSON with object keys sorted, so the hash is independent of
/// insertion order.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        serde_json::Value::Array(items) => {
            let entries: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", entries.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

fn hashes_equal(a: &str, b: &str) -> bool {
    // Length differs only on corruption; the content compare is
    // constant-time.
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Result of a chain verification walk.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChainVerification {
    /// True when every link and the stored head match.
    pub valid: bool,
    /// Number of events walked.
    pub event_count: u64,
    /// Sequence number of the first offending event, if any.
    pub first_bad_seq: Option<u64>,
    /// Recomputed head hash.
    pub computed_head: String,
    /// Stored head hash, when present.
    pub stored_head: Option<String>,
    /// Human-readable reason when invalid.
    pub reason: Option<String>,
}

/// Rebuilds every derived event hash and the chain head from the
/// current log contents, then emits `audit.chain.initialized`.
///
/// # Errors
///
/// Returns [`StoreError`] on backend faults.
pub fn initialize(log: &EventLog) -> Result<ChainState, StoreError> {
    let mut prev = GENESIS_HASH.to_string();
    let mut count = 0u64;
    for_each_event(log, |seq, event| {
        prev = compute_event_hash(&prev, event);
        log.store().set_event_hash(seq, &prev)?;
        count += 1;
        Ok(())
    })?;

    let state = ChainState {
        name: log.chain_name().to_string(),
        last_hash: prev.clone(),
        event_count: count,
        updated_at: crate::event::now_utc(),
    };
    log.store().save_chain_state(&state)?;

    log.append(Event::new(
        EventType::ChainInitialized,
        json!({"event_count": count, "chain_hash": prev}),
    ))?;
    tracing::info!(event_count = count, "audit chain initialized");
    Ok(state)
}

/// Walks the log, recomputes every link, and compares against the
/// stored hashes and head. Emits `audit.chain.verified` or
/// `audit.chain.tamper_detected`.
///
/// # Errors
///
/// Returns [`StoreError`] on backend faults.
pub fn verify(log: &EventLog) -> Result<ChainVerification, StoreError> {
    let mut prev = GENESIS_HASH.to_string();
    let mut count = 0u64;
    let mut first_bad: Option<u64> = None;

    let mut cursor = 0u64;
    'outer: loop {
        let page = log.store().query_events(&EventFilter {
            ascending: true,
            after_seq: Some(cursor),
            limit: Some(VERIFY_PAGE),
            ..EventFilter::default()
        })?;
        if page.is_empty() {
            break;
        }
        for stored in &page {
            let computed = compute_event_hash(&prev, &stored.event);
            match stored.hash.as_deref() {
                Some(stored_hash) if hashes_equal(stored_hash, &computed) => {}
                _ => {
                    first_bad = Some(stored.seq);
                    break 'outer;
                }
            }
            prev = computed;
            count += 1;
            cursor = stored.seq;
        }
    }

    let stored_state = log.store().chain_state(log.chain_name())?;
    let result = build_verification(first_bad, count, prev, stored_state);

    let event_type = if result.valid {
        EventType::ChainVerified
    } else {
        EventType::ChainTamperDetected
    };
    log.append(Event::new(event_type, json!(result)))?;
    Ok(result)
}

fn build_verification(
    first_bad: Option<u64>,
    count: u64,
    computed_head: String,
    stored_state: Option<ChainState>,
) -> ChainVerification {
    if let Some(seq) = first_bad {
        return ChainVerification {
            valid: false,
            event_count: count,
            first_bad_seq: Some(seq),
            computed_head,
            stored_head: stored_state.map(|s| s.last_hash),
            reason: Some(format!("hash mismatch at seq {seq}: chain tampered")),
        };
    }
    match stored_state {
        None => ChainVerification {
            valid: false,
            event_count: count,
            first_bad_seq: None,
            computed_head,
            stored_head: None,
            reason: Some("chain not initialized".to_string()),
        },
        Some(state) if state.event_count != count => ChainVerification {
            valid: false,
            event_count: count,
            first_bad_seq: None,
            stored_head: Some(state.last_hash),
            computed_head,
            reason: Some(format!(
                "event count mismatch: stored {}, walked {count}",
                state.event_count
            )),
        },
        Some(state) if !hashes_equal(&state.last_hash, &computed_head) => ChainVerification {
            valid: false,
            event_count: count,
            first_bad_seq: None,
            stored_head: Some(state.last_hash),
            computed_head,
            reason: Some("head hash mismatch".to_string()),
        },
        Some(state) => ChainVerification {
            valid: true,
            event_count: count,
            first_bad_seq: None,
            stored_head: Some(state.last_hash),
            computed_head,
            reason: None,
        },
    }
}

fn for_each_event(
    log: &EventLog,
    mut f: impl FnMut(u64, &Event) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let mut cursor = 0u64;
    loop {
        let page = log.store().query_events(&EventFilter {
            ascending: true,
            after_seq: Some(cursor),
            limit: Some(VERIFY_PAGE),
            ..EventFilter::default()
        })?;
        if page.is_empty() {
            return Ok(());
        }
        for stored in &page {
            f(stored.seq, &stored.event)?;
            cursor = stored.seq;
        }
    }
}
