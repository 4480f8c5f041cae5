//! The event log facade: append, query, materialize, replay.
//!
//! [`EventLog`] is the single write path of the core. Every append goes
//! through three steps: extend the audit chain (compute the rolling hash
//! from the current head), insert the event, and materialize the
//! per-event-type projections: the intent row, security-finding
//! upserts, review-task upserts. Because materialization is driven
//! entirely by event content, replaying the log against an empty store
//! reconstructs the intent table exactly.
//!
//! The chain read-modify-write is serialized with a process-level mutex;
//! cross-process writers are already serialized by the store's
//! single-writer discipline.

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::chain;
use crate::event::{Event, EventType};
use crate::intent::{Intent, Status};
use crate::review::ReviewTask;
use crate::scanner::SecurityFinding;
use crate::store::{ChainState, EventFilter, Store, StoreError, StoredEvent};

/// Default audit chain name.
pub const DEFAULT_CHAIN: &str = "main";

/// Page size used when streaming the full log (replay, verification).
const REPLAY_PAGE: usize = 1000;

/// The append-only event log over a [`Store`].
pub struct EventLog {
    store: Arc<dyn Store>,
    chain_name: String,
    chain_enabled: bool,
    chain_guard: Mutex<()>,
}

impl EventLog {
    /// Creates an event log with the audit chain enabled.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            chain_name: DEFAULT_CHAIN.to_string(),
            chain_enabled: true,
            chain_guard: Mutex::new(()),
        }
    }

    /// Creates an event log without chain maintenance (tests, bulk
    /// imports).
    #[must_use]
    pub fn without_chain(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            chain_name: DEFAULT_CHAIN.to_string(),
            chain_enabled: false,
            chain_guard: Mutex::new(()),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// A shared handle to the underlying store.
    #[must_use]
    pub fn store_arc(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// The audit chain name this log extends.
    #[must_use]
    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    /// Appends an event: extends the audit chain, inserts the record,
    /// and materializes projections. Returns the event as stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence faults. The append is not
    /// atomic with materialization; replay repairs projections.
    pub fn append(&self, event: Event) -> Result<Event, StoreError> {
        if self.chain_enabled {
            let _guard = self.chain_guard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let head = self.store.chain_state(&self.chain_name)?;
            let prev = head
                .as_ref()
                .map_or_else(|| chain::GENESIS_HASH.to_string(), |s| s.last_hash.clone());
            let hash = chain::compute_event_hash(&prev, &event);
            self.store.append_event(&event, Some(&hash))?;
            self.store.save_chain_state(&ChainState {
                name: self.chain_name.clone(),
                last_hash: hash,
                event_count: head.map_or(1, |s| s.event_count + 1),
                updated_at: crate::event::now_utc(),
            })?;
        } else {
            self.store.append_event(&event, None)?;
        }
        self.materialize(&event)?;
        tracing::debug!(
            event_type = %event.event_type,
            intent_id = event.intent_id.as_deref().unwrap_or(""),
            trace_id = %event.trace_id,
            "event appended"
        );
        Ok(event)
    }

    /// Ordered query over events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    pub fn query(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, StoreError> {
        self.store.query_events(filter)
    }

    /// The most recent event of a type, optionally per intent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    pub fn latest_of(
        &self,
        event_type: EventType,
        intent_id: Option<&str>,
    ) -> Result<Option<Event>, StoreError> {
        self.store.latest_of(event_type, intent_id)
    }

    /// Applies the projection side effects of one event. Idempotent
    /// under replay.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    pub fn materialize(&self, event: &Event) -> Result<(), StoreError> {
        match event.event_type {
            EventType::IntentCreated => {
                if let Some(intent) = decode::<Intent>(&event.payload, "intent") {
                    self.store.upsert_intent(&intent)?;
                }
            }
            EventType::IntentStatusChanged | EventType::QueueReset => {
                if let Some(intent_id) = event.intent_id.as_deref() {
                    let status = event
                        .payload
                        .get("status")
                        .and_then(Value::as_str)
                        .and_then(|s| Status::parse(s).ok());
                    if let Some(status) = status {
                        let retries = event
                            .payload
                            .get("retries")
                            .and_then(Value::as_u64)
                            .map(|r| u32::try_from(r).unwrap_or(u32::MAX));
                        self.store.update_intent_status(intent_id, status, retries)?;
                    }
                }
            }
            EventType::IntentValidated => {
                self.apply_status(event, Status::Validated)?;
            }
            EventType::IntentRequeued => {
                self.apply_status(event, Status::Ready)?;
            }
            EventType::IntentRejected => {
                self.apply_status(event, Status::Rejected)?;
            }
            EventType::IntentMerged => {
                self.apply_status(event, Status::Merged)?;
            }
            EventType::SecurityFindingDetected => {
                if let Some(finding) = decode::<SecurityFinding>(&event.payload, "finding") {
                    self.store.upsert_security_finding(&finding)?;
                }
            }
            EventType::ReviewRequested
            | EventType::ReviewAssigned
            | EventType::ReviewCompleted
            | EventType::ReviewEscalated
            | EventType::ReviewCancelled => {
                if let Some(task) = decode::<ReviewTask>(&event.payload, "task") {
                    self.store.upsert_review_task(&task)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_status(&self, event: &Event, status: Status) -> Result<(), StoreError> {
        if let Some(intent_id) = event.intent_id.as_deref() {
            let retries = event
                .payload
                .get("retries")
                .and_then(Value::as_u64)
                .map(|r| u32::try_from(r).unwrap_or(u32::MAX));
            self.store.update_intent_status(intent_id, status, retries)?;
        }
        Ok(())
    }

    /// Rebuilds the intent table from the event stream: clears the
    /// materialized rows and re-applies every event in order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    pub fn replay(&self) -> Result<u64, StoreError> {
        self.store.clear_intents()?;
        let mut applied = 0u64;
        let mut cursor = 0u64;
        loop {
            let page = self.store.query_events(&EventFilter {
                ascending: true,
                after_seq: Some(cursor),
                limit: Some(REPLAY_PAGE),
                ..EventFilter::default()
            })?;
            if page.is_empty() {
                break;
            }
            for stored in &page {
                self.materialize(&stored.event)?;
                applied += 1;
                cursor = stored.seq;
            }
        }
        Ok(applied)
    }
}

/// Decodes a typed value embedded under `key` in an event payload.
fn decode<T: serde::de::DeserializeOwned>(payload: &Value, key: &str) -> Option<T> {
    payload
        .get(key)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}
