//! Transactional persistence port.
//!
//! The [`Store`] trait is the single persistence boundary of the core:
//! events, the materialized intent table, the advisory queue lock,
//! webhook-delivery dedup, agent/risk policies, review tasks, security
//! findings, and the audit-chain head all live behind it. The default
//! backend is [`SqliteStore`]; a networked relational backend can replace
//! it without touching the engine.
//!
//! Writes are serialized by the backend so that the event log keeps one
//! total order per store (the `seq` column). Transient faults (busy /
//! locked database) are retried with bounded exponential backoff inside
//! the backend; everything else surfaces as a fatal [`StoreError`].

mod sqlite;


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use sqlite::SqliteStore;

use crate::event::{Event, EventType};
use crate::intent::{Intent, Status};
use crate::review::{ReviewStatus, ReviewTask};
use crate::scanner::{FindingSeverity, SecurityFinding};

/// Default result cap for event queries.
pub const DEFAULT_QUERY_LIMIT: usize = 200;

/// Errors raised by store backends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Backend database fault.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O fault while opening or writing the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored enum string is outside its registry.
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow {
        /// Table the row came from.
        table: String,
        /// What failed to parse.
        reason: String,
    },

    /// An event id was appended twice (append-only violation).
    #[error("duplicate event id: {id}")]
    DuplicateEvent {
        /// The duplicated id.
        id: String,
    },
}

impl StoreError {
    /// True for faults worth retrying (lock contention, busy database).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Filter for ordered event queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to one event type.
    pub event_type: Option<EventType>,
    /// Restrict to one intent.
    pub intent_id: Option<String>,
    /// Restrict to one agent.
    pub agent_id: Option<String>,
    /// Restrict to one tenant.
    pub tenant_id: Option<String>,
    /// Restrict to one trace.
    pub trace_id: Option<String>,
    /// Inclusive lower time bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper time bound.
    pub until: Option<DateTime<Utc>>,
    /// Exclusive sequence cursor (`seq > after_seq`); used for paging.
    pub after_seq: Option<u64>,
    /// Result cap (`DEFAULT_QUERY_LIMIT` when `None`).
    pub limit: Option<usize>,
    /// Oldest-first when true; default is newest-first.
    pub ascending: bool,
}

impl EventFilter {
    /// Filter for one event type.
    #[must_use]
    pub fn of_type(event_type: EventType) -> Self {
        Self {
            event_type: Some(event_type),
            ..Self::default()
        }
    }

    /// Restricts the filter to one intent.
    #[must_use]
    pub fn for_intent(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = Some(intent_id.into());
        self
    }

    /// Caps the result count.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Switches to oldest-first ordering.
    #[must_use]
    pub const fn oldest_first(mut self) -> Self {
        self.ascending = true;
        self
    }
}

/// An event together with its store-assigned sequence number and chain
/// hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Position in the store's total order (1-based).
    pub seq: u64,
    /// Hex chain hash assigned at append time (absent when the audit
    /// chain was disabled).
    pub hash: Option<String>,
    /// The event.
    pub event: Event,
}

/// The advisory queue lock token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLock {
    /// Lock name (`queue` by default).
    pub name: String,
    /// Opaque holder identity (usually `pid:<n>`).
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock auto-expires.
    pub expires_at: DateTime<Utc>,
}

/// Persisted head of the audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Chain name (`main` by default).
    pub name: String,
    /// Hex head hash.
    pub last_hash: String,
    /// Number of events covered by the head.
    pub event_count: u64,
    /// Last update instant.
    pub updated_at: DateTime<Utc>,
}

/// The persistence port.
///
/// Implementations must serialize writes so events receive one total
/// order per store, and must keep every operation safe under concurrent
/// readers.
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Appends an event with an optional chain hash, returning its
    /// assigned sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateEvent`] when the id exists.
    fn append_event(&self, event: &Event, event_hash: Option<&str>) -> Result<u64, StoreError>;

    /// Rewrites the derived chain hash of one event. Used only by
    /// chain re-initialization; event content is never touched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn set_event_hash(&self, seq: u64, event_hash: &str) -> Result<(), StoreError>;

    /// Ordered query over events (newest first unless
    /// [`EventFilter::ascending`]).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn query_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, StoreError>;

    /// Counts events matching the filter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn count_events(&self, filter: &EventFilter) -> Result<u64, StoreError>;

    /// The most recent event of a type, optionally per intent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn latest_of(
        &self,
        event_type: EventType,
        intent_id: Option<&str>,
    ) -> Result<Option<Event>, StoreError>;

    /// Deletes events older than `before` (retention prune). Returns the
    /// affected count; `dry_run` only counts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn prune_events(&self, before: DateTime<Utc>, dry_run: bool) -> Result<u64, StoreError>;

    // ------------------------------------------------------------------
    // Intents (materialized view)
    // ------------------------------------------------------------------

    /// Inserts or replaces the intent row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn upsert_intent(&self, intent: &Intent) -> Result<(), StoreError>;

    /// Fetches one intent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn get_intent(&self, id: &str) -> Result<Option<Intent>, StoreError>;

    /// Lists intents ordered by priority asc, then `created_at` asc.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn list_intents(
        &self,
        status: Option<Status>,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Intent>, StoreError>;

    /// Updates status (and optionally retries) on the intent row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn update_intent_status(
        &self,
        id: &str,
        status: Status,
        retries: Option<u32>,
    ) -> Result<(), StoreError>;

    /// Clears all intent rows. Used by replay only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn clear_intents(&self) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Queue lock
    // ------------------------------------------------------------------

    /// Acquires the named advisory lock. Succeeds iff no holder exists
    /// or the current holder's TTL has expired (the expired row is
    /// force-released atomically).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn acquire_queue_lock(
        &self,
        name: &str,
        holder: &str,
        ttl: std::time::Duration,
    ) -> Result<bool, StoreError>;

    /// Releases the lock when held by `holder`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn release_queue_lock(&self, name: &str, holder: &str) -> Result<bool, StoreError>;

    /// Force-releases the lock regardless of holder.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn force_release_queue_lock(&self, name: &str) -> Result<bool, StoreError>;

    /// Current lock token, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn queue_lock_info(&self, name: &str) -> Result<Option<QueueLock>, StoreError>;

    // ------------------------------------------------------------------
    // Webhook delivery dedup
    // ------------------------------------------------------------------

    /// True when the external delivery id was seen before.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn is_duplicate_delivery(&self, delivery_id: &str) -> Result<bool, StoreError>;

    /// Records an external delivery id. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn record_delivery(&self, delivery_id: &str) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Policies
    // ------------------------------------------------------------------

    /// Upserts an agent policy blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn upsert_agent_policy(
        &self,
        agent_id: &str,
        tenant_id: Option<&str>,
        data: &Value,
    ) -> Result<(), StoreError>;

    /// Fetches an agent policy blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn get_agent_policy(
        &self,
        agent_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<Value>, StoreError>;

    /// Upserts a tenant risk policy blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn upsert_risk_policy(&self, tenant_id: &str, data: &Value) -> Result<(), StoreError>;

    /// Fetches a tenant risk policy blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn get_risk_policy(&self, tenant_id: &str) -> Result<Option<Value>, StoreError>;

    // ------------------------------------------------------------------
    // Security findings
    // ------------------------------------------------------------------

    /// Inserts or replaces a finding by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn upsert_security_finding(&self, finding: &SecurityFinding) -> Result<(), StoreError>;

    /// Counts findings by severity, optionally per intent/tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn count_findings(
        &self,
        intent_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> Result<std::collections::BTreeMap<FindingSeverity, u64>, StoreError>;

    // ------------------------------------------------------------------
    // Review tasks
    // ------------------------------------------------------------------

    /// Inserts or replaces a review task by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn upsert_review_task(&self, task: &ReviewTask) -> Result<(), StoreError>;

    /// Fetches one review task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn get_review_task(&self, id: &str) -> Result<Option<ReviewTask>, StoreError>;

    /// Lists review tasks, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn list_review_tasks(
        &self,
        intent_id: Option<&str>,
        status: Option<ReviewStatus>,
        limit: usize,
    ) -> Result<Vec<ReviewTask>, StoreError>;

    // ------------------------------------------------------------------
    // Audit chain head
    // ------------------------------------------------------------------

    /// Current chain head, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn chain_state(&self, name: &str) -> Result<Option<ChainState>, StoreError>;

    /// Atomically replaces the chain head.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend faults.
    fn save_chain_state(&self, state: &ChainState) -> Result<(), StoreError>;
}
