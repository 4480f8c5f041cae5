//! `SQLite`-backed store implementation.
//!
//! Uses WAL mode with per-call connections: concurrent readers are
//! allowed while a single writer makes progress, and the advisory queue
//! lock works across processes because every call sees the same file.
//! Transient busy/locked faults are retried with bounded exponential
//! backoff before surfacing.

// SQLite hands back i64 for rowids and counts; they are non-negative here.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;

use super::{
    ChainState, EventFilter, QueueLock, Store, StoreError, StoredEvent, DEFAULT_QUERY_LIMIT,
};
use crate::event::{Event, EventType};
use crate::intent::{Intent, OriginType, RiskLevel, Status};
use crate::review::{ReviewDecision, ReviewStatus, ReviewTask};
use crate::scanner::{FindingSeverity, SecurityFinding};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Retry schedule for transient write faults.
const WRITE_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(25);

/// A store backed by a single `SQLite` file.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (creating if needed) the store at `db_path` and applies the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file or schema cannot be created.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { db_path })
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Runs a write closure, retrying transient faults with bounded
    /// exponential backoff.
    fn with_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            let conn = self.connect()?;
            match op(&conn) {
                Err(err) if err.is_transient() && attempt < WRITE_RETRIES => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    tracing::debug!(attempt, ?delay, "transient store fault, retrying");
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(table: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::CorruptRow {
            table: table.to_string(),
            reason: format!("bad timestamp {raw}: {err}"),
        })
}

fn corrupt(table: &str, reason: impl std::fmt::Display) -> StoreError {
    StoreError::CorruptRow {
        table: table.to_string(),
        reason: reason.to_string(),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn event_from_row(row: &rusqlite::Row<'_>) -> Result<StoredEvent, StoreError> {
    let seq: i64 = row.get(0)?;
    let type_str: String = row.get(4)?;
    let payload_str: String = row.get(8)?;
    let evidence_str: String = row.get(9)?;
    let timestamp_str: String = row.get(3)?;
    Ok(StoredEvent {
        seq: seq as u64,
        hash: row.get(10)?,
        event: Event {
            id: row.get(1)?,
            trace_id: row.get(2)?,
            timestamp: parse_ts("events", &timestamp_str)?,
            event_type: EventType::parse(&type_str).map_err(|e| corrupt("events", e))?,
            intent_id: row.get(5)?,
            agent_id: row.get(6)?,
            tenant_id: row.get(7)?,
            payload: serde_json::from_str(&payload_str)?,
            evidence: serde_json::from_str(&evidence_str)?,
        },
    })
}

const EVENT_COLS: &str = "seq, id, trace_id, timestamp, event_type, intent_id, agent_id, \
                          tenant_id, payload, evidence, event_hash";

fn filter_clauses(filter: &EventFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    if let Some(ty) = filter.event_type {
        clauses.push("event_type = ?".to_string());
        args.push(ty.as_str().to_string());
    }
    if let Some(intent) = &filter.intent_id {
        clauses.push("intent_id = ?".to_string());
        args.push(intent.clone());
    }
    if let Some(agent) = &filter.agent_id {
        clauses.push("agent_id = ?".to_string());
        args.push(agent.clone());
    }
    if let Some(tenant) = &filter.tenant_id {
        clauses.push("tenant_id = ?".to_string());
        args.push(tenant.clone());
    }
    if let Some(trace) = &filter.trace_id {
        clauses.push("trace_id = ?".to_string());
        args.push(trace.clone());
    }
    if let Some(since) = filter.since {
        clauses.push("timestamp >= ?".to_string());
        args.push(ts(since));
    }
    if let Some(until) = filter.until {
        clauses.push("timestamp <= ?".to_string());
        args.push(ts(until));
    }
    if let Some(after) = filter.after_seq {
        clauses.push("seq > ?".to_string());
        args.push(after.to_string());
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (where_sql, args)
}

fn intent_from_row(row: &rusqlite::Row<'_>) -> Result<Intent, StoreError> {
    let status_str: String = row.get(3)?;
    let risk_str: String = row.get(4)?;
    let origin_str: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(9)?;
    let semantic: String = row.get(10)?;
    let technical: String = row.get(11)?;
    let checks: String = row.get(12)?;
    let deps: String = row.get(13)?;
    let priority: i64 = row.get(5)?;
    let retries: i64 = row.get(14)?;
    Ok(Intent {
        id: row.get(0)?,
        source: row.get(1)?,
        target: row.get(2)?,
        status: Status::parse(&status_str).map_err(|e| corrupt("intents", e))?,
        risk_level: RiskLevel::parse(&risk_str).map_err(|e| corrupt("intents", e))?,
        priority: priority as u8,
        origin_type: OriginType::parse(&origin_str).map_err(|e| corrupt("intents", e))?,
        created_at: parse_ts("intents", &created_at)?,
        created_by: row.get(8)?,
        updated_at: parse_ts("intents", &updated_at)?,
        semantic: serde_json::from_str(&semantic)?,
        technical: serde_json::from_str(&technical)?,
        checks_required: serde_json::from_str(&checks)?,
        dependencies: serde_json::from_str(&deps)?,
        retries: retries as u32,
        tenant_id: row.get(15)?,
        plan_id: row.get(16)?,
    })
}

const INTENT_COLS: &str = "id, source, target, status, risk_level, priority, origin_type, \
                           created_at, created_by, updated_at, semantic, technical, \
                           checks_required, dependencies, retries, tenant_id, plan_id";

impl Store for SqliteStore {
    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    fn append_event(&self, event: &Event, event_hash: Option<&str>) -> Result<u64, StoreError> {
        self.with_retry(|conn| {
            let result = conn.execute(
                "INSERT INTO events (id, trace_id, timestamp, event_type, intent_id, \
                 agent_id, tenant_id, payload, evidence, event_hash) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    event.id,
                    event.trace_id,
                    ts(event.timestamp),
                    event.event_type.as_str(),
                    event.intent_id,
                    event.agent_id,
                    event.tenant_id,
                    serde_json::to_string(&event.payload)?,
                    serde_json::to_string(&event.evidence)?,
                    event_hash,
                ],
            );
            match result {
                Ok(_) => Ok(conn.last_insert_rowid() as u64),
                Err(err) if is_unique_violation(&err) => Err(StoreError::DuplicateEvent {
                    id: event.id.clone(),
                }),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn set_event_hash(&self, seq: u64, event_hash: &str) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            conn.execute(
                "UPDATE events SET event_hash = ? WHERE seq = ?",
                params![event_hash, seq as i64],
            )?;
            Ok(())
        })
    }

    fn query_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, StoreError> {
        let conn = self.connect()?;
        let (where_sql, args) = filter_clauses(filter);
        let order = if filter.ascending { "ASC" } else { "DESC" };
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        let sql = format!(
            "SELECT {EVENT_COLS} FROM events{where_sql} ORDER BY seq {order} LIMIT {limit}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok(event_from_row(row))
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row??);
        }
        Ok(events)
    }

    fn count_events(&self, filter: &EventFilter) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let (where_sql, args) = filter_clauses(filter);
        let sql = format!("SELECT COUNT(*) FROM events{where_sql}");
        let count: i64 =
            conn.query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }

    fn latest_of(
        &self,
        event_type: EventType,
        intent_id: Option<&str>,
    ) -> Result<Option<Event>, StoreError> {
        let filter = EventFilter {
            event_type: Some(event_type),
            intent_id: intent_id.map(str::to_string),
            limit: Some(1),
            ..EventFilter::default()
        };
        Ok(self.query_events(&filter)?.pop().map(|stored| stored.event))
    }

    fn prune_events(&self, before: DateTime<Utc>, dry_run: bool) -> Result<u64, StoreError> {
        self.with_retry(|conn| {
            if dry_run {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM events WHERE timestamp < ?",
                    params![ts(before)],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            } else {
                let affected =
                    conn.execute("DELETE FROM events WHERE timestamp < ?", params![ts(before)])?;
                Ok(affected as u64)
            }
        })
    }

    // ------------------------------------------------------------------
    // Intents
    // ------------------------------------------------------------------

    fn upsert_intent(&self, intent: &Intent) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO intents ({INTENT_COLS}) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    intent.id,
                    intent.source,
                    intent.target,
                    intent.status.as_str(),
                    intent.risk_level.as_str(),
                    i64::from(intent.priority),
                    intent.origin_type.as_str(),
                    ts(intent.created_at),
                    intent.created_by,
                    ts(intent.updated_at),
                    serde_json::to_string(&intent.semantic)?,
                    serde_json::to_string(&intent.technical)?,
                    serde_json::to_string(&intent.checks_required)?,
                    serde_json::to_string(&intent.dependencies)?,
                    i64::from(intent.retries),
                    intent.tenant_id,
                    intent.plan_id,
                ],
            )?;
            Ok(())
        })
    }

    fn get_intent(&self, id: &str) -> Result<Option<Intent>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {INTENT_COLS} FROM intents WHERE id = ?"),
            params![id],
            |row| Ok(intent_from_row(row)),
        )
        .optional()?
        .transpose()
    }

    fn list_intents(
        &self,
        status: Option<Status>,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Intent>, StoreError> {
        let conn = self.connect()?;
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(status) = status {
            clauses.push("status = ?");
            args.push(status.as_str().to_string());
        }
        if let Some(tenant) = tenant_id {
            clauses.push("tenant_id = ?");
            args.push(tenant.to_string());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {INTENT_COLS} FROM intents{where_sql} \
             ORDER BY priority ASC, created_at ASC LIMIT {limit}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok(intent_from_row(row))
        })?;
        let mut intents = Vec::new();
        for row in rows {
            intents.push(row??);
        }
        Ok(intents)
    }

    fn update_intent_status(
        &self,
        id: &str,
        status: Status,
        retries: Option<u32>,
    ) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            if let Some(retries) = retries {
                conn.execute(
                    "UPDATE intents SET status = ?, retries = ?, updated_at = ? WHERE id = ?",
                    params![status.as_str(), i64::from(retries), ts(Utc::now()), id],
                )?;
            } else {
                conn.execute(
                    "UPDATE intents SET status = ?, updated_at = ? WHERE id = ?",
                    params![status.as_str(), ts(Utc::now()), id],
                )?;
            }
            Ok(())
        })
    }

    fn clear_intents(&self) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            conn.execute("DELETE FROM intents", [])?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Queue lock
    // ------------------------------------------------------------------

    fn acquire_queue_lock(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.with_retry(|conn| {
            let now = Utc::now();
            let expires = now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300));
            // Expired holders are force-released in the same transaction
            // as the acquire attempt, so a crashed process can never
            // wedge the queue past the TTL.
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM queue_locks WHERE lock_name = ? AND expires_at < ?",
                params![name, ts(now)],
            )?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO queue_locks (lock_name, holder, acquired_at, expires_at) \
                 VALUES (?, ?, ?, ?)",
                params![name, holder, ts(now), ts(expires)],
            )?;
            tx.commit()?;
            Ok(inserted > 0)
        })
    }

    fn release_queue_lock(&self, name: &str, holder: &str) -> Result<bool, StoreError> {
        self.with_retry(|conn| {
            let affected = conn.execute(
                "DELETE FROM queue_locks WHERE lock_name = ? AND holder = ?",
                params![name, holder],
            )?;
            Ok(affected > 0)
        })
    }

    fn force_release_queue_lock(&self, name: &str) -> Result<bool, StoreError> {
        self.with_retry(|conn| {
            let affected =
                conn.execute("DELETE FROM queue_locks WHERE lock_name = ?", params![name])?;
            Ok(affected > 0)
        })
    }

    fn queue_lock_info(&self, name: &str) -> Result<Option<QueueLock>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT lock_name, holder, acquired_at, expires_at FROM queue_locks \
             WHERE lock_name = ?",
            params![name],
            |row| {
                let acquired: String = row.get(2)?;
                let expires: String = row.get(3)?;
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, acquired, expires))
            },
        )
        .optional()?
        .map(|(name, holder, acquired, expires)| {
            Ok(QueueLock {
                name,
                holder,
                acquired_at: parse_ts("queue_locks", &acquired)?,
                expires_at: parse_ts("queue_locks", &expires)?,
            })
        })
        .transpose()
    }

    // ------------------------------------------------------------------
    // Webhook delivery dedup
    // ------------------------------------------------------------------

    fn is_duplicate_delivery(&self, delivery_id: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let row: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM webhook_deliveries WHERE delivery_id = ?",
                params![delivery_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    fn record_delivery(&self, delivery_id: &str) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO webhook_deliveries (delivery_id, received_at) \
                 VALUES (?, ?)",
                params![delivery_id, ts(Utc::now())],
            )?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Policies
    // ------------------------------------------------------------------

    fn upsert_agent_policy(
        &self,
        agent_id: &str,
        tenant_id: Option<&str>,
        data: &Value,
    ) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO agent_policies (agent_id, tenant_id, data, updated_at) \
                 VALUES (?, ?, ?, ?)",
                params![
                    agent_id,
                    tenant_id.unwrap_or(""),
                    serde_json::to_string(data)?,
                    ts(Utc::now()),
                ],
            )?;
            Ok(())
        })
    }

    fn get_agent_policy(
        &self,
        agent_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<Value>, StoreError> {
        let conn = self.connect()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM agent_policies WHERE agent_id = ? AND tenant_id = ?",
                params![agent_id, tenant_id.unwrap_or("")],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }

    fn upsert_risk_policy(&self, tenant_id: &str, data: &Value) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO risk_policies (tenant_id, data, updated_at) \
                 VALUES (?, ?, ?)",
                params![tenant_id, serde_json::to_string(data)?, ts(Utc::now())],
            )?;
            Ok(())
        })
    }

    fn get_risk_policy(&self, tenant_id: &str) -> Result<Option<Value>, StoreError> {
        let conn = self.connect()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM risk_policies WHERE tenant_id = ?",
                params![tenant_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }

    // ------------------------------------------------------------------
    // Security findings
    // ------------------------------------------------------------------

    fn upsert_security_finding(&self, finding: &SecurityFinding) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO security_findings \
                 (id, scan_id, scanner, category, severity, file, line, rule, evidence, \
                  confidence, intent_id, tenant_id, timestamp) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    finding.id,
                    finding.scan_id,
                    finding.scanner,
                    finding.category.as_str(),
                    finding.severity.as_str(),
                    finding.file,
                    i64::from(finding.line),
                    finding.rule,
                    finding.evidence,
                    finding.confidence,
                    finding.intent_id,
                    finding.tenant_id,
                    ts(finding.timestamp),
                ],
            )?;
            Ok(())
        })
    }

    fn count_findings(
        &self,
        intent_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> Result<BTreeMap<FindingSeverity, u64>, StoreError> {
        let conn = self.connect()?;
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(intent) = intent_id {
            clauses.push("intent_id = ?");
            args.push(intent.to_string());
        }
        if let Some(tenant) = tenant_id {
            clauses.push("tenant_id = ?");
            args.push(tenant.to_string());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT severity, COUNT(*) FROM security_findings{where_sql} GROUP BY severity"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (severity, count) = row?;
            counts.insert(FindingSeverity::parse_lenient(&severity), count as u64);
        }
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Review tasks
    // ------------------------------------------------------------------

    fn upsert_review_task(&self, task: &ReviewTask) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO review_tasks \
                 (id, intent_id, status, decision, reviewer, trigger_kind, risk_level, \
                  sla_deadline, created_at, updated_at, tenant_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    task.id,
                    task.intent_id,
                    task.status.as_str(),
                    task.decision.map(ReviewDecision::as_str),
                    task.reviewer,
                    task.trigger,
                    task.risk_level.as_str(),
                    ts(task.sla_deadline),
                    ts(task.created_at),
                    ts(task.updated_at),
                    task.tenant_id,
                ],
            )?;
            Ok(())
        })
    }

    fn get_review_task(&self, id: &str) -> Result<Option<ReviewTask>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, intent_id, status, decision, reviewer, trigger_kind, risk_level, \
             sla_deadline, created_at, updated_at, tenant_id FROM review_tasks WHERE id = ?",
            params![id],
            |row| Ok(review_from_row(row)),
        )
        .optional()?
        .transpose()
    }

    fn list_review_tasks(
        &self,
        intent_id: Option<&str>,
        status: Option<ReviewStatus>,
        limit: usize,
    ) -> Result<Vec<ReviewTask>, StoreError> {
        let conn = self.connect()?;
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(intent) = intent_id {
            clauses.push("intent_id = ?");
            args.push(intent.to_string());
        }
        if let Some(status) = status {
            clauses.push("status = ?");
            args.push(status.as_str().to_string());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT id, intent_id, status, decision, reviewer, trigger_kind, risk_level, \
             sla_deadline, created_at, updated_at, tenant_id FROM review_tasks{where_sql} \
             ORDER BY created_at DESC LIMIT {limit}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok(review_from_row(row))
        })?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row??);
        }
        Ok(tasks)
    }

    // ------------------------------------------------------------------
    // Audit chain head
    // ------------------------------------------------------------------

    fn chain_state(&self, name: &str) -> Result<Option<ChainState>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT chain_name, last_hash, event_count, updated_at FROM chain_state \
             WHERE chain_name = ?",
            params![name],
            |row| {
                let updated: String = row.get(3)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    updated,
                ))
            },
        )
        .optional()?
        .map(|(name, last_hash, count, updated)| {
            Ok(ChainState {
                name,
                last_hash,
                event_count: count as u64,
                updated_at: parse_ts("chain_state", &updated)?,
            })
        })
        .transpose()
    }

    fn save_chain_state(&self, state: &ChainState) -> Result<(), StoreError> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO chain_state (chain_name, last_hash, event_count, \
                 updated_at) VALUES (?, ?, ?, ?)",
                params![
                    state.name,
                    state.last_hash,
                    state.event_count as i64,
                    ts(state.updated_at),
                ],
            )?;
            Ok(())
        })
    }
}

fn review_from_row(row: &rusqlite::Row<'_>) -> Result<ReviewTask, StoreError> {
    let status_str: String = row.get(2)?;
    let decision_str: Option<String> = row.get(3)?;
    let risk_str: String = row.get(6)?;
    let sla: String = row.get(7)?;
    let created: String = row.get(8)?;
    let updated: String = row.get(9)?;
    Ok(ReviewTask {
        id: row.get(0)?,
        intent_id: row.get(1)?,
        status: ReviewStatus::parse(&status_str).map_err(|e| corrupt("review_tasks", e))?,
        decision: decision_str.as_deref().and_then(ReviewDecision::parse),
        reviewer: row.get(4)?,
        trigger: row.get(5)?,
        risk_level: RiskLevel::parse(&risk_str).map_err(|e| corrupt("review_tasks", e))?,
        sla_deadline: parse_ts("review_tasks", &sla)?,
        created_at: parse_ts("review_tasks", &created)?,
        updated_at: parse_ts("review_tasks", &updated)?,
        tenant_id: row.get(10)?,
    })
}
