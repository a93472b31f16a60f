//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("database lock poisoned")]
    Poisoned,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const TARGET_COLUMNS: &str = "id, url, name, is_active, check_frequency, is_one_time, \
     alert_enabled, alert_recovery, created_at, updated_at";

const REQUEST_COLUMNS: &str =
    "id, url_id, target_url, ip_address, resource_type, state_type, protocol, timestamp";

/// Thread-safe database store shared by every target job.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        // Writes racing a delete must fail instead of leaving orphans.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut MonitoredTarget) -> Result<i64, DbError> {
        target.check_frequency = target.check_frequency.max(1);
        let now = Utc::now();
        target.created_at = now;
        target.updated_at = now;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO urls (url, name, is_active, check_frequency, is_one_time,
                               alert_enabled, alert_recovery, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                target.url,
                target.name,
                target.active,
                target.check_frequency,
                target.one_time,
                target.alert_enabled,
                target.alert_recovery,
                format_time(now),
                format_time(now),
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update an existing target's settings. Alert state is left untouched.
    pub fn update_target(&self, target: &mut MonitoredTarget) -> Result<(), DbError> {
        target.check_frequency = target.check_frequency.max(1);
        target.updated_at = Utc::now();

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE urls SET name=?1, is_active=?2, check_frequency=?3, alert_enabled=?4,
                             alert_recovery=?5, updated_at=?6
             WHERE id=?7",
            params![
                target.name,
                target.active,
                target.check_frequency,
                target.alert_enabled,
                target.alert_recovery,
                format_time(target.updated_at),
                target.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<MonitoredTarget, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {TARGET_COLUMNS} FROM urls WHERE id = ?1"),
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// List targets of the given kind.
    pub fn list_targets(&self, kind: TargetKind) -> Result<Vec<MonitoredTarget>, DbError> {
        let filter = match kind {
            TargetKind::Monitored => "WHERE is_one_time = 0",
            TargetKind::OneTime => "WHERE is_one_time = 1",
            TargetKind::All => "",
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TARGET_COLUMNS} FROM urls {filter} ORDER BY id ASC"
        ))?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Targets that should have a recurring job.
    pub fn list_active_targets(&self) -> Result<Vec<MonitoredTarget>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TARGET_COLUMNS} FROM urls
             WHERE is_active = 1 AND is_one_time = 0 ORDER BY id ASC"
        ))?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Find a recurring (non one-time) target already registered for `url`.
    pub fn find_monitored_by_url(&self, url: &str) -> Result<Option<MonitoredTarget>, DbError> {
        let conn = self.conn()?;
        let target = conn
            .query_row(
                &format!(
                    "SELECT {TARGET_COLUMNS} FROM urls
                     WHERE url = ?1 AND is_one_time = 0 ORDER BY id ASC LIMIT 1"
                ),
                params![url],
                target_from_row,
            )
            .optional()?;
        Ok(target)
    }

    /// Delete a target together with its outcomes and sub-resource records.
    pub fn delete_target(&self, id: i64) -> Result<DeletedCounts, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let deleted_status_records =
            tx.execute("DELETE FROM url_statuses WHERE url_id = ?1", params![id])?;
        let deleted_subsequent_requests =
            tx.execute("DELETE FROM subsequent_requests WHERE url_id = ?1", params![id])?;
        let deleted_targets = tx.execute("DELETE FROM urls WHERE id = ?1", params![id])?;
        if deleted_targets == 0 {
            return Err(DbError::NotFound);
        }

        tx.commit()?;
        Ok(DeletedCounts {
            deleted_status_records,
            deleted_subsequent_requests,
        })
    }

    // --- Probe outcomes ---

    /// Append a probe outcome and return its row ID.
    pub fn save_probe_outcome(&self, outcome: &ProbeOutcome) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO url_statuses
                 (url_id, status_code, response_time, is_up, timestamp, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                outcome.target_id,
                outcome.status_code,
                outcome.latency,
                outcome.up,
                format_time(outcome.timestamp),
                outcome.error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Latest `limit` outcomes for a target, newest first.
    pub fn latest_outcomes(
        &self,
        target_id: i64,
        limit: u32,
    ) -> Result<Vec<ProbeOutcome>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, url_id, status_code, response_time, is_up, timestamp, error_message
             FROM url_statuses WHERE url_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let outcomes = stmt
            .query_map(params![target_id, limit], |row| {
                let time_str: String = row.get(5)?;
                Ok(ProbeOutcome {
                    id: row.get(0)?,
                    target_id: row.get(1)?,
                    status_code: row.get(2)?,
                    latency: row.get(3)?,
                    up: row.get(4)?,
                    timestamp: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                    error: row.get(6)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(outcomes)
    }

    // --- Subsequent requests ---

    /// Store a discovered resource unless (target, url) is already recorded.
    ///
    /// Returns the new record, or `None` when it already existed.
    pub fn add_subsequent_request_if_absent(
        &self,
        target_id: i64,
        resource: &DiscoveredResource,
    ) -> Result<Option<SubsequentRequest>, DbError> {
        let conn = self.conn()?;
        if request_exists(&conn, target_id, &resource.url)? {
            return Ok(None);
        }

        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO subsequent_requests
                 (url_id, target_url, ip_address, resource_type, state_type, protocol, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                target_id,
                resource.url,
                resource.ip_address,
                resource.resource_type.as_str(),
                resource.state_type.as_str(),
                resource.protocol.as_str(),
                format_time(now),
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }

        Ok(Some(SubsequentRequest {
            id: conn.last_insert_rowid(),
            target_id,
            target_url: resource.url.clone(),
            ip_address: resource.ip_address.clone(),
            resource_type: resource.resource_type,
            state_type: resource.state_type,
            protocol: resource.protocol,
            timestamp: now,
        }))
    }

    /// Sub-resource history for a target, newest first.
    pub fn subsequent_requests(
        &self,
        target_id: i64,
        filter: &SubsequentRequestFilter,
    ) -> Result<Vec<SubsequentRequest>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM subsequent_requests
             WHERE url_id = ?1
               AND (?2 IS NULL OR resource_type = ?2)
               AND (?3 IS NULL OR state_type = ?3)
               AND (?4 IS NULL OR protocol = ?4)
             ORDER BY timestamp DESC, id DESC"
        ))?;
        let requests = stmt
            .query_map(
                params![
                    target_id,
                    non_empty(&filter.resource_type),
                    non_empty(&filter.state_type),
                    non_empty(&filter.protocol),
                ],
                request_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(requests)
    }

    /// Distinct resource/state/protocol values, excluding "Unknown".
    pub fn filter_options(&self) -> Result<FilterOptions, DbError> {
        let conn = self.conn()?;
        let distinct = |column: &str| -> Result<Vec<String>, DbError> {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT {column} FROM subsequent_requests
                 WHERE {column} != 'Unknown' ORDER BY {column}"
            ))?;
            let values = stmt
                .query_map([], |row| row.get(0))?
                .collect::<SqlResult<Vec<String>>>()?;
            Ok(values)
        };

        Ok(FilterOptions {
            resource_types: distinct("resource_type")?,
            state_types: distinct("state_type")?,
            protocols: distinct("protocol")?,
        })
    }

    // --- Alert state ---

    pub fn load_alert_state(&self, target_id: i64) -> Result<AlertState, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT consecutive_failures, last_alerted_at, alerting FROM urls WHERE id = ?1",
            params![target_id],
            |row| {
                let last: Option<String> = row.get(1)?;
                Ok(AlertState {
                    consecutive_failures: row.get(0)?,
                    last_alerted_at: last.as_deref().and_then(parse_db_time),
                    alerting: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    pub fn save_alert_state(&self, target_id: i64, state: &AlertState) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE urls SET consecutive_failures = ?1, last_alerted_at = ?2, alerting = ?3
             WHERE id = ?4",
            params![
                state.consecutive_failures,
                state.last_alerted_at.map(format_time),
                state.alerting,
                target_id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

fn request_exists(conn: &Connection, target_id: i64, url: &str) -> Result<bool, DbError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subsequent_requests WHERE url_id = ?1 AND target_url = ?2 LIMIT 1",
            params![target_id, url],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn target_from_row(row: &Row<'_>) -> SqlResult<MonitoredTarget> {
    let created: String = row.get(8)?;
    let updated: String = row.get(9)?;
    Ok(MonitoredTarget {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        active: row.get(3)?,
        check_frequency: row.get(4)?,
        one_time: row.get(5)?,
        alert_enabled: row.get(6)?,
        alert_recovery: row.get(7)?,
        created_at: parse_db_time(&created).unwrap_or_else(Utc::now),
        updated_at: parse_db_time(&updated).unwrap_or_else(Utc::now),
    })
}

fn request_from_row(row: &Row<'_>) -> SqlResult<SubsequentRequest> {
    let resource_type: String = row.get(4)?;
    let state_type: String = row.get(5)?;
    let protocol: String = row.get(6)?;
    let time_str: String = row.get(7)?;
    Ok(SubsequentRequest {
        id: row.get(0)?,
        target_id: row.get(1)?,
        target_url: row.get(2)?,
        ip_address: row.get(3)?,
        resource_type: ResourceType::from_label(&resource_type),
        state_type: StateType::from_label(&state_type),
        protocol: Protocol::from_label(&protocol),
        timestamp: parse_db_time(&time_str).unwrap_or_else(Utc::now),
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
