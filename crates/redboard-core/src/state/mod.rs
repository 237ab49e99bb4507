//! Durable coordinator state backed by SQLite
//!
//! One row per coordinator holds a JSON document with the breaker fields,
//! the last snapshot and the error history. Writes replace the row inside a
//! transaction, so a crash never leaves a half-written state behind.
//!
//! Schema history of the JSON document:
//! - v1: flat service list, interval in seconds
//! - v2: interval in minutes, renamed breaker counters
//! - v3: services nested under properties, breaker fields grouped (current)
//!
//! Restoring never fails: a missing, corrupt or unmigratable row yields an
//! empty state with a Closed breaker.

pub mod migration;

pub use migration::{migrate, SCHEMA_VERSION};

use crate::analytics::{compute_metrics, summarize};
use crate::breaker::BreakerSnapshot;
use crate::config::{CoordinatorConfig, PollingInterval};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use redboard_types::{CircuitState, ErrorRecord, Snapshot};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DB_FILE: &str = "state.db";

/// Everything a coordinator needs to resume after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorState {
    #[serde(default)]
    pub config_id: String,
    #[serde(default)]
    pub polling_interval: PollingInterval,
    #[serde(default)]
    pub breaker: BreakerSnapshot,
    #[serde(default)]
    pub last_successful_fetch: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snapshot: Snapshot,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
}

impl CoordinatorState {
    pub fn empty(config_id: impl Into<String>) -> Self {
        Self {
            config_id: config_id.into(),
            polling_interval: PollingInterval::default(),
            breaker: BreakerSnapshot::default(),
            last_successful_fetch: None,
            snapshot: Snapshot::empty(),
            errors: Vec::new(),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state
    }

    pub fn consecutive_failure_count(&self) -> u32 {
        self.breaker.consecutive_failures
    }
}

/// Bounds applied to a state before it is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub window_days: u32,
    pub error_retention_days: u32,
    pub max_error_records: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            window_days: 30,
            error_retention_days: 30,
            max_error_records: 500,
        }
    }
}

impl From<&CoordinatorConfig> for RetentionPolicy {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            window_days: config.window_days,
            error_retention_days: config.error_retention_days,
            max_error_records: config.max_error_records,
        }
    }
}

/// What pruning removed from a state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub records: usize,
    pub errors: usize,
}

/// Drop usage days outside the window and errors beyond retention
///
/// Metrics of a trimmed series are recomputed so a restored snapshot never
/// points at a peak day it no longer holds.
pub fn prune(state: &mut CoordinatorState, policy: RetentionPolicy, now: DateTime<Utc>) -> PruneStats {
    let mut stats = PruneStats::default();
    let today = now.date_naive();

    for property in state.snapshot.properties.values_mut() {
        for service in property.services.values_mut() {
            let removed = service.series.retain_window(today, policy.window_days);
            if removed > 0 {
                service.metrics = compute_metrics(&service.series);
                service.summary = summarize(&service.series);
            }
            stats.records += removed;
        }
    }

    let cutoff = now - Duration::days(i64::from(policy.error_retention_days));
    let before = state.errors.len();
    state.errors.retain(|e| e.timestamp >= cutoff);
    if state.errors.len() > policy.max_error_records {
        let excess = state.errors.len() - policy.max_error_records;
        state.errors.drain(..excess);
    }
    stats.errors = before - state.errors.len();

    stats
}

/// How a restored state was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    /// No row for this coordinator
    Absent,
    /// Row was in the current layout
    Current,
    /// Row was upgraded from an older layout
    Migrated { from: u32 },
    /// Row could not be used; an empty state was substituted
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoredState {
    pub state: CoordinatorState,
    pub source: RestoreSource,
}

impl RestoredState {
    fn empty(config_id: &str, source: RestoreSource) -> Self {
        Self {
            state: CoordinatorState::empty(config_id),
            source,
        }
    }
}

/// SQLite store for coordinator state
pub struct StateManager {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl StateManager {
    /// Open (or create) `state.db` under `state_dir`
    pub fn open(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir).with_context(|| {
            format!("Failed to create state directory: {}", state_dir.display())
        })?;

        let db_path = state_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open state database: {}", db_path.display()))?;

        // WAL mode for concurrent readers
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;

        Self::init_schema(&conn)?;
        debug!(path = %db_path.display(), "State database initialized");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        })
    }

    /// Non-durable store, used by tests and one-shot commands
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS coordinator_state (
                config_id TEXT PRIMARY KEY,
                schema_version INTEGER NOT NULL,
                saved_at TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create state schema")
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Prune and write a state, replacing any previous row atomically
    pub fn persist(
        &self,
        state: &CoordinatorState,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<PruneStats> {
        let mut state = state.clone();
        let pruned = prune(&mut state, policy, now);
        let payload = serde_json::to_string(&state).context("Failed to serialize state")?;

        self.write_raw(&state.config_id, SCHEMA_VERSION, &payload, now)?;

        debug!(
            config_id = %state.config_id,
            pruned_records = pruned.records,
            pruned_errors = pruned.errors,
            "State persisted"
        );
        Ok(pruned)
    }

    /// Store a payload under an explicit schema version
    pub fn write_raw(
        &self,
        config_id: &str,
        schema_version: u32,
        payload: &str,
        saved_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("Failed to begin transaction")?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO coordinator_state
            (config_id, schema_version, saved_at, payload)
            VALUES (?, ?, ?, ?)
            "#,
            params![config_id, schema_version, saved_at.to_rfc3339(), payload],
        )
        .context("Failed to write state")?;
        tx.commit().context("Failed to commit state")?;
        Ok(())
    }

    /// Load the state of one coordinator, falling back to an empty state
    pub fn restore(&self, config_id: &str) -> RestoredState {
        let row = match self.read_row(config_id) {
            Ok(Some(row)) => row,
            Ok(None) => {
                debug!(config_id, "No persisted state");
                return RestoredState::empty(config_id, RestoreSource::Absent);
            }
            Err(e) => {
                warn!(config_id, error = %e, "Failed to read persisted state, starting empty");
                return RestoredState::empty(config_id, RestoreSource::Discarded);
            }
        };
        let (version, payload) = row;

        if version > SCHEMA_VERSION {
            warn!(
                config_id,
                version,
                current = SCHEMA_VERSION,
                "Persisted state written by a newer version, starting empty"
            );
            return RestoredState::empty(config_id, RestoreSource::Discarded);
        }

        let value: serde_json::Value = match serde_json::from_str(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(config_id, error = %e, "Persisted state is not valid JSON, starting empty");
                return RestoredState::empty(config_id, RestoreSource::Discarded);
            }
        };

        let value = match migrate(value, version) {
            Ok(value) => value,
            Err(e) => {
                warn!(config_id, error = %e, "Persisted state migration failed, starting empty");
                return RestoredState::empty(config_id, RestoreSource::Discarded);
            }
        };

        let mut state: CoordinatorState = match serde_json::from_value(value) {
            Ok(state) => state,
            Err(e) => {
                warn!(config_id, error = %e, "Persisted state is malformed, starting empty");
                return RestoredState::empty(config_id, RestoreSource::Discarded);
            }
        };
        state.config_id = config_id.to_string();

        let source = if version < SCHEMA_VERSION {
            recompute_derived(&mut state.snapshot);
            info!(config_id, from = version, "Migrated persisted state");
            RestoreSource::Migrated { from: version }
        } else {
            RestoreSource::Current
        };

        RestoredState { state, source }
    }

    fn read_row(&self, config_id: &str) -> Result<Option<(u32, String)>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT schema_version, payload FROM coordinator_state WHERE config_id = ?",
            params![config_id],
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .context("Failed to query state")
    }

    /// Remove the persisted state; returns whether a row existed
    pub fn clear(&self, config_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM coordinator_state WHERE config_id = ?",
                params![config_id],
            )
            .context("Failed to delete state")?;
        Ok(removed > 0)
    }

    /// Coordinators with a persisted state, sorted
    pub fn config_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT config_id FROM coordinator_state ORDER BY config_id")
            .context("Failed to prepare query")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to list states")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read state row")?;
        Ok(ids)
    }
}

/// Older layouts did not store derived values
fn recompute_derived(snapshot: &mut Snapshot) {
    for property in snapshot.properties.values_mut() {
        for service in property.services.values_mut() {
            service.metrics = compute_metrics(&service.series);
            service.summary = summarize(&service.series);
        }
    }
}
