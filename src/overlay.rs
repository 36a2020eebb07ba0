//! SQLite-backed overlay store for per-call annotations.
//!
//! The database lives at `~/.calldesk/overlay.db`. The provider remains the
//! source of truth for which calls exist; this store holds the locally
//! writable annotation layer (appointment status/date/time, contact fields,
//! notes) keyed by (`call_id`, `agent_id`). Rows are created on first write
//! and updated thereafter; the core never deletes them. Rejection is a
//! status value, not a deletion.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use thiserror::Error;

use crate::types::{non_empty, AppointmentStatus, ExtractionResult};

/// Errors specific to overlay store operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Overlay store lock poisoned")]
    LockPoisoned,

    #[error("Stale write for call {call_id}: stored version {stored_version} is newer than basis {basis_version}")]
    StaleWrite {
        call_id: String,
        stored_version: i64,
        basis_version: i64,
    },

    #[error("No overlay row for call {call_id}")]
    RowMissing { call_id: String },

    #[error("Invalid transition for call {call_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        call_id: String,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
}

/// A row from the `call_overlays` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayRow {
    pub id: String,
    pub call_id: String,
    pub agent_id: String,
    pub appointment_status: AppointmentStatus,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub client_name: Option<String>,
    pub client_address: Option<String>,
    pub client_email: Option<String>,
    pub notes: Option<String>,
    /// Bumped on every write. Writers pass the version they read as the
    /// basis for guarded upserts.
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Field set a writer wants applied to a call's overlay row. `None` fields
/// are left as they are (or NULL on first insert).
#[derive(Debug, Clone, Default)]
pub struct OverlayPatch {
    pub call_id: String,
    pub agent_id: String,
    pub appointment_status: Option<AppointmentStatus>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub client_name: Option<String>,
    pub client_address: Option<String>,
    pub client_email: Option<String>,
    pub notes: Option<String>,
}

impl OverlayPatch {
    /// Patch carrying the persistable subset of an extraction result:
    /// non-empty date/time/contact fields, with status set to in-process.
    pub fn from_extraction(call_id: &str, agent_id: &str, result: &ExtractionResult) -> Self {
        Self {
            call_id: call_id.to_string(),
            agent_id: agent_id.to_string(),
            appointment_status: Some(AppointmentStatus::InProcess),
            appointment_date: non_empty(&result.appointment_date).map(str::to_string),
            appointment_time: non_empty(&result.appointment_time).map(str::to_string),
            client_name: non_empty(&result.client_name).map(str::to_string),
            client_address: non_empty(&result.client_address).map(str::to_string),
            client_email: non_empty(&result.client_email).map(str::to_string),
            notes: None,
        }
    }
}

const OVERLAY_COLS: &str = "id, call_id, agent_id, appointment_status, appointment_date,
    appointment_time, client_name, client_address, client_email, notes,
    version, created_at, updated_at";

fn map_overlay_row(row: &rusqlite::Row) -> rusqlite::Result<OverlayRow> {
    let status: String = row.get(3)?;
    Ok(OverlayRow {
        id: row.get(0)?,
        call_id: row.get(1)?,
        agent_id: row.get(2)?,
        appointment_status: AppointmentStatus::parse(&status),
        appointment_date: row.get(4)?,
        appointment_time: row.get(5)?,
        client_name: row.get(6)?,
        client_address: row.get(7)?,
        client_email: row.get(8)?,
        notes: row.get(9)?,
        version: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// SQLite connection wrapper for the overlay store.
///
/// Intentionally NOT `Clone` or `Sync`; it is held behind a
/// `std::sync::Mutex` and accessed through `spawn_blocking` from async
/// paths.
pub struct OverlayDb {
    conn: Connection,
}

impl OverlayDb {
    /// Open (or create) the database at `~/.calldesk/overlay.db` and apply
    /// the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Used by the config override and
    /// by tests.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL keeps reads responsive while the extraction batch writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.calldesk/overlay.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".calldesk").join("overlay.db"))
    }

    /// All overlay rows for an agent, oldest first.
    pub fn fetch_by_agent(&self, agent_id: &str) -> Result<Vec<OverlayRow>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OVERLAY_COLS} FROM call_overlays WHERE agent_id = ?1 ORDER BY created_at"
        ))?;

        let rows = stmt.query_map(params![agent_id], map_overlay_row)?;

        let mut overlays = Vec::new();
        for row in rows {
            overlays.push(row?);
        }
        Ok(overlays)
    }

    /// The overlay row for one call, if any.
    pub fn get_row(&self, call_id: &str, agent_id: &str) -> Result<Option<OverlayRow>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OVERLAY_COLS} FROM call_overlays WHERE call_id = ?1 AND agent_id = ?2"
        ))?;

        let mut rows = stmt.query_map(params![call_id, agent_id], map_overlay_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Insert or update the overlay row for (`call_id`, `agent_id`).
    ///
    /// Idempotent per key: an existing row is updated in place, never
    /// duplicated. With `basis_version` set, the write only applies if the
    /// stored version is not newer than the basis; otherwise it is rejected
    /// as a stale write so a racing writer's result is not silently lost.
    /// `basis_version: None` is an explicit last-write-wins upsert.
    pub fn upsert(
        &self,
        patch: &OverlayPatch,
        basis_version: Option<i64>,
    ) -> Result<OverlayRow, DbError> {
        let now = Utc::now().to_rfc3339();

        match self.get_row(&patch.call_id, &patch.agent_id)? {
            Some(existing) => {
                if let Some(basis) = basis_version {
                    if existing.version > basis {
                        return Err(DbError::StaleWrite {
                            call_id: patch.call_id.clone(),
                            stored_version: existing.version,
                            basis_version: basis,
                        });
                    }
                }

                let mut merged = existing.clone();
                if let Some(status) = patch.appointment_status {
                    merged.appointment_status = status;
                }
                if patch.appointment_date.is_some() {
                    merged.appointment_date = patch.appointment_date.clone();
                }
                if patch.appointment_time.is_some() {
                    merged.appointment_time = patch.appointment_time.clone();
                }
                if patch.client_name.is_some() {
                    merged.client_name = patch.client_name.clone();
                }
                if patch.client_address.is_some() {
                    merged.client_address = patch.client_address.clone();
                }
                if patch.client_email.is_some() {
                    merged.client_email = patch.client_email.clone();
                }
                if patch.notes.is_some() {
                    merged.notes = patch.notes.clone();
                }
                merged.version = existing.version + 1;
                merged.updated_at = now;

                self.write_update(&merged)?;
                Ok(merged)
            }
            None => {
                let row = OverlayRow {
                    id: uuid::Uuid::new_v4().to_string(),
                    call_id: patch.call_id.clone(),
                    agent_id: patch.agent_id.clone(),
                    appointment_status: patch
                        .appointment_status
                        .unwrap_or(AppointmentStatus::Unset),
                    appointment_date: patch.appointment_date.clone(),
                    appointment_time: patch.appointment_time.clone(),
                    client_name: patch.client_name.clone(),
                    client_address: patch.client_address.clone(),
                    client_email: patch.client_email.clone(),
                    notes: patch.notes.clone(),
                    version: 1,
                    created_at: now.clone(),
                    updated_at: now,
                };

                self.conn.execute(
                    "INSERT INTO call_overlays
                        (id, call_id, agent_id, appointment_status, appointment_date,
                         appointment_time, client_name, client_address, client_email,
                         notes, version, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        row.id,
                        row.call_id,
                        row.agent_id,
                        row.appointment_status.as_str(),
                        row.appointment_date,
                        row.appointment_time,
                        row.client_name,
                        row.client_address,
                        row.client_email,
                        row.notes,
                        row.version,
                        row.created_at,
                        row.updated_at,
                    ],
                )?;
                Ok(row)
            }
        }
    }

    /// Confirm an in-process appointment: the suggested fields already on
    /// the row become the scheduled appointment.
    pub fn accept_appointment(
        &self,
        call_id: &str,
        agent_id: &str,
        basis_version: Option<i64>,
    ) -> Result<OverlayRow, DbError> {
        self.transition(
            call_id,
            agent_id,
            basis_version,
            AppointmentStatus::Scheduled,
            false,
        )
    }

    /// Reject an in-process appointment suggestion: clears the appointment
    /// date/time and marks the row rejected. The row itself is kept.
    pub fn reject_appointment(
        &self,
        call_id: &str,
        agent_id: &str,
        basis_version: Option<i64>,
    ) -> Result<OverlayRow, DbError> {
        self.transition(
            call_id,
            agent_id,
            basis_version,
            AppointmentStatus::Rejected,
            true,
        )
    }

    fn transition(
        &self,
        call_id: &str,
        agent_id: &str,
        basis_version: Option<i64>,
        to: AppointmentStatus,
        clear_appointment: bool,
    ) -> Result<OverlayRow, DbError> {
        let existing = self
            .get_row(call_id, agent_id)?
            .ok_or_else(|| DbError::RowMissing {
                call_id: call_id.to_string(),
            })?;

        if let Some(basis) = basis_version {
            if existing.version > basis {
                return Err(DbError::StaleWrite {
                    call_id: call_id.to_string(),
                    stored_version: existing.version,
                    basis_version: basis,
                });
            }
        }

        // Accept/reject only act on a pending suggestion
        if existing.appointment_status != AppointmentStatus::InProcess {
            return Err(DbError::InvalidTransition {
                call_id: call_id.to_string(),
                from: existing.appointment_status,
                to,
            });
        }

        let mut updated = existing.clone();
        updated.appointment_status = to;
        if clear_appointment {
            updated.appointment_date = None;
            updated.appointment_time = None;
        }
        updated.version = existing.version + 1;
        updated.updated_at = Utc::now().to_rfc3339();

        self.write_update(&updated)?;
        Ok(updated)
    }

    fn write_update(&self, row: &OverlayRow) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE call_overlays SET
                appointment_status = ?1, appointment_date = ?2, appointment_time = ?3,
                client_name = ?4, client_address = ?5, client_email = ?6,
                notes = ?7, version = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                row.appointment_status.as_str(),
                row.appointment_date,
                row.appointment_time,
                row.client_name,
                row.client_address,
                row.client_email,
                row.notes,
                row.version,
                row.updated_at,
                row.id,
            ],
        )?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
