//! SQLite-backed workout store using rusqlite.
//!
//! Timelines, summaries and interval lists are stored as JSON columns.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::recording::types::WorkoutRecord;
use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use crate::storage::{StorageError, WorkoutStore};
use crate::workouts::types::WorkoutTemplate;

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn initialize(&self) -> Result<(), StorageError> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        let current_version = schema_version(&conn)?;
        if current_version < CURRENT_VERSION {
            migrate(&conn, current_version)?;
        }
        Ok(())
    }

    /// Schema version recorded in the database.
    pub fn schema_version(&self) -> Result<i32, StorageError> {
        schema_version(&self.conn())
    }
}

fn schema_version(conn: &Connection) -> Result<i32, StorageError> {
    let result: SqliteResult<i32> = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(version) => Ok(version),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(StorageError::QueryFailed(e.to_string())),
    }
}

fn migrate(conn: &Connection, from_version: i32) -> Result<(), StorageError> {
    if from_version < 1 {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
            [CURRENT_VERSION],
        )
        .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        tracing::info!("Database migrated to version {}", CURRENT_VERSION);
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, StorageError> {
    serde_json::from_str(json).map_err(|e| StorageError::DeserializationError(e.to_string()))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::DeserializationError(e.to_string()))
}

const RECORD_COLUMNS: &str =
    "id, template_id, name, started_at, ended_at, samples_json, summary_json";

const TEMPLATE_COLUMNS: &str = "id, name, description, intervals_json, created_at, updated_at";

/// Raw workout row from the database.
struct RecordRow {
    id: i64,
    template_id: Option<i64>,
    name: String,
    started_at: String,
    ended_at: String,
    samples_json: String,
    summary_json: String,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            template_id: row.get(1)?,
            name: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            samples_json: row.get(5)?,
            summary_json: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<WorkoutRecord, StorageError> {
        Ok(WorkoutRecord {
            id: Some(self.id),
            template_id: self.template_id,
            name: self.name,
            started_at: parse_time(&self.started_at)?,
            ended_at: parse_time(&self.ended_at)?,
            samples: from_json(&self.samples_json)?,
            summary: from_json(&self.summary_json)?,
        })
    }
}

struct TemplateRow {
    id: i64,
    name: String,
    description: Option<String>,
    intervals_json: String,
    created_at: String,
    updated_at: String,
}

impl TemplateRow {
    fn from_row(row: &rusqlite::Row) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            intervals_json: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_template(self) -> Result<WorkoutTemplate, StorageError> {
        Ok(WorkoutTemplate {
            id: Some(self.id),
            name: self.name,
            description: self.description,
            intervals: from_json(&self.intervals_json)?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

impl WorkoutStore for Database {
    fn save_record(&self, record: &WorkoutRecord) -> Result<i64, StorageError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO workouts (template_id, name, started_at, ended_at, samples_json, summary_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.template_id,
                record.name,
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339(),
                to_json(&record.samples)?,
                to_json(&record.summary)?,
            ],
        )
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let id = conn.last_insert_rowid();
        tracing::debug!("Saved workout {} as id {}", record.name, id);
        Ok(id)
    }

    fn recent_records(&self, limit: usize) -> Result<Vec<WorkoutRecord>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM workouts ORDER BY started_at DESC, id DESC LIMIT ?1",
                RECORD_COLUMNS
            ))
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![limit as i64], RecordRow::from_row)
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let row = row.map_err(|e| StorageError::QueryFailed(e.to_string()))?;
            records.push(row.into_record()?);
        }
        Ok(records)
    }

    fn get_record(&self, id: i64) -> Result<Option<WorkoutRecord>, StorageError> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM workouts WHERE id = ?1", RECORD_COLUMNS),
                params![id],
                RecordRow::from_row,
            )
            .optional()
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.map(RecordRow::into_record).transpose()
    }

    fn delete_record(&self, id: i64) -> Result<(), StorageError> {
        let rows_affected = self
            .conn()
            .execute("DELETE FROM workouts WHERE id = ?1", params![id])
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if rows_affected == 0 {
            return Err(StorageError::NotFound(format!("Workout {}", id)));
        }
        Ok(())
    }

    fn save_template(&self, template: &WorkoutTemplate) -> Result<i64, StorageError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO templates (name, description, intervals_json, total_duration_seconds,
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                template.name,
                template.description,
                to_json(&template.intervals)?,
                template.total_duration_seconds(),
                template.created_at.to_rfc3339(),
                template.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn list_templates(&self) -> Result<Vec<WorkoutTemplate>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM templates ORDER BY name",
                TEMPLATE_COLUMNS
            ))
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], TemplateRow::from_row)
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let mut templates = Vec::new();
        for row in rows {
            let row = row.map_err(|e| StorageError::QueryFailed(e.to_string()))?;
            templates.push(row.into_template()?);
        }
        Ok(templates)
    }

    fn get_template(&self, id: i64) -> Result<Option<WorkoutTemplate>, StorageError> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM templates WHERE id = ?1", TEMPLATE_COLUMNS),
                params![id],
                TemplateRow::from_row,
            )
            .optional()
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.map(TemplateRow::into_template).transpose()
    }

    fn update_template(&self, template: &WorkoutTemplate) -> Result<(), StorageError> {
        let id = template
            .id
            .ok_or_else(|| StorageError::NotFound("Template without id".to_string()))?;

        let rows_affected = self
            .conn()
            .execute(
                "UPDATE templates SET name = ?2, description = ?3, intervals_json = ?4,
                 total_duration_seconds = ?5, updated_at = ?6 WHERE id = ?1",
                params![
                    id,
                    template.name,
                    template.description,
                    to_json(&template.intervals)?,
                    template.total_duration_seconds(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if rows_affected == 0 {
            return Err(StorageError::NotFound(format!("Template {}", id)));
        }
        Ok(())
    }

    fn delete_template(&self, id: i64) -> Result<(), StorageError> {
        let rows_affected = self
            .conn()
            .execute("DELETE FROM templates WHERE id = ?1", params![id])
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if rows_affected == 0 {
            return Err(StorageError::NotFound(format!("Template {}", id)));
        }
        Ok(())
    }
}
