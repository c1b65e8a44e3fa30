//! Persistence for workout records and templates, plus app configuration.

pub mod config;
pub mod database;
pub mod schema;

use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::recording::types::WorkoutRecord;
use crate::workouts::types::WorkoutTemplate;

pub use config::{AppConfig, ConfigError, RecordingSettings, RiderProfile, SensorSettings};
pub use database::Database;

/// Errors from a workout store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Storage for finished rides and workout templates.
///
/// Saving assigns and returns a new identity; the `id` field of the value
/// passed in is ignored.
pub trait WorkoutStore: Send + Sync {
    fn save_record(&self, record: &WorkoutRecord) -> Result<i64, StorageError>;

    /// Most recent first, by start time.
    fn recent_records(&self, limit: usize) -> Result<Vec<WorkoutRecord>, StorageError>;

    fn get_record(&self, id: i64) -> Result<Option<WorkoutRecord>, StorageError>;

    fn delete_record(&self, id: i64) -> Result<(), StorageError>;

    fn save_template(&self, template: &WorkoutTemplate) -> Result<i64, StorageError>;

    /// All templates ordered by name.
    fn list_templates(&self) -> Result<Vec<WorkoutTemplate>, StorageError>;

    fn get_template(&self, id: i64) -> Result<Option<WorkoutTemplate>, StorageError>;

    /// Replace the stored template with `template.id`.
    fn update_template(&self, template: &WorkoutTemplate) -> Result<(), StorageError>;

    fn delete_template(&self, id: i64) -> Result<(), StorageError>;
}

#[derive(Default)]
struct MemoryInner {
    next_record: i64,
    next_template: i64,
    records: BTreeMap<i64, WorkoutRecord>,
    templates: BTreeMap<i64, WorkoutTemplate>,
}

/// Process-local store, used by tests and when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl WorkoutStore for MemoryStore {
    fn save_record(&self, record: &WorkoutRecord) -> Result<i64, StorageError> {
        let mut inner = self.lock();
        inner.next_record += 1;
        let id = inner.next_record;
        let mut stored = record.clone();
        stored.id = Some(id);
        inner.records.insert(id, stored);
        Ok(id)
    }

    fn recent_records(&self, limit: usize) -> Result<Vec<WorkoutRecord>, StorageError> {
        let inner = self.lock();
        let mut records: Vec<WorkoutRecord> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    fn get_record(&self, id: i64) -> Result<Option<WorkoutRecord>, StorageError> {
        Ok(self.lock().records.get(&id).cloned())
    }

    fn delete_record(&self, id: i64) -> Result<(), StorageError> {
        self.lock()
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("Workout {}", id)))
    }

    fn save_template(&self, template: &WorkoutTemplate) -> Result<i64, StorageError> {
        let mut inner = self.lock();
        inner.next_template += 1;
        let id = inner.next_template;
        let mut stored = template.clone();
        stored.id = Some(id);
        inner.templates.insert(id, stored);
        Ok(id)
    }

    fn list_templates(&self) -> Result<Vec<WorkoutTemplate>, StorageError> {
        let mut templates: Vec<WorkoutTemplate> = self.lock().templates.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    fn get_template(&self, id: i64) -> Result<Option<WorkoutTemplate>, StorageError> {
        Ok(self.lock().templates.get(&id).cloned())
    }

    fn update_template(&self, template: &WorkoutTemplate) -> Result<(), StorageError> {
        let id = template
            .id
            .ok_or_else(|| StorageError::NotFound("Template without id".to_string()))?;
        let mut inner = self.lock();
        match inner.templates.get_mut(&id) {
            Some(slot) => {
                *slot = WorkoutTemplate {
                    updated_at: chrono::Utc::now(),
                    ..template.clone()
                };
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("Template {}", id))),
        }
    }

    fn delete_template(&self, id: i64) -> Result<(), StorageError> {
        self.lock()
            .templates
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("Template {}", id)))
    }
}
