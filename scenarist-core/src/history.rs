//! Completed scenarios and the documents behind them, persisted as one JSON file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::DocumentCatalog;
use crate::error::{Result, ScenaristError};
use crate::index::IndexManager;
use crate::types::{DocumentId, Namespace, TaskId};

/// A finished generation saved for later review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub id: TaskId,
    pub name: String,
    pub criteria: String,
    pub scenario: String,
    pub statistics: String,
    #[serde(default)]
    pub uploaded_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ScenarioRecord {
    pub fn new(
        id: TaskId,
        name: impl Into<String>,
        criteria: impl Into<String>,
        scenario: impl Into<String>,
        statistics: impl Into<String>,
        uploaded_files: Vec<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            criteria: criteria.into(),
            scenario: scenario.into(),
            statistics: statistics.into(),
            uploaded_files,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    records: Vec<ScenarioRecord>,
    #[serde(default)]
    catalog: DocumentCatalog,
}

/// Scenario history plus the task/document catalog.
#[derive(Debug)]
pub struct ScenarioHistory {
    path: PathBuf,
    data: HistoryFile,
}

impl ScenarioHistory {
    /// Load history from `path`; a missing file is an empty history.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            HistoryFile::default()
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records, newest first.
    pub fn list(&self) -> Vec<&ScenarioRecord> {
        let mut records: Vec<&ScenarioRecord> = self.data.records.iter().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn get(&self, id: TaskId) -> Option<&ScenarioRecord> {
        self.data.records.iter().find(|r| r.id == id)
    }

    /// Save a record, replacing any earlier one for the same task.
    pub fn insert(&mut self, record: ScenarioRecord) -> Result<()> {
        self.data.records.retain(|r| r.id != record.id);
        info!(task = %record.id, name = record.name.as_str(), "Scenario saved");
        self.data.records.push(record);
        self.save()
    }

    pub fn catalog(&self) -> &DocumentCatalog {
        &self.data.catalog
    }

    /// Mutate the catalog and persist the change.
    pub fn update_catalog<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut DocumentCatalog),
    {
        f(&mut self.data.catalog);
        self.save()
    }

    /// Delete every task's vector namespace, then drop all records and links.
    ///
    /// Returns the number of records removed. A namespace that fails to delete
    /// aborts the clear before any record is dropped.
    pub fn clear(&mut self, index: &IndexManager) -> Result<usize> {
        let mut tasks: Vec<TaskId> = self.data.records.iter().map(|r| r.id).collect();
        for namespace in index.namespaces()? {
            if let Some(task) = namespace.task_id()
                && !tasks.contains(&task)
            {
                tasks.push(task);
            }
        }

        for task in &tasks {
            index
                .delete(Namespace::Task(*task))
                .map_err(ScenaristError::from)?;
        }

        let removed = self.data.records.len();
        self.data = HistoryFile::default();
        self.save()?;
        info!(records = removed, namespaces = tasks.len(), "History cleared");
        Ok(removed)
    }

    /// Delete one task: its vector namespace first, then its record and
    /// catalog links. Returns the documents no other task references.
    pub fn delete_task(&mut self, task: TaskId, index: &IndexManager) -> Result<Vec<DocumentId>> {
        index.delete(Namespace::Task(task))?;
        self.data.records.retain(|r| r.id != task);
        let orphans = self.data.catalog.unlink_task(task);
        self.save()?;
        info!(task = %task, orphans = orphans.len(), "Task deleted");
        Ok(orphans)
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, json)?;
        if let Err(e) = std::fs::rename(&staging, &self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to replace history file");
            return Err(e.into());
        }
        Ok(())
    }
}
