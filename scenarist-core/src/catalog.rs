//! Task ↔ document association.
//!
//! Tasks and documents refer to each other only through `(TaskId,
//! DocumentId)` pairs held here; neither side owns the other.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{DocumentId, TaskId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentCatalog {
    links: BTreeSet<(TaskId, DocumentId)>,
    names: BTreeMap<DocumentId, String>,
}

impl DocumentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document's display name (usually its file name).
    pub fn register(&mut self, document: DocumentId, name: impl Into<String>) {
        self.names.insert(document, name.into());
    }

    /// Associate a document with a task. Returns false if already linked.
    pub fn link(&mut self, task: TaskId, document: DocumentId) -> bool {
        self.links.insert((task, document))
    }

    pub fn documents_of(&self, task: TaskId) -> Vec<&DocumentId> {
        self.links
            .range((task, DocumentId(String::new()))..)
            .take_while(|(t, _)| *t == task)
            .map(|(_, d)| d)
            .collect()
    }

    pub fn tasks_of(&self, document: &DocumentId) -> Vec<TaskId> {
        self.links
            .iter()
            .filter(|(_, d)| d == document)
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn name_of(&self, document: &DocumentId) -> Option<&str> {
        self.names.get(document).map(String::as_str)
    }

    /// Display names of a task's documents, falling back to the id.
    pub fn document_names(&self, task: TaskId) -> Vec<String> {
        self.documents_of(task)
            .into_iter()
            .map(|d| self.name_of(d).map(str::to_string).unwrap_or_else(|| d.to_string()))
            .collect()
    }

    /// Drop every link of `task`. Documents left without any task are
    /// forgotten entirely and returned.
    pub fn unlink_task(&mut self, task: TaskId) -> Vec<DocumentId> {
        let removed: Vec<DocumentId> = self.documents_of(task).into_iter().cloned().collect();
        for document in &removed {
            self.links.remove(&(task, document.clone()));
        }
        let orphans: Vec<DocumentId> = removed
            .into_iter()
            .filter(|d| self.tasks_of(d).is_empty())
            .collect();
        for document in &orphans {
            self.names.remove(document);
        }
        orphans
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_is_many_to_many() {
        let mut catalog = DocumentCatalog::new();
        let spec: DocumentId = "spec".into();
        let ui: DocumentId = "ui".into();
        assert!(catalog.link(TaskId(1), spec.clone()));
        assert!(!catalog.link(TaskId(1), spec.clone()));
        catalog.link(TaskId(1), ui.clone());
        catalog.link(TaskId(2), spec.clone());

        assert_eq!(catalog.documents_of(TaskId(1)), vec![&spec, &ui]);
        assert_eq!(catalog.documents_of(TaskId(2)), vec![&spec]);
        assert_eq!(catalog.tasks_of(&spec), vec![TaskId(1), TaskId(2)]);
        assert!(catalog.documents_of(TaskId(3)).is_empty());
    }

    #[test]
    fn test_unlink_task_forgets_orphans_only() {
        let mut catalog = DocumentCatalog::new();
        catalog.register("shared".into(), "shared.pdf");
        catalog.register("own".into(), "own.txt");
        catalog.link(TaskId(1), "shared".into());
        catalog.link(TaskId(1), "own".into());
        catalog.link(TaskId(2), "shared".into());

        let orphans = catalog.unlink_task(TaskId(1));
        assert_eq!(orphans, vec![DocumentId::from("own")]);
        assert_eq!(catalog.name_of(&"own".into()), None);
        assert_eq!(catalog.name_of(&"shared".into()), Some("shared.pdf"));
        assert_eq!(catalog.document_names(TaskId(2)), vec!["shared.pdf".to_string()]);
    }

    #[test]
    fn test_catalog_serializes() {
        let mut catalog = DocumentCatalog::new();
        catalog.register("d".into(), "d.txt");
        catalog.link(TaskId(5), "d".into());
        let json = serde_json::to_string(&catalog).unwrap();
        let back: DocumentCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, catalog);
    }
}
