/*!
 * Persisted snapshot format.
 *
 * A snapshot is one JSON document holding the full project tree, tagged with
 * `schema_version`. Writes go to a temporary file in the destination
 * directory which then atomically replaces the destination, so a crash never
 * leaves a half-written snapshot behind.
 *
 * Schema history:
 * - v1: legacy cache layout (files keyed by path, numeric status codes)
 * - v2: current layout (`{"schema_version": 2, "project": {...}}`)
 */

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::Ordering;
use tempfile::NamedTempFile;

use super::ProgressStore;
use crate::errors::StoreError;
use crate::project::{
    DetectedLanguage, Item, ItemStatus, Project, ProjectFile, ProjectStatistics,
};

/// Current snapshot schema version
pub const SCHEMA_VERSION: u64 = 2;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    schema_version: u64,
    project: &'a Project,
}

#[derive(Deserialize)]
struct SnapshotDocument {
    project: Project,
}

impl ProgressStore {
    /// Load a snapshot, upgrading older schemas in memory.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = fs::read(path)?;
        let project = parse_snapshot(&raw)?;
        info!(
            "Loaded project '{}' from {} ({} files)",
            project.name,
            path.display(),
            project.files.len()
        );
        ProgressStore::new(project)
    }

    /// Serialize the project and atomically replace `path`.
    ///
    /// Saves are serialized; item mutation is only blocked while each file is
    /// copied, never during serialization or disk I/O.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock();

        let revision = self.revision();
        let project = self.snapshot();
        let bytes = encode_snapshot(&project)?;
        write_atomically(path, &bytes)?;

        self.saved_revision.fetch_max(revision, Ordering::SeqCst);
        debug!("Saved snapshot revision {} to {}", revision, path.display());
        Ok(())
    }
}

/// Serialize a project as a current-schema snapshot document.
pub fn encode_snapshot(project: &Project) -> Result<Vec<u8>, StoreError> {
    let document = SnapshotRef {
        schema_version: SCHEMA_VERSION,
        project,
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

/// Parse a snapshot document of any supported schema.
pub fn parse_snapshot(raw: &[u8]) -> Result<Project, StoreError> {
    let value: Value = serde_json::from_slice(raw)?;
    let version = value
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1);

    match version {
        SCHEMA_VERSION => {
            let document: SnapshotDocument = serde_json::from_value(value)?;
            Ok(document.project)
        }
        1 => {
            let legacy: LegacyProject = serde_json::from_value(value)?;
            info!(
                "Upgrading snapshot from schema v1 to v{} ({} files)",
                SCHEMA_VERSION,
                legacy.files.len()
            );
            Ok(legacy.upgrade())
        }
        other => Err(StoreError::UnsupportedSchema(other)),
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

// Schema v1 layout

#[derive(Deserialize)]
struct LegacyProject {
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    project_type: String,
    #[serde(default)]
    project_name: String,
    #[serde(default)]
    stats_data: Option<LegacyStatistics>,
    #[serde(default)]
    detected_encoding: Option<String>,
    #[serde(default)]
    detected_line_ending: Option<String>,
    #[serde(default)]
    files: Map<String, Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LegacyStatistics {
    total_requests: u64,
    error_requests: u64,
    total_line: u64,
    line: u64,
    token: u64,
    total_completion_tokens: u64,
    start_time: f64,
    time: f64,
}

#[derive(Deserialize)]
struct LegacyFile {
    #[serde(default)]
    storage_path: Option<String>,
    #[serde(default)]
    file_name: String,
    #[serde(default)]
    file_project_type: String,
    #[serde(default)]
    items: Vec<LegacyItem>,
}

#[derive(Deserialize)]
struct LegacyItem {
    #[serde(alias = "text_index")]
    row_index: u64,
    #[serde(default)]
    source_text: String,
    #[serde(default)]
    translated_text: Option<String>,
    #[serde(default)]
    polished_text: Option<String>,
    #[serde(default)]
    translation_status: i64,
    #[serde(default)]
    model: Option<String>,
    /// `[code, confidence, [alternates...]]`
    #[serde(default)]
    lang_code: Option<(String, f32, Vec<String>)>,
    #[serde(default)]
    extra: Map<String, Value>,
}

impl LegacyProject {
    fn upgrade(self) -> Project {
        let statistics = self
            .stats_data
            .map(|s| ProjectStatistics {
                total_requests: s.total_requests,
                error_requests: s.error_requests,
                total_line: s.total_line,
                line: s.line,
                estimated_tokens: s.token,
                prompt_tokens: 0,
                completion_tokens: s.total_completion_tokens,
                start_time_ms: (s.start_time > 0.0).then(|| (s.start_time * 1000.0) as i64),
                elapsed_secs: s.time,
            })
            .unwrap_or_default();

        let files = self
            .files
            .into_iter()
            .filter_map(|(key, value)| {
                let legacy: LegacyFile = match serde_json::from_value(value) {
                    Ok(file) => file,
                    Err(e) => {
                        log::warn!("Skipping unreadable legacy file entry '{}': {}", key, e);
                        return None;
                    }
                };
                Some(legacy.upgrade(key))
            })
            .collect();

        let id = if self.project_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.project_id
        };

        Project {
            id,
            project_type: self.project_type,
            name: self.project_name,
            statistics,
            encoding: self.detected_encoding.unwrap_or_else(|| "utf-8".to_string()),
            line_ending: self.detected_line_ending.unwrap_or_else(|| "\n".to_string()),
            files,
        }
    }
}

impl LegacyFile {
    fn upgrade(self, key: String) -> ProjectFile {
        let storage_path = self.storage_path.unwrap_or(key);
        let mut items: Vec<Item> = self.items.into_iter().map(LegacyItem::upgrade).collect();
        items.sort_by_key(|item| item.index);
        items.dedup_by_key(|item| item.index);

        let mut file = ProjectFile::new(storage_path, self.file_project_type);
        if !self.file_name.is_empty() {
            file.display_name = self.file_name;
        }
        file.items = items;
        file
    }
}

impl LegacyItem {
    fn upgrade(self) -> Item {
        let status = ItemStatus::from_legacy_code(self.translation_status).unwrap_or_default();
        let mut item = Item::new(self.row_index, self.source_text).with_status(status);
        item.translated_text = self.translated_text.filter(|t| !t.is_empty());
        item.polished_text = self.polished_text.filter(|t| !t.is_empty());
        item.model = self.model.filter(|m| !m.is_empty());
        item.language = self.lang_code.map(|(code, confidence, alternates)| DetectedLanguage {
            code,
            confidence,
            alternates,
        });
        item.metadata = self.extra;
        item
    }
}
