/*!
 * Thread-safe progress store.
 *
 * The store is the single source of truth for all project state during a job.
 * Each file's items sit behind their own `RwLock`, so workers touching
 * different files never contend, and readers of one file never block writers
 * of another. Callers never see a lock: every access goes through a method
 * that takes the narrowest lock for the shortest time.
 *
 * - `snapshot`: persisted document format, legacy upgrade and atomic writes
 * - `autosave`: background timer that flushes the store periodically
 */

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::StoreError;
use crate::project::{Item, ItemStatus, Project, ProjectFile, ProjectStatistics};

pub mod autosave;
pub mod snapshot;

pub use autosave::AutosaveHandle;
pub use snapshot::SCHEMA_VERSION;

/// Project-level attributes that are not per-file.
#[derive(Debug, Clone)]
struct ProjectHeader {
    id: String,
    project_type: String,
    name: String,
    encoding: String,
    line_ending: String,
}

/// One file and the lock guarding its items.
#[derive(Debug)]
struct FileSlot {
    storage_path: String,
    display_name: String,
    file_type: String,
    items: RwLock<Vec<Item>>,
}

impl FileSlot {
    fn position_of(items: &[Item], index: u64) -> Option<usize> {
        items.binary_search_by_key(&index, |item| item.index).ok()
    }

    fn to_file(&self) -> ProjectFile {
        ProjectFile {
            storage_path: self.storage_path.clone(),
            display_name: self.display_name.clone(),
            file_type: self.file_type.clone(),
            items: self.items.read().clone(),
        }
    }
}

/// Selection of items for iteration.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Statuses to include; `None` includes all
    pub statuses: Option<HashSet<ItemStatus>>,
    /// File types to include; `None` includes all
    pub file_types: Option<HashSet<String>>,
}

impl ItemFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: ItemStatus) -> Self {
        Self {
            statuses: Some(HashSet::from([status])),
            file_types: None,
        }
    }

    pub fn with_statuses(statuses: impl IntoIterator<Item = ItemStatus>) -> Self {
        Self {
            statuses: Some(statuses.into_iter().collect()),
            file_types: None,
        }
    }

    pub fn file_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.file_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    fn accepts_file(&self, file_type: &str) -> bool {
        self.file_types
            .as_ref()
            .is_none_or(|types| types.contains(file_type))
    }

    fn accepts_item(&self, item: &Item) -> bool {
        self.statuses
            .as_ref()
            .is_none_or(|statuses| statuses.contains(&item.status))
    }
}

/// An item together with the path of the file that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemEntry {
    pub file_path: String,
    pub item: Item,
}

/// Lazy iterator over the store's items.
///
/// Each file is copied under its read lock when the iterator reaches it, so
/// items from one file form a consistent view while mutation of files already
/// visited proceeds freely. Call `ProgressStore::iter_items` again to restart.
#[derive(Clone)]
pub struct ItemIter<'a> {
    store: &'a ProgressStore,
    filter: ItemFilter,
    next_file: usize,
    buffer: std::vec::IntoIter<ItemEntry>,
}

impl Iterator for ItemIter<'_> {
    type Item = ItemEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.next() {
                return Some(entry);
            }
            let slot = self.store.files.get(self.next_file)?;
            self.next_file += 1;
            if !self.filter.accepts_file(&slot.file_type) {
                continue;
            }
            let batch: Vec<ItemEntry> = slot
                .items
                .read()
                .iter()
                .filter(|item| self.filter.accepts_item(item))
                .map(|item| ItemEntry {
                    file_path: slot.storage_path.clone(),
                    item: item.clone(),
                })
                .collect();
            self.buffer = batch.into_iter();
        }
    }
}

/// Item counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub untranslated: usize,
    pub translated: usize,
    pub polished: usize,
    pub excluded: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.untranslated + self.translated + self.polished + self.excluded
    }

    pub fn get(&self, status: ItemStatus) -> usize {
        match status {
            ItemStatus::Untranslated => self.untranslated,
            ItemStatus::Translated => self.translated,
            ItemStatus::Polished => self.polished,
            ItemStatus::Excluded => self.excluded,
        }
    }
}

/// Thread-safe hierarchical state of all files and items of one project.
#[derive(Debug)]
pub struct ProgressStore {
    header: RwLock<ProjectHeader>,
    files: Vec<FileSlot>,
    by_path: HashMap<String, usize>,
    statistics: Mutex<ProjectStatistics>,
    /// Bumped on every mutation
    revision: AtomicU64,
    /// Revision captured by the last successful save
    saved_revision: AtomicU64,
    /// Serializes saves
    save_lock: Mutex<()>,
}

impl ProgressStore {
    /// Take ownership of a project, checking its structural invariants.
    pub fn new(project: Project) -> Result<Self, StoreError> {
        let Project {
            id,
            project_type,
            name,
            statistics,
            encoding,
            line_ending,
            files,
        } = project;

        let mut by_path = HashMap::with_capacity(files.len());
        let mut slots = Vec::with_capacity(files.len());

        for (position, file) in files.into_iter().enumerate() {
            if by_path.insert(file.storage_path.clone(), position).is_some() {
                return Err(StoreError::InvalidProject(format!(
                    "duplicate file path {}",
                    file.storage_path
                )));
            }
            if let Some(pair) = file.items.windows(2).find(|w| w[0].index >= w[1].index) {
                return Err(StoreError::InvalidProject(format!(
                    "item indices in {} are not strictly increasing ({} then {})",
                    file.storage_path, pair[0].index, pair[1].index
                )));
            }
            slots.push(FileSlot {
                storage_path: file.storage_path,
                display_name: file.display_name,
                file_type: file.file_type,
                items: RwLock::new(file.items),
            });
        }

        Ok(Self {
            header: RwLock::new(ProjectHeader {
                id,
                project_type,
                name,
                encoding,
                line_ending,
            }),
            files: slots,
            by_path,
            statistics: Mutex::new(statistics),
            revision: AtomicU64::new(0),
            saved_revision: AtomicU64::new(0),
            save_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> String {
        self.header.read().id.clone()
    }

    pub fn name(&self) -> String {
        self.header.read().name.clone()
    }

    pub fn project_type(&self) -> String {
        self.header.read().project_type.clone()
    }

    /// File paths in insertion order.
    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.storage_path.clone()).collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn file_type(&self, path: &str) -> Result<String, StoreError> {
        Ok(self.slot(path)?.file_type.clone())
    }

    /// Copy of all items of one file, in source order.
    pub fn file_items(&self, path: &str) -> Result<Vec<Item>, StoreError> {
        Ok(self.slot(path)?.items.read().clone())
    }

    pub fn item(&self, path: &str, index: u64) -> Result<Item, StoreError> {
        self.read_item(path, index, Item::clone)
    }

    pub fn status(&self, path: &str, index: u64) -> Result<ItemStatus, StoreError> {
        self.read_item(path, index, |item| item.status)
    }

    /// Change an item's status, enforcing the lifecycle rules.
    pub fn set_status(&self, path: &str, index: u64, status: ItemStatus) -> Result<(), StoreError> {
        self.with_item_mut(path, index, |item| {
            check_transition(path, item, status)?;
            item.status = status;
            Ok(())
        })
    }

    /// Record a translation and mark the item translated.
    pub fn set_translated(
        &self,
        path: &str,
        index: u64,
        text: impl Into<String>,
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        let text = text.into();
        self.with_item_mut(path, index, |item| {
            check_transition(path, item, ItemStatus::Translated)?;
            item.translated_text = Some(text);
            item.model = model.map(str::to_string);
            item.status = ItemStatus::Translated;
            Ok(())
        })
    }

    /// Record a polished text and mark the item polished.
    pub fn set_polished(
        &self,
        path: &str,
        index: u64,
        text: impl Into<String>,
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        let text = text.into();
        self.with_item_mut(path, index, |item| {
            check_transition(path, item, ItemStatus::Polished)?;
            item.polished_text = Some(text);
            if model.is_some() {
                item.model = model.map(str::to_string);
            }
            item.status = ItemStatus::Polished;
            Ok(())
        })
    }

    pub fn set_metadata(
        &self,
        path: &str,
        index: u64,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), StoreError> {
        let key = key.into();
        self.with_item_mut(path, index, |item| {
            item.metadata.insert(key, value);
            Ok(())
        })
    }

    /// Send a processed item back for another attempt, dropping its outputs.
    pub fn requeue(&self, path: &str, index: u64) -> Result<(), StoreError> {
        self.with_item_mut(path, index, |item| {
            check_transition(path, item, ItemStatus::Untranslated)?;
            item.status = ItemStatus::Untranslated;
            item.translated_text = None;
            item.polished_text = None;
            item.model = None;
            Ok(())
        })
    }

    /// Apply a chunk's translations to one file under a single write lock.
    ///
    /// Every target is checked before anything is written, so either all
    /// results land or none do.
    pub fn apply_translations(
        &self,
        path: &str,
        results: &[(u64, String)],
        model: Option<&str>,
    ) -> Result<usize, StoreError> {
        let slot = self.slot(path)?;
        let mut items = slot.items.write();

        let mut positions = Vec::with_capacity(results.len());
        for (index, _) in results {
            let position = FileSlot::position_of(&items, *index).ok_or_else(|| {
                StoreError::UnknownItem {
                    path: path.to_string(),
                    index: *index,
                }
            })?;
            check_transition(path, &items[position], ItemStatus::Translated)?;
            positions.push(position);
        }

        for (position, (_, text)) in positions.into_iter().zip(results) {
            let item = &mut items[position];
            item.translated_text = Some(text.clone());
            item.model = model.map(str::to_string);
            item.status = ItemStatus::Translated;
        }
        drop(items);

        self.touch();
        Ok(results.len())
    }

    /// Lazily iterate items matching `filter`, file by file.
    pub fn iter_items(&self, filter: ItemFilter) -> ItemIter<'_> {
        ItemIter {
            store: self,
            filter,
            next_file: 0,
            buffer: Vec::new().into_iter(),
        }
    }

    pub fn count_items(&self, status: ItemStatus) -> usize {
        self.files
            .iter()
            .map(|slot| slot.items.read().iter().filter(|i| i.status == status).count())
            .sum()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for slot in &self.files {
            for item in slot.items.read().iter() {
                match item.status {
                    ItemStatus::Untranslated => counts.untranslated += 1,
                    ItemStatus::Translated => counts.translated += 1,
                    ItemStatus::Polished => counts.polished += 1,
                    ItemStatus::Excluded => counts.excluded += 1,
                }
            }
        }
        counts
    }

    pub fn statistics(&self) -> ProjectStatistics {
        self.statistics.lock().clone()
    }

    /// Mutate statistics and return a copy of the result.
    pub fn update_statistics<F>(&self, update: F) -> ProjectStatistics
    where
        F: FnOnce(&mut ProjectStatistics),
    {
        let mut stats = self.statistics.lock();
        update(&mut stats);
        let copy = stats.clone();
        drop(stats);
        self.touch();
        copy
    }

    /// Point-in-time copy of the whole project.
    ///
    /// Files are copied one at a time, each under its own read lock.
    pub fn snapshot(&self) -> Project {
        let header = self.header.read().clone();
        let statistics = self.statistics();
        Project {
            id: header.id,
            project_type: header.project_type,
            name: header.name,
            statistics,
            encoding: header.encoding,
            line_ending: header.line_ending,
            files: self.files.iter().map(FileSlot::to_file).collect(),
        }
    }

    /// Consume the store and return the project it holds.
    pub fn into_project(self) -> Project {
        self.snapshot()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Whether anything changed since the last successful save.
    pub fn is_dirty(&self) -> bool {
        self.revision() > self.saved_revision.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    fn slot(&self, path: &str) -> Result<&FileSlot, StoreError> {
        self.by_path
            .get(path)
            .map(|&position| &self.files[position])
            .ok_or_else(|| StoreError::UnknownFile(path.to_string()))
    }

    fn read_item<T>(&self, path: &str, index: u64, read: impl FnOnce(&Item) -> T) -> Result<T, StoreError> {
        let slot = self.slot(path)?;
        let items = slot.items.read();
        let position = FileSlot::position_of(&items, index).ok_or_else(|| StoreError::UnknownItem {
            path: path.to_string(),
            index,
        })?;
        Ok(read(&items[position]))
    }

    fn with_item_mut<T>(
        &self,
        path: &str,
        index: u64,
        mutate: impl FnOnce(&mut Item) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let slot = self.slot(path)?;
        let mut items = slot.items.write();
        let position = FileSlot::position_of(&items, index).ok_or_else(|| StoreError::UnknownItem {
            path: path.to_string(),
            index,
        })?;
        let result = mutate(&mut items[position])?;
        drop(items);
        self.touch();
        Ok(result)
    }
}

fn check_transition(path: &str, item: &Item, next: ItemStatus) -> Result<(), StoreError> {
    if item.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            path: path.to_string(),
            index: item.index,
            from: item.status.to_string(),
            to: next.to_string(),
        })
    }
}
