/*!
 * Core data model for a translation job.
 *
 * A `Project` owns its `ProjectFile`s, each file owns its `Item`s. Nothing
 * points upward; code that needs the owning file or project receives it as
 * an explicit argument.
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle status of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Untranslated,
    Translated,
    Polished,
    Excluded,
}

impl ItemStatus {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Forward moves only (Untranslated -> Translated -> Polished), Excluded
    /// from anywhere, and re-queue back to Untranslated from a processed
    /// state. Excluded is terminal.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        match (self, next) {
            (Excluded, Excluded) => true,
            (Excluded, _) => false,
            (_, Excluded) => true,
            (Untranslated, Untranslated | Translated) => true,
            (Untranslated, Polished) => false,
            (Translated, _) => true,
            (Polished, Untranslated | Polished) => true,
            (Polished, Translated) => false,
        }
    }

    /// Legacy numeric code used by schema v1 snapshots.
    pub fn from_legacy_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Untranslated),
            1 => Some(Self::Translated),
            2 => Some(Self::Polished),
            7 => Some(Self::Excluded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Untranslated => "untranslated",
            Self::Translated => "translated",
            Self::Polished => "polished",
            Self::Excluded => "excluded",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of language detection for an item's source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLanguage {
    /// Language code of the best guess
    pub code: String,
    /// Confidence of the best guess (0.0 - 1.0)
    pub confidence: f32,
    /// Other plausible language codes
    #[serde(default)]
    pub alternates: Vec<String>,
}

/// One translatable unit of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable position within the owning file
    pub index: u64,

    /// Source text, never modified after creation
    source_text: String,

    /// Text produced by the translation step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,

    /// Text produced by a polishing step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polished_text: Option<String>,

    #[serde(default)]
    pub status: ItemStatus,

    /// Model that produced the current text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<DetectedLanguage>,

    /// Format-specific extras (original whitespace, placeholders, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Item {
    /// Create an untranslated item.
    pub fn new(index: u64, source_text: impl Into<String>) -> Self {
        Self {
            index,
            source_text: source_text.into(),
            translated_text: None,
            polished_text: None,
            status: ItemStatus::Untranslated,
            model: None,
            language: None,
            metadata: Map::new(),
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_translation(mut self, text: impl Into<String>) -> Self {
        self.translated_text = Some(text.into());
        self.status = ItemStatus::Translated;
        self
    }

    pub fn with_polish(mut self, text: impl Into<String>) -> Self {
        self.polished_text = Some(text.into());
        self.status = ItemStatus::Polished;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    /// Polished text if present, else translated text if present, else source.
    pub fn final_text(&self) -> &str {
        self.polished_text
            .as_deref()
            .or(self.translated_text.as_deref())
            .unwrap_or(&self.source_text)
    }

    /// Whether the source spans several physical lines.
    pub fn is_multiline(&self) -> bool {
        self.source_text.contains('\n')
    }
}

/// One source file's worth of items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Relative path, used as the join key
    pub storage_path: String,

    #[serde(default)]
    pub display_name: String,

    /// Format family of the reader that produced this file
    #[serde(default)]
    pub file_type: String,

    /// Items in original source order
    #[serde(default)]
    pub items: Vec<Item>,
}

impl ProjectFile {
    pub fn new(storage_path: impl Into<String>, file_type: impl Into<String>) -> Self {
        let storage_path = storage_path.into();
        let display_name = storage_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            storage_path,
            display_name,
            file_type: file_type.into(),
            items: Vec::new(),
        }
    }

    /// Append items built from plain source texts, indexed from the current end.
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.items.last().map(|i| i.index + 1).unwrap_or(0);
        for source in sources {
            self.items.push(Item::new(next, source));
            next += 1;
        }
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }
}

/// Per-project counters, mutated only by the pipeline engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectStatistics {
    /// Requests sent to the provider
    pub total_requests: u64,
    /// Requests that ended in a transport, timeout or protocol failure
    pub error_requests: u64,
    /// Items to translate, excluded items not counted
    pub total_line: u64,
    /// Items translated so far
    pub line: u64,
    /// Tokens estimated before sending
    pub estimated_tokens: u64,
    /// Prompt tokens reported by the provider
    pub prompt_tokens: u64,
    /// Completion tokens reported by the provider
    pub completion_tokens: u64,
    /// Job start, unix milliseconds
    pub start_time_ms: Option<i64>,
    /// Accumulated wall-clock seconds across runs
    pub elapsed_secs: f64,
}

impl ProjectStatistics {
    /// Total tokens reported by the provider
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Tokens per minute over the accumulated elapsed time
    pub fn tokens_per_minute(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.total_tokens() as f64 / (self.elapsed_secs / 60.0)
        } else {
            0.0
        }
    }
}

/// The whole job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,

    /// Format family tag of the source files
    #[serde(default)]
    pub project_type: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub statistics: ProjectStatistics,

    /// Detected text encoding of the sources
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Line-ending style of the sources
    #[serde(default = "default_line_ending")]
    pub line_ending: String,

    /// Files in insertion order
    #[serde(default)]
    pub files: Vec<ProjectFile>,
}

impl Project {
    /// Create an empty project with a fresh id.
    pub fn new(name: impl Into<String>, project_type: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_type: project_type.into(),
            name: name.into(),
            statistics: ProjectStatistics::default(),
            encoding: default_encoding(),
            line_ending: default_line_ending(),
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, file: ProjectFile) -> Self {
        self.files.push(file);
        self
    }

    /// Iterate all items of all files in order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.files.iter().flat_map(|f| f.items.iter())
    }
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_line_ending() -> String {
    "\n".to_string()
}
