/*!
 * Chunking of pending items.
 *
 * Pending items are grouped per file into chunks bounded by a line or token
 * budget and a hard character ceiling. Each chunk carries the source text of
 * the few items right before it in the same file as read-only context.
 * Chunk boundaries depend only on store state and limits, so the same input
 * always produces the same chunks.
 */

use serde::{Deserialize, Serialize};

use crate::project::{Item, ItemStatus};
use crate::store::ProgressStore;

/// Default number of units per chunk in lines mode
pub const DEFAULT_LINES_LIMIT: usize = 15;
/// Default token budget per chunk in tokens mode
pub const DEFAULT_TOKENS_LIMIT: usize = 500;
/// Hard ceiling on source characters per chunk
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 6000;
/// Default number of preceding items attached as context
pub const DEFAULT_CONTEXT_LINES: usize = 3;
/// Fixed token cost of one chat message (role, separators)
pub const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

/// Which budget bounds a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LimitMode {
    #[default]
    Lines,
    Tokens,
}

/// Size bounds for chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub mode: LimitMode,
    /// Units per chunk (lines mode)
    pub lines: usize,
    /// Estimated tokens per chunk (tokens mode)
    pub tokens: usize,
    /// Source characters per chunk, whatever the mode
    pub max_chars: usize,
    /// Preceding items attached as context
    pub context_lines: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            mode: LimitMode::Lines,
            lines: DEFAULT_LINES_LIMIT,
            tokens: DEFAULT_TOKENS_LIMIT,
            max_chars: DEFAULT_MAX_CHUNK_CHARS,
            context_lines: DEFAULT_CONTEXT_LINES,
        }
    }
}

impl ChunkLimits {
    /// Limits for a given round; later rounds halve the budget when shrinking.
    pub fn for_round(&self, round: u32, shrink: bool) -> Self {
        if !shrink || round <= 1 {
            return *self;
        }
        let shift = (round - 1).min(usize::BITS - 1);
        Self {
            lines: (self.lines >> shift).max(1),
            tokens: (self.tokens >> shift).max(1),
            ..*self
        }
    }
}

/// A group of items from one file, sent in one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Sequence number within one round
    pub id: usize,
    pub file_path: String,
    pub items: Vec<Item>,
    /// Source text of the items right before the first item, oldest first
    pub context: Vec<String>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn indices(&self) -> Vec<u64> {
        self.items.iter().map(|item| item.index).collect()
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.items.iter().map(|item| estimate_tokens(item.source_text())).sum()
    }
}

fn is_dense_script(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'   // hiragana, katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified
        | '\u{AC00}'..='\u{D7AF}' // hangul syllables
        | '\u{F900}'..='\u{FAFF}' // CJK compatibility
        | '\u{FF00}'..='\u{FFEF}' // fullwidth forms
    )
}

/// Rough token count of a text.
///
/// CJK, kana and hangul characters count one token each; everything else
/// counts one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let (dense, other) = text.chars().fold((0u64, 0u64), |(dense, other), c| {
        if is_dense_script(c) {
            (dense + 1, other)
        } else {
            (dense, other + 1)
        }
    });
    dense + other.div_ceil(4)
}

/// Estimated tokens for a whole request made of the given message bodies.
pub fn estimate_request_tokens<'a>(messages: impl IntoIterator<Item = &'a str>) -> u64 {
    messages
        .into_iter()
        .map(|text| estimate_tokens(text) + MESSAGE_OVERHEAD_TOKENS)
        .sum()
}

struct ChunkBuilder<'a> {
    limits: &'a ChunkLimits,
    items: Vec<Item>,
    tokens: usize,
    chars: usize,
}

impl<'a> ChunkBuilder<'a> {
    fn new(limits: &'a ChunkLimits) -> Self {
        Self {
            limits,
            items: Vec::new(),
            tokens: 0,
            chars: 0,
        }
    }

    fn fits(&self, tokens: usize, chars: usize) -> bool {
        if self.items.is_empty() {
            return true;
        }
        if self.chars + chars > self.limits.max_chars {
            return false;
        }
        match self.limits.mode {
            LimitMode::Lines => self.items.len() < self.limits.lines,
            LimitMode::Tokens => self.tokens + tokens <= self.limits.tokens,
        }
    }

    fn push(&mut self, item: Item, tokens: usize, chars: usize) {
        self.items.push(item);
        self.tokens += tokens;
        self.chars += chars;
    }

    /// Close the current chunk, if any, and append it to `chunks`.
    fn flush(&mut self, file_path: &str, file_items: &[Item], first_position: usize, chunks: &mut Vec<Chunk>) {
        if self.items.is_empty() {
            return;
        }
        self.tokens = 0;
        self.chars = 0;
        chunks.push(Chunk {
            id: chunks.len(),
            file_path: file_path.to_string(),
            items: std::mem::take(&mut self.items),
            context: context_before(file_items, first_position, self.limits.context_lines),
        });
    }
}

/// Context for a chunk whose first item sits at `position` in `items`.
fn context_before(items: &[Item], position: usize, depth: usize) -> Vec<String> {
    let mut context: Vec<String> = items[..position]
        .iter()
        .rev()
        .filter(|item| item.status != ItemStatus::Excluded)
        .take(depth)
        .map(|item| item.source_text().to_string())
        .collect();
    context.reverse();
    context
}

/// Split one file's untranslated items into chunks, numbered from `first_id`.
pub fn chunk_file(file_path: &str, items: &[Item], limits: &ChunkLimits, first_id: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut builder = ChunkBuilder::new(limits);
    let mut first_position = 0;

    for (position, item) in items.iter().enumerate() {
        if item.status != ItemStatus::Untranslated {
            continue;
        }
        let chars = item.source_text().chars().count();
        let tokens = estimate_tokens(item.source_text()) as usize;

        // oversized items travel alone
        if chars > limits.max_chars {
            builder.flush(file_path, items, first_position, &mut chunks);
            builder.push(item.clone(), tokens, chars);
            builder.flush(file_path, items, position, &mut chunks);
            continue;
        }

        if !builder.fits(tokens, chars) {
            builder.flush(file_path, items, first_position, &mut chunks);
        }
        if builder.items.is_empty() {
            first_position = position;
        }
        builder.push(item.clone(), tokens, chars);
    }
    builder.flush(file_path, items, first_position, &mut chunks);

    for chunk in &mut chunks {
        chunk.id += first_id;
    }
    chunks
}

/// Chunk every untranslated item of the store, file by file in store order.
pub fn build_chunks(store: &ProgressStore, limits: &ChunkLimits) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for path in store.file_paths() {
        let Ok(items) = store.file_items(&path) else {
            continue;
        };
        let file_chunks = chunk_file(&path, &items, limits, chunks.len());
        chunks.extend(file_chunks);
    }
    chunks
}
