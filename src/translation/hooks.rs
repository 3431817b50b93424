/*!
 * Extension hooks.
 *
 * Hooks run at fixed phases of chunk processing and work on a mutable view of
 * the chunk's units; the engine commits whatever they change. A registry is
 * built once at startup and handed to the engine. Hooks run in descending
 * priority, registration order breaking ties, and disabled hooks never run.
 *
 * Built-in hooks:
 * - `BlankLineFilter`: excludes items with nothing to translate
 * - `WhitespacePreserver`: restores the source's outer whitespace
 * - `TruncationCheck`: rejects empty or suspiciously short translations
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::app_config::{Config, HooksConfig};

/// Point in chunk processing where hooks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Before encoding; may exclude units
    PreFilter,
    /// Before encoding; may rewrite the text that is sent
    PreProcess,
    /// After results are applied; may rewrite or reject translations
    PostProcess,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::PreFilter => "pre_filter",
            HookPhase::PreProcess => "pre_process",
            HookPhase::PostProcess => "post_process",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable view of one item while its chunk is processed
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub index: u64,
    pub source_text: String,
    /// Text that will be encoded and sent
    pub request_text: String,
    /// Translation once results are applied
    pub translation: Option<String>,
    /// Set to drop the unit from the job (marks the item Excluded)
    pub excluded: bool,
    /// Set to send the unit back for another round
    pub rejection: Option<String>,
    /// Metadata entries to merge into the item
    pub metadata: Map<String, Value>,
}

impl WorkUnit {
    pub fn new(index: u64, source_text: impl Into<String>) -> Self {
        let source_text = source_text.into();
        Self {
            index,
            request_text: source_text.clone(),
            source_text,
            translation: None,
            excluded: false,
            rejection: None,
            metadata: Map::new(),
        }
    }

    pub fn exclude(&mut self) {
        self.excluded = true;
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.rejection = Some(reason.into());
    }

    /// Still taking part in this chunk
    pub fn is_active(&self) -> bool {
        !self.excluded && self.rejection.is_none()
    }
}

/// What a hook sees when it runs
pub struct HookContext<'a> {
    pub file_path: &'a str,
    pub project_type: &'a str,
    pub config: &'a Config,
    pub units: &'a mut [WorkUnit],
}

/// A named callback attached to one or more phases
pub trait ExtensionHook: Send + Sync {
    fn name(&self) -> &str;

    /// Higher runs first
    fn priority(&self) -> i32 {
        0
    }

    fn enabled(&self) -> bool {
        true
    }

    fn phases(&self) -> &[HookPhase];

    fn run(&self, phase: HookPhase, ctx: &mut HookContext<'_>);
}

/// Ordered set of hooks
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn ExtensionHook>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.hooks.iter().map(|h| h.name())).finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in hooks, switched by `config`
    pub fn with_builtins(config: &HooksConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BlankLineFilter::new(config.blank_line_filter)));
        registry.register(Arc::new(WhitespacePreserver::new(config.whitespace_preserver)));
        registry.register(Arc::new(TruncationCheck::new(config.truncation_check)));
        registry
    }

    pub fn register(&mut self, hook: Arc<dyn ExtensionHook>) {
        self.hooks.push(hook);
        // stable sort keeps registration order among equal priorities
        self.hooks.sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Names of the enabled hooks for a phase, in run order
    pub fn names_for(&self, phase: HookPhase) -> Vec<String> {
        self.active(phase).map(|h| h.name().to_string()).collect()
    }

    fn active(&self, phase: HookPhase) -> impl Iterator<Item = &Arc<dyn ExtensionHook>> {
        self.hooks
            .iter()
            .filter(move |h| h.enabled() && h.phases().contains(&phase))
    }

    /// Run every enabled hook registered for `phase`
    pub fn run(&self, phase: HookPhase, ctx: &mut HookContext<'_>) {
        for hook in self.active(phase) {
            log::trace!("Running hook {} ({})", hook.name(), phase);
            hook.run(phase, ctx);
        }
    }
}

/// Whitespace, digits and punctuation only
static BLANK_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s\p{N}\p{P}[:punct:]]*$").unwrap());

/// Excludes items whose source is empty, whitespace, digits or punctuation
#[derive(Debug)]
pub struct BlankLineFilter {
    enabled: bool,
}

impl BlankLineFilter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_blank(text: &str) -> bool {
        BLANK_REGEX.is_match(text)
    }
}

impl ExtensionHook for BlankLineFilter {
    fn name(&self) -> &str {
        "blank_line_filter"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn phases(&self) -> &[HookPhase] {
        &[HookPhase::PreFilter]
    }

    fn run(&self, _phase: HookPhase, ctx: &mut HookContext<'_>) {
        for unit in ctx.units.iter_mut().filter(|u| Self::is_blank(&u.source_text)) {
            unit.exclude();
        }
    }
}

/// Re-applies the source's leading and trailing whitespace to translations
#[derive(Debug)]
pub struct WhitespacePreserver {
    enabled: bool,
}

impl WhitespacePreserver {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl ExtensionHook for WhitespacePreserver {
    fn name(&self) -> &str {
        "whitespace_preserver"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn phases(&self) -> &[HookPhase] {
        &[HookPhase::PostProcess]
    }

    fn run(&self, _phase: HookPhase, ctx: &mut HookContext<'_>) {
        for unit in ctx.units.iter_mut().filter(|u| u.is_active()) {
            let Some(translation) = unit.translation.as_ref() else {
                continue;
            };
            let source = unit.source_text.as_str();
            let trimmed = source.trim();
            if trimmed.is_empty() || trimmed.len() == source.len() {
                continue;
            }

            let leading = &source[..source.len() - source.trim_start().len()];
            let trailing = &source[source.trim_end().len()..];
            let restored = format!("{}{}{}", leading, translation.trim(), trailing);

            if !leading.is_empty() {
                unit.metadata.insert("leading_whitespace".to_string(), Value::from(leading));
            }
            if !trailing.is_empty() {
                unit.metadata.insert("trailing_whitespace".to_string(), Value::from(trailing));
            }
            unit.translation = Some(restored);
        }
    }
}

/// Rejects empty translations and ones far shorter than a long source
#[derive(Debug)]
pub struct TruncationCheck {
    enabled: bool,
    /// Sources at least this many characters long are length-checked
    pub min_source_chars: usize,
    /// Smallest accepted translation/source length ratio
    pub min_ratio: f64,
}

impl TruncationCheck {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            min_source_chars: 100,
            min_ratio: 0.3,
        }
    }

    /// Reason to reject `translation`, if any
    pub fn verdict(&self, source: &str, translation: &str) -> Option<String> {
        if translation.trim().is_empty() {
            return Some("empty translation".to_string());
        }
        let source_chars = source.trim().chars().count();
        let translated_chars = translation.trim().chars().count();
        if source_chars > self.min_source_chars && (translated_chars as f64) < source_chars as f64 * self.min_ratio {
            return Some(format!(
                "translation too short ({} chars for {} source chars)",
                translated_chars, source_chars
            ));
        }
        None
    }
}

impl ExtensionHook for TruncationCheck {
    fn name(&self) -> &str {
        "truncation_check"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn phases(&self) -> &[HookPhase] {
        &[HookPhase::PostProcess]
    }

    fn run(&self, _phase: HookPhase, ctx: &mut HookContext<'_>) {
        for unit in ctx.units.iter_mut().filter(|u| u.is_active()) {
            let verdict = unit
                .translation
                .as_deref()
                .and_then(|t| self.verdict(&unit.source_text, t));
            if let Some(reason) = verdict {
                unit.reject(reason);
            }
        }
    }
}
