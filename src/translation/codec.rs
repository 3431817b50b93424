/*!
 * Wire protocol between the pipeline and the model.
 *
 * A chunk is sent as numbered entries inside one `<textarea>` block:
 *
 * ```text
 * <textarea>
 * 1.Hello
 * 2.[
 * "2.2.,first line",
 * "2.1.,second line"
 * ]
 * </textarea>
 * ```
 *
 * Single-line units are written as `n.text`. Units spanning several lines (or
 * carrying leading/trailing whitespace that a plain entry would lose) are
 * written as a bracketed list whose lines are tagged `n.k.,` where `k` counts
 * from the bottom, so the decoder knows exactly how many lines to expect and
 * in which order to rejoin them.
 *
 * Unit text that contains a container marker is escaped before sending
 * (`&` becomes `&amp;`, the marker's `<` becomes `&lt;`) and unescaped after
 * decoding, so it cannot close the block early.
 *
 * Decoding is all-or-nothing: any structural problem rejects the whole chunk.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

use crate::errors::CodecError;

pub const CONTAINER_OPEN: &str = "<textarea>";
pub const CONTAINER_CLOSE: &str = "</textarea>";

static CONTAINER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<textarea[^>]*>(.*?)</textarea>").unwrap());

static OPEN_MARKER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<textarea[^>]*>").unwrap());

static MARKER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(/?textarea)").unwrap());

static ESCAPE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"&(lt|amp);").unwrap());

/// Start of a numbered entry: `1.`, `1)`, `1、`, `1:` with optional spacing
static ENTRY_START_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*[.)、:]").unwrap());

/// Tagged line inside a bracketed entry, quotes already removed
static TAGGED_LINE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\.(\d+)\.,(.*)$").unwrap());

/// How a unit was written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitForm {
    /// Number of physical lines in the source
    pub lines: usize,
    /// Whether the unit was sent as a bracketed list
    pub bracketed: bool,
    /// Whether marker text in the unit was escaped
    pub escaped: bool,
}

/// A chunk encoded for sending, remembering the shape of every unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    payload: String,
    forms: Vec<UnitForm>,
}

impl EncodedBatch {
    /// The wire text, container markers included
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn forms(&self) -> &[UnitForm] {
        &self.forms
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// Decode a model response against this batch.
    pub fn decode(&self, response: &str) -> Result<DecodedBatch, CodecError> {
        decode(response, &self.forms)
    }
}

/// Per-unit results of a successful decode, in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBatch {
    texts: Vec<String>,
}

impl DecodedBatch {
    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn into_texts(self) -> Vec<String> {
        self.texts
    }

    /// Results keyed by 0-based position (`"0"`, `"1"`, ...).
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| (i.to_string(), text))
            .collect()
    }
}

/// Defuse container markers in text that is shown to the model but never
/// decoded, such as context lines.
pub fn neutralize_markers(text: &str) -> Cow<'_, str> {
    MARKER_REGEX.replace_all(text, "&lt;$1")
}

fn escape_unit(text: &str) -> String {
    neutralize_markers(&text.replace('&', "&amp;")).into_owned()
}

fn unescape_unit(text: &str) -> String {
    ESCAPE_REGEX
        .replace_all(text, |captures: &regex::Captures<'_>| match &captures[1] {
            "lt" => "<",
            _ => "&",
        })
        .into_owned()
}

fn needs_brackets(text: &str) -> bool {
    text.contains('\n') || text.trim() == "[" || text.trim() != text
}

/// Encode unit texts into the wire format.
pub fn encode<S: AsRef<str>>(texts: &[S]) -> EncodedBatch {
    let mut body = Vec::with_capacity(texts.len());
    let mut forms = Vec::with_capacity(texts.len());

    for (i, text) in texts.iter().enumerate() {
        let position = i + 1;
        let escaped = MARKER_REGEX.is_match(text.as_ref());
        let text: Cow<'_, str> = if escaped {
            Cow::Owned(escape_unit(text.as_ref()))
        } else {
            Cow::Borrowed(text.as_ref())
        };

        if needs_brackets(&text) {
            let lines: Vec<&str> = text.split('\n').collect();
            let total = lines.len();
            let tagged: Vec<String> = lines
                .iter()
                .enumerate()
                .map(|(line_index, line)| format!("\"{}.{}.,{}\"", position, total - line_index, line))
                .collect();
            body.push(format!("{}.[\n{}\n]", position, tagged.join(",\n")));
            forms.push(UnitForm {
                lines: total,
                bracketed: true,
                escaped,
            });
        } else {
            body.push(format!("{}.{}", position, text));
            forms.push(UnitForm {
                lines: 1,
                bracketed: false,
                escaped,
            });
        }
    }

    EncodedBatch {
        payload: format!("{}\n{}\n{}", CONTAINER_OPEN, body.join("\n"), CONTAINER_CLOSE),
        forms,
    }
}

/// Extract the body of the last complete container block.
fn container_body(response: &str) -> Result<&str, CodecError> {
    match CONTAINER_REGEX.captures_iter(response).last() {
        Some(captures) => Ok(captures.get(1).map_or("", |m| m.as_str())),
        None if OPEN_MARKER_REGEX.is_match(response) => Err(CodecError::UnterminatedContainer),
        None => Err(CodecError::MissingContainer),
    }
}

enum RawEntry {
    Plain(Vec<String>),
    Bracketed(Vec<String>),
}

/// Split the container body into numbered entries, in order of appearance.
fn split_entries(body: &str) -> Result<Vec<(usize, RawEntry)>, CodecError> {
    let mut entries: Vec<(usize, RawEntry)> = Vec::new();
    let mut open_list: Option<(usize, Vec<String>)> = None;

    for raw_line in body.split('\n') {
        let line = raw_line.trim_end_matches('\r');

        if let Some((position, mut lines)) = open_list.take() {
            if line.trim() == "]" {
                entries.push((position, RawEntry::Bracketed(lines)));
            } else {
                if !line.trim().is_empty() {
                    lines.push(line.to_string());
                }
                open_list = Some((position, lines));
            }
            continue;
        }

        if let Some(captures) = ENTRY_START_REGEX.captures(line) {
            let whole = captures.get(0).map_or(0, |m| m.end());
            let position = captures[1]
                .parse::<usize>()
                .map_err(|_| CodecError::InvalidEntryNumber(captures[1].to_string()))?;
            let rest = &line[whole..];
            if rest.trim() == "[" {
                open_list = Some((position, Vec::new()));
            } else {
                let text = rest.trim_start_matches([' ', '\t']);
                entries.push((position, RawEntry::Plain(vec![text.to_string()])));
            }
            continue;
        }

        match entries.last_mut() {
            Some((_, RawEntry::Plain(lines))) => lines.push(line.to_string()),
            _ if line.trim().is_empty() => {}
            _ => debug!("Ignoring text outside any entry: {}", line),
        }
    }

    if let Some((position, _)) = open_list {
        return Err(CodecError::UnclosedList(position));
    }
    Ok(entries)
}

fn strip_quotes(line: &str) -> &str {
    let line = line.trim();
    let line = line.strip_prefix('"').unwrap_or(line);
    line.strip_suffix("\",")
        .or_else(|| line.strip_suffix('"'))
        .unwrap_or(line)
}

fn join_bracketed(position: usize, expected: usize, lines: Vec<String>) -> Result<String, CodecError> {
    let mut tagged: Vec<(usize, String)> = Vec::with_capacity(lines.len());
    for line in lines {
        let inner = strip_quotes(&line);
        let captures = TAGGED_LINE_REGEX
            .captures(inner)
            .ok_or_else(|| CodecError::MalformedLine {
                position,
                line: line.clone(),
            })?;
        let owner = captures[1].parse::<usize>().ok();
        let from_bottom = captures[2].parse::<usize>().ok();
        match (owner, from_bottom) {
            (Some(owner), Some(k)) if owner == position => {
                tagged.push((k, captures[3].to_string()));
            }
            _ => return Err(CodecError::MalformedLine { position, line }),
        }
    }

    let distinct: HashSet<usize> = tagged.iter().map(|(k, _)| *k).collect();
    let complete = tagged.len() == expected && (1..=expected).all(|k| distinct.contains(&k));
    if !complete {
        return Err(CodecError::LineCountMismatch {
            position,
            expected,
            actual: distinct.len(),
        });
    }

    tagged.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(tagged
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join("\n"))
}

fn join_plain(position: usize, expected: usize, lines: Vec<String>) -> Result<String, CodecError> {
    let text = lines.join("\n");
    let text = text.trim_end().to_string();
    let actual = text.split('\n').count();
    if actual != expected {
        return Err(CodecError::LineCountMismatch {
            position,
            expected,
            actual,
        });
    }
    Ok(text)
}

/// Decode a model response into one text per unit.
///
/// `forms` describes the batch that was sent; see [`EncodedBatch::decode`].
pub fn decode(response: &str, forms: &[UnitForm]) -> Result<DecodedBatch, CodecError> {
    let body = container_body(response)?;
    let entries = split_entries(body)?;

    let mut seen = HashSet::with_capacity(entries.len());
    for (position, _) in &entries {
        if !seen.insert(*position) {
            return Err(CodecError::DuplicateEntry(*position));
        }
    }

    if entries.len() != forms.len() {
        return Err(CodecError::EntryCountMismatch {
            expected: forms.len(),
            actual: entries.len(),
        });
    }

    let mut slots: Vec<Option<RawEntry>> = (0..forms.len()).map(|_| None).collect();
    for (position, entry) in entries {
        if let Some(slot) = position.checked_sub(1).and_then(|i| slots.get_mut(i)) {
            *slot = Some(entry);
        }
    }

    let mut texts = Vec::with_capacity(forms.len());
    for (i, (slot, form)) in slots.into_iter().zip(forms).enumerate() {
        let position = i + 1;
        let text = match slot {
            None => return Err(CodecError::MissingEntry(position)),
            Some(RawEntry::Bracketed(lines)) => join_bracketed(position, form.lines, lines)?,
            Some(RawEntry::Plain(lines)) => join_plain(position, form.lines, lines)?,
        };
        texts.push(if form.escaped { unescape_unit(&text) } else { text });
    }

    Ok(DecodedBatch { texts })
}
