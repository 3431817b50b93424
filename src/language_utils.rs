//! Language code helpers used by configuration validation and prompts.
//!
//! Accepts ISO 639-1 (2-letter) and ISO 639-2/T or /B (3-letter) codes.

use isolang::Language;

use crate::errors::ConfigError;

/// ISO 639-2/B codes that differ from their /T counterpart
const PART2B_TO_PART2T: &[(&str, &str)] = &[
    ("fre", "fra"),
    ("ger", "deu"),
    ("dut", "nld"),
    ("gre", "ell"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("ice", "isl"),
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("per", "fas"),
    ("geo", "kat"),
    ("may", "msa"),
    ("mac", "mkd"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("wel", "cym"),
];

fn resolve(code: &str) -> Option<Language> {
    let normalized = code.trim().to_lowercase();
    match normalized.len() {
        2 => Language::from_639_1(&normalized),
        3 => {
            let part2t = PART2B_TO_PART2T
                .iter()
                .find(|(b, _)| *b == normalized)
                .map(|(_, t)| *t)
                .unwrap_or(&normalized);
            Language::from_639_3(part2t)
        }
        _ => None,
    }
}

/// Normalize a language code to ISO 639-2/T (3-letter) format
pub fn normalize_to_part2t(code: &str) -> Result<String, ConfigError> {
    resolve(code)
        .map(|lang| lang.to_639_3().to_string())
        .ok_or_else(|| ConfigError::InvalidLanguage(code.to_string()))
}

/// Check if two language codes represent the same language
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (resolve(code1), resolve(code2)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// English name of the language behind a code
pub fn get_language_name(code: &str) -> Result<String, ConfigError> {
    resolve(code)
        .map(|lang| lang.to_name().to_string())
        .ok_or_else(|| ConfigError::InvalidLanguage(code.to_string()))
}
