/*!
 * Error types for the transkit pipeline.
 *
 * This module contains custom error types for the different layers of the
 * pipeline, using the thiserror crate for ergonomic error definitions.
 * Per-chunk failures (transport, protocol) are recovered by the engine;
 * only `ConfigError` is fatal at job start.
 */

use thiserror::Error;

/// Errors that can occur when talking to a provider API
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The provider answered but without usable content
    #[error("Empty response from provider")]
    EmptyResponse,
}

/// Errors raised while decoding a model response into per-unit results.
///
/// Any of these rejects the whole chunk; nothing is partially applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No opening container marker in the response
    #[error("Response has no opening container marker")]
    MissingContainer,

    /// Opening marker present but never closed
    #[error("Response container is not terminated")]
    UnterminatedContainer,

    /// Decoded entry count differs from the encoded unit count
    #[error("Expected {expected} entries, decoded {actual}")]
    EntryCountMismatch { expected: usize, actual: usize },

    /// An entry number too large to be a batch position
    #[error("Entry number '{0}' is out of range")]
    InvalidEntryNumber(String),

    /// A position number of the batch has no entry
    #[error("Entry {0} is missing from the response")]
    MissingEntry(usize),

    /// The same position number appears twice
    #[error("Entry {0} appears more than once")]
    DuplicateEntry(usize),

    /// A multi-line entry does not carry exactly the expected physical lines
    #[error("Entry {position}: expected {expected} lines, got {actual}")]
    LineCountMismatch {
        position: usize,
        expected: usize,
        actual: usize,
    },

    /// A line inside a bracketed entry is malformed or points at another entry
    #[error("Entry {position}: malformed line '{line}'")]
    MalformedLine { position: usize, line: String },

    /// A bracketed entry was opened but never closed
    #[error("Entry {0}: bracketed list is not closed")]
    UnclosedList(usize),
}

/// Errors raised by the progress store
#[derive(Error, Debug)]
pub enum StoreError {
    /// No file with the given path in the project
    #[error("Unknown file: {0}")]
    UnknownFile(String),

    /// No item with the given index in the file
    #[error("Unknown item {index} in file {path}")]
    UnknownItem { path: String, index: u64 },

    /// The project violates a structural invariant
    #[error("Invalid project: {0}")]
    InvalidProject(String),

    /// A status change that is not allowed by the item lifecycle
    #[error("Illegal status transition for item {index} in {path}: {from} -> {to}")]
    InvalidTransition {
        path: String,
        index: u64,
        from: String,
        to: String,
    },

    /// Snapshot schema that this build cannot read
    #[error("Unsupported snapshot schema version {0}")]
    UnsupportedSchema(u64),

    /// Snapshot (de)serialization failure
    #[error("Snapshot format error: {0}")]
    Format(#[from] serde_json::Error),

    /// Filesystem failure while loading or saving
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal configuration problems detected before a job starts
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Language code that cannot be resolved
    #[error("Invalid language code: {0}")]
    InvalidLanguage(String),

    /// Remote provider without credentials
    #[error("API key is required for provider {0}")]
    MissingApiKey(String),

    /// Chunking parameters that cannot produce chunks
    #[error("Invalid chunking parameters: {0}")]
    InvalidChunking(String),

    /// Any other out-of-range value
    #[error("Invalid setting {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error decoding a response
    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    /// Error from the progress store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Fatal configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}
