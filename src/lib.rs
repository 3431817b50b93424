/*!
 * # transkit
 *
 * A concurrent translation pipeline for large bodies of text (game assets,
 * documents, subtitles).
 *
 * Items are grouped into bounded chunks, sent to a text-generation provider
 * under request and token ceilings, checked, and retried over several rounds.
 * Progress lives in a thread-safe store that is flushed to disk periodically,
 * so long jobs survive interruption.
 *
 * ## Architecture
 *
 * - `project`: the project, file and item data model
 * - `store`: the thread-safe progress store, snapshots and autosave
 * - `translation`: the pipeline:
 *   - `translation::batch`: chunking and token estimation
 *   - `translation::codec`: the wire format sent to and parsed from models
 *   - `translation::rate_limit`: the shared rate governor
 *   - `translation::hooks`: extension hooks and the built-in ones
 *   - `translation::engine`: the worker pool and retry rounds
 * - `providers`: the request interface and its clients:
 *   - `providers::ollama`: Ollama API client
 *   - `providers::openai`: OpenAI-compatible API client
 *   - `providers::anthropic`: Anthropic API client
 *   - `providers::mock`: scripted client for tests
 * - `app_config`: configuration
 * - `app_controller`: the job driver used by the CLI
 * - `language_utils`: ISO language code utilities
 * - `errors`: error types
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

pub mod app_config;
pub mod app_controller;
pub mod errors;
pub mod language_utils;
pub mod project;
pub mod providers;
pub mod store;
pub mod translation;

pub use app_config::Config;
pub use errors::{AppError, CodecError, ConfigError, ProviderError, StoreError};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
pub use project::{Item, ItemStatus, Project, ProjectFile, ProjectStatistics};
pub use store::ProgressStore;
pub use translation::{JobReport, PipelineContext, PipelineEngine, StopHandle};
