/*!
 * The translation pipeline.
 *
 * - `batch`: chunking of pending items and token estimation
 * - `codec`: the numbered, container-wrapped wire format
 * - `rate_limit`: request and token ceilings shared by all workers
 * - `hooks`: extension points around each chunk
 * - `events`: progress notifications and the job report
 * - `prompts`: turning an encoded chunk into chat messages
 * - `concurrency`: per-provider defaults
 * - `engine`: the worker pool and multi-round retry loop
 */

pub use self::engine::{ChunkState, EngineSettings, PipelineContext, PipelineEngine, StopHandle};
pub use self::events::{EventHub, JobReport, PipelineEvent, PipelineObserver};
pub use self::hooks::{ExtensionHook, HookPhase, HookRegistry};

pub mod batch;
pub mod codec;
pub mod concurrency;
pub mod engine;
pub mod events;
pub mod hooks;
pub mod prompts;
pub mod rate_limit;
