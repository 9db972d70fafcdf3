//! Model-facing stages: chat/embedding client, translation, validation, and
//! the batch pipeline that strings them together.

pub mod client;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod translate;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{BackendError, ChatBackend, Message, OllamaClient, OllamaConfig, Role};
pub use pipeline::{Pipeline, PipelineError, RecordOutcome, RunSummary};
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
pub use translate::{DEFAULT_SIG_K, TranslateError, Translator};
pub use validate::{DEFAULT_MED_K, ValidateError, Validator};
