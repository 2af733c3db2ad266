//! Narrative collaborator
//!
//! Narrative steps hand a prompt to an external text generator and relay
//! its output to the caller chunk by chunk. The engine only depends on the
//! `NarrativeGenerator` trait; model selection and transport are the
//! implementor's concern.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by a narrative generator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NarrativeError {
    #[error("narrative generator unavailable: {0}")]
    Unavailable(String),

    #[error("narrative stream interrupted: {0}")]
    Interrupted(String),
}

/// Stream of text chunks
pub type NarrativeStream = BoxStream<'static, Result<String, NarrativeError>>;

/// Input for one narrative generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NarrativePrompt {
    /// Plan instructions plus the current step's description
    pub system: String,
    /// The user's original request
    pub user: String,
    /// JSON rendering of earlier step outputs, when there are any
    pub context: Option<String>,
    pub session_id: String,
}

/// Produces streamed free text for narrative steps
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, prompt: NarrativePrompt) -> Result<NarrativeStream, NarrativeError>;
}

/// Generator that always reports itself unavailable.
///
/// Used when no text generator is configured; narrative steps then fail with
/// a clear error instead of silently producing nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNarrative;

#[async_trait]
impl NarrativeGenerator for NoNarrative {
    async fn generate(&self, _prompt: NarrativePrompt) -> Result<NarrativeStream, NarrativeError> {
        Err(NarrativeError::Unavailable(
            "no narrative generator configured".to_string(),
        ))
    }
}

/// Turn a fixed list of chunks into a `NarrativeStream`
pub fn chunks<I, S>(items: I) -> NarrativeStream
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let items: Vec<Result<String, NarrativeError>> =
        items.into_iter().map(|s| Ok(s.into())).collect();
    stream::iter(items).boxed()
}
