use shaderprep::PreprocessError;
use thiserror::Error;

use crate::probe::ProbeError;
use crate::types::EffectId;

/// Errors raised by the pipeline and its GPU bookkeeping.
///
/// A shader that has not finished loading is not an error; see
/// [`crate::RenderOutcome::SoftFault`].
#[derive(Debug, Error)]
pub enum CompositorError {
    /// Malformed directives in shader source.
    #[error("shader `{shader}` failed to preprocess: {source}")]
    Preprocess {
        shader: String,
        #[source]
        source: PreprocessError,
    },

    #[error("shader `{shader}` failed to compile: {message}")]
    ShaderCompile { shader: String, message: String },

    #[error("shader `{shader}` failed to load: {message}")]
    ShaderLoad { shader: String, message: String },

    /// A handle was used after destruction, never created, or freed twice.
    #[error("resource invariant violated: {0}")]
    ResourceInvariant(String),

    /// A cache entry claimed to be valid but holds no output.
    #[error("cache entry for {0} holds no output")]
    CacheInvariant(EffectId),

    #[error("no effect with id {0} in the stack")]
    UnknownEffect(EffectId),

    #[error("no effect type named `{0}` is registered")]
    UnknownEffectType(String),

    #[error("pipeline has no source image")]
    NoSource,

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("gpu device error: {0}")]
    Device(String),

    #[error("effect {effect} failed: {source:#}")]
    Effect {
        effect: EffectId,
        #[source]
        source: anyhow::Error,
    },
}

impl CompositorError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        CompositorError::ResourceInvariant(message.into())
    }
}
