//! Shader source handling for the compositor: a small C-style preprocessor,
//! the immutable include table it reads from, and the manifest-driven loader
//! that fetches shader text off the render thread.
mod defines;
mod expr;
mod fragments;
mod loader;
mod manifest;
mod preprocess;
mod token;

pub use defines::{DefineSet, DefineValue};
pub use expr::ExprError;
pub use fragments::FragmentTable;
pub use loader::{
    LoadError, LoadedShader, PendingShader, ShaderLoader, ShaderRequest, ShaderResolver,
    ShaderStatus,
};
pub use manifest::{ShaderManifest, MANIFEST_FILE};
pub use preprocess::{preprocess, PreprocessError, Preprocessor};

/// Evaluates an `#if` expression against plain string defines.
pub fn evaluate_condition(
    expression: &str,
    defines: &std::collections::HashMap<String, String>,
) -> Result<bool, ExprError> {
    expr::evaluate(expression, defines)
}
