//! Where effect and probe shader sources come from.
//!
//! The built-in shaders are compiled into the binary; a directory with a
//! `manifest.json` can replace them, in which case sources load on worker
//! threads and early renders soft-fault until they arrive.
use std::path::Path;

use shaderprep::{LoadError, LoadedShader, PendingShader, ShaderLoader, ShaderRequest};

const EMBEDDED: &[(&str, &str)] = &[
    ("probe.frag", include_str!("../shaders/probe.frag")),
    ("tint.frag", include_str!("../shaders/tint.frag")),
    ("auto_levels.frag", include_str!("../shaders/auto_levels.frag")),
    ("palette_map.frag", include_str!("../shaders/palette_map.frag")),
    ("apply_lut.frag", include_str!("../shaders/apply_lut.frag")),
    (
        "includes/colorconvert.glsl",
        include_str!("../shaders/includes/colorconvert.glsl"),
    ),
];

enum Source {
    Embedded,
    Directory(ShaderLoader),
}

pub struct ShaderLibrary {
    source: Source,
}

impl ShaderLibrary {
    pub fn embedded() -> Self {
        Self {
            source: Source::Embedded,
        }
    }

    /// Loads from `dir/manifest.json`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LoadError> {
        Ok(Self::from_loader(ShaderLoader::open(dir)?))
    }

    pub fn from_loader(loader: ShaderLoader) -> Self {
        Self {
            source: Source::Directory(loader),
        }
    }

    pub fn request(&self, request: &ShaderRequest) -> PendingShader {
        match &self.source {
            Source::Embedded => embedded_shader(request),
            Source::Directory(loader) => loader.load(request.clone()),
        }
    }

    /// Logical paths of the built-in shaders.
    pub fn embedded_names() -> impl Iterator<Item = &'static str> {
        EMBEDDED.iter().map(|(name, _)| *name)
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::embedded()
    }
}

fn embedded_source(logical: &str) -> Option<&'static str> {
    EMBEDDED
        .iter()
        .find(|(name, _)| *name == logical)
        .map(|(_, source)| *source)
}

fn embedded_shader(request: &ShaderRequest) -> PendingShader {
    let Some(source) = embedded_source(&request.fragment) else {
        return PendingShader::failed(
            request.fragment.clone(),
            format!("`{}` is not a built-in shader", request.fragment),
        );
    };
    let mut fragments = Vec::with_capacity(request.includes.len());
    for (name, logical) in &request.includes {
        match embedded_source(logical) {
            Some(text) => fragments.push((name.clone(), text)),
            None => {
                return PendingShader::failed(
                    request.fragment.clone(),
                    format!("include `{logical}` is not a built-in shader"),
                )
            }
        }
    }
    PendingShader::ready(LoadedShader::new(
        request.fragment.clone(),
        source,
        fragments.into_iter().collect(),
    ))
}

#[cfg(test)]
mod tests {
    use shaderprep::ShaderStatus;

    use super::*;

    #[test]
    fn embedded_shaders_resolve_with_includes() {
        let library = ShaderLibrary::embedded();
        let request =
            ShaderRequest::new("palette_map.frag").with_include("colorconvert.glsl", "includes/colorconvert.glsl");
        match library.request(&request).poll() {
            ShaderStatus::Ready(shader) => {
                assert!(shader.fragments.contains("colorconvert.glsl"));
                assert!(shader.source.contains("#include \"colorconvert.glsl\""));
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn unknown_names_fail() {
        let library = ShaderLibrary::embedded();
        assert!(matches!(
            library.request(&ShaderRequest::new("missing.frag")).poll(),
            ShaderStatus::Failed(_)
        ));
    }

    #[test]
    fn manifest_lists_every_embedded_shader() {
        let manifest = shaderprep::ShaderManifest::from_json_str(include_str!("../shaders/manifest.json")).unwrap();
        for name in ShaderLibrary::embedded_names() {
            assert!(manifest.resolve(name).is_some(), "{name} missing from manifest");
        }
    }
}
