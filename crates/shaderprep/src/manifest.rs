//! Shader manifest: maps logical shader paths (what effects ask for, e.g.
//! `includes/colorconvert.glsl`) to the physical file names produced by the
//! asset build. Stored as a flat JSON object.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::loader::LoadError;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ShaderManifest {
    entries: BTreeMap<String, String>,
}

impl ShaderManifest {
    pub fn from_json_str(raw: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn resolve(&self, logical: &str) -> Option<&str> {
        self.entries.get(logical).map(String::as_str)
    }

    pub fn physical_path(&self, root: &Path, logical: &str) -> Result<PathBuf, LoadError> {
        self.resolve(logical)
            .map(|physical| root.join(physical))
            .ok_or_else(|| LoadError::NotInManifest(logical.to_string()))
    }

    pub fn logical_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lists manifest entries whose physical file is missing under `root`.
    pub fn validate(&self, root: &Path) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, physical)| !root.join(physical).is_file())
            .map(|(logical, physical)| format!("{logical}: {physical} does not exist"))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for ShaderManifest
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(logical, physical)| (logical.into(), physical.into()))
                .collect(),
        }
    }
}
