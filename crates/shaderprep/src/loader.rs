//! Asynchronous shader loading.
//!
//! Each request (one fragment shader plus the includes it names) is read on a
//! worker thread and handed back through a one-shot channel. Renderers poll the
//! returned [`PendingShader`] every frame and treat `Pending` as a soft fault.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use thiserror::Error;

use crate::fragments::FragmentTable;
use crate::manifest::{ShaderManifest, MANIFEST_FILE};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse shader manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("`{0}` is not listed in the shader manifest")]
    NotInManifest(String),

    #[error("shader load worker disconnected before returning a result")]
    Disconnected,
}

/// What an effect needs loaded before it can compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderRequest {
    /// Logical path of the fragment shader.
    pub fragment: String,
    /// Include name (as written in `#include "..."`) paired with its logical path.
    pub includes: Vec<(String, String)>,
}

impl ShaderRequest {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            includes: Vec::new(),
        }
    }

    pub fn with_include(mut self, name: impl Into<String>, logical: impl Into<String>) -> Self {
        self.includes.push((name.into(), logical.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct LoadedShader {
    pub name: String,
    pub source: String,
    pub fragments: Arc<FragmentTable>,
}

impl LoadedShader {
    pub fn new(name: impl Into<String>, source: impl Into<String>, fragments: FragmentTable) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            fragments: Arc::new(fragments),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ShaderStatus {
    Pending,
    Ready(Arc<LoadedShader>),
    Failed(String),
}

enum PendingState {
    Waiting(Receiver<Result<LoadedShader, LoadError>>),
    Ready(Arc<LoadedShader>),
    Failed(String),
}

/// Sending half of [`PendingShader::deferred`]. Dropping it unresolved fails
/// the pending shader.
pub struct ShaderResolver {
    sender: Sender<Result<LoadedShader, LoadError>>,
}

impl ShaderResolver {
    pub fn resolve(self, shader: LoadedShader) {
        let _ = self.sender.send(Ok(shader));
    }
}

/// One-shot handle for a shader being loaded.
pub struct PendingShader {
    name: String,
    state: PendingState,
}

impl PendingShader {
    /// A handle that is already resolved, for shaders compiled into the binary.
    pub fn ready(shader: LoadedShader) -> Self {
        Self {
            name: shader.name.clone(),
            state: PendingState::Ready(Arc::new(shader)),
        }
    }

    /// A handle completed later through the returned [`ShaderResolver`].
    pub fn deferred(name: impl Into<String>) -> (ShaderResolver, Self) {
        let (sender, receiver) = bounded(1);
        let pending = Self {
            name: name.into(),
            state: PendingState::Waiting(receiver),
        };
        (ShaderResolver { sender }, pending)
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PendingState::Failed(message.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn poll(&mut self) -> ShaderStatus {
        let received = match &self.state {
            PendingState::Ready(shader) => return ShaderStatus::Ready(Arc::clone(shader)),
            PendingState::Failed(message) => return ShaderStatus::Failed(message.clone()),
            PendingState::Waiting(receiver) => match receiver.try_recv() {
                Ok(result) => result,
                Err(TryRecvError::Empty) => return ShaderStatus::Pending,
                Err(TryRecvError::Disconnected) => Err(LoadError::Disconnected),
            },
        };
        self.settle(received)
    }

    /// Blocks until the worker reports back.
    pub fn wait(&mut self) -> ShaderStatus {
        let received = match &self.state {
            PendingState::Ready(shader) => return ShaderStatus::Ready(Arc::clone(shader)),
            PendingState::Failed(message) => return ShaderStatus::Failed(message.clone()),
            PendingState::Waiting(receiver) => receiver.recv().unwrap_or(Err(LoadError::Disconnected)),
        };
        self.settle(received)
    }

    fn settle(&mut self, received: Result<LoadedShader, LoadError>) -> ShaderStatus {
        match received {
            Ok(shader) => {
                tracing::debug!(shader = %self.name, "shader source loaded");
                let shader = Arc::new(shader);
                self.state = PendingState::Ready(Arc::clone(&shader));
                ShaderStatus::Ready(shader)
            }
            Err(error) => {
                let message = error.to_string();
                tracing::warn!(shader = %self.name, %error, "shader load failed");
                self.state = PendingState::Failed(message.clone());
                ShaderStatus::Failed(message)
            }
        }
    }
}

/// Reads shader sources from a directory described by a [`ShaderManifest`].
#[derive(Debug, Clone)]
pub struct ShaderLoader {
    root: PathBuf,
    manifest: Arc<ShaderManifest>,
}

impl ShaderLoader {
    pub fn new(root: impl Into<PathBuf>, manifest: ShaderManifest) -> Self {
        Self {
            root: root.into(),
            manifest: Arc::new(manifest),
        }
    }

    /// Opens `root/manifest.json`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, LoadError> {
        let root = root.as_ref();
        let manifest = ShaderManifest::load(root.join(MANIFEST_FILE))?;
        Ok(Self::new(root, manifest))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &ShaderManifest {
        &self.manifest
    }

    pub fn load_blocking(&self, request: &ShaderRequest) -> Result<LoadedShader, LoadError> {
        let source = self.read_logical(&request.fragment)?;
        let mut fragments = Vec::with_capacity(request.includes.len());
        for (name, logical) in &request.includes {
            fragments.push((name.clone(), self.read_logical(logical)?));
        }
        Ok(LoadedShader::new(
            request.fragment.clone(),
            source,
            fragments.into_iter().collect(),
        ))
    }

    /// Starts loading on a worker thread.
    pub fn load(&self, request: ShaderRequest) -> PendingShader {
        let (sender, receiver) = bounded(1);
        let loader = self.clone();
        let name = request.fragment.clone();
        let spawned = thread::Builder::new()
            .name(format!("shader-load:{name}"))
            .spawn(move || {
                let _ = sender.send(loader.load_blocking(&request));
            });
        match spawned {
            Ok(_) => PendingShader {
                name,
                state: PendingState::Waiting(receiver),
            },
            Err(error) => {
                tracing::warn!(shader = %name, %error, "failed to spawn shader load worker");
                PendingShader::failed(name, error.to_string())
            }
        }
    }

    fn read_logical(&self, logical: &str) -> Result<String, LoadError> {
        let path = self.manifest.physical_path(&self.root, logical)?;
        fs::read_to_string(&path).map_err(|source| LoadError::Io { path, source })
    }
}
