//! The contract every effect implements, and the registry that builds
//! effects from their type names.
use std::collections::BTreeMap;

use anyhow::Result;
use shaderprep::{DefineSet, ShaderRequest};

use crate::gpu::{GpuDevice, TextureHandle};
use crate::param::ResolvedParams;
use crate::program::{RenderOutcome, UniformSpec};
use crate::resources::ResourceManager;
use crate::shaders::ShaderLibrary;
use crate::types::{EffectId, FrameInfo, PipelineSettings, PixelBuffer};

/// What a GPU effect may touch while it is being created.
pub struct InitContext<'a> {
    pub effect: EffectId,
    pub resources: &'a mut ResourceManager,
    pub shaders: &'a ShaderLibrary,
    pub settings: PipelineSettings,
}

/// What a GPU effect may touch during its pass, before its own draw.
pub struct PassContext<'a> {
    pub effect: EffectId,
    pub device: &'a mut dyn GpuDevice,
    pub resources: &'a mut ResourceManager,
    pub shaders: &'a ShaderLibrary,
    pub frame: FrameInfo,
    pub settings: PipelineSettings,
}

/// A transform over host pixels. The output must match the input size.
pub trait CpuEffect: Send {
    fn name(&self) -> &str;

    fn apply(
        &mut self,
        input: &PixelBuffer,
        params: &ResolvedParams,
        frame: &FrameInfo,
    ) -> Result<PixelBuffer>;

    fn cleanup(&mut self) {}
}

/// A fragment-shader pass. The pipeline owns the compiled program; the
/// effect describes which shader, which defines and which uniforms.
pub trait GpuEffect: Send {
    fn name(&self) -> &str;

    fn shader(&self) -> ShaderRequest;

    /// Called once when the effect joins a pipeline.
    fn init(&mut self, _ctx: &mut InitContext<'_>) -> Result<()> {
        Ok(())
    }

    fn defines(&self, _params: &ResolvedParams) -> DefineSet {
        DefineSet::new()
    }

    /// Runs before the draw whenever the effect is recomputed. Probes and
    /// LUT lookups happen here. Returning `SoftFault` skips the draw.
    fn prepare(
        &mut self,
        _ctx: &mut PassContext<'_>,
        _input: TextureHandle,
        _params: &ResolvedParams,
    ) -> Result<RenderOutcome> {
        Ok(RenderOutcome::Drawn)
    }

    fn uniforms(&self, params: &ResolvedParams, frame: &FrameInfo) -> UniformSpec;

    /// Called exactly once when the effect leaves the pipeline. Resources
    /// held under the effect's own id are released by the pipeline.
    fn cleanup(&mut self, _resources: &mut ResourceManager) -> Result<()> {
        Ok(())
    }
}

pub enum EffectKind {
    Cpu(Box<dyn CpuEffect>),
    Gpu(Box<dyn GpuEffect>),
}

impl EffectKind {
    pub fn name(&self) -> &str {
        match self {
            EffectKind::Cpu(effect) => effect.name(),
            EffectKind::Gpu(effect) => effect.name(),
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, EffectKind::Gpu(_))
    }
}

type Constructor = Box<dyn Fn() -> EffectKind + Send + Sync>;

/// Effect type name to constructor.
pub struct EffectRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl EffectRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in effect.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        crate::effects::register_builtin(&mut registry);
        registry
    }

    /// Adds or replaces the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> EffectKind + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn create(&self, name: &str) -> Option<EffectKind> {
        self.constructors.get(name).map(|constructor| constructor())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
