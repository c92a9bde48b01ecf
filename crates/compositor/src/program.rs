//! Per-effect compiled program state.
use std::collections::HashMap;

use shaderprep::{DefineSet, PendingShader, Preprocessor, ShaderStatus};

use crate::error::CompositorError;
use crate::gpu::{GpuDevice, ProgramHandle, TextureHandle, UniformValue, INPUT_UNIT};
use crate::resources::{RenderTarget, ResourceManager};

/// Result of a render attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Drawn,
    /// A dependency is still loading; nothing was drawn this frame.
    SoftFault,
}

/// Uniform values and extra textures for one draw, in upload order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformSpec {
    values: Vec<(String, UniformValue)>,
    textures: Vec<(u32, TextureHandle)>,
}

impl UniformSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: UniformValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: UniformValue) {
        let name = name.into();
        match self.values.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((name, value)),
        }
    }

    /// Binds `texture` at `unit`; unit 0 is reserved for the input image.
    pub fn with_texture(mut self, unit: u32, texture: TextureHandle) -> Self {
        self.textures.push((unit, texture));
        self
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn textures(&self) -> &[(u32, TextureHandle)] {
        &self.textures
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramStats {
    pub compiles: u32,
    pub uniform_uploads: u32,
    pub uniform_skips: u32,
}

/// One compiled program plus the define set it was built with and the last
/// value uploaded to each uniform.
pub struct ProgramRecord {
    label: String,
    shader: PendingShader,
    program: Option<ProgramHandle>,
    defines: Option<DefineSet>,
    uploaded: HashMap<String, UniformValue>,
    stats: ProgramStats,
}

impl ProgramRecord {
    pub fn new(label: impl Into<String>, shader: PendingShader) -> Self {
        Self {
            label: label.into(),
            shader,
            program: None,
            defines: None,
            uploaded: HashMap::new(),
            stats: ProgramStats::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn program(&self) -> Option<ProgramHandle> {
        self.program
    }

    pub fn defines(&self) -> Option<&DefineSet> {
        self.defines.as_ref()
    }

    pub fn stats(&self) -> ProgramStats {
        self.stats
    }

    /// Binds `input` at unit 0 and draws once into `target`.
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        resources: &mut ResourceManager,
        input: TextureHandle,
        target: &RenderTarget,
        uniforms: &UniformSpec,
        defines: &DefineSet,
    ) -> Result<RenderOutcome, CompositorError> {
        let Some(program) = self.ensure_program(device, resources, defines)? else {
            return Ok(RenderOutcome::SoftFault);
        };
        resources.check_texture(input)?;
        resources.check_texture(target.texture)?;

        for (name, value) in uniforms.values() {
            if !value.is_block() && self.uploaded.get(name) == Some(value) {
                self.stats.uniform_skips += 1;
                tracing::trace!(program = %self.label, uniform = name, "uniform unchanged");
                continue;
            }
            device.set_uniform(program, name, value)?;
            self.stats.uniform_uploads += 1;
            self.uploaded.insert(name.to_string(), value.clone());
        }

        device.bind_texture(INPUT_UNIT, input)?;
        for (unit, texture) in uniforms.textures() {
            if *unit == INPUT_UNIT {
                return Err(CompositorError::invariant(format!(
                    "{}: unit {INPUT_UNIT} is reserved for the input image",
                    self.label
                )));
            }
            resources.check_texture(*texture)?;
            device.bind_texture(*unit, *texture)?;
        }
        device.draw_fullscreen(program, target.framebuffer)?;
        Ok(RenderOutcome::Drawn)
    }

    /// Compiles when nothing is compiled yet or `defines` changed. `None`
    /// means the shader source is still loading.
    fn ensure_program(
        &mut self,
        device: &mut dyn GpuDevice,
        resources: &mut ResourceManager,
        defines: &DefineSet,
    ) -> Result<Option<ProgramHandle>, CompositorError> {
        if let (Some(program), Some(current)) = (self.program, &self.defines) {
            if current == defines {
                return Ok(Some(program));
            }
        }

        let shader = match self.shader.poll() {
            ShaderStatus::Ready(shader) => shader,
            ShaderStatus::Pending => {
                tracing::debug!(program = %self.label, "shader source not loaded yet");
                return Ok(None);
            }
            ShaderStatus::Failed(message) => {
                return Err(CompositorError::ShaderLoad {
                    shader: self.label.clone(),
                    message,
                })
            }
        };

        let source = Preprocessor::new(&shader.fragments)
            .preprocess(&shader.source, defines)
            .map_err(|source| CompositorError::Preprocess {
                shader: self.label.clone(),
                source,
            })?;
        let program = device.compile_program(&self.label, &source)?;
        if let Some(stale) = self.program.replace(program) {
            resources.retire_program(stale)?;
        }
        self.defines = Some(defines.clone());
        self.uploaded.clear();
        self.stats.compiles += 1;
        tracing::debug!(
            program = %self.label,
            compiles = self.stats.compiles,
            defines = defines.len(),
            "compiled program"
        );
        Ok(Some(program))
    }

    /// Queues the compiled program for destruction.
    pub fn release(&mut self, resources: &mut ResourceManager) -> Result<(), CompositorError> {
        if let Some(program) = self.program.take() {
            resources.retire_program(program)?;
        }
        self.defines = None;
        self.uploaded.clear();
        Ok(())
    }
}
