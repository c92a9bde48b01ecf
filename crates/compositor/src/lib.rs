//! Effect-stack compositor.
//!
//! A [`Pipeline`] threads a source image through an ordered stack of CPU and
//! GPU effects, caching each effect's output under a rolling hash of
//! everything upstream of it. GPU work goes through the [`GpuDevice`] trait;
//! shader source is preprocessed by `shaderprep` before compilation.
pub mod effect;
pub mod effects;
pub mod error;
pub mod fingerprint;
pub mod gpu;
pub mod param;
pub mod pipeline;
pub mod probe;
pub mod program;
pub mod resources;
pub mod shaders;
pub mod stack;
pub mod types;

pub use effect::{CpuEffect, EffectKind, EffectRegistry, GpuEffect, InitContext, PassContext};
pub use error::CompositorError;
pub use gpu::{GpuDevice, HeadlessDevice, TextureHandle, UniformValue};
#[cfg(feature = "wgpu")]
pub use gpu::WgpuDevice;
pub use param::{EffectConfig, Modulation, Param, ParamValue, RangeMode, ResolvedParams, Waveform};
pub use pipeline::{FrameOutput, Pipeline};
pub use probe::ProbeError;
pub use program::{ProgramStats, RenderOutcome, UniformSpec};
pub use resources::{Owner, ResourceManager, Role};
pub use shaders::ShaderLibrary;
pub use stack::{EffectInstance, EffectStack};
pub use types::{Domain, EffectId, FrameInfo, FrameStats, Image, PipelineSettings, PixelBuffer};
