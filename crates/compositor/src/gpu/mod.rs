//! GPU device abstraction.
//!
//! The pipeline talks to the GPU only through [`GpuDevice`], which models the
//! small GL-style surface the compositor needs: textures, framebuffers bound
//! to a colour texture, programs compiled from preprocessed fragment source,
//! named uniforms, texture units, and a single full-screen draw.
//!
//! Two devices exist: [`HeadlessDevice`] keeps everything in host memory and
//! is what the tests run against; [`WgpuDevice`] (feature `wgpu`) drives a real
//! adapter.
mod compile;
mod headless;
#[cfg(feature = "wgpu")]
mod wgpu_device;

use std::fmt;

pub use compile::{wrap_fragment, UniformLayout, WrappedFragment};
pub use headless::HeadlessDevice;
#[cfg(feature = "wgpu")]
pub use wgpu_device::WgpuDevice;

use crate::error::CompositorError;
use crate::types::PixelBuffer;

/// Texture unit the effect input is always bound to.
pub const INPUT_UNIT: u32 = 0;

macro_rules! handle {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle!(TextureHandle, "tex#");
handle!(FramebufferHandle, "fbo#");
handle!(ProgramHandle, "prog#");

/// A value uploaded to a named uniform.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    FloatArray(Vec<f32>),
    Vec4Array(Vec<[f32; 4]>),
    /// Raw std140 contents of a uniform block, addressed by block name.
    Block(Vec<f32>),
}

impl UniformValue {
    /// Blocks carry bulk data and are uploaded on every render.
    pub fn is_block(&self) -> bool {
        matches!(self, UniformValue::Block(_))
    }
}

/// Running totals kept by a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub textures_created: u64,
    pub textures_deleted: u64,
    pub texture_uploads: u64,
    pub texture_readbacks: u64,
    pub framebuffers_created: u64,
    pub framebuffers_deleted: u64,
    pub programs_compiled: u64,
    pub programs_deleted: u64,
    pub uniform_uploads: u64,
    pub draws: u64,
    pub submits: u64,
}

impl DeviceStats {
    pub fn live_textures(&self) -> u64 {
        self.textures_created - self.textures_deleted
    }

    pub fn live_framebuffers(&self) -> u64 {
        self.framebuffers_created - self.framebuffers_deleted
    }

    pub fn live_programs(&self) -> u64 {
        self.programs_compiled - self.programs_deleted
    }
}

pub trait GpuDevice {
    fn backend_name(&self) -> &'static str;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, CompositorError>;
    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        pixels: &PixelBuffer,
    ) -> Result<(), CompositorError>;
    fn read_texture(&mut self, texture: TextureHandle) -> Result<PixelBuffer, CompositorError>;
    fn texture_size(&self, texture: TextureHandle) -> Result<(u32, u32), CompositorError>;
    fn delete_texture(&mut self, texture: TextureHandle) -> Result<(), CompositorError>;

    fn create_framebuffer(
        &mut self,
        color: TextureHandle,
    ) -> Result<FramebufferHandle, CompositorError>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) -> Result<(), CompositorError>;

    /// Compiles already-preprocessed fragment source.
    fn compile_program(
        &mut self,
        label: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle, CompositorError>;
    fn delete_program(&mut self, program: ProgramHandle) -> Result<(), CompositorError>;

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: &UniformValue,
    ) -> Result<(), CompositorError>;
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) -> Result<(), CompositorError>;

    /// One full-screen draw of `program` into `target`.
    fn draw_fullscreen(
        &mut self,
        program: ProgramHandle,
        target: FramebufferHandle,
    ) -> Result<(), CompositorError>;

    /// Flushes recorded work and waits for it to finish.
    fn submit(&mut self) -> Result<(), CompositorError>;

    fn stats(&self) -> DeviceStats;
}
