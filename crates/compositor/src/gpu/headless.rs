//! Host-memory reference device.
//!
//! Every draw samples the unit-0 texture into the target with nearest
//! filtering, so GPU effects behave as a resample of their input. Uniform
//! uploads, binds and compiles are recorded so tests can inspect them.
use std::collections::HashMap;

use super::{
    DeviceStats, FramebufferHandle, GpuDevice, ProgramHandle, TextureHandle, UniformValue,
    INPUT_UNIT,
};
use crate::error::CompositorError;
use crate::types::PixelBuffer;

#[derive(Debug)]
struct HeadlessProgram {
    label: String,
    source: String,
    uniforms: HashMap<String, UniformValue>,
}

#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_handle: u32,
    textures: HashMap<TextureHandle, PixelBuffer>,
    framebuffers: HashMap<FramebufferHandle, TextureHandle>,
    programs: HashMap<ProgramHandle, HeadlessProgram>,
    bound: HashMap<u32, TextureHandle>,
    stats: DeviceStats,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn is_live_texture(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture)
    }

    pub fn is_live_framebuffer(&self, framebuffer: FramebufferHandle) -> bool {
        self.framebuffers.contains_key(&framebuffer)
    }

    /// Last value uploaded to `name` on `program`.
    pub fn uniform_value(&self, program: ProgramHandle, name: &str) -> Option<&UniformValue> {
        self.programs.get(&program)?.uniforms.get(name)
    }

    /// Preprocessed source the program was compiled from.
    pub fn program_source(&self, program: ProgramHandle) -> Option<&str> {
        self.programs.get(&program).map(|program| program.source.as_str())
    }

    pub fn program_label(&self, program: ProgramHandle) -> Option<&str> {
        self.programs.get(&program).map(|program| program.label.as_str())
    }

    fn texture(&self, texture: TextureHandle) -> Result<&PixelBuffer, CompositorError> {
        self.textures
            .get(&texture)
            .ok_or_else(|| CompositorError::invariant(format!("{texture} is not a live texture")))
    }
}

impl GpuDevice for HeadlessDevice {
    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, CompositorError> {
        if width == 0 || height == 0 {
            return Err(CompositorError::Device(format!(
                "cannot create a {width}x{height} texture"
            )));
        }
        let handle = TextureHandle(self.issue());
        self.textures.insert(handle, PixelBuffer::new(width, height));
        self.stats.textures_created += 1;
        Ok(handle)
    }

    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        pixels: &PixelBuffer,
    ) -> Result<(), CompositorError> {
        let slot = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| CompositorError::invariant(format!("upload into dead {texture}")))?;
        if (slot.width, slot.height) != (pixels.width, pixels.height) {
            return Err(CompositorError::Device(format!(
                "upload of {}x{} into {texture} sized {}x{}",
                pixels.width, pixels.height, slot.width, slot.height
            )));
        }
        slot.data.copy_from_slice(&pixels.data);
        self.stats.texture_uploads += 1;
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> Result<PixelBuffer, CompositorError> {
        let pixels = self.texture(texture)?.clone();
        self.stats.texture_readbacks += 1;
        Ok(pixels)
    }

    fn texture_size(&self, texture: TextureHandle) -> Result<(u32, u32), CompositorError> {
        let pixels = self.texture(texture)?;
        Ok((pixels.width, pixels.height))
    }

    fn delete_texture(&mut self, texture: TextureHandle) -> Result<(), CompositorError> {
        if self.textures.remove(&texture).is_none() {
            return Err(CompositorError::invariant(format!(
                "{texture} deleted twice or never created"
            )));
        }
        self.bound.retain(|_, bound| *bound != texture);
        self.stats.textures_deleted += 1;
        Ok(())
    }

    fn create_framebuffer(
        &mut self,
        color: TextureHandle,
    ) -> Result<FramebufferHandle, CompositorError> {
        self.texture(color)?;
        let handle = FramebufferHandle(self.issue());
        self.framebuffers.insert(handle, color);
        self.stats.framebuffers_created += 1;
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) -> Result<(), CompositorError> {
        if self.framebuffers.remove(&framebuffer).is_none() {
            return Err(CompositorError::invariant(format!(
                "{framebuffer} deleted twice or never created"
            )));
        }
        self.stats.framebuffers_deleted += 1;
        Ok(())
    }

    fn compile_program(
        &mut self,
        label: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle, CompositorError> {
        let error_line = fragment_source
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("#error"));
        if let Some(line) = error_line {
            return Err(CompositorError::ShaderCompile {
                shader: label.to_string(),
                message: line.trim_start_matches("#error").trim().to_string(),
            });
        }
        if !fragment_source.contains("void main") {
            return Err(CompositorError::ShaderCompile {
                shader: label.to_string(),
                message: "no `void main` entry point".to_string(),
            });
        }
        let handle = ProgramHandle(self.issue());
        self.programs.insert(
            handle,
            HeadlessProgram {
                label: label.to_string(),
                source: fragment_source.to_string(),
                uniforms: HashMap::new(),
            },
        );
        self.stats.programs_compiled += 1;
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) -> Result<(), CompositorError> {
        if self.programs.remove(&program).is_none() {
            return Err(CompositorError::invariant(format!(
                "{program} deleted twice or never compiled"
            )));
        }
        self.stats.programs_deleted += 1;
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: &UniformValue,
    ) -> Result<(), CompositorError> {
        let record = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| CompositorError::invariant(format!("uniform set on dead {program}")))?;
        record.uniforms.insert(name.to_string(), value.clone());
        self.stats.uniform_uploads += 1;
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) -> Result<(), CompositorError> {
        self.texture(texture)?;
        self.bound.insert(unit, texture);
        Ok(())
    }

    fn draw_fullscreen(
        &mut self,
        program: ProgramHandle,
        target: FramebufferHandle,
    ) -> Result<(), CompositorError> {
        if !self.programs.contains_key(&program) {
            return Err(CompositorError::invariant(format!("draw with dead {program}")));
        }
        let color = *self
            .framebuffers
            .get(&target)
            .ok_or_else(|| CompositorError::invariant(format!("draw into dead {target}")))?;
        let input = self
            .bound
            .get(&INPUT_UNIT)
            .copied()
            .ok_or_else(|| CompositorError::invariant("draw with no texture on the input unit"))?;
        if input == color {
            return Err(CompositorError::invariant(format!(
                "{input} is both sampled and rendered to"
            )));
        }
        let source = self.texture(input)?;
        let (width, height) = self.texture_size(color)?;
        let resampled = resample_nearest(source, width, height);
        if let Some(slot) = self.textures.get_mut(&color) {
            *slot = resampled;
        }
        self.stats.draws += 1;
        Ok(())
    }

    fn submit(&mut self) -> Result<(), CompositorError> {
        self.stats.submits += 1;
        Ok(())
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}

fn resample_nearest(source: &PixelBuffer, width: u32, height: u32) -> PixelBuffer {
    if (source.width, source.height) == (width, height) {
        return source.clone();
    }
    let mut out = PixelBuffer::new(width, height);
    for y in 0..height {
        let sy = ((y as u64 * source.height as u64) / height as u64) as u32;
        for x in 0..width {
            let sx = ((x as u64 * source.width as u64) / width as u64) as u32;
            let offset = (y as usize * width as usize + x as usize) * 4;
            out.data[offset..offset + 4].copy_from_slice(&source.pixel(sx, sy));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASS: &str = "void main() {}";

    #[test]
    fn draw_resamples_input_into_target() {
        let mut device = HeadlessDevice::new();
        let input = device.create_texture(2, 2).unwrap();
        let pixels = PixelBuffer::from_raw(
            2,
            2,
            vec![
                1.0, 0.0, 0.0, 1.0, //
                0.0, 1.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, 1.0, //
                1.0, 1.0, 1.0, 1.0,
            ],
        )
        .unwrap();
        device.upload_texture(input, &pixels).unwrap();
        let output = device.create_texture(4, 4).unwrap();
        let target = device.create_framebuffer(output).unwrap();
        let program = device.compile_program("pass", PASS).unwrap();

        device.bind_texture(INPUT_UNIT, input).unwrap();
        device.draw_fullscreen(program, target).unwrap();

        let result = device.read_texture(output).unwrap();
        assert_eq!(result.pixel(0, 0), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(result.pixel(3, 0), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(result.pixel(3, 3), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(device.stats().draws, 1);
    }

    #[test]
    fn double_delete_is_an_invariant_violation() {
        let mut device = HeadlessDevice::new();
        let texture = device.create_texture(1, 1).unwrap();
        device.delete_texture(texture).unwrap();
        let err = device.delete_texture(texture).unwrap_err();
        assert!(matches!(err, CompositorError::ResourceInvariant(_)));
        assert!(device.bind_texture(0, texture).is_err());
    }

    #[test]
    fn error_directive_fails_compilation() {
        let mut device = HeadlessDevice::new();
        let err = device
            .compile_program("broken", "#error palette too large\nvoid main() {}")
            .unwrap_err();
        assert!(err.to_string().contains("palette too large"));
    }

    #[test]
    fn uniforms_are_recorded_per_program() {
        let mut device = HeadlessDevice::new();
        let program = device.compile_program("tint", PASS).unwrap();
        device
            .set_uniform(program, "u_amount", &UniformValue::Float(0.25))
            .unwrap();
        assert_eq!(
            device.uniform_value(program, "u_amount"),
            Some(&UniformValue::Float(0.25))
        );
        assert_eq!(device.stats().uniform_uploads, 1);
    }
}
