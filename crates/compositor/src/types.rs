use std::fmt;
use std::sync::Arc;

use anyhow::{ensure, Result};
use image::{DynamicImage, Rgba32FImage, RgbaImage};

use crate::gpu::TextureHandle;

/// Stable identity of an effect instance within one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(pub u64);

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fx#{}", self.0)
    }
}

/// RGBA pixels, four `f32` channels per pixel, row-major from the top row.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize * 4],
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        ensure!(
            data.len() == width as usize * height as usize * 4,
            "pixel data has {} floats, expected {} for {width}x{height}",
            data.len(),
            width as usize * height as usize * 4
        );
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Every pixel set to `rgba`.
    pub fn filled(width: u32, height: u32, rgba: [f32; 4]) -> Self {
        let count = width as usize * height as usize;
        let data = rgba.iter().copied().cycle().take(count * 4).collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }

    pub fn pixels(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(4)
    }

    pub fn pixels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.data.chunks_exact_mut(4)
    }

    pub fn from_image(image: &DynamicImage) -> Self {
        let rgba: Rgba32FImage = image.to_rgba32f();
        let (width, height) = rgba.dimensions();
        Self {
            width,
            height,
            data: rgba.into_raw(),
        }
    }

    /// Quantizes to 8-bit RGBA, clamping out-of-range channels.
    pub fn to_rgba8(&self) -> Result<RgbaImage> {
        let bytes = self
            .data
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        RgbaImage::from_raw(self.width, self.height, bytes)
            .ok_or_else(|| anyhow::anyhow!("pixel buffer does not match {}x{}", self.width, self.height))
    }
}

/// The value threaded through the effect stack.
#[derive(Debug, Clone)]
pub enum Image {
    Cpu(Arc<PixelBuffer>),
    Gpu(TextureHandle),
}

impl Image {
    pub fn domain(&self) -> Domain {
        match self {
            Image::Cpu(_) => Domain::Cpu,
            Image::Gpu(_) => Domain::Gpu,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Cpu,
    Gpu,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Cpu => f.write_str("cpu"),
            Domain::Gpu => f.write_str("gpu"),
        }
    }
}

/// Per-frame values every effect may read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub time: f64,
    pub width: u32,
    pub height: u32,
}

/// Tunables shared by the probes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// Side length of the square probe render target.
    pub probe_resolution: u32,
    /// Histogram bins used by the statistics probe.
    pub stats_bins: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            probe_resolution: 92,
            stats_bins: 184,
        }
    }
}

/// Counters for one `apply_effects` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub recomputed: u32,
    pub reused: u32,
    pub disabled: u32,
    pub uploads: u32,
    pub readbacks: u32,
    pub soft_faults: u32,
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recomputed={} reused={} disabled={} uploads={} readbacks={} soft_faults={}",
            self.recomputed, self.reused, self.disabled, self.uploads, self.readbacks, self.soft_faults
        )
    }
}
