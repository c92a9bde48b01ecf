use anyhow::{ensure, Result};

use crate::effect::CpuEffect;
use crate::param::ResolvedParams;
use crate::types::{FrameInfo, PixelBuffer};

/// Quantizes each colour channel to `levels` steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct Posterize;

impl CpuEffect for Posterize {
    fn name(&self) -> &str {
        "posterize"
    }

    fn apply(&mut self, input: &PixelBuffer, params: &ResolvedParams, _frame: &FrameInfo) -> Result<PixelBuffer> {
        let levels = params.int("levels", 4);
        ensure!((2..=256).contains(&levels), "levels must be in 2..=256, got {levels}");
        let steps = (levels - 1) as f32;
        let mut output = input.clone();
        for px in output.pixels_mut() {
            for channel in &mut px[..3] {
                *channel = (channel.clamp(0.0, 1.0) * steps).round() / steps;
            }
        }
        Ok(output)
    }
}
