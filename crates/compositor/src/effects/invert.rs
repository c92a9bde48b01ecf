use anyhow::Result;

use crate::effect::CpuEffect;
use crate::param::ResolvedParams;
use crate::types::{FrameInfo, PixelBuffer};

/// `1 - c` on the colour channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Invert;

impl CpuEffect for Invert {
    fn name(&self) -> &str {
        "invert"
    }

    fn apply(&mut self, input: &PixelBuffer, _params: &ResolvedParams, _frame: &FrameInfo) -> Result<PixelBuffer> {
        let mut output = input.clone();
        for px in output.pixels_mut() {
            for channel in &mut px[..3] {
                *channel = 1.0 - *channel;
            }
        }
        Ok(output)
    }
}
