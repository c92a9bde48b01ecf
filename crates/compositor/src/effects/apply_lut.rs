use anyhow::{bail, Context, Result};
use shaderprep::ShaderRequest;

use crate::effect::{GpuEffect, PassContext};
use crate::gpu::{TextureHandle, UniformValue};
use crate::param::ResolvedParams;
use crate::program::{RenderOutcome, UniformSpec};
use crate::resources::Owner;
use crate::types::{FrameInfo, PixelBuffer};

/// Texture unit the LUT is bound to.
const LUT_UNIT: u32 = 1;
const LUT_WIDTH: u32 = 256;

/// Gradient names and their colour stops.
pub const GRADIENTS: &[(&str, &[(f32, [f32; 3])])] = &[
    ("mono", &[(0.0, [0.0, 0.0, 0.0]), (1.0, [1.0, 1.0, 1.0])]),
    (
        "warm",
        &[
            (0.0, [0.08, 0.02, 0.0]),
            (0.5, [0.8, 0.35, 0.1]),
            (1.0, [1.0, 0.95, 0.8]),
        ],
    ),
    (
        "cool",
        &[
            (0.0, [0.0, 0.02, 0.1]),
            (0.5, [0.15, 0.45, 0.7]),
            (1.0, [0.85, 0.97, 1.0]),
        ],
    ),
    (
        "infrared",
        &[
            (0.0, [0.0, 0.0, 0.0]),
            (0.35, [0.5, 0.0, 0.5]),
            (0.7, [1.0, 0.3, 0.0]),
            (1.0, [1.0, 1.0, 0.6]),
        ],
    ),
];

/// A `LUT_WIDTH`x1 strip interpolated between the stops of `name`.
pub fn gradient_lut(name: &str) -> Result<PixelBuffer> {
    let Some((_, stops)) = GRADIENTS.iter().find(|(gradient, _)| *gradient == name) else {
        bail!("unknown gradient `{name}`");
    };
    let mut lut = PixelBuffer::new(LUT_WIDTH, 1);
    for (x, px) in lut.pixels_mut().enumerate() {
        let t = x as f32 / (LUT_WIDTH - 1) as f32;
        let upper = stops.iter().position(|(at, _)| *at >= t).unwrap_or(stops.len() - 1);
        let lower = upper.saturating_sub(1);
        let (t0, c0) = stops[lower];
        let (t1, c1) = stops[upper];
        let f = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
        for channel in 0..3 {
            px[channel] = c0[channel] + (c1[channel] - c0[channel]) * f;
        }
        px[3] = 1.0;
    }
    Ok(lut)
}

/// Maps luminance through a named gradient.
#[derive(Default)]
pub struct ApplyLut {
    lut: Option<TextureHandle>,
}

impl GpuEffect for ApplyLut {
    fn name(&self) -> &str {
        "apply_lut"
    }

    fn shader(&self) -> ShaderRequest {
        ShaderRequest::new("apply_lut.frag")
    }

    fn prepare(
        &mut self,
        ctx: &mut PassContext<'_>,
        _input: TextureHandle,
        params: &ResolvedParams,
    ) -> Result<RenderOutcome> {
        let name = params.text("lut", "warm");
        let texture = ctx
            .resources
            .lut(&mut *ctx.device, Owner::Effect(ctx.effect), name, || gradient_lut(name))
            .with_context(|| format!("loading LUT `{name}`"))?;
        self.lut = Some(texture);
        Ok(RenderOutcome::Drawn)
    }

    fn uniforms(&self, params: &ResolvedParams, _frame: &FrameInfo) -> UniformSpec {
        let spec = UniformSpec::new().with("u_amount", UniformValue::Float(params.float("amount", 1.0) as f32));
        match self.lut {
            Some(lut) => spec.with_texture(LUT_UNIT, lut),
            None => spec,
        }
    }
}
