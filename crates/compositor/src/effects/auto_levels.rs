use anyhow::{Context, Result};
use shaderprep::ShaderRequest;

use crate::effect::{GpuEffect, InitContext, PassContext};
use crate::gpu::{TextureHandle, UniformValue};
use crate::param::ResolvedParams;
use crate::probe::StatsProbe;
use crate::program::{RenderOutcome, UniformSpec};
use crate::resources::ResourceManager;
use crate::types::FrameInfo;

/// Stretches each channel between the `low` and `high` percentiles of the
/// incoming image.
#[derive(Default)]
pub struct AutoLevels {
    probe: Option<StatsProbe>,
    bounds: Option<([f32; 4], [f32; 4])>,
}

impl GpuEffect for AutoLevels {
    fn name(&self) -> &str {
        "auto_levels"
    }

    fn shader(&self) -> ShaderRequest {
        ShaderRequest::new("auto_levels.frag")
    }

    fn init(&mut self, ctx: &mut InitContext<'_>) -> Result<()> {
        self.probe = Some(StatsProbe::new(ctx));
        Ok(())
    }

    fn prepare(
        &mut self,
        ctx: &mut PassContext<'_>,
        input: TextureHandle,
        params: &ResolvedParams,
    ) -> Result<RenderOutcome> {
        let probe = self.probe.as_mut().context("auto_levels used before init")?;
        let low = params.float("low", 1.0).clamp(0.0, 100.0);
        let high = params.float("high", 99.0).clamp(low, 100.0);
        match probe.measure(ctx, input, low, high)? {
            Some(stats) => {
                tracing::trace!(effect = %ctx.effect, low = ?stats.low(), high = ?stats.high(), "levels measured");
                self.bounds = Some((stats.low(), stats.high()));
                Ok(RenderOutcome::Drawn)
            }
            None => Ok(RenderOutcome::SoftFault),
        }
    }

    fn uniforms(&self, params: &ResolvedParams, _frame: &FrameInfo) -> UniformSpec {
        let (low, high) = self.bounds.unwrap_or(([0.0; 4], [1.0; 4]));
        UniformSpec::new()
            .with("u_low", UniformValue::Vec4(low))
            .with("u_high", UniformValue::Vec4(high))
            .with("u_amount", UniformValue::Float(params.float("amount", 1.0) as f32))
    }

    fn cleanup(&mut self, resources: &mut ResourceManager) -> Result<()> {
        if let Some(mut probe) = self.probe.take() {
            probe.release(resources)?;
        }
        Ok(())
    }
}
