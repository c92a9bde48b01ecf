use anyhow::{Context, Result};
use shaderprep::{DefineSet, ShaderRequest};

use crate::effect::{GpuEffect, InitContext, PassContext};
use crate::gpu::{TextureHandle, UniformValue};
use crate::param::ResolvedParams;
use crate::probe::palette::{pack_palette, BalanceParams, MAX_PALETTE};
use crate::probe::{PaletteOptions, PaletteProbe, RefineStrategy};
use crate::program::{RenderOutcome, UniformSpec};
use crate::resources::ResourceManager;
use crate::types::FrameInfo;

/// Snaps every pixel to the nearest colour of a palette extracted from the
/// incoming image.
#[derive(Default)]
pub struct PaletteMap {
    probe: Option<PaletteProbe>,
    packed: Vec<f32>,
}

fn palette_size(params: &ResolvedParams) -> usize {
    params.int("size", 6).clamp(1, MAX_PALETTE as i64) as usize
}

pub(crate) fn options(params: &ResolvedParams) -> PaletteOptions {
    let defaults = PaletteOptions::default();
    let strategy = params.text("strategy", "kmeans");
    PaletteOptions {
        size: palette_size(params),
        weights: [
            params.float("luma_weight", defaults.weights[0]),
            params.float("chroma_weight", defaults.weights[1]),
            params.float("hue_weight", defaults.weights[2]),
        ],
        strategy: RefineStrategy::parse(strategy).unwrap_or_else(|| {
            tracing::warn!(strategy, "unknown refine strategy, using kmeans");
            RefineStrategy::KMeans
        }),
        use_furthest: params.bool("spread", defaults.use_furthest),
        use_pca: params.bool("pca", defaults.use_pca),
        balance: BalanceParams {
            chroma_boost: params.float("chroma_boost", 1.0),
            contrast: params.float("contrast", 1.0),
            hue_warp: params.float("hue_warp", 0.0),
            balance_shift: params.float("balance_shift", 0.0),
            gamma: params.float("gamma", 1.0),
        },
    }
}

impl GpuEffect for PaletteMap {
    fn name(&self) -> &str {
        "palette_map"
    }

    fn shader(&self) -> ShaderRequest {
        ShaderRequest::new("palette_map.frag")
            .with_include("colorconvert.glsl", "includes/colorconvert.glsl")
    }

    fn init(&mut self, ctx: &mut InitContext<'_>) -> Result<()> {
        self.probe = Some(PaletteProbe::new(ctx));
        Ok(())
    }

    fn defines(&self, params: &ResolvedParams) -> DefineSet {
        DefineSet::new().with("PALETTE_SIZE", palette_size(params) as i64)
    }

    fn prepare(
        &mut self,
        ctx: &mut PassContext<'_>,
        input: TextureHandle,
        params: &ResolvedParams,
    ) -> Result<RenderOutcome> {
        let probe = self.probe.as_mut().context("palette_map used before init")?;
        let Some(palette) = probe.extract(ctx, input, &options(params))? else {
            return Ok(RenderOutcome::SoftFault);
        };
        tracing::trace!(effect = %ctx.effect, entries = palette.len(), "palette extracted");
        self.packed = pack_palette(&palette);
        Ok(RenderOutcome::Drawn)
    }

    fn uniforms(&self, params: &ResolvedParams, _frame: &FrameInfo) -> UniformSpec {
        let packed = if self.packed.is_empty() {
            pack_palette(&[])
        } else {
            self.packed.clone()
        };
        UniformSpec::new()
            .with("u_amount", UniformValue::Float(params.float("amount", 1.0) as f32))
            .with(
                "u_weights",
                UniformValue::Vec3([
                    params.float("luma_weight", 1.0) as f32,
                    params.float("chroma_weight", 1.0) as f32,
                    1.0,
                ]),
            )
            .with("Palette", UniformValue::Block(packed))
    }

    fn cleanup(&mut self, resources: &mut ResourceManager) -> Result<()> {
        if let Some(mut probe) = self.probe.take() {
            probe.release(resources)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::EffectConfig;

    #[test]
    fn options_read_every_knob() {
        let params = EffectConfig::new()
            .with("size", 40i64)
            .with("strategy", "merge")
            .with("spread", true)
            .with("pca", true)
            .with("gamma", 2.0)
            .resolve(0.0);
        let options = options(&params);
        assert_eq!(options.size, MAX_PALETTE);
        assert_eq!(options.strategy, RefineStrategy::Merge);
        assert!(options.use_furthest && options.use_pca);
        assert_eq!(options.balance.gamma, 2.0);
    }
}
