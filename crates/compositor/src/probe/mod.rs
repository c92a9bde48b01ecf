//! Analysis probes.
//!
//! A probe renders the current image into its own small square target,
//! reads it back and reduces it on the CPU. Effects own their probes and run
//! them from [`crate::GpuEffect::prepare`]; results feed the main pass as
//! uniforms.
pub mod color;
pub mod palette;
pub mod pca;
pub mod stats;

use shaderprep::{DefineSet, ShaderRequest};
use thiserror::Error;

use crate::effect::{InitContext, PassContext};
use crate::error::CompositorError;
use crate::gpu::{TextureHandle, UniformValue};
use crate::program::{ProgramRecord, RenderOutcome, UniformSpec};
use crate::resources::{Owner, ProbeId, ResourceManager, Role};
use crate::types::PixelBuffer;

pub use palette::{PaletteBin, PaletteOptions, RefineStrategy};
pub use pca::Basis;
pub use stats::ChannelStats;

/// Fragment shader every probe downsamples with.
pub const PROBE_SHADER: &str = "probe.frag";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbeError {
    #[error("probe sampled no pixels")]
    NoSamples,

    #[error("degenerate colour basis: {0}")]
    DegenerateBasis(String),

    #[error("probe produced non-finite values")]
    NonFinite,
}

/// A render target and program used to sample a downscaled copy of an image.
pub struct Probe {
    id: ProbeId,
    program: ProgramRecord,
}

impl Probe {
    pub fn new(ctx: &mut InitContext<'_>) -> Self {
        let id = ctx.resources.next_probe_id();
        let shader = ctx.shaders.request(&ShaderRequest::new(PROBE_SHADER));
        Self {
            id,
            program: ProgramRecord::new(PROBE_SHADER, shader),
        }
    }

    pub fn id(&self) -> ProbeId {
        self.id
    }

    /// Downsamples `input` to `resolution`² and reads it back. `None` when
    /// the probe shader has not loaded yet.
    pub fn sample(
        &mut self,
        ctx: &mut PassContext<'_>,
        input: TextureHandle,
        resolution: u32,
    ) -> Result<Option<PixelBuffer>, CompositorError> {
        let target = ctx.resources.ensure_target(
            &mut *ctx.device,
            Owner::Probe(self.id),
            Role::Output,
            resolution,
            resolution,
        )?;
        let uniforms = UniformSpec::new().with("u_proberes", UniformValue::Float(resolution as f32));
        let outcome = self.program.render(
            &mut *ctx.device,
            ctx.resources,
            input,
            &target,
            &uniforms,
            &DefineSet::new(),
        )?;
        if outcome == RenderOutcome::SoftFault {
            tracing::debug!(probe = self.id.0, "probe shader pending");
            return Ok(None);
        }
        Ok(Some(ctx.device.read_texture(target.texture)?))
    }

    pub fn release(&mut self, resources: &mut ResourceManager) -> Result<(), CompositorError> {
        resources.release_owner(Owner::Probe(self.id))?;
        self.program.release(resources)
    }
}

/// Percentile bounds of the current image.
pub struct StatsProbe {
    probe: Probe,
    history: StatsHistory,
}

impl StatsProbe {
    pub fn new(ctx: &mut InitContext<'_>) -> Self {
        Self {
            probe: Probe::new(ctx),
            history: StatsHistory::default(),
        }
    }

    pub fn measure(
        &mut self,
        ctx: &mut PassContext<'_>,
        input: TextureHandle,
        low: f64,
        high: f64,
    ) -> Result<Option<ChannelStats>, CompositorError> {
        let resolution = ctx.settings.probe_resolution;
        let bins = ctx.settings.stats_bins;
        let Some(pixels) = self.probe.sample(ctx, input, resolution)? else {
            return Ok(None);
        };
        let stats = self.history.reduce(self.probe.id(), &pixels, bins, low, high)?;
        Ok(Some(stats))
    }

    pub fn release(&mut self, resources: &mut ResourceManager) -> Result<(), CompositorError> {
        self.probe.release(resources)
    }
}

/// Last good statistics, reused when a sample turns out non-finite.
#[derive(Debug, Default)]
struct StatsHistory {
    last_good: Option<ChannelStats>,
}

impl StatsHistory {
    fn reduce(
        &mut self,
        probe: ProbeId,
        pixels: &PixelBuffer,
        bins: usize,
        low: f64,
        high: f64,
    ) -> Result<ChannelStats, ProbeError> {
        match stats::channel_stats(pixels, bins, low, high) {
            Ok(stats) => {
                self.last_good = Some(stats.clone());
                Ok(stats)
            }
            Err(ProbeError::NonFinite) => match &self.last_good {
                Some(last) => {
                    tracing::warn!(probe = probe.0, "non-finite samples, reusing last bounds");
                    Ok(last.clone())
                }
                None => Err(ProbeError::NonFinite),
            },
            Err(err) => Err(err),
        }
    }
}

/// Dominant colours of the current image.
pub struct PaletteProbe {
    probe: Probe,
    history: PaletteHistory,
}

impl PaletteProbe {
    pub fn new(ctx: &mut InitContext<'_>) -> Self {
        Self {
            probe: Probe::new(ctx),
            history: PaletteHistory::default(),
        }
    }

    pub fn extract(
        &mut self,
        ctx: &mut PassContext<'_>,
        input: TextureHandle,
        options: &PaletteOptions,
    ) -> Result<Option<Vec<PaletteBin>>, CompositorError> {
        let resolution = ctx.settings.probe_resolution;
        let Some(pixels) = self.probe.sample(ctx, input, resolution)? else {
            return Ok(None);
        };
        let palette = self.history.reduce(self.probe.id(), &pixels, options)?;
        Ok(Some(palette))
    }

    pub fn release(&mut self, resources: &mut ResourceManager) -> Result<(), CompositorError> {
        self.probe.release(resources)
    }
}

/// Last basis and palette, reused when a new sample cannot produce them.
#[derive(Debug, Default)]
struct PaletteHistory {
    last_basis: Option<Basis>,
    last_palette: Option<Vec<PaletteBin>>,
}

impl PaletteHistory {
    fn reduce(
        &mut self,
        probe: ProbeId,
        pixels: &PixelBuffer,
        options: &PaletteOptions,
    ) -> Result<Vec<PaletteBin>, ProbeError> {
        let samples: Vec<color::Lab> = pixels
            .pixels()
            .map(|px| color::srgb_to_oklab([px[0] as f64, px[1] as f64, px[2] as f64]))
            .collect();

        let basis = if options.use_pca {
            self.fit_basis(probe, &samples)?
        } else {
            None
        };

        match palette::extract_palette(&samples, options, basis.as_ref()) {
            Ok(palette) => {
                self.last_palette = Some(palette.clone());
                Ok(palette)
            }
            Err(ProbeError::NonFinite) => match &self.last_palette {
                Some(last) => {
                    tracing::warn!(probe = probe.0, "non-finite palette, reusing last palette");
                    Ok(last.clone())
                }
                None => Err(ProbeError::NonFinite),
            },
            Err(err) => Err(err),
        }
    }

    /// Fits a basis to `samples`. A degenerate fit falls back to the last
    /// basis, or to no projection when there is none.
    fn fit_basis(
        &mut self,
        probe: ProbeId,
        samples: &[color::Lab],
    ) -> Result<Option<Basis>, ProbeError> {
        match Basis::fit(samples) {
            Ok(basis) => {
                self.last_basis = Some(basis);
                Ok(Some(basis))
            }
            Err(ProbeError::DegenerateBasis(reason)) => {
                let fallback = match self.last_basis {
                    Some(_) => "last basis",
                    None => "unprojected",
                };
                tracing::warn!(probe = probe.0, %reason, fallback, "colour basis is degenerate");
                Ok(self.last_basis)
            }
            Err(err) => Err(err),
        }
    }
}
