use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use compositor::{
    CompositorError, CpuEffect, EffectConfig, EffectId, EffectKind, FrameInfo, GpuEffect,
    HeadlessDevice, Modulation, Owner, Param, PassContext, Pipeline, PipelineSettings, PixelBuffer,
    RenderOutcome, ResolvedParams, ShaderLibrary, TextureHandle, UniformSpec, UniformValue,
    Waveform,
};
use shaderprep::ShaderRequest;

struct Counting {
    calls: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

impl CpuEffect for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn apply(&mut self, input: &PixelBuffer, params: &ResolvedParams, _frame: &FrameInfo) -> Result<PixelBuffer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let offset = params.float("offset", 0.0) as f32;
        let mut output = input.clone();
        for px in output.pixels_mut() {
            px[0] += offset;
        }
        Ok(output)
    }

    fn cleanup(&mut self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingGpu {
    calls: Arc<AtomicUsize>,
    ready: Arc<AtomicBool>,
}

impl GpuEffect for CountingGpu {
    fn name(&self) -> &str {
        "counting_gpu"
    }

    fn shader(&self) -> ShaderRequest {
        ShaderRequest::new("tint.frag")
    }

    fn prepare(
        &mut self,
        _ctx: &mut PassContext<'_>,
        _input: TextureHandle,
        _params: &ResolvedParams,
    ) -> Result<RenderOutcome> {
        if !self.ready.load(Ordering::SeqCst) {
            return Ok(RenderOutcome::SoftFault);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RenderOutcome::Drawn)
    }

    fn uniforms(&self, params: &ResolvedParams, _frame: &FrameInfo) -> UniformSpec {
        UniformSpec::new().with("u_amount", UniformValue::Float(params.float("amount", 0.0) as f32))
    }
}

/// Frees another effect's textures, then skips its own draw.
struct ReleaseOther {
    other: EffectId,
}

impl GpuEffect for ReleaseOther {
    fn name(&self) -> &str {
        "release_other"
    }

    fn shader(&self) -> ShaderRequest {
        ShaderRequest::new("tint.frag")
    }

    fn prepare(
        &mut self,
        ctx: &mut PassContext<'_>,
        _input: TextureHandle,
        _params: &ResolvedParams,
    ) -> Result<RenderOutcome> {
        ctx.resources.release_owner(Owner::Effect(self.other))?;
        Ok(RenderOutcome::SoftFault)
    }

    fn uniforms(&self, _params: &ResolvedParams, _frame: &FrameInfo) -> UniformSpec {
        UniformSpec::new()
    }
}

struct Resize;

impl CpuEffect for Resize {
    fn name(&self) -> &str {
        "resize"
    }

    fn apply(&mut self, _input: &PixelBuffer, _params: &ResolvedParams, _frame: &FrameInfo) -> Result<PixelBuffer> {
        Ok(PixelBuffer::new(1, 1))
    }
}

#[derive(Default)]
struct Counters {
    calls: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

impl Counters {
    fn cpu(&self) -> EffectKind {
        EffectKind::Cpu(Box::new(Counting {
            calls: Arc::clone(&self.calls),
            cleanups: Arc::clone(&self.cleanups),
        }))
    }

    fn gpu(&self, ready: &Arc<AtomicBool>) -> EffectKind {
        EffectKind::Gpu(Box::new(CountingGpu {
            calls: Arc::clone(&self.calls),
            ready: Arc::clone(ready),
        }))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new(
        Box::new(HeadlessDevice::new()),
        ShaderLibrary::embedded(),
        PipelineSettings::default(),
    );
    pipeline.set_source(PixelBuffer::filled(8, 6, [0.25, 0.5, 0.75, 1.0]));
    pipeline
}

fn ready() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(true))
}

#[test]
fn unchanged_stack_reuses_every_output() {
    let mut pipeline = pipeline();
    let (cpu, gpu) = (Counters::default(), Counters::default());
    pipeline.add_effect_kind("cpu", cpu.cpu(), EffectConfig::new()).unwrap();
    pipeline.add_effect_kind("gpu", gpu.gpu(&ready()), EffectConfig::new()).unwrap();

    let first = pipeline.apply_effects(0.0).unwrap();
    let second = pipeline.apply_effects(0.0).unwrap();
    assert_eq!(first.texture, second.texture);
    assert_eq!((cpu.calls(), gpu.calls()), (1, 1));
    assert_eq!(second.stats.reused, 2);
    assert_eq!(second.stats.recomputed, 0);
    assert_eq!(second.stats.uploads, 0);
}

#[test]
fn editing_an_effect_invalidates_it_and_everything_after() {
    let mut pipeline = pipeline();
    let counters: Vec<Counters> = (0..3).map(|_| Counters::default()).collect();
    let ids: Vec<EffectId> = counters
        .iter()
        .map(|c| pipeline.add_effect_kind("cpu", c.cpu(), EffectConfig::new()).unwrap())
        .collect();
    pipeline.apply_effects(0.0).unwrap();

    pipeline.update_param(ids[1], "offset", 0.1).unwrap();
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    let calls: Vec<usize> = counters.iter().map(Counters::calls).collect();
    assert_eq!(calls, vec![1, 2, 2]);
    assert_eq!((stats.reused, stats.recomputed), (1, 2));

    let (pixels, _) = pipeline.render_frame(0.0).unwrap();
    assert!((pixels.pixel(0, 0)[0] - 0.35).abs() < 1e-6);
}

#[test]
fn domains_convert_once_per_boundary() {
    let mut pipeline = pipeline();
    let counters = Counters::default();
    let ready = ready();
    let head = pipeline.add_effect_kind("cpu", counters.cpu(), EffectConfig::new()).unwrap();
    let first_gpu = pipeline.add_effect_kind("gpu", counters.gpu(&ready), EffectConfig::new()).unwrap();
    pipeline.add_effect_kind("gpu", counters.gpu(&ready), EffectConfig::new()).unwrap();
    let tail = pipeline.add_effect_kind("cpu", counters.cpu(), EffectConfig::new()).unwrap();

    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!(stats.uploads, 2, "one into the first gpu effect, one for display");
    assert_eq!(stats.readbacks, 1);

    pipeline.update_param(tail, "offset", 0.05).unwrap();
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!((stats.uploads, stats.readbacks), (1, 1));
    assert_eq!(stats.reused, 3);

    pipeline.update_param(first_gpu, "amount", 0.5).unwrap();
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!((stats.uploads, stats.readbacks), (2, 1));

    pipeline.update_param(head, "offset", 0.05).unwrap();
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!(stats.recomputed, 4);
    assert_eq!((stats.uploads, stats.readbacks), (2, 1));
}

#[test]
fn define_changes_recompile_exactly_once() {
    let mut pipeline = pipeline();
    let id = pipeline
        .add_effect("tint", EffectConfig::new().with("mode", "luma"))
        .unwrap();
    pipeline.apply_effects(0.0).unwrap();
    pipeline.update_param(id, "amount", 0.9).unwrap();
    pipeline.apply_effects(0.0).unwrap();
    assert_eq!(pipeline.program_stats(id).unwrap().compiles, 1);

    pipeline.update_param(id, "mode", "screen").unwrap();
    pipeline.apply_effects(0.0).unwrap();
    pipeline.apply_effects(0.0).unwrap();
    assert_eq!(pipeline.program_stats(id).unwrap().compiles, 2);
    assert_eq!(pipeline.device().stats().live_programs(), 1);
}

#[test]
fn modulated_effects_follow_time() {
    let mut pipeline = pipeline();
    let (still, moving) = (Counters::default(), Counters::default());
    pipeline.add_effect_kind("cpu", still.cpu(), EffectConfig::new()).unwrap();
    let wobble = Param::Modulated {
        base: 0.0,
        modulation: Modulation {
            wave: Waveform::Sine,
            scale: 0.1,
            ..Modulation::default()
        },
    };
    pipeline
        .add_effect_kind("cpu", moving.cpu(), EffectConfig::new().with("offset", wobble))
        .unwrap();

    pipeline.apply_effects(0.0).unwrap();
    pipeline.apply_effects(0.0).unwrap();
    pipeline.apply_effects(0.25).unwrap();
    assert_eq!(still.calls(), 1);
    assert_eq!(moving.calls(), 2);
}

#[test]
fn solo_tracks_the_effective_enabled_set() {
    let mut pipeline = pipeline();
    let counters: Vec<Counters> = (0..3).map(|_| Counters::default()).collect();
    let ids: Vec<EffectId> = counters
        .iter()
        .map(|c| pipeline.add_effect_kind("cpu", c.cpu(), EffectConfig::new()).unwrap())
        .collect();
    pipeline.apply_effects(0.0).unwrap();

    pipeline.set_solo(ids[1], true).unwrap();
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!((stats.disabled, stats.recomputed), (2, 1));

    pipeline.set_solo(ids[1], false).unwrap();
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!((stats.reused, stats.recomputed), (1, 2));
    let calls: Vec<usize> = counters.iter().map(Counters::calls).collect();
    assert_eq!(calls, vec![1, 3, 2]);
}

#[test]
fn disabling_everything_shows_the_source() {
    let mut pipeline = pipeline();
    let counters = Counters::default();
    let id = pipeline.add_effect_kind("cpu", counters.cpu(), EffectConfig::new().with("offset", 0.5)).unwrap();
    pipeline.set_enabled(id, false).unwrap();
    let (pixels, stats) = pipeline.render_frame(0.0).unwrap();
    assert_eq!(stats.disabled, 1);
    assert_eq!(counters.calls(), 0);
    assert_eq!(pixels.pixel(0, 0), [0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn soft_fault_passes_through_and_retries() {
    let mut pipeline = pipeline();
    let (gpu, cpu) = (Counters::default(), Counters::default());
    let ready = Arc::new(AtomicBool::new(false));
    pipeline.add_effect_kind("gpu", gpu.gpu(&ready), EffectConfig::new()).unwrap();
    pipeline.add_effect_kind("cpu", cpu.cpu(), EffectConfig::new()).unwrap();

    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!((stats.soft_faults, stats.recomputed), (1, 1));
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!((stats.soft_faults, stats.recomputed), (1, 1));
    assert_eq!(cpu.calls(), 2);

    ready.store(true, Ordering::SeqCst);
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!((stats.soft_faults, stats.recomputed), (0, 2));
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!((stats.reused, stats.recomputed), (2, 0));
    assert_eq!((gpu.calls(), cpu.calls()), (1, 3));
}

#[test]
fn soft_fault_keeps_the_previous_output() {
    let mut pipeline = pipeline();
    let gpu = Counters::default();
    let ready = ready();
    let id = pipeline.add_effect_kind("gpu", gpu.gpu(&ready), EffectConfig::new()).unwrap();
    let drawn = pipeline.apply_effects(0.0).unwrap();

    ready.store(false, Ordering::SeqCst);
    pipeline.update_param(id, "amount", 0.3).unwrap();
    let faulted = pipeline.apply_effects(0.0).unwrap();
    assert_eq!(faulted.stats.soft_faults, 1);
    assert_eq!(faulted.texture, drawn.texture);
}

#[test]
fn cached_texture_released_elsewhere_is_an_invariant_error() {
    let mut pipeline = pipeline();
    let gpu = Counters::default();
    let cached = pipeline.add_effect_kind("gpu", gpu.gpu(&ready()), EffectConfig::new()).unwrap();
    pipeline
        .add_effect_kind(
            "release_other",
            EffectKind::Gpu(Box::new(ReleaseOther { other: cached })),
            EffectConfig::new(),
        )
        .unwrap();

    let first = pipeline.apply_effects(0.0).unwrap();
    assert_eq!((first.stats.recomputed, first.stats.soft_faults), (1, 1));

    let err = pipeline.apply_effects(0.0).unwrap_err();
    assert!(matches!(err, CompositorError::ResourceInvariant(_)), "{err}");
    assert_eq!(gpu.calls(), 1);
}

#[test]
fn removed_effects_are_destroyed_at_end_of_frame() {
    let mut pipeline = pipeline();
    let id = pipeline.add_effect("tint", EffectConfig::new()).unwrap();
    pipeline.apply_effects(0.0).unwrap();
    let before = pipeline.device().stats();
    assert_eq!((before.textures_created, before.framebuffers_created), (2, 1));

    pipeline.remove_effect(id).unwrap();
    assert_eq!(pipeline.device().stats().textures_deleted, 0);
    assert_eq!(pipeline.resources().pending_destroy_count(), 4);

    pipeline.apply_effects(0.0).unwrap();
    let after = pipeline.device().stats();
    assert_eq!(after.textures_deleted, 2);
    assert_eq!(after.framebuffers_deleted, 1);
    assert_eq!(after.live_programs(), 0);
    assert_eq!(after.live_textures(), 1);
    assert_eq!(pipeline.resources().pending_destroy_count(), 0);
}

#[test]
fn reset_cleans_up_each_effect_once() {
    let mut pipeline = pipeline();
    let counters = Counters::default();
    for _ in 0..2 {
        pipeline.add_effect_kind("cpu", counters.cpu(), EffectConfig::new()).unwrap();
    }
    pipeline.apply_effects(0.0).unwrap();
    pipeline.reset().unwrap();
    assert_eq!(counters.cleanups.load(Ordering::SeqCst), 2);
    assert!(pipeline.stack().is_empty());
    assert_eq!(pipeline.apply_effects(0.0).unwrap().stats.recomputed, 0);
}

#[test]
fn moving_an_effect_recomputes_from_the_move() {
    let mut pipeline = pipeline();
    let counters: Vec<Counters> = (0..3).map(|_| Counters::default()).collect();
    let ids: Vec<EffectId> = counters
        .iter()
        .map(|c| pipeline.add_effect_kind("cpu", c.cpu(), EffectConfig::new()).unwrap())
        .collect();
    pipeline.apply_effects(0.0).unwrap();

    pipeline.move_effect(ids[2], 1).unwrap();
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!((stats.reused, stats.recomputed), (1, 2));
}

#[test]
fn resized_cpu_output_is_rejected() {
    let mut pipeline = pipeline();
    pipeline
        .add_effect_kind("resize", EffectKind::Cpu(Box::new(Resize)), EffectConfig::new())
        .unwrap();
    assert!(matches!(
        pipeline.apply_effects(0.0),
        Err(CompositorError::Effect { .. })
    ));
}

#[test]
fn probe_effects_render_and_release_their_probes() {
    let mut pipeline = pipeline();
    let levels = pipeline
        .add_effect("auto_levels", EffectConfig::new().with("low", 2.0).with("high", 98.0))
        .unwrap();
    let palette = pipeline
        .add_effect(
            "palette_map",
            EffectConfig::new()
                .with("size", 4i64)
                .with("strategy", "merge")
                .with("spread", true)
                .with("pca", true),
        )
        .unwrap();
    let stats = pipeline.apply_effects(0.0).unwrap().stats;
    assert_eq!(stats.recomputed, 2);
    assert_eq!(stats.readbacks, 0, "probe readbacks are not domain conversions");

    pipeline.remove_effect(levels).unwrap();
    pipeline.remove_effect(palette).unwrap();
    pipeline.apply_effects(0.0).unwrap();
    let device = pipeline.device().stats();
    assert_eq!(device.live_textures(), 1);
    assert_eq!(device.live_framebuffers(), 0);
    assert_eq!(device.live_programs(), 0);
}

#[test]
fn lut_textures_are_built_once() {
    let mut pipeline = pipeline();
    let id = pipeline
        .add_effect("apply_lut", EffectConfig::new().with("lut", "cool"))
        .unwrap();
    pipeline.apply_effects(0.0).unwrap();
    let created = pipeline.device().stats().textures_created;

    pipeline.update_param(id, "amount", 0.5).unwrap();
    pipeline.apply_effects(0.0).unwrap();
    assert_eq!(pipeline.device().stats().textures_created, created);

    pipeline.update_param(id, "lut", "plaid").unwrap();
    assert!(pipeline.apply_effects(0.0).is_err());
}
