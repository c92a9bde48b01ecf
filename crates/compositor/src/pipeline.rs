//! The frame orchestrator.
//!
//! [`Pipeline::apply_effects`] walks the stack once, folding every effect
//! into a running FNV chain. An effect whose cache entry carries the same
//! chain (and, when modulated, the same time) is reused untouched; the first
//! effect that has to run forces every later effect to run as well. Images
//! cross between host memory and the device only when a stale effect needs
//! the other domain.
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::effect::{EffectKind, EffectRegistry, InitContext, PassContext};
use crate::error::CompositorError;
use crate::fingerprint;
use crate::gpu::{GpuDevice, TextureHandle};
use crate::param::{EffectConfig, Param};
use crate::program::{ProgramRecord, ProgramStats, RenderOutcome};
use crate::resources::{Owner, ResourceManager, Role};
use crate::shaders::ShaderLibrary;
use crate::stack::{EffectInstance, EffectStack};
use crate::types::{EffectId, FrameInfo, FrameStats, Image, PipelineSettings, PixelBuffer};

/// The final image of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutput {
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub stats: FrameStats,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    output: Option<Image>,
    /// `None` after a soft fault or when computed from provisional input.
    chain: Option<u64>,
    time: Option<f64>,
}

struct SourceImage {
    pixels: Arc<PixelBuffer>,
    generation: u64,
    uploaded: Option<TextureHandle>,
}

pub struct Pipeline {
    device: Box<dyn GpuDevice>,
    resources: ResourceManager,
    shaders: ShaderLibrary,
    registry: EffectRegistry,
    settings: PipelineSettings,
    stack: EffectStack,
    programs: HashMap<EffectId, ProgramRecord>,
    entries: HashMap<EffectId, CacheEntry>,
    source: Option<SourceImage>,
    generation: u64,
    displayed: Option<(Arc<PixelBuffer>, TextureHandle)>,
}

impl Pipeline {
    pub fn new(device: Box<dyn GpuDevice>, shaders: ShaderLibrary, settings: PipelineSettings) -> Self {
        debug!(backend = device.backend_name(), "creating pipeline");
        Self {
            device,
            resources: ResourceManager::new(),
            shaders,
            registry: EffectRegistry::builtin(),
            settings,
            stack: EffectStack::new(),
            programs: HashMap::new(),
            entries: HashMap::new(),
            source: None,
            generation: 0,
            displayed: None,
        }
    }

    pub fn device(&self) -> &dyn GpuDevice {
        self.device.as_ref()
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    pub fn stack(&self) -> &EffectStack {
        &self.stack
    }

    pub fn registry_mut(&mut self) -> &mut EffectRegistry {
        &mut self.registry
    }

    pub fn program_stats(&self, id: EffectId) -> Option<ProgramStats> {
        self.programs.get(&id).map(ProgramRecord::stats)
    }

    /// Replaces the source image. Every cached output becomes stale.
    pub fn set_source(&mut self, pixels: PixelBuffer) {
        self.generation += 1;
        debug!(
            width = pixels.width,
            height = pixels.height,
            generation = self.generation,
            "new source image"
        );
        self.source = Some(SourceImage {
            pixels: Arc::new(pixels),
            generation: self.generation,
            uploaded: None,
        });
    }

    /// Creates an effect from the registry and appends it to the stack.
    pub fn add_effect(&mut self, type_name: &str, config: EffectConfig) -> Result<EffectId, CompositorError> {
        let kind = self
            .registry
            .create(type_name)
            .ok_or_else(|| CompositorError::UnknownEffectType(type_name.to_string()))?;
        self.add_effect_kind(type_name, kind, config)
    }

    /// Appends an already constructed effect.
    pub fn add_effect_kind(
        &mut self,
        type_name: &str,
        kind: EffectKind,
        config: EffectConfig,
    ) -> Result<EffectId, CompositorError> {
        let id = self.stack.push(type_name, kind, config);
        if let Err(err) = self.init_effect(id) {
            if let Some(instance) = self.stack.remove(id) {
                self.destroy(instance)?;
            }
            return Err(err);
        }
        debug!(effect = %id, kind = type_name, "added effect");
        Ok(id)
    }

    fn init_effect(&mut self, id: EffectId) -> Result<(), CompositorError> {
        let Some(instance) = self.stack.get_mut(id) else {
            return Err(CompositorError::UnknownEffect(id));
        };
        let EffectKind::Gpu(effect) = &mut instance.kind else {
            return Ok(());
        };
        let shader = self.shaders.request(&effect.shader());
        self.programs
            .insert(id, ProgramRecord::new(shader.name().to_string(), shader));
        let mut ctx = InitContext {
            effect: id,
            resources: &mut self.resources,
            shaders: &self.shaders,
            settings: self.settings,
        };
        effect.init(&mut ctx).map_err(|err| effect_error(id, err))
    }

    /// Runs the effect's cleanup hook and queues everything it owned.
    pub fn remove_effect(&mut self, id: EffectId) -> Result<(), CompositorError> {
        let instance = self
            .stack
            .remove(id)
            .ok_or(CompositorError::UnknownEffect(id))?;
        self.destroy(instance)?;
        debug!(effect = %id, "removed effect");
        Ok(())
    }

    fn destroy(&mut self, instance: EffectInstance) -> Result<(), CompositorError> {
        let id = instance.id;
        match instance.kind {
            EffectKind::Cpu(mut effect) => effect.cleanup(),
            EffectKind::Gpu(mut effect) => effect
                .cleanup(&mut self.resources)
                .map_err(|err| effect_error(id, err))?,
        }
        self.resources.release_owner(Owner::Effect(id))?;
        self.entries.remove(&id);
        if let Some(mut record) = self.programs.remove(&id) {
            record.release(&mut self.resources)?;
        }
        Ok(())
    }

    pub fn move_effect(&mut self, id: EffectId, index: usize) -> Result<(), CompositorError> {
        if self.stack.move_to(id, index) {
            Ok(())
        } else {
            Err(CompositorError::UnknownEffect(id))
        }
    }

    pub fn set_enabled(&mut self, id: EffectId, enabled: bool) -> Result<(), CompositorError> {
        self.instance_mut(id)?.enabled = enabled;
        Ok(())
    }

    pub fn set_solo(&mut self, id: EffectId, solo: bool) -> Result<(), CompositorError> {
        self.instance_mut(id)?.solo = solo;
        Ok(())
    }

    /// Sets one parameter and returns the value it replaced.
    pub fn update_param(
        &mut self,
        id: EffectId,
        name: &str,
        param: impl Into<Param>,
    ) -> Result<Option<Param>, CompositorError> {
        Ok(self.instance_mut(id)?.config.set(name, param))
    }

    /// Removes every effect, running each cleanup hook.
    pub fn reset(&mut self) -> Result<(), CompositorError> {
        let removed = self.stack.drain();
        let count = removed.len();
        for instance in removed {
            self.destroy(instance)?;
        }
        self.entries.clear();
        debug!(removed = count, "reset effect stack");
        Ok(())
    }

    fn instance_mut(&mut self, id: EffectId) -> Result<&mut EffectInstance, CompositorError> {
        self.stack
            .get_mut(id)
            .ok_or(CompositorError::UnknownEffect(id))
    }

    /// Renders the stack at `time` and returns the texture holding the result.
    pub fn apply_effects(&mut self, time: f64) -> Result<FrameOutput, CompositorError> {
        let Pipeline {
            device,
            resources,
            shaders,
            settings,
            stack,
            programs,
            entries,
            source,
            displayed,
            ..
        } = self;
        let device: &mut dyn GpuDevice = device.as_mut();
        let source = source.as_mut().ok_or(CompositorError::NoSource)?;
        let pixels = Arc::clone(&source.pixels);
        let frame = FrameInfo {
            time,
            width: pixels.width,
            height: pixels.height,
        };

        let mut stats = FrameStats::default();
        let mut chain = fingerprint::seed(source.generation);
        let mut current = Image::Cpu(Arc::clone(&pixels));
        let mut upstream_recomputed = false;
        let mut provisional = false;

        let effective = stack.effective_enabled();
        for (instance, enabled) in stack.iter_mut().zip(effective) {
            let id = instance.id;
            if !enabled {
                chain = fingerprint::fold_disabled(chain, id);
                stats.disabled += 1;
                continue;
            }
            let modulated = instance.config.is_modulated();
            chain = fingerprint::fold_enabled(
                chain,
                id,
                fingerprint::config_hash(&instance.config),
                modulated.then_some(time),
            );

            let cached = entries.get(&id);
            let fresh = !upstream_recomputed
                && cached.is_some_and(|entry| {
                    entry.chain == Some(chain) && (!modulated || entry.time == Some(time))
                });
            if fresh {
                let output = cached
                    .and_then(|entry| entry.output.clone())
                    .ok_or(CompositorError::CacheInvariant(id))?;
                if let Image::Gpu(texture) = &output {
                    resources.check_texture(*texture)?;
                }
                debug!(effect = %id, chain = format_args!("{chain:016x}"), "reusing cached output");
                stats.reused += 1;
                current = output;
                continue;
            }

            let params = instance.config.resolve(time);
            let produced = match &mut instance.kind {
                EffectKind::Cpu(effect) => {
                    let input = match &current {
                        Image::Cpu(buffer) => Arc::clone(buffer),
                        Image::Gpu(texture) => {
                            stats.readbacks += 1;
                            Arc::new(device.read_texture(*texture)?)
                        }
                    };
                    let frame = FrameInfo {
                        width: input.width,
                        height: input.height,
                        ..frame
                    };
                    let output = effect
                        .apply(&input, &params, &frame)
                        .map_err(|err| effect_error(id, err))?;
                    if (output.width, output.height) != (input.width, input.height) {
                        return Err(CompositorError::Effect {
                            effect: id,
                            source: anyhow::anyhow!(
                                "{} returned {}x{} for a {}x{} input",
                                effect.name(),
                                output.width,
                                output.height,
                                input.width,
                                input.height
                            ),
                        });
                    }
                    Some(Image::Cpu(Arc::new(output)))
                }
                EffectKind::Gpu(effect) => {
                    let record = programs.get_mut(&id).ok_or_else(|| {
                        CompositorError::invariant(format!("{id} has no program record"))
                    })?;
                    let (input, width, height) = match &current {
                        Image::Gpu(texture) => {
                            let (width, height) = device.texture_size(*texture)?;
                            (*texture, width, height)
                        }
                        Image::Cpu(buffer) => {
                            let texture = resources.ensure_texture(
                                device,
                                Owner::Effect(id),
                                Role::Input,
                                buffer.width,
                                buffer.height,
                            )?;
                            device.upload_texture(texture, buffer)?;
                            stats.uploads += 1;
                            (texture, buffer.width, buffer.height)
                        }
                    };
                    let frame = FrameInfo {
                        width,
                        height,
                        ..frame
                    };

                    let mut ctx = PassContext {
                        effect: id,
                        device: &mut *device,
                        resources: &mut *resources,
                        shaders: &*shaders,
                        frame,
                        settings: *settings,
                    };
                    let prepared = effect
                        .prepare(&mut ctx, input, &params)
                        .map_err(|err| effect_error(id, err))?;

                    if prepared == RenderOutcome::SoftFault {
                        None
                    } else {
                        let target = resources.ensure_target(
                            device,
                            Owner::Effect(id),
                            Role::Output,
                            width,
                            height,
                        )?;
                        let defines = effect.defines(&params);
                        let uniforms = effect.uniforms(&params, &frame);
                        match record.render(device, resources, input, &target, &uniforms, &defines)? {
                            RenderOutcome::Drawn => Some(Image::Gpu(target.texture)),
                            RenderOutcome::SoftFault => None,
                        }
                    }
                }
            };
            upstream_recomputed = true;

            match produced {
                Some(output) => {
                    entries.insert(
                        id,
                        CacheEntry {
                            output: Some(output.clone()),
                            chain: (!provisional).then_some(chain),
                            time: modulated.then_some(time),
                        },
                    );
                    debug!(
                        effect = %id,
                        chain = format_args!("{chain:016x}"),
                        provisional,
                        domain = %output.domain(),
                        "recomputed"
                    );
                    stats.recomputed += 1;
                    current = output;
                }
                None => {
                    stats.soft_faults += 1;
                    provisional = true;
                    let previous = entries.get_mut(&id).and_then(|entry| {
                        entry.chain = None;
                        entry.output.clone()
                    });
                    if let Some(Image::Gpu(texture)) = &previous {
                        resources.check_texture(*texture)?;
                    }
                    debug!(effect = %id, has_previous = previous.is_some(), "soft fault");
                    if let Some(previous) = previous {
                        current = previous;
                    }
                }
            }
        }

        let (texture, width, height) = match current {
            Image::Gpu(texture) => {
                let (width, height) = device.texture_size(texture)?;
                (texture, width, height)
            }
            Image::Cpu(buffer) if Arc::ptr_eq(&buffer, &pixels) => {
                let texture = resources.ensure_texture(
                    device,
                    Owner::Pipeline,
                    Role::Source,
                    buffer.width,
                    buffer.height,
                )?;
                if source.uploaded != Some(texture) {
                    device.upload_texture(texture, &buffer)?;
                    source.uploaded = Some(texture);
                    stats.uploads += 1;
                }
                (texture, buffer.width, buffer.height)
            }
            Image::Cpu(buffer) => {
                let texture = resources.ensure_texture(
                    device,
                    Owner::Pipeline,
                    Role::Display,
                    buffer.width,
                    buffer.height,
                )?;
                let unchanged = displayed
                    .as_ref()
                    .is_some_and(|(shown, shown_in)| Arc::ptr_eq(shown, &buffer) && *shown_in == texture);
                if !unchanged {
                    device.upload_texture(texture, &buffer)?;
                    stats.uploads += 1;
                }
                let (width, height) = (buffer.width, buffer.height);
                *displayed = Some((buffer, texture));
                (texture, width, height)
            }
        };

        device.submit()?;
        resources.end_frame(device)?;
        debug!(time, %stats, "frame complete");
        Ok(FrameOutput {
            texture,
            width,
            height,
            stats,
        })
    }

    /// [`Pipeline::apply_effects`] followed by a readback of the result.
    pub fn render_frame(&mut self, time: f64) -> Result<(PixelBuffer, FrameStats), CompositorError> {
        let output = self.apply_effects(time)?;
        let pixels = self.device.read_texture(output.texture)?;
        let mut stats = output.stats;
        stats.readbacks += 1;
        Ok((pixels, stats))
    }
}

/// Keeps pipeline errors raised inside effect hooks intact.
fn effect_error(effect: EffectId, err: anyhow::Error) -> CompositorError {
    match err.downcast::<CompositorError>() {
        Ok(err) => err,
        Err(source) => CompositorError::Effect { effect, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessDevice;

    fn pipeline() -> Pipeline {
        let mut pipeline = Pipeline::new(
            Box::new(HeadlessDevice::new()),
            ShaderLibrary::embedded(),
            PipelineSettings::default(),
        );
        pipeline.set_source(PixelBuffer::filled(4, 4, [0.2, 0.4, 0.6, 1.0]));
        pipeline
    }

    #[test]
    fn empty_stack_returns_the_source_uploaded_once() {
        let mut pipeline = pipeline();
        let first = pipeline.apply_effects(0.0).unwrap();
        let second = pipeline.apply_effects(1.0).unwrap();
        assert_eq!(first.texture, second.texture);
        assert_eq!(first.stats.uploads, 1);
        assert_eq!(second.stats.uploads, 0);
        assert_eq!((first.width, first.height), (4, 4));
    }

    #[test]
    fn missing_source_is_an_error() {
        let mut pipeline = Pipeline::new(
            Box::new(HeadlessDevice::new()),
            ShaderLibrary::embedded(),
            PipelineSettings::default(),
        );
        assert!(matches!(pipeline.apply_effects(0.0), Err(CompositorError::NoSource)));
    }

    #[test]
    fn unknown_type_and_id_are_rejected() {
        let mut pipeline = pipeline();
        assert!(matches!(
            pipeline.add_effect("nope", EffectConfig::new()),
            Err(CompositorError::UnknownEffectType(_))
        ));
        assert!(matches!(
            pipeline.remove_effect(EffectId(42)),
            Err(CompositorError::UnknownEffect(_))
        ));
    }

    #[test]
    fn cpu_output_is_displayed_without_reupload() {
        let mut pipeline = pipeline();
        pipeline.add_effect("invert", EffectConfig::new()).unwrap();
        let first = pipeline.apply_effects(0.0).unwrap();
        assert_eq!(first.stats.recomputed, 1);
        assert_eq!(first.stats.uploads, 1);

        let second = pipeline.apply_effects(0.0).unwrap();
        assert_eq!(second.stats.reused, 1);
        assert_eq!(second.stats.uploads, 0);

        let (pixels, _) = pipeline.render_frame(0.0).unwrap();
        let [r, g, b, a] = pixels.pixel(1, 1);
        assert!((r - 0.8).abs() < 1e-6 && (g - 0.6).abs() < 1e-6 && (b - 0.4).abs() < 1e-6);
        assert_eq!(a, 1.0);
    }
}
