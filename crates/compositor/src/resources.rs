//! GPU textures and framebuffers, owned on behalf of effects and probes.
//!
//! Every handle belongs to exactly one owner and is keyed by `(owner, role)`.
//! Releasing a handle only queues it; the queue is drained by
//! [`ResourceManager::end_frame`] once the frame's draws have been submitted,
//! so nothing is destroyed while a draw that samples it is still in flight.
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::CompositorError;
use crate::gpu::{FramebufferHandle, GpuDevice, ProgramHandle, TextureHandle};
use crate::types::{EffectId, PixelBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Effect(EffectId),
    Probe(ProbeId),
    Pipeline,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Effect(id) => write!(f, "{id}"),
            Owner::Probe(id) => write!(f, "probe#{}", id.0),
            Owner::Pipeline => f.write_str("pipeline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Render target an effect or probe draws into.
    Output,
    /// Upload destination for a CPU buffer entering a GPU effect.
    Input,
    /// The pipeline's source image.
    Source,
    /// CPU results materialized for display.
    Display,
}

/// A texture with a framebuffer bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub texture: TextureHandle,
    pub framebuffer: FramebufferHandle,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    texture: TextureHandle,
    framebuffer: Option<FramebufferHandle>,
    width: u32,
    height: u32,
}

#[derive(Debug, Default)]
struct DestroyQueue {
    framebuffers: Vec<FramebufferHandle>,
    textures: Vec<TextureHandle>,
    programs: Vec<ProgramHandle>,
}

impl DestroyQueue {
    fn len(&self) -> usize {
        self.framebuffers.len() + self.textures.len() + self.programs.len()
    }
}

#[derive(Debug, Default)]
pub struct ResourceManager {
    slots: HashMap<(Owner, Role), Slot>,
    luts: HashMap<(Owner, String), TextureHandle>,
    live_textures: HashSet<TextureHandle>,
    live_framebuffers: HashSet<FramebufferHandle>,
    queue: DestroyQueue,
    next_probe: u64,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_probe_id(&mut self) -> ProbeId {
        self.next_probe += 1;
        ProbeId(self.next_probe)
    }

    /// Returns the render target for `(owner, role)`, creating it or
    /// replacing it when the requested size differs.
    pub fn ensure_target(
        &mut self,
        device: &mut dyn GpuDevice,
        owner: Owner,
        role: Role,
        width: u32,
        height: u32,
    ) -> Result<RenderTarget, CompositorError> {
        let texture = self.ensure_texture(device, owner, role, width, height)?;
        let Some(slot) = self.slots.get_mut(&(owner, role)) else {
            return Err(CompositorError::invariant(format!(
                "{owner} lost its {role:?} slot while creating it"
            )));
        };
        let framebuffer = match slot.framebuffer {
            Some(framebuffer) => framebuffer,
            None => {
                let framebuffer = device.create_framebuffer(texture)?;
                slot.framebuffer = Some(framebuffer);
                self.live_framebuffers.insert(framebuffer);
                framebuffer
            }
        };
        Ok(RenderTarget {
            texture,
            framebuffer,
            width,
            height,
        })
    }

    /// Returns the texture for `(owner, role)`, creating it or replacing it
    /// when the requested size differs.
    pub fn ensure_texture(
        &mut self,
        device: &mut dyn GpuDevice,
        owner: Owner,
        role: Role,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle, CompositorError> {
        if let Some(slot) = self.slots.get(&(owner, role)) {
            if (slot.width, slot.height) == (width, height) {
                return Ok(slot.texture);
            }
            tracing::debug!(%owner, ?role, width, height, "resizing texture");
            if let Some(stale) = self.slots.remove(&(owner, role)) {
                self.retire_slot(stale)?;
            }
        }
        let texture = device.create_texture(width, height)?;
        self.live_textures.insert(texture);
        self.slots.insert(
            (owner, role),
            Slot {
                texture,
                framebuffer: None,
                width,
                height,
            },
        );
        Ok(texture)
    }

    pub fn texture(&self, owner: Owner, role: Role) -> Option<TextureHandle> {
        self.slots.get(&(owner, role)).map(|slot| slot.texture)
    }

    /// LUT texture cached under `name` for `owner`, built on first use.
    pub fn lut<F>(
        &mut self,
        device: &mut dyn GpuDevice,
        owner: Owner,
        name: &str,
        build: F,
    ) -> Result<TextureHandle, CompositorError>
    where
        F: FnOnce() -> anyhow::Result<PixelBuffer>,
    {
        if let Some(texture) = self.luts.get(&(owner, name.to_string())) {
            return Ok(*texture);
        }
        let pixels = build().map_err(|err| {
            CompositorError::Device(format!("failed to build LUT `{name}` for {owner}: {err:#}"))
        })?;
        let texture = device.create_texture(pixels.width, pixels.height)?;
        self.live_textures.insert(texture);
        device.upload_texture(texture, &pixels)?;
        tracing::debug!(%owner, lut = name, "created LUT texture");
        self.luts.insert((owner, name.to_string()), texture);
        Ok(texture)
    }

    /// Queues every texture, framebuffer and LUT held for `owner`.
    /// Releasing an owner with nothing held is a no-op.
    pub fn release_owner(&mut self, owner: Owner) -> Result<(), CompositorError> {
        let keys: Vec<_> = self
            .slots
            .keys()
            .filter(|(slot_owner, _)| *slot_owner == owner)
            .copied()
            .collect();
        for key in keys {
            if let Some(slot) = self.slots.remove(&key) {
                self.retire_slot(slot)?;
            }
        }
        let luts: Vec<_> = self
            .luts
            .keys()
            .filter(|(lut_owner, _)| *lut_owner == owner)
            .cloned()
            .collect();
        for key in luts {
            if let Some(texture) = self.luts.remove(&key) {
                self.retire_texture(texture)?;
            }
        }
        Ok(())
    }

    pub fn retire_program(&mut self, program: ProgramHandle) -> Result<(), CompositorError> {
        if self.queue.programs.contains(&program) {
            return Err(CompositorError::invariant(format!(
                "{program} released twice"
            )));
        }
        self.queue.programs.push(program);
        Ok(())
    }

    /// Fails unless `texture` is held by some owner and not queued.
    pub fn check_texture(&self, texture: TextureHandle) -> Result<(), CompositorError> {
        if self.live_textures.contains(&texture) {
            Ok(())
        } else {
            Err(CompositorError::invariant(format!(
                "{texture} is not held by the resource manager"
            )))
        }
    }

    pub fn live_texture_count(&self) -> usize {
        self.live_textures.len()
    }

    pub fn pending_destroy_count(&self) -> usize {
        self.queue.len()
    }

    /// Destroys everything released during the frame. Call after
    /// [`GpuDevice::submit`].
    pub fn end_frame(&mut self, device: &mut dyn GpuDevice) -> Result<usize, CompositorError> {
        let queue = std::mem::take(&mut self.queue);
        let destroyed = queue.len();
        for framebuffer in queue.framebuffers {
            device.delete_framebuffer(framebuffer)?;
        }
        for texture in queue.textures {
            device.delete_texture(texture)?;
        }
        for program in queue.programs {
            device.delete_program(program)?;
        }
        if destroyed > 0 {
            tracing::debug!(destroyed, "drained deferred destroy queue");
        }
        Ok(destroyed)
    }

    fn retire_slot(&mut self, slot: Slot) -> Result<(), CompositorError> {
        if let Some(framebuffer) = slot.framebuffer {
            if !self.live_framebuffers.remove(&framebuffer) {
                return Err(CompositorError::invariant(format!(
                    "{framebuffer} released twice"
                )));
            }
            self.queue.framebuffers.push(framebuffer);
        }
        self.retire_texture(slot.texture)
    }

    fn retire_texture(&mut self, texture: TextureHandle) -> Result<(), CompositorError> {
        if !self.live_textures.remove(&texture) {
            return Err(CompositorError::invariant(format!("{texture} released twice")));
        }
        self.queue.textures.push(texture);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessDevice;

    #[test]
    fn release_is_deferred_until_end_of_frame() {
        let mut device = HeadlessDevice::new();
        let mut resources = ResourceManager::new();
        let owner = Owner::Effect(EffectId(1));
        let target = resources
            .ensure_target(&mut device, owner, Role::Output, 4, 4)
            .unwrap();

        resources.release_owner(owner).unwrap();
        assert!(device.is_live_texture(target.texture));
        assert!(resources.check_texture(target.texture).is_err());
        assert_eq!(resources.pending_destroy_count(), 2);

        resources.end_frame(&mut device).unwrap();
        assert!(!device.is_live_texture(target.texture));
        assert!(!device.is_live_framebuffer(target.framebuffer));
        assert_eq!(device.stats().textures_deleted, 1);
    }

    #[test]
    fn release_owner_twice_destroys_once() {
        let mut device = HeadlessDevice::new();
        let mut resources = ResourceManager::new();
        let owner = Owner::Effect(EffectId(2));
        resources
            .ensure_target(&mut device, owner, Role::Output, 2, 2)
            .unwrap();
        resources.release_owner(owner).unwrap();
        resources.release_owner(owner).unwrap();
        resources.end_frame(&mut device).unwrap();
        assert_eq!(device.stats().textures_deleted, 1);
        assert_eq!(device.stats().framebuffers_deleted, 1);
    }

    #[test]
    fn same_size_reuses_and_resize_replaces() {
        let mut device = HeadlessDevice::new();
        let mut resources = ResourceManager::new();
        let owner = Owner::Effect(EffectId(3));
        let first = resources
            .ensure_target(&mut device, owner, Role::Output, 8, 8)
            .unwrap();
        let again = resources
            .ensure_target(&mut device, owner, Role::Output, 8, 8)
            .unwrap();
        assert_eq!(first, again);

        let resized = resources
            .ensure_target(&mut device, owner, Role::Output, 16, 8)
            .unwrap();
        assert_ne!(first.texture, resized.texture);
        assert_eq!(resources.pending_destroy_count(), 2);
        resources.end_frame(&mut device).unwrap();
        assert_eq!(device.texture_size(resized.texture).unwrap(), (16, 8));
    }

    #[test]
    fn luts_are_cached_per_owner_and_name() {
        let mut device = HeadlessDevice::new();
        let mut resources = ResourceManager::new();
        let owner = Owner::Effect(EffectId(4));
        let mut builds = 0;
        for _ in 0..3 {
            resources
                .lut(&mut device, owner, "warm", || {
                    builds += 1;
                    Ok(PixelBuffer::new(16, 1))
                })
                .unwrap();
        }
        assert_eq!(builds, 1);
        resources.release_owner(owner).unwrap();
        resources.end_frame(&mut device).unwrap();
        assert_eq!(device.stats().live_textures(), 0);
    }

    #[test]
    fn program_retired_twice_is_rejected() {
        let mut resources = ResourceManager::new();
        resources.retire_program(ProgramHandle(9)).unwrap();
        assert!(matches!(
            resources.retire_program(ProgramHandle(9)),
            Err(CompositorError::ResourceInvariant(_))
        ));
    }
}
