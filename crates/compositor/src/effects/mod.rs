//! Built-in effects.
mod apply_lut;
mod auto_levels;
mod invert;
mod palette_map;
mod posterize;
mod tint;

pub use apply_lut::{gradient_lut, ApplyLut, GRADIENTS};
pub use auto_levels::AutoLevels;
pub use invert::Invert;
pub use palette_map::PaletteMap;
pub use posterize::Posterize;
pub use tint::Tint;

use crate::effect::{EffectKind, EffectRegistry};

pub(crate) fn register_builtin(registry: &mut EffectRegistry) {
    registry.register("invert", || EffectKind::Cpu(Box::new(Invert)));
    registry.register("posterize", || EffectKind::Cpu(Box::new(Posterize)));
    registry.register("tint", || EffectKind::Gpu(Box::new(Tint)));
    registry.register("auto_levels", || EffectKind::Gpu(Box::<AutoLevels>::default()));
    registry.register("palette_map", || EffectKind::Gpu(Box::<PaletteMap>::default()));
    registry.register("apply_lut", || EffectKind::Gpu(Box::<ApplyLut>::default()));
}
