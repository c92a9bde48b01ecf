use shaderprep::{DefineSet, ShaderRequest};

use crate::effect::GpuEffect;
use crate::gpu::UniformValue;
use crate::param::ResolvedParams;
use crate::program::UniformSpec;
use crate::types::FrameInfo;

/// Blends towards a colour. `mode` picks the blend at compile time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tint;

fn mode_index(mode: &str) -> i64 {
    match mode {
        "multiply" => 1,
        "screen" => 2,
        "luma" => 0,
        other => {
            tracing::warn!(mode = other, "unknown tint mode, using luma");
            0
        }
    }
}

impl GpuEffect for Tint {
    fn name(&self) -> &str {
        "tint"
    }

    fn shader(&self) -> ShaderRequest {
        ShaderRequest::new("tint.frag")
    }

    fn defines(&self, params: &ResolvedParams) -> DefineSet {
        DefineSet::new().with("TINT_MODE", mode_index(params.text("mode", "luma")))
    }

    fn uniforms(&self, params: &ResolvedParams, _frame: &FrameInfo) -> UniformSpec {
        let color = params.vector("color", [1.0, 0.6, 0.3]).map(|c| c as f32);
        UniformSpec::new()
            .with("u_color", UniformValue::Vec3(color))
            .with("u_amount", UniformValue::Float(params.float("amount", 0.5) as f32))
    }
}
