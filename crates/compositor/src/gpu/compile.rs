//! Fragment wrapping for the wgpu backend.
//!
//! Effect shaders are written GL-style: loose `uniform float u_amount;`
//! declarations and `uniform sampler2D u_image;` samplers. Vulkan-flavoured
//! GLSL needs every resource in a descriptor set, so before compilation the
//! loose uniforms are gathered into one generated `std140` block and each
//! sampler is split into a texture/sampler pair. Macros alias the declared
//! names so the shader body is untouched.
use std::fmt::Write as _;

use super::UniformValue;

/// Set 0 binding 0 holds the generated parameter block.
pub const PARAMS_BINDING: u32 = 0;
const PARAMS_BLOCK: &str = "VandalParams";
const PARAMS_INSTANCE: &str = "vandal_params";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
}

impl FieldKind {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "float" => Some(FieldKind::Float),
            "int" => Some(FieldKind::Int),
            "bool" => Some(FieldKind::Bool),
            "vec2" => Some(FieldKind::Vec2),
            "vec3" => Some(FieldKind::Vec3),
            "vec4" => Some(FieldKind::Vec4),
            _ => None,
        }
    }

    /// std140 (size, alignment) of a single, non-array member.
    fn size_align(self) -> (u32, u32) {
        match self {
            FieldKind::Float | FieldKind::Int | FieldKind::Bool => (4, 4),
            FieldKind::Vec2 => (8, 8),
            FieldKind::Vec3 => (12, 16),
            FieldKind::Vec4 => (16, 16),
        }
    }

    fn glsl_member_type(self) -> &'static str {
        match self {
            FieldKind::Float => "float",
            FieldKind::Int | FieldKind::Bool => "int",
            FieldKind::Vec2 => "vec2",
            FieldKind::Vec3 => "vec3",
            FieldKind::Vec4 => "vec4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub kind: FieldKind,
    pub offset: u32,
    /// `Some(n)` for `name[n]` declarations.
    pub array_len: Option<u32>,
}

/// std140 layout of the generated parameter block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformLayout {
    pub fields: Vec<UniformField>,
    pub size: u32,
}

impl UniformLayout {
    fn push(&mut self, name: &str, kind: FieldKind, array_len: Option<u32>) {
        let (size, align) = kind.size_align();
        let (size, align) = match array_len {
            Some(len) => (16 * len, 16),
            None => (size, align),
        };
        let offset = align_to(self.size, align);
        self.fields.push(UniformField {
            name: name.to_string(),
            kind,
            offset,
            array_len,
        });
        self.size = offset + size;
    }

    fn finish(&mut self) {
        self.size = align_to(self.size.max(16), 16);
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Writes `value` into `bytes` at the member's offset.
    ///
    /// Returns `Ok(false)` when the shader declares no such uniform, matching
    /// GL's silent handling of a `-1` location.
    pub fn write(&self, name: &str, value: &UniformValue, bytes: &mut [u8]) -> Result<bool, String> {
        let Some(field) = self.field(name) else {
            return Ok(false);
        };
        let mismatch = || format!("uniform `{name}` is {:?}, got {value:?}", field.kind);
        let base = field.offset as usize;
        match (field.array_len, value) {
            (None, UniformValue::Float(v)) if field.kind == FieldKind::Float => {
                put_f32(bytes, base, &[*v])
            }
            (None, UniformValue::Int(v)) if matches!(field.kind, FieldKind::Int | FieldKind::Bool) => {
                put_i32(bytes, base, *v)
            }
            (None, UniformValue::Bool(v)) if matches!(field.kind, FieldKind::Int | FieldKind::Bool) => {
                put_i32(bytes, base, i32::from(*v))
            }
            (None, UniformValue::Vec2(v)) if field.kind == FieldKind::Vec2 => put_f32(bytes, base, v),
            (None, UniformValue::Vec3(v)) if field.kind == FieldKind::Vec3 => put_f32(bytes, base, v),
            (None, UniformValue::Vec4(v)) if field.kind == FieldKind::Vec4 => put_f32(bytes, base, v),
            (Some(len), UniformValue::FloatArray(values)) if field.kind == FieldKind::Float => {
                for (index, v) in values.iter().take(len as usize).enumerate() {
                    put_f32(bytes, base + index * 16, &[*v]);
                }
            }
            (Some(len), UniformValue::Vec4Array(values)) if field.kind == FieldKind::Vec4 => {
                for (index, v) in values.iter().take(len as usize).enumerate() {
                    put_f32(bytes, base + index * 16, v);
                }
            }
            _ => return Err(mismatch()),
        }
        Ok(true)
    }
}

fn put_f32(bytes: &mut [u8], offset: usize, values: &[f32]) {
    let raw: &[u8] = bytemuck::cast_slice(values);
    bytes[offset..offset + raw.len()].copy_from_slice(raw);
}

fn put_i32(bytes: &mut [u8], offset: usize, value: i32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn align_to(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// The rewritten source plus everything the device needs to bind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedFragment {
    pub source: String,
    pub layout: UniformLayout,
    /// Sampler names in declaration order; index `k` is texture unit `k`.
    pub samplers: Vec<String>,
    /// Explicit uniform blocks by block name with their set 0 binding.
    pub blocks: Vec<(String, u32)>,
}

pub fn wrap_fragment(source: &str) -> Result<WrappedFragment, String> {
    let mut layout = UniformLayout::default();
    let mut samplers = Vec::new();
    let mut blocks = Vec::new();
    let mut body = String::new();

    for (index, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("#version") {
            continue;
        }
        if trimmed.starts_with("layout") && trimmed.contains(" uniform ") {
            if let Some(block) = explicit_block(trimmed) {
                let (name, binding) = block.map_err(|message| format!("line {}: {message}", index + 1))?;
                blocks.push((name, binding));
            }
            body.push_str(line);
            body.push('\n');
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("uniform ") {
            match loose_uniform(rest).map_err(|message| format!("line {}: {message}", index + 1))? {
                Loose::Sampler(name) => samplers.push(name),
                Loose::Value { name, kind, array_len } => {
                    if layout.field(&name).is_some() {
                        return Err(format!("line {}: uniform `{name}` declared twice", index + 1));
                    }
                    layout.push(&name, kind, array_len);
                }
            }
            // Keep line numbers stable for compiler diagnostics.
            body.push('\n');
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }
    layout.finish();

    let mut header = String::from("#version 450\n");
    let _ = writeln!(
        header,
        "layout(std140, set = 0, binding = {PARAMS_BINDING}) uniform {PARAMS_BLOCK} {{"
    );
    if layout.fields.is_empty() {
        header.push_str("    float vandal_pad;\n");
    }
    for field in &layout.fields {
        let suffix = field.array_len.map(|len| format!("[{len}]")).unwrap_or_default();
        let _ = writeln!(
            header,
            "    {} m_{}{suffix};",
            field.kind.glsl_member_type(),
            field.name
        );
    }
    let _ = writeln!(header, "}} {PARAMS_INSTANCE};");
    for field in &layout.fields {
        if field.kind == FieldKind::Bool && field.array_len.is_none() {
            let _ = writeln!(
                header,
                "#define {0} ({PARAMS_INSTANCE}.m_{0} != 0)",
                field.name
            );
        } else {
            let _ = writeln!(header, "#define {0} {PARAMS_INSTANCE}.m_{0}", field.name);
        }
    }
    for (unit, name) in samplers.iter().enumerate() {
        let _ = writeln!(
            header,
            "layout(set = 1, binding = {}) uniform texture2D vandal_tex{unit};",
            unit * 2
        );
        let _ = writeln!(
            header,
            "layout(set = 1, binding = {}) uniform sampler vandal_smp{unit};",
            unit * 2 + 1
        );
        let _ = writeln!(
            header,
            "#define {name} sampler2D(vandal_tex{unit}, vandal_smp{unit})"
        );
    }

    Ok(WrappedFragment {
        source: format!("{header}#line 1\n{body}"),
        layout,
        samplers,
        blocks,
    })
}

enum Loose {
    Sampler(String),
    Value {
        name: String,
        kind: FieldKind,
        array_len: Option<u32>,
    },
}

fn loose_uniform(rest: &str) -> Result<Loose, String> {
    let declaration = rest
        .strip_suffix(';')
        .ok_or_else(|| format!("expected `;` after uniform declaration `{rest}`"))?;
    let mut tokens = declaration
        .split_whitespace()
        .filter(|token| !matches!(*token, "highp" | "mediump" | "lowp"));
    let ty = tokens.next().ok_or("uniform declaration has no type")?;
    let declarator: String = tokens.collect();
    if declarator.is_empty() {
        return Err(format!("uniform of type `{ty}` has no name"));
    }
    let (name, array_len) = match declarator.split_once('[') {
        Some((name, len)) => {
            let len = len
                .strip_suffix(']')
                .and_then(|len| len.trim().parse::<u32>().ok())
                .ok_or_else(|| format!("bad array length in `{declarator}`"))?;
            (name.to_string(), Some(len))
        }
        None => (declarator, None),
    };
    if ty == "sampler2D" {
        if array_len.is_some() {
            return Err(format!("sampler arrays are not supported (`{name}`)"));
        }
        return Ok(Loose::Sampler(name));
    }
    let kind = FieldKind::parse(ty).ok_or_else(|| format!("unsupported uniform type `{ty}`"))?;
    if array_len.is_some() && !matches!(kind, FieldKind::Float | FieldKind::Vec4) {
        return Err(format!("only float and vec4 uniform arrays are supported (`{name}`)"));
    }
    Ok(Loose::Value {
        name,
        kind,
        array_len,
    })
}

/// Parses `layout(std140, set = 0, binding = N) uniform Name {`.
fn explicit_block(line: &str) -> Option<Result<(String, u32), String>> {
    let (qualifiers, rest) = line.strip_prefix("layout")?.trim_start().strip_prefix('(')?.split_once(')')?;
    let rest = rest.trim_start().strip_prefix("uniform")?;
    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    let mut binding = None;
    let mut set = 0;
    for qualifier in qualifiers.split(',') {
        if let Some((key, value)) = qualifier.split_once('=') {
            let value = value.trim().parse::<u32>().ok();
            match key.trim() {
                "binding" => binding = value,
                "set" => set = value.unwrap_or(u32::MAX),
                _ => {}
            }
        }
    }
    Some(match binding {
        _ if set != 0 => Err(format!("uniform block `{name}` must live in set 0")),
        Some(0) => Err(format!("uniform block `{name}` uses reserved binding 0")),
        Some(binding) => Ok((name, binding)),
        None => Err(format!("uniform block `{name}` has no binding")),
    })
}

/// Full-screen triangle; `v_uv` has its origin at the top-left texel.
pub const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    vec2 pos = positions[uint(gl_VertexIndex)];
    v_uv = vec2(pos.x * 0.5 + 0.5, 0.5 - pos.y * 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;

    const TINT: &str = "#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;
uniform sampler2D u_image;
uniform float u_amount;
uniform vec3 u_color;
uniform bool u_flip;
void main() {
    outColor = texture(u_image, v_uv);
}
";

    #[test]
    fn loose_uniforms_become_a_std140_block() {
        let wrapped = wrap_fragment(TINT).unwrap();
        let offsets: Vec<_> = wrapped
            .layout
            .fields
            .iter()
            .map(|field| (field.name.as_str(), field.offset))
            .collect();
        assert_eq!(offsets, vec![("u_amount", 0), ("u_color", 16), ("u_flip", 28)]);
        assert_eq!(wrapped.layout.size, 32);
        assert!(wrapped.source.contains("#define u_amount vandal_params.m_u_amount"));
        assert!(wrapped.source.contains("#define u_flip (vandal_params.m_u_flip != 0)"));
        assert!(!wrapped.source.contains("uniform float u_amount;"));
        assert_eq!(wrapped.source.matches("#version").count(), 1);
    }

    #[test]
    fn samplers_take_units_in_declaration_order() {
        let wrapped = wrap_fragment(
            "uniform sampler2D u_image;\nuniform sampler2D u_lut;\nvoid main() {}\n",
        )
        .unwrap();
        assert_eq!(wrapped.samplers, vec!["u_image", "u_lut"]);
        assert!(wrapped.source.contains("binding = 3) uniform sampler vandal_smp1;"));
        assert!(wrapped
            .source
            .contains("#define u_lut sampler2D(vandal_tex1, vandal_smp1)"));
        assert!(wrapped.source.contains("float vandal_pad;"));
    }

    #[test]
    fn arrays_use_sixteen_byte_stride() {
        let wrapped = wrap_fragment("uniform float u_weights[3];\nuniform vec2 u_scale;\n").unwrap();
        assert_eq!(wrapped.layout.fields[1].offset, 48);
        assert_eq!(wrapped.layout.size, 64);

        let mut bytes = vec![0u8; wrapped.layout.size as usize];
        wrapped
            .layout
            .write("u_weights", &UniformValue::FloatArray(vec![1.0, 2.0, 3.0]), &mut bytes)
            .unwrap();
        let floats: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!((floats[0], floats[4], floats[8]), (1.0, 2.0, 3.0));
    }

    #[test]
    fn explicit_blocks_are_recorded() {
        let wrapped = wrap_fragment(
            "layout(std140, set = 0, binding = 1) uniform Palette {\n    vec4 colors[16];\n} palette;\n",
        )
        .unwrap();
        assert_eq!(wrapped.blocks, vec![("Palette".to_string(), 1)]);
        assert!(wrap_fragment("layout(std140, set = 0, binding = 0) uniform Clash {\n").is_err());
    }

    #[test]
    fn mismatched_and_unknown_writes() {
        let wrapped = wrap_fragment(TINT).unwrap();
        let mut bytes = vec![0u8; wrapped.layout.size as usize];
        assert!(wrapped
            .layout
            .write("u_amount", &UniformValue::Vec2([0.0, 1.0]), &mut bytes)
            .is_err());
        assert_eq!(
            wrapped.layout.write("u_missing", &UniformValue::Float(1.0), &mut bytes),
            Ok(false)
        );
        assert_eq!(
            wrapped.layout.write("u_flip", &UniformValue::Bool(true), &mut bytes),
            Ok(true)
        );
        assert_eq!(&bytes[28..32], &1i32.to_ne_bytes());
    }

    #[test]
    fn unsupported_types_are_rejected() {
        assert!(wrap_fragment("uniform mat4 u_matrix;\n").is_err());
        assert!(wrap_fragment("uniform float u_missing_semicolon\n").is_err());
    }
}
