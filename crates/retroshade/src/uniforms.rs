//! Uniform block packing
//!
//! Fills a pass's synthesized std140 block from the frame state. Member offsets come
//! from the compiler's [`UniformLayout`]; this module only decides the values and writes
//! them with the member's scalar kind.

use crate::backend::MVP;
use retroshade_compiler::graph::Size;
use retroshade_compiler::semantics::{BuiltinUniform, TextureSemantic};
use retroshade_compiler::transpile::{ScalarKind, UniformLayout, UniformSource};
use std::collections::BTreeMap;

/// Values a pass's uniforms may be bound to, for one draw
pub struct UniformContext<'a> {
    /// Frame counter with the pass's `frame_count_mod` already applied
    pub frame_count: u32,
    pub frame_direction: i32,
    pub time: f32,
    pub output_size: Size,
    pub source_size: Size,
    pub original_size: Size,
    pub viewport: Size,
    pub parameters: &'a BTreeMap<String, f32>,
    /// Size of the texture a semantic refers to, as bound for this draw
    pub texture_size: &'a dyn Fn(&TextureSemantic) -> Size,
}

/// Applies a pass's `frame_count_mod` to the frame counter
pub fn frame_count(frame: u64, frame_count_mod: Option<u32>) -> u32 {
    match frame_count_mod {
        Some(modulus) if modulus > 0 => (frame % modulus as u64) as u32,
        _ => frame as u32,
    }
}

fn builtin_values(builtin: BuiltinUniform, context: &UniformContext) -> Vec<f64> {
    let vec4 = |size: Size| size.to_vec4().iter().map(|&v| v as f64).collect();
    match builtin {
        BuiltinUniform::Mvp => MVP.iter().map(|&v| v as f64).collect(),
        BuiltinUniform::OutputSize => vec4(context.output_size),
        BuiltinUniform::SourceSize => vec4(context.source_size),
        BuiltinUniform::OriginalSize => vec4(context.original_size),
        BuiltinUniform::FinalViewportSize => vec4(context.viewport),
        BuiltinUniform::FrameCount => vec![context.frame_count as f64],
        BuiltinUniform::FrameDirection => vec![context.frame_direction as f64],
        BuiltinUniform::Time => vec![context.time as f64],
    }
}

fn source_values(source: &UniformSource, context: &UniformContext) -> Vec<f64> {
    match source {
        UniformSource::Builtin(builtin) => builtin_values(*builtin, context),
        UniformSource::Parameter(name) => vec![context.parameters.get(name).copied().unwrap_or(0.0) as f64],
        UniformSource::TextureSize(semantic) => (context.texture_size)(semantic).to_vec4().iter().map(|&v| v as f64).collect(),
        UniformSource::Constant(values) => values.iter().map(|&v| v as f64).collect(),
    }
}

/// Packs the block of one pass
///
/// Sources with fewer components than their member leave the rest zero; extra
/// components are dropped, so `vec2 InputSize` takes the first half of `SourceSize`.
pub fn pack(layout: &UniformLayout, context: &UniformContext) -> Vec<u8> {
    let mut block = vec![0u8; layout.size as usize];
    for member in &layout.members {
        let values = source_values(&member.source, context);
        let scalar = member.ty.scalar();
        for (component, value) in values.into_iter().take(member.ty.components() as usize).enumerate() {
            let bytes = match scalar {
                ScalarKind::Float => (value as f32).to_le_bytes(),
                ScalarKind::Int => (value as i32).to_le_bytes(),
                ScalarKind::Uint => (value.max(0.0) as u32).to_le_bytes(),
            };
            let offset = member.offset as usize + component * 4;
            block[offset..offset + 4].copy_from_slice(&bytes);
        }
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use retroshade_compiler::transpile::UniformType;

    fn read_f32(block: &[u8], offset: u32) -> f32 {
        let offset = offset as usize;
        bytemuck::pod_read_unaligned(&block[offset..offset + 4])
    }

    fn read_u32(block: &[u8], offset: u32) -> u32 {
        let offset = offset as usize;
        bytemuck::pod_read_unaligned(&block[offset..offset + 4])
    }

    #[test]
    fn test_frame_count_mod() {
        assert_eq!(frame_count(7, None), 7);
        assert_eq!(frame_count(7, Some(3)), 1);
        assert_eq!(frame_count(7, Some(0)), 7);
    }

    #[test]
    fn test_pack_members() {
        let layout = UniformLayout::std140([
            ("MVP".to_string(), UniformType::Mat4, UniformSource::Builtin(BuiltinUniform::Mvp)),
            ("SourceSize".to_string(), UniformType::Vec4, UniformSource::Builtin(BuiltinUniform::SourceSize)),
            ("InputSize".to_string(), UniformType::Vec2, UniformSource::Builtin(BuiltinUniform::SourceSize)),
            ("FrameCount".to_string(), UniformType::Uint, UniformSource::Builtin(BuiltinUniform::FrameCount)),
            ("FrameDirection".to_string(), UniformType::Int, UniformSource::Builtin(BuiltinUniform::FrameDirection)),
            ("GLOW".to_string(), UniformType::Float, UniformSource::Parameter("GLOW".to_string())),
            ("UNSET".to_string(), UniformType::Float, UniformSource::Parameter("UNSET".to_string())),
            ("LUTSize".to_string(), UniformType::Vec4, UniformSource::TextureSize(TextureSemantic::Lookup("LUT".to_string()))),
        ]);
        let parameters = BTreeMap::from([("GLOW".to_string(), 0.5)]);
        let texture_size = |semantic: &TextureSemantic| match semantic {
            TextureSemantic::Lookup(_) => Size::new(16, 8),
            _ => Size::new(1, 1),
        };
        let context = UniformContext {
            frame_count: frame_count(10, Some(4)),
            frame_direction: -1,
            time: 1.5,
            output_size: Size::new(640, 480),
            source_size: Size::new(320, 240),
            original_size: Size::new(320, 240),
            viewport: Size::new(1280, 960),
            parameters: &parameters,
            texture_size: &texture_size,
        };
        let block = pack(&layout, &context);
        assert_eq!(block.len(), layout.size as usize);

        let offset = |name: &str| layout.member(name).map(|m| m.offset).unwrap();
        assert_eq!(read_f32(&block, offset("MVP")), 2.0);
        assert_eq!(read_f32(&block, offset("MVP") + 48), -1.0);
        assert_eq!(read_f32(&block, offset("SourceSize") + 4), 240.0);
        assert_eq!(read_f32(&block, offset("SourceSize") + 8), 1.0 / 320.0);
        assert_eq!(read_f32(&block, offset("InputSize")), 320.0);
        assert_eq!(read_u32(&block, offset("FrameCount")), 2);
        assert_eq!(bytemuck::pod_read_unaligned::<i32>(&block[offset("FrameDirection") as usize..][..4]), -1);
        assert_eq!(read_f32(&block, offset("GLOW")), 0.5);
        assert_eq!(read_f32(&block, offset("UNSET")), 0.0);
        assert_eq!(read_f32(&block, offset("LUTSize") + 4), 8.0);
    }

    #[test]
    fn test_empty_layout() {
        let parameters = BTreeMap::new();
        let context = UniformContext {
            frame_count: 0,
            frame_direction: 1,
            time: 0.0,
            output_size: Size::new(1, 1),
            source_size: Size::new(1, 1),
            original_size: Size::new(1, 1),
            viewport: Size::new(1, 1),
            parameters: &parameters,
            texture_size: &|_| Size::new(1, 1),
        };
        assert!(pack(&UniformLayout::default(), &context).is_empty());
    }
}
