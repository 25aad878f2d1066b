//! std140 uniform block layout

use crate::semantics::{BuiltinUniform, TextureSemantic};
use serde::Serialize;

/// Types allowed as members of the synthesized uniform block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum UniformType {
    Float,
    Int,
    Uint,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    UVec2,
    UVec3,
    UVec4,
    Mat4,
}

impl UniformType {
    pub fn from_glsl(name: &str) -> Option<Self> {
        Some(match name {
            "float" => Self::Float,
            "int" => Self::Int,
            "uint" => Self::Uint,
            "bool" => Self::Bool,
            "vec2" => Self::Vec2,
            "vec3" => Self::Vec3,
            "vec4" => Self::Vec4,
            "ivec2" => Self::IVec2,
            "ivec3" => Self::IVec3,
            "ivec4" => Self::IVec4,
            "uvec2" => Self::UVec2,
            "uvec3" => Self::UVec3,
            "uvec4" => Self::UVec4,
            "mat4" | "mat4x4" => Self::Mat4,
            _ => return None,
        })
    }

    pub fn glsl_name(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Uint => "uint",
            // std140 bools are 4 bytes; declared as uint so the host can write them directly
            Self::Bool => "uint",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::IVec2 => "ivec2",
            Self::IVec3 => "ivec3",
            Self::IVec4 => "ivec4",
            Self::UVec2 => "uvec2",
            Self::UVec3 => "uvec3",
            Self::UVec4 => "uvec4",
            Self::Mat4 => "mat4",
        }
    }

    /// Number of 4-byte scalar components
    pub fn components(&self) -> u32 {
        match self {
            Self::Float | Self::Int | Self::Uint | Self::Bool => 1,
            Self::Vec2 | Self::IVec2 | Self::UVec2 => 2,
            Self::Vec3 | Self::IVec3 | Self::UVec3 => 3,
            Self::Vec4 | Self::IVec4 | Self::UVec4 => 4,
            Self::Mat4 => 16,
        }
    }

    /// Scalar kind of the components
    pub fn scalar(&self) -> ScalarKind {
        match self {
            Self::Int | Self::IVec2 | Self::IVec3 | Self::IVec4 => ScalarKind::Int,
            Self::Uint | Self::Bool | Self::UVec2 | Self::UVec3 | Self::UVec4 => ScalarKind::Uint,
            _ => ScalarKind::Float,
        }
    }

    /// std140 base alignment in bytes
    pub fn alignment(&self) -> u32 {
        match self.components() {
            1 => 4,
            2 => 8,
            _ => 16,
        }
    }

    /// Size in bytes
    pub fn size(&self) -> u32 {
        self.components() * 4
    }

    /// Integer-valued types must be `flat` when passed between stages
    pub fn is_integer(&self) -> bool {
        self.scalar() != ScalarKind::Float
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScalarKind {
    Float,
    Int,
    Uint,
}

/// Where the renderer takes a uniform member's value from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UniformSource {
    Builtin(BuiltinUniform),
    /// A global parameter by name
    Parameter(String),
    /// The size of a bound texture, as (w, h, 1/w, 1/h)
    TextureSize(TextureSemantic),
    /// A value fixed at transpile time, one entry per component
    Constant(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniformMember {
    pub name: String,
    pub ty: UniformType,
    /// Byte offset inside the block
    pub offset: u32,
    pub source: UniformSource,
}

/// Layout of a pass's uniform block
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UniformLayout {
    pub members: Vec<UniformMember>,
    /// Total block size, padded to 16 bytes
    pub size: u32,
}

impl UniformLayout {
    /// Lays out members in the given order following std140 rules
    pub fn std140(members: impl IntoIterator<Item = (String, UniformType, UniformSource)>) -> Self {
        let mut offset = 0u32;
        let members: Vec<_> = members
            .into_iter()
            .map(|(name, ty, source)| {
                offset = offset.next_multiple_of(ty.alignment());
                let member = UniformMember { name, ty, offset, source };
                offset += ty.size();
                member
            })
            .collect();
        Self {
            members,
            size: offset.next_multiple_of(16),
        }
    }

    pub fn member(&self, name: &str) -> Option<&UniformMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std140_offsets() {
        let layout = UniformLayout::std140([
            ("MVP".to_string(), UniformType::Mat4, UniformSource::Builtin(BuiltinUniform::Mvp)),
            ("Strength".to_string(), UniformType::Float, UniformSource::Parameter("Strength".into())),
            ("SourceSize".to_string(), UniformType::Vec4, UniformSource::Builtin(BuiltinUniform::SourceSize)),
            ("Dir".to_string(), UniformType::Vec2, UniformSource::Constant(vec![1.0, 0.0])),
            ("Tint".to_string(), UniformType::Vec3, UniformSource::Constant(vec![1.0, 1.0, 1.0])),
            ("FrameCount".to_string(), UniformType::Uint, UniformSource::Builtin(BuiltinUniform::FrameCount)),
        ]);

        let offsets: Vec<_> = layout.members.iter().map(|m| m.offset).collect();
        // vec4 after a float realigns to 16, vec3 realigns to 16, the uint packs into the vec3's tail
        assert_eq!(offsets, vec![0, 64, 80, 96, 112, 124]);
        assert_eq!(layout.size, 128);
    }

    #[test]
    fn test_empty_layout() {
        let layout = UniformLayout::std140(Vec::new());
        assert!(layout.is_empty());
        assert_eq!(layout.size, 0);
    }
}
