//! Built-in symbol tables
//!
//! Shaders refer to their inputs through conventional names (`Source`, `PassOutput1`,
//! `OriginalHistory2`, an alias declared by another pass, a lookup texture) and to
//! per-frame values through implicit uniforms (`OutputSize`, `FrameCount`, ...). This
//! module is the single place those names are resolved, so the parser, transpiler and
//! graph builder can never disagree about what a name means.

use crate::transpile::UniformType;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// What a sampler (or a `<Sampler>Size` uniform) refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TextureSemantic {
    /// The primary input of the current frame
    Original,
    /// The previous pass's output in document order (the primary input for pass 0)
    Source,
    /// The primary input `depth` frames back
    OriginalHistory(u32),
    /// A pass's output from the current frame
    PassOutput(usize),
    /// A pass's output from the previous frame
    PassFeedback(usize),
    /// A pass's output `depth` frames back
    PassHistory { pass: usize, depth: u32 },
    /// A static lookup texture declared by the preset
    Lookup(String),
}

impl TextureSemantic {
    /// Returns the pass whose same-frame output this semantic reads, if any
    pub fn same_frame_pass(&self) -> Option<usize> {
        match self {
            Self::PassOutput(pass) => Some(*pass),
            _ => None,
        }
    }
}

impl fmt::Display for TextureSemantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => write!(f, "Original"),
            Self::Source => write!(f, "Source"),
            Self::OriginalHistory(depth) => write!(f, "OriginalHistory{depth}"),
            Self::PassOutput(pass) => write!(f, "PassOutput{pass}"),
            Self::PassFeedback(pass) => write!(f, "PassFeedback{pass}"),
            Self::PassHistory { pass, depth } => write!(f, "PassHistory{pass}_{depth}"),
            Self::Lookup(name) => write!(f, "{name}"),
        }
    }
}

/// Values the renderer refreshes every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BuiltinUniform {
    /// Model-view-projection matrix for the full-screen quad
    Mvp,
    /// Size of the target the pass renders into
    OutputSize,
    /// Size of the pass's `Source` input
    SourceSize,
    /// Size of the primary input
    OriginalSize,
    /// Size of the canvas
    FinalViewportSize,
    FrameCount,
    /// 1 when playing forward, -1 when rewinding
    FrameDirection,
    /// Seconds since activation
    Time,
}

/// Implicit uniform names, their meaning and the type synthesized when undeclared
const BUILTIN_UNIFORMS: &[(&str, BuiltinUniform, UniformType)] = &[
    ("MVP", BuiltinUniform::Mvp, UniformType::Mat4),
    ("MVPMatrix", BuiltinUniform::Mvp, UniformType::Mat4),
    ("OutputSize", BuiltinUniform::OutputSize, UniformType::Vec4),
    ("SourceSize", BuiltinUniform::SourceSize, UniformType::Vec4),
    ("InputSize", BuiltinUniform::SourceSize, UniformType::Vec2),
    ("TextureSize", BuiltinUniform::SourceSize, UniformType::Vec2),
    ("OriginalSize", BuiltinUniform::OriginalSize, UniformType::Vec4),
    ("OrigInputSize", BuiltinUniform::OriginalSize, UniformType::Vec2),
    ("OrigTextureSize", BuiltinUniform::OriginalSize, UniformType::Vec2),
    ("FinalViewportSize", BuiltinUniform::FinalViewportSize, UniformType::Vec4),
    ("FrameCount", BuiltinUniform::FrameCount, UniformType::Uint),
    ("FrameDirection", BuiltinUniform::FrameDirection, UniformType::Int),
    ("Time", BuiltinUniform::Time, UniformType::Float),
];

/// Looks up an implicit uniform by name
///
/// # Returns
/// The built-in and the type to synthesize when the shader does not declare it
pub fn builtin_uniform(name: &str) -> Option<(BuiltinUniform, UniformType)> {
    BUILTIN_UNIFORMS.iter().find(|(n, _, _)| *n == name).map(|(_, builtin, ty)| (*builtin, *ty))
}

/// Parses `<prefix><digits>` and returns the number
fn numbered(name: &str, prefix: &str) -> Option<u32> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parses `<prefix><digits>_<digits>`
fn numbered_pair(name: &str, prefix: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix(prefix)?;
    let (first, second) = rest.split_once('_')?;
    Some((numbered(first, "")?, numbered(second, "")?))
}

/// Returns true if `name` is one of the fixed texture names a pass alias must not shadow
pub fn is_reserved_texture_name(name: &str) -> bool {
    resolve_fixed_texture(name).is_some() || builtin_uniform(name).is_some()
}

/// Resolves names that do not depend on the preset
fn resolve_fixed_texture(name: &str) -> Option<TextureSemantic> {
    match name {
        "Original" | "OrigTexture" => return Some(TextureSemantic::Original),
        "Source" | "Texture" => return Some(TextureSemantic::Source),
        "PrevTexture" => return Some(TextureSemantic::OriginalHistory(1)),
        _ => {}
    }
    if let Some(depth) = numbered(name, "OriginalHistory") {
        return Some(if depth == 0 { TextureSemantic::Original } else { TextureSemantic::OriginalHistory(depth) });
    }
    if let Some(pass) = numbered(name, "PassOutput") {
        return Some(TextureSemantic::PassOutput(pass as usize));
    }
    if let Some(pass) = numbered(name, "PassFeedback") {
        return Some(TextureSemantic::PassFeedback(pass as usize));
    }
    if let Some((pass, depth)) = numbered_pair(name, "PassHistory") {
        return Some(if depth == 0 {
            TextureSemantic::PassOutput(pass as usize)
        } else {
            TextureSemantic::PassHistory { pass: pass as usize, depth }
        });
    }
    // Legacy spelling: Prev1Texture is two frames back
    if let Some(n) = name.strip_prefix("Prev").and_then(|rest| rest.strip_suffix("Texture")).and_then(|n| numbered(n, "")) {
        return Some(TextureSemantic::OriginalHistory(n + 1));
    }
    None
}

/// Preset-dependent names: pass aliases and lookup textures
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    aliases: Vec<Option<String>>,
    textures: BTreeSet<String>,
}

impl NameTable {
    /// # Arguments
    /// * `aliases` - Alias of each pass, indexed by pass
    /// * `textures` - Names of the declared lookup textures
    pub fn new(aliases: Vec<Option<String>>, textures: impl IntoIterator<Item = String>) -> Self {
        Self {
            aliases,
            textures: textures.into_iter().collect(),
        }
    }

    /// Returns the pass that declared `alias`
    pub fn alias_pass(&self, alias: &str) -> Option<usize> {
        self.aliases.iter().position(|a| a.as_deref() == Some(alias))
    }

    /// Resolves a sampler name
    pub fn resolve_texture(&self, name: &str) -> Option<TextureSemantic> {
        if let Some(semantic) = resolve_fixed_texture(name) {
            return Some(semantic);
        }
        if let Some(pass) = self.alias_pass(name) {
            return Some(TextureSemantic::PassOutput(pass));
        }
        for (pass, alias) in self.aliases.iter().enumerate() {
            let Some(alias) = alias else { continue };
            let Some(rest) = name.strip_prefix(alias.as_str()) else { continue };
            if rest == "Feedback" {
                return Some(TextureSemantic::PassFeedback(pass));
            }
            if let Some(depth) = numbered(rest, "History") {
                return Some(if depth == 0 {
                    TextureSemantic::PassOutput(pass)
                } else {
                    TextureSemantic::PassHistory { pass, depth }
                });
            }
        }
        if self.textures.contains(name) {
            return Some(TextureSemantic::Lookup(name.to_string()));
        }
        None
    }

    /// Resolves a `<Sampler>Size` uniform name to the texture whose size it carries
    pub fn resolve_texture_size(&self, name: &str) -> Option<TextureSemantic> {
        if let Some(pass) = numbered(name, "PassOutputSize") {
            return Some(TextureSemantic::PassOutput(pass as usize));
        }
        if let Some(pass) = numbered(name, "PassFeedbackSize") {
            return Some(TextureSemantic::PassFeedback(pass as usize));
        }
        if let Some(depth) = numbered(name, "OriginalHistorySize") {
            return Some(if depth == 0 { TextureSemantic::Original } else { TextureSemantic::OriginalHistory(depth) });
        }
        if let Some((pass, depth)) = numbered_pair(name, "PassHistorySize") {
            return Some(if depth == 0 {
                TextureSemantic::PassOutput(pass as usize)
            } else {
                TextureSemantic::PassHistory { pass: pass as usize, depth }
            });
        }
        let base = name.strip_suffix("Size")?;
        if base.is_empty() {
            return None;
        }
        self.resolve_texture(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NameTable {
        NameTable::new(vec![None, Some("Glow".to_string()), None], ["Bezel".to_string()])
    }

    #[test]
    fn test_fixed_names() {
        let table = table();
        assert_eq!(table.resolve_texture("Source"), Some(TextureSemantic::Source));
        assert_eq!(table.resolve_texture("Original"), Some(TextureSemantic::Original));
        assert_eq!(table.resolve_texture("OriginalHistory0"), Some(TextureSemantic::Original));
        assert_eq!(table.resolve_texture("OriginalHistory3"), Some(TextureSemantic::OriginalHistory(3)));
        assert_eq!(table.resolve_texture("PassOutput2"), Some(TextureSemantic::PassOutput(2)));
        assert_eq!(table.resolve_texture("PassFeedback0"), Some(TextureSemantic::PassFeedback(0)));
        assert_eq!(table.resolve_texture("PassHistory0_2"), Some(TextureSemantic::PassHistory { pass: 0, depth: 2 }));
        assert_eq!(table.resolve_texture("Prev1Texture"), Some(TextureSemantic::OriginalHistory(2)));
        assert_eq!(table.resolve_texture("PassOutput"), None);
    }

    #[test]
    fn test_alias_forms() {
        let table = table();
        assert_eq!(table.resolve_texture("Glow"), Some(TextureSemantic::PassOutput(1)));
        assert_eq!(table.resolve_texture("GlowFeedback"), Some(TextureSemantic::PassFeedback(1)));
        assert_eq!(table.resolve_texture("GlowHistory3"), Some(TextureSemantic::PassHistory { pass: 1, depth: 3 }));
        assert_eq!(table.resolve_texture("Bezel"), Some(TextureSemantic::Lookup("Bezel".to_string())));
        assert_eq!(table.resolve_texture("Missing"), None);
    }

    #[test]
    fn test_size_names() {
        let table = table();
        assert_eq!(table.resolve_texture_size("PassOutputSize1"), Some(TextureSemantic::PassOutput(1)));
        assert_eq!(table.resolve_texture_size("GlowSize"), Some(TextureSemantic::PassOutput(1)));
        assert_eq!(table.resolve_texture_size("GlowFeedbackSize"), Some(TextureSemantic::PassFeedback(1)));
        assert_eq!(table.resolve_texture_size("BezelSize"), Some(TextureSemantic::Lookup("Bezel".to_string())));
        assert_eq!(table.resolve_texture_size("Size"), None);
    }

    #[test]
    fn test_builtins() {
        assert_eq!(builtin_uniform("FrameCount"), Some((BuiltinUniform::FrameCount, UniformType::Uint)));
        assert_eq!(builtin_uniform("TextureSize"), Some((BuiltinUniform::SourceSize, UniformType::Vec2)));
        assert!(builtin_uniform("Brightness").is_none());
        assert!(is_reserved_texture_name("Source"));
        assert!(is_reserved_texture_name("PassOutput4"));
        assert!(!is_reserved_texture_name("Glow"));
    }
}
