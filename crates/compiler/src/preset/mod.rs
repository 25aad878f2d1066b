//! Multi-pass shader preset documents
//!
//! A preset (`.slangp` / `.glslp`) lists an ordered sequence of shader passes with their
//! scaling, filtering and wrapping, the lookup textures the passes sample and overrides
//! for the parameters the shaders declare. [`parse`] turns preset text into a validated
//! [`PresetDocument`]; [`PresetDocument::to_preset_string`] writes it back canonically.

mod include;
mod lexer;
mod parser;
mod scale;
mod serialize;

pub use include::{Expanded, load_shader, parent_dir, relative_to, resolve_path};
pub use parser::{MAX_REFERENCE_DEPTH, parse};
pub use scale::{AxisScale, PassScale, ScaleFactor, ScaleFactorParseError, ScaleType};

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::transpile::ParameterDecl;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Pixel format of a pass's render target
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFormat {
    #[default]
    Rgba8Unorm,
    Rgba8Srgb,
    Rgba16Float,
    Rgba32Float,
}

/// Texture sampling filter modes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Texture coordinate wrapping outside [0, 1]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapMode {
    #[default]
    ClampToBorder,
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

impl WrapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClampToBorder => "clamp_to_border",
            Self::ClampToEdge => "clamp_to_edge",
            Self::Repeat => "repeat",
            Self::MirroredRepeat => "mirrored_repeat",
        }
    }
}

impl FromStr for WrapMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clamp_to_border" => Ok(Self::ClampToBorder),
            "clamp_to_edge" => Ok(Self::ClampToEdge),
            "repeat" => Ok(Self::Repeat),
            "mirrored_repeat" => Ok(Self::MirroredRepeat),
            other => Err(format!("unknown wrap mode `{other}`")),
        }
    }
}

/// Where a pass's shader code came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ShaderSource {
    /// One file holding both stages (`shaderN`)
    Combined { path: String, source: String },
    /// Separate stage files (`vertexN` + `fragmentN`)
    Split {
        vertex_path: String,
        vertex: String,
        fragment_path: String,
        fragment: String,
    },
}

impl ShaderSource {
    /// The combined or vertex source, and the fragment source of split passes
    pub fn stage_sources(&self) -> (&str, Option<&str>) {
        match self {
            Self::Combined { source, .. } => (source, None),
            Self::Split { vertex, fragment, .. } => (vertex, Some(fragment)),
        }
    }

    /// Every source text of the pass
    pub fn sources(&self) -> Vec<&str> {
        match self {
            Self::Combined { source, .. } => vec![source],
            Self::Split { vertex, fragment, .. } => vec![vertex, fragment],
        }
    }

    /// The file the pass's code is reported against
    pub fn path(&self) -> &str {
        match self {
            Self::Combined { path, .. } => path,
            Self::Split { vertex_path, .. } => vertex_path,
        }
    }
}

/// One shader pass as declared by a preset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassSpec {
    pub source: ShaderSource,
    /// Files pulled in through `#include`
    pub includes: Vec<String>,
    pub scale: PassScale,
    /// `filter_linearN`; unset leaves the choice to the host
    pub filter: Option<FilterMode>,
    pub wrap_mode: WrapMode,
    /// Render only every Nth frame
    pub frame_count_mod: Option<u32>,
    /// `aliasN`, or the shader's `#pragma name`
    pub alias: Option<String>,
    pub float_framebuffer: bool,
    pub srgb_framebuffer: bool,
    /// Frames of history to keep for this pass beyond what samplers request
    pub history_depth: Option<u32>,
}

impl PassSpec {
    /// Render target format from the framebuffer flags alone
    pub fn declared_format(&self) -> TargetFormat {
        if self.float_framebuffer {
            TargetFormat::Rgba16Float
        } else if self.srgb_framebuffer {
            TargetFormat::Rgba8Srgb
        } else {
            TargetFormat::Rgba8Unorm
        }
    }
}

/// A static image the passes sample by name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupTexture {
    pub path: String,
    pub filter: FilterMode,
    pub wrap_mode: WrapMode,
    pub mipmap: bool,
}

/// A parsed and validated preset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetDocument {
    /// Path the preset was loaded from; relative paths inside it resolve against this
    pub path: String,
    pub passes: Vec<PassSpec>,
    pub textures: BTreeMap<String, LookupTexture>,
    /// Effective value of every declared parameter
    pub parameters: BTreeMap<String, f32>,
    /// Values the preset itself sets
    pub parameter_overrides: BTreeMap<String, f32>,
    /// Parameter declarations of all passes, first declaration wins
    pub parameter_decls: Vec<ParameterDecl>,
    /// Non-fatal findings: unknown keys, unmapped overrides
    pub warnings: Vec<Diagnostic>,
}

impl PresetDocument {
    pub fn parameter_decl(&self, name: &str) -> Option<&ParameterDecl> {
        self.parameter_decls.iter().find(|d| d.name == name)
    }

    /// Writes the document as preset text that parses back to an equal document
    pub fn to_preset_string(&self) -> String {
        serialize::to_preset_string(self)
    }
}

/// A preset could not be parsed; no document is produced
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{file}{}: {message}", .line.map(|l| format!(":{l}")).unwrap_or_default())]
pub struct ParseError {
    pub file: String,
    pub line: Option<usize>,
    pub message: String,
}

impl ParseError {
    pub fn new(file: &str, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::ParseError, None, self.to_string())
    }
}
