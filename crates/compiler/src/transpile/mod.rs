//! Shader source transpiler
//!
//! Rewrites one pass's source, written against slang or legacy GLSL conventions, into a
//! self-contained GLSL 450 vertex/fragment pair that binds a single std140 uniform block
//! and separate texture/sampler pairs in descriptor set 0.
//!
//! The stages run in a fixed order: pragma extraction, conditional evaluation, object-like
//! macro inlining, token rewrites and finally interface synthesis. Nothing global is
//! touched, so identical inputs produce byte-identical output.

mod conditionals;
mod glsl;
mod items;
mod layout;
mod lexer;
mod macros;
mod pragma;
mod rewrite;
mod synthesis;

pub use conditionals::{TARGET_VERSION, evaluate_expression};
pub use layout::{ScalarKind, UniformLayout, UniformMember, UniformSource, UniformType};
pub use pragma::{ParameterDecl, parse_format, parse_parameter_line, scan_name, scan_parameters};
pub use synthesis::{UNIFORM_BINDING, sampler_bindings};

use crate::diagnostics::{Diagnostic, SourceLine, context_window};
use crate::preset::{PresetDocument, ShaderSource, TargetFormat};
use crate::semantics::{NameTable, TextureSemantic};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Lines shown on each side of the offending line in an error
const CONTEXT_RADIUS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        }
    }

    /// Macro predefined while preprocessing this stage
    pub fn macro_name(&self) -> &'static str {
        match self {
            Self::Vertex => "VERTEX",
            Self::Fragment => "FRAGMENT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranspileErrorKind {
    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),
    #[error("sampler `{0}` does not name a pass output, lookup texture or history slot")]
    UnresolvedSampler(String),
    #[error("`{name}` redefined as `{current}` (previously `{previous}`)")]
    AmbiguousRedefinition { name: String, previous: String, current: String },
    #[error("parameter `{0}` declared twice with different values")]
    ConflictingParameter(String),
    #[error("preprocessor: {0}")]
    Directive(String),
    #[error("unsupported declaration: {0}")]
    UnsupportedDeclaration(String),
    #[error("unresolved include `{0}`")]
    UnresolvedInclude(String),
    #[error("syntax: {0}")]
    Syntax(String),
}

impl TranspileErrorKind {
    /// The symbol the error is about, if it names one
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::UnknownSymbol(name) | Self::UnresolvedSampler(name) | Self::ConflictingParameter(name) | Self::UnresolvedInclude(name) => Some(name),
            Self::AmbiguousRedefinition { name, .. } => Some(name),
            Self::Directive(_) | Self::UnsupportedDeclaration(_) | Self::Syntax(_) => None,
        }
    }
}

/// A transpilation failure with the pass and source lines it concerns
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("pass {pass_index}{}: {kind}", .line.map(|l| format!(", line {l}")).unwrap_or_default())]
pub struct TranspileError {
    pub pass_index: usize,
    pub symbol: Option<String>,
    pub line: Option<usize>,
    pub context: Vec<SourceLine>,
    pub kind: TranspileErrorKind,
}

impl TranspileError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diagnostic = Diagnostic::new(crate::diagnostics::DiagnosticKind::TranspileError, Some(self.pass_index), self.kind.to_string()).with_context(self.context.clone());
        if let Some(symbol) = &self.symbol {
            diagnostic = diagnostic.with_symbol(symbol.clone());
        }
        diagnostic
    }
}

/// An error kind with the stage and line it was found at
#[derive(Debug)]
pub(crate) struct Located {
    pub kind: TranspileErrorKind,
    pub stage: Option<Stage>,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RewriteKind {
    /// An object-like macro was inlined
    Inlined,
    /// A texture sampling call was renamed or made explicit
    TextureCall,
    /// A legacy built-in was translated
    Translated,
    /// A file-scope symbol was prefixed with the pass identifier
    Renamed,
    SynthesizedUniform,
    SynthesizedSampler,
    SynthesizedVarying,
    LocationAssigned,
}

/// One entry of the structured rewrite log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rewrite {
    pub stage: Stage,
    pub line: usize,
    pub kind: RewriteKind,
    pub detail: String,
}

impl Rewrite {
    pub fn new(stage: Stage, line: usize, kind: RewriteKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::debug!(stage = stage.name(), line, kind = ?kind, "{detail}");
        Self { stage, line, kind, detail }
    }
}

/// A sampler of the generated sources and the input it reads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplerBinding {
    pub name: String,
    pub semantic: TextureSemantic,
    pub texture_binding: u32,
    pub sampler_binding: u32,
}

/// A located stage input or output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceVariable {
    pub name: String,
    pub ty: String,
    pub array: Option<String>,
    pub location: u32,
    pub interpolation: Vec<String>,
    pub flat: bool,
}

/// A pass ready to hand to the graphics API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledPass {
    pub pass_index: usize,
    pub vertex_source: String,
    pub fragment_source: String,
    pub uniforms: UniformLayout,
    pub samplers: Vec<SamplerBinding>,
    /// `#pragma parameter` declarations of this pass
    pub parameters: Vec<ParameterDecl>,
    /// `#pragma name`
    pub name: Option<String>,
    /// `#pragma format`
    pub format: Option<TargetFormat>,
    pub vertex_inputs: Vec<InterfaceVariable>,
    pub varyings: Vec<InterfaceVariable>,
    pub fragment_inputs: Vec<InterfaceVariable>,
    pub fragment_outputs: Vec<InterfaceVariable>,
    /// Parameters whose values decided a conditional branch
    pub define_dependencies: BTreeSet<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub rewrites: Vec<Rewrite>,
}

impl CompiledPass {
    pub fn sampler(&self, name: &str) -> Option<&SamplerBinding> {
        self.samplers.iter().find(|s| s.name == name)
    }

    /// Largest binding slot the pass uses
    pub fn max_binding(&self) -> u32 {
        self.samplers.iter().map(|s| s.sampler_binding).max().unwrap_or(UNIFORM_BINDING)
    }
}

/// Transpiles one pass of a parsed preset
///
/// # Arguments
/// * `raw` - The pass's source after include resolution
/// * `pass_index` - Position of the pass in the preset, used for renaming and reports
/// * `document` - The preset, for pass aliases, lookup textures and parameter values
pub fn transpile(raw: &ShaderSource, pass_index: usize, document: &PresetDocument) -> Result<CompiledPass, TranspileError> {
    let _span = tracing::debug_span!("transpile", pass = pass_index).entered();
    let (vertex_raw, fragment_raw) = raw.stage_sources();
    let fail = |located: Located| {
        let source = match (located.stage, fragment_raw) {
            (Some(Stage::Fragment), Some(fragment)) => fragment,
            _ => vertex_raw,
        };
        TranspileError {
            pass_index,
            symbol: located.kind.symbol().map(str::to_string),
            line: Some(located.line),
            context: context_window(source, located.line, CONTEXT_RADIUS),
            kind: located.kind,
        }
    };

    let (pragmas, lines) = pragma::extract(vertex_raw, fragment_raw).map_err(|(kind, line)| fail(Located { kind, stage: None, line }))?;

    // Conditionals only see the parameters this pass declares; values come from the preset
    let declared: BTreeMap<String, f32> = pragmas
        .parameters
        .iter()
        .map(|p| (p.name.clone(), document.parameters.get(&p.name).copied().unwrap_or(p.default)))
        .collect();
    let mut parameters = document.parameters.clone();
    parameters.extend(declared.iter().map(|(name, value)| (name.clone(), *value)));

    let mut diagnostics = Vec::new();
    let mut define_dependencies = BTreeSet::new();
    let mut rewrites = Vec::new();
    let mut stages = Vec::with_capacity(2);
    for stage in [Stage::Vertex, Stage::Fragment] {
        let preprocessed = conditionals::evaluate(lines.get(stage), stage, &declared, pass_index).map_err(|(kind, line)| fail(Located { kind, stage: Some(stage), line }))?;
        diagnostics.extend(preprocessed.diagnostics);
        define_dependencies.extend(preprocessed.dependencies);

        let (tokens, inlined) = macros::inline_object_macros(lexer::tokenize(&preprocessed.lines));
        for definition in inlined {
            rewrites.push(Rewrite::new(stage, definition.line, RewriteKind::Inlined, format!("{} -> `{}`", definition.name, definition.body)));
        }
        stages.push(tokens);
    }

    let names = NameTable::new(document.passes.iter().map(|p| p.alias.clone()).collect(), document.textures.keys().cloned());
    let fragment_tokens = stages.pop().unwrap_or_default();
    let vertex_tokens = stages.pop().unwrap_or_default();
    let output = synthesis::Synthesizer::new(pass_index, &names, &parameters, &mut rewrites)
        .run(vertex_tokens, fragment_tokens)
        .map_err(fail)?;

    tracing::debug!(
        uniforms = output.uniforms.members.len(),
        samplers = output.samplers.len(),
        rewrites = rewrites.len(),
        "transpiled pass"
    );

    Ok(CompiledPass {
        pass_index,
        vertex_source: output.vertex_source,
        fragment_source: output.fragment_source,
        uniforms: output.uniforms,
        samplers: output.samplers,
        parameters: pragmas.parameters,
        name: pragmas.name,
        format: pragmas.format,
        vertex_inputs: output.vertex_inputs,
        varyings: output.varyings,
        fragment_inputs: output.fragment_inputs,
        fragment_outputs: output.fragment_outputs,
        define_dependencies,
        diagnostics,
        rewrites,
    })
}

/// Samplers a pass declares in the code that survives preprocessing, with their lines
///
/// Comments and untaken `#if` branches are skipped. A source the preprocessor rejects
/// yields what could be read before the failure; [`transpile`] reports the error itself.
pub fn declared_samplers(raw: &ShaderSource, pass_index: usize, parameters: &BTreeMap<String, f32>) -> Vec<(String, usize)> {
    let (vertex_raw, fragment_raw) = raw.stage_sources();
    let Ok((pragmas, lines)) = pragma::extract(vertex_raw, fragment_raw) else {
        return Vec::new();
    };
    let declared: BTreeMap<String, f32> = pragmas.parameters.iter().map(|p| (p.name.clone(), parameters.get(&p.name).copied().unwrap_or(p.default))).collect();

    let mut samplers: Vec<(String, usize)> = Vec::new();
    for stage in [Stage::Vertex, Stage::Fragment] {
        let Ok(preprocessed) = conditionals::evaluate(lines.get(stage), stage, &declared, pass_index) else {
            continue;
        };
        let (tokens, _) = macros::inline_object_macros(lexer::tokenize(&preprocessed.lines));
        let tokens: Vec<lexer::Token> = tokens.into_iter().filter(lexer::Token::is_significant).collect();
        for (i, token) in tokens.iter().enumerate() {
            if !token.is_ident("uniform") {
                continue;
            }
            let mut rest = tokens[i + 1..].iter().skip_while(|t| t.kind == lexer::TokenKind::Ident && glsl::is_precision(&t.text));
            if let (Some(ty), Some(name)) = (rest.next(), rest.next())
                && ty.is_ident("sampler2D")
                && name.kind == lexer::TokenKind::Ident
                && !samplers.iter().any(|(n, _)| *n == name.text)
            {
                samplers.push((name.text.clone(), name.line));
            }
        }
    }
    samplers
}
