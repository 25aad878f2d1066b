//! retroshade compiler
//!
//! This crate turns RetroArch-style multi-pass shader presets (`.slangp` / `.glslp`)
//! into execution plans a renderer can draw frame by frame. It parses the preset,
//! rewrites every pass's shader into a self-contained GLSL 450 vertex/fragment pair,
//! resolves which pass reads which texture and orders the passes accordingly. Nothing
//! here touches the GPU.

pub mod config;
pub mod diagnostics;
pub mod graph;
pub mod predefined;
pub mod preset;
pub mod semantics;
pub mod transpile;
pub mod validate;

use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use graph::{BuildError, ExecutionPlan, Limits};
use preset::{ParseError, PresetDocument};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use transpile::TranspileError;
use validate::ValidationError;

/// Shared flag that asks an in-flight compilation to stop
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Settings for one compilation
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Parameter values applied on top of the preset's own
    pub parameters: BTreeMap<String, f32>,
    pub limits: Limits,
    /// Check generated sources with naga
    pub validate: bool,
    pub cancellation: Option<CancellationToken>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            parameters: BTreeMap::new(),
            limits: Limits::default(),
            validate: true,
            cancellation: None,
        }
    }
}

impl CompileOptions {
    pub fn from_config(config: &config::PipelineConfig) -> Self {
        Self {
            parameters: config.parameters.clone(),
            limits: config.limits(),
            validate: config.validate,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Why a preset could not be turned into a plan
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PresetError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Transpile(#[from] TranspileError),
    #[error(transparent)]
    Build(#[from] BuildError),
    /// The graphics API would reject a generated pass
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("compilation cancelled")]
    Cancelled,
}

impl PresetError {
    /// Returns true if the failure means the preset can only be shown bypassed
    ///
    /// Parse, transpile and build failures leave the previous plan active instead.
    pub fn is_bypass(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// The report describing the failure; cancellation is not a failure and has none
    pub fn to_diagnostic(&self) -> Option<Diagnostic> {
        match self {
            Self::Parse(error) => Some(error.to_diagnostic()),
            Self::Transpile(error) => Some(error.to_diagnostic()),
            Self::Build(error) => Some(error.to_diagnostic()),
            Self::Validation(error) => Some(error.to_diagnostic()),
            Self::Cancelled => None,
        }
    }
}

/// A successfully compiled preset
#[derive(Debug, Clone)]
pub struct Compilation {
    pub document: PresetDocument,
    pub plan: ExecutionPlan,
    /// Non-fatal reports gathered along the way
    pub diagnostics: Diagnostics,
}

/// Applies host parameter values to a parsed document
///
/// Values for parameters no pass declares are reported and otherwise ignored.
pub fn apply_parameters(document: &mut PresetDocument, parameters: &BTreeMap<String, f32>, diagnostics: &mut Diagnostics) {
    for (name, value) in parameters {
        if document.parameter_decl(name).is_some() {
            document.parameters.insert(name.clone(), *value);
        } else {
            diagnostics.push(Diagnostic::new(DiagnosticKind::UnmappedParameter, None, format!("no pass declares parameter `{name}`")).with_symbol(name.clone()));
        }
    }
}

/// Compiles preset text into an execution plan
///
/// # Arguments
/// * `text` - The preset file's contents
/// * `path` - Path of the preset; relative references resolve against it
/// * `load_file` - Loads shader sources and referenced presets by path
/// * `options` - Parameter values, limits and cancellation
pub fn compile_preset(text: &str, path: &str, load_file: &dyn Fn(&str) -> std::io::Result<String>, options: &CompileOptions) -> Result<Compilation, PresetError> {
    let _span = tracing::info_span!("compile_preset", preset = path).entered();
    let mut diagnostics = Diagnostics::new();

    let mut document = preset::parse(text, path, load_file)?;
    diagnostics.extend(document.warnings.iter().cloned());
    apply_parameters(&mut document, &options.parameters, &mut diagnostics);

    let mut compiled = Vec::with_capacity(document.passes.len());
    for (index, pass) in document.passes.iter().enumerate() {
        if options.is_cancelled() {
            return Err(PresetError::Cancelled);
        }
        let pass = transpile::transpile(&pass.source, index, &document)?;
        diagnostics.extend(pass.diagnostics.iter().cloned());
        if options.validate {
            validate::validate_pass(&pass)?;
        }
        compiled.push(pass);
    }
    if options.is_cancelled() {
        return Err(PresetError::Cancelled);
    }

    let plan = graph::build_with_limits(&document, compiled, &options.limits)?;
    tracing::info!(passes = plan.passes.len(), targets = plan.targets.len(), history = plan.retention.max(), "compiled preset");
    Ok(Compilation { document, plan, diagnostics })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASS: &str = "#pragma parameter GAIN \"Gain\" 1.0 0.0 2.0 0.1\n#pragma stage vertex\nlayout(location = 0) in vec4 Position;\nlayout(location = 1) in vec2 TexCoord;\nlayout(location = 0) out vec2 vTexCoord;\nvoid main()\n{\n    gl_Position = MVP * Position;\n    vTexCoord = TexCoord;\n}\n#pragma stage fragment\nlayout(location = 0) in vec2 vTexCoord;\nlayout(location = 0) out vec4 FragColor;\nuniform sampler2D Source;\nvoid main()\n{\n    FragColor = texture(Source, vTexCoord) * GAIN;\n}\n";

    fn load(path: &str) -> std::io::Result<String> {
        match path {
            "gain.slang" => Ok(PASS.to_string()),
            _ => Err(std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string())),
        }
    }

    fn options() -> CompileOptions {
        CompileOptions {
            validate: false,
            ..CompileOptions::default()
        }
    }

    #[test]
    fn test_unmapped_parameter_does_not_fail() {
        let text = "shaders = 1\nshader0 = gain.slang\nparameters = \"GAIN;MISSING\"\nGAIN = 1.5\nMISSING = 3.0\n";
        let mut options = options();
        options.parameters.insert("ALSO_MISSING".to_string(), 1.0);
        let compilation = compile_preset(text, "test.slangp", &load, &options).unwrap();

        assert_eq!(compilation.document.parameters["GAIN"], 1.5);
        let unmapped: Vec<_> = compilation.diagnostics.of_kind(DiagnosticKind::UnmappedParameter).filter_map(|d| d.symbol.clone()).collect();
        assert!(unmapped.contains(&"ALSO_MISSING".to_string()));
        assert_eq!(compilation.diagnostics.of_kind(DiagnosticKind::UnmappedParameter).count(), 2);
        assert_eq!(compilation.plan.passes.len(), 1);
    }

    #[test]
    fn test_host_parameters_override_preset() {
        let text = "shaders = 1\nshader0 = gain.slang\nGAIN = 1.5\n";
        let mut options = options();
        options.parameters.insert("GAIN".to_string(), 0.25);
        let compilation = compile_preset(text, "test.slangp", &load, &options).unwrap();
        assert_eq!(compilation.plan.parameters["GAIN"], 0.25);
        assert_eq!(compilation.document.parameter_overrides["GAIN"], 1.5);
    }

    #[test]
    fn test_failures_map_to_diagnostics() {
        let error = compile_preset("shaders = 1\n", "bad.slangp", &load, &options()).unwrap_err();
        assert!(matches!(error, PresetError::Parse(_)));
        assert!(!error.is_bypass());
        assert_eq!(error.to_diagnostic().map(|d| d.kind), Some(DiagnosticKind::ParseError));

        let token = CancellationToken::new();
        token.cancel();
        let error = compile_preset("shaders = 1\nshader0 = gain.slang\n", "test.slangp", &load, &options().with_cancellation(token)).unwrap_err();
        assert_eq!(error, PresetError::Cancelled);
        assert_eq!(error.to_diagnostic(), None);
    }
}
