//! Generated source validation
//!
//! Parses and validates each generated stage with naga's GLSL front-end, the same
//! front-end the graphics API uses, so a broken pass is reported with its pass index and
//! line before any GPU object is created. The link check compares the vertex outputs
//! with the fragment inputs.

use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceLine, context_window};
use crate::transpile::{CompiledPass, Stage};
use naga::ShaderStage;
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};

/// A generated pass that the graphics API would reject
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("pass {pass_index} {} stage{}: {message}", .stage.name(), .line.map(|l| format!(", line {l}")).unwrap_or_default())]
    Compile {
        pass_index: usize,
        stage: Stage,
        line: Option<usize>,
        message: String,
        context: Vec<SourceLine>,
    },
    #[error("pass {pass_index}: `{symbol}`: {message}")]
    Link { pass_index: usize, symbol: String, message: String },
}

impl ValidationError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Compile { pass_index, context, .. } => Diagnostic::new(DiagnosticKind::CompileError, Some(*pass_index), self.to_string()).with_context(context.clone()),
            Self::Link { pass_index, symbol, .. } => Diagnostic::new(DiagnosticKind::LinkError, Some(*pass_index), self.to_string()).with_symbol(symbol.clone()),
        }
    }
}

/// Parses and validates one generated stage
pub fn validate_stage(pass_index: usize, stage: Stage, source: &str) -> Result<naga::Module, ValidationError> {
    let shader_stage = match stage {
        Stage::Vertex => ShaderStage::Vertex,
        Stage::Fragment => ShaderStage::Fragment,
    };
    let compile_error = |line: Option<usize>, message: String| ValidationError::Compile {
        pass_index,
        stage,
        line,
        message,
        context: line.map(|l| context_window(source, l, 2)).unwrap_or_default(),
    };

    let mut frontend = Frontend::default();
    let module = frontend.parse(&Options::from(shader_stage), source).map_err(|errors| {
        let first = errors.errors.first();
        let line = first.map(|e| e.meta.location(source).line_number as usize).filter(|l| *l > 0);
        let message = errors.errors.iter().map(|e| e.kind.to_string()).collect::<Vec<_>>().join("; ");
        compile_error(line, message)
    })?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator.validate(&module).map_err(|error| {
        let line = error.spans().next().map(|(span, _)| span.location(source).line_number as usize).filter(|l| *l > 0);
        compile_error(line, error.as_inner().to_string())
    })?;
    Ok(module)
}

/// Checks that every fragment input is written by the vertex stage with a matching type
pub fn check_link(pass: &CompiledPass) -> Result<(), ValidationError> {
    let link_error = |symbol: &str, message: String| ValidationError::Link {
        pass_index: pass.pass_index,
        symbol: symbol.to_string(),
        message,
    };
    for input in &pass.fragment_inputs {
        let Some(output) = pass.varyings.iter().find(|v| v.location == input.location) else {
            return Err(link_error(&input.name, format!("fragment input at location {} has no vertex output", input.location)));
        };
        if output.ty != input.ty || output.array != input.array {
            return Err(link_error(&input.name, format!("fragment input is `{}` but the vertex stage writes `{}` `{}`", input.ty, output.ty, output.name)));
        }
        if output.flat != input.flat {
            return Err(link_error(&input.name, "interpolation qualifiers differ between stages".to_string()));
        }
    }
    if pass.fragment_outputs.is_empty() {
        return Err(link_error("main", "fragment stage writes no color output".to_string()));
    }
    Ok(())
}

/// Validates both stages of a pass and their interface
pub fn validate_pass(pass: &CompiledPass) -> Result<(), ValidationError> {
    let _span = tracing::debug_span!("validate", pass = pass.pass_index).entered();
    validate_stage(pass.pass_index, Stage::Vertex, &pass.vertex_source)?;
    validate_stage(pass.pass_index, Stage::Fragment, &pass.fragment_source)?;
    check_link(pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::parse;
    use crate::transpile::transpile;

    const PASS: &str = "#pragma stage vertex\nlayout(location = 0) in vec4 Position;\nlayout(location = 1) in vec2 TexCoord;\nlayout(location = 0) out vec2 vTexCoord;\nvoid main()\n{\n    gl_Position = MVP * Position;\n    vTexCoord = TexCoord;\n}\n#pragma stage fragment\nlayout(location = 0) in vec2 vTexCoord;\nlayout(location = 0) out vec4 FragColor;\nuniform sampler2D Source;\nvoid main()\n{\n    FragColor = texture(Source, vTexCoord);\n}\n";

    fn compiled() -> CompiledPass {
        let load = |path: &str| match path {
            "pass.slang" => Ok(PASS.to_string()),
            _ => Err(std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string())),
        };
        let document = parse("shaders = 1\nshader0 = pass.slang\n", "test.slangp", &load).unwrap();
        transpile(&document.passes[0].source, 0, &document).unwrap()
    }

    #[test]
    fn test_link_check() {
        let pass = compiled();
        assert_eq!(check_link(&pass), Ok(()));

        let mut missing = pass.clone();
        missing.varyings.clear();
        let error = check_link(&missing).unwrap_err();
        assert!(matches!(&error, ValidationError::Link { symbol, .. } if symbol == "vTexCoord"));
        assert_eq!(error.to_diagnostic().kind, DiagnosticKind::LinkError);

        let mut mismatched = pass.clone();
        mismatched.varyings[0].ty = "vec4".to_string();
        assert!(check_link(&mismatched).unwrap_err().to_string().contains("vec4"));

        let mut silent = pass;
        silent.fragment_outputs.clear();
        assert!(check_link(&silent).is_err());
    }

    #[test]
    fn test_compile_error_is_reported_per_stage() {
        let broken = "#version 450\nvoid main()\n{\n    undefined_function();\n}\n";
        let error = validate_stage(0, Stage::Fragment, broken).unwrap_err();
        let ValidationError::Compile { pass_index, stage, .. } = &error else { panic!("expected a compile error, got {error:?}") };
        assert_eq!((*pass_index, *stage), (0, Stage::Fragment));
        assert_eq!(error.to_diagnostic().kind, DiagnosticKind::CompileError);
    }
}
