//! Pragma extraction and stage splitting
//!
//! `#pragma parameter`, `#pragma name`, `#pragma format` and `#pragma stage` are metadata,
//! not code. They are recorded here and removed from the emitted source.

use super::{Stage, TranspileErrorKind};
use crate::diagnostics::SourceLine;
use crate::preset::TargetFormat;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static PARAMETER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*#\s*pragma\s+parameter\s+([A-Za-z_]\w*)\s+"([^"]*)"\s+(\S+)\s+(\S+)\s+(\S+)(?:\s+(\S+))?\s*$"#).unwrap());
static PRAGMA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*#\s*pragma\s+(\w+)\s*(.*?)\s*$").unwrap());

/// A tunable value declared by a shader
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDecl {
    pub name: String,
    pub description: String,
    pub default: f32,
    pub minimum: f32,
    pub maximum: f32,
    pub step: f32,
}

impl ParameterDecl {
    /// Returns true if the two declarations agree on everything but the description
    pub fn same_values(&self, other: &ParameterDecl) -> bool {
        self.default == other.default && self.minimum == other.minimum && self.maximum == other.maximum && self.step == other.step
    }
}

/// Parses a `#pragma parameter` line
///
/// # Returns
/// `None` if the line is not a parameter pragma, otherwise the declaration or a message
/// describing why it is malformed
pub fn parse_parameter_line(line: &str) -> Option<Result<ParameterDecl, String>> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('#') || !trimmed.contains("parameter") {
        return None;
    }
    let Some(pragma) = PRAGMA_RE.captures(trimmed) else { return None };
    if &pragma[1] != "parameter" {
        return None;
    }
    let Some(captures) = PARAMETER_RE.captures(trimmed) else {
        return Some(Err(format!("malformed parameter pragma `{}`", trimmed.trim())));
    };
    let number = |index: usize| -> Result<f32, String> {
        let text = &captures[index];
        text.parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("parameter `{}`: `{text}` is not a number", &captures[1]))
    };
    let parse = || -> Result<ParameterDecl, String> {
        Ok(ParameterDecl {
            name: captures[1].to_string(),
            description: captures[2].to_string(),
            default: number(3)?,
            minimum: number(4)?,
            maximum: number(5)?,
            step: if captures.get(6).is_some() { number(6)? } else { 0.0 },
        })
    };
    Some(parse())
}

/// Scans a source for parameter declarations without otherwise interpreting it
pub fn scan_parameters(source: &str) -> Vec<(usize, Result<ParameterDecl, String>)> {
    source
        .lines()
        .enumerate()
        .filter_map(|(i, line)| parse_parameter_line(line).map(|decl| (i + 1, decl)))
        .collect()
}

/// Returns the `#pragma name` a shader declares, if any
pub fn scan_name(source: &str) -> Option<String> {
    source.lines().find_map(|line| {
        let captures = PRAGMA_RE.captures(line)?;
        (&captures[1] == "name").then(|| captures[2].trim_matches('"').to_string()).filter(|n| !n.is_empty())
    })
}

/// Maps a Vulkan-style `#pragma format` name to the closest supported target format
pub fn parse_format(name: &str) -> TargetFormat {
    match name {
        "R8G8B8A8_UNORM" => TargetFormat::Rgba8Unorm,
        "R8G8B8A8_SRGB" => TargetFormat::Rgba8Srgb,
        "R16G16B16A16_SFLOAT" => TargetFormat::Rgba16Float,
        "R32G32B32A32_SFLOAT" => TargetFormat::Rgba32Float,
        other if other.contains("SFLOAT") && other.starts_with("R32") => TargetFormat::Rgba32Float,
        other if other.contains("SFLOAT") => TargetFormat::Rgba16Float,
        other if other.contains("SRGB") => TargetFormat::Rgba8Srgb,
        other => {
            tracing::debug!(format = other, "approximating render target format as RGBA8");
            TargetFormat::Rgba8Unorm
        }
    }
}

/// Metadata collected from one pass's pragmas
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pragmas {
    pub parameters: Vec<ParameterDecl>,
    pub name: Option<String>,
    pub format: Option<TargetFormat>,
}

/// Source lines of each stage after pragma removal
#[derive(Debug, Clone, Default)]
pub struct StageLines {
    pub vertex: Vec<SourceLine>,
    pub fragment: Vec<SourceLine>,
}

impl StageLines {
    pub fn get(&self, stage: Stage) -> &[SourceLine] {
        match stage {
            Stage::Vertex => &self.vertex,
            Stage::Fragment => &self.fragment,
        }
    }
}

/// Which stages a line of a combined source belongs to
#[derive(Clone, Copy, PartialEq)]
enum Section {
    Shared,
    Only(Stage),
}

/// Joins directive lines ending in a backslash with their continuation
fn join_continuations(source: &str) -> Vec<SourceLine> {
    let mut lines: Vec<SourceLine> = Vec::new();
    let mut pending: Option<SourceLine> = None;
    for (i, text) in source.lines().enumerate() {
        let line = match pending.take() {
            Some(mut open) => {
                open.text.push(' ');
                open.text.push_str(text.trim_start());
                open
            }
            None => SourceLine { number: i + 1, text: text.to_string() },
        };
        if line.text.trim_end().ends_with('\\') {
            let mut open = line;
            let trimmed_len = open.text.trim_end().len() - 1;
            open.text.truncate(trimmed_len);
            pending = Some(open);
        } else {
            lines.push(line);
        }
    }
    lines.extend(pending);
    lines
}

/// Extracts pragmas and splits sources into stages
///
/// Combined sources are split at `#pragma stage` markers; lines before the first marker
/// belong to both stages. A combined source without markers is handed to both stages
/// unchanged, leaving `#if defined(VERTEX)` style selection to conditional evaluation.
///
/// # Arguments
/// * `vertex_source` - The combined source, or the vertex source of a split pass
/// * `fragment_source` - `None` for combined sources
pub fn extract(vertex_source: &str, fragment_source: Option<&str>) -> Result<(Pragmas, StageLines), (TranspileErrorKind, usize)> {
    let mut pragmas = Pragmas::default();
    let mut stages = StageLines::default();

    let inputs: Vec<(Vec<SourceLine>, Section)> = match fragment_source {
        None => vec![(join_continuations(vertex_source), Section::Shared)],
        Some(fragment) => vec![
            (join_continuations(vertex_source), Section::Only(Stage::Vertex)),
            (join_continuations(fragment), Section::Only(Stage::Fragment)),
        ],
    };

    for (lines, initial) in inputs {
        let mut section = initial;
        for line in lines {
            if let Some(decl) = parse_parameter_line(&line.text) {
                let decl = decl.map_err(|message| (TranspileErrorKind::Directive(message), line.number))?;
                match pragmas.parameters.iter().find(|p| p.name == decl.name) {
                    Some(existing) if !existing.same_values(&decl) => {
                        return Err((TranspileErrorKind::ConflictingParameter(decl.name), line.number));
                    }
                    Some(_) => {}
                    None => pragmas.parameters.push(decl),
                }
                continue;
            }

            if let Some(captures) = PRAGMA_RE.captures(&line.text) {
                let argument = captures[2].trim_matches('"');
                match &captures[1] {
                    "stage" if fragment_source.is_none() => {
                        section = match argument {
                            "vertex" => Section::Only(Stage::Vertex),
                            "fragment" => Section::Only(Stage::Fragment),
                            other => return Err((TranspileErrorKind::Directive(format!("unknown stage `{other}`")), line.number)),
                        };
                    }
                    "stage" => {}
                    "name" => pragmas.name = Some(argument.to_string()),
                    "format" => pragmas.format = Some(parse_format(argument)),
                    other => tracing::debug!(pragma = other, line = line.number, "dropping unsupported pragma"),
                }
                continue;
            }

            match section {
                Section::Shared => {
                    stages.vertex.push(line.clone());
                    stages.fragment.push(line);
                }
                Section::Only(Stage::Vertex) => stages.vertex.push(line),
                Section::Only(Stage::Fragment) => stages.fragment.push(line),
            }
        }
    }

    Ok((pragmas, stages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parameter_line() {
        let decl = parse_parameter_line(r#"#pragma parameter SCANLINE_WEIGHT "Scanline Weight" 0.3 0.0 1.0 0.05"#).unwrap().unwrap();
        assert_eq!(decl.name, "SCANLINE_WEIGHT");
        assert_eq!(decl.description, "Scanline Weight");
        assert_eq!((decl.default, decl.minimum, decl.maximum, decl.step), (0.3, 0.0, 1.0, 0.05));

        let no_step = parse_parameter_line(r#"  #pragma parameter GAMMA "Gamma" 2.2 1.0 3.0"#).unwrap().unwrap();
        assert_eq!(no_step.step, 0.0);

        assert!(parse_parameter_line("#pragma parameter BROKEN 1.0").unwrap().is_err());
        assert!(parse_parameter_line(r#"#pragma parameter X "x" a 0 1"#).unwrap().is_err());
        assert!(parse_parameter_line("#pragma stage vertex").is_none());
        assert!(parse_parameter_line("float parameter = 1.0;").is_none());
    }

    #[test]
    fn test_extract_splits_stages() {
        let source = "#version 450\nshared();\n#pragma stage vertex\nvert();\n#pragma stage fragment\nfrag();\n#pragma name Blur\n#pragma format R16G16B16A16_SFLOAT\n";
        let (pragmas, stages) = extract(source, None).unwrap();

        let vertex: Vec<_> = stages.vertex.iter().map(|l| l.text.as_str()).collect();
        let fragment: Vec<_> = stages.fragment.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(vertex, vec!["#version 450", "shared();", "vert();"]);
        assert_eq!(fragment, vec!["#version 450", "shared();", "frag();"]);
        assert_eq!(stages.fragment[2].number, 6);
        assert_eq!(pragmas.name.as_deref(), Some("Blur"));
        assert_eq!(pragmas.format, Some(TargetFormat::Rgba16Float));
    }

    #[test]
    fn test_conflicting_parameter_redeclaration() {
        let source = "#pragma parameter A \"a\" 0.5 0.0 1.0 0.1\n#pragma parameter A \"again\" 0.5 0.0 1.0 0.1\n#pragma parameter A \"a\" 0.7 0.0 1.0 0.1\n";
        let error = extract(source, None).unwrap_err();
        assert_eq!(error, (TranspileErrorKind::ConflictingParameter("A".to_string()), 3));
    }

    #[test]
    fn test_line_continuations_keep_first_number() {
        let source = "a\n#define LONG(x) \\\n  (x * 2.0)\nb\n";
        let (_, stages) = extract(source, None).unwrap();
        let texts: Vec<_> = stages.vertex.iter().map(|l| (l.number, l.text.as_str())).collect();
        assert_eq!(texts, vec![(1, "a"), (2, "#define LONG(x)  (x * 2.0)"), (4, "b")]);
    }
}
