//! Preset parser and validation

use super::include::{load_shader, resolve_path};
use super::lexer::{self, Statement};
use super::{AxisScale, FilterMode, LookupTexture, ParseError, PassScale, PassSpec, PresetDocument, ScaleFactor, ScaleType, ShaderSource, WrapMode};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::semantics::{NameTable, TextureSemantic, is_reserved_texture_name};
use crate::transpile::{ParameterDecl, declared_samplers, scan_name, scan_parameters};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// Limit on `#reference` chains
pub const MAX_REFERENCE_DEPTH: usize = 16;

static PASS_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(shader|vertex|fragment|alias|scale_type|scale_type_x|scale_type_y|scale|scale_x|scale_y|filter_linear|wrap_mode|frame_count_mod|float_framebuffer|srgb_framebuffer|mipmap_input|history_depth)(\d+)$").unwrap());

type Loader<'a> = &'a dyn Fn(&str) -> std::io::Result<String>;

/// A key's value and where it was set
#[derive(Debug, Clone)]
struct Setting {
    value: String,
    file: String,
    line: usize,
}

/// Gathers settings from a preset and everything it references
///
/// Keys set by the file itself override those inherited through `#reference`.
fn collect(text: &str, file: &str, load_file: Loader, depth: usize, settings: &mut BTreeMap<String, Setting>) -> Result<(), ParseError> {
    let mut own: BTreeMap<String, Setting> = BTreeMap::new();
    for statement in lexer::lex(text, file)? {
        match statement {
            Statement::Reference { path, line } => {
                if depth >= MAX_REFERENCE_DEPTH {
                    return Err(ParseError::new(file, Some(line), format!("#reference chain deeper than {MAX_REFERENCE_DEPTH}")));
                }
                let target = resolve_path(file, &path);
                let referenced = load_file(&target).map_err(|e| ParseError::new(file, Some(line), format!("cannot load `{target}`: {e}")))?;
                collect(&referenced, &target, load_file, depth + 1, settings)?;
            }
            Statement::Entry(entry) => {
                if let Some(previous) = own.get(&entry.key) {
                    return Err(ParseError::new(file, Some(entry.line), format!("`{}` already set on line {}", entry.key, previous.line)));
                }
                own.insert(
                    entry.key,
                    Setting {
                        value: entry.value,
                        file: file.to_string(),
                        line: entry.line,
                    },
                );
            }
        }
    }
    settings.extend(own);
    Ok(())
}

/// Parses preset text
///
/// # Arguments
/// * `text` - Contents of the preset file
/// * `path` - Path of the preset; shader, texture and reference paths resolve against it
/// * `load_file` - Loads referenced files by resolved path
///
/// # Returns
/// The validated document, or the first error found
pub fn parse(text: &str, path: &str, load_file: &dyn Fn(&str) -> std::io::Result<String>) -> Result<PresetDocument, ParseError> {
    let mut settings = BTreeMap::new();
    collect(text, path, load_file, 0, &mut settings)?;
    let parser = Parser {
        path,
        settings,
        used: BTreeSet::new(),
        load_file,
        warnings: Vec::new(),
    };
    let document = parser.run()?;
    tracing::debug!(preset = path, passes = document.passes.len(), textures = document.textures.len(), "parsed preset");
    Ok(document)
}

struct Parser<'a> {
    path: &'a str,
    settings: BTreeMap<String, Setting>,
    used: BTreeSet<String>,
    load_file: Loader<'a>,
    warnings: Vec<Diagnostic>,
}

impl Parser<'_> {
    fn get(&mut self, key: &str) -> Option<Setting> {
        let setting = self.settings.get(key)?.clone();
        self.used.insert(key.to_string());
        Some(setting)
    }

    fn error(setting: &Setting, message: impl Into<String>) -> ParseError {
        ParseError::new(&setting.file, Some(setting.line), message)
    }

    fn parse_value<T: std::str::FromStr>(&mut self, key: &str) -> Result<Option<T>, ParseError>
    where
        T::Err: std::fmt::Display,
    {
        let Some(setting) = self.get(key) else { return Ok(None) };
        setting.value.parse::<T>().map(Some).map_err(|e| Self::error(&setting, format!("invalid `{key}` value `{}`: {e}", setting.value)))
    }

    fn parse_bool(&mut self, key: &str) -> Result<Option<bool>, ParseError> {
        let Some(setting) = self.get(key) else { return Ok(None) };
        match setting.value.as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            other => Err(Self::error(&setting, format!("`{key}` must be true or false, found `{other}`"))),
        }
    }

    fn warn(&mut self, symbol: &str, detail: String) {
        tracing::warn!(preset = self.path, symbol, "{detail}");
        self.warnings.push(Diagnostic::new(DiagnosticKind::ParseWarning, None, detail).with_symbol(symbol));
    }

    fn run(mut self) -> Result<PresetDocument, ParseError> {
        let count_setting = self.get("shaders").ok_or_else(|| ParseError::new(self.path, None, "missing `shaders` pass count"))?;
        let count: usize = count_setting.value.parse().map_err(|_| Self::error(&count_setting, format!("`shaders` must be a pass count, found `{}`", count_setting.value)))?;

        for (key, setting) in &self.settings {
            if let Some(captures) = PASS_KEY_RE.captures(key)
                && captures[2].parse::<usize>().is_ok_and(|index| index >= count)
            {
                return Err(Self::error(setting, format!("`{key}` refers to a pass beyond `shaders = {count}`")));
            }
        }

        let passes = (0..count).map(|index| self.pass(index, count)).collect::<Result<Vec<_>, _>>()?;
        let textures = self.textures()?;
        let parameter_decls = self.parameter_decls(&passes);
        let parameter_overrides = self.parameter_overrides()?;

        let leftover: Vec<String> = self.settings.keys().filter(|k| !self.used.contains(*k)).cloned().collect();
        for key in leftover {
            self.warn(&key, format!("unknown preset key `{key}`"));
        }

        let mut parameters = BTreeMap::new();
        for decl in &parameter_decls {
            parameters.insert(decl.name.clone(), parameter_overrides.get(&decl.name).copied().unwrap_or(decl.default));
        }
        for name in parameter_overrides.keys().filter(|name| !parameters.contains_key(*name)) {
            tracing::warn!(preset = self.path, parameter = %name, "override of a parameter no pass declares");
            self.warnings.push(Diagnostic::new(DiagnosticKind::UnmappedParameter, None, format!("no pass declares parameter `{name}`")).with_symbol(name.clone()));
        }

        validate_names(self.path, &passes, &textures, &parameters)?;

        Ok(PresetDocument {
            path: self.path.to_string(),
            passes,
            textures,
            parameters,
            parameter_overrides,
            parameter_decls,
            warnings: self.warnings,
        })
    }

    fn load(&self, setting: &Setting) -> Result<(String, super::Expanded), ParseError> {
        let path = resolve_path(&setting.file, &setting.value);
        let expanded = load_shader(&path, self.load_file).map_err(|e| match e.line {
            Some(_) => e,
            None => Self::error(setting, e.message),
        })?;
        Ok((path, expanded))
    }

    fn pass(&mut self, index: usize, count: usize) -> Result<PassSpec, ParseError> {
        let shader = self.get(&format!("shader{index}"));
        let vertex = self.get(&format!("vertex{index}"));
        let fragment = self.get(&format!("fragment{index}"));

        let (source, includes) = match (shader, vertex, fragment) {
            (Some(shader), None, None) => {
                let (path, expanded) = self.load(&shader)?;
                (ShaderSource::Combined { path, source: expanded.text }, expanded.includes)
            }
            (None, Some(vertex), Some(fragment)) => {
                let (vertex_path, vertex) = self.load(&vertex)?;
                let (fragment_path, fragment) = self.load(&fragment)?;
                let mut includes = vertex.includes;
                includes.extend(fragment.includes.into_iter().filter(|p| !includes.contains(p)).collect::<Vec<_>>());
                (
                    ShaderSource::Split {
                        vertex_path,
                        vertex: vertex.text,
                        fragment_path,
                        fragment: fragment.text,
                    },
                    includes,
                )
            }
            (Some(shader), _, _) => return Err(Self::error(&shader, format!("pass {index} is declared both by `shader{index}` and by split stages"))),
            (None, Some(stage), None) | (None, None, Some(stage)) => return Err(Self::error(&stage, format!("pass {index} needs both `vertex{index}` and `fragment{index}`"))),
            (None, None, None) => return Err(ParseError::new(self.path, None, format!("no shader for pass {index} (`shaders = {count}`)"))),
        };

        let scale = self.scale(index, index + 1 == count)?;
        let filter = self.parse_bool(&format!("filter_linear{index}"))?.map(|linear| if linear { FilterMode::Linear } else { FilterMode::Nearest });
        let wrap_mode = self.parse_value::<WrapMode>(&format!("wrap_mode{index}"))?.unwrap_or_default();
        let frame_count_mod = self.parse_value::<u32>(&format!("frame_count_mod{index}"))?.filter(|m| *m > 1);
        let alias = match self.get(&format!("alias{index}")) {
            Some(setting) if setting.value.is_empty() => None,
            Some(setting) => Some(setting.value),
            None => source.sources().into_iter().find_map(scan_name),
        };
        let float_framebuffer = self.parse_bool(&format!("float_framebuffer{index}"))?.unwrap_or(false);
        let srgb_framebuffer = self.parse_bool(&format!("srgb_framebuffer{index}"))?.unwrap_or(false);
        let history_depth = self.parse_value::<u32>(&format!("history_depth{index}"))?.filter(|d| *d > 0);

        Ok(PassSpec {
            source,
            includes,
            scale,
            filter,
            wrap_mode,
            frame_count_mod,
            alias,
            float_framebuffer,
            srgb_framebuffer,
            history_depth,
        })
    }

    /// Per-axis sizing; passes without a scale type keep the default size
    ///
    /// The default is the source size, or the viewport for the last pass.
    fn scale(&mut self, index: usize, is_last: bool) -> Result<PassScale, ParseError> {
        let both = self.parse_value::<ScaleType>(&format!("scale_type{index}"))?;
        let type_x = self.parse_value::<ScaleType>(&format!("scale_type_x{index}"))?.or(both);
        let type_y = self.parse_value::<ScaleType>(&format!("scale_type_y{index}"))?.or(both);
        let factor = self.parse_value::<ScaleFactor>(&format!("scale{index}"))?;
        let factor_x = self.parse_value::<ScaleFactor>(&format!("scale_x{index}"))?.or(factor);
        let factor_y = self.parse_value::<ScaleFactor>(&format!("scale_y{index}"))?.or(factor);

        if type_x.is_none() && type_y.is_none() {
            if factor_x.is_some() || factor_y.is_some() {
                self.warn(&format!("scale{index}"), format!("pass {index} sets a scale without `scale_type{index}`; the scale is ignored"));
            }
            let axis = if is_last { AxisScale::VIEWPORT } else { AxisScale::SOURCE };
            return Ok(PassScale { x: axis, y: axis });
        }

        let axis = |scale_type: Option<ScaleType>, factor: Option<ScaleFactor>| AxisScale {
            scale_type: scale_type.unwrap_or(ScaleType::Source),
            factor: factor.unwrap_or(ScaleFactor::ONE),
        };
        Ok(PassScale {
            x: axis(type_x, factor_x),
            y: axis(type_y, factor_y),
        })
    }

    fn textures(&mut self) -> Result<BTreeMap<String, LookupTexture>, ParseError> {
        let mut textures = BTreeMap::new();
        let Some(list) = self.get("textures") else { return Ok(textures) };
        for name in list.value.split(';').map(str::trim).filter(|n| !n.is_empty()) {
            let path = self.get(name).ok_or_else(|| Self::error(&list, format!("lookup texture `{name}` has no path")))?;
            if path.value.is_empty() {
                return Err(Self::error(&path, format!("lookup texture `{name}` has no path")));
            }
            let texture = LookupTexture {
                path: resolve_path(&path.file, &path.value),
                filter: match self.parse_bool(&format!("{name}_linear"))? {
                    Some(false) => FilterMode::Nearest,
                    _ => FilterMode::Linear,
                },
                wrap_mode: self.parse_value::<WrapMode>(&format!("{name}_wrap_mode"))?.unwrap_or_default(),
                mipmap: self.parse_bool(&format!("{name}_mipmap"))?.unwrap_or(false),
            };
            if textures.insert(name.to_string(), texture).is_some() {
                return Err(Self::error(&list, format!("lookup texture `{name}` listed twice")));
            }
        }
        Ok(textures)
    }

    fn parameter_decls(&mut self, passes: &[PassSpec]) -> Vec<ParameterDecl> {
        let mut decls: Vec<ParameterDecl> = Vec::new();
        for (index, pass) in passes.iter().enumerate() {
            for source in pass.source.sources() {
                // Malformed declarations are reported when the pass is transpiled
                for decl in scan_parameters(source).into_iter().filter_map(|(_, decl)| decl.ok()) {
                    match decls.iter().find(|d| d.name == decl.name) {
                        Some(existing) if !existing.same_values(&decl) => {
                            let name = decl.name.clone();
                            self.warn(&name, format!("pass {index} redeclares parameter `{name}` with different values; the first declaration wins"));
                        }
                        Some(_) => {}
                        None => decls.push(decl),
                    }
                }
            }
        }
        decls
    }

    /// Values listed under `parameters`, plus any other numeric key
    fn parameter_overrides(&mut self) -> Result<BTreeMap<String, f32>, ParseError> {
        let mut overrides = BTreeMap::new();
        if let Some(list) = self.get("parameters") {
            for name in list.value.split(';').map(str::trim).filter(|n| !n.is_empty()) {
                let value = self.parse_value::<f32>(name)?.ok_or_else(|| Self::error(&list, format!("parameter `{name}` is listed without a value")))?;
                overrides.insert(name.to_string(), value);
            }
        }

        let unlisted: Vec<(String, f32)> = self
            .settings
            .iter()
            .filter(|(key, _)| !self.used.contains(*key))
            .filter_map(|(key, setting)| setting.value.parse::<f32>().ok().filter(|v| v.is_finite()).map(|v| (key.clone(), v)))
            .collect();
        for (key, value) in unlisted {
            self.used.insert(key.clone());
            overrides.insert(key, value);
        }
        Ok(overrides)
    }
}

/// Checks pass aliases, lookup texture names and every sampler the sources declare
///
/// Samplers are read after preprocessing with the effective parameter values, so
/// commented-out declarations and untaken branches are not checked.
fn validate_names(path: &str, passes: &[PassSpec], textures: &BTreeMap<String, LookupTexture>, parameters: &BTreeMap<String, f32>) -> Result<(), ParseError> {
    let mut seen = BTreeMap::new();
    for (index, pass) in passes.iter().enumerate() {
        let Some(alias) = &pass.alias else { continue };
        let at = |message: String| ParseError::new(path, None, message);
        if !alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') || alias.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(at(format!("alias `{alias}` of pass {index} is not an identifier")));
        }
        if is_reserved_texture_name(alias) {
            return Err(at(format!("alias `{alias}` of pass {index} shadows a built-in name")));
        }
        if textures.contains_key(alias) {
            return Err(at(format!("alias `{alias}` of pass {index} is also a lookup texture")));
        }
        if let Some(previous) = seen.insert(alias.clone(), index) {
            return Err(at(format!("alias `{alias}` is used by passes {previous} and {index}")));
        }
    }

    let names = NameTable::new(passes.iter().map(|p| p.alias.clone()).collect(), textures.keys().cloned());
    for (index, pass) in passes.iter().enumerate() {
        for (name, line) in declared_samplers(&pass.source, index, parameters) {
            let at = |message: String| ParseError::new(pass.source.path(), Some(line), message);
            let semantic = names.resolve_texture(&name).ok_or_else(|| at(format!("sampler `{name}` of pass {index} names no pass, lookup texture or history slot")))?;
            let producer = match semantic {
                TextureSemantic::PassOutput(p) | TextureSemantic::PassFeedback(p) | TextureSemantic::PassHistory { pass: p, .. } => Some(p),
                _ => None,
            };
            if let Some(producer) = producer
                && producer >= passes.len()
            {
                return Err(at(format!("sampler `{name}` of pass {index} refers to pass {producer}, but the preset has {} passes", passes.len())));
            }
            if let TextureSemantic::PassOutput(producer) = semantic
                && names.alias_pass(&name).is_some()
                && producer >= index
            {
                return Err(at(format!("pass {index} samples `{name}` before pass {producer} renders it; sample `{name}Feedback` for the previous frame")));
            }
        }
    }
    Ok(())
}
