//! Interface synthesis
//!
//! Collects what each stage declares, resolves everything the stages use without declaring,
//! threads vertex-computed globals through varyings, renames file-scope symbols and
//! assembles both sources around a single uniform block and one set of samplers.

use super::conditionals::TARGET_VERSION;
use super::glsl;
use super::items::{self, Declaration, Item, ItemKind, Reference};
use super::layout::{UniformLayout, UniformSource, UniformType};
use super::lexer::{self, Token, TokenKind, next_significant, prev_significant};
use super::rewrite::{self, FRAG_COLOR};
use super::{InterfaceVariable, Located, Rewrite, RewriteKind, SamplerBinding, Stage, TranspileErrorKind};
use crate::semantics::{NameTable, builtin_uniform};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// Binding of the synthesized uniform block
pub const UNIFORM_BINDING: u32 = 0;

/// Texture and sampler bindings of the `index`th sampler
pub fn sampler_bindings(index: usize) -> (u32, u32) {
    let base = 1 + 2 * index as u32;
    (base, base + 1)
}

/// Vertex attributes supplied by the renderer's full-screen quad
fn attribute_location(name: &str) -> Option<u32> {
    match name {
        "Position" | "VertexCoord" => Some(0),
        "TexCoord" => Some(1),
        "COLOR" | "Color" => Some(2),
        _ => None,
    }
}

/// Highest attribute location the quad supplies
const MAX_ATTRIBUTE_LOCATION: u32 = 2;

const VARYING_TYPES: &[&str] = &[
    "float", "vec2", "vec3", "vec4", "int", "ivec2", "ivec3", "ivec4", "uint", "uvec2", "uvec3", "uvec4", "mat2", "mat3", "mat4",
];

fn is_integer_type(ty: &str) -> bool {
    ty.starts_with("int") || ty.starts_with("uint") || ty.starts_with("ivec") || ty.starts_with("uvec")
}

/// Interface locations occupied by a variable
fn location_slots(ty: &str, array: Option<&str>) -> u32 {
    let per_element = match ty {
        "mat2" => 2,
        "mat3" => 3,
        "mat4" => 4,
        _ => 1,
    };
    let elements = array.and_then(|a| a.trim_matches(|c| c == '[' || c == ']').trim().parse::<u32>().ok()).unwrap_or(1);
    per_element * elements
}

#[derive(Debug, Clone)]
struct Global {
    name: String,
    ty: String,
    item: usize,
    name_token: usize,
    /// Mutable, uninitialized and not an array: eligible to become a varying
    plain: bool,
    line: usize,
}

#[derive(Debug, Clone)]
struct Varying {
    name: String,
    ty: String,
    array: Option<String>,
    location: Option<u32>,
    interpolation: Vec<String>,
    line: usize,
}

impl Varying {
    fn from_declaration(declaration: &Declaration, tokens: &[Token]) -> Vec<Varying> {
        declaration
            .declarators
            .iter()
            .map(|d| Varying {
                name: d.name.clone(),
                ty: declaration.ty.clone(),
                array: d.array.clone(),
                location: declaration.location(),
                interpolation: declaration.interpolation(),
                line: tokens[d.name_token].line,
            })
            .collect()
    }

    fn synthesized(name: &str, ty: &str, line: usize) -> Varying {
        Varying {
            name: name.to_string(),
            ty: ty.to_string(),
            array: None,
            location: None,
            interpolation: Vec::new(),
            line,
        }
    }
}

#[derive(Debug, Clone)]
struct UniformDecl {
    name: String,
    ty: UniformType,
    constant: Option<Vec<f32>>,
    stage: Stage,
    line: usize,
}

/// One stage under analysis
struct Unit {
    stage: Stage,
    tokens: Vec<Token>,
    items: Vec<Item>,
    /// Items the header re-emits
    removed: BTreeSet<usize>,
    globals: Vec<Global>,
    functions: Vec<(String, usize)>,
    structs: BTreeSet<String>,
    macros: BTreeSet<String>,
    inputs: Vec<Varying>,
    outputs: Vec<Varying>,
    /// References to file-scope globals and functions
    global_refs: Vec<Reference>,
    read: BTreeSet<String>,
    written: BTreeSet<String>,
    /// Undeclared identifiers in order of first use
    free: Vec<(String, usize)>,
}

impl Unit {
    fn at(&self, line: usize) -> impl Fn(TranspileErrorKind) -> Located + '_ {
        move |kind| Located {
            kind,
            stage: Some(self.stage),
            line,
        }
    }

    fn declares(&self, name: &str) -> bool {
        self.globals.iter().any(|g| g.name == name)
            || self.functions.iter().any(|(f, _)| f == name)
            || self.structs.contains(name)
            || self.macros.contains(name)
            || self.inputs.iter().any(|v| v.name == name)
            || self.outputs.iter().any(|v| v.name == name)
    }
}

/// Result of synthesis for both stages
pub(super) struct Synthesized {
    pub vertex_source: String,
    pub fragment_source: String,
    pub uniforms: UniformLayout,
    pub samplers: Vec<SamplerBinding>,
    pub vertex_inputs: Vec<InterfaceVariable>,
    pub varyings: Vec<InterfaceVariable>,
    pub fragment_inputs: Vec<InterfaceVariable>,
    pub fragment_outputs: Vec<InterfaceVariable>,
}

pub(super) struct Synthesizer<'a> {
    pass_index: usize,
    names: &'a NameTable,
    parameters: &'a BTreeMap<String, f32>,
    uniforms: Vec<UniformDecl>,
    /// Sampler names with the stage and line of first use
    samplers: Vec<(String, Stage, usize)>,
    log: &'a mut Vec<Rewrite>,
}

impl<'a> Synthesizer<'a> {
    /// # Arguments
    /// * `names` - Pass aliases and lookup textures of the preset
    /// * `parameters` - Every parameter of the preset, by name
    /// * `log` - Receives one entry per rewritten or synthesized construct
    pub fn new(pass_index: usize, names: &'a NameTable, parameters: &'a BTreeMap<String, f32>, log: &'a mut Vec<Rewrite>) -> Self {
        Self {
            pass_index,
            names,
            parameters,
            uniforms: Vec::new(),
            samplers: Vec::new(),
            log,
        }
    }

    pub fn run(mut self, vertex: Vec<Token>, fragment: Vec<Token>) -> Result<Synthesized, Located> {
        let mut vertex = self.prepare(Stage::Vertex, vertex)?;
        let mut fragment = self.prepare(Stage::Fragment, fragment)?;
        self.collect(&mut vertex)?;
        self.collect(&mut fragment)?;
        self.walk(&mut vertex);
        self.walk(&mut fragment);

        self.link_globals(&mut vertex, &mut fragment);
        self.resolve_free(&vertex)?;
        self.resolve_free(&fragment)?;
        let uniforms = self.layout()?;
        let samplers = self.bind_samplers()?;

        self.rename(&mut vertex, &mut fragment);
        blank_removed(&mut vertex);
        blank_removed(&mut fragment);

        let vertex_inputs = vertex
            .inputs
            .iter()
            .map(|v| {
                let location = attribute_location(&v.name)
                    .or(v.location.filter(|l| *l <= MAX_ATTRIBUTE_LOCATION))
                    .ok_or_else(|| vertex.at(v.line)(TranspileErrorKind::UnsupportedDeclaration(format!("vertex input `{}` matches no quad attribute", v.name))))?;
                Ok(interface_variable(v, location))
            })
            .collect::<Result<Vec<_>, Located>>()?;
        let (varyings, fragment_inputs) = self.assign_varying_locations(&vertex.outputs, &fragment.inputs);
        let fragment_outputs = self.assign_output_locations(&fragment.outputs);

        let header = header(&uniforms, &samplers);
        let vertex_source = assemble(&header, &vertex_inputs, &varyings, &vertex.tokens);
        let fragment_source = assemble(&header, &fragment_inputs, &fragment_outputs, &fragment.tokens);

        Ok(Synthesized {
            vertex_source,
            fragment_source,
            uniforms,
            samplers,
            vertex_inputs,
            varyings,
            fragment_inputs,
            fragment_outputs,
        })
    }

    fn rewrite(&mut self, stage: Stage, line: usize, kind: RewriteKind, detail: String) {
        self.log.push(Rewrite::new(stage, line, kind, detail));
    }

    /// Token rewrites that change the token count, followed by the final item split
    fn prepare(&mut self, stage: Stage, mut tokens: Vec<Token>) -> Result<Unit, Located> {
        let at = |(kind, line)| Located { kind, stage: Some(stage), line };
        let first = items::parse_items(&tokens).map_err(at)?;

        let mut instances = BTreeSet::new();
        let mut declared_samplers = BTreeSet::new();
        let mut functions = BTreeSet::new();
        for item in &first {
            match &item.kind {
                ItemKind::Block(block) => instances.extend(block.instance.clone()),
                ItemKind::Declaration(declaration) if declaration.ty == "sampler2D" => {
                    declared_samplers.extend(declaration.declarators.iter().map(|d| d.name.clone()));
                }
                ItemKind::Function(function) => {
                    functions.insert(function.name.clone());
                }
                _ => {}
            }
        }

        rewrite::strip_block_instances(&mut tokens, &instances);
        let writes_frag_color = rewrite::translate_legacy(&mut tokens, stage, self.log);
        let names = self.names;
        rewrite::rewrite_texture_calls(
            &mut tokens,
            stage,
            &|name: &str| declared_samplers.contains(name) || names.resolve_texture(name).is_some(),
            &functions,
            self.log,
        );

        let items = items::parse_items(&tokens).map_err(at)?;
        let mut unit = Unit {
            stage,
            tokens,
            items,
            removed: BTreeSet::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            structs: BTreeSet::new(),
            macros: BTreeSet::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            global_refs: Vec::new(),
            read: BTreeSet::new(),
            written: BTreeSet::new(),
            free: Vec::new(),
        };
        if writes_frag_color {
            unit.outputs.push(Varying::synthesized(FRAG_COLOR, "vec4", 0));
        }
        Ok(unit)
    }

    /// Records a stage's file-scope declarations
    fn collect(&mut self, unit: &mut Unit) -> Result<(), Located> {
        let stage = unit.stage;
        let items = std::mem::take(&mut unit.items);

        for (index, item) in items.iter().enumerate() {
            let unsupported = |detail: String| Located {
                kind: TranspileErrorKind::UnsupportedDeclaration(detail),
                stage: Some(stage),
                line: item.line,
            };
            match &item.kind {
                ItemKind::Precision => {
                    unit.removed.insert(index);
                }
                ItemKind::Macro { name, .. } => {
                    unit.macros.insert(name.clone());
                }
                ItemKind::Struct { name } => {
                    unit.structs.insert(name.clone());
                }
                ItemKind::Function(function) => unit.functions.push((function.name.clone(), function.name_token)),
                ItemKind::Block(block) => {
                    if !block.qualifiers.iter().any(|q| q == "uniform") {
                        return Err(unsupported(format!("interface block `{}`", block.name)));
                    }
                    for member in &block.members {
                        self.add_uniforms(member, &unit.tokens, stage, item.line)?;
                    }
                    unit.removed.insert(index);
                }
                ItemKind::Declaration(declaration) => {
                    let storage = ["uniform", "in", "out", "attribute", "varying", "inout", "buffer", "shared"].into_iter().find(|q| declaration.has(q));
                    match (storage, stage) {
                        (Some("uniform"), _) if declaration.ty == "sampler2D" => {
                            for declarator in &declaration.declarators {
                                if declarator.array.is_some() {
                                    return Err(unsupported(format!("sampler array `{}`", declarator.name)));
                                }
                                self.add_sampler(&declarator.name, stage, item.line);
                            }
                            unit.removed.insert(index);
                        }
                        (Some("uniform"), _) => {
                            self.add_uniforms(declaration, &unit.tokens, stage, item.line)?;
                            unit.removed.insert(index);
                        }
                        (Some("in" | "attribute"), Stage::Vertex) | (Some("in" | "varying"), Stage::Fragment) => {
                            unit.inputs.extend(Varying::from_declaration(declaration, &unit.tokens));
                            unit.removed.insert(index);
                        }
                        (Some("out" | "varying"), _) => {
                            unit.outputs.extend(Varying::from_declaration(declaration, &unit.tokens));
                            unit.removed.insert(index);
                        }
                        (Some(storage), _) => {
                            let names: Vec<_> = declaration.declarators.iter().map(|d| d.name.as_str()).collect();
                            return Err(unsupported(format!("`{storage}` declaration of `{}` in the {} stage", names.join(", "), stage.name())));
                        }
                        (None, _) => {
                            for declarator in &declaration.declarators {
                                unit.globals.push(Global {
                                    name: declarator.name.clone(),
                                    ty: declaration.ty.clone(),
                                    item: index,
                                    name_token: declarator.name_token,
                                    plain: !declaration.has("const") && declarator.initializer.is_none() && declarator.array.is_none(),
                                    line: unit.tokens[declarator.name_token].line,
                                });
                            }
                        }
                    }
                }
                ItemKind::Directive | ItemKind::Stray => {}
            }
        }

        unit.items = items;
        Ok(())
    }

    fn add_sampler(&mut self, name: &str, stage: Stage, line: usize) {
        if !self.samplers.iter().any(|(n, _, _)| n == name) {
            self.samplers.push((name.to_string(), stage, line));
        }
    }

    fn add_uniforms(&mut self, declaration: &Declaration, tokens: &[Token], stage: Stage, line: usize) -> Result<(), Located> {
        let at = |kind| Located { kind, stage: Some(stage), line };
        let ty = UniformType::from_glsl(&declaration.ty).ok_or_else(|| at(TranspileErrorKind::UnsupportedDeclaration(format!("uniform of type `{}`", declaration.ty))))?;
        for declarator in &declaration.declarators {
            if declarator.array.is_some() {
                return Err(at(TranspileErrorKind::UnsupportedDeclaration(format!("uniform array `{}`", declarator.name))));
            }
            let constant = declarator
                .initializer
                .map(|(start, end)| parse_constant(&tokens[start..end], ty))
                .transpose()
                .map_err(|detail| at(TranspileErrorKind::UnsupportedDeclaration(format!("initializer of uniform `{}`: {detail}", declarator.name))))?;
            self.push_uniform(UniformDecl {
                name: declarator.name.clone(),
                ty,
                constant,
                stage,
                line,
            })?;
        }
        Ok(())
    }

    fn push_uniform(&mut self, uniform: UniformDecl) -> Result<(), Located> {
        match self.uniforms.iter().find(|u| u.name == uniform.name) {
            Some(existing) if existing.ty != uniform.ty => Err(Located {
                kind: TranspileErrorKind::AmbiguousRedefinition {
                    name: uniform.name.clone(),
                    previous: existing.ty.glsl_name().to_string(),
                    current: uniform.ty.glsl_name().to_string(),
                },
                stage: Some(uniform.stage),
                line: uniform.line,
            }),
            Some(_) => Ok(()),
            None => {
                self.uniforms.push(uniform);
                Ok(())
            }
        }
    }

    fn is_shared_name(&self, name: &str) -> bool {
        self.uniforms.iter().any(|u| u.name == name) || self.samplers.iter().any(|(n, _, _)| n == name)
    }

    /// Classifies every identifier use in a stage
    fn walk(&self, unit: &mut Unit) {
        let mut references = Vec::new();
        for item in &unit.items {
            match &item.kind {
                ItemKind::Function(function) => {
                    if let Some((open, close)) = function.body {
                        references.extend(items::references(&unit.tokens, open, close + 1, &function.params, &unit.structs));
                    }
                }
                ItemKind::Macro { params, .. } => references.extend(items::references(&unit.tokens, item.start + 1, item.end, params, &unit.structs)),
                ItemKind::Declaration(declaration) => {
                    for (start, end) in declaration.declarators.iter().filter_map(|d| d.initializer) {
                        references.extend(items::references(&unit.tokens, start, end, &[], &unit.structs));
                    }
                }
                _ => {}
            }
        }

        for reference in references {
            let token = &unit.tokens[reference.token];
            let name = token.text.clone();
            let is_global = unit.globals.iter().any(|g| g.name == name) || unit.functions.iter().any(|(f, _)| *f == name);
            if is_global {
                if reference.write {
                    unit.written.insert(name.clone());
                } else {
                    unit.read.insert(name);
                }
                unit.global_refs.push(reference);
            } else if !unit.declares(&name) && !self.is_shared_name(&name) && !unit.free.iter().any(|(n, _)| *n == name) {
                unit.free.push((name, token.line));
            }
        }
    }

    /// Threads values computed by the vertex stage into the fragment stage
    ///
    /// A mutable global written by the vertex stage becomes a varying when the fragment
    /// stage only reads it, either through its own declaration of the same global or as
    /// an undeclared identifier. Undeclared fragment identifiers naming a vertex output
    /// become fragment inputs.
    fn link_globals(&mut self, vertex: &mut Unit, fragment: &mut Unit) {
        let mut converted = BTreeSet::new();
        for global in vertex.globals.iter().filter(|g| g.plain && VARYING_TYPES.contains(&g.ty.as_str())) {
            if !vertex.written.contains(&global.name) || converted.contains(&global.name) {
                continue;
            }
            let eligible = match fragment.globals.iter().find(|g| g.name == global.name) {
                Some(mirror) => mirror.plain && mirror.ty == global.ty && fragment.read.contains(&global.name) && !fragment.written.contains(&global.name),
                None => fragment.free.iter().any(|(n, _)| *n == global.name),
            };
            if !eligible {
                continue;
            }
            let mut varying = Varying::synthesized(&global.name, &global.ty, global.line);
            if is_integer_type(&global.ty) {
                varying.interpolation.push("flat".to_string());
            }
            self.rewrite(Stage::Vertex, global.line, RewriteKind::SynthesizedVarying, format!("global `{} {}` passed to the fragment stage", global.ty, global.name));
            vertex.outputs.push(varying.clone());
            fragment.inputs.push(varying);
            converted.insert(global.name.clone());
        }

        for unit in [&mut *vertex, &mut *fragment] {
            let (keep, moved): (Vec<_>, Vec<_>) = unit.globals.drain(..).partition(|g| !converted.contains(&g.name));
            unit.globals = keep;
            blank_declarators(&mut unit.tokens, &unit.items, &moved);
            unit.global_refs.retain(|r| !converted.contains(&unit.tokens[r.token].text));
        }
        fragment.free.retain(|(name, _)| !converted.contains(name));

        let outputs = vertex.outputs.clone();
        let mut remaining = Vec::new();
        for (name, line) in std::mem::take(&mut fragment.free) {
            match outputs.iter().find(|v| v.name == name) {
                Some(output) => {
                    self.rewrite(Stage::Fragment, line, RewriteKind::SynthesizedVarying, format!("input `{} {name}` matched to the vertex output", output.ty));
                    fragment.inputs.push(output.clone());
                }
                None => remaining.push((name, line)),
            }
        }
        fragment.free = remaining;
    }

    /// Resolves undeclared identifiers against the built-in table, parameters and samplers
    fn resolve_free(&mut self, unit: &Unit) -> Result<(), Located> {
        for (name, line) in &unit.free {
            if self.is_shared_name(name) {
                continue;
            }
            let ty = if let Some((_, ty)) = builtin_uniform(name) {
                ty
            } else if self.parameters.contains_key(name) {
                UniformType::Float
            } else if self.names.resolve_texture(name).is_some() {
                self.rewrite(unit.stage, *line, RewriteKind::SynthesizedSampler, format!("implicit sampler `{name}`"));
                self.add_sampler(name, unit.stage, *line);
                continue;
            } else if self.names.resolve_texture_size(name).is_some() {
                UniformType::Vec4
            } else {
                return Err(unit.at(*line)(TranspileErrorKind::UnknownSymbol(name.clone())));
            };
            self.rewrite(unit.stage, *line, RewriteKind::SynthesizedUniform, format!("implicit uniform `{} {name}`", ty.glsl_name()));
            self.push_uniform(UniformDecl {
                name: name.clone(),
                ty,
                constant: None,
                stage: unit.stage,
                line: *line,
            })?;
        }
        Ok(())
    }

    /// Binds every uniform member to its value source and lays out the block
    fn layout(&self) -> Result<UniformLayout, Located> {
        let members = self
            .uniforms
            .iter()
            .map(|uniform| {
                let source = if let Some((builtin, _)) = builtin_uniform(&uniform.name) {
                    UniformSource::Builtin(builtin)
                } else if self.parameters.contains_key(&uniform.name) {
                    UniformSource::Parameter(uniform.name.clone())
                } else if let Some(semantic) = self.names.resolve_texture_size(&uniform.name) {
                    UniformSource::TextureSize(semantic)
                } else if let Some(values) = &uniform.constant {
                    UniformSource::Constant(values.clone())
                } else {
                    return Err(Located {
                        kind: TranspileErrorKind::UnknownSymbol(uniform.name.clone()),
                        stage: Some(uniform.stage),
                        line: uniform.line,
                    });
                };
                Ok((uniform.name.clone(), uniform.ty, source))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(UniformLayout::std140(members))
    }

    fn bind_samplers(&self) -> Result<Vec<SamplerBinding>, Located> {
        self.samplers
            .iter()
            .enumerate()
            .map(|(index, (name, stage, line))| {
                let semantic = self.names.resolve_texture(name).ok_or_else(|| Located {
                    kind: TranspileErrorKind::UnresolvedSampler(name.clone()),
                    stage: Some(*stage),
                    line: *line,
                })?;
                let (texture_binding, sampler_binding) = sampler_bindings(index);
                Ok(SamplerBinding {
                    name: name.clone(),
                    semantic,
                    texture_binding,
                    sampler_binding,
                })
            })
            .collect()
    }

    /// Prefixes file-scope globals and helper functions with the pass identifier
    fn rename(&mut self, vertex: &mut Unit, fragment: &mut Unit) {
        let prefix = format!("p{}_", self.pass_index);
        let mut logged = BTreeSet::new();
        for unit in [vertex, fragment] {
            let mut targets: Vec<(String, usize, usize)> = unit.globals.iter().map(|g| (g.name.clone(), g.name_token, g.line)).collect();
            targets.extend(unit.functions.iter().map(|(name, token)| (name.clone(), *token, unit.tokens[*token].line)));
            targets.retain(|(name, _, _)| name != "main" && !name.starts_with(&prefix));
            let renamed: BTreeSet<String> = targets.iter().map(|(name, _, _)| name.clone()).collect();

            for (name, token, line) in &targets {
                if logged.insert(name.clone()) {
                    self.rewrite(unit.stage, *line, RewriteKind::Renamed, format!("`{name}` -> `{prefix}{name}`"));
                }
                unit.tokens[*token].text = format!("{prefix}{name}");
            }
            for reference in &unit.global_refs {
                let token = &mut unit.tokens[reference.token];
                if renamed.contains(&token.text) {
                    token.text = format!("{prefix}{}", token.text);
                }
            }
        }
    }

    /// Pairs vertex outputs with fragment inputs by name and fills in missing locations
    fn assign_varying_locations(&mut self, outputs: &[Varying], inputs: &[Varying]) -> (Vec<InterfaceVariable>, Vec<InterfaceVariable>) {
        let mut used = BTreeSet::new();
        for v in outputs.iter().chain(inputs) {
            if let Some(location) = v.location {
                used.extend(location..location + location_slots(&v.ty, v.array.as_deref()));
            }
        }

        let mut assigned = BTreeMap::new();
        let mut vertex = Vec::new();
        for v in outputs {
            let paired = inputs.iter().find(|i| i.name == v.name).and_then(|i| i.location);
            let location = match v.location.or(paired) {
                Some(location) => location,
                None => {
                    let location = next_free(&mut used, location_slots(&v.ty, v.array.as_deref()));
                    self.rewrite(Stage::Vertex, v.line, RewriteKind::LocationAssigned, format!("`{}` at location {location}", v.name));
                    location
                }
            };
            assigned.insert(v.name.clone(), location);
            vertex.push(interface_variable(v, location));
        }

        let mut fragment = Vec::new();
        for v in inputs {
            let location = match v.location.or_else(|| assigned.get(&v.name).copied()) {
                Some(location) => location,
                None => {
                    let location = next_free(&mut used, location_slots(&v.ty, v.array.as_deref()));
                    self.rewrite(Stage::Fragment, v.line, RewriteKind::LocationAssigned, format!("`{}` at location {location}", v.name));
                    location
                }
            };
            fragment.push(interface_variable(v, location));
        }
        (vertex, fragment)
    }

    fn assign_output_locations(&mut self, outputs: &[Varying]) -> Vec<InterfaceVariable> {
        let mut used: BTreeSet<u32> = outputs.iter().filter_map(|v| v.location).collect();
        outputs
            .iter()
            .map(|v| {
                let location = v.location.unwrap_or_else(|| next_free(&mut used, 1));
                interface_variable(v, location)
            })
            .collect()
    }
}

fn next_free(used: &mut BTreeSet<u32>, slots: u32) -> u32 {
    let mut location = 0;
    while (location..location + slots).any(|l| used.contains(&l)) {
        location += 1;
    }
    used.extend(location..location + slots);
    location
}

fn interface_variable(v: &Varying, location: u32) -> InterfaceVariable {
    InterfaceVariable {
        name: v.name.clone(),
        ty: v.ty.clone(),
        array: v.array.clone(),
        location,
        interpolation: v.interpolation.clone(),
        flat: v.interpolation.iter().any(|q| q == "flat") || is_integer_type(&v.ty),
    }
}

/// Parses a uniform initializer made of numeric literals, e.g. `vec2(1.0, -0.5)`
fn parse_constant(tokens: &[Token], ty: UniformType) -> Result<Vec<f32>, String> {
    let significant: Vec<&Token> = tokens.iter().filter(|t| t.is_significant()).collect();
    let inner = match significant.as_slice() {
        [constructor, open, rest @ .., close] if glsl::is_builtin_type(&constructor.text) && open.is_punct("(") && close.is_punct(")") => rest,
        all => all,
    };

    let mut values = Vec::new();
    let mut negative = false;
    for token in inner {
        let value = match (token.kind, token.text.as_str()) {
            (TokenKind::Punct, "-") => {
                negative = !negative;
                continue;
            }
            (TokenKind::Punct, "+" | ",") => continue,
            (TokenKind::Ident, "true") => 1.0,
            (TokenKind::Ident, "false") => 0.0,
            (TokenKind::Number, text) => text
                .trim_end_matches(['f', 'F', 'u', 'U'])
                .parse::<f32>()
                .map_err(|_| format!("`{text}` is not a number"))?,
            (_, text) => return Err(format!("`{text}` is not a literal")),
        };
        values.push(if negative { -value } else { value });
        negative = false;
    }

    let components = ty.components() as usize;
    match values.len() {
        1 if components > 1 => Ok(vec![values[0]; components]),
        n if n == components => Ok(values),
        n => Err(format!("{n} values for a {}", ty.glsl_name())),
    }
}

/// Clears a token range, keeping line breaks
fn blank(tokens: &mut [Token]) {
    for token in tokens.iter_mut().filter(|t| t.kind != TokenKind::Newline) {
        token.text.clear();
    }
}

fn blank_removed(unit: &mut Unit) {
    for &index in &unit.removed {
        let item = &unit.items[index];
        blank(&mut unit.tokens[item.start..item.end]);
    }
}

/// Removes declarators of globals that became varyings
fn blank_declarators(tokens: &mut [Token], items: &[Item], moved: &[Global]) {
    for global in moved {
        let item = &items[global.item];
        let ItemKind::Declaration(declaration) = &item.kind else { continue };
        let remaining = declaration.declarators.iter().filter(|d| !moved.iter().any(|m| m.name_token == d.name_token)).count();
        if remaining == 0 {
            blank(&mut tokens[item.start..item.end]);
            continue;
        }
        let token = global.name_token;
        tokens[token].text.clear();
        let comma = next_significant(tokens, token + 1)
            .filter(|&n| tokens[n].is_punct(","))
            .or_else(|| prev_significant(tokens, token).filter(|&p| tokens[p].is_punct(",")));
        if let Some(comma) = comma {
            tokens[comma].text.clear();
        }
    }
}

/// Declarations shared by both stages: version, uniform block and samplers
fn header(uniforms: &UniformLayout, samplers: &[SamplerBinding]) -> String {
    let mut out = format!("#version {TARGET_VERSION}\n\n");
    if !uniforms.is_empty() {
        let _ = writeln!(out, "layout(set = 0, binding = {UNIFORM_BINDING}, std140) uniform PassUniforms {{");
        for member in &uniforms.members {
            let _ = writeln!(out, "    {} {};", member.ty.glsl_name(), member.name);
        }
        out.push_str("};\n\n");
    }
    for sampler in samplers {
        let name = &sampler.name;
        let _ = writeln!(out, "layout(set = 0, binding = {}) uniform texture2D {name}_texture;", sampler.texture_binding);
        let _ = writeln!(out, "layout(set = 0, binding = {}) uniform sampler {name}_sampler;", sampler.sampler_binding);
        let _ = writeln!(out, "#define {name} sampler2D({name}_texture, {name}_sampler)");
    }
    if !samplers.is_empty() {
        out.push('\n');
    }
    out
}

fn declare_interface(out: &mut String, variable: &InterfaceVariable, direction: &str) {
    let mut qualifiers = variable.interpolation.clone();
    if variable.flat && !qualifiers.iter().any(|q| q == "flat") {
        qualifiers.push("flat".to_string());
    }
    let qualifiers: String = qualifiers.iter().map(|q| format!("{q} ")).collect();
    let _ = writeln!(
        out,
        "layout(location = {}) {qualifiers}{direction} {} {}{};",
        variable.location,
        variable.ty,
        variable.name,
        variable.array.as_deref().unwrap_or("")
    );
}

fn assemble(header: &str, inputs: &[InterfaceVariable], outputs: &[InterfaceVariable], tokens: &[Token]) -> String {
    let mut out = header.to_string();
    for input in inputs {
        declare_interface(&mut out, input, "in");
    }
    for output in outputs {
        declare_interface(&mut out, output, "out");
    }
    if !inputs.is_empty() || !outputs.is_empty() {
        out.push('\n');
    }

    let body = lexer::render(tokens);
    let mut blank_run = true;
    for line in body.lines().map(str::trim_end) {
        if line.is_empty() {
            if !blank_run {
                out.push('\n');
            }
            blank_run = true;
        } else {
            out.push_str(line);
            out.push('\n');
            blank_run = false;
        }
    }
    out
}
