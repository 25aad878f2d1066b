//! Pass graph construction
//!
//! Turns a parsed preset and its transpiled passes into an [`ExecutionPlan`]: every
//! sampler resolved to a concrete producer, passes ordered so that same-frame reads
//! follow their writes, history retention per producer, and the offscreen targets the
//! renderer has to allocate.

mod lifetimes;
mod sizing;

pub use lifetimes::{PhysicalTarget, TargetLifetime, assign_physical_targets};
pub use sizing::{AxisExpr, InvalidScale, Size, SizeBase, SizeExpr, size_exprs};

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::preset::{FilterMode, LookupTexture, PresetDocument, TargetFormat, WrapMode};
use crate::semantics::TextureSemantic;
use crate::transpile::{CompiledPass, ParameterDecl, UniformSource};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Deepest history a preset may request unless configured otherwise
pub const DEFAULT_MAX_HISTORY_DEPTH: u32 = 16;
/// Longest pass chain accepted unless configured otherwise
pub const DEFAULT_MAX_PASSES: usize = 64;

/// Upper bounds enforced while building a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_history_depth: u32,
    pub max_passes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_history_depth: DEFAULT_MAX_HISTORY_DEPTH,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

/// Whose past outputs a history slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum HistoryProducer {
    /// The primary input
    Original,
    Pass(usize),
}

/// A texture input after name resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ResolvedInput {
    /// The primary input of the current frame
    Original,
    /// A pass's output from the current frame
    PassOutput(usize),
    /// An output from `depth` frames back
    History { producer: HistoryProducer, depth: u32 },
    /// A static lookup texture
    Lookup(String),
}

/// Maps a semantic as seen from `pass_index` to the input it reads
///
/// `Source` is the previous pass in document order, or the primary input for the first
/// pass. Feedback is one frame of history.
pub fn resolve_semantic(pass_index: usize, semantic: &TextureSemantic) -> ResolvedInput {
    match semantic {
        TextureSemantic::Original => ResolvedInput::Original,
        TextureSemantic::Source => match pass_index.checked_sub(1) {
            Some(previous) => ResolvedInput::PassOutput(previous),
            None => ResolvedInput::Original,
        },
        TextureSemantic::OriginalHistory(depth) => ResolvedInput::History {
            producer: HistoryProducer::Original,
            depth: *depth,
        },
        TextureSemantic::PassOutput(pass) => ResolvedInput::PassOutput(*pass),
        TextureSemantic::PassFeedback(pass) => ResolvedInput::History {
            producer: HistoryProducer::Pass(*pass),
            depth: 1,
        },
        TextureSemantic::PassHistory { pass, depth } => ResolvedInput::History {
            producer: HistoryProducer::Pass(*pass),
            depth: *depth,
        },
        TextureSemantic::Lookup(name) => ResolvedInput::Lookup(name.clone()),
    }
}

/// A sampler of a planned pass with its input and sampling state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedBinding {
    pub name: String,
    pub input: ResolvedInput,
    pub texture_binding: u32,
    pub sampler_binding: u32,
    pub filter: FilterMode,
    pub wrap_mode: WrapMode,
}

/// Where a pass draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputTarget {
    /// A physical target from [`ExecutionPlan::targets`]
    Target(u32),
    /// Straight to the host's canvas
    Canvas,
}

/// How the final image reaches the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Presentation {
    /// The final pass renders into the canvas itself
    Direct,
    /// The final pass renders offscreen and its target is copied to the canvas
    Blit,
}

/// One step of the plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedPass {
    pub pass_index: usize,
    pub compiled: CompiledPass,
    pub inputs: Vec<ResolvedBinding>,
    pub size: SizeExpr,
    /// `#pragma format`, else the framebuffer flags
    pub format: TargetFormat,
    pub frame_count_mod: Option<u32>,
    pub output: OutputTarget,
    pub alias: Option<String>,
}

/// Frames of history kept per producer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryRetention {
    pub original: u32,
    /// Indexed by pass
    pub passes: Vec<u32>,
}

impl HistoryRetention {
    pub fn depth(&self, producer: HistoryProducer) -> u32 {
        match producer {
            HistoryProducer::Original => self.original,
            HistoryProducer::Pass(pass) => self.passes.get(pass).copied().unwrap_or(0),
        }
    }

    /// Deepest retention of any producer
    pub fn max(&self) -> u32 {
        self.passes.iter().copied().fold(self.original, u32::max)
    }
}

/// Everything the renderer needs to draw a preset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    /// Passes in execution order
    pub passes: Vec<PlannedPass>,
    pub targets: Vec<PhysicalTarget>,
    pub presentation: Presentation,
    /// Pass whose output is the final image
    pub final_pass: usize,
    pub retention: HistoryRetention,
    pub textures: BTreeMap<String, LookupTexture>,
    pub parameters: BTreeMap<String, f32>,
    pub parameter_decls: Vec<ParameterDecl>,
}

impl ExecutionPlan {
    pub fn pass(&self, pass_index: usize) -> Option<&PlannedPass> {
        self.passes.iter().find(|p| p.pass_index == pass_index)
    }

    /// Output size of every pass, indexed by pass
    pub fn resolve_sizes(&self, original: Size, viewport: Size) -> Result<Vec<Size>, BuildError> {
        if original.is_empty() {
            return Err(BuildError::EmptySize("original input"));
        }
        if viewport.is_empty() {
            return Err(BuildError::EmptySize("viewport"));
        }
        let mut sizes = vec![Size::default(); self.passes.len()];
        for pass in &self.passes {
            sizes[pass.pass_index] = pass.size.resolve(original, viewport);
        }
        Ok(sizes)
    }

    /// Parameters whose values any pass's conditional compilation depends on
    pub fn define_dependencies(&self) -> BTreeSet<String> {
        self.passes.iter().flat_map(|p| p.compiled.define_dependencies.iter().cloned()).collect()
    }

    /// Largest number of samplers any pass binds
    pub fn max_samplers(&self) -> usize {
        self.passes.iter().map(|p| p.inputs.len()).max().unwrap_or(0)
    }
}

/// The pass graph cannot be executed; the previous plan stays active
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("preset has {passes} passes but {compiled} were compiled")]
    PassCountMismatch { passes: usize, compiled: usize },
    #[error("preset has {count} passes, more than the limit of {limit}")]
    TooManyPasses { count: usize, limit: usize },
    #[error("pass {pass_index}: `{symbol}` refers to pass {producer}, which does not exist")]
    UnknownProducer { pass_index: usize, symbol: String, producer: usize },
    #[error("pass {pass_index}: `{symbol}` reads {depth} frames back, more than the limit of {limit}")]
    HistoryTooDeep { pass_index: usize, symbol: String, depth: u32, limit: u32 },
    #[error("same-frame dependency cycle: {}", format_cycle(.0))]
    Cycle(Vec<usize>),
    #[error("pass {}: invalid {} scale: {}", .0.pass_index, .0.axis, .0.reason)]
    InvalidScale(InvalidScale),
    #[error("{0} has zero size")]
    EmptySize(&'static str),
}

fn format_cycle(cycle: &[usize]) -> String {
    let mut names: Vec<String> = cycle.iter().map(|p| format!("pass {p}")).collect();
    if let Some(first) = names.first().cloned() {
        names.push(first);
    }
    names.join(" -> ")
}

impl BuildError {
    pub fn pass_index(&self) -> Option<usize> {
        match self {
            Self::UnknownProducer { pass_index, .. } | Self::HistoryTooDeep { pass_index, .. } => Some(*pass_index),
            Self::InvalidScale(invalid) => Some(invalid.pass_index),
            Self::Cycle(cycle) => cycle.first().copied(),
            Self::PassCountMismatch { .. } | Self::TooManyPasses { .. } | Self::EmptySize(_) => None,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let diagnostic = Diagnostic::new(DiagnosticKind::BuildError, self.pass_index(), self.to_string());
        match self {
            Self::UnknownProducer { symbol, .. } | Self::HistoryTooDeep { symbol, .. } => diagnostic.with_symbol(symbol.clone()),
            _ => diagnostic,
        }
    }
}

/// Builds a plan with the default limits
pub fn build(document: &PresetDocument, compiled: Vec<CompiledPass>) -> Result<ExecutionPlan, BuildError> {
    build_with_limits(document, compiled, &Limits::default())
}

/// Builds the execution plan of a preset
///
/// # Arguments
/// * `document` - The parsed preset
/// * `compiled` - Transpiled passes, one per preset pass in document order
/// * `limits` - Pass count and history depth bounds
pub fn build_with_limits(document: &PresetDocument, compiled: Vec<CompiledPass>, limits: &Limits) -> Result<ExecutionPlan, BuildError> {
    let count = document.passes.len();
    if compiled.len() != count {
        return Err(BuildError::PassCountMismatch { passes: count, compiled: compiled.len() });
    }
    if count > limits.max_passes {
        return Err(BuildError::TooManyPasses { count, limit: limits.max_passes });
    }

    let sizes = size_exprs(&document.passes.iter().map(|p| p.scale).collect::<Vec<_>>()).map_err(BuildError::InvalidScale)?;

    // Resolve inputs and collect same-frame edges and history requests
    let mut inputs: Vec<Vec<ResolvedBinding>> = Vec::with_capacity(count);
    let mut predecessors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
    let mut retention = HistoryRetention {
        original: 0,
        passes: vec![0; count],
    };
    for (pass_index, (spec, pass)) in document.passes.iter().zip(&compiled).enumerate() {
        let check = |symbol: &str, input: &ResolvedInput| -> Result<(), BuildError> {
            let (producer, depth) = match input {
                ResolvedInput::PassOutput(p) => (Some(*p), 0),
                ResolvedInput::History { producer, depth } => (
                    match producer {
                        HistoryProducer::Pass(p) => Some(*p),
                        HistoryProducer::Original => None,
                    },
                    *depth,
                ),
                ResolvedInput::Original | ResolvedInput::Lookup(_) => (None, 0),
            };
            if let Some(producer) = producer
                && producer >= count
            {
                return Err(BuildError::UnknownProducer {
                    pass_index,
                    symbol: symbol.to_string(),
                    producer,
                });
            }
            if depth > limits.max_history_depth {
                return Err(BuildError::HistoryTooDeep {
                    pass_index,
                    symbol: symbol.to_string(),
                    depth,
                    limit: limits.max_history_depth,
                });
            }
            Ok(())
        };

        let mut bindings = Vec::with_capacity(pass.samplers.len());
        for sampler in &pass.samplers {
            let input = resolve_semantic(pass_index, &sampler.semantic);
            check(&sampler.name, &input)?;
            match &input {
                ResolvedInput::PassOutput(producer) => {
                    predecessors[pass_index].insert(*producer);
                }
                ResolvedInput::History { producer, depth } => {
                    let slot = match producer {
                        HistoryProducer::Original => &mut retention.original,
                        HistoryProducer::Pass(p) => &mut retention.passes[*p],
                    };
                    *slot = (*slot).max(*depth);
                }
                ResolvedInput::Original | ResolvedInput::Lookup(_) => {}
            }
            let (filter, wrap_mode) = match &input {
                ResolvedInput::Lookup(name) => document.textures.get(name).map(|t| (t.filter, t.wrap_mode)).unwrap_or_default(),
                _ => (spec.filter.unwrap_or_default(), spec.wrap_mode),
            };
            bindings.push(ResolvedBinding {
                name: sampler.name.clone(),
                input,
                texture_binding: sampler.texture_binding,
                sampler_binding: sampler.sampler_binding,
                filter,
                wrap_mode,
            });
        }
        // Size uniforms only need the producer to exist
        for member in &pass.uniforms.members {
            if let UniformSource::TextureSize(semantic) = &member.source {
                check(&member.name, &resolve_semantic(pass_index, semantic))?;
            }
        }
        inputs.push(bindings);
    }

    for (pass_index, spec) in document.passes.iter().enumerate() {
        if let Some(declared) = spec.history_depth {
            if declared > limits.max_history_depth {
                tracing::warn!(pass = pass_index, declared, limit = limits.max_history_depth, "history depth capped");
            }
            let slot = &mut retention.passes[pass_index];
            *slot = (*slot).max(declared.min(limits.max_history_depth));
        }
    }

    let order = topological_order(&predecessors)?;
    let step_of: BTreeMap<usize, usize> = order.iter().enumerate().map(|(step, pass)| (*pass, step)).collect();

    // Last execution step reading each pass's output within the frame
    let mut last_read: Vec<Option<usize>> = vec![None; count];
    for (consumer, producers) in predecessors.iter().enumerate() {
        for producer in producers {
            let step = step_of[&consumer];
            last_read[*producer] = Some(last_read[*producer].map_or(step, |s| s.max(step)));
        }
    }

    let formats: Vec<TargetFormat> = document.passes.iter().zip(&compiled).map(|(spec, pass)| pass.format.unwrap_or_else(|| spec.declared_format())).collect();
    let final_pass = count.saturating_sub(1);
    let presentation = if count > 0
        && last_read[final_pass].is_none()
        && retention.passes[final_pass] == 0
        && document.passes[final_pass].frame_count_mod.is_none()
        && sizes[final_pass].is_viewport()
        && formats[final_pass] == TargetFormat::Rgba8Unorm
    {
        Presentation::Direct
    } else {
        Presentation::Blit
    };

    let mut lifetimes = Vec::with_capacity(count);
    for (step, &pass_index) in order.iter().enumerate() {
        if pass_index == final_pass && presentation == Presentation::Direct {
            continue;
        }
        let mut last_used_at = last_read[pass_index].unwrap_or(step);
        if pass_index == final_pass {
            // Read again by the blit after the last pass
            last_used_at = order.len();
        }
        lifetimes.push(TargetLifetime {
            pass_index,
            format: formats[pass_index],
            size: sizes[pass_index].clone(),
            created_at: step,
            last_used_at,
            persistent: retention.passes[pass_index] > 0 || document.passes[pass_index].frame_count_mod.is_some(),
        });
    }
    let (targets, assignments) = assign_physical_targets(&lifetimes);

    let mut compiled: Vec<Option<CompiledPass>> = compiled.into_iter().map(Some).collect();
    let mut inputs: Vec<Option<Vec<ResolvedBinding>>> = inputs.into_iter().map(Some).collect();
    let mut passes = Vec::with_capacity(count);
    for &pass_index in &order {
        let spec = &document.passes[pass_index];
        let output = match assignments.get(&pass_index) {
            Some(id) => OutputTarget::Target(*id),
            None => OutputTarget::Canvas,
        };
        passes.push(PlannedPass {
            pass_index,
            compiled: compiled[pass_index].take().unwrap_or_else(|| unreachable!("each pass is ordered once")),
            inputs: inputs[pass_index].take().unwrap_or_default(),
            size: sizes[pass_index].clone(),
            format: formats[pass_index],
            frame_count_mod: spec.frame_count_mod,
            output,
            alias: spec.alias.clone(),
        });
    }

    tracing::debug!(
        passes = passes.len(),
        targets = targets.len(),
        history = retention.max(),
        presentation = ?presentation,
        "built execution plan"
    );

    Ok(ExecutionPlan {
        passes,
        targets,
        presentation,
        final_pass,
        retention,
        textures: document.textures.clone(),
        parameters: document.parameters.clone(),
        parameter_decls: document.parameter_decls.clone(),
    })
}

/// Orders passes so every same-frame read follows its write, lowest index first
fn topological_order(predecessors: &[BTreeSet<usize>]) -> Result<Vec<usize>, BuildError> {
    let count = predecessors.len();
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
    for (consumer, producers) in predecessors.iter().enumerate() {
        for producer in producers {
            successors[*producer].insert(consumer);
        }
    }

    let mut in_degree: Vec<usize> = predecessors.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..count).filter(|p| in_degree[*p] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(pass) = ready.pop_first() {
        order.push(pass);
        for &next in &successors[pass] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() == count {
        return Ok(order);
    }
    let remaining: BTreeSet<usize> = (0..count).filter(|p| in_degree[*p] > 0).collect();
    Err(BuildError::Cycle(extract_cycle(predecessors, &remaining)))
}

/// Finds one cycle among passes Kahn's algorithm could not order
///
/// Every remaining pass has a remaining predecessor, so walking predecessors from any of
/// them must revisit a pass. The cycle is returned in execution direction, starting at
/// its lowest pass.
fn extract_cycle(predecessors: &[BTreeSet<usize>], remaining: &BTreeSet<usize>) -> Vec<usize> {
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };
    let mut walk = vec![start];
    let mut current = start;
    loop {
        let Some(&previous) = predecessors[current].iter().find(|p| remaining.contains(*p)) else {
            return walk;
        };
        if let Some(position) = walk.iter().position(|p| *p == previous) {
            let mut cycle: Vec<usize> = walk[position..].iter().rev().copied().collect();
            if let Some(lowest) = cycle.iter().enumerate().min_by_key(|(_, p)| **p).map(|(i, _)| i) {
                cycle.rotate_left(lowest);
            }
            return cycle;
        }
        walk.push(previous);
        current = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::parse;
    use crate::transpile::transpile;

    fn pass_source(samplers: &[&str]) -> String {
        let mut source = String::from(
            "#version 450\nlayout(std140, set = 0, binding = 0) uniform UBO\n{\n    mat4 MVP;\n} global;\n#pragma stage vertex\nlayout(location = 0) in vec4 Position;\nlayout(location = 1) in vec2 TexCoord;\nlayout(location = 0) out vec2 vTexCoord;\nvoid main()\n{\n    gl_Position = global.MVP * Position;\n    vTexCoord = TexCoord;\n}\n#pragma stage fragment\nlayout(location = 0) in vec2 vTexCoord;\nlayout(location = 0) out vec4 FragColor;\n",
        );
        for (i, name) in samplers.iter().enumerate() {
            source.push_str(&format!("layout(set = 0, binding = {}) uniform sampler2D {name};\n", i + 1));
        }
        source.push_str("void main()\n{\n    FragColor = vec4(0.0)");
        for name in samplers {
            source.push_str(&format!(" + texture({name}, vTexCoord)"));
        }
        source.push_str(";\n}\n");
        source
    }

    /// Parses and transpiles a preset whose pass N is `pN.slang` sampling the given names
    fn compile(preset: &str, passes: &[&[&str]]) -> (PresetDocument, Vec<CompiledPass>) {
        let files: BTreeMap<String, String> = passes.iter().enumerate().map(|(i, samplers)| (format!("p{i}.slang"), pass_source(samplers))).collect();
        let load = |path: &str| files.get(path).cloned().ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()));
        let document = parse(preset, "test.slangp", &load).unwrap();
        let compiled = document.passes.iter().enumerate().map(|(i, pass)| transpile(&pass.source, i, &document).unwrap()).collect();
        (document, compiled)
    }

    fn preset(count: usize, extra: &str) -> String {
        let mut text = format!("shaders = {count}\n");
        for i in 0..count {
            text.push_str(&format!("shader{i} = p{i}.slang\n"));
        }
        text.push_str(extra);
        text
    }

    #[test]
    fn test_chain_resolves_source() {
        let (document, compiled) = compile(&preset(3, "scale_type0 = source\nscale0 = 2\nscale_type1 = source\nscale1 = 1\n"), &[&["Source"], &["Source", "Original"], &["Source"]]);
        let plan = build(&document, compiled).unwrap();

        assert_eq!(plan.passes.iter().map(|p| p.pass_index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(plan.passes[0].inputs[0].input, ResolvedInput::Original);
        assert_eq!(plan.passes[1].inputs[0].input, ResolvedInput::PassOutput(0));
        assert_eq!(plan.passes[1].inputs[1].input, ResolvedInput::Original);
        assert_eq!(plan.passes[2].inputs[0].input, ResolvedInput::PassOutput(1));
        assert_eq!(plan.presentation, Presentation::Direct);
        assert_eq!(plan.passes[2].output, OutputTarget::Canvas);
        assert_eq!(plan.retention.max(), 0);

        // Pass 0 is dead once pass 1 has drawn, but pass 1 cannot overwrite its own input
        assert_eq!(plan.targets.len(), 2);
        assert_ne!(plan.passes[0].output, plan.passes[1].output);

        let sizes = plan.resolve_sizes(Size::new(320, 240), Size::new(1280, 960)).unwrap();
        assert_eq!(sizes, vec![Size::new(640, 480), Size::new(640, 480), Size::new(1280, 960)]);
    }

    #[test]
    fn test_targets_are_shared_when_lifetimes_allow() {
        let (document, compiled) = compile(&preset(4, "scale_type3 = source\n"), &[&["Source"], &["Source"], &["Source"], &["Source"]]);
        let plan = build(&document, compiled).unwrap();
        assert_eq!(plan.presentation, Presentation::Blit);
        assert_eq!(plan.targets.len(), 2);
        assert_eq!(plan.passes[0].output, plan.passes[2].output);
        assert_eq!(plan.passes[1].output, plan.passes[3].output);
    }

    #[test]
    fn test_same_frame_cycle_is_rejected() {
        let (document, compiled) = compile(&preset(2, ""), &[&["PassOutput1"], &["Source"]]);
        let error = build(&document, compiled).unwrap_err();
        assert_eq!(error, BuildError::Cycle(vec![0, 1]));
        assert_eq!(error.to_string(), "same-frame dependency cycle: pass 0 -> pass 1 -> pass 0");
        assert_eq!(error.to_diagnostic().kind, DiagnosticKind::BuildError);

        let (document, compiled) = compile(&preset(1, ""), &[&["PassOutput0"]]);
        assert_eq!(build(&document, compiled).unwrap_err(), BuildError::Cycle(vec![0]));
    }

    #[test]
    fn test_history_breaks_the_cycle() {
        let (document, compiled) = compile(&preset(2, ""), &[&["PassFeedback1"], &["Source"]]);
        let plan = build(&document, compiled).unwrap();
        assert_eq!(plan.passes.iter().map(|p| p.pass_index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(
            plan.passes[0].inputs[0].input,
            ResolvedInput::History {
                producer: HistoryProducer::Pass(1),
                depth: 1
            }
        );
        assert_eq!(plan.retention.depth(HistoryProducer::Pass(1)), 1);
        assert_eq!(plan.presentation, Presentation::Blit);
        let OutputTarget::Target(id) = plan.passes[1].output else { panic!("history producer must render offscreen") };
        assert!(plan.targets[id as usize].persistent);
    }

    #[test]
    fn test_forward_numbered_output_reorders() {
        // Pass 0 reads pass 2's output from the same frame, so pass 2 runs first
        let (document, compiled) = compile(&preset(3, ""), &[&["PassOutput2"], &["Source"], &["Original"]]);
        let plan = build(&document, compiled).unwrap();
        assert_eq!(plan.passes.iter().map(|p| p.pass_index).collect::<Vec<_>>(), vec![2, 0, 1]);
        assert_eq!(plan.final_pass, 2);
        assert_eq!(plan.presentation, Presentation::Blit);
    }

    #[test]
    fn test_retention_takes_declared_depth_and_limit() {
        let (document, compiled) = compile(&preset(2, "history_depth1 = 4\n"), &[&["Source", "OriginalHistory3"], &["Source", "PassHistory0_2"]]);
        let plan = build(&document, compiled.clone()).unwrap();
        assert_eq!(plan.retention.original, 3);
        assert_eq!(plan.retention.passes, vec![2, 4]);
        assert_eq!(plan.retention.max(), 4);

        let limits = Limits {
            max_history_depth: 2,
            max_passes: 8,
        };
        let error = build_with_limits(&document, compiled.clone(), &limits).unwrap_err();
        assert!(matches!(error, BuildError::HistoryTooDeep { pass_index: 0, depth: 3, .. }));

        let limits = Limits {
            max_history_depth: 8,
            max_passes: 1,
        };
        assert_eq!(build_with_limits(&document, compiled, &limits).unwrap_err(), BuildError::TooManyPasses { count: 2, limit: 1 });
    }

    #[test]
    fn test_invalid_scale_and_sizes() {
        let (document, compiled) = compile(&preset(1, "scale_type0 = absolute\nscale0 = 0.5\n"), &[&["Source"]]);
        let error = build(&document, compiled).unwrap_err();
        assert!(matches!(error, BuildError::InvalidScale(_)));
        assert_eq!(error.pass_index(), Some(0));

        let (document, compiled) = compile(&preset(1, ""), &[&["Source"]]);
        let plan = build(&document, compiled).unwrap();
        assert_eq!(plan.resolve_sizes(Size::new(0, 240), Size::new(640, 480)), Err(BuildError::EmptySize("original input")));
    }

    #[test]
    fn test_lookup_sampling_state() {
        let files: BTreeMap<String, String> = [("p0.slang".to_string(), pass_source(&["Source", "LUT"]))].into();
        let load = |path: &str| files.get(path).cloned().ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()));
        let text = "shaders = 1\nshader0 = p0.slang\nfilter_linear0 = false\nwrap_mode0 = repeat\ntextures = LUT\nLUT = lut.png\nLUT_wrap_mode = clamp_to_edge\n";
        let document = parse(text, "test.slangp", &load).unwrap();
        let compiled = vec![transpile(&document.passes[0].source, 0, &document).unwrap()];
        let plan = build(&document, compiled).unwrap();

        let inputs = &plan.passes[0].inputs;
        assert_eq!((inputs[0].filter, inputs[0].wrap_mode), (FilterMode::Nearest, WrapMode::Repeat));
        assert_eq!(inputs[1].input, ResolvedInput::Lookup("LUT".to_string()));
        assert_eq!((inputs[1].filter, inputs[1].wrap_mode), (FilterMode::Linear, WrapMode::ClampToEdge));
        assert!(plan.textures.contains_key("LUT"));
    }
}
