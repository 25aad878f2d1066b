//! Per-frame execution of a compiled plan
//!
//! An [`ExecutionPlan`] bound to one backend: a program per pass, a pool handle per
//! physical target, the history rings and the uploaded lookup textures. Every call to
//! [`PipelineExecutor::execute`] draws one frame.

use crate::backend::{BackendError, DrawCommand, ProgramId, ProgramOutput, RenderBackend, RenderDestination, SamplerState, TRANSPARENT_BLACK, TextureBinding, TextureDesc, TextureId};
use crate::history::{FrameInput, FrameState, HistoryEntry, HistoryStore};
use crate::pool::{PoolError, RenderTargetPool, TargetHandle};
use crate::uniforms::{self, UniformContext};
use bytes::Bytes;
use retroshade_compiler::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use retroshade_compiler::graph::{ExecutionPlan, HistoryProducer, OutputTarget, Presentation, ResolvedInput, Size, resolve_semantic};
use retroshade_compiler::preset::TargetFormat;
use retroshade_compiler::semantics::TextureSemantic;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Format history of the primary input is kept in
const ORIGINAL_HISTORY_FORMAT: TargetFormat = TargetFormat::Rgba8Unorm;

/// Texels of a lookup texture supplied by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupImage {
    pub size: Size,
    /// Tightly packed RGBA8 rows, top row first
    pub rgba8: Bytes,
}

impl LookupImage {
    pub fn new(size: Size, rgba8: impl Into<Bytes>) -> Self {
        Self { size, rgba8: rgba8.into() }
    }
}

/// Where a frame currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    AwaitingFrame,
    BindingInputs,
    DrawingPass(usize),
    ResolvingOutput,
    Present,
}

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    /// Nothing was drawn because the input or viewport has no area
    Skipped,
}

/// A failure to bind or draw a pass while rendering
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeBindingError {
    #[error("pass {pass_index} binds {count} samplers, the backend allows {limit}")]
    TooManySamplers { pass_index: usize, count: usize, limit: usize },
    #[error("{resource}: {source}")]
    Target {
        pass_index: Option<usize>,
        resource: String,
        source: PoolError,
    },
    #[error("{resource}: {source}")]
    Backend {
        pass_index: Option<usize>,
        resource: String,
        source: BackendError,
    },
}

impl RuntimeBindingError {
    pub fn pass_index(&self) -> Option<usize> {
        match self {
            Self::TooManySamplers { pass_index, .. } => Some(*pass_index),
            Self::Target { pass_index, .. } | Self::Backend { pass_index, .. } => *pass_index,
        }
    }

    /// The texture, target or program that could not be bound
    pub fn resource(&self) -> &str {
        match self {
            Self::TooManySamplers { .. } => "samplers",
            Self::Target { resource, .. } | Self::Backend { resource, .. } => resource,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::RuntimeBinding, self.pass_index(), self.to_string()).with_symbol(self.resource())
    }
}

fn target_error(pass_index: Option<usize>, resource: impl Into<String>) -> impl FnOnce(PoolError) -> RuntimeBindingError {
    let resource = resource.into();
    move |source| RuntimeBindingError::Target { pass_index, resource, source }
}

fn backend_error(pass_index: Option<usize>, resource: impl Into<String>) -> impl FnOnce(BackendError) -> RuntimeBindingError {
    let resource = resource.into();
    move |source| RuntimeBindingError::Backend { pass_index, resource, source }
}

/// A planned pass bound to its program
#[derive(Debug)]
struct BoundPass {
    program: ProgramId,
    label: String,
    /// Drawn at least once since activation
    rendered: bool,
}

/// An uploaded lookup texture
#[derive(Debug, Clone, Copy)]
struct BoundLookup {
    texture: TextureId,
    size: Size,
}

/// A plan bound to backend resources, ready to draw frames
#[derive(Debug)]
pub struct PipelineExecutor {
    plan: ExecutionPlan,
    passes: Vec<BoundPass>,
    /// Pool handle of each physical target, by target id
    targets: BTreeMap<u32, TargetHandle>,
    /// Original and viewport size the targets were last sized for
    sized_for: Option<(Size, Size)>,
    history: HistoryStore,
    lookups: BTreeMap<String, BoundLookup>,
    /// Lookup textures already reported missing
    missing: BTreeSet<String>,
    black: Option<TextureId>,
    frame: u64,
    phase: FramePhase,
}

impl PipelineExecutor {
    /// Compiles every pass of a plan into a backend program
    ///
    /// On failure the programs compiled so far are destroyed again.
    pub fn new<B: RenderBackend + ?Sized>(backend: &mut B, plan: ExecutionPlan) -> Result<Self, BackendError> {
        let mut passes: Vec<BoundPass> = Vec::with_capacity(plan.passes.len());
        for planned in &plan.passes {
            let output = match planned.output {
                OutputTarget::Canvas => ProgramOutput::Canvas,
                OutputTarget::Target(_) => ProgramOutput::Texture(planned.format),
            };
            match backend.compile_program(&planned.compiled, output) {
                Ok(program) => passes.push(BoundPass {
                    program,
                    label: format!("pass {}", planned.pass_index),
                    rendered: false,
                }),
                Err(error) => {
                    for pass in passes {
                        backend.destroy_program(pass.program);
                    }
                    return Err(error);
                }
            }
        }
        let history = HistoryStore::new(&plan.retention);
        Ok(Self {
            plan,
            passes,
            targets: BTreeMap::new(),
            sized_for: None,
            history,
            lookups: BTreeMap::new(),
            missing: BTreeSet::new(),
            black: None,
            frame: 0,
            phase: FramePhase::AwaitingFrame,
        })
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Frames drawn since activation
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Pool handle backing a pass's output, once targets have been allocated
    pub fn output_handle(&self, pass_index: usize) -> Option<TargetHandle> {
        match self.plan.pass(pass_index)?.output {
            OutputTarget::Target(id) => self.targets.get(&id).copied(),
            OutputTarget::Canvas => None,
        }
    }

    /// Drops the uploaded copy of a lookup texture so the next frame uses the host's new image
    pub fn invalidate_lookup<B: RenderBackend + ?Sized>(&mut self, backend: &mut B, name: &str) {
        if let Some(lookup) = self.lookups.remove(name) {
            backend.destroy_texture(lookup.texture);
        }
        self.missing.remove(name);
    }

    /// Draws one frame
    ///
    /// # Arguments
    /// * `input` - The primary input and viewport of this frame
    /// * `parameters` - Global parameter values, snapshotted for the whole frame
    /// * `images` - Lookup textures supplied by the host, by name
    /// * `diagnostics` - Receives reports that do not stop the frame
    pub fn execute<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pool: &mut RenderTargetPool,
        input: &FrameInput,
        parameters: &BTreeMap<String, f32>,
        images: &BTreeMap<String, LookupImage>,
        diagnostics: &mut Diagnostics,
    ) -> Result<FrameOutcome, RuntimeBindingError> {
        self.phase = FramePhase::AwaitingFrame;
        let state = FrameState::new(self.frame, input, parameters);
        let sizes = match self.plan.resolve_sizes(state.original_size, state.viewport) {
            Ok(sizes) => sizes,
            Err(error) => {
                tracing::debug!(frame = state.frame, %error, "frame skipped");
                return Ok(FrameOutcome::Skipped);
            }
        };
        self.prepare_targets(pool, &state)?;

        for index in 0..self.passes.len() {
            let planned = &self.plan.passes[index];
            let bound = &self.passes[index];
            let skip = bound.rendered && planned.frame_count_mod.is_some_and(|m| m > 0 && state.frame % m as u64 != 0);
            if skip {
                continue;
            }
            self.phase = FramePhase::BindingInputs;
            let count = planned.inputs.len();
            let limit = backend.max_samplers();
            if count > limit {
                return Err(RuntimeBindingError::TooManySamplers {
                    pass_index: planned.pass_index,
                    count,
                    limit,
                });
            }
            self.phase = FramePhase::DrawingPass(planned.pass_index);
            self.draw_pass(backend, pool, index, &state, &sizes, images, diagnostics)?;
            self.passes[index].rendered = true;
        }

        self.phase = FramePhase::ResolvingOutput;
        if self.plan.presentation == Presentation::Blit {
            let final_pass = self.plan.final_pass;
            let texture = self.pass_output(backend, pool, final_pass, None)?;
            backend.blit(texture, RenderDestination::Canvas).map_err(backend_error(Some(final_pass), "canvas"))?;
        }

        self.phase = FramePhase::Present;
        self.capture_history(backend, pool, &state, &sizes)?;
        self.frame += 1;
        self.phase = FramePhase::AwaitingFrame;
        Ok(FrameOutcome::Rendered)
    }

    /// Allocates the plan's targets on the first frame and follows size changes after
    fn prepare_targets(&mut self, pool: &mut RenderTargetPool, state: &FrameState) -> Result<(), RuntimeBindingError> {
        let sizing = (state.original_size, state.viewport);
        if self.targets.is_empty() {
            for target in &self.plan.targets {
                let handle = pool.acquire_planned(target, sizing.0, sizing.1).map_err(target_error(target.passes.first().copied(), format!("render target {}", target.id)))?;
                self.targets.insert(target.id, handle);
            }
        } else if self.sized_for != Some(sizing) {
            pool.resize(&self.plan, sizing.0, sizing.1);
            // Reallocated targets hold nothing, so skipping passes must draw once more
            for bound in &mut self.passes {
                bound.rendered = false;
            }
        }
        self.sized_for = Some(sizing);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_pass<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pool: &mut RenderTargetPool,
        index: usize,
        state: &FrameState,
        sizes: &[Size],
        images: &BTreeMap<String, LookupImage>,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), RuntimeBindingError> {
        let planned = self.plan.passes[index].clone();
        let pass_index = planned.pass_index;

        let mut textures = Vec::with_capacity(planned.inputs.len());
        let mut input_sizes = HashMap::new();
        for binding in &planned.inputs {
            let (texture, size) = self.bind_input(backend, pool, pass_index, &binding.input, state, sizes, images, diagnostics)?;
            input_sizes.insert(binding.input.clone(), size);
            textures.push(TextureBinding {
                texture_binding: binding.texture_binding,
                sampler_binding: binding.sampler_binding,
                texture,
                sampler: SamplerState {
                    filter: binding.filter,
                    wrap_mode: binding.wrap_mode,
                },
            });
        }

        let size_of = |input: &ResolvedInput| input_sizes.get(input).copied().unwrap_or_else(|| self.input_size(input, state, sizes));
        let source_size = size_of(&resolve_semantic(pass_index, &TextureSemantic::Source));
        let texture_size = |semantic: &TextureSemantic| size_of(&resolve_semantic(pass_index, semantic));
        let context = UniformContext {
            frame_count: uniforms::frame_count(state.frame, planned.frame_count_mod),
            frame_direction: state.frame_direction,
            time: state.time,
            output_size: sizes[pass_index],
            source_size,
            original_size: state.original_size,
            viewport: state.viewport,
            parameters: &state.parameters,
            texture_size: &texture_size,
        };
        let block = uniforms::pack(&planned.compiled.uniforms, &context);

        let destination = match planned.output {
            OutputTarget::Canvas => RenderDestination::Canvas,
            OutputTarget::Target(_) => RenderDestination::Texture(self.pass_output(backend, pool, pass_index, Some(pass_index))?),
        };
        let bound = &self.passes[index];
        backend
            .draw(&DrawCommand {
                label: &bound.label,
                program: bound.program,
                destination,
                uniforms: &block,
                textures: &textures,
            })
            .map_err(backend_error(Some(pass_index), bound.label.clone()))
    }

    /// Size an input has this frame when nothing is bound for it
    fn input_size(&self, input: &ResolvedInput, state: &FrameState, sizes: &[Size]) -> Size {
        match input {
            ResolvedInput::Original => state.original_size,
            ResolvedInput::PassOutput(pass) => sizes.get(*pass).copied().unwrap_or(state.original_size),
            ResolvedInput::History { producer, depth } => self.history.sample(*producer, *depth).map(|e| e.size).unwrap_or(Size::new(1, 1)),
            ResolvedInput::Lookup(name) => self.lookups.get(name).map(|l| l.size).unwrap_or(Size::new(1, 1)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_input<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pool: &mut RenderTargetPool,
        pass_index: usize,
        input: &ResolvedInput,
        state: &FrameState,
        sizes: &[Size],
        images: &BTreeMap<String, LookupImage>,
        diagnostics: &mut Diagnostics,
    ) -> Result<(TextureId, Size), RuntimeBindingError> {
        match input {
            ResolvedInput::Original => Ok((state.original, state.original_size)),
            ResolvedInput::PassOutput(pass) => Ok((self.pass_output(backend, pool, *pass, Some(pass_index))?, sizes[*pass])),
            ResolvedInput::History { producer, depth } => match self.history.sample(*producer, *depth).copied() {
                Some(entry) => {
                    let texture = pool.texture(backend, entry.handle).map_err(target_error(Some(pass_index), history_name(*producer, *depth)))?;
                    Ok((texture, entry.size))
                }
                None => Ok((self.black(backend, pass_index)?, Size::new(1, 1))),
            },
            ResolvedInput::Lookup(name) => {
                if let Some(lookup) = self.lookups.get(name) {
                    return Ok((lookup.texture, lookup.size));
                }
                let Some(image) = images.get(name) else {
                    if self.missing.insert(name.clone()) {
                        let path = self.plan.textures.get(name).map(|t| t.path.as_str()).unwrap_or("");
                        tracing::warn!(texture = %name, path, "lookup texture not supplied");
                        diagnostics.push(Diagnostic::new(DiagnosticKind::MissingTexture, Some(pass_index), format!("lookup texture `{name}` ({path}) was not supplied; sampling black")).with_symbol(name.clone()));
                    }
                    return Ok((self.black(backend, pass_index)?, Size::new(1, 1)));
                };
                let texture = backend
                    .create_texture(&TextureDesc {
                        label: name.clone(),
                        size: image.size,
                        format: TargetFormat::Rgba8Unorm,
                    })
                    .map_err(backend_error(Some(pass_index), name.clone()))?;
                backend.write_texture(texture, &image.rgba8).map_err(backend_error(Some(pass_index), name.clone()))?;
                self.lookups.insert(name.clone(), BoundLookup { texture, size: image.size });
                Ok((texture, image.size))
            }
        }
    }

    /// The texture a pass draws into
    fn pass_output<B: RenderBackend + ?Sized>(&self, backend: &mut B, pool: &mut RenderTargetPool, pass: usize, reader: Option<usize>) -> Result<TextureId, RuntimeBindingError> {
        let resource = format!("output of pass {pass}");
        let handle = self
            .output_handle(pass)
            .ok_or_else(|| RuntimeBindingError::Backend {
                pass_index: reader,
                resource: resource.clone(),
                source: BackendError::NoCanvas,
            })?;
        pool.texture(backend, handle).map_err(target_error(reader, resource))
    }

    /// The 1x1 transparent-black texture bound for history that does not exist yet
    fn black<B: RenderBackend + ?Sized>(&mut self, backend: &mut B, pass_index: usize) -> Result<TextureId, RuntimeBindingError> {
        if let Some(texture) = self.black {
            return Ok(texture);
        }
        let texture = backend
            .create_texture(&TextureDesc {
                label: "empty history".to_string(),
                size: Size::new(1, 1),
                format: TargetFormat::Rgba8Unorm,
            })
            .map_err(backend_error(Some(pass_index), "empty history"))?;
        backend.write_texture(texture, &TRANSPARENT_BLACK).map_err(backend_error(Some(pass_index), "empty history"))?;
        self.black = Some(texture);
        Ok(texture)
    }

    /// Copies this frame's retained outputs into their history rings
    fn capture_history<B: RenderBackend + ?Sized>(&mut self, backend: &mut B, pool: &mut RenderTargetPool, state: &FrameState, sizes: &[Size]) -> Result<(), RuntimeBindingError> {
        let producers: Vec<_> = self.history.producers().collect();
        for producer in producers {
            let pass_index = match producer {
                HistoryProducer::Original => None,
                HistoryProducer::Pass(pass) => Some(pass),
            };
            let (source, size, format) = match producer {
                HistoryProducer::Original => (state.original, state.original_size, ORIGINAL_HISTORY_FORMAT),
                HistoryProducer::Pass(pass) => {
                    let format = self.plan.pass(pass).map(|p| p.format).unwrap_or_default();
                    (self.pass_output(backend, pool, pass, Some(pass))?, sizes[pass], format)
                }
            };
            let resource = history_name(producer, 0);
            self.history.retire(producer, pool).map_err(target_error(pass_index, resource.clone()))?;
            let handle = pool.acquire(size, format).map_err(target_error(pass_index, resource.clone()))?;
            let slot = pool.texture(backend, handle).map_err(target_error(pass_index, resource.clone()))?;
            backend.blit(source, RenderDestination::Texture(slot)).map_err(backend_error(pass_index, resource.clone()))?;
            let entry = HistoryEntry { handle, frame: state.frame, size };
            self.history.capture(producer, entry, pool).map_err(target_error(pass_index, resource))?;
        }
        Ok(())
    }

    /// Hands every resource back to the backend and the pool
    pub fn release<B: RenderBackend + ?Sized>(mut self, backend: &mut B, pool: &mut RenderTargetPool) {
        for pass in &self.passes {
            backend.destroy_program(pass.program);
        }
        for handle in self.targets.values() {
            // Handles of this executor are never reissued while it lives
            let _ = pool.release(*handle);
        }
        self.history.clear(pool);
        for lookup in self.lookups.values() {
            backend.destroy_texture(lookup.texture);
        }
        if let Some(texture) = self.black.take() {
            backend.destroy_texture(texture);
        }
        pool.trim(backend);
    }
}

fn history_name(producer: HistoryProducer, depth: u32) -> String {
    match (producer, depth) {
        (HistoryProducer::Original, 0) => "history of Original".to_string(),
        (HistoryProducer::Pass(pass), 0) => format!("history of pass {pass}"),
        (HistoryProducer::Original, depth) => format!("OriginalHistory{depth}"),
        (HistoryProducer::Pass(pass), depth) => format!("PassHistory{pass}_{depth}"),
    }
}
