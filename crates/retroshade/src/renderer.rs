//! Renderer state machine
//!
//! A [`Renderer`] owns a backend, the render target pool and at most one active preset.
//! Presets are compiled under an [`ActivationTicket`]: starting a new activation cancels
//! the one in flight, and only the latest ticket may install its result. Installation
//! happens between frames, so a frame always runs against a single plan.
//!
//! When a preset cannot be drawn (a program the backend rejects, a generated source the
//! validator rejects, or a binding that fails while rendering) the renderer enters the
//! bypassed state and presents the primary input unshaded until another preset activates
//! successfully.

use crate::backend::{BackendError, RenderBackend, RenderDestination};
use crate::bundled::bundled_preset;
use crate::history::FrameInput;
use crate::pipeline_executor::{FrameOutcome, FramePhase, LookupImage, PipelineExecutor};
use crate::pool::RenderTargetPool;
use retroshade_compiler::config::PipelineConfig;
use retroshade_compiler::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use retroshade_compiler::graph::ExecutionPlan;
use retroshade_compiler::{CancellationToken, Compilation, CompileOptions, PresetError, compile_preset};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    /// No preset has been activated; frames pass through
    Idle,
    Active,
    /// The active preset failed; frames pass through until another preset activates
    Bypassed,
}

/// Permission to install the result of one compilation
#[derive(Debug)]
pub struct ActivationTicket {
    id: u64,
    token: CancellationToken,
}

impl ActivationTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token the compilation should observe; cancelled once a newer activation begins
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Compile options carrying this ticket's cancellation token
    pub fn options(&self, base: &CompileOptions) -> CompileOptions {
        base.clone().with_cancellation(self.token.clone())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivationError {
    #[error("activation {ticket} was superseded by activation {current}")]
    StaleTicket { ticket: u64, current: u64 },
    #[error(transparent)]
    Preset(#[from] PresetError),
    #[error(transparent)]
    Program(#[from] BackendError),
    #[error("no bundled preset named `{0}`")]
    UnknownPreset(String),
}

/// Effect of changing a parameter between frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterChange {
    /// Takes effect from the next frame
    Applied,
    /// Decides conditional compilation; takes effect once the preset is activated again
    NeedsReactivation,
    /// No pass of the active preset declares it; ignored
    Unmapped,
    /// No preset is active; kept for the next activation
    Deferred,
}

/// Draws presets over the host's frames
#[derive(Debug)]
pub struct Renderer<B: RenderBackend> {
    backend: B,
    pool: RenderTargetPool,
    executor: Option<PipelineExecutor>,
    state: RendererState,
    options: CompileOptions,
    /// Global parameter values of the active preset
    parameters: BTreeMap<String, f32>,
    images: BTreeMap<String, LookupImage>,
    diagnostics: Diagnostics,
    /// Id of the latest ticket handed out
    activation: u64,
    pending: Option<CancellationToken>,
}

impl<B: RenderBackend> Renderer<B> {
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, CompileOptions::default())
    }

    pub fn with_options(backend: B, options: CompileOptions) -> Self {
        Self {
            backend,
            pool: RenderTargetPool::new(),
            executor: None,
            state: RendererState::Idle,
            options,
            parameters: BTreeMap::new(),
            images: BTreeMap::new(),
            diagnostics: Diagnostics::new(),
            activation: 0,
            pending: None,
        }
    }

    pub fn from_config(backend: B, config: &PipelineConfig) -> Self {
        Self::with_options(backend, CompileOptions::from_config(config))
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn pool(&self) -> &RenderTargetPool {
        &self.pool
    }

    pub fn executor(&self) -> Option<&PipelineExecutor> {
        self.executor.as_ref()
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.executor.as_ref().map(PipelineExecutor::plan)
    }

    pub fn frame_phase(&self) -> FramePhase {
        self.executor.as_ref().map_or(FramePhase::AwaitingFrame, PipelineExecutor::phase)
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn parameters(&self) -> &BTreeMap<String, f32> {
        &self.parameters
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Returns the collected diagnostics and starts a new collection
    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    /// Starts a new activation, cancelling the one in flight
    pub fn begin_activation(&mut self) -> ActivationTicket {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
        self.activation += 1;
        let token = CancellationToken::new();
        self.pending = Some(token.clone());
        ActivationTicket { id: self.activation, token }
    }

    /// Installs the result of compiling under `ticket`
    ///
    /// A superseded ticket or a cancelled compilation changes nothing. Parse, transpile and
    /// build failures keep the current preset running. A preset the graphics API rejects
    /// replaces the current one and leaves the renderer bypassed.
    pub fn install(&mut self, ticket: ActivationTicket, result: Result<Compilation, PresetError>) -> Result<(), ActivationError> {
        if ticket.id != self.activation {
            return Err(ActivationError::StaleTicket {
                ticket: ticket.id,
                current: self.activation,
            });
        }
        self.pending = None;

        let compilation = match result {
            Ok(compilation) => compilation,
            Err(PresetError::Cancelled) => return Err(PresetError::Cancelled.into()),
            Err(error) => {
                if let Some(diagnostic) = error.to_diagnostic() {
                    self.diagnostics.push(diagnostic.clone());
                    if error.is_bypass() {
                        self.release_executor();
                        self.enter_bypass(diagnostic.pass_index, diagnostic.symbol.as_deref(), &diagnostic.detail);
                    } else {
                        tracing::warn!(%error, "preset not activated; keeping the current one");
                    }
                }
                return Err(error.into());
            }
        };

        self.diagnostics.extend(compilation.diagnostics.entries().iter().cloned());
        self.release_executor();
        let parameters = compilation.plan.parameters.clone();
        let passes = compilation.plan.passes.len();
        match PipelineExecutor::new(&mut self.backend, compilation.plan) {
            Ok(executor) => {
                self.executor = Some(executor);
                self.parameters = parameters;
                self.state = RendererState::Active;
                tracing::info!(activation = ticket.id, passes, "preset activated");
                Ok(())
            }
            Err(error) => {
                let pass_index = match &error {
                    BackendError::Compile { pass_index, .. } => Some(*pass_index),
                    _ => None,
                };
                self.diagnostics.push(Diagnostic::new(DiagnosticKind::CompileError, pass_index, error.to_string()));
                self.enter_bypass(pass_index, Some("program"), &error.to_string());
                Err(error.into())
            }
        }
    }

    /// Compiles and installs a preset in one go
    ///
    /// # Arguments
    /// * `text` - The preset file's contents
    /// * `path` - Path of the preset; the loader receives paths resolved against it
    /// * `load_file` - Loads shader sources and referenced presets
    pub fn activate(&mut self, text: &str, path: &str, load_file: &dyn Fn(&str) -> std::io::Result<String>) -> Result<(), ActivationError> {
        let ticket = self.begin_activation();
        let options = ticket.options(&self.options);
        let result = compile_preset(text, path, load_file, &options);
        self.install(ticket, result)
    }

    /// Activates one of the presets embedded in the crate
    pub fn activate_bundled(&mut self, name: &str) -> Result<(), ActivationError> {
        let preset = bundled_preset(name).ok_or_else(|| ActivationError::UnknownPreset(name.to_string()))?;
        self.activate(preset.text(), preset.path, &|path| preset.load_file(path))
    }

    /// Drops the active preset; frames pass through afterwards
    pub fn deactivate(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
        self.release_executor();
        self.state = RendererState::Idle;
    }

    /// Supplies the texels of a lookup texture, replacing any earlier image of that name
    pub fn provide_texture(&mut self, name: impl Into<String>, image: LookupImage) {
        let name = name.into();
        if let Some(executor) = &mut self.executor {
            executor.invalidate_lookup(&mut self.backend, &name);
        }
        self.images.insert(name, image);
    }

    /// Changes a global parameter between frames
    ///
    /// Values are clamped to the declared range. They are also remembered for later
    /// activations.
    pub fn set_parameter(&mut self, name: &str, value: f32) -> ParameterChange {
        let Some(plan) = self.executor.as_ref().map(PipelineExecutor::plan) else {
            self.options.parameters.insert(name.to_string(), value);
            return ParameterChange::Deferred;
        };
        let Some(decl) = plan.parameter_decls.iter().find(|d| d.name == name) else {
            self.diagnostics.push(Diagnostic::new(DiagnosticKind::UnmappedParameter, None, format!("no pass declares parameter `{name}`")).with_symbol(name));
            return ParameterChange::Unmapped;
        };
        let value = if decl.minimum <= decl.maximum { value.clamp(decl.minimum, decl.maximum) } else { value };
        let change = if plan.define_dependencies().contains(name) { ParameterChange::NeedsReactivation } else { ParameterChange::Applied };
        self.parameters.insert(name.to_string(), value);
        self.options.parameters.insert(name.to_string(), value);
        tracing::debug!(parameter = name, value, ?change, "parameter changed");
        change
    }

    /// Renders one frame into the canvas and flushes it
    ///
    /// Failures of the active preset do not surface here: they are reported as
    /// diagnostics and the frame falls back to passthrough. Errors are only returned when
    /// even passthrough fails.
    pub fn render_frame(&mut self, input: &FrameInput) -> Result<FrameOutcome, BackendError> {
        let result = match &mut self.executor {
            Some(executor) if self.state == RendererState::Active => Some(executor.execute(&mut self.backend, &mut self.pool, input, &self.parameters, &self.images, &mut self.diagnostics)),
            _ => None,
        };
        let outcome = match result {
            Some(Ok(outcome)) => outcome,
            Some(Err(error)) => {
                let diagnostic = error.to_diagnostic();
                self.diagnostics.push(diagnostic.clone());
                self.release_executor();
                self.enter_bypass(diagnostic.pass_index, diagnostic.symbol.as_deref(), &diagnostic.detail);
                self.passthrough(input)?
            }
            None => self.passthrough(input)?,
        };
        self.backend.end_frame()?;
        Ok(outcome)
    }

    fn passthrough(&mut self, input: &FrameInput) -> Result<FrameOutcome, BackendError> {
        if input.source_size.is_empty() || input.viewport.is_empty() {
            return Ok(FrameOutcome::Skipped);
        }
        self.backend.blit(input.source, RenderDestination::Canvas)?;
        Ok(FrameOutcome::Rendered)
    }

    fn enter_bypass(&mut self, pass_index: Option<usize>, resource: Option<&str>, reason: &str) {
        let resource = resource.unwrap_or("preset");
        tracing::warn!(pass = ?pass_index, resource, reason, "bypassing preset");
        let detail = match pass_index {
            Some(pass) => format!("pass {pass} ({resource}) failed, presenting the unshaded input: {reason}"),
            None => format!("{resource} failed, presenting the unshaded input: {reason}"),
        };
        self.diagnostics.push(Diagnostic::new(DiagnosticKind::Bypass, pass_index, detail).with_symbol(resource));
        self.state = RendererState::Bypassed;
    }

    fn release_executor(&mut self) {
        if let Some(executor) = self.executor.take() {
            executor.release(&mut self.backend, &mut self.pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordedCall, RecordingBackend, TextureContent, TextureDesc, TextureId};
    use crate::history::FrameInput;
    use retroshade_compiler::graph::{HistoryProducer, Size};
    use retroshade_compiler::preset::TargetFormat;

    const ORIGINAL: Size = Size::new(4, 4);

    fn pass_source(samplers: &[&str], parameter: Option<&str>) -> String {
        let mut source = String::from("#version 450\n");
        if let Some(parameter) = parameter {
            source.push_str(&format!("#pragma parameter {parameter} \"{parameter}\" 0.5 0.0 1.0 0.1\n"));
        }
        source.push_str("#pragma stage vertex\nlayout(location = 0) in vec4 Position;\nlayout(location = 1) in vec2 TexCoord;\nlayout(location = 0) out vec2 vTexCoord;\nvoid main()\n{\n    gl_Position = MVP * Position;\n    vTexCoord = TexCoord;\n}\n#pragma stage fragment\nlayout(location = 0) in vec2 vTexCoord;\nlayout(location = 0) out vec4 FragColor;\n");
        for name in samplers {
            source.push_str(&format!("uniform sampler2D {name};\n"));
        }
        source.push_str("void main()\n{\n    FragColor = vec4(0.0)");
        for name in samplers {
            source.push_str(&format!(" + texture({name}, vTexCoord)"));
        }
        if let Some(parameter) = parameter {
            source.push_str(&format!(" * {parameter}"));
        }
        source.push_str(";\n}\n");
        source
    }

    struct Fixture {
        files: BTreeMap<String, String>,
    }

    impl Fixture {
        fn new(passes: &[(&[&str], Option<&str>)]) -> Self {
            let files = passes.iter().enumerate().map(|(i, (samplers, parameter))| (format!("p{i}.slang"), pass_source(samplers, *parameter))).collect();
            Self { files }
        }

        fn load(&self, path: &str) -> std::io::Result<String> {
            self.files.get(path).cloned().ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
        }

        fn preset(&self, extra: &str) -> String {
            let mut text = format!("shaders = {}\n", self.files.len());
            for i in 0..self.files.len() {
                text.push_str(&format!("shader{i} = p{i}.slang\n"));
            }
            text.push_str(extra);
            text
        }

        fn activate(&self, renderer: &mut Renderer<RecordingBackend>, extra: &str) -> Result<(), ActivationError> {
            renderer.activate(&self.preset(extra), "test.slangp", &|path| self.load(path))
        }
    }

    fn renderer() -> (Renderer<RecordingBackend>, FrameInput) {
        let options = CompileOptions {
            validate: false,
            ..CompileOptions::default()
        };
        let mut renderer = Renderer::with_options(RecordingBackend::new(Size::new(8, 8)), options);
        let source = upload_source(renderer.backend_mut());
        (renderer, FrameInput::new(source, ORIGINAL, Size::new(8, 8)))
    }

    fn upload_source(backend: &mut RecordingBackend) -> TextureId {
        let texture = backend
            .create_texture(&TextureDesc {
                label: "game".to_string(),
                size: ORIGINAL,
                format: TargetFormat::Rgba8Unorm,
            })
            .unwrap();
        backend.write_texture(texture, &[7; 64]).unwrap();
        texture
    }

    fn draw_inputs(backend: &RecordingBackend, index: usize) -> &[(crate::backend::TextureBinding, TextureContent)] {
        match &backend.calls()[index] {
            RecordedCall::Draw { inputs, .. } => inputs,
            call => panic!("expected a draw, got {call:?}"),
        }
    }

    #[test]
    fn test_history_scenario() {
        let fixture = Fixture::new(&[(&["Source"], None), (&["Source", "PassHistory0_2"], None)]);
        let (mut renderer, input) = renderer();
        fixture.activate(&mut renderer, "").unwrap();
        assert_eq!(renderer.state(), RendererState::Active);

        let history_binding = renderer.plan().unwrap().pass(1).unwrap().inputs.iter().find(|b| b.name == "PassHistory0_2").map(|b| b.texture_binding).unwrap();
        for _ in 0..5 {
            assert_eq!(renderer.render_frame(&input), Ok(FrameOutcome::Rendered));
        }

        let backend = renderer.backend();
        let pass0: Vec<_> = backend.draws_labelled("pass 0").collect();
        let pass1: Vec<_> = backend.draws_labelled("pass 1").collect();
        assert_eq!(pass0.len(), 5);
        assert_eq!(pass1.len(), 5);
        for (frame, &draw) in pass1.iter().enumerate() {
            assert_eq!(backend.frame_of(draw), frame);
            let inputs = draw_inputs(backend, draw);
            let content = |binding: u32| inputs.iter().find(|(b, _)| b.texture_binding == binding).map(|(_, c)| c.clone()).unwrap();
            let source_binding = inputs.iter().map(|(b, _)| b.texture_binding).find(|&b| b != history_binding).unwrap();

            assert_eq!(content(source_binding), TextureContent::Drawn(pass0[frame]));
            if frame < 2 {
                assert_eq!(content(history_binding), TextureContent::Pixels(vec![0; 4]));
            } else {
                assert_eq!(content(history_binding), TextureContent::Drawn(pass0[frame - 2]));
            }
        }
        assert_eq!(backend.canvas_content(), &TextureContent::Drawn(pass1[4]));
    }

    #[test]
    fn test_history_slot_generation() {
        let fixture = Fixture::new(&[(&["Source"], None), (&["Source", "PassHistory0_2"], None)]);
        let (mut renderer, input) = renderer();
        fixture.activate(&mut renderer, "").unwrap();
        let sample = |renderer: &Renderer<RecordingBackend>, depth| renderer.executor().and_then(|e| e.history().sample(HistoryProducer::Pass(0), depth)).map(|e| e.handle).unwrap();

        renderer.render_frame(&input).unwrap();
        let first = sample(&renderer, 1);
        renderer.render_frame(&input).unwrap();
        assert_eq!(sample(&renderer, 2), first);
        renderer.pool().validate(first).unwrap();

        // Frame 0 leaves the window and its slot is reused for frame 2
        renderer.render_frame(&input).unwrap();
        let third = sample(&renderer, 1);
        assert_eq!(third.slot(), first.slot());
        assert_eq!(third.generation(), first.generation() + 1);
        assert!(renderer.pool().validate(first).is_err());
    }

    #[test]
    fn test_compile_failure_bypasses_until_reactivation() {
        let fixture = Fixture::new(&[(&["Source"], None), (&["Source"], None)]);
        let (mut renderer, input) = renderer();
        renderer.backend_mut().fail_compile(1);
        assert!(matches!(fixture.activate(&mut renderer, ""), Err(ActivationError::Program(_))));
        assert_eq!(renderer.state(), RendererState::Bypassed);
        assert!(renderer.diagnostics().has(DiagnosticKind::CompileError));
        let bypass = renderer.diagnostics().of_kind(DiagnosticKind::Bypass).next().unwrap();
        assert_eq!(bypass.pass_index, Some(1));
        assert_eq!(renderer.backend().live_programs(), 0);

        renderer.backend_mut().clear_calls();
        renderer.render_frame(&input).unwrap();
        assert_eq!(renderer.backend().draws_labelled("pass 0").count(), 0);
        assert_eq!(renderer.backend().canvas_content(), &TextureContent::Pixels(vec![7; 64]));

        // A preset that fails to parse does not lift the bypass
        assert!(renderer.activate("shaders = 1\n", "broken.slangp", &|path| fixture.load(path)).is_err());
        assert_eq!(renderer.state(), RendererState::Bypassed);

        let fixture = Fixture::new(&[(&["Source"], None)]);
        fixture.activate(&mut renderer, "").unwrap();
        assert_eq!(renderer.state(), RendererState::Active);
        renderer.render_frame(&input).unwrap();
        assert_eq!(renderer.backend().draws_labelled("pass 0").count(), 1);
    }

    #[test]
    fn test_parse_failure_keeps_running_preset() {
        let fixture = Fixture::new(&[(&["Source"], None)]);
        let (mut renderer, input) = renderer();
        fixture.activate(&mut renderer, "").unwrap();

        let error = renderer.activate("shaders = 2\nshader0 = p0.slang\n", "broken.slangp", &|path| fixture.load(path)).unwrap_err();
        assert!(matches!(error, ActivationError::Preset(PresetError::Parse(_))));
        assert_eq!(renderer.state(), RendererState::Active);
        assert!(renderer.diagnostics().has(DiagnosticKind::ParseError));
        assert!(!renderer.diagnostics().has(DiagnosticKind::Bypass));

        renderer.render_frame(&input).unwrap();
        assert_eq!(renderer.backend().draws_labelled("pass 0").count(), 1);
    }

    #[test]
    fn test_runtime_binding_failure_bypasses() {
        let fixture = Fixture::new(&[(&["Source", "Original"], None)]);
        let (mut renderer, input) = renderer();
        fixture.activate(&mut renderer, "").unwrap();
        renderer.backend_mut().set_max_samplers(1);

        assert_eq!(renderer.render_frame(&input), Ok(FrameOutcome::Rendered));
        assert_eq!(renderer.state(), RendererState::Bypassed);
        let binding = renderer.diagnostics().of_kind(DiagnosticKind::RuntimeBinding).next().unwrap();
        assert_eq!(binding.pass_index, Some(0));
        assert!(renderer.diagnostics().has(DiagnosticKind::Bypass));
        assert_eq!(renderer.backend().canvas_content(), &TextureContent::Pixels(vec![7; 64]));
        assert_eq!(renderer.pool().in_use(), 0);
    }

    #[test]
    fn test_stale_and_cancelled_activations() {
        let fixture = Fixture::new(&[(&["Source"], None)]);
        let (mut renderer, _) = renderer();
        let preset = fixture.preset("");

        let first = renderer.begin_activation();
        let first_options = first.options(renderer.options());
        let second = renderer.begin_activation();
        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());

        let result = compile_preset(&preset, "test.slangp", &|path| fixture.load(path), &first_options);
        assert_eq!(result.as_ref().err(), Some(&PresetError::Cancelled));
        assert!(matches!(renderer.install(first, result), Err(ActivationError::StaleTicket { ticket: 1, current: 2 })));

        let result = compile_preset(&preset, "test.slangp", &|path| fixture.load(path), &second.options(renderer.options()));
        renderer.install(second, result).unwrap();
        assert_eq!(renderer.state(), RendererState::Active);

        let third = renderer.begin_activation();
        third.token().cancel();
        let diagnostics = renderer.diagnostics().len();
        assert_eq!(renderer.install(third, Err(PresetError::Cancelled)), Err(ActivationError::Preset(PresetError::Cancelled)));
        assert_eq!(renderer.diagnostics().len(), diagnostics);
        assert_eq!(renderer.state(), RendererState::Active);
    }

    #[test]
    fn test_parameters() {
        let fixture = Fixture::new(&[(&["Source"], Some("GLOW"))]);
        let (mut renderer, input) = renderer();
        assert_eq!(renderer.set_parameter("GLOW", 0.25), ParameterChange::Deferred);
        fixture.activate(&mut renderer, "").unwrap();
        assert_eq!(renderer.parameters()["GLOW"], 0.25);

        assert_eq!(renderer.set_parameter("GLOW", 4.0), ParameterChange::Applied);
        assert_eq!(renderer.parameters()["GLOW"], 1.0);

        assert_eq!(renderer.set_parameter("MISSING", 1.0), ParameterChange::Unmapped);
        let unmapped = renderer.diagnostics().of_kind(DiagnosticKind::UnmappedParameter).next().unwrap();
        assert_eq!(unmapped.symbol.as_deref(), Some("MISSING"));
        assert_eq!(renderer.state(), RendererState::Active);

        renderer.render_frame(&input).unwrap();
        let draw = renderer.backend().draws_labelled("pass 0").next().unwrap();
        let RecordedCall::Draw { uniforms, .. } = &renderer.backend().calls()[draw] else {
            panic!("expected a draw");
        };
        let layout = &renderer.plan().unwrap().passes[0].compiled.uniforms;
        let offset = layout.member("GLOW").unwrap().offset as usize;
        assert_eq!(bytemuck::pod_read_unaligned::<f32>(&uniforms[offset..offset + 4]), 1.0);
    }

    #[test]
    fn test_frame_count_mod_skips_frames() {
        let fixture = Fixture::new(&[(&["Source"], None), (&["Source"], None)]);
        let (mut renderer, input) = renderer();
        fixture.activate(&mut renderer, "frame_count_mod0 = 3\n").unwrap();
        for _ in 0..7 {
            renderer.render_frame(&input).unwrap();
        }
        let backend = renderer.backend();
        let frames: Vec<_> = backend.draws_labelled("pass 0").map(|draw| backend.frame_of(draw)).collect();
        assert_eq!(frames, vec![0, 3, 6]);
        assert_eq!(backend.draws_labelled("pass 1").count(), 7);

        // Frame 5 still samples what pass 0 drew in frame 3
        let pass0: Vec<_> = backend.draws_labelled("pass 0").collect();
        let frame5 = backend.draws_labelled("pass 1").nth(5).unwrap();
        assert_eq!(draw_inputs(backend, frame5)[0].1, TextureContent::Drawn(pass0[1]));
    }

    #[test]
    fn test_source_resize_redraws_skipping_passes() {
        let fixture = Fixture::new(&[(&["Source"], None), (&["Source"], None)]);
        let (mut renderer, input) = renderer();
        fixture.activate(&mut renderer, "frame_count_mod0 = 4\n").unwrap();
        renderer.render_frame(&input).unwrap();

        let resized = FrameInput::new(input.source, Size::new(6, 6), input.viewport);
        for _ in 0..4 {
            renderer.render_frame(&resized).unwrap();
        }
        let backend = renderer.backend();
        let frames: Vec<_> = backend.draws_labelled("pass 0").map(|draw| backend.frame_of(draw)).collect();
        assert_eq!(frames, vec![0, 1, 4]);

        let pass0: Vec<_> = backend.draws_labelled("pass 0").collect();
        for (frame, draw) in backend.draws_labelled("pass 1").enumerate().skip(1) {
            let expected = if frame < 4 { pass0[1] } else { pass0[2] };
            assert_eq!(draw_inputs(backend, draw)[0].1, TextureContent::Drawn(expected));
        }
    }

    #[test]
    fn test_source_resize_keeps_history_allocation_flat() {
        let fixture = Fixture::new(&[(&["Source"], None), (&["Source", "PassHistory0_2"], None)]);
        let (mut renderer, input) = renderer();
        fixture.activate(&mut renderer, "").unwrap();
        let render = |renderer: &mut Renderer<RecordingBackend>, frames: std::ops::Range<u32>| {
            for frame in frames {
                let size = Size::new(4 + frame % 5, 3 + frame % 7);
                let resized = FrameInput::new(input.source, size, input.viewport);
                assert_eq!(renderer.render_frame(&resized), Ok(FrameOutcome::Rendered));
            }
            (renderer.pool().len(), renderer.backend().live_textures())
        };

        let settled = render(&mut renderer, 0..10);
        assert_eq!(render(&mut renderer, 10..40), settled);
    }

    #[test]
    fn test_missing_lookup_texture_samples_black() {
        let fixture = Fixture::new(&[(&["Source", "Mask"], None)]);
        let (mut renderer, input) = renderer();
        fixture.activate(&mut renderer, "textures = Mask\nMask = mask.png\n").unwrap();

        renderer.render_frame(&input).unwrap();
        renderer.render_frame(&input).unwrap();
        assert_eq!(renderer.state(), RendererState::Active);
        assert_eq!(renderer.diagnostics().of_kind(DiagnosticKind::MissingTexture).count(), 1);

        renderer.provide_texture("Mask", LookupImage::new(Size::new(1, 1), vec![9u8, 9, 9, 9]));
        renderer.render_frame(&input).unwrap();
        let backend = renderer.backend();
        let draw = backend.draws_labelled("pass 0").last().unwrap();
        assert!(draw_inputs(backend, draw).iter().any(|(_, content)| *content == TextureContent::Pixels(vec![9; 4])));
    }

    #[test]
    fn test_deactivate_releases_resources() {
        let fixture = Fixture::new(&[(&["Source"], None), (&["Source", "PassFeedback1"], None)]);
        let (mut renderer, input) = renderer();
        fixture.activate(&mut renderer, "scale_type1 = source\n").unwrap();
        for _ in 0..3 {
            renderer.render_frame(&input).unwrap();
        }
        assert!(renderer.pool().in_use() > 0);

        renderer.deactivate();
        assert_eq!(renderer.state(), RendererState::Idle);
        assert_eq!(renderer.pool().in_use(), 0);
        assert_eq!(renderer.backend().live_programs(), 0);
        // Only the host's source texture is left
        assert_eq!(renderer.backend().live_textures(), 1);
    }
}
