//! Headless backend that records every call
//!
//! Textures carry a symbolic [`TextureContent`] instead of texels: a draw stamps its
//! destination with the index of the draw call, a blit copies the stamp. That is enough to
//! check which frame's output a pass sampled without a GPU.

use super::{BackendError, DrawCommand, ProgramId, ProgramOutput, RenderBackend, RenderDestination, TextureBinding, TextureDesc, TextureId};
use retroshade_compiler::graph::Size;
use retroshade_compiler::transpile::CompiledPass;
use std::collections::{BTreeMap, BTreeSet};

/// What a recorded texture holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureContent {
    Undefined,
    /// Written from the host
    Pixels(Vec<u8>),
    /// Output of the draw at this index of [`RecordingBackend::calls`]
    Drawn(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    CompileProgram { program: ProgramId, pass_index: usize, output: ProgramOutput },
    DestroyProgram(ProgramId),
    CreateTexture { texture: TextureId, desc: TextureDesc },
    WriteTexture(TextureId),
    DestroyTexture(TextureId),
    Draw {
        label: String,
        program: ProgramId,
        destination: RenderDestination,
        uniforms: Vec<u8>,
        /// Bindings with the content each bound texture had when drawn
        inputs: Vec<(TextureBinding, TextureContent)>,
    },
    Blit { source: TextureId, destination: RenderDestination },
    EndFrame,
}

#[derive(Debug)]
struct RecordedTexture {
    desc: TextureDesc,
    content: TextureContent,
}

/// A [`RenderBackend`] that renders nothing and remembers everything
#[derive(Debug)]
pub struct RecordingBackend {
    calls: Vec<RecordedCall>,
    textures: BTreeMap<TextureId, RecordedTexture>,
    programs: BTreeMap<ProgramId, usize>,
    canvas: Option<Size>,
    canvas_content: TextureContent,
    max_samplers: usize,
    failing_passes: BTreeSet<usize>,
    next_id: u32,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(Size::new(640, 480))
    }
}

impl RecordingBackend {
    pub fn new(canvas: Size) -> Self {
        Self {
            calls: Vec::new(),
            textures: BTreeMap::new(),
            programs: BTreeMap::new(),
            canvas: Some(canvas),
            canvas_content: TextureContent::Undefined,
            max_samplers: 16,
            failing_passes: BTreeSet::new(),
            next_id: 1,
        }
    }

    pub fn with_max_samplers(mut self, max_samplers: usize) -> Self {
        self.max_samplers = max_samplers;
        self
    }

    /// Makes compiling the given pass fail, as a driver rejecting its source would
    pub fn fail_compile(&mut self, pass_index: usize) {
        self.failing_passes.insert(pass_index);
    }

    pub fn set_max_samplers(&mut self, max_samplers: usize) {
        self.max_samplers = max_samplers;
    }

    pub fn set_canvas(&mut self, canvas: Option<Size>) {
        self.canvas = canvas;
    }

    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Indices of the draws with the given label
    pub fn draws_labelled<'a>(&'a self, label: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.calls.iter().enumerate().filter_map(move |(i, call)| matches!(call, RecordedCall::Draw { label: l, .. } if l == label).then_some(i))
    }

    /// Number of frames ended before the call at `index`
    pub fn frame_of(&self, index: usize) -> usize {
        self.calls[..index].iter().filter(|c| matches!(c, RecordedCall::EndFrame)).count()
    }

    pub fn canvas_content(&self) -> &TextureContent {
        &self.canvas_content
    }

    pub fn texture_content(&self, texture: TextureId) -> Option<&TextureContent> {
        self.textures.get(&texture).map(|t| &t.content)
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(&texture).map(|t| &t.desc)
    }

    /// Textures created and not yet destroyed
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn content(&self, texture: TextureId) -> Result<TextureContent, BackendError> {
        self.textures.get(&texture).map(|t| t.content.clone()).ok_or(BackendError::UnknownTexture(texture))
    }

    fn store(&mut self, destination: RenderDestination, content: TextureContent) -> Result<(), BackendError> {
        match destination {
            RenderDestination::Canvas => {
                if self.canvas.is_none() {
                    return Err(BackendError::NoCanvas);
                }
                self.canvas_content = content;
            }
            RenderDestination::Texture(texture) => {
                self.textures.get_mut(&texture).ok_or(BackendError::UnknownTexture(texture))?.content = content;
            }
        }
        Ok(())
    }
}

impl RenderBackend for RecordingBackend {
    fn max_samplers(&self) -> usize {
        self.max_samplers
    }

    fn canvas_size(&self) -> Option<Size> {
        self.canvas
    }

    fn compile_program(&mut self, pass: &CompiledPass, output: ProgramOutput) -> Result<ProgramId, BackendError> {
        if self.failing_passes.contains(&pass.pass_index) {
            return Err(BackendError::Compile {
                pass_index: pass.pass_index,
                message: "rejected by test backend".to_string(),
            });
        }
        let program = ProgramId(self.next_id());
        self.programs.insert(program, pass.pass_index);
        self.calls.push(RecordedCall::CompileProgram {
            program,
            pass_index: pass.pass_index,
            output,
        });
        Ok(program)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.calls.push(RecordedCall::DestroyProgram(program));
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, BackendError> {
        let texture = TextureId(self.next_id());
        self.textures.insert(
            texture,
            RecordedTexture {
                desc: desc.clone(),
                content: TextureContent::Undefined,
            },
        );
        self.calls.push(RecordedCall::CreateTexture { texture, desc: desc.clone() });
        Ok(texture)
    }

    fn write_texture(&mut self, texture: TextureId, rgba8: &[u8]) -> Result<(), BackendError> {
        let entry = self.textures.get_mut(&texture).ok_or(BackendError::UnknownTexture(texture))?;
        let expected = entry.desc.size.width as usize * entry.desc.size.height as usize * 4;
        if rgba8.len() != expected {
            return Err(BackendError::DataSize { expected, actual: rgba8.len() });
        }
        entry.content = TextureContent::Pixels(rgba8.to_vec());
        self.calls.push(RecordedCall::WriteTexture(texture));
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        self.calls.push(RecordedCall::DestroyTexture(texture));
    }

    fn draw(&mut self, command: &DrawCommand) -> Result<(), BackendError> {
        if !self.programs.contains_key(&command.program) {
            return Err(BackendError::UnknownProgram(command.program));
        }
        let inputs = command.textures.iter().map(|binding| Ok((*binding, self.content(binding.texture)?))).collect::<Result<Vec<_>, BackendError>>()?;
        let index = self.calls.len();
        self.store(command.destination, TextureContent::Drawn(index))?;
        self.calls.push(RecordedCall::Draw {
            label: command.label.to_string(),
            program: command.program,
            destination: command.destination,
            uniforms: command.uniforms.to_vec(),
            inputs,
        });
        Ok(())
    }

    fn blit(&mut self, source: TextureId, destination: RenderDestination) -> Result<(), BackendError> {
        let content = self.content(source)?;
        self.store(destination, content)?;
        self.calls.push(RecordedCall::Blit { source, destination });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        self.calls.push(RecordedCall::EndFrame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retroshade_compiler::preset::TargetFormat;

    fn desc(size: Size) -> TextureDesc {
        TextureDesc {
            label: "test".to_string(),
            size,
            format: TargetFormat::Rgba8Unorm,
        }
    }

    #[test]
    fn test_blit_copies_content() {
        let mut backend = RecordingBackend::default();
        let texture = backend.create_texture(&desc(Size::new(1, 1))).unwrap();
        assert_eq!(backend.texture_content(texture), Some(&TextureContent::Undefined));

        backend.write_texture(texture, &[1, 2, 3, 4]).unwrap();
        backend.blit(texture, RenderDestination::Canvas).unwrap();
        assert_eq!(backend.canvas_content(), &TextureContent::Pixels(vec![1, 2, 3, 4]));
        backend.end_frame().unwrap();
        assert_eq!(backend.frame_of(backend.calls().len()), 1);
    }

    #[test]
    fn test_rejects_bad_writes_and_missing_canvas() {
        let mut backend = RecordingBackend::default();
        let texture = backend.create_texture(&desc(Size::new(2, 1))).unwrap();
        assert_eq!(backend.write_texture(texture, &[0; 4]), Err(BackendError::DataSize { expected: 8, actual: 4 }));

        backend.set_canvas(None);
        assert_eq!(backend.blit(texture, RenderDestination::Canvas), Err(BackendError::NoCanvas));

        backend.destroy_texture(texture);
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.blit(texture, RenderDestination::Canvas), Err(BackendError::UnknownTexture(texture)));
    }
}
