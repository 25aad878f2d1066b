//! Host graphics context abstraction
//!
//! The renderer never talks to a graphics API directly. Everything it needs from the
//! host (compiling a pass into a program, creating and filling textures, drawing the
//! full-screen quad and copying textures) goes through [`RenderBackend`]. [`WgpuBackend`]
//! is the production implementation; [`RecordingBackend`] keeps a log of every call and
//! is what the tests render with.

mod recording;
mod wgpu_backend;

pub use recording::{RecordedCall, RecordingBackend, TextureContent};
pub use wgpu_backend::WgpuBackend;

use retroshade_compiler::graph::Size;
use retroshade_compiler::preset::{FilterMode, TargetFormat, WrapMode};
use retroshade_compiler::transpile::CompiledPass;

/// A texture owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// A compiled pass owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// What a program renders into; fixed when the program is compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramOutput {
    Texture(TargetFormat),
    /// The host's canvas, in whatever format the backend presents
    Canvas,
}

/// Where a draw or blit lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderDestination {
    Texture(TextureId),
    Canvas,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub size: Size,
    pub format: TargetFormat,
}

/// Sampling state of one sampler binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerState {
    pub filter: FilterMode,
    pub wrap_mode: WrapMode,
}

/// A texture bound to a texture/sampler binding pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub texture_binding: u32,
    pub sampler_binding: u32,
    pub texture: TextureId,
    pub sampler: SamplerState,
}

/// One full-screen quad draw
#[derive(Debug, Clone)]
pub struct DrawCommand<'a> {
    pub label: &'a str,
    pub program: ProgramId,
    pub destination: RenderDestination,
    /// Packed std140 contents of the pass's uniform block; empty when it has none
    pub uniforms: &'a [u8],
    pub textures: &'a [TextureBinding],
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("pass {pass_index}: program rejected: {message}")]
    Compile { pass_index: usize, message: String },
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),
    #[error("unknown program {0:?}")]
    UnknownProgram(ProgramId),
    #[error("no canvas to render into")]
    NoCanvas,
    #[error("texture data is {actual} bytes, expected {expected}")]
    DataSize { expected: usize, actual: usize },
    #[error("{0}")]
    Device(String),
}

/// The graphics operations the renderer needs from its host
pub trait RenderBackend {
    /// Number of texture/sampler pairs a single program may bind
    fn max_samplers(&self) -> usize;

    /// Size of the canvas, when one is attached
    fn canvas_size(&self) -> Option<Size>;

    /// Turns both stages of a compiled pass into one program
    fn compile_program(&mut self, pass: &CompiledPass, output: ProgramOutput) -> Result<ProgramId, BackendError>;

    fn destroy_program(&mut self, program: ProgramId);

    /// Creates a texture usable both as a render target and for sampling
    ///
    /// Contents are undefined until drawn into or written.
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, BackendError>;

    /// Replaces a texture's contents with tightly packed RGBA8 texels
    fn write_texture(&mut self, texture: TextureId, rgba8: &[u8]) -> Result<(), BackendError>;

    fn destroy_texture(&mut self, texture: TextureId);

    fn draw(&mut self, command: &DrawCommand) -> Result<(), BackendError>;

    /// Copies a texture into a destination, stretching it to the destination's size
    fn blit(&mut self, source: TextureId, destination: RenderDestination) -> Result<(), BackendError>;

    /// Flushes the work recorded since the previous call
    fn end_frame(&mut self) -> Result<(), BackendError>;
}

/// Vertex of the full-screen quad every pass draws
///
/// Positions span [0, 1]; the MVP uniform maps them to clip space.
#[derive(Debug, Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
#[repr(C)]
pub(crate) struct QuadVertex {
    pub position: [f32; 4],
    pub tex_coord: [f32; 2],
    pub _padding: [f32; 2],
    pub color: [f32; 4],
}

const fn quad_vertex(x: f32, y: f32) -> QuadVertex {
    QuadVertex {
        position: [x, y, 0.0, 1.0],
        tex_coord: [x, y],
        _padding: [0.0; 2],
        color: [1.0; 4],
    }
}

pub(crate) const QUAD_VERTICES: &[QuadVertex] = &[quad_vertex(0.0, 0.0), quad_vertex(1.0, 0.0), quad_vertex(0.0, 1.0), quad_vertex(1.0, 1.0)];

pub(crate) const QUAD_INDICES: &[u16] = &[0, 2, 1, 1, 2, 3];

/// Column-major projection taking the [0, 1] quad to clip space with y pointing down
pub const MVP: [f32; 16] = [2.0, 0.0, 0.0, 0.0, 0.0, -2.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, -1.0, 1.0, 0.0, 1.0];

/// Texels of the fill used for history that does not exist yet
pub(crate) const TRANSPARENT_BLACK: [u8; 4] = [0, 0, 0, 0];

#[cfg(test)]
mod tests {
    use super::*;

    fn project(x: f32, y: f32) -> (f32, f32) {
        let v = [x, y, 0.0, 1.0];
        let row = |r: usize| (0..4).map(|c| MVP[c * 4 + r] * v[c]).sum::<f32>();
        (row(0), row(1))
    }

    #[test]
    fn test_mvp_maps_quad_to_clip_space() {
        assert_eq!(project(0.0, 0.0), (-1.0, 1.0));
        assert_eq!(project(1.0, 1.0), (1.0, -1.0));
        assert_eq!(project(0.5, 0.5), (0.0, 0.0));
    }

    #[test]
    fn test_quad_vertex_layout() {
        assert_eq!(std::mem::size_of::<QuadVertex>(), 48);
        assert_eq!(QUAD_VERTICES.len(), 4);
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < QUAD_VERTICES.len()));
    }
}
