//! retroshade runtime for RetroArch-style shader presets
//!
//! This crate draws the execution plans produced by `retroshade-compiler` over a game's
//! framebuffer, once per displayed frame. It manages the offscreen render targets, the
//! history of earlier frames that feedback passes read, and falls back to unshaded
//! passthrough when a preset cannot be drawn instead of failing the host's render loop.
//! Graphics work goes through the [`RenderBackend`] trait; [`WgpuBackend`] implements it
//! on wgpu.

pub mod backend;
pub mod bundled;
pub mod history;
mod pipeline_executor;
pub mod pool;
pub mod renderer;
pub mod uniforms;

pub use backend::{RenderBackend, WgpuBackend};
pub use bundled::{BUNDLED_PRESETS, BundledPreset, bundled_preset};
pub use history::FrameInput;
pub use pipeline_executor::{FrameOutcome, FramePhase, LookupImage, PipelineExecutor, RuntimeBindingError};
pub use renderer::{ActivationError, ActivationTicket, ParameterChange, Renderer, RendererState};
pub use retroshade_compiler as compiler;
