//! retroshade CLI preset renderer
//!
//! Renders a shader preset over a still image headlessly and saves the last frame.
//! The preset is either a `.slangp`/`.glslp` file or the name of a bundled preset.
//!
//! # Usage
//! ```bash
//! retroshade-cli input.png output.png --preset crt_simple --scale 3 --frames 4 --param SCANLINE_WEIGHT=0.8
//! ```

use clap::Parser;
use retroshade::backend::TextureDesc;
use retroshade::compiler::config::PipelineConfig;
use retroshade::compiler::diagnostics::Diagnostics;
use retroshade::compiler::graph::Size;
use retroshade::compiler::preset::TargetFormat;
use retroshade::{FrameInput, RenderBackend, Renderer, WgpuBackend};
use std::path::{Path, PathBuf};

const CANVAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Command-line arguments for the preset renderer
#[derive(Parser)]
#[command(version, about = "Renders a RetroArch shader preset over an image")]
struct Args {
    /// Input image file path
    input: PathBuf,

    /// Output image file path
    output: PathBuf,

    /// Preset file, or the name of a bundled preset (stock, crt_simple, crt_phosphor, scanlines_legacy)
    #[arg(long, short, default_value = "crt_simple")]
    preset: String,

    /// Viewport size as a multiple of the input size
    #[arg(long, short, default_value = "2")]
    scale: u32,

    /// Number of frames to render; history-based presets need a few to settle
    #[arg(long, short, default_value = "1")]
    frames: u32,

    /// Parameter override as NAME=VALUE, may be repeated
    #[arg(long = "param", value_parser = parse_parameter)]
    parameters: Vec<(String, f32)>,

    /// YAML pipeline configuration
    #[arg(long, short)]
    config: Option<PathBuf>,
}

fn parse_parameter(value: &str) -> Result<(String, f32), String> {
    let (name, value) = value.split_once('=').ok_or_else(|| format!("expected NAME=VALUE, got `{value}`"))?;
    let value = value.trim().parse::<f32>().map_err(|e| format!("invalid value for {name}: {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn print_diagnostics(diagnostics: &Diagnostics) {
    for diagnostic in diagnostics.entries() {
        let pass = diagnostic.pass_index.map(|p| format!("pass {p}: ")).unwrap_or_default();
        println!("  [{:?}] {pass}{}", diagnostic.kind, diagnostic.detail);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = Args::parse();

    // Load input image
    println!("Loading image from: {}", args.input.display());
    let input_image = image::open(&args.input)?.to_rgba8();
    let source_size = Size::new(input_image.width(), input_image.height());
    let viewport = Size::new(source_size.width * args.scale.max(1), source_size.height * args.scale.max(1));
    println!("Input image: {source_size}, viewport: {viewport}");

    // Initialize wgpu context
    println!("Initializing GPU...");
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: None,
        required_features: WgpuBackend::desired_features() & adapter.features(),
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: Default::default(),
    }))?;

    // The canvas belongs to the host; the renderer only draws into its view
    let canvas = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Canvas"),
        size: wgpu::Extent3d {
            width: viewport.width,
            height: viewport.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: CANVAS_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    let mut backend = WgpuBackend::new(device, queue, CANVAS_FORMAT);
    backend.set_canvas(canvas.create_view(&wgpu::TextureViewDescriptor::default()), viewport);
    let source = backend.create_texture(&TextureDesc {
        label: "Input image".to_string(),
        size: source_size,
        format: TargetFormat::Rgba8Unorm,
    })?;
    backend.write_texture(source, input_image.as_raw())?;

    let mut renderer = match &args.config {
        Some(path) => Renderer::from_config(backend, &PipelineConfig::from_file(path)?),
        None => Renderer::new(backend),
    };
    for (name, value) in &args.parameters {
        renderer.set_parameter(name, *value);
    }

    // Activate the preset
    println!("Activating preset '{}'", args.preset);
    let activation = if Path::new(&args.preset).is_file() {
        let text = std::fs::read_to_string(&args.preset)?;
        renderer.activate(&text, &args.preset, &|path| std::fs::read_to_string(path))
    } else {
        renderer.activate_bundled(&args.preset)
    };
    if let Err(error) = activation {
        eprintln!("Preset not activated: {error}");
    }

    println!("Rendering {} frame(s)...", args.frames.max(1));
    for frame in 0..args.frames.max(1) {
        let input = FrameInput::new(source, source_size, viewport).with_time(frame as f32 / 60.0);
        renderer.render_frame(&input)?;
    }
    println!("Renderer state: {:?}", renderer.state());
    if !renderer.diagnostics().is_empty() {
        println!("Diagnostics:");
        print_diagnostics(renderer.diagnostics());
    }

    println!("Saving result to: {}", args.output.display());
    let backend = renderer.backend();
    let output_image = save_texture_to_image(backend.device(), backend.queue(), &canvas)?;
    output_image.save(&args.output)?;
    Ok(())
}

/// Reads an RGBA8 texture back into an image
///
/// Rows are copied with the padded stride wgpu requires and repacked afterwards.
fn save_texture_to_image(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<image::RgbaImage, Box<dyn std::error::Error>> {
    let wgpu::Extent3d { width, height, .. } = texture.size();
    let format = texture.format();
    if format != wgpu::TextureFormat::Rgba8Unorm {
        return Err(format!("Unsupported texture format for saving: {format:?}").into());
    }

    let unpadded_bytes_per_row = width * 4;
    let bytes_per_row = unpadded_bytes_per_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

    // Create staging buffer for GPU-to-CPU data transfer
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Output Buffer"),
        size: (bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Copy Encoder") });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    // Map buffer for CPU access and wait for completion
    let buffer_slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |v| sender.send(v).unwrap());

    device.poll(wgpu::PollType::Wait)?;

    pollster::block_on(receiver.receive()).ok_or("Failed to map buffer for reading")??;

    let data = buffer_slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
    for row in data.chunks(bytes_per_row as usize) {
        pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
    }
    image::RgbaImage::from_raw(width, height, pixels).ok_or_else(|| "Failed to create RGBA8 image from data".into())
}
