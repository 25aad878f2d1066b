//! Preset analysis tool
//!
//! Compiles a preset and prints the resulting execution plan: pass order, resolved
//! inputs, physical targets, history retention and every diagnostic. Pass `--json` to
//! dump the full plan instead.

use retroshade_compiler::graph::{OutputTarget, Size};
use retroshade_compiler::{CompileOptions, compile_preset};
use std::env;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 && !(args.len() == 3 && args[2] == "--json") {
        eprintln!("Usage: {} <preset.slangp> [--json]", args[0]);
        eprintln!("Compiles a preset and dumps the execution plan to stdout");
        process::exit(1);
    }

    let preset_path = &args[1];
    if !Path::new(preset_path).exists() {
        eprintln!("Error: Preset file '{preset_path}' does not exist");
        process::exit(1);
    }
    let text = match fs::read_to_string(preset_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error reading '{preset_path}': {e}");
            process::exit(1);
        }
    };

    let load_file = |path: &str| fs::read_to_string(path);
    let compilation = match compile_preset(&text, preset_path, &load_file, &CompileOptions::default()) {
        Ok(compilation) => compilation,
        Err(e) => {
            eprintln!("Error compiling preset '{preset_path}': {e}");
            if let Some(diagnostic) = e.to_diagnostic() {
                eprintln!("{diagnostic}");
            }
            process::exit(1);
        }
    };

    if args.len() == 3 {
        match serde_json::to_string_pretty(&compilation.plan) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing plan: {e}");
                process::exit(1);
            }
        }
        return;
    }

    let plan = &compilation.plan;
    // Sizes for a typical 320x240 core shown on a 1080p display
    let sizes = plan.resolve_sizes(Size::new(320, 240), Size::new(1920, 1080)).unwrap_or_default();
    println!("{} passes, presentation {:?}, history depth {}", plan.passes.len(), plan.presentation, plan.retention.max());
    for pass in &plan.passes {
        let output = match pass.output {
            OutputTarget::Target(id) => format!("target {id}"),
            OutputTarget::Canvas => "canvas".to_string(),
        };
        let size = sizes.get(pass.pass_index).map(ToString::to_string).unwrap_or_default();
        println!("pass {} ({}) -> {output} {size} {:?}", pass.pass_index, pass.alias.as_deref().unwrap_or("-"), pass.format);
        for input in &pass.inputs {
            println!("    {} <- {:?} [{:?}, {:?}]", input.name, input.input, input.filter, input.wrap_mode);
        }
        for member in &pass.compiled.uniforms.members {
            println!("    uniform {} {} @{} <- {:?}", member.ty.glsl_name(), member.name, member.offset, member.source);
        }
    }
    for target in &plan.targets {
        println!("target {}: {:?} persistent={} passes={:?}", target.id, target.format, target.persistent, target.passes);
    }
    for diagnostic in compilation.diagnostics.entries() {
        println!("{diagnostic}");
    }
}
