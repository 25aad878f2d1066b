//! Transpiled source dumping tool
//!
//! Transpiles every pass of a preset and writes the generated stages to an output
//! directory as `passN.vert` / `passN.frag`, together with `passes.json` describing
//! uniform layouts, sampler bindings and the rewrite log of each pass.

use retroshade_compiler::preset;
use retroshade_compiler::transpile::{CompiledPass, transpile};
use std::{env, fs, path::Path, process};

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <preset.slangp> <output_dir>", args[0]);
        eprintln!("Transpiles every pass of a preset and writes the generated sources");
        process::exit(1);
    }

    if let Err(e) = run(&args[1], Path::new(&args[2])) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(preset_path: &str, output_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = fs::read_to_string(preset_path)?;
    let load_file = |path: &str| fs::read_to_string(path);
    let document = preset::parse(&text, preset_path, &load_file)?;

    fs::create_dir_all(output_dir)?;
    let mut passes: Vec<CompiledPass> = Vec::with_capacity(document.passes.len());
    for (index, pass) in document.passes.iter().enumerate() {
        let compiled = transpile(&pass.source, index, &document)?;
        fs::write(output_dir.join(format!("pass{index}.vert")), &compiled.vertex_source)?;
        fs::write(output_dir.join(format!("pass{index}.frag")), &compiled.fragment_source)?;
        println!("pass {index}: {} uniforms, {} samplers, {} rewrites", compiled.uniforms.members.len(), compiled.samplers.len(), compiled.rewrites.len());
        passes.push(compiled);
    }

    fs::write(output_dir.join("passes.json"), serde_json::to_string_pretty(&passes)?)?;
    println!("Wrote {} passes to {}", passes.len(), output_dir.display());
    Ok(())
}
