//! Build script for the retroshade crate
//!
//! Compiles every bundled preset once so a broken preset fails the build, and embeds
//! the preset together with every file it pulls in (referenced presets, shaders,
//! includes) into the binary.

use retroshade_compiler::predefined::PREDEFINED_PRESETS;
use retroshade_compiler::{CompileOptions, compile_preset};
use std::cell::RefCell;
use std::collections::BTreeSet;

/// Converts a string into a Rust string literal
fn string_literal(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Compiles one bundled preset and returns the files it loaded, itself included
fn collect_files(shaders_dir: &str, path: &str) -> BTreeSet<String> {
    let loaded = RefCell::new(BTreeSet::from([path.to_string()]));
    let load = |file: &str| {
        loaded.borrow_mut().insert(file.to_string());
        std::fs::read_to_string(format!("{shaders_dir}/{file}"))
    };
    let text = load(path).unwrap_or_else(|error| panic!("Failed to read bundled preset {path}: {error}"));
    let options = CompileOptions {
        validate: false,
        ..CompileOptions::default()
    };
    let compilation = compile_preset(&text, path, &load, &options).unwrap_or_else(|error| panic!("Bundled preset {path} does not compile: {error}"));
    println!("Compiled bundled preset {path}: {} passes", compilation.plan.passes.len());
    loaded.into_inner()
}

/// Generates the bundled preset table
fn write_code() {
    let project_dir = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("Failed to get parent directory")
        .parent()
        .expect("Failed to get grandparent directory")
        .to_str()
        .expect("Failed to convert path to string")
        .replace('\\', "/");
    let shaders_dir = format!("{project_dir}/shaders");

    let mut code = String::new();
    code.push_str("// This file is generated by the build script.\n\n");
    code.push_str("/// Presets embedded into the crate\n");
    code.push_str("pub const BUNDLED_PRESETS: &[BundledPreset] = &[\n");
    for (name, path) in PREDEFINED_PRESETS {
        code.push_str("    BundledPreset {\n");
        code.push_str(&format!("        name: {},\n", string_literal(name)));
        code.push_str(&format!("        path: {},\n", string_literal(path)));
        code.push_str("        files: &[\n");
        for file in collect_files(&shaders_dir, path) {
            let absolute = format!("{shaders_dir}/{file}");
            println!("cargo:rerun-if-changed={absolute}");
            code.push_str(&format!("            ({}, include_str!({})),\n", string_literal(&file), string_literal(&absolute)));
        }
        code.push_str("        ],\n");
        code.push_str("    },\n");
    }
    code.push_str("];\n");

    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR is not set");
    std::fs::write(format!("{out_dir}/bundled.rs"), code).expect("Failed to write bundled.rs");
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    write_code();
}
