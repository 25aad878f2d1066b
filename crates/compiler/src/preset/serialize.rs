//! Canonical preset writer

use super::include::relative_to;
use super::{AxisScale, FilterMode, PresetDocument, ShaderSource};
use std::fmt::Write;

fn axis_lines(out: &mut String, axis_name: &str, index: usize, axis: &AxisScale) {
    let _ = writeln!(out, "scale_type_{axis_name}{index} = {}", axis.scale_type.as_str());
    let _ = writeln!(out, "scale_{axis_name}{index} = {}", axis.factor.to_preset_string());
}

/// Writes every pass setting explicitly, so no default applies when the text is parsed again
pub fn to_preset_string(document: &PresetDocument) -> String {
    let base = document.path.as_str();
    let mut out = String::new();
    let _ = writeln!(out, "shaders = {}", document.passes.len());

    for (index, pass) in document.passes.iter().enumerate() {
        out.push('\n');
        match &pass.source {
            ShaderSource::Combined { path, .. } => {
                let _ = writeln!(out, "shader{index} = \"{}\"", relative_to(base, path));
            }
            ShaderSource::Split { vertex_path, fragment_path, .. } => {
                let _ = writeln!(out, "vertex{index} = \"{}\"", relative_to(base, vertex_path));
                let _ = writeln!(out, "fragment{index} = \"{}\"", relative_to(base, fragment_path));
            }
        }
        // An empty alias suppresses a `#pragma name` fallback
        let _ = writeln!(out, "alias{index} = \"{}\"", pass.alias.as_deref().unwrap_or(""));
        if let Some(filter) = pass.filter {
            let _ = writeln!(out, "filter_linear{index} = {}", filter == FilterMode::Linear);
        }
        let _ = writeln!(out, "wrap_mode{index} = {}", pass.wrap_mode.as_str());
        axis_lines(&mut out, "x", index, &pass.scale.x);
        axis_lines(&mut out, "y", index, &pass.scale.y);
        if let Some(modulo) = pass.frame_count_mod {
            let _ = writeln!(out, "frame_count_mod{index} = {modulo}");
        }
        let _ = writeln!(out, "float_framebuffer{index} = {}", pass.float_framebuffer);
        let _ = writeln!(out, "srgb_framebuffer{index} = {}", pass.srgb_framebuffer);
        if let Some(depth) = pass.history_depth {
            let _ = writeln!(out, "history_depth{index} = {depth}");
        }
    }

    if !document.textures.is_empty() {
        out.push('\n');
        let names: Vec<&str> = document.textures.keys().map(String::as_str).collect();
        let _ = writeln!(out, "textures = \"{}\"", names.join(";"));
        for (name, texture) in &document.textures {
            let _ = writeln!(out, "{name} = \"{}\"", relative_to(base, &texture.path));
            let _ = writeln!(out, "{name}_linear = {}", texture.filter == FilterMode::Linear);
            let _ = writeln!(out, "{name}_wrap_mode = {}", texture.wrap_mode.as_str());
            let _ = writeln!(out, "{name}_mipmap = {}", texture.mipmap);
        }
    }

    if !document.parameter_overrides.is_empty() {
        out.push('\n');
        let names: Vec<&str> = document.parameter_overrides.keys().map(String::as_str).collect();
        let _ = writeln!(out, "parameters = \"{}\"", names.join(";"));
        for (name, value) in &document.parameter_overrides {
            let _ = writeln!(out, "{name} = {value}");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use crate::preset::{FilterMode, ScaleType, WrapMode, parse};
    use std::collections::BTreeMap;

    const SHADER: &str = "#pragma name Named\n#pragma parameter WARP \"Warp\" 0.1 0.0 0.5 0.01\n#pragma stage fragment\nuniform sampler2D Source;\n";
    const SECOND: &str = "#pragma stage fragment\nuniform sampler2D Named;\nuniform sampler2D NamedHistory2;\nuniform sampler2D BG;\n";
    const PLAIN: &str = "#pragma stage fragment\nuniform sampler2D Source;\n";

    fn load(path: &str) -> std::io::Result<String> {
        let files = BTreeMap::from([
            ("presets/shaders/first.slang", SHADER),
            ("presets/shaders/second.vert", SECOND),
            ("presets/shaders/second.frag", SECOND),
            ("presets/shaders/plain.slang", PLAIN),
        ]);
        files.get(path).map(|s| s.to_string()).ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
    }

    #[test]
    fn test_round_trip() {
        let text = "shaders = 2\nshader0 = shaders/first.slang\nscale_type0 = absolute\nscale_x0 = 320\nscale_y0 = 240\nfloat_framebuffer0 = true\nhistory_depth0 = 3\nvertex1 = shaders/second.vert\nfragment1 = shaders/second.frag\nscale_type_x1 = viewport\nscale_x1 = 0.5\nscale_type_y1 = source\nscale_y1 = 1/3\nfilter_linear1 = true\nframe_count_mod1 = 4\ntextures = \"BG\"\nBG = ../images/bg.png\nBG_wrap_mode = mirrored_repeat\nWARP = 0.25\n";
        let document = parse(text, "presets/crt.slangp", &load).unwrap();
        assert_eq!(document.passes[0].alias.as_deref(), Some("Named"));
        assert_eq!(document.textures["BG"].path, "images/bg.png");

        let serialized = document.to_preset_string();
        let reparsed = parse(&serialized, "presets/crt.slangp", &load).unwrap();
        assert_eq!(reparsed, document);
        assert_eq!(reparsed.to_preset_string(), serialized);
    }

    #[test]
    fn test_round_trip_every_pass_setting() {
        let text = "\
shaders = 4
shader0 = shaders/first.slang
alias0 = Warm
scale_type0 = original
scale_x0 = 2
scale_y0 = 0.5
filter_linear0 = false
wrap_mode0 = clamp_to_edge
srgb_framebuffer0 = true
shader1 = shaders/plain.slang
scale_type_x1 = absolute
scale_x1 = 256
scale_type_y1 = original
scale_y1 = 3/2
wrap_mode1 = repeat
float_framebuffer1 = true
frame_count_mod1 = 2
history_depth1 = 4
shader2 = shaders/plain.slang
alias2 = Cool
scale_type2 = source
scale2 = 2
wrap_mode2 = mirrored_repeat
shader3 = shaders/plain.slang
scale_type3 = viewport
wrap_mode3 = clamp_to_border
filter_linear3 = true
textures = \"LUT;Noise\"
LUT = ../images/lut.png
LUT_linear = false
LUT_wrap_mode = repeat
LUT_mipmap = true
Noise = noise.png
parameters = \"WARP\"
WARP = 0.25
";
        let document = parse(text, "presets/crt.slangp", &load).unwrap();
        let passes = &document.passes;
        assert_eq!(passes[0].alias.as_deref(), Some("Warm"));
        assert_eq!(passes[0].scale.y.scale_type, ScaleType::Original);
        assert_eq!(passes[0].filter, Some(FilterMode::Nearest));
        assert!(passes[0].srgb_framebuffer);
        assert_eq!(passes[1].scale.x.scale_type, ScaleType::Absolute);
        assert_eq!(passes[1].scale.y.scale_type, ScaleType::Original);
        assert_eq!((passes[1].frame_count_mod, passes[1].history_depth), (Some(2), Some(4)));
        assert_eq!(passes[2].alias.as_deref(), Some("Cool"));
        assert_eq!(passes[2].wrap_mode, WrapMode::MirroredRepeat);
        assert_eq!(passes[3].scale.x.scale_type, ScaleType::Viewport);
        assert_eq!(passes[3].alias, None);
        assert!(document.textures["LUT"].mipmap);
        assert_eq!(document.textures["LUT"].path, "images/lut.png");
        assert_eq!(document.textures["Noise"].wrap_mode, WrapMode::ClampToBorder);
        assert_eq!(document.parameter_overrides["WARP"], 0.25);

        let serialized = document.to_preset_string();
        assert!(serialized.contains("alias3 = \"\"\n"));
        assert!(serialized.contains("scale_type_y1 = original\n"));
        let reparsed = parse(&serialized, "presets/crt.slangp", &load).unwrap();
        assert_eq!(reparsed, document);
        assert_eq!(reparsed.to_preset_string(), serialized);
    }

    #[test]
    fn test_canonical_text() {
        let text = "shaders = 1\nshader0 = shaders/first.slang\n";
        let document = parse(text, "presets/crt.slangp", &load).unwrap();
        assert_eq!(
            document.to_preset_string(),
            "shaders = 1\n\nshader0 = \"shaders/first.slang\"\nalias0 = \"Named\"\nwrap_mode0 = clamp_to_border\nscale_type_x0 = viewport\nscale_x0 = 1\nscale_type_y0 = viewport\nscale_y0 = 1\nfloat_framebuffer0 = false\nsrgb_framebuffer0 = false\n"
        );
    }
}
