//! Presets shipped with the crate
//!
//! The build script embeds every file the presets of
//! [`PREDEFINED_PRESETS`](retroshade_compiler::predefined::PREDEFINED_PRESETS) load, so
//! they activate without filesystem access.

/// A preset and the files it loads, keyed by their path relative to `shaders/`
#[derive(Debug)]
pub struct BundledPreset {
    pub name: &'static str,
    /// Path of the preset file itself
    pub path: &'static str,
    pub files: &'static [(&'static str, &'static str)],
}

impl BundledPreset {
    /// Contents of the preset file
    pub fn text(&self) -> &'static str {
        self.file(self.path).unwrap_or_default()
    }

    fn file(&self, path: &str) -> Option<&'static str> {
        self.files.iter().find(|(p, _)| *p == path).map(|(_, text)| *text)
    }

    /// A loader for [`compile_preset`](retroshade_compiler::compile_preset) serving the embedded files
    pub fn load_file(&self, path: &str) -> std::io::Result<String> {
        self.file(path)
            .map(str::to_string)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("{path} is not part of bundled preset {}", self.name)))
    }
}

include!(concat!(env!("OUT_DIR"), "/bundled.rs"));

/// Looks up a bundled preset by name, ignoring ASCII case
pub fn bundled_preset(name: &str) -> Option<&'static BundledPreset> {
    BUNDLED_PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}
