//! Bundled preset table.
//!
//! Maps the names hosts use for the presets shipped with the renderer to their preset
//! files under `shaders/`. The runtime crate's build script embeds every file these
//! presets reference, so they can be activated without touching the filesystem.

/// Bundled presets, mapping a name to its preset file relative to `shaders/`.
pub const PREDEFINED_PRESETS: &[(&str, &str)] = &[
    // Unshaded output through the regular pass machinery
    ("STOCK", "stock.slangp"),
    // CRT emulation
    ("CRT_SIMPLE", "crt/crt-simple.slangp"),
    ("CRT_PHOSPHOR", "crt/phosphor-persistence.slangp"),
    // Legacy GLSL conventions
    ("SCANLINES_LEGACY", "legacy/scanlines.glslp"),
];

/// Looks up a bundled preset's file by name, ignoring ASCII case
pub fn predefined_preset(name: &str) -> Option<&'static str> {
    PREDEFINED_PRESETS.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, path)| *path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(predefined_preset("crt_simple"), Some("crt/crt-simple.slangp"));
        assert_eq!(predefined_preset("missing"), None);
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<&str> = PREDEFINED_PRESETS.iter().map(|(n, _)| *n).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), PREDEFINED_PRESETS.len());
    }
}
