//! File path handling and `#include` resolution

use super::ParseError;
use regex::Regex;
use std::sync::LazyLock;

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^\s*#\s*include\s+"([^"]+)""#).unwrap());

/// Nested includes deeper than this are treated as runaway recursion
const MAX_INCLUDE_DEPTH: usize = 32;

/// Directory part of a `/`-separated path, with a trailing slash, or empty
pub fn parent_dir(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(i) => &path[..=i],
        None => "",
    }
}

/// Resolves `relative` against the directory of `base_file`, folding `.` and `..`
pub fn resolve_path(base_file: &str, relative: &str) -> String {
    let relative = relative.replace('\\', "/");
    let joined = if relative.starts_with('/') || relative.contains(":/") {
        relative
    } else {
        format!("{}{relative}", parent_dir(base_file).replace('\\', "/"))
    };

    let absolute = joined.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." if parts.last().is_some_and(|p| *p != "..") => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    let path = parts.join("/");
    if absolute { format!("/{path}") } else { path }
}

/// Expresses a resolved path relative to the directory of `base_file`
///
/// Inverse of [`resolve_path`]; absolute paths are returned unchanged.
pub fn relative_to(base_file: &str, path: &str) -> String {
    if path.starts_with('/') || path.contains(":/") {
        return path.to_string();
    }
    let dir: Vec<&str> = parent_dir(base_file).split(['/', '\\']).filter(|p| !p.is_empty() && *p != ".").collect();
    let target: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let common = dir.iter().zip(&target).take_while(|(a, b)| a == b && **a != "..").count();
    let mut parts = vec![".."; dir.len() - common];
    parts.extend(&target[common..]);
    parts.join("/")
}

/// A shader source with its includes expanded
#[derive(Debug, Clone, PartialEq)]
pub struct Expanded {
    pub text: String,
    /// Every file pulled in, in order of first inclusion
    pub includes: Vec<String>,
}

/// Loads a shader file and expands its `#include` directives recursively
///
/// Includes are resolved relative to the including file. A file including itself,
/// directly or through others, is an error.
pub fn load_shader(path: &str, load_file: &dyn Fn(&str) -> std::io::Result<String>) -> Result<Expanded, ParseError> {
    let mut expanded = Expanded {
        text: String::new(),
        includes: Vec::new(),
    };
    let mut stack = Vec::new();
    expand(path, None, load_file, &mut stack, &mut expanded)?;
    Ok(expanded)
}

fn expand(path: &str, from: Option<(&str, usize)>, load_file: &dyn Fn(&str) -> std::io::Result<String>, stack: &mut Vec<String>, out: &mut Expanded) -> Result<(), ParseError> {
    let at = |message: String| match from {
        Some((file, line)) => ParseError::new(file, Some(line), message),
        None => ParseError::new(path, None, message),
    };
    if stack.iter().any(|p| p == path) {
        return Err(at(format!("include cycle: {} -> {path}", stack.join(" -> "))));
    }
    if stack.len() >= MAX_INCLUDE_DEPTH {
        return Err(at(format!("includes nested deeper than {MAX_INCLUDE_DEPTH}")));
    }
    let text = load_file(path).map_err(|e| at(format!("cannot load `{path}`: {e}")))?;

    stack.push(path.to_string());
    for (i, line) in text.lines().enumerate() {
        match INCLUDE_RE.captures(line) {
            Some(captures) => {
                let target = resolve_path(path, &captures[1]);
                if !out.includes.contains(&target) {
                    out.includes.push(target.clone());
                }
                expand(&target, Some((path, i + 1)), load_file, stack, out)?;
            }
            None => {
                out.text.push_str(line);
                out.text.push('\n');
            }
        }
    }
    stack.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn loader(files: &[(&str, &str)]) -> impl Fn(&str) -> std::io::Result<String> + use<> {
        let files: BTreeMap<String, String> = files.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |path: &str| files.get(path).cloned().ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path("presets/crt.slangp", "../shaders/crt.slang"), "shaders/crt.slang");
        assert_eq!(resolve_path("presets/crt.slangp", "./lut.png"), "presets/lut.png");
        assert_eq!(resolve_path("crt.slangp", "a/b.slang"), "a/b.slang");
        assert_eq!(resolve_path("crt.slangp", "../up.slang"), "../up.slang");
        assert_eq!(resolve_path("/abs/crt.slangp", "x.slang"), "/abs/x.slang");
        assert_eq!(relative_to("presets/crt.slangp", "presets/lut.png"), "lut.png");
        assert_eq!(relative_to("presets/crt.slangp", "shaders/crt.slang"), "../shaders/crt.slang");
        assert_eq!(relative_to("crt.slangp", "a/b.slang"), "a/b.slang");
    }

    #[test]
    fn test_nested_includes() {
        let load = loader(&[
            ("shaders/main.slang", "#version 450\n#include \"inc/common.inc\"\nvoid main() {}\n"),
            ("shaders/inc/common.inc", "#include \"../params.inc\"\nfloat common;\n"),
            ("shaders/params.inc", "#pragma parameter A \"A\" 1.0 0.0 2.0 0.1\n"),
        ]);
        let expanded = load_shader("shaders/main.slang", &load).unwrap();
        assert_eq!(expanded.text, "#version 450\n#pragma parameter A \"A\" 1.0 0.0 2.0 0.1\nfloat common;\nvoid main() {}\n");
        assert_eq!(expanded.includes, vec!["shaders/inc/common.inc", "shaders/params.inc"]);
    }

    #[test]
    fn test_include_cycle_and_missing_file() {
        let load = loader(&[("a.slang", "#include \"b.inc\"\n"), ("b.inc", "\n#include \"a.slang\"\n")]);
        let error = load_shader("a.slang", &load).unwrap_err();
        assert_eq!(error.file, "b.inc");
        assert_eq!(error.line, Some(2));
        assert!(error.message.contains("cycle"));

        let error = load_shader("missing.slang", &load).unwrap_err();
        assert_eq!(error.file, "missing.slang");
    }
}
