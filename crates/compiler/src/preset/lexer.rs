//! Preset text tokenizer
//!
//! Presets are line-oriented `key = value` files. Values may be quoted; `#`, `//` and
//! `/* */` start comments anywhere outside quotes. `#reference "path"` lines pull in
//! another preset.

use super::ParseError;

/// One meaningful line of a preset file
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `#reference "path"`
    Reference { path: String, line: usize },
    Entry(Entry),
}

/// A `key = value` pair with its location
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub value: String,
    pub line: usize,
}

/// Removes comments from one line, tracking block comments across lines
fn strip_comments(line: &str, in_block: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.char_indices().peekable();
    let mut in_quotes = false;

    while let Some((i, c)) = chars.next() {
        if *in_block {
            if c == '*' && line[i + 1..].starts_with('/') {
                chars.next();
                *in_block = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = !in_quotes;
                out.push(c);
            }
            '#' if !in_quotes => break,
            '/' if !in_quotes && line[i + 1..].starts_with('/') => break,
            '/' if !in_quotes && line[i + 1..].starts_with('*') => {
                chars.next();
                *in_block = true;
            }
            _ => out.push(c),
        }
    }
    out
}

/// Strips one pair of surrounding double quotes
pub fn unquote(value: &str) -> &str {
    let value = value.trim();
    value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value)
}

/// Splits preset text into statements
///
/// # Arguments
/// * `file` - Name used in error messages
pub fn lex(text: &str, file: &str) -> Result<Vec<Statement>, ParseError> {
    let mut statements = Vec::new();
    let mut in_block = false;

    for (i, raw) in text.lines().enumerate() {
        let number = i + 1;
        let trimmed = raw.trim_start();
        if !in_block && let Some(rest) = trimmed.strip_prefix("#reference") {
            let path = unquote(&strip_comments(rest, &mut false)).to_string();
            if path.is_empty() {
                return Err(ParseError::new(file, Some(number), "#reference without a path"));
            }
            statements.push(Statement::Reference { path, line: number });
            continue;
        }

        let line = strip_comments(raw, &mut in_block);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ParseError::new(file, Some(number), format!("expected `key = value`, found `{line}`")));
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ParseError::new(file, Some(number), format!("malformed key `{key}`")));
        }
        statements.push(Statement::Entry(Entry {
            key: key.to_string(),
            value: unquote(value).to_string(),
            line: number,
        }));
    }

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(text: &str) -> Vec<(String, String, usize)> {
        lex(text, "test.slangp")
            .unwrap()
            .into_iter()
            .filter_map(|s| match s {
                Statement::Entry(e) => Some((e.key, e.value, e.line)),
                Statement::Reference { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_comments_and_quotes() {
        let text = "# header\nshaders = \"2\" // two passes\n/* block\n   comment */ shader0 = \"a#b.slang\"\nscale0 = 2.0 # trailing\n";
        assert_eq!(
            entries(text),
            vec![
                ("shaders".to_string(), "2".to_string(), 2),
                ("shader0".to_string(), "a#b.slang".to_string(), 4),
                ("scale0".to_string(), "2.0".to_string(), 5),
            ]
        );
    }

    #[test]
    fn test_reference_lines() {
        let statements = lex("#reference \"../base.slangp\"\nGAMMA = 2.4\n", "x.slangp").unwrap();
        assert_eq!(statements[0], Statement::Reference { path: "../base.slangp".to_string(), line: 1 });
    }

    #[test]
    fn test_malformed_lines() {
        let error = lex("shaders = 1\nshader0 \"a.slang\"\n", "bad.slangp").unwrap_err();
        assert_eq!(error.file, "bad.slangp");
        assert_eq!(error.line, Some(2));
        assert!(lex("sha ders = 1\n", "bad.slangp").is_err());
    }
}
