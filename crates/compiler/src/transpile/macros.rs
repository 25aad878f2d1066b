//! Object-like macro inlining
//!
//! After conditionals are resolved, object-like `#define`s only alias tokens
//! (`COMPAT_TEXTURE`, `COMPAT_PRECISION`, `vTexCoord TEX0.xy`). Inlining them lets every
//! later pass see the real identifiers. Function-like macros stay in the output.

use super::lexer::{Token, TokenKind, tokenize};
use crate::diagnostics::SourceLine;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static OBJECT_DEFINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*#\s*define\s+([A-Za-z_]\w*)(?:\s+(.*))?$").unwrap());
static UNDEF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*#\s*undef\s+([A-Za-z_]\w*)").unwrap());

/// An inlined definition
#[derive(Debug, Clone, PartialEq)]
pub struct Inlined {
    pub name: String,
    pub body: String,
    pub line: usize,
}

/// Tokenizes a macro body, dropping comments and surrounding whitespace
fn body_tokens(body: &str, line: usize) -> Vec<Token> {
    let mut tokens = tokenize(&[SourceLine { number: line, text: body.to_string() }]);
    tokens.retain(|t| !matches!(t.kind, TokenKind::Comment | TokenKind::Newline));
    while tokens.first().is_some_and(|t| t.kind == TokenKind::Space) {
        tokens.remove(0);
    }
    while tokens.last().is_some_and(|t| t.kind == TokenKind::Space) {
        tokens.pop();
    }
    tokens
}

/// Replaces uses of object-like macros with their bodies and removes their definitions
///
/// Expansion is recursive; a macro is never expanded inside its own expansion. Parameters
/// of a function-like macro shadow object-like macros inside that macro's body.
pub fn inline_object_macros(tokens: Vec<Token>) -> (Vec<Token>, Vec<Inlined>) {
    let mut macros: BTreeMap<String, Vec<Token>> = BTreeMap::new();
    let mut inlined = Vec::new();
    let mut output = Vec::with_capacity(tokens.len());
    let mut macro_params: Vec<String> = Vec::new();

    for token in tokens {
        match token.kind {
            TokenKind::Directive => {
                if let Some(captures) = OBJECT_DEFINE_RE.captures(&token.text) {
                    let body = captures.get(2).map_or("", |m| m.as_str());
                    macros.insert(captures[1].to_string(), body_tokens(body, token.line));
                    inlined.push(Inlined {
                        name: captures[1].to_string(),
                        body: body.trim().to_string(),
                        line: token.line,
                    });
                    continue;
                }
                if let Some(captures) = UNDEF_RE.captures(&token.text)
                    && macros.remove(&captures[1]).is_some()
                {
                    continue;
                }
                output.push(token);
            }
            TokenKind::MacroHead => {
                macro_params = token
                    .text
                    .split_once('(')
                    .map(|(_, params)| params.trim_end_matches(')').split(',').map(|p| p.trim().to_string()).collect())
                    .unwrap_or_default();
                output.push(token);
            }
            TokenKind::Newline => {
                macro_params.clear();
                output.push(token);
            }
            TokenKind::Ident if !macro_params.contains(&token.text) => {
                let mut active = Vec::new();
                expand(&mut output, token, &macros, &mut active);
            }
            _ => output.push(token),
        }
    }

    (output, inlined)
}

fn expand(output: &mut Vec<Token>, token: Token, macros: &BTreeMap<String, Vec<Token>>, active: &mut Vec<String>) {
    let Some(body) = macros.get(&token.text).filter(|_| token.kind == TokenKind::Ident && !active.contains(&token.text)) else {
        output.push(token);
        return;
    };
    active.push(token.text.clone());
    for part in body {
        let mut part = part.clone();
        part.line = token.line;
        expand(output, part, macros, active);
    }
    active.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transpile::lexer::render;

    fn lines(source: &str) -> Vec<SourceLine> {
        source.lines().enumerate().map(|(i, text)| SourceLine { number: i + 1, text: text.to_string() }).collect()
    }

    #[test]
    fn test_inlines_recursively() {
        let source = "#define COMPAT_TEXTURE texture2D\n#define COMPAT_PRECISION\n#define SourceSize vec4(TextureSize, 1.0 / TextureSize) // size\nuniform COMPAT_PRECISION vec2 TextureSize;\nvec4 c = COMPAT_TEXTURE(Texture, uv * SourceSize.xy);";
        let (tokens, inlined) = inline_object_macros(tokenize(&lines(source)));
        let text = render(&tokens);
        assert_eq!(text, "\n\n\nuniform  vec2 TextureSize;\nvec4 c = texture2D(Texture, uv * vec4(TextureSize, 1.0 / TextureSize).xy);\n");
        assert_eq!(inlined.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(), vec!["COMPAT_TEXTURE", "COMPAT_PRECISION", "SourceSize"]);
        assert_eq!(inlined[2].line, 3);
        let expanded = tokens.iter().find(|t| t.text == "TextureSize" && t.line == 5).unwrap();
        assert_eq!(expanded.kind, TokenKind::Ident);
    }

    #[test]
    fn test_self_reference_and_undef() {
        let source = "#define X X + 1.0\nfloat a = X;\n#undef X\nfloat b = X;";
        let (tokens, _) = inline_object_macros(tokenize(&lines(source)));
        assert_eq!(render(&tokens), "\nfloat a = X + 1.0;\n\nfloat b = X;\n");
    }

    #[test]
    fn test_function_like_macros_are_kept() {
        let source = "#define SCALE 2.0\n#define TEX(SCALE) texture(Source, SCALE * uv)\nfloat s = SCALE;";
        let (tokens, _) = inline_object_macros(tokenize(&lines(source)));
        assert_eq!(render(&tokens), "\n#define TEX(SCALE) texture(Source, SCALE * uv)\nfloat s = 2.0;\n");
    }
}
