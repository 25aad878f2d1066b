//! Token-level rewrites
//!
//! Legacy spellings are translated to the target dialect and texture calls are brought
//! into the explicit form each stage requires.

use super::lexer::{Token, TokenKind, matching_close, next_significant, prev_significant, split_arguments};
use super::{Rewrite, RewriteKind, Stage};
use std::collections::BTreeSet;

/// Fragment output synthesized for shaders writing `gl_FragColor`
pub const FRAG_COLOR: &str = "FragColor";

/// Drops `instance.` from accesses to members of uniform blocks
///
/// The synthesized uniform block is anonymous, so members are referenced by bare name.
pub fn strip_block_instances(tokens: &mut Vec<Token>, instances: &BTreeSet<String>) {
    if instances.is_empty() {
        return;
    }
    let mut remove = vec![false; tokens.len()];
    for i in 0..tokens.len() {
        if tokens[i].kind != TokenKind::Ident || !instances.contains(&tokens[i].text) {
            continue;
        }
        if prev_significant(tokens, i).is_some_and(|p| tokens[p].is_punct(".")) {
            continue;
        }
        if let Some(dot) = next_significant(tokens, i + 1)
            && tokens[dot].is_punct(".")
        {
            remove[i..=dot].iter_mut().for_each(|r| *r = true);
        }
    }
    let mut flags = remove.into_iter();
    tokens.retain(|_| !flags.next().unwrap_or(false));
}

/// Translates legacy built-ins and drops precision qualifiers
///
/// # Returns
/// Whether `gl_FragColor` was written, requiring a synthesized output
pub fn translate_legacy(tokens: &mut Vec<Token>, stage: Stage, log: &mut Vec<Rewrite>) -> bool {
    let mut uses_frag_color = false;
    let mut remove = vec![false; tokens.len()];

    for i in 0..tokens.len() {
        if tokens[i].kind != TokenKind::Ident {
            continue;
        }
        match tokens[i].text.as_str() {
            "gl_FragColor" if stage == Stage::Fragment => {
                if !uses_frag_color {
                    log.push(Rewrite::new(stage, tokens[i].line, RewriteKind::Translated, format!("gl_FragColor -> {FRAG_COLOR}")));
                }
                tokens[i].text = FRAG_COLOR.to_string();
                uses_frag_color = true;
            }
            "gl_ModelViewProjectionMatrix" => {
                log.push(Rewrite::new(stage, tokens[i].line, RewriteKind::Translated, "gl_ModelViewProjectionMatrix -> MVP"));
                tokens[i].text = "MVP".to_string();
            }
            "highp" | "mediump" | "lowp" => {
                // `precision` statements are dropped whole later
                let in_statement = prev_significant(tokens, i).is_some_and(|p| tokens[p].is_ident("precision"));
                if !in_statement {
                    remove[i] = true;
                    if tokens.get(i + 1).is_some_and(|t| t.kind == TokenKind::Space) {
                        remove[i + 1] = true;
                    }
                }
            }
            _ => {}
        }
    }

    let mut flags = remove.into_iter();
    tokens.retain(|_| !flags.next().unwrap_or(false));
    uses_frag_color
}

/// Legacy texture functions and their modern names
const LEGACY_TEXTURE_CALLS: &[(&str, &str)] = &[
    ("texture2D", "texture"),
    ("texture2DLod", "textureLod"),
    ("texture2DProj", "textureProj"),
    ("texture2DProjLod", "textureProjLod"),
    ("texture2DLodEXT", "textureLod"),
    ("shadow2D", "texture"),
];

fn token(kind: TokenKind, text: &str, line: usize) -> Token {
    Token::new(kind, text, line)
}

/// Rewrites texture sampling calls
///
/// * Legacy names (`texture2D`, `texture2DLod`, ...) become their modern equivalents.
/// * Hook-style `NAME_tex(uv)` becomes `texture(NAME, uv)` when `NAME` is a sampler.
/// * In the vertex stage implicit-derivative calls become explicit level-of-detail calls;
///   a bias argument is dropped since it has no meaning there.
///
/// Calls are processed from the end so nested calls are rewritten before their callers.
///
/// # Arguments
/// * `is_sampler` - Whether a name denotes a sampler (declared or resolvable)
/// * `functions` - Names of functions the shader defines, which are never treated as hooks
pub fn rewrite_texture_calls(tokens: &mut Vec<Token>, stage: Stage, is_sampler: &dyn Fn(&str) -> bool, functions: &BTreeSet<String>, log: &mut Vec<Rewrite>) {
    for i in (0..tokens.len()).rev() {
        if tokens[i].kind != TokenKind::Ident {
            continue;
        }
        let Some(open) = next_significant(tokens, i + 1).filter(|&o| tokens[o].is_punct("(")) else {
            continue;
        };
        if prev_significant(tokens, i).is_some_and(|p| tokens[p].is_punct(".")) {
            continue;
        }
        let line = tokens[i].line;
        let name = tokens[i].text.clone();

        if let Some((_, modern)) = LEGACY_TEXTURE_CALLS.iter().find(|(legacy, _)| *legacy == name) {
            log.push(Rewrite::new(stage, line, RewriteKind::TextureCall, format!("{name} -> {modern}")));
            tokens[i].text = modern.to_string();
        } else if let Some(sampler) = name.strip_suffix("_tex")
            && !sampler.is_empty()
            && !functions.contains(&name)
            && is_sampler(sampler)
        {
            let Some(close) = matching_close(tokens, open) else { continue };
            let arguments = split_arguments(tokens, open, close);
            if arguments.len() != 1 {
                continue;
            }
            log.push(Rewrite::new(stage, line, RewriteKind::TextureCall, format!("{name}(uv) -> texture({sampler}, uv)")));
            let mut call = vec![
                token(TokenKind::Ident, "texture", line),
                token(TokenKind::Punct, "(", line),
                token(TokenKind::Ident, sampler, line),
                token(TokenKind::Punct, ",", line),
                token(TokenKind::Space, " ", line),
            ];
            call.extend(tokens[open + 1..close].iter().cloned().skip_while(|t| t.kind == TokenKind::Space));
            call.push(token(TokenKind::Punct, ")", line));
            tokens.splice(i..=close, call);
        }

        if stage == Stage::Vertex {
            explicit_lod(tokens, i, log);
        }
    }
}

/// Rewrites the call at `index` to its explicit level-of-detail variant
fn explicit_lod(tokens: &mut Vec<Token>, index: usize, log: &mut Vec<Rewrite>) {
    let target = match tokens[index].text.as_str() {
        "texture" => "textureLod",
        "textureProj" => "textureProjLod",
        "textureOffset" => "textureLodOffset",
        _ => return,
    };
    let Some(open) = next_significant(tokens, index + 1).filter(|&o| tokens[o].is_punct("(")) else { return };
    let Some(close) = matching_close(tokens, open) else { return };
    let arguments = split_arguments(tokens, open, close);
    let line = tokens[index].line;
    let offset_call = target == "textureLodOffset";
    let expected = if offset_call { 3..=4 } else { 2..=3 };
    if !expected.contains(&arguments.len()) {
        return;
    }

    log.push(Rewrite::new(Stage::Vertex, line, RewriteKind::TextureCall, format!("{} -> {target} in vertex stage", tokens[index].text)));
    let argument = |n: usize| tokens[arguments[n].0..arguments[n].1].to_vec();
    let mut call = vec![token(TokenKind::Ident, target, line), token(TokenKind::Punct, "(", line)];
    call.extend(argument(0));
    call.push(token(TokenKind::Punct, ",", line));
    call.extend(argument(1));
    call.push(token(TokenKind::Punct, ",", line));
    call.push(token(TokenKind::Space, " ", line));
    call.push(token(TokenKind::Number, "0.0", line));
    if offset_call {
        call.push(token(TokenKind::Punct, ",", line));
        call.extend(argument(2));
    }
    call.push(token(TokenKind::Punct, ")", line));
    tokens.splice(index..=close, call);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceLine;
    use crate::transpile::lexer::{render, tokenize};

    fn tokens(source: &str) -> Vec<Token> {
        let lines: Vec<_> = source.lines().enumerate().map(|(i, text)| SourceLine { number: i + 1, text: text.to_string() }).collect();
        tokenize(&lines)
    }

    fn samplers(name: &str) -> bool {
        matches!(name, "Source" | "Original")
    }

    #[test]
    fn test_fragment_texture_calls() {
        let mut t = tokens("vec4 a = texture2D(Source, uv) + Original_tex(uv * 0.5);\nvec4 b = texture2DLod(Source, uv, 1.0);\nvec4 c = Missing_tex(uv);");
        let mut log = Vec::new();
        rewrite_texture_calls(&mut t, Stage::Fragment, &samplers, &BTreeSet::new(), &mut log);
        assert_eq!(
            render(&t),
            "vec4 a = texture(Source, uv) + texture(Original, uv * 0.5);\nvec4 b = textureLod(Source, uv, 1.0);\nvec4 c = Missing_tex(uv);\n"
        );
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|r| r.kind == RewriteKind::TextureCall));
    }

    #[test]
    fn test_vertex_stage_uses_explicit_lod() {
        let mut t = tokens("vec4 a = texture2D(Source, vec2(0.5, 0.5));\nvec4 b = texture(Source, uv, 2.0);\nvec4 c = textureOffset(Source, uv, ivec2(1, 0));\nvec4 d = texture(Source, texture(Original, uv).xy);");
        let mut log = Vec::new();
        rewrite_texture_calls(&mut t, Stage::Vertex, &samplers, &BTreeSet::new(), &mut log);
        assert_eq!(
            render(&t),
            "vec4 a = textureLod(Source, vec2(0.5, 0.5), 0.0);\nvec4 b = textureLod(Source, uv, 0.0);\nvec4 c = textureLodOffset(Source, uv, 0.0, ivec2(1, 0));\nvec4 d = textureLod(Source, textureLod(Original, uv, 0.0).xy, 0.0);\n"
        );
    }

    #[test]
    fn test_strip_block_instances() {
        let mut t = tokens("gl_Position = global.MVP * Position;\nfloat g = params.GAMMA + other.params.x;");
        strip_block_instances(&mut t, &BTreeSet::from(["global".to_string(), "params".to_string()]));
        assert_eq!(render(&t), "gl_Position = MVP * Position;\nfloat g = GAMMA + other.params.x;\n");
    }

    #[test]
    fn test_translate_legacy() {
        let mut t = tokens("precision mediump float;\nuniform highp vec2 OutputSize;\nvoid main() { gl_FragColor = vec4(1.0); }");
        let mut log = Vec::new();
        assert!(translate_legacy(&mut t, Stage::Fragment, &mut log));
        assert_eq!(render(&t), "precision mediump float;\nuniform vec2 OutputSize;\nvoid main() { FragColor = vec4(1.0); }\n");

        let mut vertex = tokens("gl_Position = gl_ModelViewProjectionMatrix * Position;");
        assert!(!translate_legacy(&mut vertex, Stage::Vertex, &mut log));
        assert_eq!(render(&vertex), "gl_Position = MVP * Position;\n");
    }
}
