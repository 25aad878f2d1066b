//! File-scope structure of a tokenized stage
//!
//! A stage is split into items (directives, macro definitions, declarations, interface
//! blocks, structs and functions). Item ranges index into the token stream so later passes
//! can rewrite tokens in place.

use super::TranspileErrorKind;
use super::glsl;
use super::lexer::{ASSIGNMENT_OPS, Token, TokenKind, matching_close, next_significant, prev_significant, render_trimmed, split_arguments};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    /// Token index of the name
    pub name_token: usize,
    /// Array suffix including brackets
    pub array: Option<String>,
    /// Token range of the initializer expression
    pub initializer: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    /// Text inside `layout(...)`
    pub layout: Option<String>,
    pub qualifiers: Vec<String>,
    pub ty: String,
    pub declarators: Vec<Declarator>,
}

impl Declaration {
    pub fn has(&self, qualifier: &str) -> bool {
        self.qualifiers.iter().any(|q| q == qualifier)
    }

    /// `location = N` from the layout qualifier
    pub fn location(&self) -> Option<u32> {
        layout_value(self.layout.as_deref()?, "location")
    }

    /// Interpolation qualifiers to carry over to a re-emitted declaration
    pub fn interpolation(&self) -> Vec<String> {
        self.qualifiers
            .iter()
            .filter(|q| matches!(q.as_str(), "flat" | "smooth" | "noperspective" | "centroid"))
            .cloned()
            .collect()
    }
}

/// Reads `key = value` from layout qualifier text
fn layout_value(layout: &str, key: &str) -> Option<u32> {
    layout.split(',').find_map(|entry| {
        let (k, v) = entry.split_once('=')?;
        (k.trim() == key).then(|| v.trim().parse().ok()).flatten()
    })
}

/// `uniform Name { ... } instance;`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub qualifiers: Vec<String>,
    pub name: String,
    pub members: Vec<Declaration>,
    pub instance: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub name_token: usize,
    pub params: Vec<String>,
    /// Indices of the braces enclosing the body; `None` for prototypes
    pub body: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Directive,
    /// Function-like macro; its body runs to the end of the line
    Macro { name: String, params: Vec<String> },
    Precision,
    Declaration(Declaration),
    Block(Block),
    Struct { name: String },
    Function(Function),
    /// A lone `;`
    Stray,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub start: usize,
    /// Exclusive
    pub end: usize,
    pub line: usize,
}

fn syntax(message: impl Into<String>, line: usize) -> (TranspileErrorKind, usize) {
    (TranspileErrorKind::Syntax(message.into()), line)
}

/// Splits a token stream into file-scope items
pub fn parse_items(tokens: &[Token]) -> Result<Vec<Item>, (TranspileErrorKind, usize)> {
    let mut items = Vec::new();
    let mut cursor = 0;

    while let Some(start) = next_significant(tokens, cursor) {
        let token = &tokens[start];
        let line = token.line;

        match token.kind {
            TokenKind::Directive => {
                items.push(Item { kind: ItemKind::Directive, start, end: start + 1, line });
                cursor = start + 1;
                continue;
            }
            TokenKind::MacroHead => {
                let end = (start + 1..tokens.len()).find(|&i| tokens[i].kind == TokenKind::Newline).unwrap_or(tokens.len());
                let (name, params) = parse_macro_head(&token.text);
                items.push(Item { kind: ItemKind::Macro { name, params }, start, end, line });
                cursor = end;
                continue;
            }
            _ => {}
        }

        if token.is_punct(";") {
            items.push(Item { kind: ItemKind::Stray, start, end: start + 1, line });
            cursor = start + 1;
            continue;
        }

        let (end, kind) = parse_statement(tokens, start)?;
        items.push(Item { kind, start, end, line });
        cursor = end;
    }

    Ok(items)
}

/// Parses `#define NAME(a, b)` into the name and parameter names
fn parse_macro_head(text: &str) -> (String, Vec<String>) {
    let rest = text.trim_start().trim_start_matches('#').trim_start();
    let rest = rest.strip_prefix("define").unwrap_or(rest).trim_start();
    let (name, params) = rest.split_once('(').unwrap_or((rest, ""));
    let params = params.trim_end_matches(')').split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect();
    (name.trim().to_string(), params)
}

/// Scans one file-scope statement starting at `start`
fn parse_statement(tokens: &[Token], start: usize) -> Result<(usize, ItemKind), (TranspileErrorKind, usize)> {
    let line = tokens[start].line;
    let mut paren = 0i32;
    let mut cursor = start;

    loop {
        let Some(index) = next_significant(tokens, cursor) else {
            return Err(syntax("unexpected end of source inside a declaration", line));
        };
        let token = &tokens[index];
        if token.kind == TokenKind::Punct {
            match token.text.as_str() {
                "(" => paren += 1,
                ")" => paren -= 1,
                "{" if paren == 0 => {
                    let close = matching_close(tokens, index).ok_or_else(|| syntax("unbalanced `{`", token.line))?;
                    let previous = prev_significant(tokens, index).map(|p| tokens[p].text.as_str());
                    if previous == Some(")") {
                        let function = parse_function(tokens, start, index, Some((index, close))).ok_or_else(|| syntax("malformed function definition", line))?;
                        return Ok((close + 1, ItemKind::Function(function)));
                    }
                    if matches!(previous, Some("=") | Some(",") | Some("{")) {
                        // Initializer list
                        cursor = close + 1;
                        continue;
                    }
                    let semicolon = (close + 1..tokens.len())
                        .find(|&i| tokens[i].is_punct(";"))
                        .ok_or_else(|| syntax("missing `;` after block", tokens[close].line))?;
                    if tokens[start].is_ident("struct") {
                        let name = next_significant(tokens, start + 1).filter(|&i| tokens[i].kind == TokenKind::Ident).map(|i| tokens[i].text.clone()).unwrap_or_default();
                        return Ok((semicolon + 1, ItemKind::Struct { name }));
                    }
                    let block = parse_block(tokens, start, index, close, semicolon).ok_or_else(|| syntax("malformed interface block", line))?;
                    return Ok((semicolon + 1, ItemKind::Block(block)));
                }
                ";" if paren == 0 => {
                    if tokens[start].is_ident("precision") {
                        return Ok((index + 1, ItemKind::Precision));
                    }
                    if let Some(function) = parse_function(tokens, start, index, None)
                        && !(start..index).any(|i| tokens[i].is_punct("="))
                    {
                        return Ok((index + 1, ItemKind::Function(function)));
                    }
                    let declaration = parse_declaration(tokens, start, index).ok_or_else(|| {
                        (TranspileErrorKind::UnsupportedDeclaration(render_trimmed(&tokens[start..=index])), line)
                    })?;
                    return Ok((index + 1, ItemKind::Declaration(declaration)));
                }
                _ => {}
            }
        }
        cursor = index + 1;
    }
}

/// Significant token indices in `start..end`
fn significant(tokens: &[Token], start: usize, end: usize) -> Vec<usize> {
    (start..end).filter(|&i| tokens[i].is_significant()).collect()
}

/// Parses `[qualifiers] type name(params)` with an optional body
/// `end` is the opening brace of the body, or the `;` ending a prototype
fn parse_function(tokens: &[Token], start: usize, end: usize, body: Option<(usize, usize)>) -> Option<Function> {
    let sig = significant(tokens, start, end);
    let open_position = sig.iter().position(|&i| tokens[i].is_punct("("))?;
    if open_position < 2 {
        return None;
    }
    let name_token = sig[open_position - 1];
    let return_type = &tokens[sig[open_position - 2]];
    if tokens[name_token].kind != TokenKind::Ident || return_type.kind != TokenKind::Ident || tokens[sig[0]].is_ident("layout") {
        return None;
    }
    if glsl::is_keyword(&tokens[name_token].text) || glsl::is_builtin_type(&tokens[name_token].text) {
        return None;
    }
    let open = sig[open_position];
    let close = matching_close(tokens, open)?;
    let params = split_arguments(tokens, open, close)
        .into_iter()
        .filter_map(|(a, b)| {
            let idents: Vec<_> = (a..b).filter(|&i| tokens[i].kind == TokenKind::Ident).collect();
            // `float x`, `in vec2 uv`, `float w[4]`; a lone `void` names nothing
            let last = *idents.last()?;
            (idents.len() >= 2).then(|| tokens[last].text.clone())
        })
        .collect();
    Some(Function {
        name: tokens[name_token].text.clone(),
        name_token,
        params,
        body,
    })
}

/// Parses a declaration statement; `end` is the index of the terminating `;` (or the end
/// of a block member)
pub fn parse_declaration(tokens: &[Token], start: usize, end: usize) -> Option<Declaration> {
    let sig = significant(tokens, start, end);
    let mut p = 0;
    let mut layout = None;

    if sig.first().is_some_and(|&i| tokens[i].is_ident("layout")) {
        let open = *sig.get(1)?;
        if !tokens[open].is_punct("(") {
            return None;
        }
        let close = matching_close(tokens, open)?;
        layout = Some(render_trimmed(&tokens[open + 1..close]));
        p = sig.iter().position(|&i| i > close)?;
    }

    let mut qualifiers = Vec::new();
    while let Some(&i) = sig.get(p)
        && tokens[i].kind == TokenKind::Ident
        && glsl::is_qualifier(&tokens[i].text)
    {
        qualifiers.push(tokens[i].text.clone());
        p += 1;
    }

    let &type_index = sig.get(p)?;
    if tokens[type_index].kind != TokenKind::Ident || tokens[type_index].is_ident("struct") {
        return None;
    }
    let ty = tokens[type_index].text.clone();
    p += 1;

    let mut declarators = Vec::new();
    loop {
        let &name_token = sig.get(p)?;
        if tokens[name_token].kind != TokenKind::Ident {
            return None;
        }
        p += 1;

        let mut array = None;
        if let Some(&i) = sig.get(p)
            && tokens[i].is_punct("[")
        {
            let close = matching_close(tokens, i)?;
            array = Some(render_trimmed(&tokens[i..=close]));
            p = sig.iter().position(|&j| j > close).unwrap_or(sig.len());
        }

        let mut initializer = None;
        if let Some(&i) = sig.get(p)
            && tokens[i].is_punct("=")
        {
            let mut depth = 0i32;
            let mut q = p + 1;
            while let Some(&j) = sig.get(q) {
                match tokens[j].text.as_str() {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth -= 1,
                    "," if depth == 0 => break,
                    _ => {}
                }
                q += 1;
            }
            let init_end = sig.get(q).copied().unwrap_or(end);
            initializer = Some((i + 1, init_end));
            p = q;
        }

        declarators.push(Declarator {
            name: tokens[name_token].text.clone(),
            name_token,
            array,
            initializer,
        });

        match sig.get(p) {
            None => break,
            Some(&i) if tokens[i].is_punct(",") => p += 1,
            Some(_) => return None,
        }
    }

    Some(Declaration { layout, qualifiers, ty, declarators })
}

/// Parses `[layout(...)] qualifiers Name { members } [instance];`
fn parse_block(tokens: &[Token], start: usize, open: usize, close: usize, semicolon: usize) -> Option<Block> {
    let head = significant(tokens, start, open);
    let name_index = *head.last()?;
    if tokens[name_index].kind != TokenKind::Ident {
        return None;
    }
    let qualifiers = head
        .iter()
        .filter(|&&i| tokens[i].kind == TokenKind::Ident && glsl::is_qualifier(&tokens[i].text))
        .map(|&i| tokens[i].text.clone())
        .collect();

    let mut members = Vec::new();
    let mut member_start = open + 1;
    for i in open + 1..close {
        if tokens[i].is_punct(";") {
            members.push(parse_declaration(tokens, member_start, i)?);
            member_start = i + 1;
        }
    }

    let tail = significant(tokens, close + 1, semicolon);
    let instance = match tail.first() {
        Some(&i) if tokens[i].kind == TokenKind::Ident && tail.len() == 1 => Some(tokens[i].text.clone()),
        Some(_) => return None,
        None => None,
    };

    Some(Block {
        qualifiers,
        name: tokens[name_index].text.clone(),
        members,
        instance,
    })
}

/// A use of an identifier that is not declared inside the walked region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub token: usize,
    /// The use is the target of an assignment or increment
    pub write: bool,
}

/// Collects references to names declared outside `start..end`
///
/// Tracks block scopes so locals and parameters shadowing file-scope names are skipped;
/// member accesses and swizzles after `.` are never references.
///
/// # Arguments
/// * `params` - Names in scope for the whole region (function or macro parameters)
/// * `types` - User-declared struct names, which start local declarations like built-in types
pub fn references(tokens: &[Token], start: usize, end: usize, params: &[String], types: &BTreeSet<String>) -> Vec<Reference> {
    let mut scopes: Vec<BTreeSet<String>> = vec![params.iter().cloned().collect()];
    let mut depth = 0i32;
    let mut declaring: Option<i32> = None;
    let mut found = Vec::new();
    let mut i = start;

    while i < end {
        let token = &tokens[i];
        match token.kind {
            TokenKind::Punct => match token.text.as_str() {
                "{" => scopes.push(BTreeSet::new()),
                "}" => {
                    if scopes.len() > 1 {
                        scopes.pop();
                    }
                }
                "(" | "[" => depth += 1,
                ")" | "]" => depth -= 1,
                ";" => declaring = None,
                "," if declaring == Some(depth) => {
                    if let Some(next) = next_significant(tokens, i + 1)
                        && next < end
                        && tokens[next].kind == TokenKind::Ident
                    {
                        declare(&mut scopes, &tokens[next].text);
                        i = next + 1;
                        continue;
                    }
                }
                _ => {}
            },
            TokenKind::Ident => {
                if prev_significant(tokens, i).is_some_and(|p| tokens[p].is_punct(".")) {
                    i += 1;
                    continue;
                }
                if glsl::is_builtin_type(&token.text) || types.contains(&token.text) {
                    let mut next = next_significant(tokens, i + 1);
                    if let Some(n) = next
                        && tokens[n].is_punct("[")
                    {
                        next = matching_close(tokens, n).and_then(|c| next_significant(tokens, c + 1));
                    }
                    if let Some(n) = next
                        && n < end
                        && tokens[n].kind == TokenKind::Ident
                        && !glsl::is_keyword(&tokens[n].text)
                    {
                        declare(&mut scopes, &tokens[n].text);
                        declaring = Some(depth);
                        i = n + 1;
                        continue;
                    }
                } else if !glsl::is_language_symbol(&token.text) && !scopes.iter().any(|scope| scope.contains(&token.text)) {
                    found.push(Reference {
                        token: i,
                        write: is_write(tokens, i, end),
                    });
                }
            }
            _ => {}
        }
        i += 1;
    }

    found
}

fn declare(scopes: &mut [BTreeSet<String>], name: &str) {
    if let Some(scope) = scopes.last_mut() {
        scope.insert(name.to_string());
    }
}

/// Returns true if the identifier at `index` is assigned, incremented or decremented
fn is_write(tokens: &[Token], index: usize, end: usize) -> bool {
    if prev_significant(tokens, index).is_some_and(|p| tokens[p].is_punct("++") || tokens[p].is_punct("--")) {
        return true;
    }
    let mut next = next_significant(tokens, index + 1);
    while let Some(n) = next.filter(|&n| n < end) {
        if tokens[n].is_punct(".") {
            next = next_significant(tokens, n + 1).and_then(|member| next_significant(tokens, member + 1));
        } else if tokens[n].is_punct("[") {
            next = matching_close(tokens, n).and_then(|c| next_significant(tokens, c + 1));
        } else {
            let text = tokens[n].text.as_str();
            return tokens[n].kind == TokenKind::Punct && (ASSIGNMENT_OPS.contains(&text) || text == "++" || text == "--");
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceLine;
    use crate::transpile::lexer::tokenize;

    fn tokens(source: &str) -> Vec<Token> {
        let lines: Vec<_> = source.lines().enumerate().map(|(i, text)| SourceLine { number: i + 1, text: text.to_string() }).collect();
        tokenize(&lines)
    }

    #[test]
    fn test_item_kinds() {
        let tokens = tokens(
            "precision mediump float;\nlayout(location = 0) in vec2 vTexCoord;\nuniform sampler2D Source;\nlayout(push_constant) uniform Push {\n  vec4 SourceSize;\n  float GAMMA;\n} params;\nstruct Light { vec3 color; };\nfloat weights[2] = { 0.5, 0.5 };\nvec3 tint(vec3 c);\nvec3 tint(vec3 c) { return c; }\n#define TEX(uv) texture(Source, uv)\nvoid main() {}\n",
        );
        let items = parse_items(&tokens).unwrap();
        let kinds: Vec<_> = items.iter().map(|item| &item.kind).collect();

        assert_eq!(kinds[0], &ItemKind::Precision);
        let ItemKind::Declaration(varying) = kinds[1] else { panic!("expected declaration") };
        assert_eq!(varying.location(), Some(0));
        assert!(varying.has("in"));
        assert_eq!(varying.ty, "vec2");

        let ItemKind::Declaration(sampler) = kinds[2] else { panic!("expected declaration") };
        assert_eq!(sampler.ty, "sampler2D");

        let ItemKind::Block(block) = kinds[3] else { panic!("expected block") };
        assert_eq!(block.name, "Push");
        assert_eq!(block.instance.as_deref(), Some("params"));
        assert_eq!(block.members.iter().map(|m| m.declarators[0].name.as_str()).collect::<Vec<_>>(), vec!["SourceSize", "GAMMA"]);

        assert_eq!(kinds[4], &ItemKind::Struct { name: "Light".to_string() });
        let ItemKind::Declaration(weights) = kinds[5] else { panic!("expected declaration") };
        assert_eq!(weights.declarators[0].array.as_deref(), Some("[2]"));
        assert!(weights.declarators[0].initializer.is_some());

        let ItemKind::Function(prototype) = kinds[6] else { panic!("expected prototype") };
        assert!(prototype.body.is_none());
        let ItemKind::Function(tint) = kinds[7] else { panic!("expected function") };
        assert_eq!(tint.name, "tint");
        assert_eq!(tint.params, vec!["c"]);

        assert_eq!(kinds[8], &ItemKind::Macro { name: "TEX".to_string(), params: vec!["uv".to_string()] });
        let ItemKind::Function(main) = kinds[9] else { panic!("expected main") };
        assert_eq!(main.name, "main");
        assert!(main.params.is_empty());
    }

    #[test]
    fn test_multiple_declarators() {
        let tokens = tokens("const float a = max(1.0, 2.0), b, c[3];");
        let items = parse_items(&tokens).unwrap();
        let ItemKind::Declaration(declaration) = &items[0].kind else { panic!("expected declaration") };
        assert!(declaration.has("const"));
        let names: Vec<_> = declaration.declarators.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(declaration.declarators[1].initializer.is_none());
    }

    #[test]
    fn test_references_skip_locals_and_members() {
        let source = "void main() {\n  float glow = strength * 2.0;\n  vec2 uv = coord.xy;\n  for (int i = 0; i < 4; i++) { glow += i; }\n  { float strength = 1.0; total = strength; }\n  total.x += glow;\n}";
        let tokens = tokens(source);
        let open = tokens.iter().position(|t| t.is_punct("{")).unwrap();
        let close = matching_close(&tokens, open).unwrap();
        let found: Vec<_> = references(&tokens, open, close + 1, &[], &BTreeSet::new())
            .into_iter()
            .map(|r| (tokens[r.token].text.as_str(), tokens[r.token].line, r.write))
            .collect();
        assert_eq!(found, vec![("strength", 2, false), ("coord", 3, false), ("total", 5, true), ("total", 6, true)]);
    }

    #[test]
    fn test_unsupported_declaration() {
        let tokens = tokens("uniform float[2] weights;");
        let (kind, line) = parse_items(&tokens).unwrap_err();
        assert!(matches!(kind, TranspileErrorKind::UnsupportedDeclaration(_)));
        assert_eq!(line, 1);
    }
}
