//! GLSL tokenizer
//!
//! The rewriting passes operate on a lossless token stream: concatenating every token's
//! text reproduces the input exactly, so untouched code is emitted byte for byte.

use crate::diagnostics::SourceLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Punct,
    /// Horizontal whitespace
    Space,
    Newline,
    Comment,
    /// A whole preprocessor line other than the head of a function-like macro
    Directive,
    /// `#define NAME(params)`; the macro body follows as ordinary tokens up to the newline
    MacroHead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Line number in the pass's source file
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize) -> Self {
        Self { kind, text: text.into(), line }
    }

    pub fn is_significant(&self) -> bool {
        !matches!(self.kind, TokenKind::Space | TokenKind::Newline | TokenKind::Comment)
    }

    pub fn is_ident(&self, text: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == text
    }

    pub fn is_punct(&self, text: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == text
    }
}

const MULTI_CHAR_PUNCT: &[&str] = &["<<=", ">>=", "==", "!=", "<=", ">=", "&&", "||", "^^", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<", ">>"];

/// Assignment operators, used to detect writes to a variable
pub const ASSIGNMENT_OPS: &[&str] = &["=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>="];

/// Tokenizes preprocessed source lines
///
/// Each line keeps its original number; lines are joined with newline tokens.
pub fn tokenize(lines: &[SourceLine]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut in_block_comment: Option<usize> = None;

    for line in lines {
        let number = line.number;
        let text = line.text.as_str();
        let bytes = text.as_bytes();
        let mut i = 0;

        if let Some(start) = in_block_comment {
            match text.find("*/") {
                Some(end) => {
                    push_comment_text(&mut tokens, &text[..end + 2], start);
                    i = end + 2;
                    in_block_comment = None;
                }
                None => {
                    push_comment_text(&mut tokens, text, start);
                    push_comment_text(&mut tokens, "\n", start);
                    continue;
                }
            }
        }

        if i == 0 && text.trim_start().starts_with('#') {
            tokenize_directive(&mut tokens, text, number);
            tokens.push(Token::new(TokenKind::Newline, "\n", number));
            continue;
        }

        while i < bytes.len() {
            let c = bytes[i];
            let start = i;
            if c == b' ' || c == b'\t' || c == b'\r' {
                while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\r') {
                    i += 1;
                }
                tokens.push(Token::new(TokenKind::Space, &text[start..i], number));
            } else if text[i..].starts_with("//") {
                tokens.push(Token::new(TokenKind::Comment, &text[i..], number));
                i = bytes.len();
            } else if text[i..].starts_with("/*") {
                match text[i + 2..].find("*/") {
                    Some(end) => {
                        i += end + 4;
                        tokens.push(Token::new(TokenKind::Comment, &text[start..i], number));
                    }
                    None => {
                        tokens.push(Token::new(TokenKind::Comment, &text[start..], number));
                        push_comment_text(&mut tokens, "\n", number);
                        in_block_comment = Some(number);
                        i = bytes.len();
                    }
                }
            } else if c.is_ascii_alphabetic() || c == b'_' {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push(Token::new(TokenKind::Ident, &text[start..i], number));
            } else if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())) {
                while i < bytes.len() {
                    let b = bytes[i];
                    if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' {
                        i += 1;
                    } else if (b == b'+' || b == b'-') && matches!(bytes[i - 1], b'e' | b'E') && !text[start..i].starts_with("0x") {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::new(TokenKind::Number, &text[start..i], number));
            } else {
                let rest = &text[i..];
                let width = MULTI_CHAR_PUNCT.iter().find(|p| rest.starts_with(**p)).map_or_else(|| rest.chars().next().map_or(1, char::len_utf8), |p| p.len());
                i += width;
                tokens.push(Token::new(TokenKind::Punct, &text[start..i], number));
            }
        }

        if in_block_comment.is_none() {
            tokens.push(Token::new(TokenKind::Newline, "\n", number));
        }
    }

    tokens
}

/// Appends text to the trailing comment token, or starts one
fn push_comment_text(tokens: &mut Vec<Token>, text: &str, line: usize) {
    match tokens.last_mut() {
        Some(last) if last.kind == TokenKind::Comment => last.text.push_str(text),
        _ => tokens.push(Token::new(TokenKind::Comment, text, line)),
    }
}

/// Splits a directive line; function-like macro bodies are tokenized as code
fn tokenize_directive(tokens: &mut Vec<Token>, text: &str, number: usize) {
    let trimmed = text.trim_start();
    let after_hash = trimmed[1..].trim_start();
    if let Some(rest) = after_hash.strip_prefix("define") {
        let rest_trimmed = rest.trim_start();
        let name_len = rest_trimmed.bytes().take_while(|b| b.is_ascii_alphanumeric() || *b == b'_').count();
        if name_len > 0
            && rest.len() > rest_trimmed.len()
            && rest_trimmed[name_len..].starts_with('(')
            && let Some(close) = rest_trimmed[name_len..].find(')')
        {
            let head_len = text.len() - rest_trimmed.len() + name_len + close + 1;
            tokens.push(Token::new(TokenKind::MacroHead, &text[..head_len], number));
            let body = SourceLine {
                number,
                text: text[head_len..].to_string(),
            };
            let mut body_tokens = tokenize(std::slice::from_ref(&body));
            // The body's own newline is emitted by the caller
            body_tokens.pop();
            tokens.extend(body_tokens);
            return;
        }
    }
    tokens.push(Token::new(TokenKind::Directive, text, number));
}

/// Concatenates token text
pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

/// Index of the next significant token at or after `from`
pub fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| tokens[i].is_significant())
}

/// Index of the previous significant token strictly before `before`
pub fn prev_significant(tokens: &[Token], before: usize) -> Option<usize> {
    (0..before.min(tokens.len())).rev().find(|&i| tokens[i].is_significant())
}

/// Index of the token closing the bracket opened at `open`
pub fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let (opening, closing) = match tokens[open].text.as_str() {
        "(" => ("(", ")"),
        "[" => ("[", "]"),
        "{" => ("{", "}"),
        _ => return None,
    };
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.kind != TokenKind::Punct {
            continue;
        }
        if token.text == opening {
            depth += 1;
        } else if token.text == closing {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Splits the tokens strictly between `open` and `close` at top-level commas
pub fn split_arguments(tokens: &[Token], open: usize, close: usize) -> Vec<(usize, usize)> {
    let mut arguments = Vec::new();
    let mut depth = 0i32;
    let mut start = open + 1;
    for i in open + 1..close {
        let token = &tokens[i];
        if token.kind != TokenKind::Punct {
            continue;
        }
        match token.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth -= 1,
            "," if depth == 0 => {
                arguments.push((start, i));
                start = i + 1;
            }
            _ => {}
        }
    }
    if tokens[open + 1..close].iter().any(Token::is_significant) {
        arguments.push((start, close));
    }
    arguments
}

/// Renders a token range without leading and trailing whitespace
pub fn render_trimmed(tokens: &[Token]) -> String {
    render(tokens).trim().to_string()
}
