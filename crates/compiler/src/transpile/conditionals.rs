//! Deterministic conditional compilation
//!
//! Shaders ported between dialects carry `#if` guards selecting between alternate code
//! paths. Every conditional is evaluated here from three inputs only: a fixed set of
//! predefined macros, the source's own `#define`s, and the active parameter values. The
//! untaken branch is removed and reported, so the same inputs always select the same code.

use super::{Stage, TranspileErrorKind, glsl};
use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceLine};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*#\s*(\w+)\s*(.*?)\s*$").unwrap());
static DEFINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)(\([^)]*\))?\s*(.*)$").unwrap());

/// Output language version; legacy sources compare `__VERSION__` to pick modern syntax
pub const TARGET_VERSION: u32 = 450;

/// Macros that exist before the first line of every stage
fn predefined(stage: Stage) -> BTreeMap<String, String> {
    let mut defines = BTreeMap::new();
    defines.insert("__VERSION__".to_string(), TARGET_VERSION.to_string());
    defines.insert("PARAMETER_UNIFORM".to_string(), "1".to_string());
    defines.insert(stage.macro_name().to_string(), "1".to_string());
    defines
}

fn is_predefined(name: &str) -> bool {
    matches!(name, "__VERSION__" | "PARAMETER_UNIFORM" | "VERTEX" | "FRAGMENT" | "GL_ES")
}

/// A stage's source with every conditional resolved
#[derive(Debug, Clone, Default)]
pub struct Preprocessed {
    pub lines: Vec<SourceLine>,
    pub diagnostics: Vec<Diagnostic>,
    /// Parameters whose value influenced branch selection
    pub dependencies: BTreeSet<String>,
}

/// One level of `#if` nesting
struct Conditional {
    /// Whether the enclosing region is emitted
    parent_active: bool,
    /// Whether any branch of this chain has been taken
    taken: bool,
    /// Whether the current branch is emitted
    active: bool,
    /// The `#if`/`#ifdef` line opening the chain
    opening: SourceLine,
    /// Identifiers consulted anywhere in the chain
    controlling: BTreeSet<String>,
    /// Directive line and body of the branch currently being stripped
    stripping: Option<(SourceLine, Vec<SourceLine>)>,
}

struct Evaluator<'a> {
    stage: Stage,
    pass_index: usize,
    parameters: &'a BTreeMap<String, f32>,
    defines: BTreeMap<String, String>,
    result: Preprocessed,
}

impl<'a> Evaluator<'a> {
    fn parameter(&self, name: &str) -> Option<f32> {
        self.parameters.get(name).copied()
    }

    fn is_defined(&self, name: &str) -> bool {
        self.defines.contains_key(name) || self.parameter(name).is_some_and(|v| v != 0.0)
    }

    /// Numeric value of an identifier inside an `#if` expression
    fn value_of(&self, name: &str, depth: usize) -> f64 {
        if let Some(body) = self.defines.get(name) {
            let body = body.trim();
            if body.is_empty() {
                return 1.0;
            }
            if depth < 8 {
                return evaluate_expression(body, &|n| self.is_defined(n), &|n| self.value_of(n, depth + 1)).unwrap_or(0.0);
            }
            return 0.0;
        }
        self.parameter(name).map(f64::from).unwrap_or(0.0)
    }

    fn condition(&mut self, directive: &str, argument: &str, line: usize, controlling: &mut BTreeSet<String>) -> Result<bool, (TranspileErrorKind, usize)> {
        let identifiers = expression_identifiers(argument);
        for identifier in &identifiers {
            if self.parameters.contains_key(identifier) {
                self.result.dependencies.insert(identifier.clone());
            }
        }
        controlling.extend(identifiers);
        match directive {
            "ifdef" => Ok(self.is_defined(argument.trim())),
            "ifndef" => Ok(!self.is_defined(argument.trim())),
            _ => {
                let value = evaluate_expression(argument, &|n| self.is_defined(n), &|n| self.value_of(n, 0))
                    .map_err(|message| (TranspileErrorKind::Directive(format!("`#{directive} {argument}`: {message}")), line))?;
                Ok(value != 0.0)
            }
        }
    }

    /// Describes the values that decided a chain, e.g. `POTATO = 0`
    fn describe(&self, controlling: &BTreeSet<String>) -> String {
        controlling
            .iter()
            .map(|name| match (self.defines.get(name), self.parameter(name)) {
                (Some(body), _) => format!("{name} = {}", if body.is_empty() { "<defined>" } else { body }),
                (None, Some(value)) => format!("{name} = {value}"),
                (None, None) => format!("{name} undefined"),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Emits a diagnostic for a stripped branch when user-controlled symbols decided it
    fn finish_stripped(&mut self, frame: &mut Conditional) {
        let Some((directive, body)) = frame.stripping.take() else { return };
        let code_lines: Vec<_> = body.iter().filter(|l| !l.text.trim().is_empty()).collect();
        let user_controlled: Vec<_> = frame.controlling.iter().filter(|n| !is_predefined(n)).cloned().collect();
        let (Some(first), Some(last)) = (body.first(), body.last()) else { return };
        tracing::debug!(pass = self.pass_index, stage = ?self.stage, from = first.number, to = last.number, directive = %directive.text.trim(), "stripped conditional branch");
        if code_lines.is_empty() || user_controlled.is_empty() {
            return;
        }
        let mut context = vec![directive.clone()];
        context.extend(code_lines.iter().take(2).map(|l| (*l).clone()));
        let detail = format!(
            "lines {}-{} not taken in {} stage by `{}` ({})",
            first.number,
            last.number,
            self.stage.name(),
            directive.text.trim(),
            self.describe(&frame.controlling)
        );
        self.result
            .diagnostics
            .push(Diagnostic::new(DiagnosticKind::StrippedDefine, Some(self.pass_index), detail).with_symbol(user_controlled[0].clone()).with_context(context));
    }

    fn strip_define(&mut self, line: &SourceLine, name: &str, reason: &str) {
        tracing::debug!(pass = self.pass_index, line = line.number, name, reason, "stripped #define");
        self.result.diagnostics.push(
            Diagnostic::new(DiagnosticKind::StrippedDefine, Some(self.pass_index), format!("`#define {name}` stripped: {reason}"))
                .with_symbol(name)
                .with_context(vec![line.clone()]),
        );
    }

    /// Handles a `#define` in an emitted region
    ///
    /// # Returns
    /// Whether the line is kept in the output
    fn define(&mut self, line: &SourceLine, argument: &str) -> Result<bool, (TranspileErrorKind, usize)> {
        let Some(captures) = DEFINE_RE.captures(argument) else {
            return Err((TranspileErrorKind::Directive(format!("malformed `#define {argument}`")), line.number));
        };
        let name = captures[1].to_string();
        let body = format!("{}{}", captures.get(2).map_or("", |m| m.as_str()), captures[3].split_whitespace().collect::<Vec<_>>().join(" "));

        if is_predefined(&name) {
            tracing::debug!(pass = self.pass_index, name, "ignoring redefinition of predefined macro");
            return Ok(false);
        }
        if glsl::is_reserved(&name) {
            self.strip_define(line, &name, "conflicts with a reserved word of the target language");
            return Ok(false);
        }
        if self.parameters.contains_key(&name) {
            self.strip_define(line, &name, "shadowed by the parameter of the same name");
            return Ok(false);
        }
        match self.defines.get(&name) {
            Some(previous) if *previous != body => Err((
                TranspileErrorKind::AmbiguousRedefinition {
                    name,
                    previous: previous.clone(),
                    current: body,
                },
                line.number,
            )),
            Some(_) => Ok(true),
            None => {
                self.defines.insert(name, body);
                Ok(true)
            }
        }
    }

    fn run(mut self, lines: &[SourceLine]) -> Result<Preprocessed, (TranspileErrorKind, usize)> {
        let mut stack: Vec<Conditional> = Vec::new();

        for line in lines {
            let active = stack.last().is_none_or(|frame| frame.active);
            let Some(captures) = DIRECTIVE_RE.captures(&line.text) else {
                if active {
                    self.result.lines.push(line.clone());
                } else if let Some(frame) = stack.last_mut()
                    && let Some((_, body)) = frame.stripping.as_mut()
                {
                    body.push(line.clone());
                }
                continue;
            };
            let directive = captures[1].to_string();
            let argument = strip_comment(&captures[2]).to_string();

            match directive.as_str() {
                "if" | "ifdef" | "ifndef" => {
                    let mut frame = Conditional {
                        parent_active: active,
                        taken: false,
                        active: false,
                        opening: line.clone(),
                        controlling: BTreeSet::new(),
                        stripping: None,
                    };
                    if active {
                        let mut controlling = BTreeSet::new();
                        let value = self.condition(&directive, &argument, line.number, &mut controlling)?;
                        frame.controlling = controlling;
                        frame.taken = value;
                        frame.active = value;
                        if !value {
                            frame.stripping = Some((line.clone(), Vec::new()));
                        }
                    }
                    stack.push(frame);
                }
                "elif" | "else" => {
                    let Some(mut frame) = stack.pop() else {
                        return Err((TranspileErrorKind::Directive(format!("`#{directive}` without `#if`")), line.number));
                    };
                    self.finish_stripped(&mut frame);
                    if frame.parent_active {
                        let value = if frame.taken {
                            false
                        } else if directive == "elif" {
                            let mut controlling = std::mem::take(&mut frame.controlling);
                            let value = self.condition("if", &argument, line.number, &mut controlling)?;
                            frame.controlling = controlling;
                            value
                        } else {
                            true
                        };
                        frame.active = value;
                        frame.taken |= value;
                        if !value {
                            frame.stripping = Some((line.clone(), Vec::new()));
                        }
                    }
                    stack.push(frame);
                }
                "endif" => {
                    let Some(mut frame) = stack.pop() else {
                        return Err((TranspileErrorKind::Directive("`#endif` without `#if`".to_string()), line.number));
                    };
                    self.finish_stripped(&mut frame);
                }
                _ if !active => {
                    if let Some(frame) = stack.last_mut()
                        && let Some((_, body)) = frame.stripping.as_mut()
                    {
                        body.push(line.clone());
                    }
                }
                "define" => {
                    if self.define(line, &argument)? {
                        self.result.lines.push(line.clone());
                    }
                }
                "undef" => {
                    self.defines.remove(argument.trim());
                    self.result.lines.push(line.clone());
                }
                "version" | "line" => {}
                "extension" => tracing::debug!(pass = self.pass_index, line = line.number, extension = %argument, "dropping #extension"),
                "include" => return Err((TranspileErrorKind::UnresolvedInclude(argument.trim_matches('"').to_string()), line.number)),
                "error" => return Err((TranspileErrorKind::Directive(format!("#error {argument}")), line.number)),
                _ => self.result.lines.push(line.clone()),
            }
        }

        if let Some(frame) = stack.last() {
            return Err((TranspileErrorKind::Directive(format!("unterminated `{}`", frame.opening.text.trim())), frame.opening.number));
        }
        Ok(self.result)
    }
}

/// Removes a trailing `//` or `/* */` comment from a directive argument
fn strip_comment(argument: &str) -> &str {
    let end = [argument.find("//"), argument.find("/*")].into_iter().flatten().min().unwrap_or(argument.len());
    argument[..end].trim_end()
}

/// Resolves every conditional in a stage's lines
///
/// # Arguments
/// * `lines` - The stage's lines after pragma extraction
/// * `stage` - Selects the `VERTEX`/`FRAGMENT` predefine
/// * `parameters` - Active parameter values; a parameter counts as defined when non-zero
/// * `pass_index` - Recorded in diagnostics
pub fn evaluate(lines: &[SourceLine], stage: Stage, parameters: &BTreeMap<String, f32>, pass_index: usize) -> Result<Preprocessed, (TranspileErrorKind, usize)> {
    Evaluator {
        stage,
        pass_index,
        parameters,
        defines: predefined(stage),
        result: Preprocessed::default(),
    }
    .run(lines)
}

/// Identifiers referenced by a conditional expression, excluding `defined`
fn expression_identifiers(expression: &str) -> BTreeSet<String> {
    tokenize_expression(expression)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|t| match t {
            ExprToken::Ident(name) if name != "defined" => Some(name),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Number(f64),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &["&&", "||", "==", "!=", "<=", ">=", "<<", ">>", "(", ")", "!", "~", "*", "/", "%", "+", "-", "<", ">", "&", "|", "^", "?", ":"];

fn tokenize_expression(expression: &str) -> Result<Vec<ExprToken>, String> {
    let mut tokens = Vec::new();
    let bytes = expression.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(ExprToken::Ident(expression[start..i].to_string()));
        } else if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())) {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                i += 1;
            }
            let text = expression[start..i].trim_end_matches(['u', 'U', 'f', 'F', 'l', 'L']);
            let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16).map(|v| v as f64).ok()
            } else {
                text.parse::<f64>().ok()
            };
            tokens.push(ExprToken::Number(value.ok_or_else(|| format!("invalid number `{}`", &expression[start..i]))?));
        } else {
            let rest = &expression[i..];
            let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                return Err(format!("unexpected character `{c}`"));
            };
            tokens.push(ExprToken::Op(op));
            i += op.len();
        }
    }
    Ok(tokens)
}

/// Evaluates a preprocessor expression
///
/// # Arguments
/// * `is_defined` - Answers `defined(NAME)`
/// * `value_of` - Value of a bare identifier (undefined identifiers are 0)
pub fn evaluate_expression(expression: &str, is_defined: &dyn Fn(&str) -> bool, value_of: &dyn Fn(&str) -> f64) -> Result<f64, String> {
    let tokens = tokenize_expression(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = ExprParser {
        tokens,
        position: 0,
        is_defined,
        value_of,
    };
    let value = parser.ternary()?;
    if parser.position != parser.tokens.len() {
        return Err(format!("unexpected token {:?}", parser.tokens[parser.position]));
    }
    Ok(value)
}

struct ExprParser<'a> {
    tokens: Vec<ExprToken>,
    position: usize,
    is_defined: &'a dyn Fn(&str) -> bool,
    value_of: &'a dyn Fn(&str) -> f64,
}

/// Binary operators by precedence level, loosest first
const BINARY_LEVELS: &[&[&str]] = &[&["||"], &["&&"], &["|"], &["^"], &["&"], &["==", "!="], &["<", ">", "<=", ">="], &["<<", ">>"], &["+", "-"], &["*", "/", "%"]];

fn truth(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

impl ExprParser<'_> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.position) {
            Some(ExprToken::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), String> {
        if self.peek_op() == Some(op) {
            self.position += 1;
            Ok(())
        } else {
            Err(format!("expected `{op}`"))
        }
    }

    fn ternary(&mut self) -> Result<f64, String> {
        let condition = self.binary(0)?;
        if self.peek_op() == Some("?") {
            self.position += 1;
            let if_true = self.ternary()?;
            self.expect(":")?;
            let if_false = self.ternary()?;
            return Ok(if condition != 0.0 { if_true } else { if_false });
        }
        Ok(condition)
    }

    fn binary(&mut self, level: usize) -> Result<f64, String> {
        if level == BINARY_LEVELS.len() {
            return self.unary();
        }
        let mut left = self.binary(level + 1)?;
        while let Some(op) = self.peek_op().filter(|op| BINARY_LEVELS[level].contains(op)) {
            self.position += 1;
            let right = self.binary(level + 1)?;
            left = match op {
                "||" => truth(left != 0.0 || right != 0.0),
                "&&" => truth(left != 0.0 && right != 0.0),
                "|" => ((left as i64) | (right as i64)) as f64,
                "^" => ((left as i64) ^ (right as i64)) as f64,
                "&" => ((left as i64) & (right as i64)) as f64,
                "==" => truth(left == right),
                "!=" => truth(left != right),
                "<" => truth(left < right),
                ">" => truth(left > right),
                "<=" => truth(left <= right),
                ">=" => truth(left >= right),
                "<<" => ((left as i64) << (right as i64).clamp(0, 63)) as f64,
                ">>" => ((left as i64) >> (right as i64).clamp(0, 63)) as f64,
                "+" => left + right,
                "-" => left - right,
                "*" => left * right,
                "/" | "%" if right == 0.0 => return Err("division by zero".to_string()),
                "/" => left / right,
                "%" => left % right,
                _ => unreachable!("operator table and match arms agree"),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<f64, String> {
        match self.peek_op() {
            Some("!") => {
                self.position += 1;
                Ok(truth(self.unary()? == 0.0))
            }
            Some("-") => {
                self.position += 1;
                Ok(-self.unary()?)
            }
            Some("+") => {
                self.position += 1;
                self.unary()
            }
            Some("~") => {
                self.position += 1;
                Ok(!(self.unary()? as i64) as f64)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64, String> {
        let token = self.tokens.get(self.position).cloned().ok_or_else(|| "unexpected end of expression".to_string())?;
        self.position += 1;
        match token {
            ExprToken::Number(value) => Ok(value),
            ExprToken::Op("(") => {
                let value = self.ternary()?;
                self.expect(")")?;
                Ok(value)
            }
            ExprToken::Ident(name) if name == "defined" => {
                let parenthesized = self.peek_op() == Some("(");
                if parenthesized {
                    self.position += 1;
                }
                let Some(ExprToken::Ident(target)) = self.tokens.get(self.position).cloned() else {
                    return Err("`defined` expects an identifier".to_string());
                };
                self.position += 1;
                if parenthesized {
                    self.expect(")")?;
                }
                Ok(truth((self.is_defined)(&target)))
            }
            ExprToken::Ident(name) => Ok((self.value_of)(&name)),
            ExprToken::Op(op) => Err(format!("unexpected `{op}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(source: &str) -> Vec<SourceLine> {
        source.lines().enumerate().map(|(i, text)| SourceLine { number: i + 1, text: text.to_string() }).collect()
    }

    fn texts(preprocessed: &Preprocessed) -> Vec<&str> {
        preprocessed.lines.iter().map(|l| l.text.as_str()).collect()
    }

    fn eval(expression: &str) -> f64 {
        evaluate_expression(expression, &|n| n == "A", &|n| if n == "A" { 2.0 } else { 0.0 }).unwrap()
    }

    #[test]
    fn test_expression_evaluation() {
        assert_eq!(eval("1 + 2 * 3"), 7.0);
        assert_eq!(eval("(1 + 2) * 3"), 9.0);
        assert_eq!(eval("A >= 2 && !defined(B)"), 1.0);
        assert_eq!(eval("defined A || defined B"), 1.0);
        assert_eq!(eval("UNKNOWN"), 0.0);
        assert_eq!(eval("A == 2 ? 10 : 20"), 10.0);
        assert_eq!(eval("0x10 >> 2"), 4.0);
        assert!(evaluate_expression("1 +", &|_| false, &|_| 0.0).is_err());
        assert!(evaluate_expression("(1", &|_| false, &|_| 0.0).is_err());
        assert!(evaluate_expression("1 / 0", &|_| false, &|_| 0.0).is_err());
    }

    #[test]
    fn test_stage_selection() {
        let source = "#version 130\n#if defined(VERTEX)\nvertex_code();\n#elif defined(FRAGMENT)\nfragment_code();\n#endif\n";
        let parameters = BTreeMap::new();

        let vertex = evaluate(&lines(source), Stage::Vertex, &parameters, 0).unwrap();
        assert_eq!(texts(&vertex), vec!["vertex_code();"]);
        // Stage selection is routine and is not reported
        assert!(vertex.diagnostics.is_empty());

        let fragment = evaluate(&lines(source), Stage::Fragment, &parameters, 0).unwrap();
        assert_eq!(texts(&fragment), vec!["fragment_code();"]);
    }

    #[test]
    fn test_parameter_driven_branch_is_reported() {
        let source = "#ifdef POTATO\ncheap();\n#else\nexpensive();\n#endif\n";

        let mut parameters = BTreeMap::new();
        parameters.insert("POTATO".to_string(), 0.0);
        let full = evaluate(&lines(source), Stage::Fragment, &parameters, 3).unwrap();
        assert_eq!(texts(&full), vec!["expensive();"]);
        assert_eq!(full.diagnostics.len(), 1);
        let diagnostic = &full.diagnostics[0];
        assert_eq!(diagnostic.kind, DiagnosticKind::StrippedDefine);
        assert_eq!(diagnostic.pass_index, Some(3));
        assert_eq!(diagnostic.symbol.as_deref(), Some("POTATO"));
        assert!(diagnostic.detail.contains("lines 2-2"));
        assert!(diagnostic.detail.contains("POTATO = 0"));
        assert!(full.dependencies.contains("POTATO"));

        parameters.insert("POTATO".to_string(), 1.0);
        let potato = evaluate(&lines(source), Stage::Fragment, &parameters, 3).unwrap();
        assert_eq!(texts(&potato), vec!["cheap();"]);
        assert!(potato.diagnostics[0].detail.contains("lines 4-4"));
    }

    #[test]
    fn test_nested_conditionals() {
        let source = "#define QUALITY 2\n#if QUALITY > 1\n#ifdef EXTRA\nextra();\n#endif\nhigh();\n#else\nlow();\n#endif\n";
        let result = evaluate(&lines(source), Stage::Fragment, &BTreeMap::new(), 0).unwrap();
        assert_eq!(texts(&result), vec!["#define QUALITY 2", "high();"]);
    }

    #[test]
    fn test_define_rules() {
        let mut parameters = BTreeMap::new();
        parameters.insert("GAMMA".to_string(), 2.2);

        let source = "#define texture texture2D\n#define GAMMA 2.4\n#define ONE 1.0\n#define ONE   1.0\n";
        let result = evaluate(&lines(source), Stage::Fragment, &parameters, 1).unwrap();
        assert_eq!(texts(&result), vec!["#define ONE 1.0", "#define ONE   1.0"]);
        let stripped: Vec<_> = result.diagnostics.iter().map(|d| d.symbol.as_deref().unwrap()).collect();
        assert_eq!(stripped, vec!["texture", "GAMMA"]);

        let conflicting = "#define WEIGHT 0.5\n#define WEIGHT 0.7\n";
        let (kind, line) = evaluate(&lines(conflicting), Stage::Fragment, &BTreeMap::new(), 0).unwrap_err();
        assert_eq!(line, 2);
        assert!(matches!(kind, TranspileErrorKind::AmbiguousRedefinition { name, .. } if name == "WEIGHT"));

        let redefined_after_undef = "#define WEIGHT 0.5\n#undef WEIGHT\n#define WEIGHT 0.7\n";
        assert!(evaluate(&lines(redefined_after_undef), Stage::Fragment, &BTreeMap::new(), 0).is_ok());
    }

    #[test]
    fn test_unbalanced_directives() {
        let (_, line) = evaluate(&lines("a\n#if 1\nb\n"), Stage::Vertex, &BTreeMap::new(), 0).unwrap_err();
        assert_eq!(line, 2);
        let (_, line) = evaluate(&lines("#endif\n"), Stage::Vertex, &BTreeMap::new(), 0).unwrap_err();
        assert_eq!(line, 1);
        let (kind, _) = evaluate(&lines("#include \"common.inc\"\n"), Stage::Vertex, &BTreeMap::new(), 0).unwrap_err();
        assert_eq!(kind, TranspileErrorKind::UnresolvedInclude("common.inc".to_string()));
    }
}
