//! Decides what, if anything, a traced line asks to have annotated.
//!
//! Classification runs once per traced line, so it starts with a cheap
//! keyword filter. Lines that pass are lexed with the Howl lexer, which keeps
//! string literals and brackets intact while the line is split into its code
//! and comment parts. Anything unrecognised is [`LineKind::None`].

use crate::ast::{BinaryOp, Expr};
use crate::lexer::lex_fragment;
use crate::parser::{augmented_operator, parse_expression_text};
use crate::source::SourceFile;
use crate::tokens::{Symbol, Token, TokenKind};
use smol_str::SmolStr;

/// Lines that are never annotated.
const REJECTED_LINES: &[&str] = &["pass", "break", "continue"];
/// Leading keywords of lines that are never annotated.
const REJECTED_PREFIXES: &[&str] = &["from", "import", "return", "continue", "if", "for"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// A lone identifier: echo its value.
    Variable(SmolStr),
    /// `print(...)`: the exact argument text.
    PrintCapture(String),
    Macro(Macro),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOperator {
    Assign,
    Augmented(BinaryOp),
}

/// A line carrying the annotation marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    /// Assignment target text, for `target = expr` and `target op= expr`.
    pub target: Option<String>,
    pub operator: Option<AssignOperator>,
    /// Expression to evaluate: the right-hand side, or the whole code part.
    pub expr: String,
}

impl Macro {
    /// Text evaluated to produce the annotation when resolving at the line:
    /// `expr`, or `target op (expr)` for augmented assignments.
    pub fn immediate_expression(&self) -> String {
        match (&self.target, self.operator) {
            (Some(target), Some(AssignOperator::Augmented(op))) => {
                format!("{target} {} ({})", op.as_str(), self.expr)
            }
            _ => self.expr.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LineClassifier {
    marker: String,
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new("?")
    }
}

impl LineClassifier {
    /// `marker` is what must follow `#` (and optional spaces) for a comment
    /// to count as a macro.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn classify(&self, source: &str) -> LineKind {
        let line = source.trim();
        if line.is_empty() || is_rejected(line) {
            return LineKind::None;
        }
        let file = SourceFile::fragment(line);
        let Ok(tokens) = lex_fragment(&file) else {
            return LineKind::None;
        };
        let code: Vec<&Token> = tokens
            .iter()
            .filter(|token| token.kind != TokenKind::Eof)
            .collect();
        let Some(last) = code.last() else {
            return LineKind::None;
        };
        let code_end = last.span.end.offset;
        let code_text = line[..code_end].trim();
        let comment = line[code_end..].trim_start();

        if let [only] = code.as_slice() {
            if let TokenKind::Identifier(name) = &only.kind {
                return LineKind::Variable(name.clone());
            }
        }
        if let Some(args) = print_arguments(line, &code) {
            return LineKind::PrintCapture(args);
        }
        if self.has_marker(comment) {
            return match split_macro(line, &code, code_text) {
                Some(found) => LineKind::Macro(found),
                None => LineKind::None,
            };
        }
        LineKind::None
    }

    fn has_marker(&self, comment: &str) -> bool {
        comment
            .strip_prefix('#')
            .map(|rest| rest.trim_start().starts_with(self.marker.as_str()))
            .unwrap_or(false)
    }
}

fn is_rejected(line: &str) -> bool {
    if REJECTED_LINES.contains(&line) {
        return true;
    }
    REJECTED_PREFIXES.iter().any(|prefix| {
        line.strip_prefix(prefix).is_some_and(|rest| {
            !rest
                .chars()
                .next()
                .is_some_and(|c| c == '_' || c.is_alphanumeric())
        })
    })
}

/// Argument text of a line that is exactly one `print(...)` call.
fn print_arguments(line: &str, code: &[&Token]) -> Option<String> {
    let [name, open, .., close] = code else {
        return None;
    };
    if !matches!(&name.kind, TokenKind::Identifier(id) if id == "print")
        || !open.is_symbol(Symbol::LParen)
        || !close.is_symbol(Symbol::RParen)
    {
        return None;
    }
    let mut depth = 0usize;
    for (index, token) in code.iter().enumerate().skip(1) {
        match &token.kind {
            TokenKind::Symbol(Symbol::LParen | Symbol::LBracket | Symbol::LBrace) => depth += 1,
            TokenKind::Symbol(Symbol::RParen | Symbol::RBracket | Symbol::RBrace) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && index != code.len() - 1 {
                    return None;
                }
            }
            _ => {}
        }
    }
    let inner = &line[open.span.end.offset..close.span.start.offset];
    Some(inner.trim().to_string())
}

/// Splits `target = expr` / `target op= expr` at the first top-level
/// assignment token; other lines become a target-less macro over the whole
/// code part.
fn split_macro(line: &str, code: &[&Token], code_text: &str) -> Option<Macro> {
    let mut depth = 0usize;
    let mut split = None;
    for token in code {
        match &token.kind {
            TokenKind::Symbol(Symbol::LParen | Symbol::LBracket | Symbol::LBrace) => depth += 1,
            TokenKind::Symbol(Symbol::RParen | Symbol::RBracket | Symbol::RBrace) => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Symbol(Symbol::Equals) if depth == 0 => {
                split = Some((*token, AssignOperator::Assign));
                break;
            }
            TokenKind::Symbol(symbol) if depth == 0 => {
                if let Some(op) = augmented_operator(*symbol) {
                    split = Some((*token, AssignOperator::Augmented(op)));
                    break;
                }
            }
            _ => {}
        }
    }

    if let Some((token, operator)) = split {
        let target = line[..token.span.start.offset].trim();
        let expr = line[token.span.end.offset..code_end(code)].trim();
        if valid_target(target, operator) && parse_expression_text(expr).is_ok() {
            return Some(Macro {
                target: Some(target.to_string()),
                operator: Some(operator),
                expr: expr.to_string(),
            });
        }
    }
    parse_expression_text(code_text).ok().map(|_| Macro {
        target: None,
        operator: None,
        expr: code_text.to_string(),
    })
}

fn code_end(code: &[&Token]) -> usize {
    code.last().map(|token| token.span.end.offset).unwrap_or(0)
}

fn valid_target(target: &str, operator: AssignOperator) -> bool {
    match parse_expression_text(target) {
        Ok(expr) => match operator {
            AssignOperator::Assign => expr.is_assignable(),
            AssignOperator::Augmented(_) => matches!(
                expr,
                Expr::Identifier(..) | Expr::Field(_) | Expr::Index(_)
            ),
        },
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classify(line: &str) -> LineKind {
        LineClassifier::default().classify(line)
    }

    fn macro_of(target: Option<&str>, operator: Option<AssignOperator>, expr: &str) -> LineKind {
        LineKind::Macro(Macro {
            target: target.map(str::to_string),
            operator,
            expr: expr.to_string(),
        })
    }

    #[test]
    fn bare_identifiers_are_variables() {
        assert_eq!(classify("  total  "), LineKind::Variable("total".into()));
        assert_eq!(classify("total # ?"), LineKind::Variable("total".into()));
    }

    #[test]
    fn control_flow_lines_are_rejected() {
        for line in ["pass", "break", "continue", "return x", "if x: # ?", "for t in y: t", "import os", "from a import b"] {
            assert_eq!(classify(line), LineKind::None, "{line}");
        }
    }

    #[test]
    fn keyword_prefixes_need_a_word_boundary() {
        assert_eq!(classify("format"), LineKind::Variable("format".into()));
        assert_eq!(
            classify("iffy = 2 # ?"),
            macro_of(Some("iffy"), Some(AssignOperator::Assign), "2")
        );
    }

    #[test]
    fn print_arguments_survive_nesting_and_strings() {
        assert_eq!(
            classify("print('a)', f(1, (2)))"),
            LineKind::PrintCapture("'a)', f(1, (2))".into())
        );
        assert_eq!(classify("print(a)(b)"), LineKind::None);
    }

    #[test]
    fn assignment_macros_split_at_the_first_top_level_equals() {
        assert_eq!(
            classify("x = f(a=1) == 2  # ? note"),
            macro_of(Some("x"), Some(AssignOperator::Assign), "f(a=1) == 2")
        );
        assert_eq!(
            classify("self.total += step #?"),
            macro_of(
                Some("self.total"),
                Some(AssignOperator::Augmented(BinaryOp::Add)),
                "step"
            )
        );
    }

    #[test]
    fn expression_macros_use_the_whole_code_part() {
        assert_eq!(classify("b.pop()  # ?"), macro_of(None, None, "b.pop()"));
        assert_eq!(classify("s = '# ?'"), LineKind::None);
    }

    #[test]
    fn unparseable_macros_are_ignored() {
        assert_eq!(classify("while x: # ?"), LineKind::None);
        assert_eq!(classify("del x # ?"), LineKind::None);
    }

    #[test]
    fn comments_without_the_marker_are_plain() {
        assert_eq!(classify("x = 1  # note"), LineKind::None);
    }

    #[test]
    fn custom_markers() {
        let classifier = LineClassifier::new("=>");
        assert_eq!(
            classifier.classify("x = 1 # =>"),
            macro_of(Some("x"), Some(AssignOperator::Assign), "1")
        );
        assert_eq!(classifier.classify("x = 1 # ?"), LineKind::None);
    }

    #[test]
    fn augmented_expressions_wrap_the_right_hand_side() {
        let LineKind::Macro(found) = classify("x *= a + 1 # ?") else {
            panic!("expected a macro");
        };
        assert_eq!(found.immediate_expression(), "x * (a + 1)");
    }
}
