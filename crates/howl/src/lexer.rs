use crate::diagnostics::{Diagnostic, HowlResult};
use crate::source::SourceFile;
use crate::tokens::{Keyword, Symbol, Token, TokenKind};

#[derive(Debug, Clone)]
struct Cursor<'a> {
    source: &'a str,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, offset: 0 }
    }

    #[inline]
    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    #[inline]
    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    #[inline]
    fn peek_is(&self, ch: char) -> bool {
        matches!(self.peek_char(), Some(c) if c == ch)
    }

    #[inline]
    fn peek_n(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    #[inline]
    fn advance(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.offset += ch.len_utf8();
        Some(ch)
    }

    #[inline]
    fn slice_from(&self, start: usize) -> &'a str {
        &self.source[start..self.offset]
    }

    fn take_while<F>(&mut self, mut pred: F)
    where
        F: FnMut(char) -> bool,
    {
        while let Some(ch) = self.peek_char() {
            if pred(ch) {
                self.advance();
            } else {
                break;
            }
        }
    }
}

#[derive(Default, Debug)]
struct IndentStack {
    stack: Vec<usize>,
}

impl IndentStack {
    fn new() -> Self {
        Self { stack: vec![0] }
    }

    fn current(&self) -> usize {
        self.stack.last().copied().unwrap_or(0)
    }

    fn push(&mut self, indent: usize) {
        self.stack.push(indent);
    }

    fn pop(&mut self) -> Option<usize> {
        if self.stack.len() > 1 {
            self.stack.pop()
        } else {
            None
        }
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Whether layout tokens (`Newline`, `Indent`, `Dedent`) are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    /// A whole program file.
    Module,
    /// A single line or expression: line breaks are plain whitespace.
    Fragment,
}

/// Symbols ordered so that longer spellings win.
const SYMBOLS: &[(&str, Symbol)] = &[
    ("**=", Symbol::DoubleStarEquals),
    ("//=", Symbol::DoubleSlashEquals),
    ("<<=", Symbol::ShiftLeftEquals),
    (">>=", Symbol::ShiftRightEquals),
    ("...", Symbol::Ellipsis),
    ("**", Symbol::DoubleStar),
    ("//", Symbol::DoubleSlash),
    ("<<", Symbol::ShiftLeft),
    (">>", Symbol::ShiftRight),
    ("<=", Symbol::Le),
    (">=", Symbol::Ge),
    ("==", Symbol::EqEq),
    ("!=", Symbol::NotEq),
    ("->", Symbol::Arrow),
    ("+=", Symbol::PlusEquals),
    ("-=", Symbol::MinusEquals),
    ("*=", Symbol::StarEquals),
    ("/=", Symbol::SlashEquals),
    ("%=", Symbol::PercentEquals),
    ("&=", Symbol::AmpEquals),
    ("|=", Symbol::PipeEquals),
    ("^=", Symbol::CaretEquals),
    ("(", Symbol::LParen),
    (")", Symbol::RParen),
    ("[", Symbol::LBracket),
    ("]", Symbol::RBracket),
    ("{", Symbol::LBrace),
    ("}", Symbol::RBrace),
    (",", Symbol::Comma),
    (".", Symbol::Dot),
    (":", Symbol::Colon),
    (";", Symbol::Semicolon),
    ("=", Symbol::Equals),
    ("+", Symbol::Plus),
    ("-", Symbol::Minus),
    ("*", Symbol::Star),
    ("/", Symbol::Slash),
    ("%", Symbol::Percent),
    ("@", Symbol::At),
    ("|", Symbol::Pipe),
    ("&", Symbol::Amp),
    ("^", Symbol::Caret),
    ("~", Symbol::Tilde),
    ("<", Symbol::Lt),
    (">", Symbol::Gt),
];

/// Lex a Howl source file into a sequence of tokens (including indentation
/// markers).
pub fn lex(file: &SourceFile) -> HowlResult<Vec<Token>> {
    Lexer::new(file, LexMode::Module).run()
}

/// Lex a line or expression without layout tokens.
pub fn lex_fragment(file: &SourceFile) -> HowlResult<Vec<Token>> {
    Lexer::new(file, LexMode::Fragment).run()
}

struct Lexer<'a> {
    file: &'a SourceFile,
    cursor: Cursor<'a>,
    mode: LexMode,
    tokens: Vec<Token>,
    indent_stack: IndentStack,
    nesting_level: usize,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    fn new(file: &'a SourceFile, mode: LexMode) -> Self {
        Self {
            file,
            cursor: Cursor::new(&file.text),
            mode,
            tokens: Vec::new(),
            indent_stack: IndentStack::new(),
            nesting_level: 0,
            at_line_start: mode == LexMode::Module,
        }
    }

    fn run(mut self) -> HowlResult<Vec<Token>> {
        loop {
            if self.at_line_start {
                self.at_line_start = false;
                if !self.indentation()? {
                    break;
                }
            }
            let Some(ch) = self.cursor.peek_char() else {
                break;
            };
            let start = self.cursor.offset;
            match ch {
                '\n' => {
                    self.cursor.advance();
                    if self.mode == LexMode::Module && self.nesting_level == 0 {
                        self.push_newline(start);
                        self.at_line_start = true;
                    }
                }
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.cursor.advance();
                }
                '\\' => {
                    self.cursor.advance();
                    if self.cursor.peek_is('\r') {
                        self.cursor.advance();
                    }
                    if !self.cursor.peek_is('\n') {
                        return Err(self.error(
                            start,
                            "unexpected character after line continuation character",
                        ));
                    }
                    self.cursor.advance();
                }
                '#' => self.cursor.take_while(|c| c != '\n'),
                '0'..='9' => {
                    let kind = self.number(start)?;
                    self.push(kind, start);
                }
                '.' if matches!(self.cursor.peek_n(1), Some('0'..='9')) => {
                    let kind = self.number(start)?;
                    self.push(kind, start);
                }
                '"' | '\'' => {
                    let kind = self.string(start, false, false)?;
                    self.push(kind, start);
                }
                c if c == '_' || c.is_alphabetic() => {
                    let kind = self.word(start)?;
                    self.push(kind, start);
                }
                _ => {
                    let symbol = self.symbol(start)?;
                    match symbol {
                        Symbol::LParen | Symbol::LBracket | Symbol::LBrace => self.nesting_level += 1,
                        Symbol::RParen | Symbol::RBracket | Symbol::RBrace => {
                            self.nesting_level = self.nesting_level.saturating_sub(1)
                        }
                        _ => {}
                    }
                    self.push(TokenKind::Symbol(symbol), start);
                }
            }
        }

        let end = self.file.text.len();
        if self.mode == LexMode::Module {
            self.push_newline(end);
            while self.indent_stack.depth() > 1 {
                self.indent_stack.pop();
                self.tokens
                    .push(Token::new(TokenKind::Dedent, self.file.span(end, end)));
            }
        }
        self.tokens
            .push(Token::new(TokenKind::Eof, self.file.span(end, end)));
        Ok(self.tokens)
    }

    /// Measures the indentation of the next non-blank line and emits
    /// `Indent`/`Dedent` tokens. Returns `false` once the input is exhausted.
    fn indentation(&mut self) -> HowlResult<bool> {
        loop {
            let line_start = self.cursor.offset;
            let mut width = 0usize;
            while let Some(ch) = self.cursor.peek_char() {
                match ch {
                    ' ' => width += 1,
                    '\t' => width = (width / 8 + 1) * 8,
                    '\x0c' => width = 0,
                    '\r' => {}
                    _ => break,
                }
                self.cursor.advance();
            }
            match self.cursor.peek_char() {
                None => return Ok(false),
                Some('\n') => {
                    self.cursor.advance();
                    continue;
                }
                Some('#') => {
                    self.cursor.take_while(|c| c != '\n');
                    if self.cursor.advance().is_none() {
                        return Ok(false);
                    }
                    continue;
                }
                Some(_) => {}
            }

            let current = self.indent_stack.current();
            if width > current {
                self.indent_stack.push(width);
                self.tokens.push(Token::new(
                    TokenKind::Indent,
                    self.file.span(line_start, self.cursor.offset),
                ));
            } else if width < current {
                while width < self.indent_stack.current() {
                    self.indent_stack.pop();
                    self.tokens.push(Token::new(
                        TokenKind::Dedent,
                        self.file.span(self.cursor.offset, self.cursor.offset),
                    ));
                }
                if self.indent_stack.current() != width {
                    return Err(self.error(
                        line_start,
                        "unindent does not match any outer indentation level",
                    ));
                }
            }
            return Ok(true);
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let span = self.file.span(start, self.cursor.offset);
        self.tokens.push(Token::new(kind, span));
    }

    fn push_newline(&mut self, at: usize) {
        let needs_newline = matches!(
            self.tokens.last(),
            Some(token) if !matches!(token.kind, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent)
        );
        if needs_newline {
            let end = (at + 1).min(self.file.text.len());
            self.tokens
                .push(Token::new(TokenKind::Newline, self.file.span(at, end)));
        }
    }

    fn number(&mut self, start: usize) -> HowlResult<TokenKind> {
        let radix = match (self.cursor.peek_char(), self.cursor.peek_n(1)) {
            (Some('0'), Some('x' | 'X')) => Some(16),
            (Some('0'), Some('o' | 'O')) => Some(8),
            (Some('0'), Some('b' | 'B')) => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            self.cursor.advance();
            self.cursor.advance();
            let digits_start = self.cursor.offset;
            self.cursor.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
            let digits = self.cursor.slice_from(digits_start).replace('_', "");
            return i128::from_str_radix(&digits, radix)
                .map(TokenKind::IntLiteral)
                .map_err(|_| self.error(start, "invalid integer literal"));
        }

        let mut is_float = false;
        self.cursor.take_while(|c| c.is_ascii_digit() || c == '_');
        if self.cursor.peek_is('.') {
            let next = self.cursor.peek_n(1);
            let is_attribute = matches!(next, Some(c) if c == '_' || c.is_alphabetic() || c == '.');
            if !is_attribute {
                is_float = true;
                self.cursor.advance();
                self.cursor.take_while(|c| c.is_ascii_digit() || c == '_');
            }
        }
        if matches!(self.cursor.peek_char(), Some('e' | 'E')) {
            let sign_or_digit = self.cursor.peek_n(1);
            let digit_after_sign = self.cursor.peek_n(2);
            let has_exponent = match sign_or_digit {
                Some('0'..='9') => true,
                Some('+' | '-') => matches!(digit_after_sign, Some('0'..='9')),
                _ => false,
            };
            if has_exponent {
                is_float = true;
                self.cursor.advance();
                if matches!(self.cursor.peek_char(), Some('+' | '-')) {
                    self.cursor.advance();
                }
                self.cursor.take_while(|c| c.is_ascii_digit() || c == '_');
            }
        }
        if matches!(self.cursor.peek_char(), Some('j' | 'J')) {
            return Err(self.error(start, "complex literals are not supported"));
        }

        let literal = self.cursor.slice_from(start).replace('_', "");
        if is_float {
            literal
                .parse::<f64>()
                .map(TokenKind::FloatLiteral)
                .map_err(|_| self.error(start, format!("invalid float literal `{literal}`")))
        } else {
            literal
                .parse::<i128>()
                .map(TokenKind::IntLiteral)
                .map_err(|_| self.error(start, format!("integer literal `{literal}` is too large")))
        }
    }

    fn word(&mut self, start: usize) -> HowlResult<TokenKind> {
        self.cursor
            .take_while(|c| c == '_' || c.is_alphanumeric());
        let ident = self.cursor.slice_from(start);
        if matches!(self.cursor.peek_char(), Some('"' | '\'')) {
            let prefix = ident.to_ascii_lowercase();
            let (raw, format) = match prefix.as_str() {
                "r" | "rb" | "br" => (true, false),
                "u" | "b" => (false, false),
                "f" => (false, true),
                "rf" | "fr" => (true, true),
                _ => return Ok(Self::classify_word(ident)),
            };
            return self.string(start, raw, format);
        }
        Ok(Self::classify_word(ident))
    }

    fn classify_word(ident: &str) -> TokenKind {
        match Keyword::from_ident(ident) {
            Some(Keyword::True) => TokenKind::BoolLiteral(true),
            Some(Keyword::False) => TokenKind::BoolLiteral(false),
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Identifier(ident.into()),
        }
    }

    fn string(&mut self, start: usize, raw: bool, format: bool) -> HowlResult<TokenKind> {
        let quote = self
            .cursor
            .advance()
            .ok_or_else(|| self.error(start, "unterminated string literal"))?;
        let triple = self.cursor.peek_is(quote) && self.cursor.peek_n(1) == Some(quote);
        if triple {
            self.cursor.advance();
            self.cursor.advance();
        }

        let mut value = String::new();
        loop {
            let ch = self
                .cursor
                .advance()
                .ok_or_else(|| self.error(start, "unterminated string literal"))?;
            if ch == quote {
                if !triple {
                    break;
                }
                if self.cursor.peek_is(quote) && self.cursor.peek_n(1) == Some(quote) {
                    self.cursor.advance();
                    self.cursor.advance();
                    break;
                }
                value.push(ch);
            } else if ch == '\n' && !triple {
                return Err(self.error(start, "unterminated string literal"));
            } else if ch == '\\' {
                let escaped = self
                    .cursor
                    .advance()
                    .ok_or_else(|| self.error(start, "unterminated string literal"))?;
                if raw {
                    value.push('\\');
                    value.push(escaped);
                } else {
                    self.escape(start, escaped, &mut value)?;
                }
            } else {
                value.push(ch);
            }
        }

        Ok(if format {
            TokenKind::FormatString(value)
        } else {
            TokenKind::StringLiteral(value)
        })
    }

    fn escape(&mut self, start: usize, escaped: char, value: &mut String) -> HowlResult<()> {
        let simple = match escaped {
            '\n' => return Ok(()),
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'v' => '\x0b',
            '\\' | '\'' | '"' => escaped,
            'x' | 'u' | 'U' => {
                let width = match escaped {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits_start = self.cursor.offset;
                for _ in 0..width {
                    match self.cursor.peek_char() {
                        Some(c) if c.is_ascii_hexdigit() => {
                            self.cursor.advance();
                        }
                        _ => return Err(self.error(start, "truncated escape sequence")),
                    }
                }
                let digits = self.cursor.slice_from(digits_start);
                let decoded = u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error(start, "invalid escape sequence"))?;
                value.push(decoded);
                return Ok(());
            }
            other => {
                value.push('\\');
                other
            }
        };
        value.push(simple);
        Ok(())
    }

    fn symbol(&mut self, start: usize) -> HowlResult<Symbol> {
        let rest = self.cursor.rest();
        for (spelling, symbol) in SYMBOLS {
            if rest.starts_with(spelling) {
                self.cursor.offset += spelling.len();
                return Ok(*symbol);
            }
        }
        let ch = self.cursor.peek_char().unwrap_or('?');
        Err(self.error(start, format!("invalid character '{ch}'")))
    }

    fn error(&self, at: usize, message: impl Into<String>) -> crate::diagnostics::HowlError {
        let end = (at + 1).min(self.file.text.len()).max(at);
        Diagnostic::syntax(message, self.file.span(at, end)).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let file = SourceFile::fragment(text);
        lex(&file).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn blocks_produce_indent_and_dedent() {
        let tokens = kinds("if x:\n    y\nz\n");
        assert!(tokens.contains(&TokenKind::Indent));
        assert!(tokens.contains(&TokenKind::Dedent));
        assert_eq!(tokens.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn brackets_join_lines() {
        let tokens = kinds("a = [\n  1,  # ?\n  2,\n]\n");
        let newlines = tokens.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!tokens.contains(&TokenKind::Indent));
    }

    #[test]
    fn string_prefixes_and_escapes() {
        let tokens = kinds("r'a\\n' u'b' \"c\\n\" '''x\ny'''");
        assert_eq!(tokens[0], TokenKind::StringLiteral("a\\n".into()));
        assert_eq!(tokens[1], TokenKind::StringLiteral("b".into()));
        assert_eq!(tokens[2], TokenKind::StringLiteral("c\n".into()));
        assert_eq!(tokens[3], TokenKind::StringLiteral("x\ny".into()));
    }

    #[test]
    fn comments_do_not_hide_code_inside_strings() {
        let file = SourceFile::fragment("x = '#' # ?");
        let tokens = lex_fragment(&file).unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[2].kind, TokenKind::StringLiteral("#".into()));
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("0x1f")[0], TokenKind::IntLiteral(31));
        assert_eq!(kinds("1_000")[0], TokenKind::IntLiteral(1000));
        assert_eq!(kinds("2.5e3")[0], TokenKind::FloatLiteral(2500.0));
        assert_eq!(kinds(".5")[0], TokenKind::FloatLiteral(0.5));
    }
}
