use crate::position::Span;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keyword {
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
    True,
    False,
    None,
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Self> {
        use Keyword::*;
        let kw = match ident {
            "and" => And,
            "as" => As,
            "assert" => Assert,
            "async" => Async,
            "await" => Await,
            "break" => Break,
            "class" => Class,
            "continue" => Continue,
            "def" => Def,
            "del" => Del,
            "elif" => Elif,
            "else" => Else,
            "except" => Except,
            "finally" => Finally,
            "for" => For,
            "from" => From,
            "global" => Global,
            "if" => If,
            "import" => Import,
            "in" => In,
            "is" => Is,
            "lambda" => Lambda,
            "nonlocal" => Nonlocal,
            "not" => Not,
            "or" => Or,
            "pass" => Pass,
            "raise" => Raise,
            "return" => Return,
            "try" => Try,
            "while" => While,
            "with" => With,
            "yield" => Yield,
            "True" => True,
            "False" => False,
            "None" => None,
            _ => return Option::None,
        };
        Some(kw)
    }

    pub fn as_str(&self) -> &'static str {
        use Keyword::*;
        match self {
            And => "and",
            As => "as",
            Assert => "assert",
            Async => "async",
            Await => "await",
            Break => "break",
            Class => "class",
            Continue => "continue",
            Def => "def",
            Del => "del",
            Elif => "elif",
            Else => "else",
            Except => "except",
            Finally => "finally",
            For => "for",
            From => "from",
            Global => "global",
            If => "if",
            Import => "import",
            In => "in",
            Is => "is",
            Lambda => "lambda",
            Nonlocal => "nonlocal",
            Not => "not",
            Or => "or",
            Pass => "pass",
            Raise => "raise",
            Return => "return",
            Try => "try",
            While => "while",
            With => "with",
            Yield => "yield",
            True => "True",
            False => "False",
            None => "None",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbol {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Arrow,
    Equals,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    At,
    Pipe,
    Amp,
    Caret,
    Tilde,
    ShiftLeft,
    ShiftRight,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    Ellipsis,
    PlusEquals,
    MinusEquals,
    StarEquals,
    DoubleStarEquals,
    SlashEquals,
    DoubleSlashEquals,
    PercentEquals,
    AmpEquals,
    PipeEquals,
    CaretEquals,
    ShiftLeftEquals,
    ShiftRightEquals,
}

impl Symbol {
    /// True for the compound assignment operators (`+=`, `//=`, ...).
    pub fn is_augmented(&self) -> bool {
        use Symbol::*;
        matches!(
            self,
            PlusEquals
                | MinusEquals
                | StarEquals
                | DoubleStarEquals
                | SlashEquals
                | DoubleSlashEquals
                | PercentEquals
                | AmpEquals
                | PipeEquals
                | CaretEquals
                | ShiftLeftEquals
                | ShiftRightEquals
        )
    }

    pub fn as_str(&self) -> &'static str {
        use Symbol::*;
        match self {
            LParen => "(",
            RParen => ")",
            LBrace => "{",
            RBrace => "}",
            LBracket => "[",
            RBracket => "]",
            Comma => ",",
            Dot => ".",
            Colon => ":",
            Semicolon => ";",
            Arrow => "->",
            Equals => "=",
            Plus => "+",
            Minus => "-",
            Star => "*",
            DoubleStar => "**",
            Slash => "/",
            DoubleSlash => "//",
            Percent => "%",
            At => "@",
            Pipe => "|",
            Amp => "&",
            Caret => "^",
            Tilde => "~",
            ShiftLeft => "<<",
            ShiftRight => ">>",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
            EqEq => "==",
            NotEq => "!=",
            Ellipsis => "...",
            PlusEquals => "+=",
            MinusEquals => "-=",
            StarEquals => "*=",
            DoubleStarEquals => "**=",
            SlashEquals => "/=",
            DoubleSlashEquals => "//=",
            PercentEquals => "%=",
            AmpEquals => "&=",
            PipeEquals => "|=",
            CaretEquals => "^=",
            ShiftLeftEquals => "<<=",
            ShiftRightEquals => ">>=",
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TokenKind {
    Identifier(SmolStr),
    IntLiteral(i128),
    FloatLiteral(f64),
    BoolLiteral(bool),
    StringLiteral(String),
    /// Raw body of an `f"..."` literal; the parser splits out the fields.
    FormatString(String),
    Keyword(Keyword),
    Symbol(Symbol),
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier(name) => write!(f, "name `{name}`"),
            TokenKind::IntLiteral(value) => write!(f, "number `{value}`"),
            TokenKind::FloatLiteral(value) => write!(f, "number `{value}`"),
            TokenKind::BoolLiteral(value) => write!(f, "`{}`", if *value { "True" } else { "False" }),
            TokenKind::StringLiteral(_) | TokenKind::FormatString(_) => write!(f, "string literal"),
            TokenKind::Keyword(keyword) => write!(f, "`{keyword}`"),
            TokenKind::Symbol(symbol) => write!(f, "`{symbol}`"),
            TokenKind::Newline => write!(f, "end of line"),
            TokenKind::Indent => write!(f, "indent"),
            TokenKind::Dedent => write!(f, "dedent"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn is_symbol(&self, symbol: Symbol) -> bool {
        matches!(self.kind, TokenKind::Symbol(s) if s == symbol)
    }
}
