// Lexer for the textual IR form (`.xy` files).
//
// Tokenizes IR text: function headers, block labels, instructions and
// terminators. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// IR token types.
///
/// Identifiers carry no value — use the span to retrieve the text.
/// `;` starts a comment that runs to the end of the line.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|;[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("fn")]
    Fn,
    #[token("const")]
    Const,
    #[token("copy")]
    Copy,
    #[token("ret")]
    Ret,
    #[token("jmp")]
    Jmp,
    #[token("br")]
    Br,

    // ── Binary op mnemonics ──
    #[token("add")]
    Add,
    #[token("sub")]
    Sub,
    #[token("mul")]
    Mul,
    #[token("div")]
    Div,
    #[token("eq")]
    Eq,
    #[token("lt")]
    Lt,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token(":")]
    Colon,

    // ── Literals ──
    /// SSA value reference, e.g. `%12`.
    #[regex(r"%[0-9]+", parse_value)]
    Value(u32),

    /// Signed 64-bit integer immediate.
    #[regex(r"-?[0-9]+", parse_int)]
    Int(i64),

    // ── Identifier ──
    //
    // Keywords win over this regex for equal-length matches, so `ret` is Ret
    // while `retry` is an identifier.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines; instructions are newline-terminated.
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Fn => write!(f, "fn"),
            Token::Const => write!(f, "const"),
            Token::Copy => write!(f, "copy"),
            Token::Ret => write!(f, "ret"),
            Token::Jmp => write!(f, "jmp"),
            Token::Br => write!(f, "br"),
            Token::Add => write!(f, "add"),
            Token::Sub => write!(f, "sub"),
            Token::Mul => write!(f, "mul"),
            Token::Div => write!(f, "div"),
            Token::Eq => write!(f, "eq"),
            Token::Lt => write!(f, "lt"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Colon => write!(f, ":"),
            Token::Value(v) => write!(f, "%{v}"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Callbacks ──

fn parse_value(lex: &mut logos::Lexer<'_, Token>) -> Option<u32> {
    lex.slice()[1..].parse().ok()
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex an IR source string into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters (or out-of-range literals).
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected input: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
