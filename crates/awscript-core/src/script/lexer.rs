//! Lexer for scenario scripts.
//!
//! Uses Logos for tokenization. Comments (`#` and `//` to end of line) and
//! whitespace are skipped.

use crate::script::error::{ParseError, ParseResult};
use logos::Logos;
use std::fmt;
use std::ops::Range;

/// Script token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // === Command keywords ===
    #[token("spawn")]
    Spawn,
    #[token("route")]
    Route,
    #[token("speed")]
    Speed,
    #[token("trigger")]
    Trigger,
    #[token("goal")]
    Goal,
    #[token("wait")]
    Wait,

    // === Gate keywords ===
    #[token("when")]
    When,
    #[token("reaches")]
    Reaches,
    #[token("elapsed")]
    Elapsed,
    #[token("stopped")]
    Stopped,

    // === Literals ===
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Bool(bool),
    #[regex(r"-?[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // === Punctuation ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
}

impl Token {
    /// Source text of keyword tokens. Keywords double as argument keys, so
    /// `speed npc1(speed: 8.0)` is valid.
    pub fn keyword_text(&self) -> Option<&'static str> {
        match self {
            Token::Spawn => Some("spawn"),
            Token::Route => Some("route"),
            Token::Speed => Some("speed"),
            Token::Trigger => Some("trigger"),
            Token::Goal => Some("goal"),
            Token::Wait => Some("wait"),
            Token::When => Some("when"),
            Token::Reaches => Some("reaches"),
            Token::Elapsed => Some("elapsed"),
            Token::Stopped => Some("stopped"),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kw) = self.keyword_text() {
            return write!(f, "'{kw}'");
        }
        match self {
            Token::Bool(b) => write!(f, "'{b}'"),
            Token::Number(n) => write!(f, "number {n}"),
            Token::Str(s) => write!(f, "string \"{s}\""),
            Token::Ident(s) => write!(f, "identifier '{s}'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::Comma => f.write_str("','"),
            Token::Colon => f.write_str("':'"),
            Token::Semicolon => f.write_str("';'"),
            _ => f.write_str("keyword"),
        }
    }
}

/// A token with its byte range in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}

/// Maps byte offsets to 1-based line/column pairs.
#[derive(Debug, Clone)]
pub(crate) struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    pub(crate) fn position(&self, offset: usize) -> (usize, usize) {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line + 1, offset - self.starts[line] + 1)
    }
}

/// Tokenize a whole script.
pub fn tokenize(source: &str) -> ParseResult<Vec<Spanned>> {
    let index = LineIndex::new(source);
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push(Spanned { token, span }),
            Err(()) => {
                let (line, column) = index.position(span.start);
                return Err(ParseError::Syntax {
                    line,
                    column,
                    message: format!("unexpected input '{}'", lexer.slice()),
                });
            }
        }
    }

    Ok(tokens)
}

fn unescape(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
