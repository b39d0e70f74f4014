//! Recursive-descent parser from tokens to raw statements.
//!
//! This stage only checks the grammar. Keys, value types and script-level
//! invariants are checked afterwards by [`analyze`](crate::script::analyze).

use crate::script::error::{ParseError, ParseResult};
use crate::script::lexer::{LineIndex, Spanned, Token};
use crate::script::model::CommandKind;

/// A literal argument value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Str(String),
    Number(f64),
    Bool(bool),
    Ident(String),
    List(Vec<Literal>),
}

impl Literal {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Literal::Str(_) => "string",
            Literal::Number(_) => "number",
            Literal::Bool(_) => "bool",
            Literal::Ident(_) => "identifier",
            Literal::List(_) => "list",
        }
    }
}

/// `key: value` inside a command's argument list.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Arg {
    pub key: String,
    pub value: Literal,
}

/// Gate predicate as written; entity names are resolved later.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawGate {
    Reached { entity: String, waypoint: String },
    Elapsed(f64),
    Stopped { entity: String },
}

/// One statement before semantic analysis.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub kind: CommandKind,
    pub line: usize,
    pub target: Option<String>,
    pub args: Vec<Arg>,
    pub gate: Option<RawGate>,
}

pub(crate) struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    index: LineIndex,
    end: usize,
}

impl Parser {
    pub(crate) fn new(source: &str, tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            index: LineIndex::new(source),
            end: source.len(),
        }
    }

    /// Parse every statement in the token stream.
    pub(crate) fn statements(mut self) -> ParseResult<Vec<Statement>> {
        let mut statements = Vec::new();
        while self.pos < self.tokens.len() {
            statements.push(self.statement()?);
        }
        Ok(statements)
    }

    fn statement(&mut self) -> ParseResult<Statement> {
        let first = self.advance("a command")?;
        let line = self.index.position(first.span.start).0;
        let kind = match first.token {
            Token::Spawn => CommandKind::Spawn,
            Token::Route => CommandKind::Route,
            Token::Speed => CommandKind::Speed,
            Token::Trigger => CommandKind::Trigger,
            Token::Goal => CommandKind::Goal,
            Token::Wait => CommandKind::Wait,
            other => {
                return Err(self.error_at(
                    first.span.start,
                    format!("expected a command, found {other}"),
                ))
            }
        };

        let target = match kind {
            CommandKind::Wait => None,
            _ => Some(self.ident("an entity name")?),
        };
        let args = self.args()?;
        let gate = if self.eat(&Token::When) {
            Some(self.predicate()?)
        } else {
            None
        };
        self.expect(&Token::Semicolon)?;

        Ok(Statement {
            kind,
            line,
            target,
            args,
            gate,
        })
    }

    fn args(&mut self) -> ParseResult<Vec<Arg>> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        loop {
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            let key = self.key()?;
            self.expect(&Token::Colon)?;
            let value = self.value()?;
            args.push(Arg { key, value });
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen)?;
                return Ok(args);
            }
        }
    }

    fn value(&mut self) -> ParseResult<Literal> {
        let next = self.advance("a value")?;
        match next.token {
            Token::Str(s) => Ok(Literal::Str(s)),
            Token::Number(n) => Ok(Literal::Number(n)),
            Token::Bool(b) => Ok(Literal::Bool(b)),
            Token::Ident(s) => Ok(Literal::Ident(s)),
            Token::LBracket => {
                let mut items = Vec::new();
                loop {
                    if self.eat(&Token::RBracket) {
                        return Ok(Literal::List(items));
                    }
                    items.push(self.value()?);
                    if !self.eat(&Token::Comma) {
                        self.expect(&Token::RBracket)?;
                        return Ok(Literal::List(items));
                    }
                }
            }
            other => Err(self.error_at(
                next.span.start,
                format!("expected a value, found {other}"),
            )),
        }
    }

    fn predicate(&mut self) -> ParseResult<RawGate> {
        if self.eat(&Token::Elapsed) {
            let next = self.advance("a number of seconds")?;
            return match next.token {
                Token::Number(n) => Ok(RawGate::Elapsed(n)),
                other => Err(self.error_at(
                    next.span.start,
                    format!("expected a number of seconds, found {other}"),
                )),
            };
        }

        let entity = self.ident("an entity name or 'elapsed'")?;
        let next = self.advance("'reaches' or 'stopped'")?;
        match next.token {
            Token::Stopped => Ok(RawGate::Stopped { entity }),
            Token::Reaches => {
                let lane = self.advance("a waypoint string")?;
                match lane.token {
                    Token::Str(waypoint) => Ok(RawGate::Reached { entity, waypoint }),
                    other => Err(self.error_at(
                        lane.span.start,
                        format!("expected a waypoint string, found {other}"),
                    )),
                }
            }
            other => Err(self.error_at(
                next.span.start,
                format!("expected 'reaches' or 'stopped', found {other}"),
            )),
        }
    }

    fn key(&mut self) -> ParseResult<String> {
        let next = self.advance("an argument name")?;
        if let Some(kw) = next.token.keyword_text() {
            return Ok(kw.to_string());
        }
        match next.token {
            Token::Ident(s) => Ok(s),
            other => Err(self.error_at(
                next.span.start,
                format!("expected an argument name, found {other}"),
            )),
        }
    }

    fn ident(&mut self, what: &str) -> ParseResult<String> {
        let next = self.advance(what)?;
        match next.token {
            Token::Ident(s) => Ok(s),
            other => Err(self.error_at(next.span.start, format!("expected {what}, found {other}"))),
        }
    }

    fn expect(&mut self, expected: &Token) -> ParseResult<()> {
        let next = self.advance(&expected.to_string())?;
        if &next.token == expected {
            Ok(())
        } else {
            Err(self.error_at(
                next.span.start,
                format!("expected {expected}, found {}", next.token),
            ))
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        match self.tokens.get(self.pos) {
            Some(next) if &next.token == expected => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn advance(&mut self, what: &str) -> ParseResult<Spanned> {
        match self.tokens.get(self.pos) {
            Some(next) => {
                self.pos += 1;
                Ok(next.clone())
            }
            None => Err(self.error_at(self.end, format!("expected {what}, found end of input"))),
        }
    }

    fn error_at(&self, offset: usize, message: String) -> ParseError {
        let (line, column) = self.index.position(offset);
        ParseError::Syntax {
            line,
            column,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::lexer::tokenize;

    fn parse(source: &str) -> ParseResult<Vec<Statement>> {
        Parser::new(source, tokenize(source)?).statements()
    }

    #[test]
    fn test_parses_command_with_args_and_gate() {
        let stmts = parse(r#"speed npc1(speed: 8.0, behavior: cautious) when npc1 reaches "L1";"#)
            .expect("parse failed");
        assert_eq!(stmts.len(), 1);
        let stmt = &stmts[0];
        assert_eq!(stmt.kind, CommandKind::Speed);
        assert_eq!(stmt.target.as_deref(), Some("npc1"));
        assert_eq!(stmt.args[0].key, "speed");
        assert_eq!(stmt.args[1].value, Literal::Ident("cautious".to_string()));
        assert_eq!(
            stmt.gate,
            Some(RawGate::Reached {
                entity: "npc1".to_string(),
                waypoint: "L1".to_string(),
            })
        );
    }

    #[test]
    fn test_parses_lists_and_trailing_commas() {
        let stmts = parse(r#"route npc1(lanes: ["A", "B",],);"#).expect("parse failed");
        assert_eq!(
            stmts[0].args[0].value,
            Literal::List(vec![
                Literal::Str("A".to_string()),
                Literal::Str("B".to_string()),
            ])
        );
    }

    #[test]
    fn test_wait_takes_no_target() {
        let stmts = parse("wait(seconds: 2);").expect("parse failed");
        assert_eq!(stmts[0].kind, CommandKind::Wait);
        assert!(stmts[0].target.is_none());
    }

    #[test]
    fn test_missing_semicolon_is_syntax_error() {
        let err = parse("wait(seconds: 2)\nwait(seconds: 1);").unwrap_err();
        match err {
            ParseError::Syntax { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("expected ';'"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_command_is_syntax_error() {
        let err = parse("teleport ego();").unwrap_err();
        assert!(err.is_syntax());
    }

    #[test]
    fn test_truncated_input_reports_end_of_input() {
        let err = parse("spawn ego(role: ").unwrap_err();
        assert!(err.to_string().contains("end of input"));
    }

    #[test]
    fn test_elapsed_gate() {
        let stmts = parse(r#"trigger npc1(event: "brake") when elapsed 3.5;"#).expect("parse failed");
        assert_eq!(stmts[0].gate, Some(RawGate::Elapsed(3.5)));
    }
}
