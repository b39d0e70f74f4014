//! Error types for script loading and parsing.

use crate::script::model::CommandKind;
use std::path::PathBuf;
use thiserror::Error;

/// Script-level invariant violations in an otherwise well-formed script.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SemanticError {
    #[error("script has no goal declaration")]
    MissingGoal,

    #[error("line {line}: duplicate goal declaration (first declared on line {first})")]
    DuplicateGoal { line: usize, first: usize },

    #[error("line {line}: entity '{entity}' is already declared on line {first}")]
    DuplicateEntity {
        entity: String,
        line: usize,
        first: usize,
    },

    #[error("line {line}: reference to undeclared entity '{entity}'")]
    UndeclaredEntity { entity: String, line: usize },

    #[error("line {line}: goal targets '{entity}', which is not the ego vehicle")]
    GoalNotEgo { entity: String, line: usize },

    #[error("line {line}: a second ego vehicle is spawned (first on line {first})")]
    MultipleEgo { line: usize, first: usize },

    #[error("line {line}: {kind} cannot be gated")]
    UngateableCommand { kind: CommandKind, line: usize },

    #[error("line {line}: {kind}: {message}")]
    InvalidParameter {
        kind: CommandKind,
        line: usize,
        message: String,
    },
}

/// Errors produced while turning script text into a scenario plan.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// The token stream does not match the grammar.
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// Well-formed, but breaks a script-level invariant.
    #[error("semantic error: {0}")]
    Semantic(#[from] SemanticError),
}

impl ParseError {
    pub fn is_syntax(&self) -> bool {
        matches!(self, ParseError::Syntax { .. })
    }

    pub fn is_semantic(&self) -> bool {
        matches!(self, ParseError::Semantic(_))
    }
}

/// Result type for parsing.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Errors produced by [`load_script`](crate::script::load_script).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read script {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display_has_position() {
        let err = ParseError::Syntax {
            line: 3,
            column: 7,
            message: "expected ';'".to_string(),
        };
        assert_eq!(err.to_string(), "syntax error at 3:7: expected ';'");
        assert!(err.is_syntax());
    }

    #[test]
    fn test_semantic_error_wraps() {
        let err: ParseError = SemanticError::MissingGoal.into();
        assert!(err.is_semantic());
        assert!(err.to_string().contains("no goal"));
    }
}
