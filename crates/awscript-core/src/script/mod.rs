//! Scenario script language.
//!
//! Provides:
//! - [`lexer`] - Logos tokenizer
//! - [`parser`] - grammar check into raw statements
//! - [`analyze`] - typed commands plus script-level invariants
//! - [`model`] - the [`ScenarioScript`] plan consumed by the dispatcher
//!
//! ```text
//! spawn ego(role: ego, lane: "TrafficLane.239", offset: 5.0);
//! spawn npc1(role: npc, body: "taxi", lane: "TrafficLane.240");
//! route npc1(lanes: ["TrafficLane.300", "TrafficLane.448"]);
//! speed npc1(speed: 0.0) when npc1 reaches "TrafficLane.300";
//! goal ego(lane: "TrafficLane.448", offset: 20.0);
//! ```

mod analyze;
pub mod error;
pub mod lexer;
pub mod model;
mod parser;

use std::path::{Path, PathBuf};

pub use error::{LoadError, ParseError, ParseResult, SemanticError};
pub use model::{
    ActorRole, CommandBody, CommandKind, CommandParams, EntityId, Gate, ScenarioCommand,
    ScenarioScript, MAX_SCRIPT_SECONDS,
};

/// File extension of scenario scripts.
pub const SCRIPT_EXTENSION: &str = "script";

/// Parse script text into a scenario plan.
///
/// Pure: performs no I/O, and the same text always yields the same plan.
pub fn parse_script(path: impl Into<PathBuf>, source: &str) -> ParseResult<ScenarioScript> {
    let tokens = lexer::tokenize(source)?;
    let statements = parser::Parser::new(source, tokens).statements()?;
    analyze::analyze(path.into(), source, statements)
}

/// Read a script file and parse it.
pub fn load_script(path: &Path) -> Result<ScenarioScript, LoadError> {
    let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_script(path, &source).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
