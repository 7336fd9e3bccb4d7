use thiserror::Error;

use crate::ast::Position;

/// User-facing problems found before lowering. The `Display` forms are
/// consumed by external tooling and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("DeclareSymbolError{pos}[Already defined in this scope {name}.]")]
    DeclareSymbol { pos: Position, name: String },
    #[error("ResolveSymbolError{pos}[Could not find {name}.]")]
    ResolveSymbol { pos: Position, name: String },
    #[error("TypeError{pos}[{message}]")]
    Type { pos: Position, message: String },
}

impl Diagnostic {
    pub fn type_error(pos: Position, message: impl Into<String>) -> Self {
        Diagnostic::Type {
            pos,
            message: message.into(),
        }
    }
}
