use thiserror::Error;

use crate::geometry::GridPosition;
use crate::board::{ComponentId, NetId, TraceId};

/// Errors raised by direct `BoardState` mutations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoardError {
    #[error("net {0} not found")]
    NetNotFound(NetId),

    #[error("component {0} not found")]
    ComponentNotFound(ComponentId),

    #[error("pin {pin_index} not found on component {component}")]
    PinNotFound { component: ComponentId, pin_index: usize },

    #[error("trace {0} not found")]
    TraceNotFound(TraceId),

    #[error("pin {pin_index} of component {component} is already connected to net {net}")]
    PinAlreadyConnected {
        component: ComponentId,
        pin_index: usize,
        net: NetId,
    },

    #[error("component {0} is fixed")]
    ComponentFixed(ComponentId),

    #[error("trace from {start} to {end} is not a Manhattan segment")]
    InvalidTrace { start: GridPosition, end: GridPosition },

    #[error("board bookkeeping is inconsistent: {0}")]
    Inconsistent(String),
}

pub type BoardResult<T> = std::result::Result<T, BoardError>;

/// Errors raised while compiling a board into a netlist
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetlistError {
    #[error("no component definition found for '{definition_id}' (component {component})")]
    UnknownDefinition {
        definition_id: String,
        component: ComponentId,
    },

    #[error("component kind {0} has no simulatable netlist mapping")]
    UnsupportedKind(String),

    #[error("component {component} needs {expected} pins for a {kind}, found {found}")]
    PinCountMismatch {
        component: ComponentId,
        kind: String,
        expected: usize,
        found: usize,
    },
}

/// Errors raised while reading a board script
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("unknown label at line {line}: {label}")]
    UnknownLabel { line: usize, label: String },

    #[error("unknown pin '{pin}' on {label} at line {line}")]
    UnknownPin {
        line: usize,
        label: String,
        pin: String,
    },

    #[error("unknown component definition at line {line}: {definition}")]
    UnknownDefinition { line: usize, definition: String },

    #[error("unknown net at line {line}: {net}")]
    UnknownNet { line: usize, net: String },

    #[error("duplicate label at line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },
}
