pub mod board;
pub mod cli;
pub mod commands;
pub mod definitions;
pub mod drc;
pub mod error;
pub mod geometry;
pub mod history;
pub mod netlist;
pub mod script;
pub mod session;

// Re-export commonly used types
pub use board::{BoardEvent, BoardState, ComponentId, NetId, PinReference, TraceId};
pub use commands::{Command, RouteTraceCommand, RouteTraceToNetPointCommand};
pub use definitions::{ComponentKind, DefinitionLibrary, DefinitionProvider};
pub use drc::{DrcChecker, DrcResult};
pub use error::{BoardError, NetlistError, ScriptError};
pub use geometry::{GridPosition, Rotation};
pub use history::CommandHistory;
pub use netlist::{Netlist, NetlistConverter};
pub use session::{Session, SessionConfig};

// Error types
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
