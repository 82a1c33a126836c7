//! Shell module - cooperative process runtime over an arena syntax tree
//!
//! Source text is parsed by `brush-parser`, translated into a
//! [`ast::SyntaxTree`] and executed by the interpreter in [`executor`].
//! Processes are local tasks; pipes, variable sinks and the terminal are
//! all [`devices::Device`]s addressed by key from a file-descriptor table.

pub mod ast;
mod braceexpansion;
pub mod commands;
pub mod devices;
mod error;
pub mod executor;
pub mod expand;
mod namespace;
pub mod parser;
pub mod process;
pub mod reconstruct;
pub mod session;
mod testexpr;
pub mod word;

pub use error::{ParseError, ShellError};
pub use executor::run_source;
pub use process::{KillSignal, Pid, Process, ProcessStatus, Signal};
pub use session::{Session, Sessions};
