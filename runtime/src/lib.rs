//! Shell runtime for a browser-hosted terminal.
//!
//! A POSIX-like shell whose processes are cooperative tasks inside one
//! session. Scripts are parsed with `brush-parser`, translated into an
//! arena syntax tree, and executed by a tree-walking interpreter that moves
//! JSON items between devices (FIFOs, variables, the terminal).

pub mod config;
pub mod interactive;
pub mod shell;
pub mod store;

pub use config::ShellConfig;
pub use interactive::{History, ShellToUi, TtyShell, UiToShell};
pub use shell::{ShellError, Session, Sessions};
pub use store::{JsonFileStore, MemoryStore, Store};
