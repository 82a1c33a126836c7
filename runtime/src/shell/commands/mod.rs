//! Builtin commands.
//!
//! Builtins receive their fully expanded argv and a [`CommandContext`] for
//! the process they run in. They write items to fd 1, read from fd 0, and
//! return an exit code; failures are returned as [`ShellError`]s and
//! reported by the executor. Every builtin answers `--help`.
//!
//! Uses `lexopt` for minimal argument parsing in the busybox style.

mod core;
mod proc;
mod vars;

pub use self::core::CoreCommands;
pub use self::proc::ProcCommands;
pub use self::vars::VarCommands;

use super::devices::{Item, ReadOpts, ReadResult};
use super::error::ShellError;
use super::executor::Frame;
use super::process::Process;
use super::session::Session;
use std::rc::Rc;

/// Builtin function type. Takes argv (including the command name) and the
/// calling context; resolves to an exit code.
pub type BuiltinFn =
    fn(args: Vec<String>, ctx: CommandContext) -> futures_lite::future::BoxedLocal<Result<i32, ShellError>>;

/// Create a lexopt parser over the arguments after the command name.
pub fn make_parser(args: &[String]) -> lexopt::Parser {
    lexopt::Parser::from_args(args.iter().skip(1).cloned())
}

/// Turn a lexopt failure into a usage error for `name`.
pub fn usage_error(name: &str, err: lexopt::Error) -> ShellError {
    ShellError::command(format!("{}: {}", name, err), 2)
}

/// Everything a builtin can touch: its process, its session and its fds.
#[derive(Clone)]
pub struct CommandContext {
    frame: Frame,
}

impl CommandContext {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn session(&self) -> &Rc<Session> {
        &self.frame.session
    }

    pub fn process(&self) -> &Rc<Process> {
        &self.frame.process
    }

    /// Write one item to stdout.
    pub async fn write(&self, item: Item) -> Result<(), ShellError> {
        self.frame.write(1, item).await
    }

    pub async fn write_text(&self, text: impl Into<String>) -> Result<(), ShellError> {
        self.write(Item::text(text)).await
    }

    pub async fn read(&self, opts: ReadOpts) -> Result<ReadResult, ShellError> {
        self.frame.read(0, opts).await
    }

    /// Report a non-fatal problem on stderr and keep going.
    pub async fn warn(&self, message: impl Into<String>) {
        self.frame
            .report(&ShellError::command(message, 1))
            .await;
    }
}

/// Unified builtin table.
///
/// Dispatches to each category in order; the first match wins.
pub struct ShellCommands;

impl ShellCommands {
    pub fn get_command(name: &str) -> Option<BuiltinFn> {
        CoreCommands::get_command(name)
            .or_else(|| VarCommands::get_command(name))
            .or_else(|| ProcCommands::get_command(name))
    }

    pub fn show_help(name: &str) -> Option<&'static str> {
        CoreCommands::show_help(name)
            .or_else(|| VarCommands::show_help(name))
            .or_else(|| ProcCommands::show_help(name))
    }

    pub fn list_commands() -> Vec<&'static str> {
        let mut cmds = Vec::new();
        cmds.extend_from_slice(CoreCommands::list_commands());
        cmds.extend_from_slice(VarCommands::list_commands());
        cmds.extend_from_slice(ProcCommands::list_commands());
        cmds.sort();
        cmds
    }

    /// `(name, description)` for every builtin, sorted by name.
    pub fn describe() -> Vec<(&'static str, &'static str)> {
        let mut all = Vec::new();
        all.extend_from_slice(CoreCommands::describe());
        all.extend_from_slice(VarCommands::describe());
        all.extend_from_slice(ProcCommands::describe());
        all.sort();
        all
    }
}
