//! Error taxonomy for parsing and execution.

use super::process::KillSignal;
use thiserror::Error;

/// Errors raised while executing a tree.
///
/// Only [`ShellError::Kill`] unwinds past the command that raised it; the
/// other variants are reported to the terminal and become an exit code.
#[derive(Debug, Clone, Error)]
pub enum ShellError {
    /// User-facing failure with an exit code attached.
    #[error("{message}")]
    Command { message: String, code: i32 },

    /// Kill signal unwinding towards its absorbing frame.
    #[error("{0}")]
    Kill(KillSignal),

    /// Syntax or construct the runtime does not implement.
    #[error("{what}: not supported")]
    Unsupported { what: String, code: i32 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ShellError {
    pub fn command(message: impl Into<String>, code: i32) -> Self {
        ShellError::Command {
            message: message.into(),
            code,
        }
    }

    pub fn unsupported(what: impl Into<String>, code: i32) -> Self {
        ShellError::Unsupported {
            what: what.into(),
            code,
        }
    }

    /// Exit code this error is absorbed as.
    pub fn code(&self) -> i32 {
        match self {
            ShellError::Command { code, .. } => *code,
            ShellError::Kill(signal) => signal.exit_code(),
            ShellError::Unsupported { code, .. } => *code,
            ShellError::Internal(_) => 2,
        }
    }

    pub fn is_kill(&self) -> bool {
        matches!(self, ShellError::Kill(_))
    }
}

/// Outcome of parsing source text that did not produce a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Source is a proper prefix of some complete command.
    #[error("incomplete input")]
    Incomplete,

    #[error("syntax error: {0}")]
    Syntax(String),
}
