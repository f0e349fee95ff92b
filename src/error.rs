use crate::parser::ParseError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Broad class of a [`ShellError`], used to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed line; the line is discarded.
    Parse,
    /// A program could not be found; that stage does not run.
    Resolution,
    /// A pipe, descriptor or redirection target could not be set up.
    Resource,
    /// Process creation, waiting or terminal control failed.
    Spawn,
    /// A builtin was used where builtins are not supported.
    Builtin,
}

/// Everything that can go wrong while processing one input line.
///
/// None of these terminate the shell; the read loop reports them and moves on
/// to the next line.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{name}: command not found")]
    ProgramNotFound { name: String },

    #[error("empty command in pipeline")]
    EmptyCommand,

    #[error("{name}: argument contains a NUL byte")]
    InvalidArgument { name: String },

    #[error("{path}: {source}")]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create pipe: {0}")]
    Pipe(#[source] nix::Error),

    #[error("failed to create new process: {0}")]
    Spawn(#[source] nix::Error),

    #[error("failed to wait for child process: {0}")]
    Wait(#[source] nix::Error),

    #[error("terminal control failed: {0}")]
    Terminal(#[source] nix::Error),

    #[error("{name}: builtins cannot be part of a pipeline")]
    BuiltinInPipeline { name: String },
}

impl ShellError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShellError::Parse(_) => ErrorKind::Parse,
            ShellError::ProgramNotFound { .. }
            | ShellError::EmptyCommand
            | ShellError::InvalidArgument { .. } => ErrorKind::Resolution,
            ShellError::Redirect { .. } | ShellError::Pipe(_) => ErrorKind::Resource,
            ShellError::Spawn(_) | ShellError::Wait(_) | ShellError::Terminal(_) => {
                ErrorKind::Spawn
            }
            ShellError::BuiltinInPipeline { .. } => ErrorKind::Builtin,
        }
    }
}
