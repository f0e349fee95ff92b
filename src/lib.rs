//! A small interactive shell with pipelines, redirections and job control.
//!
//! A line of input is split into tokens, parsed into a [`Pipeline`] of
//! [`Command`]s separated by `|`, with optional `<` / `>` redirections, and
//! executed as one group of operating-system processes. Interactive sessions
//! hand the terminal to that group for the lifetime of the pipeline and take
//! it back afterwards.
//!
//! The main entry point is [`Interpreter`], which owns the session state and
//! runs the read loop. The lower-level pieces are public so they can be used
//! and tested on their own.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod external;
pub mod interpreter;
pub mod job;
pub mod launcher;
pub mod lexer;
pub mod parser;
pub mod redirect;
pub mod session;
mod signal;

pub use command::{Command, ExitCode, Pipeline};
pub use config::Config;
pub use error::{ErrorKind, ShellError};
pub use interpreter::Interpreter;
