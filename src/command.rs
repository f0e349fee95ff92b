use std::path::{Path, PathBuf};

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// Which standard stream a redirection replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `<`: the file becomes the command's standard input.
    Input,
    /// `>`: the command's standard output is appended to the file.
    Output,
}

impl RedirectKind {
    pub fn symbol(self) -> &'static str {
        match self {
            RedirectKind::Input => "<",
            RedirectKind::Output => ">",
        }
    }
}

/// One stage of a pipeline.
///
/// `argv[0]` is the program name. Redirection targets are stored as names
/// only; they are opened when the pipeline is launched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub argv: Vec<String>,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl Command {
    pub fn new(program: &str) -> Self {
        Command {
            argv: vec![program.to_string()],
            ..Default::default()
        }
    }

    pub fn arg(mut self, a: &str) -> Self {
        self.argv.push(a.to_string());
        self
    }

    pub fn args(mut self, v: &[&str]) -> Self {
        self.argv.extend(v.iter().map(|a| a.to_string()));
        self
    }

    pub fn stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    pub fn stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// The program name, or `None` for an empty stage such as the one a
    /// trailing `|` produces.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn arguments(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    pub fn redirect(&self, kind: RedirectKind) -> Option<&Path> {
        match kind {
            RedirectKind::Input => self.input.as_deref(),
            RedirectKind::Output => self.output.as_deref(),
        }
    }

    pub fn has_redirects(&self) -> bool {
        self.input.is_some() || self.output.is_some()
    }

    pub(crate) fn set_redirect(&mut self, kind: RedirectKind, target: PathBuf) {
        match kind {
            RedirectKind::Input => self.input = Some(target),
            RedirectKind::Output => self.output = Some(target),
        }
    }
}

/// Commands connected left to right: stage `i`'s standard output feeds stage
/// `i + 1`'s standard input unless a redirection overrides it.
///
/// A pipeline always holds at least one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    /// Returns `None` when `commands` is empty.
    pub fn new(commands: Vec<Command>) -> Option<Self> {
        if commands.is_empty() {
            None
        } else {
            Some(Pipeline { commands })
        }
    }

    pub fn single(command: Command) -> Self {
        Pipeline {
            commands: vec![command],
        }
    }

    pub(crate) fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn first(&self) -> &Command {
        &self.commands[0]
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_single(&self) -> bool {
        self.commands.len() == 1
    }
}
