use crate::command::Command;
use crate::env::Environment;
use crate::error::ShellError;
use std::borrow::Cow;
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Resolve a program name the way the shell launches it.
///
/// Behavior:
/// - A name that is directly accessible as a file (absolute, relative, or a
///   file in the current directory) is returned unchanged.
/// - Otherwise each directory in `search_paths` (PATH) is tried in order as
///   `dir/name`, and the first file found is returned.
/// - Empty names, an unset search path, and names found nowhere resolve to
///   `None`.
pub fn find_command_path<'a>(
    search_paths: Option<&OsStr>,
    path: &'a Path,
) -> Option<Cow<'a, Path>> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if let Some(path) = find_by_path(path) {
        return Some(Cow::Borrowed(path));
    }
    find_in_path(search_paths?, path.as_os_str()).map(Cow::Owned)
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    for dir in std::env::split_paths(search_paths) {
        let path = dir.join(cmd);
        if let Some(path) = find_by_path(&path) {
            return Some(path.to_owned());
        }
    }
    None
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.is_file() { Some(path) } else { None }
}

/// Resolves a program against the environment's `PATH`.
pub fn resolve(env: &Environment, name: &str) -> Result<PathBuf, ShellError> {
    let search_paths = env.get_var("PATH").map(OsStr::new);
    find_command_path(search_paths, Path::new(name))
        .map(Cow::into_owned)
        .ok_or_else(|| ShellError::ProgramNotFound {
            name: name.to_string(),
        })
}

/// An external command with everything `execve` needs already built.
///
/// Preparing happens in the shell before `fork`, so a forked child never
/// allocates or has to report a resolution failure.
#[derive(Debug)]
pub struct Program {
    pub name: String,
    pub path: CString,
    pub argv: Vec<CString>,
    pub envp: Vec<CString>,
    /// Written by the child to stderr when `execve` returns.
    pub exec_failure_message: Vec<u8>,
}

impl Program {
    pub fn prepare(command: &Command, env: &Environment) -> Result<Program, ShellError> {
        let name = command.program().ok_or(ShellError::EmptyCommand)?;
        let path = resolve(env, name)?;

        let invalid = || ShellError::InvalidArgument {
            name: name.to_string(),
        };
        let path = CString::new(path.as_os_str().as_bytes()).map_err(|_| invalid())?;
        let argv = command
            .argv
            .iter()
            .map(|a| CString::new(a.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        let envp = env
            .vars
            .iter()
            .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
            .collect();

        Ok(Program {
            name: name.to_string(),
            exec_failure_message: format!("ish: {name}: cannot execute\n").into_bytes(),
            path,
            argv,
            envp,
        })
    }
}
