//! Opening the files named by `<` and `>`.

use crate::command::RedirectKind;
use crate::error::ShellError;
use std::fs::{File, OpenOptions};
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::debug;

const CREATE_MODE: u32 = 0o644;

fn open_options(kind: RedirectKind) -> OpenOptions {
    let mut options = OpenOptions::new();
    match kind {
        RedirectKind::Input => options.read(true).append(true).create(true),
        RedirectKind::Output => options.append(true).create(true),
    };
    options.mode(CREATE_MODE);
    options
}

/// Opens `path` for use as a command's standard input or output.
///
/// Input files are opened read-write and created when absent; output files
/// are opened for appending and created when absent. The descriptor is
/// close-on-exec; the launcher duplicates it onto the standard stream.
pub fn open(kind: RedirectKind, path: &Path) -> Result<OwnedFd, ShellError> {
    let file: File = open_options(kind)
        .open(path)
        .map_err(|source| ShellError::Redirect {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(target = %path.display(), kind = kind.symbol(), "opened redirection");
    Ok(OwnedFd::from(file))
}
