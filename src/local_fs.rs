//! Capability-scoped access to local files.
//!
//! Paths are resolved against the directory that contains them so reads and
//! writes go through a `cap_std` [`Dir`] handle rather than ambient `std::fs`
//! calls.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If `HOME` is not set the input is returned unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> Utf8PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return Utf8PathBuf::from(format!("{}/{rest}", home.to_string_lossy()));
    }
    Utf8PathBuf::from(path)
}

/// Reads the whole file at `path`.
pub(crate) fn read_bytes(path: &Utf8Path) -> Result<Vec<u8>, String> {
    let (dir, file) = open_parent(path)?;
    dir.read(file).map_err(|err| err.to_string())
}

/// Reads the file at `path` as UTF-8.
pub(crate) fn read_to_string(path: &Utf8Path) -> Result<String, String> {
    let (dir, file) = open_parent(path)?;
    dir.read_to_string(file).map_err(|err| err.to_string())
}

/// Creates or truncates the file at `path` with `contents`.
pub(crate) fn write_bytes(path: &Utf8Path, contents: &[u8]) -> Result<(), String> {
    let (dir, file) = open_parent(path)?;
    dir.write(file, contents).map_err(|err| err.to_string())
}

fn open_parent(path: &Utf8Path) -> Result<(Dir, &Utf8Path), String> {
    let (dir_path, file_path) = if path.is_absolute() {
        let parent = path
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path}"))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    Ok((dir, file_path))
}
