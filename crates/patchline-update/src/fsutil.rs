//! Filesystem helpers

use camino::Utf8Path;
use std::fs;
use std::io::Write;

use crate::error::{Result, UpdateError};

/// Parent directory of `path`, treating a bare file name as the current dir
pub(crate) fn parent_dir(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}

/// Replace `path` with `contents` by writing a sibling temp file and renaming
/// it over the target. Readers see either the old or the new file.
pub fn write_atomic(path: &Utf8Path, contents: &[u8]) -> Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|e| UpdateError::from_io(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".patchline-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| UpdateError::from_io(dir, e))?;

    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| UpdateError::from_io(dir, e))?;

    tmp.persist(path)
        .map_err(|e| UpdateError::from_io(path, e.error))?;
    Ok(())
}

/// Remove a file, ignoring a missing one
pub fn remove_file_if_exists(path: &Utf8Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpdateError::from_io(path, e)),
    }
}
