//! The sensor marker filesystem contract (§3, §4.1).
//!
//! A flat directory of zero-length files. Presence of a file named after a
//! sensor signals something to external tooling; the core only ever
//! creates or removes these files, never reads them back.

use std::{fs, io, path::Path};

/// Create an empty marker file at `path`, truncating it if it already exists.
///
/// # Errors
///
/// Returns an error if the file cannot be created (e.g. the containing
/// directory does not exist).
pub fn touch(path: &Path) -> io::Result<()> {
    fs::File::create(path)?;
    Ok(())
}

/// Remove the marker file at `path` if it exists. A missing file is not an
/// error.
///
/// # Errors
///
/// Returns an error if the file exists but could not be removed.
pub fn unlink(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Test whether a marker file is present.
#[must_use]
pub fn exists(path: &Path) -> bool {
    path.is_file()
}
