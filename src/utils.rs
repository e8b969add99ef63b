use std::path::{Path, PathBuf};

use crate::SquashfsError;

/// Joins raw directory entry names onto a parent path.
///
/// Names are used as stored, with no normalization, except that empty
/// names, "." and "..", and names holding '/' or NUL are refused: joined
/// verbatim they would name the parent, an ancestor, or (for a leading '/')
/// replace the parent path entirely.
pub trait JoinEntryName {
    /// Append a raw directory entry name as a single path segment.
    fn join_entry(&self, name: &[u8]) -> Result<PathBuf, SquashfsError>;
}

impl JoinEntryName for Path {
    fn join_entry(&self, name: &[u8]) -> Result<PathBuf, SquashfsError> {
        if name.is_empty() || name == b"." || name == b".." || name.contains(&b'/') || name.contains(&0) {
            return Err(SquashfsError::InvalidEntryName(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }

        Ok(self.join(segment(name)))
    }
}

#[cfg(unix)]
fn segment(name: &[u8]) -> PathBuf {
    use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

    PathBuf::from(OsStr::from_bytes(name))
}

#[cfg(not(unix))]
fn segment(name: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(name).into_owned())
}
