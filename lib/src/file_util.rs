// Copyright 2024 The Warren Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Filesystem helpers shared by the store, working copy, and rebuilder.

use std::fs;
use std::io;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tempfile::PersistError;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("cannot access {path}: {source}")]
pub struct PathError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

pub trait IoResultExt<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError> {
        self.map_err(|error| PathError {
            path: path.as_ref().to_path_buf(),
            source: error,
        })
    }
}

/// Creates a directory or does nothing if it already exists.
pub fn create_or_reuse_dir(dirname: &Path) -> io::Result<()> {
    match fs::create_dir_all(dirname) {
        Ok(()) => Ok(()),
        Err(_) if dirname.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Consumes as much `.` and `..` as possible without touching the
/// filesystem (no symlink resolution). Used to canonicalize repository
/// paths read off the command line before they're validated as `F` card
/// paths (spec. §4.C: "no `..`, no leading `/`").
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir
                if matches!(result.components().next_back(), Some(Component::Normal(_))) =>
            {
                let popped = result.pop();
                assert!(popped);
            }
            _ => result.push(c),
        }
    }
    if result.as_os_str().is_empty() {
        ".".into()
    } else {
        result
    }
}

/// Persists a temporary file at `new_path`, refusing to silently clobber an
/// existing file: the content-addressed store never needs to overwrite an
/// existing blob (insertion is content-addressed and deduplicating), so a
/// collision here indicates the blob was already written by a concurrent
/// writer and the existing file is kept as-is.
pub fn persist_content_addressed_temp_file<P: AsRef<Path>>(
    temp_file: NamedTempFile,
    new_path: P,
) -> io::Result<()> {
    temp_file.as_file().sync_data()?;
    match temp_file.persist_noclobber(&new_path) {
        Ok(_file) => Ok(()),
        Err(PersistError { error, file: _ }) if new_path.as_ref().is_file() => {
            let _ = error;
            Ok(())
        }
        Err(PersistError { error, file: _ }) => Err(error),
    }
}

/// Persists a temporary file at `new_path`, replacing whatever is there.
/// Used for the catalog and for blob files that a `deltify`/`sweep` pass
/// legitimately rewrites in place — unlike
/// [`persist_content_addressed_temp_file`], collisions here are expected.
pub fn persist_content_addressed_temp_file_overwrite<P: AsRef<Path>>(
    temp_file: NamedTempFile,
    new_path: P,
) -> io::Result<()> {
    temp_file.as_file().sync_data()?;
    temp_file.persist(&new_path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn normalize_collapses_dot_dot() {
        assert_eq!(normalize_path(Path::new("foo/..")), Path::new("."));
        assert_eq!(normalize_path(Path::new("foo/../bar")), Path::new("bar"));
        assert_eq!(normalize_path(Path::new("./foo/./bar")), Path::new("foo/bar"));
    }

    #[test]
    fn persist_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("blob");
        let mut temp = NamedTempFile::new_in(&dir).unwrap();
        temp.write_all(b"contents").unwrap();
        persist_content_addressed_temp_file(temp, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"contents");
    }

    #[test]
    fn persist_existing_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("blob");
        fs::write(&target, b"contents").unwrap();

        let mut temp = NamedTempFile::new_in(&dir).unwrap();
        temp.write_all(b"contents").unwrap();
        persist_content_addressed_temp_file(temp, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"contents");
    }
}
