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

//! Component G (part 1): the working-copy projection, `VFILE`.
//!
//! A [`WorkingCopy`] projects one checked-out manifest onto the filesystem:
//! one [`VfileRow`] per file, carrying both the expected content (`rid`) and
//! whatever [`WorkingCopy::check_signatures`] most recently observed on
//! disk.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;
use tracing::instrument;

use crate::error::CoreError;
use crate::error::CoreResult;
use crate::manifest::FileCard;
use crate::manifest::FilePerm;
use crate::store::Rid;
use crate::store::Store;
use crate::time::Timestamp;
use crate::uuid::Uuid;

/// One `VFILE` row: a single path's state relative to the checked-out
/// manifest (`vid`) and, during a merge, relative to the other side
/// (`mrid`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfileRow {
    /// Content expected by the checked-out manifest; `None` only for a
    /// file added to the working copy but not yet committed.
    pub rid: Option<Rid>,
    /// Content from the other side of an in-progress merge.
    pub mrid: Option<Rid>,
    pub origname: Option<String>,
    pub is_exe: bool,
    pub is_link: bool,
    pub changed: bool,
    pub deleted: bool,
    pub mtime: Option<Timestamp>,
}

impl VfileRow {
    fn from_file_card(card: &FileCard, store: &Store) -> Self {
        Self {
            rid: card.uuid.and_then(|uuid| store.rid_of(&uuid)),
            mrid: None,
            origname: card.old_path.clone(),
            is_exe: matches!(card.perm, FilePerm::Executable),
            is_link: matches!(card.perm, FilePerm::Symlink),
            changed: false,
            deleted: false,
            mtime: None,
        }
    }
}

/// The checked-out working copy: one manifest (`vid`) projected onto
/// `root`, tracked path by path.
pub struct WorkingCopy {
    root: PathBuf,
    vid: Uuid,
    files: IndexMap<String, VfileRow>,
}

impl WorkingCopy {
    /// Projects `manifest_files` (the checked-out manifest's `F` cards) onto
    /// `root`, as of manifest `vid`. Every row starts unchanged and
    /// un-deleted; call [`WorkingCopy::check_signatures`] to observe the
    /// filesystem's actual state.
    pub fn new(root: impl Into<PathBuf>, vid: Uuid, manifest_files: &[FileCard], store: &Store) -> Self {
        let files = manifest_files
            .iter()
            .map(|card| (card.path.clone(), VfileRow::from_file_card(card, store)))
            .collect();
        Self {
            root: root.into(),
            vid,
            files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vid(&self) -> Uuid {
        self.vid
    }

    /// Rebases this projection onto a new checked-out manifest, without
    /// touching the filesystem. Callers (commit, update) write or leave the
    /// files that differ and then call this to move the baseline; the next
    /// [`WorkingCopy::check_signatures`] call re-derives `changed`/`deleted`
    /// against the new expectations.
    pub fn rebase_onto(&mut self, vid: Uuid, manifest_files: &[FileCard], store: &Store) {
        self.vid = vid;
        self.files = manifest_files
            .iter()
            .map(|card| (card.path.clone(), VfileRow::from_file_card(card, store)))
            .collect();
    }

    pub fn row(&self, path: &str) -> Option<&VfileRow> {
        self.files.get(path)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &VfileRow)> {
        self.files.iter().map(|(path, row)| (path.as_str(), row))
    }

    pub fn set_row(&mut self, path: impl Into<String>, row: VfileRow) {
        self.files.insert(path.into(), row);
    }

    pub fn remove_row(&mut self, path: &str) -> Option<VfileRow> {
        self.files.shift_remove(path)
    }

    /// Walks every tracked path, comparing on-disk size/mtime/content hash
    /// against what `rid` says it should be. A missing file sets `deleted`;
    /// a content mismatch sets `changed` (spec. §4.G "Signature check").
    /// Must run before any mutating operation.
    #[instrument(skip_all)]
    pub fn check_signatures(&mut self, store: &Store) -> CoreResult<()> {
        for (path, row) in &mut self.files {
            let abs = self.root.join(path);
            match fs::symlink_metadata(&abs) {
                Err(_) => {
                    row.deleted = true;
                    row.changed = false;
                }
                Ok(meta) => {
                    row.deleted = false;
                    row.is_link = meta.file_type().is_symlink();
                    row.is_exe = is_executable(&meta);
                    row.mtime = meta.modified().ok().map(|t| Timestamp::from_datetime(t.into()));

                    let expected = row.rid.and_then(|rid| store.uuid_of(rid));
                    let actual = if row.is_link {
                        fs::read_link(&abs)
                            .ok()
                            .map(|target| Uuid::hash(target.as_os_str().as_encoded_bytes()))
                    } else {
                        fs::read(&abs).ok().map(|content| Uuid::hash(&content))
                    };
                    row.changed = actual != expected;
                }
            }
        }
        Ok(())
    }

    /// Writes `content` to `path` under the working-copy root, creating
    /// parent directories as needed, and records the resulting `rid`.
    pub fn write_file(&mut self, path: &str, content: &[u8], perm: FilePerm, rid: Rid) -> CoreResult<()> {
        let abs = self.root.join(path);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
        }
        fs::write(&abs, content).map_err(|e| CoreError::io(&abs, e))?;
        set_permissions(&abs, perm).map_err(|e| CoreError::io(&abs, e))?;

        let row = self.files.entry(path.to_string()).or_insert_with(|| VfileRow {
            rid: None,
            mrid: None,
            origname: None,
            is_exe: false,
            is_link: false,
            changed: false,
            deleted: false,
            mtime: None,
        });
        row.rid = Some(rid);
        row.is_exe = matches!(perm, FilePerm::Executable);
        row.is_link = matches!(perm, FilePerm::Symlink);
        row.changed = false;
        row.deleted = false;
        Ok(())
    }

    /// Removes `path` from the working-copy directory and its `VFILE` row.
    pub fn remove_file(&mut self, path: &str) -> CoreResult<()> {
        let abs = self.root.join(path);
        match fs::remove_file(&abs) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::io(&abs, e)),
        }
        self.files.shift_remove(path);
        Ok(())
    }
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn set_permissions(path: &Path, perm: FilePerm) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    if matches!(perm, FilePerm::Executable) {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _perm: FilePerm) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::init(dir.path().join("repo")).unwrap();
        (dir, store)
    }

    #[test]
    fn write_then_check_signature_is_unchanged() {
        let (_store_dir, mut store) = new_store();
        let insertion = store.insert(b"hello\n").unwrap();
        let rid = insertion.rid().unwrap();

        let wc_dir = tempfile::tempdir().unwrap();
        let mut wc = WorkingCopy::new(wc_dir.path(), Uuid::hash(b"manifest"), &[], &store);
        wc.write_file("hello.txt", b"hello\n", FilePerm::Regular, rid).unwrap();
        wc.check_signatures(&store).unwrap();

        let row = wc.row("hello.txt").unwrap();
        assert!(!row.changed);
        assert!(!row.deleted);
    }

    #[test]
    fn editing_the_file_sets_changed() {
        let (_store_dir, mut store) = new_store();
        let insertion = store.insert(b"hello\n").unwrap();
        let rid = insertion.rid().unwrap();

        let wc_dir = tempfile::tempdir().unwrap();
        let mut wc = WorkingCopy::new(wc_dir.path(), Uuid::hash(b"manifest"), &[], &store);
        wc.write_file("hello.txt", b"hello\n", FilePerm::Regular, rid).unwrap();
        fs::write(wc_dir.path().join("hello.txt"), b"goodbye\n").unwrap();
        wc.check_signatures(&store).unwrap();

        assert!(wc.row("hello.txt").unwrap().changed);
    }

    #[test]
    fn removing_the_file_sets_deleted() {
        let (_store_dir, mut store) = new_store();
        let insertion = store.insert(b"hello\n").unwrap();
        let rid = insertion.rid().unwrap();

        let wc_dir = tempfile::tempdir().unwrap();
        let mut wc = WorkingCopy::new(wc_dir.path(), Uuid::hash(b"manifest"), &[], &store);
        wc.write_file("hello.txt", b"hello\n", FilePerm::Regular, rid).unwrap();
        fs::remove_file(wc_dir.path().join("hello.txt")).unwrap();
        wc.check_signatures(&store).unwrap();

        assert!(wc.row("hello.txt").unwrap().deleted);
    }

    #[test]
    fn remove_file_deletes_from_disk_and_index() {
        let (_store_dir, mut store) = new_store();
        let insertion = store.insert(b"hello\n").unwrap();
        let rid = insertion.rid().unwrap();

        let wc_dir = tempfile::tempdir().unwrap();
        let mut wc = WorkingCopy::new(wc_dir.path(), Uuid::hash(b"manifest"), &[], &store);
        wc.write_file("hello.txt", b"hello\n", FilePerm::Regular, rid).unwrap();
        wc.remove_file("hello.txt").unwrap();

        assert!(wc.row("hello.txt").is_none());
        assert!(!wc_dir.path().join("hello.txt").exists());
    }
}
