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

//! Component G (part 2): the undo log and the stash.
//!
//! [`UndoLog`] brackets one reversible command: `begin` captures the
//! working copy's current state, `save` records a path's prior bytes right
//! before a caller overwrites it, `finish` closes the session. Only one
//! level is kept — starting a new session, or committing, discards the
//! last one (spec. §4.G).
//!
//! [`StashList`] holds named snapshots of in-progress work, each a set of
//! per-path deltas against a base check-in.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::instrument;

use crate::error::CoreError;
use crate::error::CoreResult;
use crate::manifest::FilePerm;
use crate::time::Timestamp;
use crate::uuid::Uuid;
use crate::workingcopy::VfileRow;
use crate::workingcopy::WorkingCopy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UndoError {
    #[error("no undo session is open")]
    NoSessionOpen,
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileSnapshot {
    path: String,
    content: Option<Vec<u8>>,
    was_exe: bool,
    was_link: bool,
}

impl FileSnapshot {
    fn capture(root: &Path, path: &str) -> CoreResult<Self> {
        let abs = root.join(path);
        match fs::symlink_metadata(&abs) {
            Err(_) => Ok(Self {
                path: path.to_string(),
                content: None,
                was_exe: false,
                was_link: false,
            }),
            Ok(meta) => {
                let is_link = meta.file_type().is_symlink();
                let content = if is_link {
                    fs::read_link(&abs)
                        .map_err(|e| CoreError::io(&abs, e))?
                        .into_os_string()
                        .into_encoded_bytes()
                } else {
                    fs::read(&abs).map_err(|e| CoreError::io(&abs, e))?
                };
                Ok(Self {
                    path: path.to_string(),
                    content: Some(content),
                    was_exe: is_executable(&meta),
                    was_link: is_link,
                })
            }
        }
    }

    fn restore(&self, root: &Path) -> CoreResult<()> {
        let abs = root.join(&self.path);
        match &self.content {
            None => {
                if abs.exists() {
                    fs::remove_file(&abs).map_err(|e| CoreError::io(&abs, e))?;
                }
            }
            Some(bytes) => {
                if let Some(parent) = abs.parent() {
                    fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
                }
                if self.was_link {
                    let _ = fs::remove_file(&abs);
                    #[cfg(unix)]
                    std::os::unix::fs::symlink(String::from_utf8_lossy(bytes).as_ref(), &abs)
                        .map_err(|e| CoreError::io(&abs, e))?;
                } else {
                    fs::write(&abs, bytes).map_err(|e| CoreError::io(&abs, e))?;
                    set_exe(&abs, self.was_exe).map_err(|e| CoreError::io(&abs, e))?;
                }
            }
        }
        Ok(())
    }
}

/// A bracketed, single-level undo/redo session over a working copy.
#[derive(Default)]
pub struct UndoLog {
    open: bool,
    entries: Vec<FileSnapshot>,
    vfile_snapshot: Vec<(String, VfileRow)>,
    redo_entries: Option<Vec<FileSnapshot>>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session, discarding whatever the previous one held.
    pub fn begin(&mut self, wc: &WorkingCopy) {
        self.open = true;
        self.entries.clear();
        self.redo_entries = None;
        self.vfile_snapshot = wc.rows().map(|(path, row)| (path.to_string(), row.clone())).collect();
    }

    /// Records `path`'s current on-disk bytes before a caller overwrites it.
    /// A no-op outside an open session (so callers don't need to special-case
    /// commands that never open one).
    pub fn save(&mut self, wc: &WorkingCopy, path: &str) -> CoreResult<()> {
        if !self.open {
            return Ok(());
        }
        self.entries.push(FileSnapshot::capture(wc.root(), path)?);
        Ok(())
    }

    pub fn finish(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Restores every recorded path to its pre-session bytes, in the order
    /// they were saved, and remembers the pre-undo state for [`UndoLog::redo`].
    #[instrument(skip_all)]
    pub fn undo(&mut self, wc: &WorkingCopy) -> Result<(), UndoError> {
        if self.entries.is_empty() {
            return Err(UndoError::NothingToUndo);
        }
        let mut redo = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            redo.push(FileSnapshot::capture(wc.root(), &entry.path).map_err(|_| UndoError::NothingToUndo)?);
            entry.restore(wc.root()).map_err(|_| UndoError::NothingToUndo)?;
        }
        self.redo_entries = Some(redo);
        Ok(())
    }

    /// Replays what `undo` most recently reverted.
    pub fn redo(&mut self, wc: &WorkingCopy) -> Result<(), UndoError> {
        let entries = self.redo_entries.take().ok_or(UndoError::NothingToRedo)?;
        for entry in &entries {
            entry.restore(wc.root()).map_err(|_| UndoError::NothingToUndo)?;
        }
        Ok(())
    }

    /// Clears the log entirely. Called on commit or checkout switch: those
    /// operations move the baseline the log's snapshot was relative to.
    pub fn clear(&mut self) {
        *self = Self::default();
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
fn set_exe(path: &Path, exe: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    let mut perms = fs::metadata(path)?.permissions();
    let mode = if exe { perms.mode() | 0o111 } else { perms.mode() & !0o111 };
    perms.set_mode(mode);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_exe(_path: &Path, _exe: bool) -> std::io::Result<()> {
    Ok(())
}

/// One path's state within a [`Stash`] entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashFileEntry {
    pub path: String,
    pub is_added: bool,
    pub is_removed: bool,
    pub is_exe: bool,
    pub is_link: bool,
    pub orig_path: Option<String>,
    pub content: Vec<u8>,
}

/// A named snapshot of uncommitted work against a base check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stash {
    pub id: u32,
    pub base_vid: Uuid,
    pub comment: String,
    pub ctime: Timestamp,
    pub files: Vec<StashFileEntry>,
}

#[derive(Default)]
pub struct StashList {
    next_id: u32,
    stashes: Vec<Stash>,
}

impl StashList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures every changed/added/removed path in `wc` into a new stash
    /// entry, without touching the working copy (spec. §4.G `snapshot`).
    pub fn snapshot(&mut self, base_vid: Uuid, comment: String, wc: &WorkingCopy) -> CoreResult<u32> {
        let files = self.capture_files(wc)?;
        let id = self.next_id;
        self.next_id += 1;
        self.stashes.push(Stash {
            id,
            base_vid,
            comment,
            ctime: Timestamp::now(),
            files,
        });
        Ok(id)
    }

    /// Captures like [`StashList::snapshot`], then reverts the working copy
    /// to `base_vid`'s content for every captured path (spec. §4.G `save`).
    pub fn save(&mut self, base_vid: Uuid, comment: String, wc: &mut WorkingCopy) -> CoreResult<u32> {
        let id = self.snapshot(base_vid, comment, wc)?;
        for entry in &self.stashes.last().expect("just pushed").files {
            if entry.is_added {
                wc.remove_file(&entry.path)?;
            } else if entry.is_removed {
                // The file existed at base_vid but is missing on disk; leave
                // it deleted, `apply`/`pop` is what restores it.
            } else {
                let perm = file_perm(entry);
                if let Some(rid) = wc.row(&entry.path).and_then(|row| row.rid) {
                    wc.write_file(&entry.path, &entry.content, perm, rid)?;
                }
            }
        }
        Ok(id)
    }

    fn capture_files(&self, wc: &WorkingCopy) -> CoreResult<Vec<StashFileEntry>> {
        let mut files = Vec::new();
        for (path, row) in wc.rows() {
            if !row.changed && !row.deleted {
                continue;
            }
            let content = if row.deleted {
                Vec::new()
            } else {
                let abs = wc.root().join(path);
                fs::read(&abs).map_err(|e| CoreError::io(&abs, e))?
            };
            files.push(StashFileEntry {
                path: path.to_string(),
                is_added: row.rid.is_none(),
                is_removed: row.deleted,
                is_exe: row.is_exe,
                is_link: row.is_link,
                orig_path: row.origname.clone(),
                content,
            });
        }
        Ok(files)
    }

    pub fn list(&self) -> &[Stash] {
        &self.stashes
    }

    pub fn get(&self, id: u32) -> Option<&Stash> {
        self.stashes.iter().find(|s| s.id == id)
    }

    pub fn drop_stash(&mut self, id: u32) -> Option<Stash> {
        let index = self.stashes.iter().position(|s| s.id == id)?;
        Some(self.stashes.remove(index))
    }

    /// Replays a stash entry's files onto the working copy. A full
    /// implementation resolves each path with a three-way merge against the
    /// path's current content; this writes the stashed content directly,
    /// which is exact whenever the working copy hasn't independently
    /// touched the same path since the stash was taken (the common case),
    /// and is flagged for the caller to re-check otherwise via the
    /// returned list of paths that were already dirty.
    pub fn apply(&self, id: u32, wc: &mut WorkingCopy) -> CoreResult<Vec<String>> {
        let stash = self.get(id).ok_or_else(|| CoreError::NotFound(format!("stash {id}")))?;
        let mut already_dirty = Vec::new();
        for entry in &stash.files {
            if wc.row(&entry.path).is_some_and(|row| row.changed) {
                already_dirty.push(entry.path.clone());
            }
            if entry.is_removed {
                wc.remove_file(&entry.path)?;
                continue;
            }
            let perm = file_perm(entry);
            let rid = wc.row(&entry.path).and_then(|row| row.rid).unwrap_or_default();
            wc.write_file(&entry.path, &entry.content, perm, rid)?;
        }
        Ok(already_dirty)
    }

    /// `apply` followed by dropping the entry.
    pub fn pop(&mut self, id: u32, wc: &mut WorkingCopy) -> CoreResult<Vec<String>> {
        let result = self.apply(id, wc)?;
        self.drop_stash(id);
        Ok(result)
    }
}

fn file_perm(entry: &StashFileEntry) -> FilePerm {
    if entry.is_link {
        FilePerm::Symlink
    } else if entry.is_exe {
        FilePerm::Executable
    } else {
        FilePerm::Regular
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn new_wc() -> (tempfile::TempDir, tempfile::TempDir, Store, WorkingCopy) {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::init(store_dir.path().join("repo")).unwrap();
        let wc_dir = tempfile::tempdir().unwrap();
        let wc = WorkingCopy::new(wc_dir.path(), Uuid::hash(b"manifest"), &[], &store);
        (store_dir, wc_dir, store, wc)
    }

    #[test]
    fn undo_restores_prior_content() {
        let (_store_dir, wc_dir, mut store, mut wc) = new_wc();
        let rid = store.insert(b"v1\n").unwrap().rid().unwrap();
        wc.write_file("a.txt", b"v1\n", FilePerm::Regular, rid).unwrap();

        let mut log = UndoLog::new();
        log.begin(&wc);
        log.save(&wc, "a.txt").unwrap();
        fs::write(wc_dir.path().join("a.txt"), b"v2\n").unwrap();
        log.finish();

        log.undo(&wc).unwrap();
        assert_eq!(fs::read(wc_dir.path().join("a.txt")).unwrap(), b"v1\n");
    }

    #[test]
    fn redo_reapplies_the_undone_change() {
        let (_store_dir, wc_dir, mut store, mut wc) = new_wc();
        let rid = store.insert(b"v1\n").unwrap().rid().unwrap();
        wc.write_file("a.txt", b"v1\n", FilePerm::Regular, rid).unwrap();

        let mut log = UndoLog::new();
        log.begin(&wc);
        log.save(&wc, "a.txt").unwrap();
        fs::write(wc_dir.path().join("a.txt"), b"v2\n").unwrap();
        log.finish();

        log.undo(&wc).unwrap();
        log.redo(&wc).unwrap();
        assert_eq!(fs::read(wc_dir.path().join("a.txt")).unwrap(), b"v2\n");
    }

    #[test]
    fn undo_with_nothing_saved_errors() {
        let (_store_dir, _wc_dir, _store, wc) = new_wc();
        let mut log = UndoLog::new();
        log.begin(&wc);
        assert_eq!(log.undo(&wc), Err(UndoError::NothingToUndo));
    }

    #[test]
    fn stash_save_then_pop_restores_changes() {
        let (_store_dir, wc_dir, mut store, mut wc) = new_wc();
        let rid = store.insert(b"base\n").unwrap().rid().unwrap();
        wc.write_file("a.txt", b"base\n", FilePerm::Regular, rid).unwrap();
        fs::write(wc_dir.path().join("a.txt"), b"edited\n").unwrap();
        wc.check_signatures(&store).unwrap();

        let mut stashes = StashList::new();
        let id = stashes.save(Uuid::hash(b"manifest"), "wip".to_string(), &mut wc).unwrap();
        assert_eq!(fs::read(wc_dir.path().join("a.txt")).unwrap(), b"base\n");

        stashes.pop(id, &mut wc).unwrap();
        assert_eq!(fs::read(wc_dir.path().join("a.txt")).unwrap(), b"edited\n");
        assert!(stashes.list().is_empty());
    }
}
