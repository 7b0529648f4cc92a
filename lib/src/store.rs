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

//! Component B: the content-addressed artifact store.
//!
//! `BLOB`, `DELTA`, `SHUN`, and `PRIVATE` (spec. §3) are kept as an
//! in-memory catalog, persisted as one `bincode`-encoded file, while the
//! artifact bytes themselves live one-file-per-[`Rid`] under `blobs/` —
//! the same content-addressed-directory idiom the teacher's `SimpleBackend`
//! uses, minus the protobuf envelope (this crate's artifacts are already
//! byte sequences, not structured objects that need an encoding).

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;
use tracing::instrument;

use crate::blob;
use crate::delta;
use crate::error::CoreError;
use crate::error::CoreResult;
use crate::file_util;
use crate::time::Timestamp;
use crate::uuid::Uuid;

/// Dense local integer identifying a row in the `BLOB` table.
pub type Rid = u32;

/// Default threshold for delta-vs-raw storage: a delta is used only if it
/// is smaller than this fraction of the raw content (spec. §4.B).
pub const DEFAULT_SIZE_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Storage {
    Raw,
    Delta { srcid: Rid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobRow {
    uuid: Uuid,
    /// `-1` marks a phantom: referenced but not yet stored.
    size: i64,
    storage: Storage,
}

impl BlobRow {
    fn is_phantom(&self) -> bool {
        self.size < 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShunEntry {
    mtime: Timestamp,
    comment: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    blobs: HashMap<Rid, BlobRow>,
    uuid_to_rid: HashMap<Uuid, Rid>,
    delta_children: HashMap<Rid, Vec<Rid>>,
    shun: HashMap<Uuid, ShunEntry>,
    private: HashSet<Rid>,
    next_rid: Rid,
}

/// Outcome of [`Store::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// A brand new row was created.
    Inserted(Rid),
    /// The content already existed; its existing rid is returned
    /// (spec. §4.B step 2, content-addressed deduplication).
    Deduplicated(Rid),
    /// The content's UUID is listed in `SHUN`; nothing was stored
    /// (spec. §4.B step 1).
    Shunned,
}

impl Insertion {
    pub fn rid(self) -> Option<Rid> {
        match self {
            Self::Inserted(rid) | Self::Deduplicated(rid) => Some(rid),
            Self::Shunned => None,
        }
    }
}

/// Report produced by [`Store::sweep`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<Rid>,
    pub rematerialized: Vec<Rid>,
}

pub struct Store {
    root: PathBuf,
    catalog: Catalog,
    size_ratio: f64,
}

impl Store {
    /// Creates a new, empty store rooted at `root`, which must not already
    /// contain a catalog.
    pub fn init(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = root.into();
        file_util::create_or_reuse_dir(&root).map_err(|e| CoreError::io(&root, e))?;
        file_util::create_or_reuse_dir(&root.join("blobs")).map_err(|e| CoreError::io(&root, e))?;
        let store = Self {
            root,
            catalog: Catalog::default(),
            size_ratio: DEFAULT_SIZE_RATIO,
        };
        store.save_catalog()?;
        Ok(store)
    }

    /// Opens a store previously created with [`Store::init`].
    #[instrument(skip_all)]
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = path.into();
        let catalog_path = root.join("catalog.bin");
        let bytes = fs::read(&catalog_path).map_err(|e| CoreError::io(&catalog_path, e))?;
        let (catalog, _): (Catalog, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| CoreError::Corrupt(format!("catalog.bin is unreadable: {e}")))?;
        debug!(blobs = catalog.blobs.len(), "opened store");
        Ok(Self {
            root,
            catalog,
            size_ratio: DEFAULT_SIZE_RATIO,
        })
    }

    pub fn with_size_ratio(mut self, ratio: f64) -> Self {
        self.size_ratio = ratio;
        self
    }

    fn save_catalog(&self) -> CoreResult<()> {
        let path = self.root.join("catalog.bin");
        let bytes = bincode::serde::encode_to_vec(&self.catalog, bincode::config::standard())
            .expect("catalog serialization is infallible");
        let mut temp = NamedTempFile::new_in(&self.root).map_err(|e| CoreError::io(&self.root, e))?;
        std::io::Write::write_all(&mut temp, &bytes).map_err(|e| CoreError::io(&path, e))?;
        file_util::persist_content_addressed_temp_file_overwrite(temp, &path)
            .map_err(|e| CoreError::io(&path, e))
    }

    fn blob_path(&self, rid: Rid) -> PathBuf {
        self.root.join("blobs").join(rid.to_string())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rid_of(&self, uuid: &Uuid) -> Option<Rid> {
        self.catalog.uuid_to_rid.get(uuid).copied()
    }

    pub fn uuid_of(&self, rid: Rid) -> Option<Uuid> {
        self.catalog.blobs.get(&rid).map(|b| b.uuid)
    }

    pub fn is_shunned(&self, uuid: &Uuid) -> bool {
        self.catalog.shun.contains_key(uuid)
    }

    pub fn is_phantom(&self, rid: Rid) -> bool {
        self.catalog.blobs.get(&rid).is_some_and(BlobRow::is_phantom)
    }

    pub fn is_private(&self, rid: Rid) -> bool {
        self.catalog.private.contains(&rid)
    }

    pub fn mark_private(&mut self, rid: Rid) {
        self.catalog.private.insert(rid);
    }

    /// All rids currently in the catalog, in ascending (insertion) order —
    /// the order the rebuilder's first pass wants (non-delta rows first is
    /// the caller's responsibility; see [`Store::is_delta`]).
    pub fn all_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.catalog.blobs.keys().copied().collect();
        rids.sort_unstable();
        rids
    }

    pub fn is_delta(&self, rid: Rid) -> bool {
        matches!(
            self.catalog.blobs.get(&rid).map(|b| b.storage),
            Some(Storage::Delta { .. })
        )
    }

    /// Registers a UUID that is referenced but whose bytes have not arrived
    /// yet (spec. §3 "phantom"). A no-op if the UUID is already known.
    pub fn insert_phantom(&mut self, uuid: Uuid) -> Rid {
        if let Some(&rid) = self.catalog.uuid_to_rid.get(&uuid) {
            return rid;
        }
        let rid = self.next_rid();
        self.catalog.blobs.insert(
            rid,
            BlobRow {
                uuid,
                size: -1,
                storage: Storage::Raw,
            },
        );
        self.catalog.uuid_to_rid.insert(uuid, rid);
        rid
    }

    fn next_rid(&mut self) -> Rid {
        let rid = self.catalog.next_rid;
        self.catalog.next_rid += 1;
        rid
    }

    /// Inserts `content`, choosing delta or raw storage per spec. §4.B.
    #[instrument(skip(self, content), fields(len = content.len()))]
    pub fn insert(&mut self, content: &[u8]) -> CoreResult<Insertion> {
        let uuid = Uuid::hash(content);
        if self.is_shunned(&uuid) {
            return Ok(Insertion::Shunned);
        }
        if let Some(&rid) = self.catalog.uuid_to_rid.get(&uuid) {
            if !self.catalog.blobs[&rid].is_phantom() {
                return Ok(Insertion::Deduplicated(rid));
            }
            // A phantom: fill it in below instead of allocating a new rid.
            self.store_bytes(rid, &uuid, content)?;
            self.save_catalog()?;
            return Ok(Insertion::Inserted(rid));
        }

        let rid = self.next_rid();
        self.catalog.uuid_to_rid.insert(uuid, rid);
        self.catalog.blobs.insert(
            rid,
            BlobRow {
                uuid,
                size: 0,
                storage: Storage::Raw,
            },
        );
        self.store_bytes(rid, &uuid, content)?;
        self.save_catalog()?;
        Ok(Insertion::Inserted(rid))
    }

    /// Chooses and writes the storage representation for `content`, which is
    /// already registered in the catalog under `rid`/`uuid`.
    fn store_bytes(&mut self, rid: Rid, uuid: &Uuid, content: &[u8]) -> CoreResult<()> {
        let base = self.best_delta_base(content);
        match base {
            Some((srcid, delta_bytes)) => {
                self.write_blob_file(rid, &delta_bytes)?;
                self.catalog.delta_children.entry(srcid).or_default().push(rid);
                self.catalog.blobs.insert(
                    rid,
                    BlobRow {
                        uuid: *uuid,
                        size: content.len() as i64,
                        storage: Storage::Delta { srcid },
                    },
                );
            }
            None => {
                let compressed = blob::compress(content);
                self.write_blob_file(rid, &compressed)?;
                self.catalog.blobs.insert(
                    rid,
                    BlobRow {
                        uuid: *uuid,
                        size: content.len() as i64,
                        storage: Storage::Raw,
                    },
                );
            }
        }
        Ok(())
    }

    /// Finds the smallest delta against any existing non-delta artifact that
    /// beats `size_ratio`. Scans raw blobs only: deltifying against another
    /// delta would require an extra chain hop on every future read for no
    /// benefit, so a delta's source is always a raw artifact.
    fn best_delta_base(&self, content: &[u8]) -> Option<(Rid, Vec<u8>)> {
        let threshold = (content.len() as f64 * self.size_ratio) as usize;
        let mut best: Option<(Rid, Vec<u8>)> = None;
        for (&rid, row) in &self.catalog.blobs {
            if row.is_phantom() || matches!(row.storage, Storage::Delta { .. }) {
                continue;
            }
            let Ok(candidate) = self.read(rid) else {
                continue;
            };
            let estimate = delta::encoded_len(&candidate, content);
            if estimate >= threshold {
                continue;
            }
            if best.as_ref().is_none_or(|(_, d)| estimate < d.len()) {
                best = Some((rid, delta::encode(&candidate, content)));
            }
        }
        best
    }

    fn write_blob_file(&self, rid: Rid, bytes: &[u8]) -> CoreResult<()> {
        let path = self.blob_path(rid);
        let mut temp = NamedTempFile::new_in(&self.root).map_err(|e| CoreError::io(&path, e))?;
        std::io::Write::write_all(&mut temp, bytes).map_err(|e| CoreError::io(&path, e))?;
        file_util::persist_content_addressed_temp_file_overwrite(temp, &path)
            .map_err(|e| CoreError::io(&path, e))
    }

    /// Reconstructs the bytes of `rid`: walks the delta chain to a
    /// non-delta base, iteratively (never recursively, per spec. §4.B and
    /// §9), then applies each delta base-to-`rid`.
    #[instrument(skip(self))]
    pub fn read(&self, rid: Rid) -> CoreResult<Vec<u8>> {
        let row = self.row(rid)?;
        if row.is_phantom() {
            return Err(CoreError::Phantom(row.uuid));
        }

        let mut chain = vec![rid];
        let mut cursor = rid;
        loop {
            match self.row(cursor)?.storage {
                Storage::Raw => break,
                Storage::Delta { srcid } => {
                    chain.push(srcid);
                    cursor = srcid;
                }
            }
        }

        let base_rid = *chain.last().unwrap();
        let base_bytes = self.read_raw(base_rid)?;
        let mut current = base_bytes;
        for &step_rid in chain.iter().rev().skip(1) {
            let delta_bytes = self.read_blob_file(step_rid)?;
            current = delta::apply(&delta_bytes, &current)
                .map_err(|e| CoreError::Corrupt(format!("rid {step_rid}: {e}")))?;
        }
        Ok(current)
    }

    fn read_raw(&self, rid: Rid) -> CoreResult<Vec<u8>> {
        let compressed = self.read_blob_file(rid)?;
        blob::uncompress(&compressed)
            .map_err(|e| CoreError::Corrupt(format!("rid {rid} failed to inflate: {e}")))
    }

    fn read_blob_file(&self, rid: Rid) -> CoreResult<Vec<u8>> {
        let path = self.blob_path(rid);
        fs::read(&path).map_err(|e| CoreError::io(&path, e))
    }

    fn row(&self, rid: Rid) -> CoreResult<&BlobRow> {
        self.catalog
            .blobs
            .get(&rid)
            .ok_or_else(|| CoreError::Corrupt(format!("no BLOB row for rid {rid}")))
    }

    /// Re-encodes `rid` as a delta against `srcid`. No-op (returns `false`)
    /// if doing so would not shrink the artifact, or if it would create a
    /// cycle.
    pub fn deltify(&mut self, rid: Rid, srcid: Rid) -> CoreResult<bool> {
        if rid == srcid || self.creates_cycle(rid, srcid) {
            return Ok(false);
        }
        let current = self.read(rid)?;
        let current_len = self.read_blob_file(rid)?.len();
        let source = self.read(srcid)?;
        let candidate = delta::encode(&source, &current);
        if candidate.len() >= current_len {
            return Ok(false);
        }
        self.write_blob_file(rid, &candidate)?;
        if let Some(row) = self.catalog.blobs.get_mut(&rid) {
            row.storage = Storage::Delta { srcid };
        }
        self.catalog.delta_children.entry(srcid).or_default().push(rid);
        self.save_catalog()?;
        Ok(true)
    }

    fn creates_cycle(&self, rid: Rid, proposed_src: Rid) -> bool {
        let mut cursor = proposed_src;
        loop {
            if cursor == rid {
                return true;
            }
            match self.catalog.blobs.get(&cursor).map(|b| b.storage) {
                Some(Storage::Delta { srcid }) => cursor = srcid,
                _ => return false,
            }
        }
    }

    /// Lists `SHUN` entries.
    pub fn shunned(&self) -> impl Iterator<Item = (&Uuid, &Timestamp)> {
        self.catalog.shun.iter().map(|(u, e)| (u, &e.mtime))
    }

    /// Adds `uuid` to `SHUN` (idempotent). Takes effect at the next
    /// [`Store::sweep`].
    pub fn shun(&mut self, uuid: Uuid, mtime: Timestamp, comment: String) -> CoreResult<()> {
        self.catalog.shun.entry(uuid).or_insert(ShunEntry { mtime, comment });
        self.save_catalog()
    }

    /// `deconstruct [--prefixlength N] DIR` (spec. §6): writes every
    /// non-shunned, non-phantom artifact's *reconstructed* (delta-resolved,
    /// decompressed) bytes to `dir`, one file per artifact named by its
    /// UUID, split into a prefix subdirectory of `prefix_len` hex digits so
    /// a large store doesn't put millions of files in one directory.
    /// Returns the number of artifacts written.
    #[instrument(skip(self), fields(prefix_len = prefix_len))]
    pub fn deconstruct(&self, dir: impl AsRef<Path>, prefix_len: usize) -> CoreResult<usize> {
        let dir = dir.as_ref();
        file_util::create_or_reuse_dir(dir).map_err(|e| CoreError::io(dir, e))?;
        let mut count = 0;
        for rid in self.all_rids() {
            if self.is_phantom(rid) {
                continue;
            }
            let Some(uuid) = self.uuid_of(rid) else { continue };
            let hex = uuid.hex();
            let (prefix, rest) = hex.split_at(prefix_len.min(hex.len()));
            let out_dir = dir.join(prefix);
            file_util::create_or_reuse_dir(&out_dir).map_err(|e| CoreError::io(&out_dir, e))?;
            let content = self.read(rid)?;
            fs::write(out_dir.join(rest), &content).map_err(|e| CoreError::io(&out_dir.join(rest), e))?;
            count += 1;
        }
        Ok(count)
    }

    /// `reconstruct FILE DIR` (spec. §6): the inverse of
    /// [`Store::deconstruct`]. Walks `dir` (any depth of prefix
    /// subdirectories), treats every regular file's content as one
    /// artifact, and inserts it with [`Store::insert`] — rebuilding the
    /// UUID-keyed filename from the bytes themselves rather than trusting
    /// the directory layout, so a tree produced with a different
    /// `prefix_len` still reconstructs correctly. Returns the number of
    /// artifacts inserted (dedup'd and shunned artifacts are not counted).
    #[instrument(skip(self))]
    pub fn reconstruct(&mut self, dir: impl AsRef<Path>) -> CoreResult<usize> {
        let mut count = 0;
        let mut stack = vec![dir.as_ref().to_path_buf()];
        while let Some(current) = stack.pop() {
            let entries = fs::read_dir(&current).map_err(|e| CoreError::io(&current, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| CoreError::io(&current, e))?;
                let path = entry.path();
                let file_type = entry.file_type().map_err(|e| CoreError::io(&path, e))?;
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                let content = fs::read(&path).map_err(|e| CoreError::io(&path, e))?;
                if matches!(self.insert(&content)?, Insertion::Inserted(_)) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Deletes `BLOB`/`DELTA` rows for every shunned UUID, re-materializing
    /// any children that were deltas against a removed base as raw content
    /// first (spec. §4.B "Sweep / re-delta").
    #[instrument(skip(self))]
    pub fn sweep(&mut self) -> CoreResult<SweepReport> {
        let mut report = SweepReport::default();
        let shunned_rids: Vec<Rid> = self
            .catalog
            .uuid_to_rid
            .iter()
            .filter(|(uuid, _)| self.catalog.shun.contains_key(uuid))
            .map(|(_, &rid)| rid)
            .collect();

        for &rid in &shunned_rids {
            for &child in self.catalog.delta_children.get(&rid).cloned().unwrap_or_default().iter() {
                if shunned_rids.contains(&child) {
                    continue;
                }
                let bytes = self.read(child)?;
                let compressed = blob::compress(&bytes);
                self.write_blob_file(child, &compressed)?;
                if let Some(row) = self.catalog.blobs.get_mut(&child) {
                    row.storage = Storage::Raw;
                    row.size = bytes.len() as i64;
                }
                report.rematerialized.push(child);
            }
        }

        for &rid in &shunned_rids {
            let path = self.blob_path(rid);
            let _ = fs::remove_file(&path);
            if let Some(row) = self.catalog.blobs.remove(&rid) {
                self.catalog.uuid_to_rid.remove(&row.uuid);
            }
            self.catalog.delta_children.remove(&rid);
            self.catalog.private.remove(&rid);
            report.removed.push(rid);
        }

        self.save_catalog()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_then_read_roundtrips() {
        let (_dir, mut store) = open_temp();
        let ins = store.insert(b"hello world").unwrap();
        let rid = ins.rid().unwrap();
        assert_eq!(store.read(rid).unwrap(), b"hello world");
    }

    #[test]
    fn duplicate_insert_deduplicates() {
        let (_dir, mut store) = open_temp();
        let a = store.insert(b"same bytes").unwrap();
        let b = store.insert(b"same bytes").unwrap();
        assert_eq!(a.rid(), b.rid());
        assert!(matches!(b, Insertion::Deduplicated(_)));
    }

    #[test]
    fn second_similar_insert_is_delta_and_still_reads_correctly() {
        let (_dir, mut store) = open_temp();
        let v1 = store.insert(b"hello\n").unwrap().rid().unwrap();
        let v2 = store.insert(b"hello world\n").unwrap().rid().unwrap();
        assert_eq!(store.read(v2).unwrap(), b"hello world\n");
        let _ = v1;
    }

    #[test]
    fn shun_then_sweep_rematerializes_children() {
        let (_dir, mut store) = open_temp();
        let v1 = store.insert(b"hello\n").unwrap().rid().unwrap();
        let v2 = store.insert(b"hello world\n").unwrap().rid().unwrap();

        let uuid1 = store.uuid_of(v1).unwrap();
        store.shun(uuid1, Timestamp::now(), "cleanup".into()).unwrap();
        store.sweep().unwrap();

        assert!(store.rid_of(&uuid1).is_none());
        assert_eq!(store.read(v2).unwrap(), b"hello world\n");
    }

    #[test]
    fn insert_of_shunned_content_is_refused() {
        let (_dir, mut store) = open_temp();
        let uuid = Uuid::hash(b"forbidden");
        store.shun(uuid, Timestamp::now(), "test".into()).unwrap();
        let result = store.insert(b"forbidden").unwrap();
        assert_eq!(result, Insertion::Shunned);
    }

    #[test]
    fn phantom_then_real_content_converts_row() {
        let (_dir, mut store) = open_temp();
        let uuid = Uuid::hash(b"arrives later");
        let rid = store.insert_phantom(uuid);
        assert!(store.is_phantom(rid));
        assert!(matches!(store.read(rid), Err(CoreError::Phantom(_))));

        let ins = store.insert(b"arrives later").unwrap();
        assert_eq!(ins.rid(), Some(rid));
        assert!(!store.is_phantom(rid));
        assert_eq!(store.read(rid).unwrap(), b"arrives later");
    }

    #[test]
    fn deconstruct_then_reconstruct_round_trips_all_content() {
        let (_dir, mut store) = open_temp();
        store.insert(b"hello\n").unwrap();
        store.insert(b"hello world\n").unwrap();
        store.insert(b"goodbye\n").unwrap();

        let dump_dir = tempfile::tempdir().unwrap();
        let written = store.deconstruct(dump_dir.path(), 2).unwrap();
        assert_eq!(written, 3);

        let (_dir2, mut fresh) = open_temp();
        let inserted = fresh.reconstruct(dump_dir.path()).unwrap();
        assert_eq!(inserted, 3);
        assert!(fresh.rid_of(&Uuid::hash(b"hello\n")).is_some());
        assert!(fresh.rid_of(&Uuid::hash(b"hello world\n")).is_some());
        assert!(fresh.rid_of(&Uuid::hash(b"goodbye\n")).is_some());
    }

    #[test]
    fn deconstruct_skips_phantoms() {
        let (_dir, mut store) = open_temp();
        store.insert_phantom(Uuid::hash(b"not yet here"));
        store.insert(b"real content").unwrap();

        let dump_dir = tempfile::tempdir().unwrap();
        let written = store.deconstruct(dump_dir.path(), 2).unwrap();
        assert_eq!(written, 1);
    }

    #[test]
    fn reopen_preserves_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let rid = {
            let mut store = Store::init(dir.path()).unwrap();
            store.insert(b"persisted").unwrap().rid().unwrap()
        };
        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.read(rid).unwrap(), b"persisted");
    }
}
