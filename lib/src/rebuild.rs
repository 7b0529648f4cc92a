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

//! Component H: the rebuilder. Discards every derived index and
//! reconstructs it from the artifact store alone, per spec. §4.H.
//!
//! A manifest's `MLINK` rows need its primary parent's file list, but rather
//! than require parents to be cross-linked before children (an ordering
//! constraint that would make the result insertion-order dependent), each
//! artifact's parent manifest is independently re-read and re-parsed from
//! the store. This is the rebuilder's answer to spec. §8 invariant 5
//! ("insertion order does not affect final index contents"): the two-pass,
//! raw-then-delta order below is the *default* traversal, not a correctness
//! requirement, and `--randomize` exists specifically to demonstrate that.

use std::collections::HashMap;

use rand::SeedableRng as _;
use rand::seq::SliceRandom as _;
use rand_chacha::ChaCha8Rng;
use tracing::instrument;

use crate::index::ArtifactKind;
use crate::index::Index;
use crate::manifest::FileCard;
use crate::manifest::Manifest;
use crate::store::Rid;
use crate::store::Store;
use crate::uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct RebuildOptions {
    /// Insert in a pseudo-random order instead of raw-then-delta, to prove
    /// the rebuild is insertion-order independent.
    pub randomize: bool,
    pub seed: u64,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            randomize: false,
            seed: 0,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RebuildReport {
    pub linked: usize,
    /// Artifacts that failed to parse, checksum, or cross-link; the
    /// rebuild continues past these (spec. §7 "Propagation").
    pub skipped: Vec<(Uuid, String)>,
}

fn classify(manifest: &Manifest) -> ArtifactKind {
    if manifest.parents.is_empty() && manifest.files.is_empty() && !manifest.tags.is_empty() {
        ArtifactKind::Control
    } else {
        ArtifactKind::Checkin
    }
}

fn primary_parent_files(store: &Store, manifest: &Manifest) -> HashMap<String, FileCard> {
    let Some(&parent_uuid) = manifest.parents.first() else {
        return HashMap::new();
    };
    let Some(parent_rid) = store.rid_of(&parent_uuid) else {
        return HashMap::new();
    };
    let Ok(bytes) = store.read(parent_rid) else {
        return HashMap::new();
    };
    let Ok(parent_manifest) = Manifest::parse(&bytes) else {
        return HashMap::new();
    };
    parent_manifest
        .files
        .into_iter()
        .map(|file| (file.path.clone(), file))
        .collect()
}

fn ordered_rids(store: &Store, options: &RebuildOptions) -> Vec<Rid> {
    let mut raw: Vec<Rid> = store
        .all_rids()
        .into_iter()
        .filter(|&rid| !store.is_phantom(rid) && !store.is_delta(rid))
        .collect();
    let mut deltas: Vec<Rid> = store
        .all_rids()
        .into_iter()
        .filter(|&rid| !store.is_phantom(rid) && store.is_delta(rid))
        .collect();
    raw.sort_unstable();
    deltas.sort_unstable();

    if options.randomize {
        let mut all = raw;
        all.extend(deltas);
        let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
        all.shuffle(&mut rng);
        all
    } else {
        raw.extend(deltas);
        raw
    }
}

/// Rebuilds an [`Index`] from scratch by reading every non-shunned artifact
/// out of `store`. `on_progress` is called after every artifact with a
/// permille-complete counter (0..=1000).
#[instrument(skip_all, fields(randomize = options.randomize))]
pub fn rebuild(store: &Store, options: &RebuildOptions, mut on_progress: impl FnMut(u32)) -> (Index, RebuildReport) {
    let rids = ordered_rids(store, options);
    let total = rids.len().max(1);
    let mut index = Index::new();
    let mut report = RebuildReport::default();

    for (done, &rid) in rids.iter().enumerate() {
        if let Some(uuid) = store.uuid_of(rid) {
            if !store.is_shunned(&uuid) {
                link_one(store, &mut index, &mut report, rid, uuid);
            }
        }
        on_progress((((done + 1) * 1000) / total) as u32);
    }

    index.propagate_tags();
    (index, report)
}

fn link_one(store: &Store, index: &mut Index, report: &mut RebuildReport, rid: Rid, uuid: Uuid) {
    let bytes = match store.read(rid) {
        Ok(bytes) => bytes,
        Err(e) => {
            report.skipped.push((uuid, e.to_string()));
            return;
        }
    };
    let manifest = match Manifest::parse(&bytes) {
        Ok(manifest) => manifest,
        Err(e) => {
            report.skipped.push((uuid, e.to_string()));
            return;
        }
    };
    let kind = classify(&manifest);
    let parent_files = primary_parent_files(store, &manifest);
    match index.crosslink(uuid, kind, &manifest, &parent_files) {
        Ok(()) => report.linked += 1,
        Err(e) => report.skipped.push((uuid, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FilePerm;

    fn file(path: &str) -> FileCard {
        FileCard {
            path: path.to_string(),
            uuid: Some(Uuid::hash(path.as_bytes())),
            perm: FilePerm::Regular,
            old_path: None,
        }
    }

    fn manifest_bytes(m: &Manifest) -> Vec<u8> {
        m.serialize()
    }

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::init(dir.path().join("repo")).unwrap();
        (dir, store)
    }

    #[test]
    fn rebuild_reconstructs_plink_and_mlink() {
        let (_dir, mut store) = open_temp();
        let root = Manifest {
            files: vec![file("a.txt")],
            date: Some(crate::time::Timestamp::now()),
            ..Default::default()
        };
        let root_bytes = manifest_bytes(&root);
        let root_rid = store.insert(&root_bytes).unwrap().rid().unwrap();
        let root_uuid = store.uuid_of(root_rid).unwrap();

        let child = Manifest {
            parents: vec![root_uuid],
            files: vec![file("a.txt"), file("b.txt")],
            date: Some(crate::time::Timestamp::now()),
            ..Default::default()
        };
        store.insert(&manifest_bytes(&child)).unwrap();

        let mut ticks = Vec::new();
        let (index, report) = rebuild(&store, &RebuildOptions::default(), |p| ticks.push(p));

        assert_eq!(report.linked, 2);
        assert!(report.skipped.is_empty());
        assert_eq!(index.leaves().len(), 1);
        assert_eq!(ticks.last(), Some(&1000));
    }

    #[test]
    fn randomize_produces_the_same_index_contents() {
        let (_dir, mut store) = open_temp();
        let mut prev = None;
        for i in 0..5 {
            let manifest = Manifest {
                parents: prev.into_iter().collect(),
                files: vec![file(&format!("f{i}.txt"))],
                date: Some(crate::time::Timestamp::now()),
                ..Default::default()
            };
            let rid = store.insert(&manifest_bytes(&manifest)).unwrap().rid().unwrap();
            prev = store.uuid_of(rid);
        }

        let (ordered, _) = rebuild(&store, &RebuildOptions::default(), |_| {});
        let (randomized, _) = rebuild(
            &store,
            &RebuildOptions {
                randomize: true,
                seed: 42,
            },
            |_| {},
        );

        assert_eq!(ordered.leaves(), randomized.leaves());
        assert_eq!(ordered.plink_rows().len(), randomized.plink_rows().len());
    }

    #[test]
    fn malformed_manifest_is_skipped_not_fatal() {
        let (_dir, mut store) = open_temp();
        store.insert(b"not a manifest at all").unwrap();
        let (index, report) = rebuild(&store, &RebuildOptions::default(), |_| {});
        assert_eq!(report.linked, 0);
        assert_eq!(report.skipped.len(), 1);
        assert!(index.plink_rows().is_empty());
    }
}
