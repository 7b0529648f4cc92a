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

//! Component E: the graph engine. Everything here walks `PLINK`/`MLINK`
//! rows already materialized in an [`Index`]; nothing touches the artifact
//! store directly.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::collections::HashSet;

use crate::index::Index;
use crate::uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    Any,
    Open,
    Closed,
}

fn branch_of(index: &Index, artifact: Uuid) -> Option<String> {
    index
        .tags_of(artifact)
        .into_iter()
        .find(|(name, _)| *name == "branch")
        .map(|(_, row)| row.value.clone().unwrap_or_default())
}

fn is_closed(index: &Index, artifact: Uuid) -> bool {
    index.tags_of(artifact).iter().any(|(name, _)| *name == "closed")
}

fn matches_close_mode(index: &Index, artifact: Uuid, mode: CloseMode) -> bool {
    match mode {
        CloseMode::Any => true,
        CloseMode::Open => !is_closed(index, artifact),
        CloseMode::Closed => is_closed(index, artifact),
    }
}

/// A child stays on `base`'s branch if its effective `branch` tag matches,
/// or it is `r`'s primary child (a check-in inherits its parent's branch by
/// default until it is explicitly re-tagged).
fn same_branch_child(index: &Index, r: Uuid, child: Uuid, base_branch: &Option<String>) -> bool {
    branch_of(index, child) == *base_branch || index.primary_parent(child) == Some(r)
}

/// Every check-in reachable from `base` while staying on its branch (spec.
/// §4.E "descendants").
pub fn descendants(index: &Index, base: Uuid) -> Vec<Uuid> {
    let base_branch = branch_of(index, base);
    let mut seen = HashSet::new();
    let mut stack = vec![base];
    let mut out = Vec::new();
    while let Some(r) = stack.pop() {
        if !seen.insert(r) {
            continue;
        }
        out.push(r);
        for &child in index.children_of(r) {
            if same_branch_child(index, r, child, &base_branch) {
                stack.push(child);
            }
        }
    }
    out
}

/// A check-in is a leaf iff none of its same-branch children exist (spec.
/// §4.E).
pub fn is_leaf(index: &Index, artifact: Uuid) -> bool {
    let branch = branch_of(index, artifact);
    !index
        .children_of(artifact)
        .iter()
        .any(|&child| same_branch_child(index, artifact, child, &branch))
}

/// Leaves reachable from `base`, filtered by `mode`.
pub fn leaves(index: &Index, base: Uuid, mode: CloseMode) -> Vec<Uuid> {
    descendants(index, base)
        .into_iter()
        .filter(|&r| is_leaf(index, r))
        .filter(|&r| matches_close_mode(index, r, mode))
        .collect()
}

/// One step of [`AncestorWalk`]'s priority queue: ordered so a
/// [`BinaryHeap`] pops the most recent event-mtime first, per spec. §4.E.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    mtime: crate::time::Timestamp,
    artifact: Uuid,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.mtime.cmp(&other.mtime).then_with(|| self.artifact.cmp(&other.artifact))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Iterator over ancestors of a check-in, most-recent-event-mtime first,
/// expanding through every parent (primary and merge). Stops after a caller
/// chosen number of ancestors or when the queue empties (spec. §4.E
/// "Ancestors").
pub struct AncestorWalk<'a> {
    index: &'a Index,
    heap: BinaryHeap<HeapEntry>,
    seen: HashSet<Uuid>,
    remaining: usize,
}

impl<'a> AncestorWalk<'a> {
    pub fn new(index: &'a Index, start: Uuid, limit: usize) -> Self {
        let mut heap = BinaryHeap::new();
        let mut seen = HashSet::new();
        seen.insert(start);
        for parent in index.parents_of(start) {
            if seen.insert(parent) {
                heap.push(HeapEntry {
                    mtime: index.event_of(parent).map_or(crate::time::Timestamp::now(), |e| e.mtime),
                    artifact: parent,
                });
            }
        }
        Self {
            index,
            heap,
            seen,
            remaining: limit,
        }
    }
}

impl Iterator for AncestorWalk<'_> {
    type Item = Uuid;

    fn next(&mut self) -> Option<Uuid> {
        if self.remaining == 0 {
            return None;
        }
        let entry = self.heap.pop()?;
        self.remaining -= 1;
        for parent in self.index.parents_of(entry.artifact) {
            if self.seen.insert(parent) {
                self.heap.push(HeapEntry {
                    mtime: self.index.event_of(parent).map_or(crate::time::Timestamp::now(), |e| e.mtime),
                    artifact: parent,
                });
            }
        }
        Some(entry.artifact)
    }
}

/// One hop of a [`direct_ancestors`] walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectAncestor {
    pub artifact: Uuid,
    pub generation: u32,
}

/// Walks `PLINK.is_primary` edges backwards from `start`, labeling each
/// artifact with its generation number (0 = `start` itself).
pub fn direct_ancestors(index: &Index, start: Uuid) -> Vec<DirectAncestor> {
    let mut out = vec![DirectAncestor {
        artifact: start,
        generation: 0,
    }];
    let mut current = start;
    let mut generation = 0;
    while let Some(parent) = index.primary_parent(current) {
        generation += 1;
        out.push(DirectAncestor {
            artifact: parent,
            generation,
        });
        current = parent;
    }
    out
}

fn ancestor_set(index: &Index, seed: Uuid) -> HashSet<Uuid> {
    let mut seen = HashSet::new();
    let mut stack = vec![seed];
    while let Some(r) = stack.pop() {
        if !seen.insert(r) {
            continue;
        }
        stack.extend(index.parents_of(r));
    }
    seen
}

/// Computes the pivot (common ancestor) of `primary` and one or more
/// `secondaries`, for use as the base of a three-way merge. `None` when no
/// artifact is reachable from every seed (spec. §4.E "Pivot").
///
/// Implemented as full-ancestor-set intersection rather than the
/// simultaneous reverse-BFS the textual algorithm describes: both compute
/// the same candidate set, and set intersection reads more directly than
/// threading per-seed visited-from bitsets through a shared frontier.
pub fn pivot(index: &Index, primary: Uuid, secondaries: &[Uuid]) -> Option<Uuid> {
    let mut common = ancestor_set(index, primary);
    for &v in secondaries {
        let set = ancestor_set(index, v);
        common.retain(|a| set.contains(a));
    }
    // Deepest shared point = maximum event-mtime; ties broken by lower UUID
    // in place of spec. §4.E's "lower rid" (this module only sees UUIDs).
    common.into_iter().min_by_key(|&uuid| {
        let mtime = index.event_of(uuid).map(|e| e.mtime);
        (Reverse(mtime), uuid)
    })
}

/// A tracked rename between two points in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameEdit {
    pub old_path: String,
    pub new_path: String,
}

/// Walks the primary-parent path from `from` to `to` and returns every
/// rename along the way, collapsing chained renames transitively (spec.
/// §4.E "Rename tracking"). `from` must be a primary ancestor of `to`;
/// otherwise the scan stops early and returns whatever it found.
pub fn find_filename_changes(index: &Index, from: Uuid, to: Uuid) -> Vec<RenameEdit> {
    let mut chain = Vec::new();
    let mut current = to;
    loop {
        chain.push(current);
        if current == from {
            break;
        }
        match index.primary_parent(current) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    chain.reverse();

    let mut renames: HashMap<String, String> = HashMap::new();
    for &checkin in &chain {
        for row in index.mlink_rows_for(checkin) {
            let Some(old_id) = row.renamed_from else {
                continue;
            };
            let old_path = index.filename_path(old_id).unwrap_or_default().to_string();
            let new_path = index.filename_path(row.filename).unwrap_or_default().to_string();
            let original = renames.remove(&old_path).unwrap_or(old_path);
            renames.insert(new_path, original);
        }
    }
    renames
        .into_iter()
        .map(|(new_path, old_path)| RenameEdit { old_path, new_path })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ArtifactKind;
    use crate::manifest::FileCard;
    use crate::manifest::FilePerm;
    use crate::manifest::Manifest;
    use std::collections::HashMap as StdHashMap;

    fn uuid(seed: &str) -> Uuid {
        Uuid::hash(seed.as_bytes())
    }

    fn link(index: &mut Index, artifact: Uuid, parents: Vec<Uuid>, files: Vec<FileCard>) {
        let manifest = Manifest {
            parents,
            files,
            date: Some(crate::time::Timestamp::now()),
            ..Default::default()
        };
        index
            .crosslink(artifact, ArtifactKind::Checkin, &manifest, &StdHashMap::new())
            .unwrap();
    }

    fn file(path: &str) -> FileCard {
        FileCard {
            path: path.to_string(),
            uuid: Some(Uuid::hash(path.as_bytes())),
            perm: FilePerm::Regular,
            old_path: None,
        }
    }

    #[test]
    fn descendants_and_leaves_on_a_line() {
        let mut index = Index::new();
        let a = uuid("a");
        let b = uuid("b");
        let c = uuid("c");
        link(&mut index, a, vec![], vec![]);
        link(&mut index, b, vec![a], vec![]);
        link(&mut index, c, vec![b], vec![]);

        let mut d = descendants(&index, a);
        d.sort();
        let mut expected = vec![a, b, c];
        expected.sort();
        assert_eq!(d, expected);
        assert_eq!(leaves(&index, a, CloseMode::Any), vec![c]);
    }

    #[test]
    fn direct_ancestors_follow_primary_only() {
        let mut index = Index::new();
        let a = uuid("a");
        let b = uuid("b");
        link(&mut index, a, vec![], vec![]);
        link(&mut index, b, vec![a], vec![]);

        let chain = direct_ancestors(&index, b);
        assert_eq!(
            chain,
            vec![
                DirectAncestor { artifact: b, generation: 0 },
                DirectAncestor { artifact: a, generation: 1 },
            ]
        );
    }

    #[test]
    fn pivot_of_diverged_branches_is_the_fork_point() {
        let mut index = Index::new();
        let root = uuid("root");
        let left = uuid("left");
        let right = uuid("right");
        link(&mut index, root, vec![], vec![]);
        link(&mut index, left, vec![root], vec![]);
        link(&mut index, right, vec![root], vec![]);

        assert_eq!(pivot(&index, left, &[right]), Some(root));
    }

    #[test]
    fn pivot_is_none_without_a_common_ancestor() {
        let mut index = Index::new();
        let a = uuid("a");
        let b = uuid("b");
        link(&mut index, a, vec![], vec![]);
        link(&mut index, b, vec![], vec![]);

        assert_eq!(pivot(&index, a, &[b]), None);
    }

    #[test]
    fn tracks_rename_across_history() {
        let mut index = Index::new();
        let root = uuid("root");
        let renamed = uuid("renamed");
        link(&mut index, root, vec![], vec![file("old.txt")]);
        let rename_manifest = Manifest {
            parents: vec![root],
            files: vec![FileCard {
                path: "new.txt".to_string(),
                uuid: Some(Uuid::hash(b"old.txt")),
                perm: FilePerm::Regular,
                old_path: Some("old.txt".to_string()),
            }],
            ..Default::default()
        };
        let parent_files: StdHashMap<String, FileCard> =
            [("old.txt".to_string(), file("old.txt"))].into_iter().collect();
        index
            .crosslink(renamed, ArtifactKind::Checkin, &rename_manifest, &parent_files)
            .unwrap();

        let edits = find_filename_changes(&index, root, renamed);
        assert_eq!(
            edits,
            vec![RenameEdit {
                old_path: "old.txt".to_string(),
                new_path: "new.txt".to_string(),
            }]
        );
    }
}
