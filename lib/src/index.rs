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

//! Component C: the relational indices a cross-linker derives from parsed
//! manifests, and the cross-linker itself.
//!
//! [`Index`] holds the tables named in spec. §4.C: `FILENAME` (interned
//! paths), `PLINK` (parent/child linkage), `MLINK` (per-checkin file
//! changes), `TAG`/`TAGXREF` (tag propagation), `EVENT` (the timeline), plus
//! the `PRIVATE` and `LEAF` derived sets. Everything here is an in-memory
//! projection rebuilt from the artifact store by [`crate::rebuild::rebuild`];
//! nothing here is itself durable.

use std::collections::HashMap;
use std::collections::HashSet;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::instrument;

use crate::manifest::FileCard;
use crate::manifest::Manifest;
use crate::manifest::TagCard;
use crate::time::Timestamp;
use crate::uuid::Uuid;

pub type FilenameId = u32;
pub type TagId = u32;

/// The five manifest kinds this crate parses and cross-links (spec. §2).
/// A control artifact is cross-linked for its tag cards only; it never
/// carries files or parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Checkin,
    Cluster,
    Control,
    Ticket,
    Wiki,
}

/// The `EVENT` table's discriminant, one row per cross-linked artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Checkin,
    Tag,
    Ticket,
    Wiki,
}

impl From<ArtifactKind> for EventKind {
    fn from(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Checkin | ArtifactKind::Cluster => Self::Checkin,
            ArtifactKind::Control => Self::Tag,
            ArtifactKind::Ticket => Self::Ticket,
            ArtifactKind::Wiki => Self::Wiki,
        }
    }
}

/// A `T` card's operator, shared with [`crate::manifest::TagCard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    /// `+name`: applies to exactly the target artifact.
    Singleton,
    /// `-name`: cancels a propagating tag at the target artifact.
    Cancel,
    /// `*name value`: applies to the target and propagates to its
    /// descendants until canceled.
    Propagating,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("artifact {0} was cross-linked more than once")]
    AlreadyLinked(Uuid),
    #[error("tag card references unknown target {0}")]
    UnknownTagTarget(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlinkRow {
    pub child: Uuid,
    pub parent: Uuid,
    /// True only for the first UUID in the `P` card.
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlinkRow {
    pub checkin: Uuid,
    pub filename: FilenameId,
    /// Content before this checkin, relative to its primary parent. `None`
    /// means the file did not exist in the parent (an add).
    pub from_uuid: Option<Uuid>,
    /// Content after this checkin. `None` means the file was removed.
    pub to_uuid: Option<Uuid>,
    /// Set when this entry also renames the file from another path.
    pub renamed_from: Option<FilenameId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagxrefRow {
    pub tag: TagId,
    pub artifact: Uuid,
    pub kind: TagKind,
    pub value: Option<String>,
    pub mtime: Timestamp,
    /// The control (or checkin) artifact that carried this `T` card.
    pub origin: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub artifact: Uuid,
    pub kind: EventKind,
    pub mtime: Timestamp,
    pub user: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Default)]
struct FilenameTable {
    by_path: HashMap<String, FilenameId>,
    by_id: Vec<String>,
}

impl FilenameTable {
    fn intern(&mut self, path: &str) -> FilenameId {
        if let Some(&id) = self.by_path.get(path) {
            return id;
        }
        let id = self.by_id.len() as FilenameId;
        self.by_id.push(path.to_string());
        self.by_path.insert(path.to_string(), id);
        id
    }

    fn lookup(&self, path: &str) -> Option<FilenameId> {
        self.by_path.get(path).copied()
    }

    fn path_of(&self, id: FilenameId) -> Option<&str> {
        self.by_id.get(id as usize).map(String::as_str)
    }
}

/// The full set of derived relational tables, rebuilt in one pass over every
/// artifact in dependency order by [`crate::rebuild::rebuild`].
#[derive(Debug, Default)]
pub struct Index {
    filenames: FilenameTable,
    linked: HashSet<Uuid>,
    plink: Vec<PlinkRow>,
    mlink: Vec<MlinkRow>,
    children_of: HashMap<Uuid, Vec<Uuid>>,
    tag_ids: IndexMap<String, TagId>,
    tagxref: Vec<TagxrefRow>,
    events: Vec<EventRow>,
    private: HashSet<Uuid>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    fn tag_id(&mut self, name: &str) -> TagId {
        if let Some(&id) = self.tag_ids.get(name) {
            return id;
        }
        let id = self.tag_ids.len() as TagId;
        self.tag_ids.insert(name.to_string(), id);
        id
    }

    /// Cross-links one parsed manifest into the tables: `PLINK` from its `P`
    /// cards, `MLINK` from its `F` cards (diffed against `parent_files`, the
    /// full path-to-content map of its primary parent, or an empty map for a
    /// root checkin), `TAGXREF`/`EVENT` from its `T`/`C`/`D`/`U` cards.
    ///
    /// Tag propagation to descendants is a separate, batched step
    /// ([`Index::propagate_tags`]) so a rebuild can cross-link artifacts in
    /// one forward pass and only walk descendants once at the end, per
    /// spec. §4.C "cross-linking happens in two phases: per-artifact linking,
    /// then a single propagation sweep".
    #[instrument(skip_all, fields(artifact = %artifact, kind = ?kind))]
    pub fn crosslink(
        &mut self,
        artifact: Uuid,
        kind: ArtifactKind,
        manifest: &Manifest,
        parent_files: &HashMap<String, FileCard>,
    ) -> Result<(), IndexError> {
        if !self.linked.insert(artifact) {
            return Err(IndexError::AlreadyLinked(artifact));
        }

        for (i, &parent) in manifest.parents.iter().enumerate() {
            self.plink.push(PlinkRow {
                child: artifact,
                parent,
                is_primary: i == 0,
            });
            self.children_of.entry(parent).or_default().push(artifact);
        }

        if matches!(kind, ArtifactKind::Checkin) {
            self.crosslink_files(artifact, manifest, parent_files);
        }

        for tag in &manifest.tags {
            self.crosslink_tag(artifact, tag, manifest.date.unwrap_or_else(Timestamp::now));
        }

        self.events.push(EventRow {
            artifact,
            kind: kind.into(),
            mtime: manifest.date.unwrap_or_else(Timestamp::now),
            user: manifest.user.clone(),
            comment: manifest.comment.clone(),
        });

        Ok(())
    }

    fn crosslink_files(&mut self, checkin: Uuid, manifest: &Manifest, parent_files: &HashMap<String, FileCard>) {
        let mut seen_paths = HashSet::new();
        for file in &manifest.files {
            seen_paths.insert(file.path.as_str());
            let filename = self.filenames.intern(&file.path);
            let renamed_from = file
                .old_path
                .as_deref()
                .map(|old| self.filenames.intern(old));
            let from_uuid = file
                .old_path
                .as_deref()
                .or(Some(file.path.as_str()))
                .and_then(|p| parent_files.get(p))
                .and_then(|f| f.uuid);
            self.mlink.push(MlinkRow {
                checkin,
                filename,
                from_uuid,
                to_uuid: file.uuid,
                renamed_from,
            });
        }
        for (path, old_file) in parent_files {
            if !seen_paths.contains(path.as_str()) {
                let filename = self.filenames.intern(path);
                self.mlink.push(MlinkRow {
                    checkin,
                    filename,
                    from_uuid: old_file.uuid,
                    to_uuid: None,
                    renamed_from: None,
                });
            }
        }
    }

    fn crosslink_tag(&mut self, origin: Uuid, card: &TagCard, mtime: Timestamp) {
        let tag = self.tag_id(&card.name);
        self.tagxref.push(TagxrefRow {
            tag,
            artifact: card.target,
            kind: card.kind,
            value: card.value.clone(),
            mtime,
            origin,
        });
        if card.name == "private" {
            self.private.insert(card.target);
        }
    }

    /// Propagates every `*name` tag not yet canceled at each descendant,
    /// stopping a branch as soon as it hits a `-name` cancellation or an
    /// artifact that already carries an explicit entry for that tag (spec.
    /// §4.C "propagation halts at the nearest override, it does not cross
    /// it"). Call once after cross-linking every artifact in a rebuild.
    #[instrument(skip_all)]
    pub fn propagate_tags(&mut self) {
        let propagating: Vec<TagxrefRow> = self
            .tagxref
            .iter()
            .filter(|row| matches!(row.kind, TagKind::Propagating))
            .cloned()
            .collect();

        for seed in propagating {
            let mut overridden: HashSet<Uuid> = self
                .tagxref
                .iter()
                .filter(|row| row.tag == seed.tag)
                .map(|row| row.artifact)
                .collect();

            let mut frontier = self.children_of.get(&seed.artifact).cloned().unwrap_or_default();
            let mut propagated = Vec::new();
            while let Some(artifact) = frontier.pop() {
                if !overridden.insert(artifact) {
                    continue;
                }
                propagated.push(TagxrefRow {
                    tag: seed.tag,
                    artifact,
                    kind: TagKind::Propagating,
                    value: seed.value.clone(),
                    mtime: seed.mtime,
                    origin: seed.origin,
                });
                if let Some(children) = self.children_of.get(&artifact) {
                    frontier.extend(children.iter().copied());
                }
            }
            self.tagxref.extend(propagated);
        }
    }

    pub fn filename_path(&self, id: FilenameId) -> Option<&str> {
        self.filenames.path_of(id)
    }

    pub fn filename_id(&self, path: &str) -> Option<FilenameId> {
        self.filenames.lookup(path)
    }

    pub fn plink_rows(&self) -> &[PlinkRow] {
        &self.plink
    }

    pub fn mlink_rows_for(&self, checkin: Uuid) -> impl Iterator<Item = &MlinkRow> {
        self.mlink.iter().filter(move |row| row.checkin == checkin)
    }

    pub fn children_of(&self, artifact: Uuid) -> &[Uuid] {
        self.children_of.get(&artifact).map_or(&[], Vec::as_slice)
    }

    pub fn parents_of(&self, artifact: Uuid) -> Vec<Uuid> {
        self.plink
            .iter()
            .filter(|row| row.child == artifact)
            .map(|row| row.parent)
            .collect()
    }

    pub fn primary_parent(&self, artifact: Uuid) -> Option<Uuid> {
        self.plink
            .iter()
            .find(|row| row.child == artifact && row.is_primary)
            .map(|row| row.parent)
    }

    /// The effective tags on `artifact`: the most recent `TAGXREF` row per
    /// tag name that isn't a cancellation.
    pub fn tags_of(&self, artifact: Uuid) -> Vec<(&str, &TagxrefRow)> {
        let mut by_tag: IndexMap<TagId, &TagxrefRow> = IndexMap::new();
        for row in self.tagxref.iter().filter(|row| row.artifact == artifact) {
            match by_tag.get(&row.tag) {
                Some(existing) if existing.mtime > row.mtime => {}
                _ => {
                    by_tag.insert(row.tag, row);
                }
            }
        }
        by_tag
            .into_values()
            .filter(|row| !matches!(row.kind, TagKind::Cancel))
            .map(|row| (self.tag_name(row.tag), row))
            .collect()
    }

    fn tag_name(&self, id: TagId) -> &str {
        self.tag_ids
            .iter()
            .find(|(_, &v)| v == id)
            .map(|(k, _)| k.as_str())
            .unwrap_or("")
    }

    /// The effective (non-canceled) holders of tag `name` across every
    /// artifact, with the `TAGXREF` mtime that made them current. Used by
    /// the name resolver's `tag:`/`sym-` lookups (spec. §4.D).
    pub fn tag_holders(&self, name: &str) -> Vec<(Uuid, Timestamp)> {
        let mut by_artifact: HashMap<Uuid, &TagxrefRow> = HashMap::new();
        for row in self.tagxref.iter().filter(|row| self.tag_name(row.tag) == name) {
            match by_artifact.get(&row.artifact) {
                Some(existing) if existing.mtime > row.mtime => {}
                _ => {
                    by_artifact.insert(row.artifact, row);
                }
            }
        }
        by_artifact
            .into_iter()
            .filter(|(_, row)| !matches!(row.kind, TagKind::Cancel))
            .map(|(artifact, row)| (artifact, row.mtime))
            .collect()
    }

    pub fn event_of(&self, artifact: Uuid) -> Option<&EventRow> {
        self.events.iter().find(|event| event.artifact == artifact)
    }

    pub fn is_private(&self, artifact: Uuid) -> bool {
        self.private.contains(&artifact)
    }

    pub fn events(&self) -> &[EventRow] {
        &self.events
    }

    /// Checkins with no `PLINK` row naming them as a parent: the open leaf
    /// set used by spec. §4.E's `leaves` operation before filtering for
    /// closed/private status.
    pub fn leaves(&self) -> Vec<Uuid> {
        let has_child: HashSet<Uuid> = self.plink.iter().map(|row| row.parent).collect();
        self.events
            .iter()
            .filter(|event| matches!(event.kind, EventKind::Checkin))
            .map(|event| event.artifact)
            .filter(|artifact| !has_child.contains(artifact))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FilePerm;

    fn uuid(seed: &str) -> Uuid {
        Uuid::hash(seed.as_bytes())
    }

    fn file(path: &str, content_seed: &str) -> FileCard {
        FileCard {
            path: path.to_string(),
            uuid: Some(uuid(content_seed)),
            perm: FilePerm::Regular,
            old_path: None,
        }
    }

    #[test]
    fn crosslink_root_checkin_has_no_parents_and_all_adds() {
        let mut index = Index::new();
        let artifact = uuid("c1");
        let manifest = Manifest {
            comment: Some("root".to_string()),
            files: vec![file("a.txt", "a")],
            ..Default::default()
        };
        index
            .crosslink(artifact, ArtifactKind::Checkin, &manifest, &HashMap::new())
            .unwrap();

        assert!(index.parents_of(artifact).is_empty());
        let mlink: Vec<_> = index.mlink_rows_for(artifact).collect();
        assert_eq!(mlink.len(), 1);
        assert_eq!(mlink[0].from_uuid, None);
        assert!(mlink[0].to_uuid.is_some());
    }

    #[test]
    fn crosslink_detects_deletion() {
        let mut index = Index::new();
        let parent_files: HashMap<String, FileCard> =
            [("a.txt".to_string(), file("a.txt", "a"))].into_iter().collect();
        let artifact = uuid("c2");
        let manifest = Manifest {
            parents: vec![uuid("c1")],
            ..Default::default()
        };
        index
            .crosslink(artifact, ArtifactKind::Checkin, &manifest, &parent_files)
            .unwrap();
        let mlink: Vec<_> = index.mlink_rows_for(artifact).collect();
        assert_eq!(mlink.len(), 1);
        assert_eq!(mlink[0].to_uuid, None);
    }

    #[test]
    fn crosslinking_twice_is_an_error() {
        let mut index = Index::new();
        let artifact = uuid("c1");
        let manifest = Manifest::default();
        index
            .crosslink(artifact, ArtifactKind::Checkin, &manifest, &HashMap::new())
            .unwrap();
        assert_eq!(
            index.crosslink(artifact, ArtifactKind::Checkin, &manifest, &HashMap::new()),
            Err(IndexError::AlreadyLinked(artifact))
        );
    }

    #[test]
    fn propagating_tag_reaches_descendants_until_canceled() {
        let mut index = Index::new();
        let root = uuid("root");
        let child = uuid("child");
        let grandchild = uuid("grandchild");

        index
            .crosslink(root, ArtifactKind::Checkin, &Manifest::default(), &HashMap::new())
            .unwrap();
        let tagged = Manifest {
            parents: vec![root],
            tags: vec![TagCard {
                kind: TagKind::Propagating,
                name: "release".to_string(),
                target: root,
                value: Some("1.0".to_string()),
            }],
            ..Default::default()
        };
        index
            .crosslink(child, ArtifactKind::Checkin, &tagged, &HashMap::new())
            .unwrap();
        let cancel = Manifest {
            parents: vec![child],
            tags: vec![TagCard {
                kind: TagKind::Cancel,
                name: "release".to_string(),
                target: grandchild,
                value: None,
            }],
            ..Default::default()
        };
        index
            .crosslink(grandchild, ArtifactKind::Checkin, &cancel, &HashMap::new())
            .unwrap();

        index.propagate_tags();

        assert!(index.tags_of(root).iter().any(|(name, _)| *name == "release"));
        assert!(index.tags_of(child).iter().any(|(name, _)| *name == "release"));
        assert!(!index.tags_of(grandchild).iter().any(|(name, _)| *name == "release"));
    }

    #[test]
    fn leaves_excludes_artifacts_with_children() {
        let mut index = Index::new();
        let root = uuid("root");
        let child = uuid("child");
        index
            .crosslink(root, ArtifactKind::Checkin, &Manifest::default(), &HashMap::new())
            .unwrap();
        let manifest = Manifest {
            parents: vec![root],
            ..Default::default()
        };
        index
            .crosslink(child, ArtifactKind::Checkin, &manifest, &HashMap::new())
            .unwrap();

        assert_eq!(index.leaves(), vec![child]);
    }
}
