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

//! `warren-core`: the content-addressed artifact store, manifest parser,
//! graph engine, merge engine, and working-copy/undo layer behind the
//! `warren` version control system.
//!
//! This crate has no notion of a network, a UI, or a scripting language —
//! see the workspace's `warren-cli` crate for those. What lives here is the
//! part that has to be right regardless of how it's driven: content
//! addressing, delta compression, the manifest grammar, ancestry, and
//! three-way merge.

mod blob;
mod config;
mod delta;
mod diff;
mod error;
mod file_util;
mod graph;
mod hex_util;
mod index;
mod manifest;
mod merge;
mod rebuild;
mod repo;
mod resolve;
mod store;
mod time;
mod undo;
mod uuid;
mod workingcopy;

pub use blob::Buffer;
pub use blob::CodecError;
pub use blob::Whence;
pub use blob::compress;
pub use blob::uncompress;
pub use config::Config;
pub use config::ConfigError;
pub use delta::DeltaError;
pub use diff::DiffOp;
pub use diff::diff_lines;
pub use error::ConflictCount;
pub use error::CoreError;
pub use error::CoreResult;
pub use graph::AncestorWalk;
pub use graph::CloseMode;
pub use graph::DirectAncestor;
pub use graph::RenameEdit;
pub use graph::descendants;
pub use graph::direct_ancestors;
pub use graph::find_filename_changes;
pub use graph::is_leaf;
pub use graph::leaves;
pub use graph::pivot;
pub use index::ArtifactKind;
pub use index::EventKind;
pub use index::Index;
pub use index::TagKind;
pub use manifest::FileCard;
pub use manifest::FilePerm;
pub use manifest::Manifest;
pub use manifest::ManifestError;
pub use manifest::TagCard;
pub use merge::MergeOutcome;
pub use merge::MergeResult;
pub use merge::merge_three_way;
pub use rebuild::RebuildOptions;
pub use rebuild::RebuildReport;
pub use rebuild::rebuild;
pub use repo::ProjectionReport;
pub use repo::Repo;
pub use repo::ScrubReport;
pub use repo::WhatisInfo;
pub use resolve::CheckoutContext;
pub use resolve::ResolveKind;
pub use resolve::Resolution;
pub use resolve::resolve_name;
pub use store::Insertion;
pub use store::Rid;
pub use store::Store;
pub use store::SweepReport;
pub use time::Timestamp;
pub use undo::Stash;
pub use undo::StashFileEntry;
pub use undo::StashList;
pub use undo::UndoError;
pub use undo::UndoLog;
pub use uuid::PrefixResolution;
pub use uuid::Uuid;
pub use uuid::UuidPrefix;
pub use workingcopy::VfileRow;
pub use workingcopy::WorkingCopy;
