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

//! Error kinds shared by every subsystem in this crate.
//!
//! These are orthogonal to transport: the CLI layer is responsible for
//! mapping a [`CoreError`] to a process exit code (0 success, 1 user error, 2
//! internal/invariant violation), never the other way around.

use std::path::PathBuf;

use thiserror::Error;

use crate::uuid::Uuid;

/// Umbrella error type returned by the store, indexer, resolver, graph,
/// merge, and working-copy subsystems.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The name resolver found nothing matching the given input.
    #[error("no artifact matches {0:?}")]
    NotFound(String),

    /// The name resolver, or a hash-prefix lookup, matched more than one
    /// artifact.
    #[error("{0:?} is ambiguous: {1} artifacts match")]
    Ambiguous(String, usize),

    /// The operation referenced an artifact listed in `SHUN`.
    #[error("artifact {0} has been shunned")]
    Shunned(Uuid),

    /// Artifact bytes failed to parse, failed a checksum, or the computed
    /// hash did not match the claimed UUID.
    #[error("malformed artifact {0}: {1}")]
    Malformed(Uuid, String),

    /// A required UUID has no corresponding bytes in the store yet.
    #[error("artifact {0} is a phantom (referenced but not yet present)")]
    Phantom(Uuid),

    /// A mutating command refused to run because the working copy has
    /// unmerged or unsaved changes that would be lost.
    #[error("working copy is dirty: {0}")]
    WorkingCopyDirty(String),

    /// Underlying storage or filesystem error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An invariant the rebuilder or store relies on does not hold.
    #[error("repository invariant violated: {0}")]
    Corrupt(String),
}

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// A count of textual merge conflicts. Unlike the other error kinds, a
/// non-zero conflict count is not itself a failure: the merge still produced
/// a tree, just one with conflict markers in it. Callers surface this as a
/// warning, not a propagated `Err`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictCount(pub usize);

impl ConflictCount {
    pub fn is_clean(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::AddAssign for ConflictCount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}
