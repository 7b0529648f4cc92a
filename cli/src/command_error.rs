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

//! Maps every error a command can produce to one of the three exit codes
//! spec. §6 defines: 0 success, 1 user error, 2 internal/invariant
//! violation. `warren_core::CoreError` already separates user mistakes
//! (`NotFound`, `Ambiguous`, `WorkingCopyDirty`, ...) from invariant
//! failures (`Corrupt`), so this is mostly a thin wrapper that also carries
//! CLI-only failures (bad arguments, no repository found here).

use std::path::PathBuf;

use thiserror::Error;
use warren_core::CoreError;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("no repository found at or above {0}")]
    NoRepository(PathBuf),

    #[error("{0}")]
    UserError(String),
}

impl CommandError {
    /// Exit code per spec. §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Core(CoreError::Corrupt(_)) => 2,
            Self::Core(_) | Self::NoRepository(_) | Self::UserError(_) => 1,
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;
