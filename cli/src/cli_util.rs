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

//! Repository discovery and the per-invocation context every command
//! builds from [`crate::commands::GlobalArgs`] — the workspace-root
//! threading spec. §9 "Global mutable state replaced" asks for, scaled
//! down to what a CLI process needs on top of [`warren_core::Repo`].

use std::env;
use std::path::Path;
use std::path::PathBuf;

use warren_core::Repo;

use crate::command_error::CommandError;
use crate::command_error::CommandResult;

const WARREN_DIR: &str = ".warren";

/// Walks up from `start` looking for a `.warren` directory, the way the
/// teacher's `cli_util.rs` walks up looking for `.jj`.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        if dir.join(WARREN_DIR).is_dir() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

/// Opens the repository rooted at `explicit` if given, else the one found
/// by walking up from the current directory.
pub fn open_repo(explicit: Option<&Path>, config_overrides: &[(String, String)]) -> CommandResult<Repo> {
    let cwd = env::current_dir().map_err(|e| CommandError::UserError(format!("cannot read cwd: {e}")))?;
    let root = match explicit {
        Some(path) => path.to_path_buf(),
        None => find_repo_root(&cwd).ok_or_else(|| CommandError::NoRepository(cwd.clone()))?,
    };
    let mut repo = Repo::open(&root)?;
    for (key, value) in config_overrides {
        repo.config_mut().set_override(key, value.as_str());
    }
    Ok(repo)
}

/// Parses a `--config key=value` flag's argument.
pub fn parse_config_override(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid --config {raw:?}: expected key=value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_repo_root_from_a_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(WARREN_DIR)).unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_repo_root(&nested), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn no_repo_root_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_repo_root(dir.path()), None);
    }

    #[test]
    fn config_override_parses_key_value() {
        assert_eq!(
            parse_config_override("user.name=Alice"),
            Ok(("user.name".to_string(), "Alice".to_string()))
        );
        assert!(parse_config_override("no-equals-sign").is_err());
    }
}
