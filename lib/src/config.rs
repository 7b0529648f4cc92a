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

//! Layered TOML configuration, in the same stacked-layer shape as the
//! teacher's config store, scaled down to the handful of settings this
//! crate actually reads: the committer identity and the store's delta
//! size-ratio knob.
//!
//! Layers are consulted highest-precedence first: command-line overrides,
//! then repo config, then user config, then the environment-derived
//! defaults (`$USER`/`whoami`).

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;
use toml_edit::DocumentMut;
use toml_edit::Item;

use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file")]
    Read(#[source] PathError),
    #[error("configuration file {path:?} is not valid TOML: {source}")]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: toml_edit::TomlError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ConfigSource {
    /// Environment-derived defaults: lowest precedence.
    Environment,
    User,
    Repo,
    /// `--config key=value` command-line overrides: highest precedence.
    CommandLine,
}

struct ConfigLayer {
    source: ConfigSource,
    document: DocumentMut,
}

impl ConfigLayer {
    fn empty(source: ConfigSource) -> Self {
        Self {
            source,
            document: DocumentMut::new(),
        }
    }

    fn parse(source: ConfigSource, text: &str, path: Option<&Path>) -> Result<Self, ConfigError> {
        let document = text.parse::<DocumentMut>().map_err(|source| ConfigError::Parse {
            path: path.map(Path::to_path_buf),
            source,
        })?;
        Ok(Self { source, document })
    }

    fn set(&mut self, dotted_key: &str, value: impl Into<toml_edit::Value>) {
        let parts: Vec<&str> = dotted_key.split('.').collect();
        let mut table = self.document.as_table_mut();
        for part in &parts[..parts.len() - 1] {
            let item = table.entry(part).or_insert(Item::Table(toml_edit::Table::new()));
            table = item
                .as_table_mut()
                .expect("config layer key path collides with a non-table value");
        }
        table.insert(parts[parts.len() - 1], Item::Value(value.into()));
    }

    fn get<'a>(&'a self, dotted_key: &str) -> Option<&'a Item> {
        let parts: Vec<&str> = dotted_key.split('.').collect();
        let mut table: &dyn toml_edit::TableLike = self.document.as_table();
        for part in &parts[..parts.len() - 1] {
            table = table.get(part)?.as_table_like()?;
        }
        table.get(parts[parts.len() - 1])
    }
}

/// The full config stack. Construct with [`Config::from_environment`], then
/// layer in user/repo files as they're discovered.
pub struct Config {
    layers: Vec<ConfigLayer>,
}

impl Config {
    /// The environment-derived defaults layer: `user.name`/`user.email`
    /// seeded from `$USER` (or the OS account name when unset), per spec.
    /// §6 "Environment: `USER` selects default committer when no explicit
    /// user is configured."
    pub fn from_environment() -> Self {
        let mut layer = ConfigLayer::empty(ConfigSource::Environment);
        // getpwuid() on musl libc doesn't fully support nsswitch, so whoami
        // can fail to resolve a name even when one exists; $USER (set by
        // login(1) on Unix) is the fallback for that case.
        let username = whoami::fallible::username()
            .ok()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "unknown".to_string());
        layer.set("user.name", username);
        Self { layers: vec![layer] }
    }

    pub fn load_user_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.load_file(ConfigSource::User, path.as_ref())
    }

    pub fn load_repo_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.load_file(ConfigSource::Repo, path.as_ref())
    }

    fn load_file(&mut self, source: ConfigSource, path: &Path) -> Result<(), ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ConfigError::Read(e.context(path))),
        };
        self.layers.push(ConfigLayer::parse(source, &text, Some(path))?);
        self.layers.sort_by_key(|layer| layer.source);
        Ok(())
    }

    /// Sets a command-line `--config key=value` override. Always wins over
    /// file-based layers.
    pub fn set_override(&mut self, dotted_key: &str, value: impl Into<toml_edit::Value>) {
        if !self.layers.last().is_some_and(|l| l.source == ConfigSource::CommandLine) {
            self.layers.push(ConfigLayer::empty(ConfigSource::CommandLine));
        }
        self.layers.last_mut().expect("just pushed").set(dotted_key, value);
    }

    /// Looks up `dotted_key`, highest-precedence layer first.
    pub fn get_str(&self, dotted_key: &str) -> Option<String> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(dotted_key))
            .and_then(|item| item.as_str())
            .map(str::to_string)
    }

    pub fn get_f64(&self, dotted_key: &str) -> Option<f64> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(dotted_key))
            .and_then(Item::as_float)
    }

    /// `"Name <email>"` if both are set, else whichever of the two is set,
    /// else the environment-derived username alone.
    pub fn default_committer(&self) -> String {
        let name = self.get_str("user.name");
        let email = self.get_str("user.email");
        match (name, email) {
            (Some(name), Some(email)) => format!("{name} <{email}>"),
            (Some(name), None) => name,
            (None, Some(email)) => email,
            (None, None) => "unknown".to_string(),
        }
    }

    pub fn store_size_ratio(&self) -> Option<f64> {
        self.get_f64("store.size-ratio")
    }
}
