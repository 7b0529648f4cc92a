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

mod commit;
mod deconstruct;
mod descendants;
mod diff;
mod init;
mod leaves;
mod merge;
mod rebuild;
mod reconstruct;
mod redo;
mod revert;
mod scrub;
mod shun;
mod stash;
mod status;
mod undo;
mod update;
mod whatis;

use std::path::Path;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use tracing::instrument;

use crate::cli_util;
use crate::command_error::CommandResult;
use crate::ui::Ui;

/// `warren`: the command-line surface over `warren-core`'s artifact store,
/// graph engine, merge engine, and working-copy/undo layer (spec. §6 "CLI
/// surface (core-relevant subset)").
#[derive(Parser, Debug)]
#[command(name = "warren", version, about)]
pub struct Cli {
    /// Repository root to operate on; defaults to walking up from the
    /// current directory looking for `.warren`.
    #[arg(short = 'R', long, global = true)]
    repository: Option<PathBuf>,

    /// Overrides a config key for this invocation only, `key=value`
    /// (highest-precedence layer; spec. §6 "Environment").
    #[arg(long = "config", global = true, value_name = "key=value")]
    config: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates a brand-new, empty repository.
    Init(init::Args),
    /// Records a new check-in from the working copy's changes.
    Commit(commit::Args),
    /// Projects a different check-in onto the working copy.
    Update(update::Args),
    /// Three-way merges another check-in into the working copy, uncommitted.
    Merge(merge::Args),
    /// Restores files to the checked-out manifest's content.
    Revert(revert::Args),
    /// Reverts the most recent reversible command's filesystem changes.
    Undo(undo::Args),
    /// Re-applies what the last `undo` reverted.
    Redo(redo::Args),
    /// Manages named snapshots of uncommitted working-copy changes.
    Stash(stash::Args),
    /// Prints a per-path unified diff between two check-ins.
    Diff(diff::Args),
    /// Reports what a resolved name points at.
    Whatis(whatis::Args),
    /// Lists same-branch descendants of a check-in.
    Descendants(descendants::Args),
    /// Lists check-ins with no same-branch descendant.
    Leaves(leaves::Args),
    /// Regenerates every derived index from the artifact store.
    Rebuild(rebuild::Args),
    /// Dumps every artifact to one file per UUID under a directory.
    Deconstruct(deconstruct::Args),
    /// Rebuilds a repository from a `deconstruct`ed directory.
    Reconstruct(reconstruct::Args),
    /// Shuns private (and optionally all-identifying) artifacts, then sweeps.
    Scrub(scrub::Args),
    /// Marks an artifact for removal at the next sweep.
    Shun(shun::Args),
    /// Shows which working-copy paths differ from the checked-out manifest.
    Status(status::Args),
}

#[instrument(skip_all)]
pub fn run(ui: &Ui) -> CommandResult<()> {
    let cli = Cli::parse();
    let overrides: Vec<(String, String)> = cli
        .config
        .iter()
        .map(|raw| cli_util::parse_config_override(raw))
        .collect::<Result<_, _>>()
        .map_err(crate::command_error::CommandError::UserError)?;
    let repository: Option<&Path> = cli.repository.as_deref();

    match &cli.command {
        Command::Init(args) => init::run(ui, args),
        Command::Commit(args) => commit::run(ui, repository, &overrides, args),
        Command::Update(args) => update::run(ui, repository, &overrides, args),
        Command::Merge(args) => merge::run(ui, repository, &overrides, args),
        Command::Revert(args) => revert::run(ui, repository, &overrides, args),
        Command::Undo(args) => undo::run(ui, repository, &overrides, args),
        Command::Redo(args) => redo::run(ui, repository, &overrides, args),
        Command::Stash(args) => stash::run(ui, repository, &overrides, args),
        Command::Diff(args) => diff::run(ui, repository, &overrides, args),
        Command::Whatis(args) => whatis::run(ui, repository, &overrides, args),
        Command::Descendants(args) => descendants::run(ui, repository, &overrides, args),
        Command::Leaves(args) => leaves::run(ui, repository, &overrides, args),
        Command::Rebuild(args) => rebuild::run(ui, repository, &overrides, args),
        Command::Deconstruct(args) => deconstruct::run(ui, repository, &overrides, args),
        Command::Reconstruct(args) => reconstruct::run(ui, args),
        Command::Scrub(args) => scrub::run(ui, repository, &overrides, args),
        Command::Shun(args) => shun::run(ui, repository, &overrides, args),
        Command::Status(args) => status::run(ui, repository, &overrides, args),
    }
}
