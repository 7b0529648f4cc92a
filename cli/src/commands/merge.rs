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

//! `merge [--cherrypick|--backout] [--baseline REF] REF` (spec. §6).

use std::path::Path;

use clap::Args as ClapArgs;
use warren_core::ResolveKind;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
#[command(group(clap::ArgGroup::new("pivot_mode").args(["cherrypick", "backout"])))]
pub struct Args {
    /// Check-in to merge into the working copy.
    other: String,

    /// Replay `other`'s own changes only, against its primary parent.
    #[arg(long)]
    cherrypick: bool,

    /// Undo `other`'s changes by swapping it with the current checkout as
    /// the merge pivot.
    #[arg(long)]
    backout: bool,

    /// Use this check-in as the common ancestor instead of the computed
    /// pivot.
    #[arg(long)]
    baseline: Option<String>,
}

pub fn run(ui: &Ui, repository: Option<&Path>, overrides: &[(String, String)], args: &Args) -> CommandResult<()> {
    let mut repo = cli_util::open_repo(repository, overrides)?;
    let other = repo.resolve(&args.other, ResolveKind::Checkin)?;
    let baseline = args
        .baseline
        .as_deref()
        .map(|name| repo.resolve(name, ResolveKind::Checkin))
        .transpose()?;
    if args.cherrypick && args.backout {
        return Err(CommandError::UserError("--cherrypick and --backout are mutually exclusive".to_string()));
    }

    let report = repo.merge(other, args.cherrypick, args.backout, baseline)?;
    ui.write_line(&format!(
        "merged {}: {} added, {} updated, {} deleted, {} merged",
        other.short(),
        report.added.len(),
        report.updated.len(),
        report.deleted.len(),
        report.merged.len(),
    ));
    if !report.conflicts.is_clean() {
        ui.warn(&format!("{} conflict(s) left unresolved", report.conflicts.0));
    }
    Ok(())
}
