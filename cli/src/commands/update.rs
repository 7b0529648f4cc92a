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

//! `update` (spec. §6): projects a different check-in onto the working copy.

use std::path::Path;

use clap::Args as ClapArgs;
use warren_core::ResolveKind;

use crate::cli_util;
use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Check-in to update to; any name spec. §4.D's resolver accepts.
    target: String,
}

pub fn run(ui: &Ui, repository: Option<&Path>, overrides: &[(String, String)], args: &Args) -> CommandResult<()> {
    let mut repo = cli_util::open_repo(repository, overrides)?;
    let target = repo.resolve(&args.target, ResolveKind::Checkin)?;
    let report = repo.update(target)?;
    ui.write_line(&format!(
        "updated to {}: {} added, {} updated, {} deleted, {} merged",
        target.short(),
        report.added.len(),
        report.updated.len(),
        report.deleted.len(),
        report.merged.len(),
    ));
    if !report.conflicts.is_clean() {
        ui.warn(&format!("{} conflict(s) left unresolved", report.conflicts.0));
    }
    for path in &report.local_edits_lost {
        ui.warn(&format!("local edits to {path} were discarded"));
    }
    Ok(())
}
