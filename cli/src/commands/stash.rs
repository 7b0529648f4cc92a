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

//! `stash {save|snapshot|list|apply|pop|goto|drop|diff} [ARGS]` (spec. §6 /
//! §4.G).

use std::path::Path;

use clap::Args as ClapArgs;
use clap::Subcommand;

use crate::cli_util;
use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Snapshots uncommitted changes into a new stash, then reverts the
    /// working copy to the checked-out manifest.
    Save {
        #[arg(short = 'm', long, default_value = "")]
        message: String,
    },
    /// Snapshots uncommitted changes into a new stash without touching the
    /// working copy.
    Snapshot {
        #[arg(short = 'm', long, default_value = "")]
        message: String,
    },
    /// Lists every stash.
    List,
    /// Re-applies a stash's files onto the working copy.
    Apply { id: u32 },
    /// Re-applies a stash's files, then deletes the stash.
    Pop { id: u32 },
    /// Updates the working copy to the stash's base check-in, then applies it.
    Goto { id: u32 },
    /// Deletes a stash without applying it.
    Drop { id: u32 },
    /// Lists the paths a stash touches.
    Diff { id: u32 },
}

pub fn run(ui: &Ui, repository: Option<&Path>, overrides: &[(String, String)], args: &Args) -> CommandResult<()> {
    let mut repo = cli_util::open_repo(repository, overrides)?;
    match &args.action {
        Action::Save { message } => {
            let id = repo.stash_save(message.clone())?;
            ui.write_line(&format!("stashed as {id}"));
        }
        Action::Snapshot { message } => {
            let id = repo.stash_snapshot(message.clone())?;
            ui.write_line(&format!("snapshotted as {id}"));
        }
        Action::List => {
            for stash in repo.stash_list() {
                ui.write_line(&format!(
                    "{}: {} ({} file(s), base {})",
                    stash.id,
                    stash.comment,
                    stash.files.len(),
                    stash.base_vid.short(),
                ));
            }
        }
        Action::Apply { id } => {
            let touched = repo.stash_apply(*id)?;
            ui.write_line(&format!("applied stash {id}, {} file(s) touched", touched.len()));
        }
        Action::Pop { id } => {
            let touched = repo.stash_pop(*id)?;
            ui.write_line(&format!("popped stash {id}, {} file(s) touched", touched.len()));
        }
        Action::Goto { id } => {
            let touched = repo.stash_goto(*id)?;
            ui.write_line(&format!("went to stash {id}'s base, {} file(s) touched", touched.len()));
        }
        Action::Drop { id } => match repo.stash_drop(*id) {
            Some(_) => ui.write_line(&format!("dropped stash {id}")),
            None => ui.warn(&format!("no such stash {id}")),
        },
        Action::Diff { id } => {
            let stash = repo
                .stash_list()
                .iter()
                .find(|s| s.id == *id)
                .ok_or_else(|| crate::command_error::CommandError::UserError(format!("no such stash {id}")))?;
            for file in &stash.files {
                let marker = if file.is_added {
                    "A"
                } else if file.is_removed {
                    "D"
                } else {
                    "M"
                };
                ui.write_line(&format!("{marker} {}", file.path));
            }
        }
    }
    Ok(())
}
