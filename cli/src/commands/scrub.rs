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

//! `scrub [--private|--verily] [--force]` (spec. §6): shuns artifacts
//! carrying user identity, then sweeps the store.

use std::path::Path;

use clap::Args as ClapArgs;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Shun only artifacts marked private.
    #[arg(long)]
    private: bool,

    /// Shun every artifact carrying user identity.
    #[arg(long)]
    verily: bool,

    /// Skip the confirmation that this is irreversible.
    #[arg(long)]
    force: bool,
}

pub fn run(ui: &Ui, repository: Option<&Path>, overrides: &[(String, String)], args: &Args) -> CommandResult<()> {
    if !args.force {
        return Err(CommandError::UserError(
            "scrub permanently discards content; re-run with --force to proceed".to_string(),
        ));
    }
    let mut repo = cli_util::open_repo(repository, overrides)?;
    let report = repo.scrub(args.private, args.verily)?;
    ui.write_line(&format!("shunned {} artifact(s), swept {}", report.shunned.len(), report.swept));
    Ok(())
}
