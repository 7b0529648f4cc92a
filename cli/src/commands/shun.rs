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

//! `shun UUID` (spec. §6): marks an artifact for removal at the next sweep.

use std::path::Path;

use clap::Args as ClapArgs;
use warren_core::Uuid;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Full 40-hex-digit UUID of the artifact to shun.
    uuid: String,

    /// Reason recorded alongside the shun entry.
    #[arg(short = 'm', long, default_value = "shunned")]
    message: String,
}

pub fn run(ui: &Ui, repository: Option<&Path>, overrides: &[(String, String)], args: &Args) -> CommandResult<()> {
    let mut repo = cli_util::open_repo(repository, overrides)?;
    let uuid = Uuid::try_from_hex(&args.uuid)
        .ok_or_else(|| CommandError::UserError(format!("{:?} is not a valid UUID", args.uuid)))?;
    repo.shun(uuid, args.message.clone())?;
    ui.write_line(&format!("shunned {}", uuid.short()));
    Ok(())
}
