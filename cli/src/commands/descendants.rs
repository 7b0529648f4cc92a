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

//! `descendants [REF]` (spec. §6).

use std::path::Path;

use clap::Args as ClapArgs;
use warren_core::ResolveKind;

use crate::cli_util;
use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Defaults to the current checkout.
    base: Option<String>,
}

pub fn run(ui: &Ui, repository: Option<&Path>, overrides: &[(String, String)], args: &Args) -> CommandResult<()> {
    let repo = cli_util::open_repo(repository, overrides)?;
    let base = args.base.as_deref().map(|name| repo.resolve(name, ResolveKind::Checkin)).transpose()?;
    for uuid in repo.descendants(base)? {
        ui.write_line(&uuid.hex());
    }
    Ok(())
}
