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

//! `diff [--from REF] [--to REF] [FILE…]` (spec. §6).

use std::path::Path;

use clap::Args as ClapArgs;
use warren_core::ResolveKind;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Defaults to the current checkout's primary parent.
    #[arg(long)]
    from: Option<String>,

    /// Defaults to the current checkout.
    #[arg(long)]
    to: Option<String>,

    /// Only diff these paths; every changed path if none given.
    paths: Vec<String>,
}

pub fn run(ui: &Ui, repository: Option<&Path>, overrides: &[(String, String)], args: &Args) -> CommandResult<()> {
    let repo = cli_util::open_repo(repository, overrides)?;
    let to = match &args.to {
        Some(name) => repo.resolve(name, ResolveKind::Checkin)?,
        None => repo
            .current()
            .ok_or_else(|| CommandError::UserError("no working copy is checked out".to_string()))?,
    };
    let from = match &args.from {
        Some(name) => repo.resolve(name, ResolveKind::Checkin)?,
        None => repo
            .index()
            .primary_parent(to)
            .ok_or_else(|| CommandError::UserError(format!("{} has no parent to diff against", to.short())))?,
    };
    let selected = (!args.paths.is_empty()).then_some(args.paths.as_slice());
    let bytes = repo.diff(from, to, selected)?;
    ui.write_raw(&bytes);
    Ok(())
}
