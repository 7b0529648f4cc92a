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

//! `status`: shows which working-copy paths differ from the checked-out
//! manifest. Not itself one of spec. §6's CLI verbs, but an ambient
//! convenience every command above relies on implicitly (`commit`, `update`,
//! and `merge` all run the same signature check before acting).

use std::path::Path;

use clap::Args as ClapArgs;

use crate::cli_util;
use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {}

pub fn run(ui: &Ui, repository: Option<&Path>, overrides: &[(String, String)], _args: &Args) -> CommandResult<()> {
    let mut repo = cli_util::open_repo(repository, overrides)?;
    let changes = repo.status()?;
    if changes.is_empty() {
        ui.write_line("working copy is clean");
    }
    for (path, deleted) in &changes {
        ui.write_line(&format!("{} {path}", if *deleted { "D" } else { "M" }));
    }
    if let Some(checkin) = repo.current() {
        ui.write_line(&format!("checked out: {}", checkin.short()));
    }
    Ok(())
}
