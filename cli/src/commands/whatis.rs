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

//! `whatis NAME` (spec. §6).

use std::path::Path;

use clap::Args as ClapArgs;

use crate::cli_util;
use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {
    name: String,
}

pub fn run(ui: &Ui, repository: Option<&Path>, overrides: &[(String, String)], args: &Args) -> CommandResult<()> {
    let repo = cli_util::open_repo(repository, overrides)?;
    let info = repo.whatis(&args.name)?;
    ui.write_line(&format!("uuid:    {}", info.uuid.hex()));
    ui.write_line(&format!("kind:    {:?}", info.kind));
    if let Some(user) = &info.user {
        ui.write_line(&format!("user:    {user}"));
    }
    if let Some(mtime) = &info.mtime {
        ui.write_line(&format!("mtime:   {}", mtime.to_iso8601()));
    }
    if let Some(comment) = &info.comment {
        ui.write_line(&format!("comment: {comment}"));
    }
    Ok(())
}
