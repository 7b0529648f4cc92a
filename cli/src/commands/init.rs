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

//! `init DIR`: not itself one of spec. §6's CLI verbs (the spec starts from
//! an already-open repository), but every other command needs one to exist,
//! the same way the teacher's `jj git init`/`jj debug init-simple` bootstrap
//! a repository before any other command can run.

use std::env;
use std::path::PathBuf;

use clap::Args as ClapArgs;
use warren_core::Repo;

use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Directory to create the repository in; defaults to the current
    /// directory.
    directory: Option<PathBuf>,
}

pub fn run(ui: &Ui, args: &Args) -> CommandResult<()> {
    let root = match &args.directory {
        Some(dir) => dir.clone(),
        None => env::current_dir().map_err(|e| crate::command_error::CommandError::UserError(e.to_string()))?,
    };
    Repo::init(&root)?;
    ui.write_line(&format!("initialized repository at {}", root.display()));
    Ok(())
}
