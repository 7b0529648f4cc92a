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

//! `reconstruct FILE DIR` (spec. §6): rebuilds a repository from a
//! `deconstruct`ed directory. This crate has no single-file repository
//! format (spec. §4.B uses a directory-per-repository store), so `FILE`
//! names the new repository's root directory rather than a database file.

use std::path::PathBuf;

use clap::Args as ClapArgs;
use warren_core::Repo;

use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Root directory for the repository to create.
    repository: PathBuf,

    /// Directory previously populated by `deconstruct`.
    dump_directory: PathBuf,
}

pub fn run(ui: &Ui, args: &Args) -> CommandResult<()> {
    Repo::reconstruct(&args.repository, &args.dump_directory)?;
    ui.write_line(&format!(
        "reconstructed repository at {} from {}",
        args.repository.display(),
        args.dump_directory.display(),
    ));
    Ok(())
}
