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

//! `rebuild [--randomize]` (spec. §4.H): regenerates every derived index
//! from the artifact store.

use std::path::Path;

use clap::Args as ClapArgs;
use warren_core::RebuildOptions;

use crate::cli_util;
use crate::command_error::CommandResult;
use crate::ui::Ui;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Insert artifacts in a pseudo-random order instead of raw-then-delta,
    /// to demonstrate the rebuild is insertion-order independent.
    #[arg(long)]
    randomize: bool,

    /// Seed for `--randomize`'s deterministic shuffle.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

pub fn run(ui: &Ui, repository: Option<&Path>, overrides: &[(String, String)], args: &Args) -> CommandResult<()> {
    let mut repo = cli_util::open_repo(repository, overrides)?;
    let options = RebuildOptions {
        randomize: args.randomize,
        seed: args.seed,
    };
    let report = repo.rebuild(options, |_| {});
    ui.write_line(&format!("linked {} artifact(s)", report.linked));
    for (uuid, reason) in &report.skipped {
        ui.warn(&format!("skipped {}: {reason}", uuid.short()));
    }
    Ok(())
}
