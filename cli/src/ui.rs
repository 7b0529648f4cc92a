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

//! A deliberately small stand-in for the teacher's `Ui`: stdout/stderr plus
//! a "should I color this" flag. No pager, no formatter stack, no config
//! layer of its own — this crate's core is the engine below the
//! presentation layer (spec. §1 "Out of scope"), so the CLI only needs
//! enough of `Ui` to print command output and hints legibly.

use std::io::IsTerminal as _;
use std::io::Write as _;

pub struct Ui {
    color: bool,
}

impl Ui {
    pub fn from_env() -> Self {
        Self {
            color: std::io::stdout().is_terminal(),
        }
    }

    /// Writes a line of command output to stdout.
    pub fn write_line(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }

    /// Writes raw bytes (e.g. a diff) to stdout, unmodified.
    pub fn write_raw(&self, bytes: &[u8]) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(bytes);
    }

    /// A heading, bolded when stdout is a terminal.
    pub fn heading(&self, text: &str) -> String {
        if self.color {
            format!("\u{1b}[1m{text}\u{1b}[0m")
        } else {
            text.to_string()
        }
    }

    /// A non-fatal warning, printed to stderr (e.g. a merge conflict count).
    pub fn warn(&self, text: &str) {
        let mut err = std::io::stderr().lock();
        if self.color {
            let _ = writeln!(err, "\u{1b}[33mwarning:\u{1b}[0m {text}");
        } else {
            let _ = writeln!(err, "warning: {text}");
        }
    }

    pub fn error(&self, text: &str) {
        let mut err = std::io::stderr().lock();
        if self.color {
            let _ = writeln!(err, "\u{1b}[31merror:\u{1b}[0m {text}");
        } else {
            let _ = writeln!(err, "error: {text}");
        }
    }
}

impl Default for Ui {
    fn default() -> Self {
        Self::from_env()
    }
}
