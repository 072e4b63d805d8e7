// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The nicdb daemon: a whois server over a file-backed registry, and
//! the tooling to fill that registry.

use std::fmt::Write;
use std::process;

use log::error;

mod args;
mod config;
mod import;
mod run;

use args::Command;

fn main() {
    let args = args::parse();
    match args.command {
        Command::Run(run_args) => run::run(run_args),
        Command::Import(import_args) => import::import(import_args),
    }
}

/// Logs `e` with its chain of causes under `headline`, then exits
/// with failure.
fn fail(headline: &str, e: anyhow::Error) -> ! {
    let mut message = describe_error(headline, &e);
    message.push_str("\nExiting with failure.");
    error!("{}", message);
    process::exit(1);
}

/// Formats `e` and its chain of causes, one per line, under
/// `headline`.
fn describe_error(headline: &str, e: &anyhow::Error) -> String {
    let mut message = format!("{}:", headline);
    for (i, cause) in e.chain().enumerate() {
        write!(message, "\n[{}] {}", i + 1, cause).unwrap();
    }
    message
}
