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

//! Implements the `import` command.

use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use env_logger::Env;
use log::info;

use nicdb::db::FileDatabase;
use nicdb::rpsl::Parser;
use nicdb::sync::{self, SyncOptions, SyncReport};

use crate::args::ImportArgs;

/// Imports RPSL files into a database.
pub fn import(args: ImportArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    match try_importing(args) {
        Ok(report) => println!("{}", report),
        Err(e) => crate::fail("Failed to import", e),
    }
}

fn try_importing(args: ImportArgs) -> Result<SyncReport> {
    let database = match args.name {
        Some(ref name) => FileDatabase::create(&args.database, name),
        None => FileDatabase::open(&args.database),
    }
    .with_context(|| format!("failed to open the database at {}", args.database.display()))?;

    // Open every file up front, so that a missing one aborts the import
    // before anything is written.
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        info!("Importing {}.", path.display());
        files.push(BufReader::new(file));
    }
    let objects = files.into_iter().flat_map(Parser::new);

    let options = SyncOptions {
        source: args.source,
        delete_missing: args.delete,
        classes: None,
    };
    sync::sync(&database, objects, &options).context("failed to synchronize the database")
}
