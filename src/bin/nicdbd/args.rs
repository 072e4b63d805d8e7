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

//! Implements command-line argument parsing.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The nicdb registry whois server
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server
    Run(RunArgs),

    /// Import RPSL files into a database
    Import(ImportArgs),
}

#[derive(Debug, Parser)]
#[clap(group(ArgGroup::new("required").required(true).args(&["config", "database"])))]
pub struct RunArgs {
    /// Set the configuration file to use
    #[clap(long, conflicts_with_all = &["address", "port", "database"], value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Set the server bind IP addresses
    #[clap(long, value_delimiter = ',', value_name = "IP,...")]
    pub address: Vec<IpAddr>,

    /// Set the server port
    #[clap(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// The database directory to serve
    #[clap(value_name = "DB")]
    pub database: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct ImportArgs {
    /// Replace the source of every imported object
    #[clap(long, value_name = "SOURCE")]
    pub source: Option<String>,

    /// Delete objects of the imported classes that the files lack
    #[clap(long)]
    pub delete: bool,

    /// Create the database with this name if it does not exist
    #[clap(long, value_name = "NAME")]
    pub name: Option<String>,

    /// The database directory to import into
    #[clap(value_name = "DB")]
    pub database: PathBuf,

    /// The RPSL files to import
    #[clap(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,
}
