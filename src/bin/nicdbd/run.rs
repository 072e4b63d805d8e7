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

//! Implements the `run` command (i.e., running the server).

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use nicdb::db::{CachingDatabase, FileDatabase};
use nicdb::engine::{Engine, EngineConfig};
use nicdb::io::TokioIoProvider;

use crate::args::RunArgs;
use crate::config::{self, Config, EngineSection};

/// The specific database type we serve.
pub type Store = CachingDatabase<FileDatabase>;

/// The specific [`Server`](nicdb::server::Server) type we use.
pub type Server = nicdb::server::Server<Store>;

/// Runs the server.
pub fn run(args: RunArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    if let Err(e) = try_running(args) {
        crate::fail("Failed to run", e);
    }
    info!("Exiting with success.");
}

fn try_running(run_args: RunArgs) -> Result<()> {
    info!(
        "nicdb daemon v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    // Get the configuration, either from the file system or from the
    // command line arguments, as appropriate.
    let config_path = run_args.config.clone();
    let config = if let Some(ref config_path) = config_path {
        info!("Loading the configuration from {}.", config_path.display());
        config::load_from_path(config_path, false).context("failed to load the configuration")?
    } else {
        info!("Loading the configuration from the command line.");
        config::load_from_args(run_args).context("failed to load the configuration")?
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the Tokio runtime")?;

    // Bind before opening the database: building the index may be
    // expensive, so it's better to fail fast.
    let addrs: Vec<SocketAddr> = config
        .address
        .iter()
        .map(|ip| SocketAddr::new(*ip, config.port))
        .collect();
    let mut io_provider = runtime
        .block_on(TokioIoProvider::bind(addrs))
        .context("failed to bind sockets")?;
    io_provider.set_read_timeout(config.server.read_timeout());

    let database = Arc::new(open_database(&config)?);
    let mut engine_section = config.engine.clone();
    let engine = Engine::new(database.clone(), EngineConfig::from(&engine_section))
        .context("failed to build the query engine")?;
    let mut server = Server::new(Arc::new(engine));
    server.set_primer(config.server.primer.clone());

    // Set up signal handling.
    let mut signals = set_up_signal_handling().context("failed to set up signal handling")?;

    // Start the I/O provider.
    info!("Set-up is complete; starting the server.");
    let server = Arc::new(server);
    let shutdown_controller = {
        let _guard = runtime.enter();
        io_provider.start(&server)
    };

    // Process incoming signals.
    for signal in signals.forever() {
        match signal {
            s @ (SIGINT | SIGTERM) => {
                let name = match s {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    _ => unreachable!(),
                };
                info!("Received {}; shutting down.", name);
                break;
            }
            SIGHUP => {
                info!("Received SIGHUP; reloading the engine.");
                match reload_engine(config_path.as_deref(), &engine_section, &database, &server) {
                    Ok(section) => engine_section = section,
                    Err(e) => error!("{}", crate::describe_error("Failed to reload the engine", &e)),
                }
            }
            _ => unreachable!(),
        }
    }

    // Shut down the server.
    shutdown_controller.blocking_shut_down();
    info!("Shutdown complete.");
    Ok(())
}

fn open_database(config: &Config) -> Result<Store> {
    info!("Opening the database at {}.", config.database.display());
    let database = FileDatabase::open(&config.database)
        .with_context(|| format!("failed to open the database at {}", config.database.display()))?
        .with_case_insensitive(config.case_insensitive)
        .with_synonyms(config.synonyms());
    Ok(CachingDatabase::new(
        database,
        config.cache.ttl(),
        config.cache.negative,
    ))
}

fn set_up_signal_handling() -> Result<Signals> {
    let all_signals = &[SIGHUP, SIGINT, SIGTERM];
    let term_signals = &[SIGINT, SIGTERM];
    let already_terminating = Arc::new(AtomicBool::new(false));

    // This sets up signal handlers to exit immediately if a second
    // termination signal arrives before the process finishes shutting
    // down gracefully.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, already_terminating.clone())?;
        signal_hook::flag::register(*sig, already_terminating.clone())?;
    }

    Signals::new(all_signals).map_err(Into::into)
}

/// Rebuilds the engine, rereading its settings from `config_path` if
/// the configuration came from a file. The cache is cleared first, so
/// the new CIDR index sees the database as it is now.
fn reload_engine(
    config_path: Option<&Path>,
    current: &EngineSection,
    database: &Arc<Store>,
    server: &Server,
) -> Result<EngineSection> {
    let section = match config_path {
        Some(path) => {
            config::load_from_path(path, true)
                .context("failed to reload the configuration")?
                .engine
        }
        None => current.clone(),
    };
    database.clear();
    let engine = Engine::new(database.clone(), EngineConfig::from(&section))
        .context("failed to rebuild the query engine")?;
    server.set_engine(Arc::new(engine));
    Ok(section)
}
