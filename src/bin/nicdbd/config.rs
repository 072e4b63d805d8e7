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

//! Implements the server configuration file.

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::Level::Debug;
use log::{debug, log_enabled};
use paste::paste;
use regex::Regex;
use serde::{de, Deserialize};

use nicdb::engine::{EngineConfig, TypeHint};
use nicdb::io::DEFAULT_READ_TIMEOUT;
use nicdb::object::Synonyms;

use crate::args::RunArgs;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the server configuration from the file given by `path`.
///
/// The `reloading` parameter controls how the configuration is
/// summarized in the log: if reloading, only the engine configuration
/// (the only thing that we support reloading) is summarized. This
/// parameter does *not* otherwise affect processing.
pub fn load_from_path(path: impl AsRef<Path>, reloading: bool) -> Result<Config> {
    let dir = match path.as_ref().parent() {
        Some(p) => p,
        None => return Err(anyhow!("the configuration file path has no parent")),
    };
    let raw_config = fs::read(path.as_ref()).context("failed to read the configuration file")?;
    let mut config = parse(&raw_config)?;

    // When loading the configuration from a path, the database path is
    // interpreted relative to the configuration file's directory.
    if config.database.is_relative() {
        config.database = dir.join(&config.database);
    }

    if reloading {
        log_engine_summary(&config.engine);
    } else {
        log_config_summary(&config);
    }
    Ok(config)
}

fn parse(raw_config: &[u8]) -> Result<Config> {
    toml::from_slice(raw_config).context("failed to parse the configuration file")
}

/// Loads the server configuration from the parsed command line
/// arguments given by `args`.
pub fn load_from_args(args: RunArgs) -> Result<Config> {
    let database = args
        .database
        .ok_or_else(|| anyhow!("no database directory was given"))?;
    let address = if args.address.is_empty() {
        default_address()
    } else {
        args.address
    };
    let config = Config {
        database,
        address,
        port: args.port.unwrap_or(DEFAULT_PORT),
        case_insensitive: false,
        synonyms: BTreeMap::new(),
        cache: CacheConfig::default(),
        server: ServerConfig::default(),
        engine: EngineSection::default(),
    };
    log_config_summary(&config);
    Ok(config)
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        // Don't compute the message if it will never be printed.
        return;
    }

    let addresses: Vec<String> = config.address.iter().map(ToString::to_string).collect();
    let mut message = format!(
        "Configuration loaded:\n\
         Database:     {}\n\
         Addresses:    {}\n\
         Port:         {}\n\
         Cache TTL:    {}s\n\
         Primer:       {}\n",
        config.database.display(),
        addresses.join(", "),
        config.port,
        config.cache.ttl,
        if config.server.primer.is_some() { "set" } else { "none" },
    );
    summarize_engine(&config.engine, &mut message);
    debug!("{}", message);
}

/// Summarizes only the engine settings in the log, if the debug log
/// level is enabled. Used when reloading.
fn log_engine_summary(engine: &EngineSection) {
    if log_enabled!(Debug) {
        let mut message = String::from("Engine configuration reloaded:\n");
        summarize_engine(engine, &mut message);
        debug!("{}", message);
    }
}

/// Produces the engine summary for [`log_config_summary`] and
/// [`log_engine_summary`].
fn summarize_engine(engine: &EngineSection, message: &mut String) {
    write!(
        message,
        "Schemas:      {}\n\
         Validation:   {}\n\
         CIDR index:   {}\n\
         Depth:        {}\n\
         Type hints:   {}",
        engine.schemas,
        engine.validate,
        engine.index,
        engine.related_depth,
        engine.type_hints.len(),
    )
    .unwrap();
    for hint in &engine.type_hints {
        write!(message, "\n  {} => {}", hint.pattern.0, hint.classes.join(", ")).unwrap();
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    #[serde(default = "default_address")]
    pub address: Vec<IpAddr>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub synonyms: BTreeMap<String, String>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineSection,
}

impl Config {
    /// Returns the class synonym table: the defaults plus the
    /// configured ones.
    pub fn synonyms(&self) -> Synonyms {
        let mut synonyms = Synonyms::default();
        for (synonym, primary) in &self.synonyms {
            synonyms.insert(synonym, primary);
        }
        synonyms
    }
}

const DEFAULT_PORT: u16 = 43;

fn default_address() -> Vec<IpAddr> {
    vec![
        IpAddr::V6(Ipv6Addr::LOCALHOST),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
    ]
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: CACHE                                       //
////////////////////////////////////////////////////////////////////////

/// The configuration of the object cache.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Seconds an object stays cached. Zero disables the cache.
    #[serde(default = "default_cache_ttl")]
    pub ttl: u64,
    #[serde(default = "default_negative_caching")]
    pub negative: bool,
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_negative_caching() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            negative: default_negative_caching(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: SERVER                                      //
////////////////////////////////////////////////////////////////////////

/// The configuration for server behavior/options.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub primer: Option<String>,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT.as_secs()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            primer: None,
            read_timeout: default_read_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: ENGINE                                      //
////////////////////////////////////////////////////////////////////////

/// The configuration of the query engine. This mirrors
/// [`EngineConfig`] and can be converted into one.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_true")]
    pub schemas: bool,
    #[serde(default)]
    pub validate: bool,
    #[serde(default = "default_true")]
    pub index: bool,
    #[serde(default = "default_related_depth")]
    pub related_depth: usize,
    #[serde(default = "default_address_classes")]
    pub address_classes: Vec<String>,
    #[serde(default)]
    pub type_hints: Vec<TypeHintConfig>,
}

/// A rule restricting the classes searched for matching terms.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeHintConfig {
    pub pattern: ConfigRegex,
    pub classes: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_related_depth() -> usize {
    EngineConfig::default().related_depth
}

fn default_address_classes() -> Vec<String> {
    EngineConfig::default().address_classes
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            schemas: default_true(),
            validate: false,
            index: default_true(),
            related_depth: default_related_depth(),
            address_classes: default_address_classes(),
            type_hints: Vec::new(),
        }
    }
}

impl From<&EngineSection> for EngineConfig {
    fn from(section: &EngineSection) -> Self {
        Self {
            schemas: section.schemas,
            validate: section.validate,
            index: section.index,
            related_depth: section.related_depth,
            address_classes: section.address_classes.clone(),
            type_hints: section
                .type_hints
                .iter()
                .map(|hint| TypeHint {
                    pattern: hint.pattern.0.clone(),
                    classes: hint.classes.clone(),
                })
                .collect(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// WRAPPERS OVER LIBRARY TYPES FOR SERDE                              //
////////////////////////////////////////////////////////////////////////

/// Generates a deserializable `ConfigX` structure wrapping an `X` type,
/// using its [`FromStr`](std::str::FromStr) implementation.
macro_rules! make_serde_wrapper {
    ($wrapper:ident, $over:ty, $description:literal) => {
        /// A macro-generated deserializable wrapper.
        #[derive(Clone, Debug)]
        pub struct $wrapper(pub $over);

        impl<'de> Deserialize<'de> for $wrapper {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(paste! { [<$wrapper Visitor>] })
            }
        }

        paste! {
            /// A macro-generated [`Visitor`](de::Visitor).
            #[derive(Debug)]
            struct [<$wrapper Visitor>];
        }

        impl<'de> de::Visitor<'de> for paste! { [<$wrapper Visitor>] } {
            type Value = $wrapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($description)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse()
                    .map($wrapper)
                    .map_err(|e| E::custom(format!("invalid {}: {}", $description, e)))
            }
        }
    };
}

make_serde_wrapper!(ConfigRegex, Regex, "regular expression");

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
database = "registry"
address = ["::1", "127.0.0.1"]
port = 4343
case_insensitive = true
synonyms = { net = "inetnum" }

[cache]
ttl = 0

[server]
primer = "% Example whois"

[engine]
validate = true
related_depth = 1

[[engine.type_hints]]
pattern = "^[A-Z]+[0-9]*-TEST$"
classes = ["person", "role"]
"#;

    #[test]
    fn full_configuration_parses() {
        let config = parse(FULL.as_bytes()).unwrap();
        assert_eq!(config.database, PathBuf::from("registry"));
        assert_eq!(config.address.len(), 2);
        assert_eq!(config.port, 4343);
        assert!(config.case_insensitive);
        assert_eq!(config.cache.ttl(), Duration::ZERO);
        assert!(config.cache.negative);
        assert_eq!(config.server.read_timeout(), DEFAULT_READ_TIMEOUT);

        let synonyms = config.synonyms();
        assert_eq!(synonyms.primary_class("NET"), "inetnum");
        assert_eq!(synonyms.primary_class("dns"), "domain");

        let engine = EngineConfig::from(&config.engine);
        assert!(engine.schemas && engine.validate && engine.index);
        assert_eq!(engine.related_depth, 1);
        assert_eq!(engine.address_classes, ["inet-rtr"]);
        assert!(engine.type_hints[0].pattern.is_match("JD1-TEST"));
    }

    #[test]
    fn defaults_apply() {
        let config = parse(b"database = \"db\"\n").unwrap();
        assert_eq!(config.port, 43);
        assert_eq!(config.address, default_address());
        assert_eq!(config.cache.ttl, 60);
        assert!(config.server.primer.is_none());
        assert_eq!(config.engine.related_depth, 2);
    }

    #[test]
    fn bad_configurations_are_rejected() {
        assert!(parse(b"").is_err());
        assert!(parse(b"database = \"db\"\nbind = \"::1\"\n").is_err());
        assert!(parse(b"database = \"db\"\n[[engine.type_hints]]\npattern = \"(\"\nclasses = []\n").is_err());
    }

    #[test]
    fn database_paths_are_relative_to_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nicdbd.toml");
        fs::write(&path, "database = \"registry\"\n").unwrap();
        let config = load_from_path(&path, false).unwrap();
        assert_eq!(config.database, dir.path().join("registry"));
    }
}
