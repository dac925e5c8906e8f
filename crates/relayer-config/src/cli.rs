// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::{Path, PathBuf};

use anyhow::Context;
use directories_next::ProjectDirs;
use structopt::StructOpt;

use crate::RelayerConfig;

/// Package identifier, where the default configuration & database are defined.
/// If the user does not start the relayer with the `--config-dir`
/// it will default to read from the default location depending on the OS.
pub const PACKAGE_ID: [&str; 3] = ["tools", "webb", "polygon-relayer"];

/// The Polygon Relayer Command-line tool
///
/// Start the relayer from a config directory:
///
/// $ polygon-relayer -vvv -c <CONFIG_DIR_PATH>
#[derive(Debug, Default, StructOpt)]
#[structopt(name = "Polygon Relayer")]
pub struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: i32,
    /// Directory that contains configration files.
    #[structopt(
        short = "c",
        long = "config-dir",
        value_name = "PATH",
        parse(from_os_str)
    )]
    pub config_dir: Option<PathBuf>,
    /// Create the Database Store in a temporary directory.
    /// and will be deleted when the process exits.
    #[structopt(long)]
    pub tmp: bool,
    /// Start scanning the EVM sidechain at this height,
    /// unless the store already went further.
    #[structopt(long = "eth-start", value_name = "HEIGHT")]
    pub eth_start: Option<u64>,
    /// Start scanning the EVM sidechain at this height,
    /// even if the store already went further.
    #[structopt(long = "eth-start-force", value_name = "HEIGHT")]
    pub eth_start_force: Option<u64>,
    /// Start scanning Poly at this height,
    /// unless the store already went further.
    #[structopt(long = "poly-start", value_name = "HEIGHT")]
    pub poly_start: Option<u64>,
}

impl Opts {
    /// Applies the start heights given on the command line over the ones
    /// from the config files.
    pub fn apply_overrides(&self, config: &mut RelayerConfig) {
        if let Some(height) = self.eth_start {
            tracing::debug!("eth start height overridden to {}", height);
            config.eth.start_height = Some(height);
        }
        if let Some(height) = self.eth_start_force {
            tracing::debug!("eth forced start height overridden to {}", height);
            config.eth.force_start_height = Some(height);
        }
        if let Some(height) = self.poly_start {
            tracing::debug!("poly start height overridden to {}", height);
            config.poly.start_height = Some(height);
        }
    }
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("failed to get config")
}

/// Loads the configuration from the given directory.
///
/// Returns `Ok(Config)` on success, or `Err(anyhow::Error)` on failure.
///
/// # Arguments
///
/// * `config_dir` - An optional `PathBuf` representing the directory that contains the configuration.
pub fn load_config<P>(
    config_dir: Option<P>,
) -> Result<RelayerConfig, anyhow::Error>
where
    P: AsRef<Path>,
{
    tracing::debug!("Getting default dirs for polygon relayer");
    let path = match config_dir {
        Some(p) => p.as_ref().to_path_buf(),
        None => project_dirs()?.config_dir().to_path_buf(),
    };
    // return an error if the path is not a directory.
    if !path.is_dir() {
        return Err(anyhow::anyhow!("{} is not a directory", path.display()));
    }
    tracing::trace!("Loading Config from {} ..", path.display());
    let v = crate::utils::load(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    tracing::trace!("Config loaded..");
    Ok(v)
}

/// Sets up the logger for the relayer, based on the verbosity level passed in.
///
/// Returns `Ok(())` on success, or `Err(anyhow::Error)` on failure.
pub fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let directive = format!("polygon_relayer={}", log_level).parse()?;
    let probe_directive =
        format!("{}={}", polygon_relayer_utils::probe::TARGET, log_level)
            .parse()?;
    let watchers_directive =
        format!("polygon_event_watcher={}", log_level).parse()?;
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(directive)
        .add_directive(watchers_directive)
        .add_directive(probe_directive);
    let logger = tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter);
    // if we are not compiling for integration tests, we should use pretty logs
    #[cfg(not(feature = "integration-tests"))]
    let logger = logger.pretty();
    // otherwise, we should use json, which is easy to parse.
    #[cfg(feature = "integration-tests")]
    let logger = logger.json().flatten_event(true).with_current_span(false);

    logger
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set up the logger: {e}"))
}

/// Where the durable store lives for the given options and config.
///
/// `store-path` from the config wins, otherwise the store sits in a `store`
/// directory next to the config directory.
pub fn store_path(
    opts: &Opts,
    config: &RelayerConfig,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = config.store_path.as_ref() {
        return Ok(path.clone());
    }
    let path = match opts.config_dir.as_ref() {
        Some(dir) => match dir.parent() {
            Some(parent) => parent.join("store"),
            None => dir.join("store"),
        },
        None => project_dirs()?.data_local_dir().join("store"),
    };
    Ok(path)
}

/// Creates a database store for the relayer based on the configuration passed in.
///
/// Returns `Ok(SledStore)` on success, or `Err(anyhow::Error)` on failure.
pub async fn create_store(
    opts: &Opts,
    config: &RelayerConfig,
) -> anyhow::Result<polygon_relayer_store::SledStore> {
    // check if we shall use the temp dir.
    if opts.tmp {
        tracing::debug!("Using temp dir for store");
        let store = polygon_relayer_store::SledStore::temporary()?;
        return Ok(store);
    }
    let db_path = store_path(opts, config)?;
    tracing::debug!("Opening store at {}", db_path.display());
    let store = polygon_relayer_store::SledStore::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    Ok(store)
}
