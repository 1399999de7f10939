pub mod acquire;
pub mod config;
pub mod inspect;
pub mod process;
pub mod server;

pub use acquire::{acquire_fid, acquire_rabi, acquire_spin_echo, acquire_t2, AcquireSettings};
pub use inspect::run_inspect;
pub use process::{run_process, ProcessOptions};
pub use server::{flash_fpga, server_status, setup_server, start_server, stop_server};

use anyhow::{Context, Result};
use spectrometer_hw::Config;
use std::path::Path;

/// Load the configuration from `config_path` and the environment and apply
/// the connection flags given on the command line.
pub fn load_config(config_path: &Path, ip: Option<String>, port: Option<u16>) -> Result<Config> {
    let config = Config::load_from(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    Ok(config.with_overrides(ip, port))
}
