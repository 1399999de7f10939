use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Configuration for the spectrometer.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (SPEC_* prefix)
/// 3. Config file (~/.config/spectrometer/config.toml or `-c FILE`)
/// 4. Built-in defaults (lowest priority)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the MaRCoS server runs and how to reach it.
    pub server: ServerConfig,

    /// Directory that acquired FIDs are saved to.
    ///
    /// Can be set via:
    /// - ENV: SPEC_DATA_DIR
    /// - Config: data_dir = "/path/to/data"
    /// - Default: ~/.local/share/spectrometer/data
    pub data_dir: PathBuf,

    /// Name written into every saved FID.
    pub spectrometer_name: String,

    /// Sample rate after down-conversion in Hz.
    pub sample_rate: f64,
}

/// The `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address of the Red Pitaya.
    pub ip_address: String,
    /// TCP port of the MaRCoS server.
    pub port: u16,
    /// FPGA clock in MHz; 122.88 for the STEMlab 122.88-16.
    pub fpga_clk_freq_mhz: f64,
    /// User for SSH logins on the Red Pitaya.
    pub ssh_user: String,
    /// Board model the FPGA bitstream is chosen for.
    pub red_pitaya_model: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip_address: "192.168.1.100".to_string(),
            port: 11111,
            fpga_clk_freq_mhz: 122.88,
            ssh_user: "root".to_string(),
            red_pitaya_model: "rp-122".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            data_dir: default_data_dir(),
            spectrometer_name: "magnETHical v0.1".to_string(),
            sample_rate: 320e3,
        }
    }
}

impl Config {
    /// Load configuration from the default file and environment variables.
    ///
    /// Searches for config file at: ~/.config/spectrometer/config.toml
    /// Reads environment variables with SPEC_ prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from `config_path` and environment variables.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("spec");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?;

        log::debug!("Loaded configuration: {config:?}");
        Ok(config)
    }

    /// Apply `--ip`/`--port` overrides from the command line.
    #[must_use]
    pub fn with_overrides(mut self, ip_address: Option<String>, port: Option<u16>) -> Self {
        if let Some(ip) = ip_address {
            self.server.ip_address = ip;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        self
    }

    /// FPGA clock frequency in Hz.
    pub fn fpga_clock_freq_hz(&self) -> f64 {
        self.server.fpga_clk_freq_mhz * 1e6
    }

    /// Address of the MaRCoS server.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .server
            .ip_address
            .parse()
            .with_context(|| format!("Invalid IP address '{}'", self.server.ip_address))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

/// Get the default data directory.
///
/// Returns: ~/.local/share/spectrometer/data (or platform equivalent)
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spectrometer")
        .join("data")
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/spectrometer/config.toml
/// - macOS: ~/Library/Application Support/spectrometer/config.toml
/// - Windows: %APPDATA%\spectrometer\config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spectrometer")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# magnETHical spectrometer configuration
#
# Configuration is loaded from multiple sources with the following priority:
# 1. CLI arguments (highest priority)
# 2. Environment variables (SPEC_* prefix)
# 3. This config file
# 4. Built-in defaults (lowest priority)

# Directory acquired FIDs are written to
#
# Can also be set via:
# - Environment: SPEC_DATA_DIR=/path/to/data
#
# Default: Platform-specific data directory
#data_dir = "/path/to/data"

# Name of the spectrometer, stored in every FID
spectrometer_name = "magnETHical v0.1"

# Sample rate after down-conversion in Hz. The FPGA clock must be an
# integer multiple of it.
sample_rate = 320000.0

[server]
# Address of the Red Pitaya running the MaRCoS server
#
# Can also be set via:
# - CLI: spectrometer --ip 192.168.1.100 start
ip_address = "192.168.1.100"

# Port of the MaRCoS server
port = 11111

# FPGA clock frequency in MHz (122.88 for the STEMlab 122.88-16)
fpga_clk_freq_mhz = 122.88

# User for SSH logins on the Red Pitaya
ssh_user = "root"

# Board model the FPGA bitstream is chosen for
red_pitaya_model = "rp-122"
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    ensure_config_file_at(&config_file_path())
}

/// Create a default config file at `config_path` if it doesn't exist.
pub fn ensure_config_file_at(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(config_path, example_config()).context("Failed to write config file")?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 11111);
        assert_eq!(config.server.ip_address, "192.168.1.100");
        assert!((config.fpga_clock_freq_hz() - 122.88e6).abs() < 1e-3);
        assert!(!config.data_dir.as_os_str().is_empty());
    }

    #[test]
    fn test_example_config_parses_to_defaults() {
        let parsed: Config = toml_from_example();
        let defaults = Config::default();
        assert_eq!(parsed.server, defaults.server);
        assert_eq!(parsed.spectrometer_name, defaults.spectrometer_name);
        assert!((parsed.sample_rate - defaults.sample_rate).abs() < 1e-9);
    }

    fn toml_from_example() -> Config {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        assert!(ensure_config_file_at(&path).unwrap());
        Config::load_from(&path).unwrap()
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "sample_rate = 256000.0\n[server]\nip_address = \"10.0.0.2\"\nport = 2222\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.ip_address, "10.0.0.2");
        assert_eq!(config.server.port, 2222);
        assert_eq!(config.server.ssh_user, "root");
        assert!((config.sample_rate - 256e3).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_ensure_config_file_only_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");
        assert!(ensure_config_file_at(&path).unwrap());
        assert!(!ensure_config_file_at(&path).unwrap());
    }

    #[test]
    fn test_overrides_and_socket_addr() {
        let config = Config::default().with_overrides(Some("10.1.2.3".to_string()), Some(4000));
        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "10.1.2.3:4000");

        let bad = Config::default().with_overrides(Some("not-an-ip".to_string()), None);
        assert!(bad.socket_addr().is_err());
    }
}
