use anyhow::Result;
use clap::Parser;
use spectrometer_core::{Lineshape, Scale};
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(
    name = "spectrometer",
    version,
    about = "CLI client for the magnETHical spectrometer"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase output verbosity (debug logging)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the *.toml configuration file
    /// (default: ~/.config/spectrometer/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// IP address of the spectrometer
    #[arg(short, long, global = true)]
    ip: Option<String>,

    /// Port of the spectrometer server
    #[arg(short, long, global = true)]
    port: Option<u16>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Flash the MaRCoS bitstream onto the Red Pitaya
    ///
    /// Stops a running server and downloads the bitstream matching the
    /// board model. Standard Red Pitaya images are flashed through
    /// /dev/xdevcfg; Ocra images get the bitstream and its device tree
    /// overlay in /lib/firmware, loaded through the FPGA manager.
    FlashFpga {
        /// Red Pitaya model, e.g. rp-122 (default: from config)
        #[arg(long)]
        model: Option<String>,
    },
    /// Build the MaRCoS server on the Red Pitaya
    ///
    /// Sets the board clock, uploads the server sources and compiles them
    /// with cmake. Needs to be run once after flashing the SD card.
    Setup,
    /// Start the MaRCoS server in the background
    Start,
    /// Stop the MaRCoS server
    Stop,
    /// Check whether the MaRCoS server is running
    IsRunning,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Run an experiment and save the FIDs to the data directory
    Acquire {
        #[command(subcommand)]
        experiment: AcquireCommands,
    },
    /// Process a recorded FID into a spectrum
    ///
    /// Zero fills to the next power of two, Fourier transforms and phases
    /// the spectrum. Prints a summary and optionally exports the spectrum
    /// as CSV or lists its peaks.
    Process {
        /// Path to the .fid file
        file: PathBuf,

        /// Transform the recorded points only
        #[arg(long)]
        no_zero_fill: bool,

        /// Zero-order phase in degrees (default: automatic)
        #[arg(long, allow_hyphen_values = true)]
        p0: Option<f64>,

        /// First-order phase in degrees, applied with --p0
        #[arg(long, allow_hyphen_values = true, requires = "p0")]
        p1: Option<f64>,

        /// Export the spectrum as CSV
        #[arg(long, value_name = "OUT")]
        csv: Option<PathBuf>,

        /// Pick and fit the peaks of the spectrum
        #[arg(long)]
        peaks: bool,

        /// Axis for the CSV export and the peak list (index, hz or ppm)
        #[arg(long, default_value = "hz")]
        scale: Scale,

        /// Lineshape fitted to the peaks (gauss, lorentz or pvoigt)
        #[arg(long, default_value = "lorentz")]
        lineshape: Lineshape,
    },
    /// List the FIDs below a directory
    Inspect {
        /// Directory to search recursively
        dir: PathBuf,

        /// Print the metadata as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, clap::Subcommand)]
enum ConfigCommands {
    /// Show current effective configuration
    Show,
    /// Get a specific config value (or the whole config file if no key)
    Get {
        /// Config key, e.g. sample_rate or server.port (omit to show file)
        key: Option<String>,
    },
    /// Set a config value
    Set {
        /// Config key, e.g. sample_rate or server.port
        key: String,
        /// Value to set
        value: String,
    },
    /// Show config file path
    Path,
    /// Show example configuration with documentation
    Example,
    /// Create config file with defaults
    Init,
}

#[derive(Debug, clap::Args)]
struct AcquireArgs {
    /// Use the built-in simulator instead of the MaRCoS server
    #[arg(long)]
    simulate: bool,

    /// Sample description stored in the FIDs
    #[arg(long, default_value = "Water")]
    sample: String,

    /// Frequency of the transmitted pulses in Hz
    #[arg(long, default_value_t = 25_090_000.0)]
    tx_freq: f64,

    /// Down-conversion frequency in Hz (default: the TX frequency)
    #[arg(long)]
    rx_freq: Option<f64>,

    /// Where to save the FIDs (default: from config)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum AcquireCommands {
    /// Single pulse followed by a recording
    Fid {
        #[command(flatten)]
        args: AcquireArgs,
        #[arg(long, default_value_t = 8.0)]
        pulse_length_us: f64,
        #[arg(long, default_value_t = 25.0)]
        delay_us: f64,
        #[arg(long, default_value_t = 15e3)]
        record_length_us: f64,
    },
    /// 90° pulse, τ, 180° pulse and a recording around the echo
    SpinEcho {
        #[command(flatten)]
        args: AcquireArgs,
        /// Length of the 90° pulse; the 180° pulse is twice as long
        #[arg(long, default_value_t = 9.0)]
        pulse_length_us: f64,
        #[arg(long, default_value_t = 4000.0)]
        delay_tau_us: f64,
        #[arg(long, default_value_t = 10e3)]
        record_length_us: f64,
    },
    /// Rabi nutation: pulses of increasing length to find the 90° pulse
    Rabi {
        #[command(flatten)]
        args: AcquireArgs,
        #[arg(long, default_value_t = 1.0)]
        min_length_us: f64,
        #[arg(long, default_value_t = 180.0)]
        max_length_us: f64,
        #[arg(long, default_value_t = 90)]
        steps: usize,
        #[arg(long, default_value_t = 30.0)]
        delay_us: f64,
        #[arg(long, default_value_t = 10e3)]
        record_length_us: f64,
        /// Seconds to wait between sequences
        #[arg(long, default_value_t = 1.0)]
        repetition_time: f64,
    },
    /// Spin echoes with increasing τ to measure T2
    T2 {
        #[command(flatten)]
        args: AcquireArgs,
        #[arg(long, default_value_t = 9.0)]
        pulse_length_us: f64,
        #[arg(long, default_value_t = 100.0)]
        min_tau_us: f64,
        #[arg(long, default_value_t = 300.0)]
        max_tau_us: f64,
        #[arg(long, default_value_t = 100)]
        steps: usize,
        #[arg(long, default_value_t = 10e3)]
        record_length_us: f64,
        /// Seconds to wait between sequences
        #[arg(long, default_value_t = 5.0)]
        repetition_time: f64,
    },
}

fn init_logging(verbose: u8) {
    let filter = if verbose > 0 {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(spectrometer_hw::config::config_file_path);
    log::debug!("Using config file {}", config_path.display());
    let load = || commands::load_config(&config_path, cli.ip.clone(), cli.port);

    match cli.command {
        Commands::FlashFpga { model } => {
            commands::flash_fpga(&load()?, model).await?;
        }
        Commands::Setup => commands::setup_server(&load()?).await?,
        Commands::Start => commands::start_server(&load()?).await?,
        Commands::Stop => commands::stop_server(&load()?).await?,
        Commands::IsRunning => commands::server_status(&load()?).await?,
        Commands::Config { action } => match action {
            ConfigCommands::Show => commands::config::show_config(&config_path)?,
            ConfigCommands::Get { key } => commands::config::get_config(&config_path, key)?,
            ConfigCommands::Set { key, value } => {
                commands::config::set_config(&config_path, &key, &value)?;
            }
            ConfigCommands::Path => commands::config::show_path(&config_path)?,
            ConfigCommands::Example => commands::config::show_example()?,
            ConfigCommands::Init => commands::config::init_config(&config_path)?,
        },
        Commands::Acquire { experiment } => run_acquire(&load()?, experiment).await?,
        Commands::Process {
            file,
            no_zero_fill,
            p0,
            p1,
            csv,
            peaks,
            scale,
            lineshape,
        } => {
            let options = commands::ProcessOptions {
                zero_fill: !no_zero_fill,
                phase: p0.map(|p0| (p0, p1.unwrap_or(0.0))),
                csv,
                peaks,
                scale,
                lineshape,
            };
            commands::run_process(&file, &options)?;
        }
        Commands::Inspect { dir, json } => commands::run_inspect(&dir, json)?,
    }

    Ok(())
}

async fn run_acquire(
    config: &spectrometer_hw::Config,
    experiment: AcquireCommands,
) -> Result<()> {
    use spectrometer_hw::{FidExperiment, RabiExperiment, SpinEchoExperiment, T2Experiment};
    use std::time::Duration;

    match experiment {
        AcquireCommands::Fid {
            args,
            pulse_length_us,
            delay_us,
            record_length_us,
        } => {
            let experiment = FidExperiment {
                pulse_length_us,
                delay_us,
                record_length_us,
            };
            commands::acquire_fid(config, &args.into(), &experiment).await
        }
        AcquireCommands::SpinEcho {
            args,
            pulse_length_us,
            delay_tau_us,
            record_length_us,
        } => {
            let experiment = SpinEchoExperiment {
                pulse_length_us,
                delay_tau_us,
                record_length_us,
            };
            commands::acquire_spin_echo(config, &args.into(), &experiment).await
        }
        AcquireCommands::Rabi {
            args,
            min_length_us,
            max_length_us,
            steps,
            delay_us,
            record_length_us,
            repetition_time,
        } => {
            let experiment = RabiExperiment {
                pulse_lengths_us: spectrometer_hw::experiment::linspace(
                    min_length_us,
                    max_length_us,
                    steps,
                ),
                delay_us,
                record_length_us,
                repetition_time: Duration::try_from_secs_f64(repetition_time)?,
            };
            commands::acquire_rabi(config, &args.into(), &experiment).await
        }
        AcquireCommands::T2 {
            args,
            pulse_length_us,
            min_tau_us,
            max_tau_us,
            steps,
            record_length_us,
            repetition_time,
        } => {
            let experiment = T2Experiment {
                pulse_length_us,
                delays_tau_us: spectrometer_hw::experiment::linspace(
                    min_tau_us, max_tau_us, steps,
                ),
                record_length_us,
                repetition_time: Duration::try_from_secs_f64(repetition_time)?,
            };
            commands::acquire_t2(config, &args.into(), &experiment).await
        }
    }
}

impl From<AcquireArgs> for commands::AcquireSettings {
    fn from(args: AcquireArgs) -> Self {
        Self {
            simulate: args.simulate,
            sample: args.sample,
            tx_freq: args.tx_freq,
            rx_freq: args.rx_freq,
            data_dir: args.data_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_connection_flags() {
        let cli = Cli::parse_from([
            "spectrometer",
            "-v",
            "--ip",
            "10.0.0.2",
            "-p",
            "1234",
            "start",
        ]);
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(cli.port, Some(1234));
        assert!(matches!(cli.command, Commands::Start));

        // global flags may also follow the subcommand
        let cli = Cli::parse_from(["spectrometer", "is-running", "-i", "10.0.0.3"]);
        assert_eq!(cli.ip.as_deref(), Some("10.0.0.3"));
    }

    #[test]
    fn test_flash_fpga_model() {
        let cli = Cli::parse_from(["spectrometer", "flash-fpga", "--model", "rp-125"]);
        match cli.command {
            Commands::FlashFpga { model } => assert_eq!(model.as_deref(), Some("rp-125")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_process_options() {
        let cli = Cli::parse_from([
            "spectrometer",
            "process",
            "water.fid",
            "--no-zero-fill",
            "--p0",
            "-45",
            "--csv",
            "out.csv",
            "--scale",
            "ppm",
        ]);
        match cli.command {
            Commands::Process {
                file,
                no_zero_fill,
                p0,
                p1,
                csv,
                peaks,
                scale,
                lineshape,
            } => {
                assert_eq!(file, PathBuf::from("water.fid"));
                assert!(no_zero_fill);
                assert_eq!(p0, Some(-45.0));
                assert_eq!(p1, None);
                assert_eq!(csv, Some(PathBuf::from("out.csv")));
                assert!(!peaks);
                assert_eq!(scale, Scale::Ppm);
                assert_eq!(lineshape, Lineshape::Lorentz);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_p1_requires_p0() {
        let result = Cli::try_parse_from(["spectrometer", "process", "a.fid", "--p1", "10"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_acquire_defaults() {
        let cli = Cli::parse_from(["spectrometer", "acquire", "rabi", "--simulate"]);
        match cli.command {
            Commands::Acquire {
                experiment:
                    AcquireCommands::Rabi {
                        args,
                        steps,
                        min_length_us,
                        max_length_us,
                        ..
                    },
            } => {
                assert!(args.simulate);
                assert_eq!(args.sample, "Water");
                assert_eq!(args.tx_freq, 25_090_000.0);
                assert_eq!(steps, 90);
                assert_eq!((min_length_us, max_length_us), (1.0, 180.0));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_config_set_args() {
        let cli = Cli::parse_from(["spectrometer", "config", "set", "server.port", "2222"]);
        match cli.command {
            Commands::Config {
                action: ConfigCommands::Set { key, value },
            } => {
                assert_eq!(key, "server.port");
                assert_eq!(value, "2222");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
