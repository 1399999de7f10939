use anyhow::{Context, Result};
use spectrometer_hw::{
    Config, ConnectionSettings, FidExperiment, RabiExperiment, RunContext, SimulatedBackend,
    SimulationParameters, SpinEchoExperiment, Spectrometer, T2Experiment,
};
use std::path::{Path, PathBuf};

/// Options shared by all acquisitions.
#[derive(Debug, Clone)]
pub struct AcquireSettings {
    pub simulate: bool,
    pub sample: String,
    pub tx_freq: f64,
    pub rx_freq: Option<f64>,
    pub data_dir: Option<PathBuf>,
}

/// A connected (or simulated) session plus where to store the results.
struct Session {
    spec: Spectrometer,
    ctx: RunContext,
}

impl Session {
    async fn open(config: &Config, settings: &AcquireSettings) -> Result<Self> {
        let connection = ConnectionSettings::from_config(config)?;
        let mut spec = Spectrometer::new(
            settings.tx_freq,
            settings.rx_freq,
            config.sample_rate,
            connection,
        )?;

        if settings.simulate {
            println!("Using the simulated spectrometer");
            spec.attach(Box::new(SimulatedBackend::new(
                SimulationParameters::default(),
            )));
        } else {
            println!("Connecting to {}...", connection.address);
            spec.connect()
                .await
                .with_context(|| format!("Failed to connect to {}", connection.address))?;
            println!("  ✓ Connected");
        }

        let data_dir = settings
            .data_dir
            .clone()
            .unwrap_or_else(|| config.data_dir.clone());
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let mut ctx = RunContext::new(data_dir, settings.sample.clone());
        ctx.spectrometer_name.clone_from(&config.spectrometer_name);
        Ok(Self { spec, ctx })
    }

    async fn close(mut self) {
        self.spec.disconnect().await;
    }
}

fn print_files(files: &[PathBuf]) {
    for file in files {
        println!("  {}", file.display());
    }
}

fn print_directory(directory: &Path, count: usize) {
    println!("  {count} FIDs in {}", directory.display());
}

/// Record a single FID.
pub async fn acquire_fid(
    config: &Config,
    settings: &AcquireSettings,
    experiment: &FidExperiment,
) -> Result<()> {
    let mut session = Session::open(config, settings).await?;
    println!(
        "\nRecording FID after a {}us pulse...",
        experiment.pulse_length_us
    );
    let result = experiment.run(&mut session.spec, &session.ctx).await;
    session.close().await;
    let output = result.context("FID acquisition failed")?;

    println!("✓ Saved FID (run {})", output.id);
    print_files(&output.files);
    Ok(())
}

/// Record a spin echo.
pub async fn acquire_spin_echo(
    config: &Config,
    settings: &AcquireSettings,
    experiment: &SpinEchoExperiment,
) -> Result<()> {
    let mut session = Session::open(config, settings).await?;
    println!(
        "\nRecording spin echo with tau = {}us...",
        experiment.delay_tau_us
    );
    let result = experiment.run(&mut session.spec, &session.ctx).await;
    session.close().await;
    let output = result.context("Spin echo acquisition failed")?;

    println!("✓ Saved spin echo (run {})", output.id);
    print_files(&output.files);
    Ok(())
}

/// Run a Rabi nutation and report the fitted pulse lengths.
pub async fn acquire_rabi(
    config: &Config,
    settings: &AcquireSettings,
    experiment: &RabiExperiment,
) -> Result<()> {
    let mut session = Session::open(config, settings).await?;
    println!(
        "\nRunning Rabi nutation over {} pulse lengths...",
        experiment.pulse_lengths_us.len()
    );
    let result = experiment.run(&mut session.spec, &session.ctx).await;
    session.close().await;
    let run = result.context("Rabi nutation failed")?;

    println!("✓ Rabi nutation complete (run {})", run.output.id);
    print_directory(&run.directory, run.output.files.len());
    match run.calibration {
        Some(calibration) => {
            println!("\nFit: {}", calibration.fit);
            println!("  90° pulse:  {:.2}us", calibration.pulse_90_us);
            println!("  180° pulse: {:.2}us", calibration.pulse_180_us());
        }
        None => println!("\nThe nutation could not be fitted; inspect the FIDs manually."),
    }
    Ok(())
}

/// Run a T2 series and report the fitted relaxation time.
pub async fn acquire_t2(
    config: &Config,
    settings: &AcquireSettings,
    experiment: &T2Experiment,
) -> Result<()> {
    let mut session = Session::open(config, settings).await?;
    println!(
        "\nRecording {} spin echoes...",
        experiment.delays_tau_us.len()
    );
    let result = experiment.run(&mut session.spec, &session.ctx).await;
    session.close().await;
    let run = result.context("T2 measurement failed")?;

    println!("✓ T2 series complete (run {})", run.output.id);
    print_directory(&run.directory, run.output.files.len());
    match run.estimate {
        Some(estimate) => {
            println!("\nFit: {}", estimate.fit);
            println!("  T2 = {:.1}us", estimate.t2);
        }
        None => println!("\nThe echo decay could not be fitted; inspect the FIDs manually."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectrometer_core::Fid1d;
    use tempfile::TempDir;

    fn simulated_settings(data_dir: &Path) -> AcquireSettings {
        AcquireSettings {
            simulate: true,
            sample: "Water".to_string(),
            tx_freq: 25.09e6,
            rx_freq: None,
            data_dir: Some(data_dir.to_path_buf()),
        }
    }

    #[tokio::test]
    async fn test_simulated_fid_is_saved() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let mut config = Config::default();
        config.spectrometer_name = "bench".to_string();

        let experiment = FidExperiment {
            pulse_length_us: 25.0,
            delay_us: 25.0,
            record_length_us: 1000.0,
        };
        acquire_fid(&config, &simulated_settings(&data_dir), &experiment)
            .await
            .unwrap();

        let files: Vec<PathBuf> = std::fs::read_dir(&data_dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let fid = Fid1d::from_file(&files[0]).unwrap();
        assert_eq!(fid.spectrometer(), "bench");
        assert_eq!(fid.sample(), "Water");
        assert_eq!(fid.size(), 320);
    }

    #[tokio::test]
    async fn test_invalid_sample_rate_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.sample_rate = 300e3;

        let err = acquire_fid(
            &config,
            &simulated_settings(temp_dir.path()),
            &FidExperiment::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("integer multiple"), "{err}");
    }
}
