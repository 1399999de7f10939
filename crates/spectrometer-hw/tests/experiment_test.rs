//! Integration tests running the experiments against the simulator.

use std::time::Duration;

use spectrometer_core::{Fid1d, Scale, SpectrumOptions};
use spectrometer_hw::{
    ConnectionSettings, FidExperiment, RabiExperiment, RunContext, SimulatedBackend,
    SimulationParameters, Spectrometer, SpinEchoExperiment, T2Experiment,
};
use tempfile::TempDir;

fn simulated(params: SimulationParameters) -> Spectrometer {
    let settings = ConnectionSettings {
        address: "127.0.0.1:11111".parse().unwrap(),
        fpga_clock_freq_hz: 122.88e6,
    };
    let mut spec = Spectrometer::new(25.09e6, None, 320e3, settings).unwrap();
    spec.attach(Box::new(SimulatedBackend::new(params)));
    spec
}

/// A single FID is saved directly in the data directory and shows the
/// line at the simulated offset
#[tokio::test]
async fn test_fid_experiment_saves_readable_file() {
    let temp_dir = TempDir::new().unwrap();
    let mut spec = simulated(SimulationParameters::default());
    let ctx = RunContext::new(temp_dir.path(), "Water");

    let experiment = FidExperiment {
        pulse_length_us: 25.0,
        delay_us: 25.0,
        record_length_us: 6400.0,
    };
    let output = experiment.run(&mut spec, &ctx).await.unwrap();
    assert_eq!(output.files.len(), 1);

    let path = &output.files[0];
    assert_eq!(path.parent().unwrap(), temp_dir.path());
    let name = path.file_name().unwrap().to_string_lossy();
    assert!(name.contains("-Water-1H-single_90_degree_pulse,length=25us"), "{name}");
    assert!(name.ends_with(".fid"));

    let fid = Fid1d::from_file(path).unwrap();
    assert_eq!(fid.size(), 2048);
    assert_eq!(fid.spectrometer(), "magnETHical v0.1");
    assert!((fid.observation_freq() - 25.09e6).abs() < 100.0);

    let (spectrum, _) = fid.spectrum(&SpectrumOptions::default()).unwrap();
    let line = spectrum.max_peak(Scale::Hz);
    assert!((line - 2e3).abs() < 2.0 * 320e3 / 2048.0, "line at {line} Hz");
}

/// The echo of a spin echo experiment is recorded
#[tokio::test]
async fn test_spin_echo_experiment() {
    let temp_dir = TempDir::new().unwrap();
    let mut spec = simulated(SimulationParameters::default());
    let ctx = RunContext::new(temp_dir.path(), "Water");

    let experiment = SpinEchoExperiment {
        pulse_length_us: 25.0,
        delay_tau_us: 2000.0,
        record_length_us: 3000.0,
    };
    let output = experiment.run(&mut spec, &ctx).await.unwrap();
    let fid = Fid1d::from_file(&output.files[0]).unwrap();

    // recording starts tau/2 after the refocusing pulse, the echo tau after it
    let echo = fid
        .absolute()
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();
    let expected = (1000.0 / 3.125) as usize;
    assert!(echo.abs_diff(expected) <= 2, "echo at sample {echo}");
}

/// A Rabi series lands in its own directory and peaks at the 90° pulse
#[tokio::test]
async fn test_rabi_series() {
    let temp_dir = TempDir::new().unwrap();
    let mut spec = simulated(SimulationParameters::default());
    let ctx = RunContext::new(temp_dir.path(), "Water");

    let experiment = RabiExperiment {
        pulse_lengths_us: (1..=12).map(|i| f64::from(i) * 5.0).collect(),
        delay_us: 30.0,
        record_length_us: 3200.0,
        repetition_time: Duration::ZERO,
    };
    let run = experiment.run(&mut spec, &ctx).await.unwrap();

    assert_eq!(run.output.files.len(), 12);
    assert!(run
        .output
        .files
        .iter()
        .all(|f| f.parent().unwrap() == run.directory));
    let dir_name = run.directory.file_name().unwrap().to_string_lossy();
    assert!(dir_name.ends_with("-Water-1H-rabi-nutation"), "{dir_name}");

    let strongest = run
        .strengths
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| experiment.pulse_lengths_us[i])
        .unwrap();
    assert!((strongest - 25.0).abs() < 1e-9);
}

/// The T2 series recovers the simulated relaxation time
#[tokio::test]
async fn test_t2_series_estimates_t2() {
    let temp_dir = TempDir::new().unwrap();
    let params = SimulationParameters {
        t2_s: 2e-3,
        ..SimulationParameters::default()
    };
    let mut spec = simulated(params);
    let ctx = RunContext::new(temp_dir.path(), "Water");

    let experiment = T2Experiment {
        pulse_length_us: 25.0,
        delays_tau_us: (1..=10).map(|i| f64::from(i) * 200.0).collect(),
        record_length_us: 2500.0,
        repetition_time: Duration::ZERO,
    };
    let run = experiment.run(&mut spec, &ctx).await.unwrap();

    assert_eq!(run.output.files.len(), 10);
    assert_eq!(run.echo_times_us[0], 400.0);
    assert!(run.echo_amplitudes[0] > run.echo_amplitudes[9]);

    let estimate = run.estimate.unwrap();
    assert!((estimate.t2 - 2000.0).abs() < 200.0, "T2 = {} us", estimate.t2);
}
