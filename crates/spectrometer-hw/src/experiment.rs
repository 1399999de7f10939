//! Ready-made experiments.
//!
//! Each runner builds its pulse sequences, sends them through a connected
//! [`Spectrometer`], wraps the received data in [`Fid1d`]s with a
//! descriptive pulse string and saves them below the data directory.
//! Series (Rabi nutation, T2 decay) are saved into their own directory
//! and evaluated with the matching calibration fit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spectrometer_core::analysis::{self, RabiCalibration, T2Estimate};
use spectrometer_core::{Complex, Fid1d, FidMetadata, NmrSequence};
use uuid::Uuid;

use crate::error::Result;
use crate::spectrometer::Spectrometer;

/// Sample and storage details shared by all runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub data_dir: PathBuf,
    pub sample: String,
    /// Observed nucleus, e.g. `1H`.
    pub label: String,
    pub spectrometer_name: String,
    /// Offset between the receiver frequency and the resonance in Hz.
    pub carrier_freq: f64,
}

impl RunContext {
    pub fn new(data_dir: impl Into<PathBuf>, sample: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            sample: sample.into(),
            label: "1H".to_string(),
            spectrometer_name: "magnETHical v0.1".to_string(),
            carrier_freq: 0.0,
        }
    }

    fn fid(
        &self,
        spec: &Spectrometer,
        data: Vec<Complex>,
        pulse: String,
        at: DateTime<Utc>,
    ) -> Result<Fid1d> {
        Ok(Fid1d::new(
            data,
            FidMetadata {
                spectral_width: spec.sample_rate(),
                carrier_freq: self.carrier_freq,
                observation_freq: spec.rx_freq(),
                label: self.label.clone(),
                sample: self.sample.clone(),
                pulse,
                spectrometer: self.spectrometer_name.clone(),
                timestamp: Some(at),
            },
        )?)
    }

    /// Directory for a series of `kind` started at `at`.
    fn series_dir(&self, at: DateTime<Utc>, kind: &str) -> PathBuf {
        self.data_dir.join(format!(
            "{}-{}-{}-{kind}",
            at.format("%Y%m%d-%H%M%S"),
            self.sample,
            self.label
        ))
    }
}

/// Save `fid` as `{dir}/{time}-{sample}-{label}-{pulse}.fid`.
fn save(fid: &Fid1d, dir: &Path) -> Result<PathBuf> {
    let name = format!(
        "{}-{}-{}-{}",
        fid.timestamp().format("%Y%m%d-%H%M%S"),
        fid.sample(),
        fid.label(),
        fid.pulse()
    );
    Ok(fid.to_file(dir.join(name))?)
}

fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// Files written by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub id: Uuid,
    pub started: DateTime<Utc>,
    pub files: Vec<PathBuf>,
}

impl RunOutput {
    fn new(started: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started,
            files: Vec::new(),
        }
    }
}

/// A single pulse followed by a recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FidExperiment {
    pub pulse_length_us: f64,
    /// Wait for the coil to ring down.
    pub delay_us: f64,
    pub record_length_us: f64,
}

impl Default for FidExperiment {
    fn default() -> Self {
        Self {
            pulse_length_us: 8.0,
            delay_us: 25.0,
            record_length_us: 15e3,
        }
    }
}

impl FidExperiment {
    pub async fn run(&self, spec: &mut Spectrometer, ctx: &RunContext) -> Result<RunOutput> {
        let seq = NmrSequence::simple(self.pulse_length_us, self.delay_us, self.record_length_us)?;
        let mut output = RunOutput::new(now());
        log::info!("Run {}: single pulse FID", output.id);

        let data = spec.send_sequence(&seq).await?;
        let pulse = format!(
            "single_90_degree_pulse,length={}us,delay={}us,record_length={},sample_rate={}",
            self.pulse_length_us,
            self.delay_us,
            self.record_length_us,
            spec.sample_rate()
        );
        let fid = ctx.fid(spec, data, pulse, output.started)?;
        let path = save(&fid, &ctx.data_dir)?;
        log::info!("Saved FID to {}", path.display());
        output.files.push(path);
        Ok(output)
    }
}

/// A single Hahn echo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpinEchoExperiment {
    pub pulse_length_us: f64,
    /// Wait between the 90° and the 180° pulse; the recording starts half
    /// of it after the 180° pulse.
    pub delay_tau_us: f64,
    pub record_length_us: f64,
}

impl Default for SpinEchoExperiment {
    fn default() -> Self {
        Self {
            pulse_length_us: 9.0,
            delay_tau_us: 4000.0,
            record_length_us: 10e3,
        }
    }
}

impl SpinEchoExperiment {
    pub async fn run(&self, spec: &mut Spectrometer, ctx: &RunContext) -> Result<RunOutput> {
        let seq = NmrSequence::spin_echo(
            self.pulse_length_us,
            self.delay_tau_us,
            self.delay_tau_us / 2.0,
            self.record_length_us,
        )?;
        let mut output = RunOutput::new(now());
        log::info!("Run {}: spin echo", output.id);

        let data = spec.send_sequence(&seq).await?;
        let pulse = format!(
            "spin_echo,length={}us,delay_tau={}us",
            self.pulse_length_us, self.delay_tau_us
        );
        let fid = ctx.fid(spec, data, pulse, output.started)?;
        let path = save(&fid, &ctx.data_dir)?;
        log::info!("Saved FID to {}", path.display());
        output.files.push(path);
        Ok(output)
    }
}

/// Single pulses of increasing length to find the 90° pulse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RabiExperiment {
    pub pulse_lengths_us: Vec<f64>,
    pub delay_us: f64,
    pub record_length_us: f64,
    pub repetition_time: Duration,
}

impl Default for RabiExperiment {
    fn default() -> Self {
        Self {
            pulse_lengths_us: linspace(1.0, 180.0, 90),
            delay_us: 30.0,
            record_length_us: 10e3,
            repetition_time: Duration::from_secs(1),
        }
    }
}

/// Result of a Rabi nutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RabiRun {
    pub output: RunOutput,
    pub directory: PathBuf,
    /// Signal strength per pulse length.
    pub strengths: Vec<f64>,
    /// `None` if the nutation could not be fitted.
    pub calibration: Option<RabiCalibration>,
}

impl RabiExperiment {
    pub async fn run(&self, spec: &mut Spectrometer, ctx: &RunContext) -> Result<RabiRun> {
        let sequences = self
            .pulse_lengths_us
            .iter()
            .map(|length| NmrSequence::simple(*length, self.delay_us, self.record_length_us))
            .collect::<spectrometer_core::Result<Vec<_>>>()?;
        let mut output = RunOutput::new(now());
        log::info!(
            "Run {}: Rabi nutation over {} pulse lengths",
            output.id,
            sequences.len()
        );

        let datas = spec.send_sequences(&sequences, self.repetition_time).await?;

        let directory = ctx.series_dir(output.started, "rabi-nutation");
        let mut strengths = Vec::with_capacity(datas.len());
        for (i, (data, length)) in datas.into_iter().zip(&self.pulse_lengths_us).enumerate() {
            let pulse = format!(
                "one_of_repeated_90_degree_pulses,length={length}us,delay={}us,repetition_time={}s",
                self.delay_us,
                self.repetition_time.as_secs_f64()
            );
            let fid = ctx.fid(spec, data, pulse, output.started)?;
            strengths.push(analysis::signal_strength(&fid)?);
            output.files.push(save(&fid, &directory)?);
            log::info!("Saved FID {}/{}", i + 1, self.pulse_lengths_us.len());
        }
        log::info!("Done. Saved all FIDs.");

        let calibration = match analysis::rabi_calibration(&self.pulse_lengths_us, &strengths) {
            Ok(calibration) => Some(calibration),
            Err(err) => {
                log::warn!("Could not fit the Rabi nutation: {err}");
                None
            }
        };

        Ok(RabiRun {
            output,
            directory,
            strengths,
            calibration,
        })
    }
}

/// Spin echoes with increasing τ to measure T2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct T2Experiment {
    pub pulse_length_us: f64,
    pub delays_tau_us: Vec<f64>,
    pub record_length_us: f64,
    pub repetition_time: Duration,
}

impl Default for T2Experiment {
    fn default() -> Self {
        Self {
            pulse_length_us: 9.0,
            delays_tau_us: linspace(100.0, 300.0, 100),
            record_length_us: 10e3,
            repetition_time: Duration::from_secs(5),
        }
    }
}

/// Result of a T2 series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct T2Run {
    pub output: RunOutput,
    pub directory: PathBuf,
    /// Echo time `2τ` in µs per acquisition.
    pub echo_times_us: Vec<f64>,
    /// Maximum of the echo per acquisition.
    pub echo_amplitudes: Vec<f64>,
    /// `None` if the decay could not be fitted.
    pub estimate: Option<T2Estimate>,
}

impl T2Experiment {
    pub async fn run(&self, spec: &mut Spectrometer, ctx: &RunContext) -> Result<T2Run> {
        let sequences = self
            .delays_tau_us
            .iter()
            .map(|tau| {
                NmrSequence::spin_echo(self.pulse_length_us, *tau, tau / 2.0, self.record_length_us)
            })
            .collect::<spectrometer_core::Result<Vec<_>>>()?;
        let mut output = RunOutput::new(now());
        log::info!("Run {}: T2 decay over {} echoes", output.id, sequences.len());

        let datas = spec.send_sequences(&sequences, self.repetition_time).await?;

        let directory = ctx.series_dir(output.started, "t2-decay");
        let mut echo_amplitudes = Vec::with_capacity(datas.len());
        for (i, (data, tau)) in datas.into_iter().zip(&self.delays_tau_us).enumerate() {
            let pulse = format!(
                "one_of_repeated_spin_echoes,length={}us,delay_tau={tau}us,repetition_time={}s",
                self.pulse_length_us,
                self.repetition_time.as_secs_f64()
            );
            let fid = ctx.fid(spec, data, pulse, output.started)?;
            echo_amplitudes.push(fid.absolute().into_iter().fold(0.0, f64::max));
            output.files.push(save(&fid, &directory)?);
            log::info!("Saved FID {}/{}", i + 1, self.delays_tau_us.len());
        }
        log::info!("Done. Saved all FIDs.");

        let echo_times_us: Vec<f64> = self.delays_tau_us.iter().map(|tau| 2.0 * tau).collect();
        let estimate = match analysis::t2_estimate(&echo_times_us, &echo_amplitudes) {
            Ok(estimate) => Some(estimate),
            Err(err) => {
                log::warn!("Could not fit the T2 decay: {err}");
                None
            }
        };

        Ok(T2Run {
            output,
            directory,
            echo_times_us,
            echo_amplitudes,
            estimate,
        })
    }
}

/// `count` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (count - 1) as f64;
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}
