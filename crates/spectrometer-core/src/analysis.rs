//! Evaluation of measurement series: signal strength of single FIDs and the
//! calibrations derived from pulse-length and echo-time sweeps.

use serde::{Deserialize, Serialize};

use crate::data::{Fid1d, SpectrumOptions};
use crate::error::Result;
use crate::process::{CurveModel, DecayingSinusoidSquared, ExpDecay};

/// Peak magnitude of the automatically processed spectrum.
pub fn signal_strength(fid: &Fid1d) -> Result<f64> {
    let (spectrum, _) = fid.spectrum(&SpectrumOptions::default())?;
    Ok(spectrum.absolute().into_iter().fold(0.0, f64::max))
}

/// Outcome of a Rabi nutation (pulse length sweep).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RabiCalibration {
    pub fit: DecayingSinusoidSquared,
    /// Pulse length of a 90° flip in µs.
    pub pulse_90_us: f64,
}

impl RabiCalibration {
    /// Pulse length of a 180° flip in µs.
    #[must_use]
    pub fn pulse_180_us(&self) -> f64 {
        2.0 * self.pulse_90_us
    }
}

/// Fit signal strength against pulse length (µs) and derive the 90° pulse.
pub fn rabi_calibration(pulse_lengths_us: &[f64], strengths: &[f64]) -> Result<RabiCalibration> {
    let fit = DecayingSinusoidSquared::fit(pulse_lengths_us, strengths)?;
    let pulse_90_us = 1.0 / (4.0 * fit.freq.abs());
    log::info!("Rabi fit: f = {:.4} MHz, 90° pulse = {pulse_90_us:.2} µs", fit.freq);
    Ok(RabiCalibration { fit, pulse_90_us })
}

/// Outcome of an echo time sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct T2Estimate {
    pub fit: ExpDecay,
    /// Transverse relaxation time in the unit of the echo times.
    pub t2: f64,
}

/// Fit echo amplitude against echo time and derive T2.
pub fn t2_estimate(echo_times: &[f64], amplitudes: &[f64]) -> Result<T2Estimate> {
    let fit = ExpDecay::fit(echo_times, amplitudes)?;
    let t2 = fit.time_constant();
    log::info!("T2 fit: T2 = {t2:.4}");
    Ok(T2Estimate { fit, t2 })
}
