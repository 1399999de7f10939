//! Curve models used to evaluate measurement series.
//!
//! Every model knows how to guess starting parameters from the data and
//! refines them with [`levenberg_marquardt`].

use std::f64::consts::{PI, SQRT_2};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::optimize::levenberg_marquardt;
use super::{argmax, mean, std_dev};
use crate::complex::Complex;
use crate::error::{Error, Result};
use crate::fft::{fft, fftfreq};

/// A parametric curve `y = f(params; x)` that can be fitted to data.
pub trait CurveModel: Sized {
    /// Number of free parameters.
    const PARAMS: usize;

    fn evaluate(params: &[f64], x: f64) -> f64;

    fn initial_guess(x: &[f64], y: &[f64]) -> Result<Vec<f64>>;

    fn from_params(params: &[f64]) -> Self;

    fn params(&self) -> Vec<f64>;

    /// Value of the fitted curve at `x`.
    fn eval(&self, x: f64) -> f64 {
        Self::evaluate(&self.params(), x)
    }

    fn fit(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::Fit(format!(
                "x has {} points but y has {}",
                x.len(),
                y.len()
            )));
        }
        if x.len() < Self::PARAMS {
            return Err(Error::Fit(format!(
                "need at least {} points, got {}",
                Self::PARAMS,
                x.len()
            )));
        }
        let guess = Self::initial_guess(x, y)?;
        let result = levenberg_marquardt(Self::evaluate, x, y, &guess)?;
        if result.x.iter().any(|p| !p.is_finite()) {
            return Err(Error::Fit("fit diverged".to_string()));
        }
        Ok(Self::from_params(&result.x))
    }
}

/// Dominant non-zero frequency of uniformly spaced samples.
fn guess_frequency(x: &[f64], y: &[f64]) -> Result<f64> {
    if x.len() < 2 {
        return Err(Error::Fit("need at least two points".to_string()));
    }
    let spacing = x[1] - x[0];
    if spacing == 0.0 {
        return Err(Error::Fit("x values are not spaced".to_string()));
    }
    let frequencies = fftfreq(x.len(), spacing);
    let spectrum: Vec<f64> = fft(&y.iter().map(|v| Complex::from_real(*v)).collect::<Vec<_>>())
        .iter()
        .map(Complex::norm)
        .collect();
    let peak = argmax(&spectrum[1..]).map_or(1, |i| i + 1);
    Ok(frequencies[peak].abs())
}

fn min_max(y: &[f64]) -> (f64, f64) {
    y.iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        })
}

/// `a·e^{−λt} + c`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpDecay {
    pub amplitude: f64,
    pub lambda: f64,
    pub offset: f64,
}

impl CurveModel for ExpDecay {
    const PARAMS: usize = 3;

    fn evaluate(p: &[f64], t: f64) -> f64 {
        p[0] * (-p[1] * t).exp() + p[2]
    }

    fn initial_guess(_x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
        let (lo, hi) = min_max(y);
        Ok(vec![hi - lo, 0.0, lo])
    }

    fn from_params(p: &[f64]) -> Self {
        Self {
            amplitude: p[0],
            lambda: p[1],
            offset: p[2],
        }
    }

    fn params(&self) -> Vec<f64> {
        vec![self.amplitude, self.lambda, self.offset]
    }
}

impl ExpDecay {
    /// Decay time constant `1/λ`.
    #[must_use]
    pub fn time_constant(&self) -> f64 {
        1.0 / self.lambda
    }
}

impl fmt::Display for ExpDecay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Amplitude: {}", self.amplitude)?;
        writeln!(f, "Lambda: {}", self.lambda)?;
        write!(f, "Offset: {}", self.offset)
    }
}

/// `a·e^{−λt}·sin(2πft + φ) + c`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayingSinusoid {
    pub amplitude: f64,
    pub lambda: f64,
    pub freq: f64,
    pub phase: f64,
    pub offset: f64,
}

impl CurveModel for DecayingSinusoid {
    const PARAMS: usize = 5;

    fn evaluate(p: &[f64], t: f64) -> f64 {
        p[0] * (-p[1] * t).exp() * (2.0 * PI * p[2] * t + p[3]).sin() + p[4]
    }

    fn initial_guess(x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
        let freq = guess_frequency(x, y)?;
        Ok(vec![std_dev(y) * SQRT_2, 0.0, freq, 0.0, mean(y)])
    }

    fn from_params(p: &[f64]) -> Self {
        Self {
            amplitude: p[0],
            lambda: p[1],
            freq: p[2],
            phase: p[3],
            offset: p[4],
        }
    }

    fn params(&self) -> Vec<f64> {
        vec![self.amplitude, self.lambda, self.freq, self.phase, self.offset]
    }
}

impl DecayingSinusoid {
    #[must_use]
    pub fn period(&self) -> f64 {
        1.0 / self.freq
    }
}

impl fmt::Display for DecayingSinusoid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Amplitude: {}", self.amplitude)?;
        writeln!(f, "Frequency: {}", self.freq)?;
        writeln!(f, "Phase: {}", self.phase)?;
        writeln!(f, "Offset: {}", self.offset)?;
        write!(f, "Lambda: {}", self.lambda)
    }
}

/// `a·e^{−λt}·sin²(2πft + φ) + c`, the envelope of a Rabi nutation
/// measured in magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayingSinusoidSquared {
    pub amplitude: f64,
    pub lambda: f64,
    pub freq: f64,
    pub phase: f64,
    pub offset: f64,
}

impl CurveModel for DecayingSinusoidSquared {
    const PARAMS: usize = 5;

    fn evaluate(p: &[f64], t: f64) -> f64 {
        p[0] * (-p[1] * t).exp() * (2.0 * PI * p[2] * t + p[3]).sin().powi(2) + p[4]
    }

    fn initial_guess(x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
        // sin² oscillates at twice the frequency of the sine
        let freq = guess_frequency(x, y)? / 2.0;
        let (lo, _) = min_max(y);
        Ok(vec![std_dev(y) * SQRT_2, 0.0, freq, 0.0, lo])
    }

    fn from_params(p: &[f64]) -> Self {
        Self {
            amplitude: p[0],
            lambda: p[1],
            freq: p[2],
            phase: p[3],
            offset: p[4],
        }
    }

    fn params(&self) -> Vec<f64> {
        vec![self.amplitude, self.lambda, self.freq, self.phase, self.offset]
    }
}

impl fmt::Display for DecayingSinusoidSquared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Amplitude: {}", self.amplitude)?;
        writeln!(f, "Frequency: {}", self.freq)?;
        writeln!(f, "Phase: {}", self.phase)?;
        writeln!(f, "Offset: {}", self.offset)?;
        write!(f, "Lambda: {}", self.lambda)
    }
}

/// `A·sin(ωt + φ) + c`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sinusoid {
    pub amplitude: f64,
    pub omega: f64,
    pub phase: f64,
    pub offset: f64,
}

impl CurveModel for Sinusoid {
    const PARAMS: usize = 4;

    fn evaluate(p: &[f64], t: f64) -> f64 {
        p[0] * (p[1] * t + p[2]).sin() + p[3]
    }

    fn initial_guess(x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
        let freq = guess_frequency(x, y)?;
        Ok(vec![std_dev(y) * SQRT_2, 2.0 * PI * freq, 0.0, mean(y)])
    }

    fn from_params(p: &[f64]) -> Self {
        Self {
            amplitude: p[0],
            omega: p[1],
            phase: p[2],
            offset: p[3],
        }
    }

    fn params(&self) -> Vec<f64> {
        vec![self.amplitude, self.omega, self.phase, self.offset]
    }
}

impl Sinusoid {
    #[must_use]
    pub fn freq(&self) -> f64 {
        self.omega / (2.0 * PI)
    }

    #[must_use]
    pub fn period(&self) -> f64 {
        1.0 / self.freq()
    }
}

/// `a·γ² / ((x − x₀)² + γ²)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lorentzian {
    pub position: f64,
    pub gamma: f64,
    pub amplitude: f64,
}

impl CurveModel for Lorentzian {
    const PARAMS: usize = 3;

    fn evaluate(p: &[f64], x: f64) -> f64 {
        let g2 = p[1] * p[1];
        p[2] * g2 / ((x - p[0]).powi(2) + g2)
    }

    fn initial_guess(x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
        let peak = argmax(y).ok_or_else(|| Error::Fit("no data".to_string()))?;
        let (lo, hi) = min_max(y);
        let amplitude = hi - lo;
        let half = lo + amplitude / 2.0;

        let nearest = |range: std::ops::Range<usize>| {
            range.min_by(|&a, &b| (y[a] - half).abs().total_cmp(&(y[b] - half).abs()))
        };
        let right = nearest(peak..y.len()).unwrap_or(peak);
        let left = nearest(0..peak).unwrap_or(peak);
        let mut gamma = (x[right] - x[left]).abs() / 2.0;
        if gamma == 0.0 {
            gamma = (x[x.len() - 1] - x[0]).abs() / x.len() as f64;
        }
        Ok(vec![x[peak], gamma, amplitude])
    }

    fn from_params(p: &[f64]) -> Self {
        Self {
            position: p[0],
            gamma: p[1].abs(),
            amplitude: p[2],
        }
    }

    fn params(&self) -> Vec<f64> {
        vec![self.position, self.gamma, self.amplitude]
    }
}

impl Lorentzian {
    /// Full width at half maximum.
    #[must_use]
    pub fn fwhm(&self) -> f64 {
        2.0 * self.gamma
    }
}

impl fmt::Display for Lorentzian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Amplitude: {}", self.amplitude)?;
        writeln!(f, "Gamma: {}", self.gamma)?;
        writeln!(f, "Full Width at Half Maximum: {}", self.fwhm())?;
        write!(f, "Position: {}", self.position)
    }
}
