//! Peak picking on the real part of a spectrum.

use std::f64::consts::LN_2;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Scale;
use crate::error::{Error, Result};

/// Shape of a spectral line. Every shape is normalised to a height of 1
/// and parametrised by its position and full width at half maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lineshape {
    Gauss,
    #[default]
    Lorentz,
    /// Weighted sum `η·L + (1 − η)·G` of a Lorentzian and a Gaussian of
    /// equal width.
    PseudoVoigt,
    /// True convolution of a Gaussian and a Lorentzian; recognised but not
    /// supported for picking or fitting.
    Voigt,
}

impl Lineshape {
    /// Number of shape parameters including the position.
    #[must_use]
    pub fn parameters(&self) -> usize {
        match self {
            Self::Gauss | Self::Lorentz => 2,
            Self::PseudoVoigt | Self::Voigt => 3,
        }
    }

    /// Height-normalised value at `x` for a line at `x0`. `extra` holds
    /// the parameters beyond position and width.
    #[must_use]
    pub fn evaluate(&self, x: f64, x0: f64, fwhm: f64, extra: &[f64]) -> f64 {
        match self {
            Self::Gauss => gauss(x, x0, fwhm),
            Self::Lorentz | Self::Voigt => lorentz(x, x0, fwhm),
            Self::PseudoVoigt => {
                let eta = extra.first().copied().unwrap_or(0.5).clamp(0.0, 1.0);
                eta * lorentz(x, x0, fwhm) + (1.0 - eta) * gauss(x, x0, fwhm)
            }
        }
    }
}

fn gauss(x: f64, x0: f64, fwhm: f64) -> f64 {
    if fwhm == 0.0 {
        return if x == x0 { 1.0 } else { 0.0 };
    }
    (-4.0 * LN_2 * (x - x0).powi(2) / (fwhm * fwhm)).exp()
}

fn lorentz(x: f64, x0: f64, fwhm: f64) -> f64 {
    let hw2 = (fwhm / 2.0).powi(2);
    if hw2 == 0.0 {
        return if x == x0 { 1.0 } else { 0.0 };
    }
    hw2 / ((x - x0).powi(2) + hw2)
}

impl fmt::Display for Lineshape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gauss => "gauss",
            Self::Lorentz => "lorentz",
            Self::PseudoVoigt => "pvoigt",
            Self::Voigt => "voigt",
        };
        f.write_str(name)
    }
}

impl FromStr for Lineshape {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "g" | "gauss" | "gaussian" => Ok(Self::Gauss),
            "l" | "lorentz" | "lorentzian" => Ok(Self::Lorentz),
            "pv" | "pvoigt" | "pseudo-voigt" | "pseudovoigt" => Ok(Self::PseudoVoigt),
            "v" | "voigt" => Ok(Self::Voigt),
            _ => Err(Error::Unsupported(format!("unknown lineshape '{s}'"))),
        }
    }
}

/// Peak picking algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Every local maximum above the threshold is a peak; its segment
    /// extends downhill until the threshold is reached.
    #[default]
    Downward,
    /// Each connected region above the threshold is one peak.
    Threshold,
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "downward" => Ok(Self::Downward),
            "thres" | "threshold" | "connected" => Ok(Self::Threshold),
            _ => Err(Error::Unsupported(format!("unknown algorithm '{s}'"))),
        }
    }
}

/// Options for [`Spectrum1d::peaks`](super::Spectrum1d::peaks) and
/// [`Spectrum1d::fit`](super::Spectrum1d::fit).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PeakOptions {
    /// Minimum real amplitude; `None` uses three times the noise.
    pub threshold: Option<f64>,
    pub lineshape: Lineshape,
    pub algorithm: Algorithm,
    /// Axis that locations and widths are reported in.
    pub scale: Scale,
}

/// A spectral line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub location: f64,
    pub amplitude: f64,
    /// Full width at half maximum.
    pub fwhm: f64,
    /// Sum of the signal over the points belonging to the peak.
    pub signal_strength: f64,
    /// Shape parameters beyond position and width, e.g. η of a
    /// pseudo-Voigt line.
    pub other_parameters: Vec<f64>,
}

/// Peak found in index space before conversion to a [`Peak`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RawPeak {
    pub index: usize,
    pub fwhm_points: f64,
    pub volume: f64,
}

pub(crate) fn pick(values: &[f64], threshold: f64, algorithm: Algorithm) -> Vec<RawPeak> {
    let segments = match algorithm {
        Algorithm::Downward => downward_segments(values, threshold),
        Algorithm::Threshold => connected_segments(values, threshold),
    };
    segments
        .into_iter()
        .map(|(index, from, to)| RawPeak {
            index,
            fwhm_points: estimate_fwhm(values, index, from, to),
            volume: values[from..to].iter().sum(),
        })
        .collect()
}

/// `(peak, from, to)` for every local maximum above `threshold`.
fn downward_segments(values: &[f64], threshold: f64) -> Vec<(usize, usize, usize)> {
    let n = values.len();
    let mut out = Vec::new();
    for i in 0..n {
        let v = values[i];
        if v <= threshold {
            continue;
        }
        let left_ok = i == 0 || values[i - 1] < v;
        let right_ok = i + 1 == n || values[i + 1] <= v;
        if !(left_ok && right_ok) {
            continue;
        }
        let mut from = i;
        while from > 0 && values[from - 1] > threshold && values[from - 1] < values[from] {
            from -= 1;
        }
        let mut to = i + 1;
        while to < n && values[to] > threshold && values[to] < values[to - 1] {
            to += 1;
        }
        out.push((i, from, to));
    }
    out
}

/// `(peak, from, to)` for every connected region above `threshold`.
fn connected_segments(values: &[f64], threshold: f64) -> Vec<(usize, usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < values.len() {
        if values[i] <= threshold {
            i += 1;
            continue;
        }
        let from = i;
        while i < values.len() && values[i] > threshold {
            i += 1;
        }
        let peak = (from..i)
            .max_by(|&a, &b| values[a].total_cmp(&values[b]))
            .unwrap_or(from);
        out.push((peak, from, i));
    }
    out
}

/// Width in points between the half-maximum crossings on both sides of
/// `peak`, interpolated linearly. Crossings outside `from..to` are clipped
/// to the segment.
fn estimate_fwhm(values: &[f64], peak: usize, from: usize, to: usize) -> f64 {
    let half = values[peak] / 2.0;

    let mut left = from as f64;
    let mut j = peak;
    while j > from {
        if values[j - 1] <= half {
            let (a, b) = (values[j - 1], values[j]);
            left = (j - 1) as f64 + (half - a) / (b - a);
            break;
        }
        j -= 1;
    }

    let mut right = (to - 1) as f64;
    let mut j = peak;
    while j + 1 < to {
        if values[j + 1] <= half {
            let (a, b) = (values[j], values[j + 1]);
            right = j as f64 + (a - half) / (a - b);
            break;
        }
        j += 1;
    }

    (right - left).max(1.0)
}
