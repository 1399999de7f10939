use std::io::Write;
use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::peaks::{self, Algorithm, Lineshape, Peak, PeakOptions};
use super::Scale;
use crate::complex::Complex;
use crate::error::{Error, Result};
use crate::process::optimize::levenberg_marquardt;
use crate::process::{complex_std, CurveModel, Lorentzian};
use crate::units::{Unit, UnitConversion};

/// Minimum half-width in points of the region fitted around each peak.
const MIN_FIT_HALF_WIDTH: f64 = 8.0;
/// Fit region half-width in multiples of the estimated line width.
const FIT_WIDTHS: f64 = 4.0;

/// Complex 1D spectrum.
///
/// Point 0 holds the highest frequency. Every method that takes a
/// [`Scale`] interprets positions in that axis: point indices, Hz or ppm.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum1d {
    data: Vec<Complex>,
    spectral_width: f64,
    observation_frequency: f64,
    carrier_frequency: f64,
    uc: UnitConversion,
}

/// Result of [`Spectrum1d::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumFit {
    /// Sum of all fitted lines evaluated at every point.
    pub simulated: Vec<f64>,
    pub peaks: Vec<Peak>,
}

impl Spectrum1d {
    /// `spectral_width` and both frequencies in Hz.
    pub fn new(
        data: Vec<Complex>,
        spectral_width: f64,
        observation_frequency: f64,
        carrier_frequency: f64,
    ) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidData("spectrum has no points".to_string()));
        }
        if spectral_width.is_nan() || spectral_width <= 0.0 {
            return Err(Error::InvalidData(format!(
                "spectral width must be positive, got {spectral_width}"
            )));
        }
        if observation_frequency.is_nan() || observation_frequency <= 0.0 {
            return Err(Error::InvalidData(format!(
                "observation frequency must be positive, got {observation_frequency}"
            )));
        }
        let uc = UnitConversion::new(
            data.len(),
            spectral_width,
            observation_frequency / 1e6,
            carrier_frequency,
        );
        Ok(Self {
            data,
            spectral_width,
            observation_frequency,
            carrier_frequency,
            uc,
        })
    }

    #[must_use]
    pub fn data(&self) -> &[Complex] {
        &self.data
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn spectral_width(&self) -> f64 {
        self.spectral_width
    }

    #[must_use]
    pub fn observation_frequency(&self) -> f64 {
        self.observation_frequency
    }

    #[must_use]
    pub fn carrier_frequency(&self) -> f64 {
        self.carrier_frequency
    }

    #[must_use]
    pub fn unit_conversion(&self) -> &UnitConversion {
        &self.uc
    }

    #[must_use]
    pub fn real(&self) -> Vec<f64> {
        self.data.iter().map(|c| c.re).collect()
    }

    #[must_use]
    pub fn imag(&self) -> Vec<f64> {
        self.data.iter().map(|c| c.im).collect()
    }

    #[must_use]
    pub fn absolute(&self) -> Vec<f64> {
        self.data.iter().map(Complex::norm).collect()
    }

    /// Phase angle of every point in radians.
    #[must_use]
    pub fn phase(&self) -> Vec<f64> {
        self.data.iter().map(Complex::arg).collect()
    }

    /// Axis value of every point.
    #[must_use]
    pub fn scale(&self, scale: Scale) -> Vec<f64> {
        match scale {
            Scale::Index => (0..self.size()).map(|i| i as f64).collect(),
            Scale::Hz => self.uc.hz_scale(),
            Scale::Ppm => self.uc.ppm_scale(),
        }
    }

    /// Axis values of the first and the last point.
    #[must_use]
    pub fn limits(&self, scale: Scale) -> (f64, f64) {
        match scale {
            Scale::Index => (0.0, (self.size() - 1) as f64),
            Scale::Hz => self.uc.hz_limits(),
            Scale::Ppm => self.uc.ppm_limits(),
        }
    }

    /// Axis value of a (fractional) point.
    #[must_use]
    pub fn value_at(&self, scale: Scale, point: f64) -> f64 {
        match scale {
            Scale::Index => point,
            Scale::Hz => self.uc.hz(point),
            Scale::Ppm => self.uc.ppm(point),
        }
    }

    /// Nearest point for an axis value, clamped to the spectrum.
    #[must_use]
    pub fn to_index(&self, scale: Scale, value: f64) -> usize {
        let unit = match scale {
            Scale::Index => Unit::Points,
            Scale::Hz => Unit::Hz,
            Scale::Ppm => Unit::Ppm,
        };
        self.uc.index(value, unit)
    }

    /// Distance between neighbouring points on the axis.
    #[must_use]
    pub fn step(&self, scale: Scale) -> f64 {
        match scale {
            Scale::Index => 1.0,
            Scale::Hz => self.spectral_width / self.size() as f64,
            Scale::Ppm => self.spectral_width / self.size() as f64 / self.uc.obs_mhz(),
        }
    }

    /// Point range `lo..hi` between two axis values, in either order.
    ///
    /// On the index axis the values are slice bounds, so `0..size` covers
    /// every point.
    fn index_range(&self, scale: Scale, from: f64, to: f64) -> Range<usize> {
        let (a, b) = match scale {
            Scale::Index => {
                let bound = |v: f64| v.round().clamp(0.0, self.size() as f64) as usize;
                (bound(from), bound(to))
            }
            Scale::Hz | Scale::Ppm => (self.to_index(scale, from), self.to_index(scale, to)),
        };
        a.min(b)..a.max(b)
    }

    /// Riemann sum over `from..to`, weighted by the point spacing of the
    /// axis.
    #[must_use]
    pub fn integrate(&self, scale: Scale, from: f64, to: f64) -> Complex {
        let range = self.index_range(scale, from, to);
        self.data[range].iter().copied().sum::<Complex>() * self.step(scale)
    }

    /// Integrate from `position - width/2` to `position + width/2`.
    #[must_use]
    pub fn integrate_around(&self, scale: Scale, position: f64, width: f64) -> Complex {
        self.integrate(scale, position - width / 2.0, position + width / 2.0)
    }

    /// Keep only the points `from..to`. The kept points keep their
    /// frequencies.
    pub fn crop(&self, from: usize, to: usize) -> Result<Self> {
        let to = to.min(self.size());
        if from >= to {
            return Err(Error::InvalidData(format!(
                "cannot crop to empty range {from}..{to}"
            )));
        }
        let axis = self.uc.sub_axis(from, to);
        Self::new(
            self.data[from..to].to_vec(),
            axis.sw(),
            self.observation_frequency,
            axis.car_hz(),
        )
    }

    /// Keep only the points between two axis values, given in either order.
    pub fn crop_in(&self, scale: Scale, from: f64, to: f64) -> Result<Self> {
        let range = self.index_range(scale, from, to);
        self.crop(range.start, range.end)
    }

    /// Keep the points at most `width/2` away from `position`.
    pub fn crop_around(&self, scale: Scale, position: f64, width: f64) -> Result<Self> {
        self.crop_in(scale, position - width / 2.0, position + width / 2.0)
    }

    /// Standard deviation of the complex data over `range`, the whole
    /// spectrum by default.
    #[must_use]
    pub fn noise(&self, range: Option<Range<usize>>) -> f64 {
        let range = range.unwrap_or(0..self.size());
        let end = range.end.min(self.size());
        let start = range.start.min(end);
        complex_std(&self.data[start..end])
    }

    /// Axis position of the largest magnitude.
    #[must_use]
    pub fn max_peak(&self, scale: Scale) -> f64 {
        let index = self
            .data
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map_or(0, |(i, _)| i);
        self.value_at(scale, index as f64)
    }

    fn threshold(&self, options: &PeakOptions) -> f64 {
        options.threshold.unwrap_or_else(|| 3.0 * self.noise(None))
    }

    /// Find the peaks of the real part above the threshold and estimate
    /// their widths. Only two-parameter lineshapes are accepted.
    pub fn peaks(&self, options: &PeakOptions) -> Result<Vec<Peak>> {
        if options.lineshape.parameters() != 2 {
            return Err(Error::Unsupported(
                "Can only pick peaks with location and linewidth as parameters, \
                 e.g. Voigt is unsupported"
                    .to_string(),
            ));
        }
        let threshold = self.threshold(options);
        let real = self.real();
        let step = self.step(options.scale);
        Ok(peaks::pick(&real, threshold, options.algorithm)
            .into_iter()
            .map(|raw| Peak {
                location: self.value_at(options.scale, raw.index as f64),
                amplitude: real[raw.index],
                fwhm: raw.fwhm_points * step,
                signal_strength: raw.volume,
                other_parameters: Vec::new(),
            })
            .collect())
    }

    /// Fit all peaks of the real part with `options.lineshape`.
    ///
    /// Peaks are picked with [`Algorithm::Downward`] and refined together
    /// by least squares on the points around them.
    pub fn fit(&self, options: &PeakOptions) -> Result<SpectrumFit> {
        let lineshape = options.lineshape;
        if lineshape == Lineshape::Voigt {
            return Err(Error::Unsupported(format!(
                "Lineshape {lineshape} with {} parameters is currently not supported",
                lineshape.parameters()
            )));
        }
        let threshold = self.threshold(options);
        let real = self.real();
        let picked = peaks::pick(&real, threshold, Algorithm::Downward);
        if picked.is_empty() {
            return Err(Error::NoPeaks { threshold });
        }

        let stride = lineshape.parameters() + 1;
        let mut guess = Vec::with_capacity(picked.len() * stride);
        for raw in &picked {
            guess.extend([real[raw.index], raw.index as f64, raw.fwhm_points]);
            if lineshape == Lineshape::PseudoVoigt {
                guess.push(0.5);
            }
        }

        let model = |p: &[f64], x: f64| -> f64 {
            p.chunks_exact(stride)
                .map(|c| c[0] * lineshape.evaluate(x, c[1], c[2].abs(), &c[3..]))
                .sum()
        };

        let mut in_region = vec![false; real.len()];
        for raw in &picked {
            let half = (FIT_WIDTHS * raw.fwhm_points).max(MIN_FIT_HALF_WIDTH);
            let lo = (raw.index as f64 - half).max(0.0) as usize;
            let hi = ((raw.index as f64 + half) as usize + 1).min(real.len());
            in_region[lo..hi].iter_mut().for_each(|flag| *flag = true);
        }
        let (x, y): (Vec<f64>, Vec<f64>) = in_region
            .iter()
            .enumerate()
            .filter(|(_, inside)| **inside)
            .map(|(i, _)| (i as f64, real[i]))
            .unzip();

        let result = levenberg_marquardt(&model, &x, &y, &guess)?;
        log::debug!(
            "fitted {} {lineshape} lines in {} iterations (cost {:.3e})",
            picked.len(),
            result.iterations,
            result.value
        );

        let simulated = (0..real.len()).map(|i| model(&result.x, i as f64)).collect();
        let step = self.step(options.scale);
        let peaks = result
            .x
            .chunks_exact(stride)
            .zip(&picked)
            .map(|(c, raw)| Peak {
                location: self.value_at(options.scale, c[1]),
                amplitude: c[0],
                fwhm: c[2].abs() * step,
                signal_strength: raw.volume,
                other_parameters: c[3..].iter().map(|eta| eta.clamp(0.0, 1.0)).collect(),
            })
            .collect();

        Ok(SpectrumFit { simulated, peaks })
    }

    /// Fit a single Lorentzian over the whole real spectrum.
    pub fn fit_lorentz(&self, scale: Scale) -> Result<Lorentzian> {
        Lorentzian::fit(&self.scale(scale), &self.real())
    }

    /// Write `axis,real,imag` rows with a header line.
    pub fn write_csv<W: Write>(&self, writer: W, scale: Scale) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record([scale.unit(), "real", "imag"])?;
        for (x, c) in self.scale(scale).into_iter().zip(&self.data) {
            csv.serialize((x, c.re, c.im))?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn to_csv(&self, path: impl AsRef<Path>, scale: Scale) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write_csv(file, scale)
    }
}
