//! Processing steps for 1D NMR data.
//!
//! The steps follow NMRPipe conventions so that spectra computed here line
//! up with spectra from the usual NMR tooling: the Fourier transform uses a
//! positive exponent, is scaled by the number of points and shifts the
//! zero frequency to the centre; phases are given in degrees.

pub mod fit;
pub mod optimize;
pub mod phase;

use serde::{Deserialize, Serialize};

use crate::complex::Complex;
use crate::error::{Error, Result};
use crate::fft;

pub use fit::{
    CurveModel, DecayingSinusoid, DecayingSinusoidSquared, ExpDecay, Lorentzian, Sinusoid,
};
pub use phase::find_phase_shift;

/// How to zero fill before the Fourier transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZeroFill {
    /// Pad to the next power of two.
    #[default]
    Auto,
    /// Pad to exactly this many points (truncates if smaller).
    Size(usize),
    /// Append this many zeros.
    Pad(usize),
    /// Double the size this many times.
    Double(u32),
    Disabled,
}

/// Zero fill `data` according to `mode`.
///
/// Fails when the requested size does not fit in memory addressing.
pub fn zero_fill(data: &[Complex], mode: ZeroFill) -> Result<Vec<Complex>> {
    let target = match mode {
        ZeroFill::Auto => data.len().checked_next_power_of_two(),
        ZeroFill::Size(size) => Some(size),
        ZeroFill::Pad(pad) => data.len().checked_add(pad),
        ZeroFill::Double(count) => 1usize
            .checked_shl(count)
            .and_then(|factor| data.len().checked_mul(factor)),
        ZeroFill::Disabled => Some(data.len()),
    }
    .ok_or_else(|| Error::InvalidData(format!("zero fill {mode:?} overflows")))?;
    let mut out = data.to_vec();
    out.resize(target, Complex::ZERO);
    Ok(out)
}

/// Complex Fourier transform with NMRPipe conventions.
#[must_use]
pub fn fourier_transform(data: &[Complex]) -> Vec<Complex> {
    let n = data.len() as f64;
    let transformed: Vec<Complex> = fft::ifft(data).into_iter().map(|c| c * n).collect();
    fft::fftshift(&transformed)
}

/// Zero- and first-order phase correction, angles in degrees.
///
/// Point `k` of `n` is rotated by `p0 + p1 * k / n`.
#[must_use]
pub fn phase_shift(data: &[Complex], p0_deg: f64, p1_deg: f64) -> Vec<Complex> {
    let size = data.len() as f64;
    let p0 = p0_deg.to_radians();
    let p1 = p1_deg.to_radians();
    data.iter()
        .enumerate()
        .map(|(k, c)| c.rotate(p0 + p1 * k as f64 / size))
        .collect()
}

/// Average absolute value over `from..to`, a noise estimate for a region
/// without peaks.
#[must_use]
pub fn estimate_noise_amplitude(amplitudes: &[f64], from: usize, to: usize) -> f64 {
    let to = to.min(amplitudes.len());
    if from >= to {
        return 0.0;
    }
    let slice = &amplitudes[from..to];
    slice.iter().map(|a| a.abs()).sum::<f64>() / slice.len() as f64
}

/// Population standard deviation of complex data (numpy `std`).
#[must_use]
pub fn complex_std(data: &[Complex]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let n = data.len() as f64;
    let mean = data.iter().copied().sum::<Complex>() / n;
    (data.iter().map(|c| (*c - mean).norm_sqr()).sum::<f64>() / n).sqrt()
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

pub(crate) fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_zero_fill_modes() {
        let data = vec![Complex::ONE; 5];
        let len = |mode| zero_fill(&data, mode).unwrap().len();
        assert_eq!(len(ZeroFill::Auto), 8);
        assert_eq!(len(ZeroFill::Size(3)), 3);
        assert_eq!(len(ZeroFill::Pad(2)), 7);
        assert_eq!(len(ZeroFill::Double(1)), 10);
        assert_eq!(len(ZeroFill::Disabled), 5);
        assert_eq!(zero_fill(&data, ZeroFill::Auto).unwrap()[7], Complex::ZERO);
    }

    #[test]
    fn test_zero_fill_too_many_doublings() {
        let data = vec![Complex::ONE; 5];
        assert!(matches!(
            zero_fill(&data, ZeroFill::Double(64)),
            Err(Error::InvalidData(_))
        ));
        assert!(zero_fill(&data, ZeroFill::Double(62)).is_err());
        assert!(zero_fill(&data, ZeroFill::Pad(usize::MAX)).is_err());
    }

    #[test]
    fn test_constant_signal_lands_in_centre() {
        let data = vec![Complex::ONE; 8];
        let spectrum = fourier_transform(&data);
        assert!((spectrum[4].re - 8.0).abs() < 1e-9);
        assert!(spectrum
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 4)
            .all(|(_, c)| c.norm() < 1e-9));
    }

    #[test]
    fn test_phase_shift_zero_order() {
        let data = vec![Complex::ONE; 4];
        let shifted = phase_shift(&data, 90.0, 0.0);
        assert!(shifted.iter().all(|c| c.re.abs() < 1e-12 && (c.im - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_phase_shift_first_order() {
        let data = vec![Complex::ONE; 2];
        let shifted = phase_shift(&data, 0.0, 360.0);
        // second point rotated by 180 degrees
        assert!((shifted[1].arg().abs() - PI).abs() < 1e-9);
    }

    #[test]
    fn test_noise_amplitude() {
        let values = [1.0, -1.0, 3.0, -3.0];
        assert!((estimate_noise_amplitude(&values, 0, 2) - 1.0).abs() < 1e-12);
        assert!((estimate_noise_amplitude(&values, 0, 100) - 2.0).abs() < 1e-12);
        assert!(estimate_noise_amplitude(&values, 3, 2).abs() < 1e-12);
    }

    #[test]
    fn test_complex_std() {
        let data = [Complex::new(1.0, 0.0), Complex::new(-1.0, 0.0)];
        assert!((complex_std(&data) - 1.0).abs() < 1e-12);
    }
}
