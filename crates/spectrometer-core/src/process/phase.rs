//! Automatic zero-order phase correction.

use super::optimize::{nelder_mead, SimplexOptions};
use super::{argmax, phase_shift};
use crate::complex::Complex;
use crate::error::Result;

/// Find the zero-order phase (degrees) that balances the minima on both
/// sides of the highest real peak.
///
/// A correctly phased absorption line is symmetric, so the dips to its left
/// and right within `peak_width` points are equally deep.
pub fn find_phase_shift(data: &[Complex], p0_start: f64, peak_width: usize) -> Result<f64> {
    let result = nelder_mead(
        |p| phase_shift_score(data, p[0], peak_width),
        &[p0_start],
        SimplexOptions::default(),
    )?;
    log::debug!(
        "phase search from {p0_start}° ended at {}° after {} iterations",
        result.x[0],
        result.iterations
    );
    Ok(result.x[0])
}

fn phase_shift_score(data: &[Complex], p0: f64, peak_width: usize) -> f64 {
    let real: Vec<f64> = phase_shift(data, p0, 0.0).iter().map(|c| c.re).collect();
    let Some(max_idx) = argmax(&real) else {
        return 0.0;
    };
    let min_of = |slice: &[f64]| slice.iter().copied().fold(f64::INFINITY, f64::min);

    let left = &real[max_idx.saturating_sub(peak_width)..max_idx];
    let right = &real[max_idx..(max_idx + peak_width).min(real.len())];
    let left_min = if left.is_empty() {
        real[max_idx]
    } else {
        min_of(left)
    };
    (left_min - min_of(right)).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Complex Lorentzian line (absorption in re, dispersion in im).
    fn line(n: usize, centre: f64, width: f64) -> Vec<Complex> {
        (0..n)
            .map(|i| {
                let x = i as f64 - centre;
                let denom = x * x + width * width;
                Complex::new(width * width / denom, -x * width / denom)
            })
            .collect()
    }

    #[test]
    fn test_phased_line_scores_low() {
        let data = line(512, 256.0, 4.0);
        assert!(phase_shift_score(&data, 0.0, 100) < 1e-3);
        assert!(phase_shift_score(&data, 30.0, 100) > 1e-2);
    }

    #[test]
    fn test_recovers_phase_error() {
        let data = phase_shift(&line(512, 256.0, 4.0), 40.0, 0.0);
        let p0 = find_phase_shift(&data, 0.0, 100).unwrap();
        let corrected = ((p0 + 40.0) % 360.0 + 360.0) % 360.0;
        assert!(corrected.abs() < 0.5 || (corrected - 360.0).abs() < 0.5);
    }

    #[test]
    fn test_score_handles_peak_at_edge() {
        let mut data = vec![Complex::ZERO; 16];
        data[0] = Complex::ONE;
        assert!(phase_shift_score(&data, 0.0, 4).is_finite());
    }
}
