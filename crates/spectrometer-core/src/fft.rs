//! Discrete Fourier transforms.
//!
//! Uses an in-place radix-2 decimation-in-time FFT when the length is a
//! power of two (the usual case after zero filling) and falls back to a
//! direct DFT otherwise.

use std::f64::consts::PI;

use crate::complex::Complex;

/// Forward transform, `X_k = Σ x_n e^{-2πi kn/N}`.
#[must_use]
pub fn fft(input: &[Complex]) -> Vec<Complex> {
    transform(input, -1.0)
}

/// Inverse transform, `x_n = 1/N Σ X_k e^{+2πi kn/N}`.
#[must_use]
pub fn ifft(input: &[Complex]) -> Vec<Complex> {
    let n = input.len() as f64;
    transform(input, 1.0)
        .into_iter()
        .map(|c| c / n)
        .collect()
}

/// Move the zero-frequency bin to the centre (numpy `fftshift`).
#[must_use]
pub fn fftshift<T: Copy>(input: &[T]) -> Vec<T> {
    let mut out = input.to_vec();
    out.rotate_right(input.len() / 2);
    out
}

/// Sample frequencies for an FFT of length `n` with sample spacing `d`
/// (numpy `fftfreq`).
#[must_use]
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let scale = 1.0 / (n as f64 * d);
    let positive = n.div_ceil(2);
    (0..n)
        .map(|k| {
            if k < positive {
                k as f64 * scale
            } else {
                (k as f64 - n as f64) * scale
            }
        })
        .collect()
}

fn transform(input: &[Complex], sign: f64) -> Vec<Complex> {
    let n = input.len();
    if n <= 1 {
        return input.to_vec();
    }
    if n.is_power_of_two() {
        let mut data = input.to_vec();
        radix2_in_place(&mut data, sign);
        data
    } else {
        direct_dft(input, sign)
    }
}

fn direct_dft(input: &[Complex], sign: f64) -> Vec<Complex> {
    let n = input.len();
    let step = sign * 2.0 * PI / n as f64;
    (0..n)
        .map(|k| {
            input
                .iter()
                .enumerate()
                // Reduce k*j modulo n first to keep the angle small.
                .map(|(j, x)| *x * Complex::cis(step * ((k * j) % n) as f64))
                .sum()
        })
        .collect()
}

/// In-place radix-2 DIT FFT.
fn radix2_in_place(data: &mut [Complex], sign: f64) {
    let n = data.len();

    // Bit-reverse permutation
    let mut j = 0;
    for i in 0..n - 1 {
        if i < j {
            data.swap(i, j);
        }
        let mut k = n / 2;
        while k <= j {
            j -= k;
            k /= 2;
        }
        j += k;
    }

    // Cooley-Tukey butterflies
    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let angle_step = sign * 2.0 * PI / len as f64;

        for start in (0..n).step_by(len) {
            for k in 0..half {
                let twiddle = Complex::cis(angle_step * k as f64);
                let u = data[start + k];
                let t = twiddle * data[start + k + half];
                data[start + k] = u + t;
                data[start + k + half] = u - t;
            }
        }
        len *= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(n: usize, bin: usize) -> Vec<Complex> {
        (0..n)
            .map(|i| Complex::cis(2.0 * PI * (bin * i) as f64 / n as f64))
            .collect()
    }

    #[test]
    fn test_fft_detects_tone() {
        let spectrum = fft(&tone(64, 5));
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(5));
        assert!((spectrum[5].norm() - 64.0).abs() < 1e-9);
    }

    #[test]
    fn test_radix2_matches_direct_dft() {
        let input: Vec<Complex> = (0..16)
            .map(|i| Complex::new((i as f64).sin(), (i as f64 * 0.3).cos()))
            .collect();
        let fast = fft(&input);
        let slow = direct_dft(&input, -1.0);
        for (a, b) in fast.iter().zip(&slow) {
            assert!((*a - *b).norm() < 1e-9);
        }
    }

    #[test]
    fn test_inverse_restores_signal() {
        let input: Vec<Complex> = (0..12).map(|i| Complex::new(i as f64, -1.0)).collect();
        let restored = ifft(&fft(&input));
        for (a, b) in input.iter().zip(&restored) {
            assert!((*a - *b).norm() < 1e-9);
        }
    }

    #[test]
    fn test_fftshift_even_and_odd() {
        assert_eq!(fftshift(&[0, 1, 2, 3]), vec![2, 3, 0, 1]);
        assert_eq!(fftshift(&[0, 1, 2, 3, 4]), vec![3, 4, 0, 1, 2]);
    }

    #[test]
    fn test_fftfreq() {
        let freqs = fftfreq(4, 0.5);
        assert_eq!(freqs, vec![0.0, 0.5, -1.0, -0.5]);
        let freqs = fftfreq(5, 1.0);
        assert_eq!(freqs, vec![0.0, 0.2, 0.4, -0.4, -0.2]);
    }
}
