//! Complex sample type.
//!
//! Quadrature-detected NMR data is complex: the real part is the in-phase
//! and the imaginary part the quadrature channel after down-conversion.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Complex number in rectangular form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Complex {
    /// Real (in-phase) part
    pub re: f64,
    /// Imaginary (quadrature) part
    pub im: f64,
}

impl Complex {
    pub const ZERO: Self = Self { re: 0.0, im: 0.0 };
    pub const ONE: Self = Self { re: 1.0, im: 0.0 };
    pub const I: Self = Self { re: 0.0, im: 1.0 };

    #[must_use]
    #[inline]
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// Create from a purely real value.
    #[must_use]
    #[inline]
    pub const fn from_real(re: f64) -> Self {
        Self { re, im: 0.0 }
    }

    /// Create from magnitude and phase (radians).
    #[must_use]
    #[inline]
    pub fn from_polar(norm: f64, arg: f64) -> Self {
        let (sin, cos) = arg.sin_cos();
        Self {
            re: norm * cos,
            im: norm * sin,
        }
    }

    /// `e^{i·angle}`
    #[must_use]
    #[inline]
    pub fn cis(angle: f64) -> Self {
        Self::from_polar(1.0, angle)
    }

    /// Magnitude.
    #[must_use]
    #[inline]
    pub fn norm(&self) -> f64 {
        self.re.hypot(self.im)
    }

    /// Magnitude squared (avoids the square root for comparisons).
    #[must_use]
    #[inline]
    pub fn norm_sqr(&self) -> f64 {
        self.re * self.re + self.im * self.im
    }

    /// Phase angle in radians (-π to π).
    #[must_use]
    #[inline]
    pub fn arg(&self) -> f64 {
        self.im.atan2(self.re)
    }

    #[must_use]
    #[inline]
    pub fn conj(&self) -> Self {
        Self {
            re: self.re,
            im: -self.im,
        }
    }

    /// Rotate by `angle` radians.
    #[must_use]
    #[inline]
    pub fn rotate(&self, angle: f64) -> Self {
        *self * Self::cis(angle)
    }

    #[must_use]
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.re == 0.0 && self.im == 0.0
    }

    /// Element-wise closeness with numpy `isclose` semantics:
    /// `|a - b| <= atol + rtol * |b|`.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, rtol: f64, atol: f64) -> bool {
        (*self - *other).norm() <= atol + rtol * other.norm()
    }
}

impl From<f64> for Complex {
    fn from(re: f64) -> Self {
        Self::from_real(re)
    }
}

impl fmt::Display for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.im < 0.0 {
            write!(f, "{}-{}j", self.re, -self.im)
        } else {
            write!(f, "{}+{}j", self.re, self.im)
        }
    }
}

impl Add for Complex {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl AddAssign for Complex {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.re += rhs.re;
        self.im += rhs.im;
    }
}

impl Sub for Complex {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

impl Mul<f64> for Complex {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.re * rhs, self.im * rhs)
    }
}

impl Div<f64> for Complex {
    type Output = Self;
    #[inline]
    fn div(self, rhs: f64) -> Self {
        Self::new(self.re / rhs, self.im / rhs)
    }
}

impl Neg for Complex {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.re, -self.im)
    }
}

impl std::iter::Sum for Complex {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, c| acc + c)
    }
}

/// numpy `allclose` over two slices; `false` on length mismatch.
#[must_use]
pub fn all_close(a: &[Complex], b: &[Complex], rtol: f64, atol: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.approx_eq(y, rtol, atol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_norm_and_arg() {
        let c = Complex::new(3.0, 4.0);
        assert!((c.norm() - 5.0).abs() < 1e-12);
        assert!((Complex::I.arg() - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_multiply() {
        let a = Complex::new(1.0, 2.0);
        let b = Complex::new(3.0, 4.0);
        // (1+2i)(3+4i) = 3 + 4i + 6i - 8 = -5 + 10i
        assert_eq!(a * b, Complex::new(-5.0, 10.0));
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let rotated = Complex::ONE.rotate(FRAC_PI_2);
        assert!(rotated.re.abs() < 1e-12);
        assert!((rotated.im - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_all_close_length_mismatch() {
        assert!(!all_close(&[Complex::ONE], &[], 1e-5, 1e-8));
        assert!(all_close(
            &[Complex::new(1.0, 0.0)],
            &[Complex::new(1.0 + 1e-9, 0.0)],
            1e-5,
            1e-8
        ));
    }
}
