//! Conversion between point index, Hertz and ppm along a complex
//! frequency axis.
//!
//! The axis runs from high to low frequency: point 0 is the highest
//! frequency, as is customary for NMR spectra.

use serde::{Deserialize, Serialize};

/// Units accepted by [`UnitConversion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Points,
    Hz,
    Ppm,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    size: usize,
    sw: f64,
    obs_mhz: f64,
    car_hz: f64,
    delta: f64,
    first: f64,
}

impl UnitConversion {
    /// `sw` in Hz, `obs_mhz` in MHz, `car_hz` in Hz.
    #[must_use]
    pub fn new(size: usize, sw: f64, obs_mhz: f64, car_hz: f64) -> Self {
        let delta = -sw / (size as f64 * obs_mhz);
        let first = car_hz / obs_mhz - delta * size as f64 / 2.0;
        Self {
            size,
            sw,
            obs_mhz,
            car_hz,
            delta,
            first,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn sw(&self) -> f64 {
        self.sw
    }

    #[must_use]
    pub fn obs_mhz(&self) -> f64 {
        self.obs_mhz
    }

    #[must_use]
    pub fn car_hz(&self) -> f64 {
        self.car_hz
    }

    /// Chemical shift of a (fractional) point.
    #[must_use]
    pub fn ppm(&self, point: f64) -> f64 {
        point * self.delta + self.first
    }

    /// Frequency of a (fractional) point.
    #[must_use]
    pub fn hz(&self, point: f64) -> f64 {
        self.ppm(point) * self.obs_mhz
    }

    /// Fractional point for a value in `unit`.
    #[must_use]
    pub fn point(&self, value: f64, unit: Unit) -> f64 {
        match unit {
            Unit::Points => value,
            Unit::Ppm => (value - self.first) / self.delta,
            Unit::Hz => (value / self.obs_mhz - self.first) / self.delta,
        }
    }

    /// Nearest point index for a value in `unit`, clamped to the axis.
    #[must_use]
    pub fn index(&self, value: f64, unit: Unit) -> usize {
        let point = self.point(value, unit).round();
        if point <= 0.0 {
            0
        } else {
            (point as usize).min(self.size.saturating_sub(1))
        }
    }

    #[must_use]
    pub fn hz_scale(&self) -> Vec<f64> {
        (0..self.size).map(|i| self.hz(i as f64)).collect()
    }

    #[must_use]
    pub fn ppm_scale(&self) -> Vec<f64> {
        (0..self.size).map(|i| self.ppm(i as f64)).collect()
    }

    /// `(first point, last point)` in Hz.
    #[must_use]
    pub fn hz_limits(&self) -> (f64, f64) {
        (self.hz(0.0), self.hz(self.last_point()))
    }

    /// `(first point, last point)` in ppm.
    #[must_use]
    pub fn ppm_limits(&self) -> (f64, f64) {
        (self.ppm(0.0), self.ppm(self.last_point()))
    }

    /// Axis describing only the points `from..to` of this one.
    #[must_use]
    pub fn sub_axis(&self, from: usize, to: usize) -> Self {
        let size = to.saturating_sub(from);
        let sw = self.sw * size as f64 / self.size as f64;
        let first = self.ppm(from as f64);
        let car_ppm = first + self.delta * size as f64 / 2.0;
        Self::new(size, sw, self.obs_mhz, car_ppm * self.obs_mhz)
    }

    fn last_point(&self) -> f64 {
        self.size.saturating_sub(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carrier_sits_at_centre() {
        let uc = UnitConversion::new(1024, 10_000.0, 25.0, 500.0);
        assert!((uc.hz(512.0) - 500.0).abs() < 1e-9);
        assert_eq!(uc.index(500.0, Unit::Hz), 512);
    }

    #[test]
    fn test_axis_descends() {
        let uc = UnitConversion::new(8, 800.0, 10.0, 0.0);
        let scale = uc.hz_scale();
        assert!(scale.windows(2).all(|w| w[1] < w[0]));
        assert!((scale[0] - 400.0).abs() < 1e-9);
        assert!((scale[1] - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_point_roundtrip_ppm() {
        let uc = UnitConversion::new(256, 5_000.0, 25.09, 120.0);
        let ppm = uc.ppm(37.0);
        assert!((uc.point(ppm, Unit::Ppm) - 37.0).abs() < 1e-9);
    }

    #[test]
    fn test_index_is_clamped() {
        let uc = UnitConversion::new(16, 1_600.0, 10.0, 0.0);
        assert_eq!(uc.index(1e9, Unit::Hz), 0);
        assert_eq!(uc.index(-1e9, Unit::Hz), 15);
    }

    #[test]
    fn test_sub_axis_keeps_frequencies() {
        let uc = UnitConversion::new(64, 6_400.0, 20.0, 100.0);
        let sub = uc.sub_axis(10, 30);
        assert_eq!(sub.size(), 20);
        for i in 0..20 {
            assert!((sub.hz(i as f64) - uc.hz((i + 10) as f64)).abs() < 1e-6);
        }
    }
}
