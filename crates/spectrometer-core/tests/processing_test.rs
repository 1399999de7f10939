//! Integration tests for the store → load → process chain.

use std::f64::consts::TAU;

use chrono::{TimeZone, Utc};
use spectrometer_core::{
    Complex, Fid1d, FidMetadata, PeakOptions, PhaseCorrection, Scale, SpectrumOptions, ZeroFill,
};
use tempfile::TempDir;

const SW: f64 = 320e3;

fn water_fid(points: usize, offsets_hz: &[(f64, f64)]) -> Fid1d {
    shifted_water_fid(points, offsets_hz, 0.0)
}

fn shifted_water_fid(points: usize, offsets_hz: &[(f64, f64)], carrier_hz: f64) -> Fid1d {
    let data = (0..points)
        .map(|i| {
            let t = i as f64 / SW;
            offsets_hz
                .iter()
                .map(|(f, a)| Complex::cis(TAU * f * t) * (*a * (-t / 1.5e-3).exp()))
                .sum()
        })
        .collect();
    Fid1d::new(
        data,
        FidMetadata {
            spectral_width: SW,
            carrier_freq: carrier_hz,
            observation_freq: 25.09e6,
            label: "1H".to_string(),
            sample: "Water".to_string(),
            pulse: "Pulse(duration=30us), Delay(100us), Record(3.2ms)".to_string(),
            spectrometer: "magnETHical v0.1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).single(),
        },
    )
    .unwrap()
}

/// A stored FID reads back identical and yields the same spectrum
#[test]
fn test_file_roundtrip_preserves_spectrum() {
    let temp_dir = TempDir::new().unwrap();
    let fid = water_fid(2048, &[(4e3, 1.0)]);
    let path = fid.to_file(temp_dir.path().join("water")).unwrap();

    let restored = Fid1d::from_file(&path).unwrap();
    assert_eq!(restored, fid);

    let options = SpectrumOptions {
        phase: PhaseCorrection::Manual { p0: 0.0, p1: 0.0 },
        ..SpectrumOptions::default()
    };
    let (a, _) = fid.spectrum(&options).unwrap();
    let (b, _) = restored.spectrum(&options).unwrap();
    assert!((a.max_peak(Scale::Hz) - b.max_peak(Scale::Hz)).abs() < 1e-6);
}

/// The carrier survives storage in ppm and keeps the ppm axis in place
#[test]
fn test_file_roundtrip_with_carrier() {
    let temp_dir = TempDir::new().unwrap();
    let fid = shifted_water_fid(2048, &[(4e3, 1.0)], 150.0);
    let path = fid.to_file(temp_dir.path().join("shifted")).unwrap();

    let restored = Fid1d::from_file(&path).unwrap();
    assert_eq!(restored, fid);
    assert!((restored.carrier_freq() - 150.0).abs() < 1e-3);

    let options = SpectrumOptions {
        phase: PhaseCorrection::Manual { p0: 0.0, p1: 0.0 },
        ..SpectrumOptions::default()
    };
    let (a, _) = fid.spectrum(&options).unwrap();
    let (b, _) = restored.spectrum(&options).unwrap();
    assert!((b.carrier_frequency() - 150.0).abs() < 1e-3);
    assert!((a.max_peak(Scale::Ppm) - b.max_peak(Scale::Ppm)).abs() < 1e-6);
    assert!((a.max_peak(Scale::Hz) - b.max_peak(Scale::Hz)).abs() < 1e-6);
}

/// Two lines are found and fitted at their frequencies
#[test]
fn test_two_line_spectrum_peaks_and_fit() {
    let fid = water_fid(1024, &[(20e3, 1.0), (-30e3, 0.5)]);
    let options = SpectrumOptions {
        zero_fill: ZeroFill::Double(2),
        phase: PhaseCorrection::Disabled,
        ..SpectrumOptions::default()
    };
    let (spectrum, _) = fid.spectrum(&options).unwrap();
    assert_eq!(spectrum.size(), 4096);

    let peak_options = PeakOptions {
        threshold: Some(0.2 * spectrum.real().into_iter().fold(0.0, f64::max)),
        scale: Scale::Hz,
        ..PeakOptions::default()
    };
    let peaks = spectrum.peaks(&peak_options).unwrap();
    assert_eq!(peaks.len(), 2, "peaks: {peaks:?}");
    let resolution = SW / 4096.0;
    assert!((peaks[0].location - 20e3).abs() < 2.0 * resolution);
    assert!((peaks[1].location + 30e3).abs() < 2.0 * resolution);

    let fit = spectrum.fit(&peak_options).unwrap();
    assert_eq!(fit.peaks.len(), 2);
    assert!((fit.peaks[0].location - 20e3).abs() < resolution);
    assert!(fit.peaks[0].amplitude > fit.peaks[1].amplitude);
}

/// Cropping around the main line keeps it at the same frequency
#[test]
fn test_crop_around_peak_and_export() {
    let temp_dir = TempDir::new().unwrap();
    let fid = water_fid(1024, &[(10e3, 1.0)]);
    let (spectrum, _) = fid.spectrum(&SpectrumOptions::default()).unwrap();

    let centre = spectrum.max_peak(Scale::Hz);
    let cropped = spectrum.crop_around(Scale::Hz, centre, 20e3).unwrap();
    assert!(cropped.size() < spectrum.size());
    assert!((cropped.max_peak(Scale::Hz) - centre).abs() < 1e-6);

    let csv_path = temp_dir.path().join("spectrum.csv");
    cropped.to_csv(&csv_path, Scale::Hz).unwrap();
    let text = std::fs::read_to_string(&csv_path).unwrap();
    assert!(text.starts_with("Hz,real,imag"));
    assert_eq!(text.lines().count(), cropped.size() + 1);
}
