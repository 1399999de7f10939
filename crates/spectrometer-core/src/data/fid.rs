use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::pipe::{self, field, PipeHeader, COMMENT_LEN, LABEL_LEN, OPERNAME_LEN, TITLE_LEN};
use super::spectrum::Spectrum1d;
use crate::complex::{all_close, Complex};
use crate::error::{Error, Result};
use crate::process::{self, ZeroFill};

const FID_EXTENSION: &str = "fid";
/// Points searched on each side of the highest peak during auto phasing.
const AUTO_PHASE_PEAK_WIDTH: usize = 100;

/// Descriptive metadata of a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FidMetadata {
    /// Sampling bandwidth in Hz (inverse of the dwell time).
    pub spectral_width: f64,
    /// Offset between observation and resonance frequency in Hz.
    pub carrier_freq: f64,
    /// Down-conversion frequency in Hz.
    pub observation_freq: f64,
    /// Nucleus, e.g. `1H` (8 bytes max).
    pub label: String,
    /// Sample description (60 bytes max).
    pub sample: String,
    /// Pulse sequence file name or description (160 bytes max).
    pub pulse: String,
    /// Spectrometer name (32 bytes max).
    pub spectrometer: String,
    /// Time of the experiment; `None` means now.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Universal-dictionary style description of the single FID axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisInfo {
    pub car: f64,
    pub complex: bool,
    pub encoding: String,
    pub freq: bool,
    pub time: bool,
    pub label: String,
    /// MHz
    pub obs: f64,
    pub size: usize,
    pub sw: f64,
}

/// Phase correction applied by [`Fid1d::spectrum`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum PhaseCorrection {
    /// Search the zero-order phase automatically.
    #[default]
    Auto,
    /// Fixed zero- and first-order phase in degrees.
    Manual { p0: f64, p1: f64 },
    Disabled,
}

/// Processing steps for [`Fid1d::spectrum`]. The default zero fills to the
/// next power of two, transforms and phases automatically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumOptions {
    pub zero_fill: ZeroFill,
    pub fourier_transform: bool,
    pub phase: PhaseCorrection,
}

impl Default for SpectrumOptions {
    fn default() -> Self {
        Self {
            zero_fill: ZeroFill::Auto,
            fourier_transform: true,
            phase: PhaseCorrection::Auto,
        }
    }
}

/// 1D Free Induction Decay with the metadata needed to process it.
///
/// An `Fid1d` built through [`Fid1d::new`] can always be written with
/// [`to_file`](Fid1d::to_file) and read back with
/// [`from_file`](Fid1d::from_file). Numbers are stored as 32-bit floats.
#[derive(Debug, Clone)]
pub struct Fid1d {
    data: Vec<Complex>,
    spectral_width: f64,
    carrier_freq: f64,
    observation_freq: f64,
    label: String,
    sample: String,
    pulse: String,
    spectrometer: String,
    timestamp: DateTime<Utc>,
}

fn check_len(what: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(Error::InvalidData(format!(
            "{what} '{value}' is longer than {max} characters"
        )));
    }
    Ok(())
}

fn now_seconds() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(0).unwrap_or(now)
}

impl Fid1d {
    pub fn new(data: Vec<Complex>, meta: FidMetadata) -> Result<Self> {
        if !data.iter().any(|c| c.im != 0.0) {
            return Err(Error::InvalidData(
                "The input data doesn't seem to consist of complex numbers".to_string(),
            ));
        }
        if meta.spectral_width.is_nan() || meta.spectral_width <= 0.0 {
            return Err(Error::InvalidData(format!(
                "spectral width must be positive, got {}",
                meta.spectral_width
            )));
        }
        if meta.observation_freq.is_nan() || meta.observation_freq <= 0.0 {
            return Err(Error::InvalidData(format!(
                "observation frequency must be positive, got {}",
                meta.observation_freq
            )));
        }
        check_len("Pulse description", &meta.pulse, COMMENT_LEN)?;
        check_len("Name of spectrometer", &meta.spectrometer, OPERNAME_LEN)?;
        check_len("Sample description", &meta.sample, TITLE_LEN)?;
        check_len("Label", &meta.label, LABEL_LEN)?;

        Ok(Self {
            data,
            spectral_width: meta.spectral_width,
            carrier_freq: meta.carrier_freq,
            observation_freq: meta.observation_freq,
            label: meta.label,
            sample: meta.sample,
            pulse: meta.pulse,
            spectrometer: meta.spectrometer,
            timestamp: meta.timestamp.unwrap_or_else(now_seconds),
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
    pub fn carrier_freq(&self) -> f64 {
        self.carrier_freq
    }

    #[must_use]
    pub fn observation_freq(&self) -> f64 {
        self.observation_freq
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn sample(&self) -> &str {
        &self.sample
    }

    #[must_use]
    pub fn pulse(&self) -> &str {
        &self.pulse
    }

    #[must_use]
    pub fn spectrometer(&self) -> &str {
        &self.spectrometer
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn metadata(&self) -> FidMetadata {
        FidMetadata {
            spectral_width: self.spectral_width,
            carrier_freq: self.carrier_freq,
            observation_freq: self.observation_freq,
            label: self.label.clone(),
            sample: self.sample.clone(),
            pulse: self.pulse.clone(),
            spectrometer: self.spectrometer.clone(),
            timestamp: Some(self.timestamp),
        }
    }

    /// Sample times in µs.
    #[must_use]
    pub fn us_scale(&self) -> Vec<f64> {
        self.time_scale(1e6)
    }

    /// Sample times in ms.
    #[must_use]
    pub fn ms_scale(&self) -> Vec<f64> {
        self.time_scale(1e3)
    }

    fn time_scale(&self, factor: f64) -> Vec<f64> {
        (0..self.size())
            .map(|i| i as f64 / self.spectral_width * factor)
            .collect()
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

    /// Axis description without sample, pulse and spectrometer details.
    #[must_use]
    pub fn axis_info(&self) -> AxisInfo {
        AxisInfo {
            car: self.carrier_freq,
            complex: true,
            encoding: "direct".to_string(),
            freq: false,
            time: true,
            label: self.label.clone(),
            obs: self.observation_freq / 1e6,
            size: self.size(),
            sw: self.spectral_width,
        }
    }

    /// Build an FID from an axis description; descriptive fields stay empty.
    pub fn from_axis_info(info: &AxisInfo, data: Vec<Complex>) -> Result<Self> {
        if !info.time || info.freq {
            return Err(Error::Unsupported(
                "Only time domain signals are supported!".to_string(),
            ));
        }
        if data.len() != info.size {
            return Err(Error::InvalidData(
                "Size length mismatch between axis metadata and actual data".to_string(),
            ));
        }
        Self::new(
            data,
            FidMetadata {
                spectral_width: info.sw,
                carrier_freq: info.car,
                observation_freq: info.obs * 1e6,
                label: info.label.clone(),
                sample: String::new(),
                pulse: String::new(),
                spectrometer: String::new(),
                timestamp: None,
            },
        )
    }

    /// NMRPipe header describing this FID.
    #[must_use]
    pub fn pipe_header(&self) -> PipeHeader {
        let size = self.size() as f64;
        let obs_mhz = self.observation_freq / 1e6;
        let car_ppm = self.carrier_freq / obs_mhz;
        let center = (self.size() / 2 + 1) as f64;

        let mut header = PipeHeader::new();
        header.set(field::SIZE, size as f32);
        header.set(field::REALSIZE, size as f32);
        header.set(field::TWO_D_PHASE, 0.0);

        header.set_str(field::TITLE, TITLE_LEN, &self.sample);
        header.set_str(field::COMMENT, COMMENT_LEN, &self.pulse);
        header.set_str(field::OPERNAME, OPERNAME_LEN, &self.spectrometer);

        let ts = self.timestamp;
        header.set(field::YEAR, ts.year() as f32);
        header.set(field::MONTH, ts.month() as f32);
        header.set(field::DAY, ts.day() as f32);
        header.set(field::HOURS, ts.hour() as f32);
        header.set(field::MINS, ts.minute() as f32);
        header.set(field::SECS, ts.second() as f32);

        header.set(field::F2SW, self.spectral_width as f32);
        header.set(field::F2OBS, obs_mhz as f32);
        header.set(field::F2CAR, car_ppm as f32);
        header.set_str(field::F2LABEL, LABEL_LEN, &self.label);
        header.set(field::F2QUADFLAG, 0.0);
        header.set(field::F2FTFLAG, 0.0);
        header.set(field::F2TDSIZE, size as f32);
        header.set(field::F2APOD, size as f32);
        header.set(field::F2CENTER, center as f32);
        // Frequency of the last point, see Hoch and Stern fig. 3.1
        let orig = car_ppm * obs_mhz - self.spectral_width * (size - center) / size;
        header.set(field::F2ORIG, orig as f32);
        header
    }

    /// Build an FID from an NMRPipe header and its data.
    ///
    /// The title, comment and operator name fields are read as sample,
    /// pulse description and spectrometer name.
    pub fn from_pipe(header: &PipeHeader, data: Vec<Complex>) -> Result<Self> {
        if header.get(field::DIMCOUNT) != 1.0 {
            return Err(Error::Unsupported("Only 1D FIDs supported!".to_string()));
        }
        let axis = header.get(field::DIMORDER);
        if axis != 2.0 {
            return Err(Error::Unsupported(format!(
                "direct dimension F{axis} is not supported"
            )));
        }
        let size = header.get(field::SIZE);
        if size != header.get(field::REALSIZE) || size as usize != data.len() {
            return Err(Error::InvalidData(
                "Data inconsistency in NMRPipe metadata and data array".to_string(),
            ));
        }
        if header.get(field::F2QUADFLAG) != 0.0 {
            return Err(Error::Unsupported(
                "Only complex NMRPipe data is supported".to_string(),
            ));
        }
        if header.get(field::F2FTFLAG) != 0.0 {
            return Err(Error::Unsupported(
                "Only time domain data is supported".to_string(),
            ));
        }

        let obs_mhz = f64::from(header.get(field::F2OBS));
        let timestamp = Utc
            .with_ymd_and_hms(
                header.get(field::YEAR) as i32,
                header.get(field::MONTH) as u32,
                header.get(field::DAY) as u32,
                header.get(field::HOURS) as u32,
                header.get(field::MINS) as u32,
                header.get(field::SECS) as u32,
            )
            .single()
            .ok_or_else(|| Error::InvalidData("invalid date in NMRPipe header".to_string()))?;

        Self::new(
            data,
            FidMetadata {
                spectral_width: f64::from(header.get(field::F2SW)),
                carrier_freq: f64::from(header.get(field::F2CAR)) * obs_mhz,
                observation_freq: obs_mhz * 1e6,
                label: header.get_str(field::F2LABEL, LABEL_LEN),
                sample: header.get_str(field::TITLE, TITLE_LEN),
                pulse: header.get_str(field::COMMENT, COMMENT_LEN),
                spectrometer: header.get_str(field::OPERNAME, OPERNAME_LEN),
                timestamp: Some(timestamp),
            },
        )
    }

    /// Read an NMRPipe file holding 1D time-domain data.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let (header, data) = pipe::read(path)?;
        Self::from_pipe(&header, data)
    }

    /// Store the FID as an NMRPipe file and return the path written.
    ///
    /// A `.fid` suffix is appended if missing. Existing files are never
    /// overwritten: a counter is inserted before the suffix instead.
    /// Missing parent directories are created.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = available_path(path.as_ref());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        pipe::write(&path, &self.pipe_header(), &self.data)?;
        log::info!("Wrote {} points to {}", self.size(), path.display());
        Ok(path)
    }

    /// Process the FID into a spectrum. Returns the spectrum and the
    /// zero-order phase that was applied, in degrees.
    pub fn spectrum(&self, options: &SpectrumOptions) -> Result<(Spectrum1d, f64)> {
        let mut data = process::zero_fill(&self.data, options.zero_fill)?;
        if options.fourier_transform {
            data = process::fourier_transform(&data);
        }
        let p0 = match options.phase {
            PhaseCorrection::Auto => {
                let (lo, hi) = data.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), c| (lo.min(c.re), hi.max(c.re)),
                );
                let start = if lo.abs() > hi.abs() { 180.0 } else { 0.0 };
                let p0 = process::find_phase_shift(&data, start, AUTO_PHASE_PEAK_WIDTH)?;
                data = process::phase_shift(&data, p0, 0.0);
                p0
            }
            PhaseCorrection::Manual { p0, p1 } => {
                data = process::phase_shift(&data, p0, p1);
                p0
            }
            PhaseCorrection::Disabled => 0.0,
        };
        let spectrum = Spectrum1d::new(
            data,
            self.spectral_width,
            self.observation_freq,
            self.carrier_freq,
        )?;
        Ok((spectrum, p0))
    }
}

/// `path` with a `.fid` suffix, or the first free `<stem><n>.fid` next to
/// it.
fn available_path(path: &Path) -> PathBuf {
    let path = if path.extension().is_some_and(|ext| ext == FID_EXTENSION) {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(FID_EXTENSION);
        PathBuf::from(name)
    };
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    (1..)
        .map(|i| parent.join(format!("{stem}{i}.{FID_EXTENSION}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-6 * b.abs()
}

/// Equal metadata, and data equal within `allclose` tolerances. Numbers
/// are compared with a tolerance that absorbs the 32-bit file storage.
impl PartialEq for Fid1d {
    fn eq(&self, other: &Self) -> bool {
        close(self.carrier_freq, other.carrier_freq)
            && self.label == other.label
            && close(self.observation_freq, other.observation_freq)
            && close(self.spectral_width, other.spectral_width)
            && self.sample == other.sample
            && self.pulse == other.pulse
            && self.spectrometer == other.spectrometer
            && self.timestamp == other.timestamp
            && all_close(&self.data, &other.data, 1e-5, 1e-8)
    }
}

impl Index<usize> for Fid1d {
    type Output = Complex;

    fn index(&self, index: usize) -> &Complex {
        &self.data[index]
    }
}

impl IndexMut<usize> for Fid1d {
    fn index_mut(&mut self, index: usize) -> &mut Complex {
        &mut self.data[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;
    use tempfile::TempDir;

    fn metadata() -> FidMetadata {
        FidMetadata {
            spectral_width: 320e3,
            carrier_freq: 0.0,
            observation_freq: 25.09e6,
            label: "1H".to_string(),
            sample: "Water".to_string(),
            pulse: "simple 30us".to_string(),
            spectrometer: "magnETHical v0.1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 14, 15, 9, 26).single(),
        }
    }

    fn decay(n: usize, freq_hz: f64, sw: f64) -> Vec<Complex> {
        (0..n)
            .map(|i| {
                let t = i as f64 / sw;
                Complex::cis(TAU * freq_hz * t) * (-t / 2e-3).exp()
            })
            .collect()
    }

    #[test]
    fn test_rejects_real_data() {
        let err = Fid1d::new(vec![Complex::ONE; 4], metadata()).unwrap_err();
        assert!(err.to_string().contains("complex"));
    }

    #[test]
    fn test_rejects_long_fields() {
        let mut meta = metadata();
        meta.label = "123456789".to_string();
        assert!(Fid1d::new(decay(8, 1e3, 320e3), meta).is_err());

        let mut meta = metadata();
        meta.spectrometer = "x".repeat(33);
        assert!(Fid1d::new(decay(8, 1e3, 320e3), meta).is_err());

        let mut meta = metadata();
        meta.sample = "x".repeat(60);
        assert!(Fid1d::new(decay(8, 1e3, 320e3), meta).is_ok());
    }

    #[test]
    fn test_default_timestamp_has_no_fraction() {
        let mut meta = metadata();
        meta.timestamp = None;
        let fid = Fid1d::new(decay(8, 1e3, 320e3), meta).unwrap();
        assert_eq!(fid.timestamp().nanosecond(), 0);
    }

    #[test]
    fn test_time_scales() {
        let fid = Fid1d::new(decay(4, 1e3, 1e3), metadata_with_sw(1e3)).unwrap();
        assert_eq!(fid.ms_scale(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(fid.us_scale()[1], 1000.0);
    }

    fn metadata_with_sw(sw: f64) -> FidMetadata {
        FidMetadata {
            spectral_width: sw,
            ..metadata()
        }
    }

    #[test]
    fn test_pipe_header_axis() {
        let fid = Fid1d::new(decay(1024, 1e3, 320e3), metadata()).unwrap();
        let header = fid.pipe_header();
        assert_eq!(header.get(field::F2CENTER), 513.0);
        assert_eq!(header.get(field::F2TDSIZE), 1024.0);
        let orig = f64::from(header.get(field::F2ORIG));
        assert!((orig - (-320e3 * 511.0 / 1024.0)).abs() < 1.0);
        assert_eq!(header.get_str(field::F2LABEL, LABEL_LEN), "1H");
        assert_eq!(header.get(field::YEAR), 2024.0);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let fid = Fid1d::new(decay(256, 2e3, 320e3), metadata()).unwrap();
        let path = fid.to_file(dir.path().join("water")).unwrap();
        assert_eq!(path, dir.path().join("water.fid"));
        let restored = Fid1d::from_file(&path).unwrap();
        assert_eq!(restored, fid);
    }

    #[test]
    fn test_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let fid = Fid1d::new(decay(16, 2e3, 320e3), metadata()).unwrap();
        let first = fid.to_file(dir.path().join("a.fid")).unwrap();
        let second = fid.to_file(dir.path().join("a.fid")).unwrap();
        let third = fid.to_file(dir.path().join("a")).unwrap();
        assert_eq!(first, dir.path().join("a.fid"));
        assert_eq!(second, dir.path().join("a1.fid"));
        assert_eq!(third, dir.path().join("a2.fid"));
    }

    #[test]
    fn test_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let fid = Fid1d::new(decay(16, 2e3, 320e3), metadata()).unwrap();
        let path = fid.to_file(dir.path().join("run/1/fid")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_axis_info_roundtrip() {
        let fid = Fid1d::new(decay(32, 2e3, 320e3), metadata()).unwrap();
        let info = fid.axis_info();
        assert!(info.time && !info.freq);
        let rebuilt = Fid1d::from_axis_info(&info, fid.data().to_vec()).unwrap();
        assert_eq!(rebuilt.label(), "1H");
        assert!(rebuilt.sample().is_empty());
        assert!(Fid1d::from_axis_info(&info, vec![Complex::I; 3]).is_err());
    }

    #[test]
    fn test_spectrum_peak_position() {
        let sw = 320e3;
        let fid = Fid1d::new(decay(1024, 10e3, sw), metadata()).unwrap();
        let options = SpectrumOptions {
            phase: PhaseCorrection::Disabled,
            ..SpectrumOptions::default()
        };
        let (spectrum, p0) = fid.spectrum(&options).unwrap();
        assert_eq!(p0, 0.0);
        assert_eq!(spectrum.size(), 1024);
        let peak_hz = spectrum.max_peak(crate::Scale::Hz);
        assert!((peak_hz - 10e3).abs() < sw / 1024.0);
    }

    #[test]
    fn test_spectrum_auto_phase_fixes_rotation() {
        let sw = 320e3;
        let data: Vec<Complex> = decay(1024, 5e3, sw)
            .into_iter()
            .map(|c| c.rotate(1.0))
            .collect();
        let fid = Fid1d::new(data, metadata()).unwrap();
        let (spectrum, p0) = fid.spectrum(&SpectrumOptions::default()).unwrap();
        let peak = spectrum.max_peak(crate::Scale::Index) as usize;
        // after phasing the peak is an absorption line
        assert!(spectrum.data()[peak].re > 0.0);
        assert!(spectrum.data()[peak].im.abs() < 0.2 * spectrum.data()[peak].re);
        assert!(p0.is_finite());
    }

    #[test]
    fn test_index_mut() {
        let mut fid = Fid1d::new(decay(4, 1e3, 320e3), metadata()).unwrap();
        fid[0] = Complex::ZERO;
        assert_eq!(fid[0], Complex::ZERO);
    }
}
