//! Measurement data: FIDs, spectra and the files they are stored in.

mod fid;
mod peaks;
pub mod pipe;
mod spectrum;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use fid::{AxisInfo, Fid1d, FidMetadata, PhaseCorrection, SpectrumOptions};
pub use peaks::{Algorithm, Lineshape, Peak, PeakOptions};
pub use spectrum::{SpectrumFit, Spectrum1d};

/// Axis a spectrum is addressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    /// Point index.
    #[default]
    Index,
    /// Frequency in Hertz.
    Hz,
    /// Chemical shift in ppm.
    Ppm,
}

impl Scale {
    /// Unit label for axis titles and CSV headers.
    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Hz => "Hz",
            Self::Ppm => "ppm",
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.unit())
    }
}

impl FromStr for Scale {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "index" | "idx" | "points" | "pts" => Ok(Self::Index),
            "hz" => Ok(Self::Hz),
            "ppm" => Ok(Self::Ppm),
            _ => Err(crate::Error::Unsupported(format!("unknown scale '{s}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_from_str() {
        assert_eq!("Hz".parse::<Scale>().unwrap(), Scale::Hz);
        assert_eq!("PPM".parse::<Scale>().unwrap(), Scale::Ppm);
        assert_eq!("index".parse::<Scale>().unwrap(), Scale::Index);
        assert!("seconds".parse::<Scale>().is_err());
    }
}
