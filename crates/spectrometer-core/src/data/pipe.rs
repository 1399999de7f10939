//! Minimal NMRPipe reader and writer for 1D complex time-domain data.
//!
//! An NMRPipe file is a header of 512 `f32` values followed by the data.
//! Text fields are stored as raw bytes inside the float array. For complex
//! 1D data the data block holds all real parts followed by all imaginary
//! parts.

use std::fs;
use std::path::Path;

use crate::complex::Complex;
use crate::error::{Error, Result};

pub const HEADER_FLOATS: usize = 512;
const HEADER_BYTES: usize = HEADER_FLOATS * 4;

/// Value stored in `FDFLTORDER`; used to detect the byte order of a file.
pub const FLOAT_ORDER_MARKER: f32 = 2.345;
/// Raw bytes of `FDFLTFORMAT` (IEEE floats).
const FLOAT_FORMAT_BYTES: [u8; 4] = [0xef, 0xee, 0x6e, 0x4f];

/// Header field offsets, in floats.
pub mod field {
    pub const MAGIC: usize = 0;
    pub const FLTFORMAT: usize = 1;
    pub const FLTORDER: usize = 2;
    pub const DIMCOUNT: usize = 9;
    pub const F2LABEL: usize = 16;
    pub const DIMORDER: usize = 24;
    pub const F2QUADFLAG: usize = 56;
    pub const PIPEFLAG: usize = 57;
    pub const F2AQSIGN: usize = 64;
    pub const F2CAR: usize = 66;
    pub const F2CENTER: usize = 79;
    pub const F2APOD: usize = 95;
    pub const F2FTSIZE: usize = 96;
    pub const REALSIZE: usize = 97;
    pub const SIZE: usize = 99;
    pub const F2SW: usize = 100;
    pub const F2ORIG: usize = 101;
    pub const QUADFLAG: usize = 106;
    pub const F2ZF: usize = 108;
    pub const F2P0: usize = 109;
    pub const F2P1: usize = 110;
    pub const F2OBS: usize = 119;
    pub const F2UNITS: usize = 152;
    pub const SPECNUM: usize = 219;
    pub const F2FTFLAG: usize = 220;
    pub const TRANSPOSED: usize = 221;
    pub const TWO_D_PHASE: usize = 256;
    pub const HOURS: usize = 283;
    pub const MINS: usize = 284;
    pub const SECS: usize = 285;
    pub const MONTH: usize = 294;
    pub const DAY: usize = 295;
    pub const YEAR: usize = 296;
    pub const TITLE: usize = 297;
    pub const COMMENT: usize = 312;
    pub const F2TDSIZE: usize = 386;
    pub const FILECOUNT: usize = 442;
    pub const OPERNAME: usize = 464;
}

/// Widths of the text fields, in bytes.
pub const LABEL_LEN: usize = 8;
pub const TITLE_LEN: usize = 60;
pub const COMMENT_LEN: usize = 160;
pub const OPERNAME_LEN: usize = 32;

/// NMRPipe file header.
#[derive(Clone, PartialEq, Eq)]
pub struct PipeHeader {
    raw: Vec<u8>,
    big_endian: bool,
}

impl std::fmt::Debug for PipeHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeHeader")
            .field("big_endian", &self.big_endian)
            .field("size", &self.get(field::SIZE))
            .field("dimcount", &self.get(field::DIMCOUNT))
            .finish_non_exhaustive()
    }
}

impl Default for PipeHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeHeader {
    /// Empty little-endian header for 1D complex time-domain data.
    #[must_use]
    pub fn new() -> Self {
        let mut header = Self {
            raw: vec![0; HEADER_BYTES],
            big_endian: false,
        };
        header.raw[field::FLTFORMAT * 4..field::FLTFORMAT * 4 + 4]
            .copy_from_slice(&FLOAT_FORMAT_BYTES);
        header.set(field::FLTORDER, FLOAT_ORDER_MARKER);
        header.set(field::DIMCOUNT, 1.0);
        for (i, axis) in [2.0, 1.0, 3.0, 4.0].into_iter().enumerate() {
            header.set(field::DIMORDER + i, axis);
        }
        header.set(field::SPECNUM, 1.0);
        header.set(field::FILECOUNT, 1.0);
        header.set(field::QUADFLAG, 0.0);
        header.set(field::F2QUADFLAG, 0.0);
        header.set(field::F2AQSIGN, 0.0);
        header
    }

    /// Parse a header, detecting the byte order from `FDFLTORDER`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(Error::InvalidData(format!(
                "NMRPipe header needs {HEADER_BYTES} bytes, file has {}",
                bytes.len()
            )));
        }
        let raw = bytes[..HEADER_BYTES].to_vec();
        let order_bytes = [
            raw[field::FLTORDER * 4],
            raw[field::FLTORDER * 4 + 1],
            raw[field::FLTORDER * 4 + 2],
            raw[field::FLTORDER * 4 + 3],
        ];
        let big_endian = if is_marker(f32::from_le_bytes(order_bytes)) {
            false
        } else if is_marker(f32::from_be_bytes(order_bytes)) {
            true
        } else {
            return Err(Error::InvalidData(
                "not an NMRPipe file (byte order marker missing)".to_string(),
            ));
        };
        Ok(Self { raw, big_endian })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    #[must_use]
    pub fn is_big_endian(&self) -> bool {
        self.big_endian
    }

    #[must_use]
    pub fn get(&self, index: usize) -> f32 {
        let b = &self.raw[index * 4..index * 4 + 4];
        let bytes = [b[0], b[1], b[2], b[3]];
        if self.big_endian {
            f32::from_be_bytes(bytes)
        } else {
            f32::from_le_bytes(bytes)
        }
    }

    pub fn set(&mut self, index: usize, value: f32) {
        let bytes = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.raw[index * 4..index * 4 + 4].copy_from_slice(&bytes);
    }

    /// Text field starting at float `index`, `len` bytes wide.
    #[must_use]
    pub fn get_str(&self, index: usize, len: usize) -> String {
        let bytes = &self.raw[index * 4..index * 4 + len];
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(len);
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// Store `value` in a text field, truncated to `len` bytes and padded
    /// with NULs.
    pub fn set_str(&mut self, index: usize, len: usize, value: &str) {
        let slot = &mut self.raw[index * 4..index * 4 + len];
        slot.fill(0);
        let bytes = value.as_bytes();
        let n = bytes.len().min(len);
        slot[..n].copy_from_slice(&bytes[..n]);
    }

    fn get_usize(&self, index: usize) -> usize {
        let value = self.get(index);
        if value <= 0.0 {
            0
        } else {
            value.round() as usize
        }
    }
}

fn is_marker(value: f32) -> bool {
    (value - FLOAT_ORDER_MARKER).abs() < 1e-3
}

/// Read a 1D complex NMRPipe file.
pub fn read(path: impl AsRef<Path>) -> Result<(PipeHeader, Vec<Complex>)> {
    let bytes = fs::read(path.as_ref())?;
    decode(&bytes)
}

/// Decode a complete NMRPipe file from memory.
pub fn decode(bytes: &[u8]) -> Result<(PipeHeader, Vec<Complex>)> {
    let header = PipeHeader::from_bytes(bytes)?;
    if header.get_usize(field::DIMCOUNT) != 1 {
        return Err(Error::Unsupported("Only 1D FIDs supported!".to_string()));
    }
    if header.get(field::QUADFLAG) != 0.0 {
        return Err(Error::Unsupported(
            "Only complex NMRPipe data is supported".to_string(),
        ));
    }

    let size = header.get_usize(field::SIZE);
    let body = &bytes[HEADER_BYTES..];
    let expected = size.checked_mul(2 * 4);
    if expected != Some(body.len()) {
        return Err(Error::InvalidData(format!(
            "header announces {size} complex points but file holds {} bytes",
            body.len()
        )));
    }

    let floats: Vec<f32> = body
        .chunks_exact(4)
        .map(|c| {
            let b = [c[0], c[1], c[2], c[3]];
            if header.big_endian {
                f32::from_be_bytes(b)
            } else {
                f32::from_le_bytes(b)
            }
        })
        .collect();
    let (re, im) = floats.split_at(size);
    let data = re
        .iter()
        .zip(im)
        .map(|(r, i)| Complex::new(f64::from(*r), f64::from(*i)))
        .collect();
    Ok((header, data))
}

/// Encode a header and complex data as an NMRPipe file. The header's
/// byte order is kept.
#[must_use]
pub fn encode(header: &PipeHeader, data: &[Complex]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_BYTES + data.len() * 8);
    out.extend_from_slice(header.as_bytes());
    let parts = data
        .iter()
        .map(|c| c.re as f32)
        .chain(data.iter().map(|c| c.im as f32));
    for value in parts {
        if header.big_endian {
            out.extend_from_slice(&value.to_be_bytes());
        } else {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Write a 1D complex NMRPipe file, replacing any existing file.
pub fn write(path: impl AsRef<Path>, header: &PipeHeader, data: &[Complex]) -> Result<()> {
    fs::write(path.as_ref(), encode(header, data))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_header_markers() {
        let header = PipeHeader::new();
        let bytes = header.as_bytes();
        assert_eq!(&bytes[4..8], &FLOAT_FORMAT_BYTES);
        assert!((header.get(field::FLTORDER) - FLOAT_ORDER_MARKER).abs() < 1e-6);
        assert_eq!(header.get(field::DIMORDER), 2.0);
        assert_eq!(header.get(field::DIMORDER + 1), 1.0);
    }

    #[test]
    fn test_strings_truncate_and_pad() {
        let mut header = PipeHeader::new();
        header.set_str(field::F2LABEL, LABEL_LEN, "1H");
        assert_eq!(header.get_str(field::F2LABEL, LABEL_LEN), "1H");
        header.set_str(field::F2LABEL, LABEL_LEN, "abcdefghijk");
        assert_eq!(header.get_str(field::F2LABEL, LABEL_LEN), "abcdefgh");
        header.set_str(field::F2LABEL, LABEL_LEN, "");
        assert_eq!(header.get_str(field::F2LABEL, LABEL_LEN), "");
    }

    #[test]
    fn test_encode_layout_reals_then_imaginaries() {
        let mut header = PipeHeader::new();
        header.set(field::SIZE, 2.0);
        let data = [Complex::new(1.0, 3.0), Complex::new(2.0, 4.0)];
        let bytes = encode(&header, &data);
        let body: Vec<f32> = bytes[HEADER_BYTES..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(body, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_decode_big_endian() {
        let mut header = PipeHeader::new();
        header.big_endian = true;
        // re-store every set field in big-endian order
        header.set(field::FLTORDER, FLOAT_ORDER_MARKER);
        header.set(field::DIMCOUNT, 1.0);
        header.set(field::SIZE, 1.0);
        let bytes = encode(&header, &[Complex::new(0.5, -0.25)]);
        let (parsed, data) = decode(&bytes).unwrap();
        assert!(parsed.is_big_endian());
        assert_eq!(data, vec![Complex::new(0.5, -0.25)]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(&[0u8; 16]).is_err());
        assert!(decode(&vec![0u8; HEADER_BYTES]).is_err());
    }

    #[test]
    fn test_decode_rejects_size_mismatch() {
        let mut header = PipeHeader::new();
        header.set(field::SIZE, 4.0);
        let bytes = encode(&header, &[Complex::ONE]);
        assert!(matches!(decode(&bytes), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_decode_rejects_absurd_size() {
        let mut header = PipeHeader::new();
        header.set(field::SIZE, 1e30);
        let bytes = encode(&header, &[Complex::ONE]);
        assert!(matches!(decode(&bytes), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_decode_rejects_2d() {
        let mut header = PipeHeader::new();
        header.set(field::DIMCOUNT, 2.0);
        let bytes = encode(&header, &[]);
        assert!(matches!(decode(&bytes), Err(Error::Unsupported(_))));
    }
}
