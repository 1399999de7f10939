//! Core domain for the magnETHical low-field NMR spectrometer.
//!
//! This crate describes NMR pulse sequences, holds acquired Free Induction
//! Decay (FID) data and its spectra, reads and writes NMRPipe files and
//! implements the processing chain (zero fill, Fourier transform, phase
//! correction, peak picking and curve fitting) used to evaluate
//! measurements. It performs no network or hardware I/O.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod analysis;
pub mod complex;
pub mod data;
pub mod error;
pub mod fft;
pub mod process;
pub mod sequence;
pub mod units;

pub use complex::Complex;
pub use data::{
    Algorithm, Fid1d, FidMetadata, Lineshape, Peak, PeakOptions, PhaseCorrection, Scale,
    Spectrum1d, SpectrumOptions,
};
pub use error::{Error, Result};
pub use process::ZeroFill;
pub use sequence::{Delay, Event, NmrSequence, Pulse, Record};
