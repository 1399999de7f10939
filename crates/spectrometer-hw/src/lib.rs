//! Hardware side of the magnETHical spectrometer.
//!
//! The spectrometer is a Red Pitaya running the MaRCoS server. This crate
//! loads the configuration, turns pulse sequences into channel plans,
//! speaks the MaRCoS protocol, manages the server over SSH and runs the
//! standard experiments. A [`SimulatedBackend`] stands in for the hardware
//! when none is available.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod backend;
pub mod config;
pub mod error;
pub mod experiment;
pub mod marcos;
pub mod plan;
pub mod server;
pub mod spectrometer;

pub use backend::{AcquisitionBackend, MarcosBackend, SimulatedBackend, SimulationParameters};
pub use config::Config;
pub use error::{HwError, Result};
pub use experiment::{
    FidExperiment, RabiExperiment, RabiRun, RunContext, RunOutput, SpinEchoExperiment,
    T2Experiment, T2Run,
};
pub use marcos::{MarcosClient, ServerKind};
pub use plan::{ClockPlan, ExperimentPlan};
pub use server::{HttpArtifacts, Server, SshShell};
pub use spectrometer::{ConnectionSettings, Spectrometer};
