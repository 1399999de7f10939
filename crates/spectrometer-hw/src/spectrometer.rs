//! A session with the spectrometer.

use std::net::SocketAddr;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use spectrometer_core::{Complex, NmrSequence};

use crate::backend::{AcquisitionBackend, MarcosBackend};
use crate::config::Config;
use crate::error::{HwError, Result};
use crate::marcos::MarcosClient;
use crate::plan::ExperimentPlan;

/// Timeout for connecting and for every command.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECT_ATTEMPTS: usize = 3;

/// Where to find the MaRCoS server and how fast its FPGA runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionSettings {
    pub address: SocketAddr,
    pub fpga_clock_freq_hz: f64,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            address: config.socket_addr()?,
            fpga_clock_freq_hz: config.fpga_clock_freq_hz(),
        })
    }
}

/// Mixing frequencies, sample rate and connection state of one
/// spectrometer.
///
/// Only one session per server can be connected at a time.
#[derive(Debug)]
pub struct Spectrometer {
    tx_freq: f64,
    rx_freq: f64,
    sample_rate: f64,
    settings: ConnectionSettings,
    backend: Option<Box<dyn AcquisitionBackend>>,
}

impl Spectrometer {
    /// Create a session.
    ///
    /// `tx_freq` is the frequency of the transmitted pulses and should be
    /// close to the resonance. `rx_freq` is the down-conversion frequency
    /// and ends up in the centre of the spectrum; `None` uses `tx_freq`.
    /// `sample_rate` is the inverse dwell time after down-conversion.
    ///
    /// # Errors
    /// Returns [`HwError::InvalidSettings`] if the sample rate is not
    /// positive, a frequency is negative, or the FPGA clock is not an
    /// integer multiple of the sample rate.
    pub fn new(
        tx_freq: f64,
        rx_freq: Option<f64>,
        sample_rate: f64,
        settings: ConnectionSettings,
    ) -> Result<Self> {
        let rx_freq = rx_freq.unwrap_or(tx_freq);
        if sample_rate.is_nan() || sample_rate <= 0.0 {
            return Err(HwError::InvalidSettings(format!(
                "The sample_rate must be positive and not zero! {sample_rate}Hz is invalid."
            )));
        }
        if tx_freq < 0.0 || rx_freq < 0.0 {
            return Err(HwError::InvalidSettings(format!(
                "The TX and RX frequencies can't be negative! They were {tx_freq} and \
                 {rx_freq} respectively"
            )));
        }
        let fpga = settings.fpga_clock_freq_hz;
        let ratio = fpga / sample_rate;
        if (ratio - ratio.round()).abs() > 1e-9 * ratio.max(1.0) {
            return Err(HwError::InvalidSettings(format!(
                "Sample time must be an integer multiple of the time between two clock cycles \
                 of the FPGA! A sample rate of {sample_rate}Hz results in a sample time of \
                 {}s. The FPGA frequency of {fpga}Hz results in a FPGA cycle time of {}s. Thus \
                 the next closest multiple would be {}Hz.",
                1.0 / sample_rate,
                1.0 / fpga,
                fpga / ratio.round().max(1.0)
            )));
        }

        Ok(Self {
            tx_freq,
            rx_freq,
            sample_rate,
            settings,
            backend: None,
        })
    }

    pub fn tx_freq(&self) -> f64 {
        self.tx_freq
    }

    pub fn rx_freq(&self) -> f64 {
        self.rx_freq
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_some()
    }

    /// Connect to the MaRCoS server, retrying with exponential back-off.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            log::warn!("Already connected, reconnecting...");
            self.disconnect().await;
        }
        let addr = self.settings.address;
        let client = (|| async { MarcosClient::connect(addr, CONNECT_TIMEOUT).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_times(CONNECT_ATTEMPTS),
            )
            .when(HwError::is_transient)
            .notify(|err, delay| {
                log::warn!("Connecting to {addr} failed ({err}), retrying in {delay:?}");
            })
            .await?;
        self.backend = Some(Box::new(MarcosBackend::new(
            client,
            self.settings.fpga_clock_freq_hz,
        )));
        Ok(())
    }

    /// Run sequences on `backend` instead of a MaRCoS server, e.g. a
    /// [`SimulatedBackend`](crate::backend::SimulatedBackend).
    pub fn attach(&mut self, backend: Box<dyn AcquisitionBackend>) {
        self.backend = Some(backend);
    }

    /// Close the connection. Closing an unconnected session does nothing.
    pub async fn disconnect(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            if let Err(err) = backend.shutdown().await {
                log::info!("Error closing the connection. Maybe it is already closed? ({err})");
            }
        }
    }

    /// Channel plan this session would run for `sequence`.
    pub fn plan(&self, sequence: &NmrSequence) -> ExperimentPlan {
        ExperimentPlan::new(sequence, self.tx_freq, self.rx_freq, self.sample_rate)
    }

    /// Send a sequence and return the received samples.
    ///
    /// # Errors
    /// Returns [`HwError::NotConnected`] if neither `connect()` nor
    /// `attach()` was called.
    pub async fn send_sequence(&mut self, sequence: &NmrSequence) -> Result<Vec<Complex>> {
        let plan = self.plan(sequence);
        let backend = self.backend.as_mut().ok_or(HwError::NotConnected)?;
        log::info!("Setting up experiment...");
        let acquisition = backend.run(&plan).await?;
        log::debug!("Received {} samples", acquisition.data.len());
        Ok(acquisition.data)
    }

    /// Send sequences one after another, waiting `repetition_time` after
    /// each so the sample returns to equilibrium.
    ///
    /// The wait relies on the host's timers and is only accurate to a few
    /// milliseconds; the sequences themselves are timed by the FPGA.
    pub async fn send_sequences(
        &mut self,
        sequences: &[NmrSequence],
        repetition_time: Duration,
    ) -> Result<Vec<Vec<Complex>>> {
        let mut fids = Vec::with_capacity(sequences.len());
        for (i, sequence) in sequences.iter().enumerate() {
            log::info!("Sending sequence {}/{}...", i + 1, sequences.len());
            fids.push(self.send_sequence(sequence).await?);
            log::info!("Sleeping for {repetition_time:?}...");
            tokio::time::sleep(repetition_time).await;
        }
        Ok(fids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimulatedBackend, SimulationParameters};

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            address: "127.0.0.1:11111".parse().unwrap(),
            fpga_clock_freq_hz: 122.88e6,
        }
    }

    #[test]
    fn test_new_validates_settings() {
        assert!(Spectrometer::new(25.09e6, None, 320e3, settings()).is_ok());
        assert!(Spectrometer::new(25.09e6, None, 0.0, settings()).is_err());
        assert!(Spectrometer::new(-1.0, None, 320e3, settings()).is_err());
        assert!(Spectrometer::new(25.09e6, Some(-1.0), 320e3, settings()).is_err());
    }

    #[test]
    fn test_rx_freq_defaults_to_tx_freq() {
        let spec = Spectrometer::new(25.09e6, None, 320e3, settings()).unwrap();
        assert!((spec.rx_freq() - 25.09e6).abs() < 1e-6);
        let spec = Spectrometer::new(25.09e6, Some(25.0e6), 320e3, settings()).unwrap();
        assert!((spec.rx_freq() - 25.0e6).abs() < 1e-6);
    }

    #[test]
    fn test_sample_rate_error_proposes_nearest_rate() {
        let err = Spectrometer::new(25.09e6, None, 300e3, settings()).unwrap_err();
        // 122.88 MHz / round(409.6) = 122.88 MHz / 410
        let nearest = 122.88e6 / 410.0;
        assert!(err.to_string().contains(&format!("{nearest}Hz")), "{err}");
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mut spec = Spectrometer::new(25.09e6, None, 320e3, settings()).unwrap();
        let seq = NmrSequence::simple(8.0, 25.0, 100.0).unwrap();
        assert!(matches!(
            spec.send_sequence(&seq).await,
            Err(HwError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_send_sequences_with_simulator() {
        let mut spec = Spectrometer::new(25.09e6, None, 320e3, settings()).unwrap();
        spec.attach(Box::new(SimulatedBackend::new(SimulationParameters::default())));
        assert!(spec.is_connected());

        let sequences: Vec<NmrSequence> = [10.0, 20.0]
            .iter()
            .map(|p| NmrSequence::simple(*p, 25.0, 1000.0).unwrap())
            .collect();
        let fids = spec
            .send_sequences(&sequences, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(fids.len(), 2);
        assert_eq!(fids[0].len(), 320);
        assert!(fids[1][0].norm() > fids[0][0].norm());

        spec.disconnect().await;
        assert!(!spec.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let mut spec = Spectrometer::new(
            25.09e6,
            None,
            320e3,
            ConnectionSettings {
                address,
                fpga_clock_freq_hz: 122.88e6,
            },
        )
        .unwrap();
        let err = spec.connect().await.unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert!(!spec.is_connected());
    }
}
