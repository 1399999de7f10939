//! NMR pulse sequences.
//!
//! An [`NmrSequence`] is two event tables: the transmit table holds the
//! timestamps (µs) at which the RF output changes together with the complex
//! power level it changes to (magnitude = power between 0 and 1, argument =
//! phase), the receive table holds alternating start/stop timestamps of
//! recording windows.
//!
//! Sequences can be written directly as tables, assembled from a list of
//! [`Event`]s with [`NmrSequence::build`], or created from the
//! [`simple`](NmrSequence::simple) and [`spin_echo`](NmrSequence::spin_echo)
//! templates.

use std::f64::consts::TAU;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::complex::{all_close, Complex};
use crate::error::{Error, Result};

/// Minimum guard time between transmitting and receiving, in µs.
pub const TX_RX_GUARD_US: f64 = 1.0;

const RTOL: f64 = 1e-5;
const ATOL: f64 = 1e-8;

/// A single RF pulse with power, duration and phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    pub duration_us: f64,
    pub power: f64,
    pub phase_rad: f64,
}

impl Pulse {
    /// Full power pulse with zero phase.
    pub fn new(duration_us: f64) -> Result<Self> {
        Self::with_power(duration_us, 1.0, 0.0)
    }

    pub fn with_power(duration_us: f64, power: f64, phase_rad: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&power) {
            return Err(Error::InvalidSequence(
                "Power must be from 0 to 1".to_string(),
            ));
        }
        if duration_us < 0.0 {
            return Err(Error::InvalidSequence(
                "Pulse durations can only be positive".to_string(),
            ));
        }
        Ok(Self {
            duration_us,
            power,
            phase_rad: phase_rad.rem_euclid(TAU),
        })
    }

    /// Power and phase as one complex number.
    #[must_use]
    pub fn complex(&self) -> Complex {
        Complex::from_polar(self.power, self.phase_rad)
    }
}

/// A wait period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delay {
    pub duration_us: f64,
}

impl Delay {
    pub fn new(duration_us: f64) -> Result<Self> {
        if duration_us < 0.0 {
            return Err(Error::InvalidSequence(
                "Delay durations can only be positive".to_string(),
            ));
        }
        Ok(Self { duration_us })
    }
}

/// A recording window. Only describes when to record, holds no data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub duration_us: f64,
}

impl Record {
    pub fn new(duration_us: f64) -> Result<Self> {
        if duration_us < 0.0 {
            return Err(Error::InvalidSequence(
                "Record durations can only be positive".to_string(),
            ));
        }
        Ok(Self { duration_us })
    }
}

/// One step of a sequence for [`NmrSequence::build`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Pulse(Pulse),
    Delay(Delay),
    Record(Record),
}

impl From<Pulse> for Event {
    fn from(p: Pulse) -> Self {
        Self::Pulse(p)
    }
}

impl From<Delay> for Event {
    fn from(d: Delay) -> Self {
        Self::Delay(d)
    }
}

impl From<Record> for Event {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

/// A validated pulse sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NmrSequence {
    tx_times_us: Vec<f64>,
    tx_values: Vec<Complex>,
    rx_times_us: Vec<f64>,
}

impl NmrSequence {
    /// Create a sequence from its transmit and receive tables.
    ///
    /// To send a single 5 µs pulse use times `[0, 5]` and values `[1, 0]`:
    /// full power at 0 µs, off at 5 µs. Values may repeat, e.g. to insert
    /// an explicit wait by re-sending zero.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSequence`] if the tables are inconsistent, a
    /// pulse never ends, or a pulse comes within 1 µs of a recording window.
    pub fn new(
        tx_times_us: Vec<f64>,
        tx_values: Vec<Complex>,
        rx_times_us: Vec<f64>,
    ) -> Result<Self> {
        if tx_times_us.len() != tx_values.len() {
            return Err(Error::InvalidSequence(
                "Event timestamps and power levels must match in length. Every timestamp needs a \
                 corresponding power level to set the output to"
                    .to_string(),
            ));
        }
        if tx_times_us.iter().any(|t| *t < 0.0) {
            return Err(Error::InvalidSequence(format!(
                "The time values of sequence must be positive! Values are {tx_times_us:?}"
            )));
        }
        if !strictly_increasing(&tx_times_us) {
            return Err(Error::InvalidSequence(format!(
                "The time values of sequence must be strictly monotonically increasing! \
                 Values are {tx_times_us:?}"
            )));
        }
        if tx_values.last().is_some_and(|v| !v.is_zero()) {
            return Err(Error::InvalidSequence(
                "The last pulse needs to end! The power of the transmission signal needs to \
                 return to zero in the pulse sequence"
                    .to_string(),
            ));
        }
        if rx_times_us.iter().any(|t| *t < 0.0) {
            return Err(Error::InvalidSequence(format!(
                "The time values of the record sequence must be positive! \
                 Values are {rx_times_us:?}"
            )));
        }
        if !strictly_increasing(&rx_times_us) {
            return Err(Error::InvalidSequence(format!(
                "The time values of the record sequence must be strictly monotonically \
                 increasing! Values are {rx_times_us:?}"
            )));
        }
        if rx_times_us.len() % 2 != 0 {
            return Err(Error::InvalidSequence(format!(
                "The recording needs to end, thus the recording sequence needs to have an even \
                 number of elements! Values are {rx_times_us:?}"
            )));
        }

        let sequence = Self {
            tx_times_us,
            tx_values,
            rx_times_us,
        };

        let overlap = sequence.pulse_edges().iter().any(|(start, end)| {
            sequence.record_windows().iter().any(|(rec_start, rec_end)| {
                *start < rec_end + TX_RX_GUARD_US && end + TX_RX_GUARD_US > *rec_start
            })
        });
        if overlap {
            return Err(Error::InvalidSequence(
                "Can't receive and transmit simultaneously! There needs to be a delay of at least \
                 1us between transmit and receive and 1us between receive and transmit"
                    .to_string(),
            ));
        }

        Ok(sequence)
    }

    /// Sequence without any events.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble a sequence from consecutive events.
    pub fn build(events: &[Event]) -> Result<Self> {
        let mut tx_times = Vec::new();
        let mut tx_values = Vec::new();
        let mut rx_times = Vec::new();

        let mut now_us = 0.0;
        for event in events {
            match event {
                Event::Pulse(pulse) => {
                    tx_times.push(now_us);
                    tx_values.push(pulse.complex());
                    now_us += pulse.duration_us;
                    tx_times.push(now_us);
                    tx_values.push(Complex::ZERO);
                }
                Event::Delay(delay) => now_us += delay.duration_us,
                Event::Record(record) => {
                    rx_times.push(now_us);
                    now_us += record.duration_us;
                    rx_times.push(now_us);
                }
            }
        }

        Self::new(tx_times, tx_values, rx_times)
    }

    /// A single pulse, a wait and a recording: a plain FID that decays
    /// with T2*.
    ///
    /// ```text
    ///         < pulse >
    ///         ┌───────┐
    ///         │       │<     delay     ><   record   >
    /// ────────┘       └───────────────────────────────
    /// ```
    pub fn simple(pulse_length_us: f64, delay_us: f64, record_length_us: f64) -> Result<Self> {
        let record_start = pulse_length_us + delay_us;
        Self::new(
            vec![0.0, pulse_length_us],
            vec![Complex::ONE, Complex::ZERO],
            vec![record_start, record_start + record_length_us],
        )
    }

    /// Classic Hahn spin echo: 90° pulse, wait τ, 180° pulse of twice the
    /// length, wait, record.
    ///
    /// ```text
    ///         <  p1  >                 <     p2     >
    ///         ┌──────┐                 ┌────────────┐
    ///         │      │<   delay_tau   >│            │< delay_after_p2 >
    /// ────────┘      └─────────────────┘            └──────────────────
    ///            90°                        180°
    /// ```
    ///
    /// Repeating this with increasing τ and tracking the echo maxima gives
    /// an estimate of T2.
    pub fn spin_echo(
        pulse_length_us: f64,
        delay_tau_us: f64,
        delay_after_p2_us: f64,
        record_length_us: f64,
    ) -> Result<Self> {
        let p90_start = 0.0;
        let p90_end = p90_start + pulse_length_us;
        let p180_start = p90_end + delay_tau_us;
        let p180_end = p180_start + 2.0 * pulse_length_us;
        let record_start = p180_end + delay_after_p2_us;
        Self::new(
            vec![p90_start, p90_end, p180_start, p180_end],
            vec![Complex::ONE, Complex::ZERO, Complex::ONE, Complex::ZERO],
            vec![record_start, record_start + record_length_us],
        )
    }

    #[must_use]
    pub fn tx_times_us(&self) -> &[f64] {
        &self.tx_times_us
    }

    #[must_use]
    pub fn tx_values(&self) -> &[Complex] {
        &self.tx_values
    }

    #[must_use]
    pub fn rx_times_us(&self) -> &[f64] {
        &self.rx_times_us
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tx_times_us.is_empty() && self.rx_times_us.is_empty()
    }

    /// `(start, end)` of every pulse. A pulse starts where the power level
    /// leaves zero and ends where it returns to zero.
    #[must_use]
    pub fn pulse_edges(&self) -> Vec<(f64, f64)> {
        let mut edges = Vec::new();
        let mut previous = Complex::ZERO;
        let mut start = None;
        for (t, value) in self.tx_times_us.iter().zip(&self.tx_values) {
            if previous.is_zero() && !value.is_zero() {
                start = Some(*t);
            } else if !previous.is_zero() && value.is_zero() {
                if let Some(s) = start.take() {
                    edges.push((s, *t));
                }
            }
            previous = *value;
        }
        edges
    }

    /// `(start, end)` of every recording window.
    #[must_use]
    pub fn record_windows(&self) -> Vec<(f64, f64)> {
        self.rx_times_us
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect()
    }

    /// Total recording time in µs.
    #[must_use]
    pub fn record_length_us(&self) -> f64 {
        self.record_windows().iter().map(|(s, e)| e - s).sum()
    }

    /// Time of the last event in µs.
    #[must_use]
    pub fn duration_us(&self) -> f64 {
        let tx_end = self.tx_times_us.last().copied().unwrap_or(0.0);
        let rx_end = self.rx_times_us.last().copied().unwrap_or(0.0);
        tx_end.max(rx_end)
    }
}

impl PartialEq for NmrSequence {
    fn eq(&self, other: &Self) -> bool {
        let as_complex = |v: &[f64]| v.iter().map(|x| Complex::from_real(*x)).collect::<Vec<_>>();
        all_close(
            &as_complex(&self.tx_times_us),
            &as_complex(&other.tx_times_us),
            RTOL,
            ATOL,
        ) && all_close(&self.tx_values, &other.tx_values, RTOL, ATOL)
            && all_close(
                &as_complex(&self.rx_times_us),
                &as_complex(&other.rx_times_us),
                RTOL,
                ATOL,
            )
    }
}

impl fmt::Display for NmrSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TX:")?;
        for (t, v) in self.tx_times_us.iter().zip(&self.tx_values) {
            writeln!(f, "  {t:>10.3} us  power {:.3} phase {:.3} rad", v.norm(), v.arg())?;
        }
        writeln!(f, "RX:")?;
        for (start, end) in self.record_windows() {
            writeln!(f, "  {start:>10.3} us .. {end:.3} us")?;
        }
        Ok(())
    }
}

fn strictly_increasing(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[1] > w[0])
}
