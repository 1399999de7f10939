//! Channel plans for the MaRCoS sequencer.
//!
//! An [`ExperimentPlan`] lists, per output channel, the times (µs) at which
//! the channel changes and the value it changes to: the RF output `tx0`,
//! the transmit gate of the power amplifier, the receiver enable `rx0_en`
//! and the receive gate of the T/R switch. A [`ClockPlan`] is the same
//! plan expressed in FPGA clock cycles and DAC codes, ready to be sent to
//! the server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use spectrometer_core::{Complex, NmrSequence};

use crate::error::{HwError, Result};

/// All sequence times are moved this far into the future so the gates
/// have time to switch before the first event.
pub const TIME_OFFSET_US: f64 = 10.0;

/// The transmit gate opens this long before a pulse and closes this long
/// after it.
pub const GATE_MARGIN_US: f64 = 1.0;

/// Decimation stage of the receiver the CIC filter is taken from.
pub const RX_LO: u8 = 2;

/// Full scale of the 16 bit DAC.
const DAC_FULL_SCALE: f64 = 32767.0;

/// Events on a single channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Channel<T> {
    pub times_us: Vec<f64>,
    pub values: Vec<T>,
}

impl<T> Channel<T> {
    fn new(times_us: Vec<f64>, values: Vec<T>) -> Self {
        Self { times_us, values }
    }

    pub fn len(&self) -> usize {
        self.times_us.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_us.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &T)> {
        self.times_us.iter().copied().zip(self.values.iter())
    }
}

impl Channel<bool> {
    /// Gate that switches on at every even and off at every odd timestamp.
    fn alternating(times_us: Vec<f64>) -> Self {
        let values = (0..times_us.len()).map(|i| i % 2 == 0).collect();
        Self::new(times_us, values)
    }
}

/// Everything the sequencer needs to run one pulse sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentPlan {
    /// Local oscillator frequencies of tx0, tx1 and the receiver in MHz.
    pub lo_freq_mhz: [f64; 3],
    pub rx_lo: u8,
    /// Dwell time of the receiver in µs.
    pub rx_t_us: f64,
    pub tx0: Channel<Complex>,
    pub tx_gate: Channel<bool>,
    pub rx0_en: Channel<bool>,
    pub rx_gate: Channel<bool>,
}

impl ExperimentPlan {
    /// Lay out `sequence` on the output channels.
    pub fn new(
        sequence: &NmrSequence,
        tx_freq_hz: f64,
        rx_freq_hz: f64,
        sample_rate_hz: f64,
    ) -> Self {
        let shift =
            |times: &[f64]| -> Vec<f64> { times.iter().map(|t| t + TIME_OFFSET_US).collect() };

        let tx0 = Channel::new(shift(sequence.tx_times_us()), sequence.tx_values().to_vec());

        let (starts, ends): (Vec<f64>, Vec<f64>) = sequence
            .pulse_edges()
            .into_iter()
            .map(|(start, end)| {
                (
                    start + TIME_OFFSET_US - GATE_MARGIN_US,
                    end + TIME_OFFSET_US + GATE_MARGIN_US,
                )
            })
            .unzip();
        let gate_times = merge_ranges(starts, ends)
            .into_iter()
            .flat_map(|(on, off)| [on, off])
            .collect();

        let rx_times = shift(sequence.rx_times_us());

        Self {
            lo_freq_mhz: [tx_freq_hz / 1e6, tx_freq_hz / 1e6, rx_freq_hz / 1e6],
            rx_lo: RX_LO,
            rx_t_us: 1e6 / sample_rate_hz,
            tx0,
            tx_gate: Channel::alternating(gate_times),
            rx0_en: Channel::alternating(rx_times.clone()),
            rx_gate: Channel::alternating(rx_times),
        }
    }

    /// Sample rate of the receiver in Hz.
    pub fn sample_rate_hz(&self) -> f64 {
        1e6 / self.rx_t_us
    }

    /// Recording windows as `(start, end)` in µs.
    pub fn record_windows(&self) -> Vec<(f64, f64)> {
        self.rx0_en
            .times_us
            .chunks_exact(2)
            .map(|w| (w[0], w[1]))
            .collect()
    }

    /// Pulses as `(start, end, value)` in µs.
    pub fn pulses(&self) -> Vec<(f64, f64, Complex)> {
        let mut pulses = Vec::new();
        let mut open: Option<(f64, Complex)> = None;
        for (t, value) in self.tx0.iter() {
            if let Some((start, level)) = open.take() {
                if t > start {
                    pulses.push((start, t, level));
                }
            }
            if !value.is_zero() {
                open = Some((t, *value));
            }
        }
        pulses
    }

    /// Number of samples the receiver delivers for this plan.
    pub fn expected_samples(&self) -> usize {
        self.record_windows()
            .iter()
            .map(|(start, end)| ((end - start) / self.rx_t_us).round() as usize)
            .sum()
    }

    /// Convert the plan to clock cycles of an FPGA running at
    /// `fpga_clock_hz`.
    ///
    /// # Errors
    /// Returns [`HwError::InvalidSettings`] if the dwell time is not an
    /// integer number of clock cycles.
    pub fn clock_plan(&self, fpga_clock_hz: f64) -> Result<ClockPlan> {
        let cycles_per_us = fpga_clock_hz / 1e6;
        let rx_divider = self.rx_t_us * cycles_per_us;
        if (rx_divider - rx_divider.round()).abs() > 1e-6 || rx_divider < 1.0 {
            return Err(HwError::InvalidSettings(format!(
                "dwell time of {} us is not a multiple of the FPGA clock period",
                self.rx_t_us
            )));
        }
        let to_cycles = |t: f64| (t * cycles_per_us).round() as u64;

        let mut channels = BTreeMap::new();
        let tx_cycles: Vec<u64> = self.tx0.times_us.iter().map(|t| to_cycles(*t)).collect();
        channels.insert(
            "tx0_i".to_string(),
            ClockChannel {
                cycles: tx_cycles.clone(),
                values: self.tx0.values.iter().map(|v| dac_code(v.re)).collect(),
            },
        );
        channels.insert(
            "tx0_q".to_string(),
            ClockChannel {
                cycles: tx_cycles,
                values: self.tx0.values.iter().map(|v| dac_code(v.im)).collect(),
            },
        );
        for (name, gate) in [
            ("tx_gate", &self.tx_gate),
            ("rx0_en", &self.rx0_en),
            ("rx_gate", &self.rx_gate),
        ] {
            channels.insert(
                name.to_string(),
                ClockChannel {
                    cycles: gate.times_us.iter().map(|t| to_cycles(*t)).collect(),
                    values: gate.values.iter().map(|v| i32::from(*v)).collect(),
                },
            );
        }

        Ok(ClockPlan {
            lo_freq_mhz: self.lo_freq_mhz,
            rx_lo: self.rx_lo,
            rx_divider: rx_divider.round() as u32,
            expected_samples: self.expected_samples(),
            channels,
        })
    }
}

/// An [`ExperimentPlan`] in FPGA clock cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockPlan {
    pub lo_freq_mhz: [f64; 3],
    pub rx_lo: u8,
    /// Clock cycles per received sample.
    pub rx_divider: u32,
    pub expected_samples: usize,
    pub channels: BTreeMap<String, ClockChannel>,
}

/// One channel of a [`ClockPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockChannel {
    pub cycles: Vec<u64>,
    pub values: Vec<i32>,
}

fn dac_code(value: f64) -> i32 {
    (value * DAC_FULL_SCALE)
        .round()
        .clamp(-DAC_FULL_SCALE, DAC_FULL_SCALE) as i32
}

/// Merge `[start, end]` ranges that overlap or touch.
fn merge_ranges(mut starts: Vec<f64>, mut ends: Vec<f64>) -> Vec<(f64, f64)> {
    starts.sort_by(f64::total_cmp);
    ends.sort_by(f64::total_cmp);
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(starts.len());
    for (start, end) in starts.into_iter().zip(ends) {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}
