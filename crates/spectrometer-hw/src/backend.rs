//! Acquisition backends: the MaRCoS hardware and a simulator.

use std::f64::consts::TAU;

use async_trait::async_trait;
use serde_json::{Map, Value};
use spectrometer_core::Complex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{HwError, Result};
use crate::marcos::{MarcosClient, Status};
use crate::plan::ExperimentPlan;

/// Samples received for one sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    /// Down-converted samples of all recording windows, back to back.
    pub data: Vec<Complex>,
    /// Messages reported while running.
    pub status: Status,
}

/// Something that can execute an [`ExperimentPlan`].
#[async_trait]
pub trait AcquisitionBackend: Send + std::fmt::Debug {
    /// Run the plan and return the received samples.
    async fn run(&mut self, plan: &ExperimentPlan) -> Result<Acquisition>;

    /// Release the underlying connection.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Runs plans on a MaRCoS server.
#[derive(Debug)]
pub struct MarcosBackend<S = TcpStream> {
    client: MarcosClient<S>,
    fpga_clock_hz: f64,
}

impl<S> MarcosBackend<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(client: MarcosClient<S>, fpga_clock_hz: f64) -> Self {
        Self {
            client,
            fpga_clock_hz,
        }
    }
}

#[async_trait]
impl<S> AcquisitionBackend for MarcosBackend<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + std::fmt::Debug,
{
    async fn run(&mut self, plan: &ExperimentPlan) -> Result<Acquisition> {
        let clock_plan = plan.clock_plan(self.fpga_clock_hz)?;
        let mut commands = Map::new();
        commands.insert(
            "run_seq".to_string(),
            serde_json::to_value(&clock_plan)
                .map_err(|e| HwError::Protocol(format!("cannot encode sequence: {e}")))?,
        );

        log::info!("Executing experiment...");
        let reply = self.client.command_tolerant(commands).await?;
        log::info!("Finished experiment run.");

        let rx = reply.results.get("run_seq").unwrap_or(&reply.results);
        let has_rx = rx.get("rx0_i").is_some() || rx.get("rx0_q").is_some();
        if !has_rx && !reply.status.is_ok() {
            return Err(HwError::Server {
                errors: reply.status.errors,
            });
        }
        let i = samples(rx, "rx0_i")?;
        let q = samples(rx, "rx0_q")?;
        if i.len() != q.len() {
            return Err(HwError::Protocol(format!(
                "rx0_i has {} samples but rx0_q has {}",
                i.len(),
                q.len()
            )));
        }
        if i.len() != clock_plan.expected_samples {
            log::warn!(
                "Received {} samples, expected {}",
                i.len(),
                clock_plan.expected_samples
            );
        }

        Ok(Acquisition {
            data: i.into_iter().zip(q).map(|(re, im)| Complex::new(re, im)).collect(),
            status: reply.status,
        })
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.client.close().await
    }
}

fn samples(results: &Value, key: &str) -> Result<Vec<f64>> {
    results
        .get(key)
        .ok_or_else(|| HwError::Protocol(format!("reply contains no {key}")))?
        .as_array()
        .ok_or_else(|| HwError::Protocol(format!("{key} is not a list")))?
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| HwError::Protocol(format!("{key} contains a non-number")))
        })
        .collect()
}

/// Parameters of the simulated sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationParameters {
    /// Offset of the resonance from the receiver frequency in Hz.
    pub offset_hz: f64,
    /// Nutation frequency at full power in Hz.
    pub rabi_freq_hz: f64,
    /// Decay of the FID caused by field inhomogeneity, in s.
    pub t2_star_s: f64,
    /// Irreversible transverse relaxation, in s.
    pub t2_s: f64,
    /// Longitudinal relaxation, in s.
    pub t1_s: f64,
    /// Signal of a fully flipped magnetisation.
    pub amplitude: f64,
    /// Standard deviation of the added noise per channel.
    pub noise: f64,
    pub seed: u64,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            offset_hz: 2e3,
            // 90° after 25 µs at full power
            rabi_freq_hz: 10e3,
            t2_star_s: 1.5e-3,
            t2_s: 50e-3,
            t1_s: 1.0,
            amplitude: 1.0,
            noise: 0.0,
            seed: 0x5eed,
        }
    }
}

/// Number of isochromats the inhomogeneous line is split into.
const ISOCHROMATS: usize = 256;

/// Bloch equation toy model of a single resonance.
///
/// The line is split into isochromats whose offsets follow a Cauchy
/// distribution of width `1/(π T2*)`, so the free induction decays with
/// T2* while a refocusing pulse still forms an echo. Pulses are hard
/// rotations. The magnetisation relaxes back to equilibrium between runs.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    params: SimulationParameters,
    offsets_hz: Vec<f64>,
    rng: XorShift,
}

impl SimulatedBackend {
    pub fn new(params: SimulationParameters) -> Self {
        let half_width = 1.0 / (TAU * params.t2_star_s);
        let offsets_hz = (0..ISOCHROMATS)
            .map(|k| {
                let quantile = (k as f64 + 0.5) / ISOCHROMATS as f64;
                params.offset_hz + half_width * (std::f64::consts::PI * (quantile - 0.5)).tan()
            })
            .collect();
        Self {
            params,
            offsets_hz,
            rng: XorShift::new(params.seed),
        }
    }

    pub fn parameters(&self) -> &SimulationParameters {
        &self.params
    }

    fn simulate(&mut self, plan: &ExperimentPlan) -> Vec<Complex> {
        let mut sample = Bloch::new(&self.params, &self.offsets_hz);
        let mut windows = plan.record_windows().into_iter().peekable();
        let mut data = Vec::with_capacity(plan.expected_samples());

        for (start, end, level) in plan.pulses() {
            while let Some((rec_start, rec_end)) = windows.next_if(|(s, _)| *s < start) {
                sample.record(&mut data, rec_start, rec_end, plan.rx_t_us);
            }
            sample.evolve_to(start);
            sample.pulse(level, end);
        }
        for (rec_start, rec_end) in windows {
            sample.record(&mut data, rec_start, rec_end, plan.rx_t_us);
        }

        let scale = self.params.amplitude / ISOCHROMATS as f64;
        let noise = self.params.noise;
        data.into_iter()
            .map(|c| c * scale + Complex::new(self.rng.gaussian(), self.rng.gaussian()) * noise)
            .collect()
    }
}

/// Magnetisation of all isochromats during one run.
struct Bloch<'a> {
    params: &'a SimulationParameters,
    offsets_hz: &'a [f64],
    spins: Vec<[f64; 3]>,
    now_us: f64,
}

impl<'a> Bloch<'a> {
    fn new(params: &'a SimulationParameters, offsets_hz: &'a [f64]) -> Self {
        Self {
            params,
            offsets_hz,
            spins: vec![[0.0, 0.0, 1.0]; offsets_hz.len()],
            now_us: 0.0,
        }
    }

    /// Free precession and relaxation up to `to_us`.
    fn evolve_to(&mut self, to_us: f64) {
        let dt = (to_us - self.now_us) * 1e-6;
        if dt <= 0.0 {
            return;
        }
        let decay = (-dt / self.params.t2_s).exp();
        let recovery = (-dt / self.params.t1_s).exp();
        for (m, offset) in self.spins.iter_mut().zip(self.offsets_hz) {
            let transverse = Complex::new(m[0], m[1]) * Complex::cis(TAU * offset * dt) * decay;
            m[0] = transverse.re;
            m[1] = transverse.im;
            m[2] = 1.0 - (1.0 - m[2]) * recovery;
        }
        self.now_us = to_us;
    }

    /// Hard pulse from now until `end_us`.
    fn pulse(&mut self, level: Complex, end_us: f64) {
        let angle = TAU * self.params.rabi_freq_hz * level.norm() * (end_us - self.now_us) * 1e-6;
        let phase = level.arg();
        for m in &mut self.spins {
            *m = rotate(*m, phase, angle);
        }
        self.now_us = end_us;
    }

    fn record(&mut self, data: &mut Vec<Complex>, start_us: f64, end_us: f64, dwell_us: f64) {
        let count = ((end_us - start_us) / dwell_us).round() as usize;
        for j in 0..count {
            self.evolve_to(start_us + j as f64 * dwell_us);
            data.push(self.spins.iter().map(|m| Complex::new(m[0], m[1])).sum());
        }
    }
}

/// Rotate `m` by `angle` about the transverse axis at `phase`.
fn rotate(m: [f64; 3], phase: f64, angle: f64) -> [f64; 3] {
    let (ux, uy) = (phase.cos(), phase.sin());
    let (s, c) = angle.sin_cos();
    let dot = ux * m[0] + uy * m[1];
    // Rodrigues' formula with u = (ux, uy, 0)
    let cross = [uy * m[2], -ux * m[2], ux * m[1] - uy * m[0]];
    [
        m[0] * c + cross[0] * s + ux * dot * (1.0 - c),
        m[1] * c + cross[1] * s + uy * dot * (1.0 - c),
        m[2] * c + cross[2] * s,
    ]
}

#[async_trait]
impl AcquisitionBackend for SimulatedBackend {
    async fn run(&mut self, plan: &ExperimentPlan) -> Result<Acquisition> {
        let data = self.simulate(plan);
        log::debug!("Simulated {} samples", data.len());
        Ok(Acquisition {
            data,
            status: Status::default(),
        })
    }
}

/// Deterministic xorshift64* generator for reproducible noise.
#[derive(Debug, Clone)]
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_f64(&mut self) -> f64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        let bits = self.0.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 11;
        (bits as f64 + 0.5) / (1u64 << 53) as f64
    }

    /// Standard normal sample (Box-Muller).
    fn gaussian(&mut self) -> f64 {
        let (u1, u2) = (self.next_f64(), self.next_f64());
        (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
    }
}
