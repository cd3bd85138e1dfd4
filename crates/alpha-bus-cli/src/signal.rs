use std::f32::consts::TAU;

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const AMPLITUDE: f32 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SignalKind {
    Sine,
    Noise,
}

/// Test signal source for `alpha-bus send`.
pub struct SignalGenerator {
    kind: SignalKind,
    phase: f32,
    step: f32,
    rng: StdRng,
}

impl SignalGenerator {
    pub fn new(kind: SignalKind, frequency: f32, sample_rate: u32) -> Self {
        Self {
            kind,
            phase: 0.0,
            step: frequency / sample_rate as f32,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn fill(&mut self, block: &mut [f32]) {
        match self.kind {
            SignalKind::Sine => {
                for sample in block {
                    *sample = (self.phase * TAU).sin() * AMPLITUDE;
                    self.phase = (self.phase + self.step).fract();
                }
            }
            SignalKind::Noise => {
                for sample in block {
                    *sample = self.rng.gen_range(-AMPLITUDE..=AMPLITUDE);
                }
            }
        }
    }
}

/// Peak and RMS accumulator for `alpha-bus monitor`.
#[derive(Debug, Default)]
pub struct Meter {
    peak: f32,
    sum_squares: f64,
    samples: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub peak: f32,
    pub rms: f32,
}

impl Reading {
    pub fn peak_dbfs(&self) -> f32 {
        to_dbfs(self.peak)
    }

    pub fn rms_dbfs(&self) -> f32 {
        to_dbfs(self.rms)
    }
}

impl Meter {
    pub fn push(&mut self, block: &[f32]) {
        for sample in block {
            self.peak = self.peak.max(sample.abs());
            self.sum_squares += f64::from(*sample) * f64::from(*sample);
        }
        self.samples += block.len() as u64;
    }

    /// Returns the reading since the previous call and starts a new window.
    pub fn take(&mut self) -> Reading {
        let rms = if self.samples == 0 {
            0.0
        } else {
            (self.sum_squares / self.samples as f64).sqrt() as f32
        };
        let reading = Reading {
            peak: self.peak,
            rms,
        };
        *self = Self::default();
        reading
    }
}

fn to_dbfs(value: f32) -> f32 {
    20.0 * value.max(1.0e-9).log10()
}
