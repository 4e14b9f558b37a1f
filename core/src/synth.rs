//! Tone-block synthesis: bit blocks to band-limited PCM bursts.
//!
//! Each block is cut from a seeded pseudo-noise source: the noise is
//! transformed to the frequency domain, every bin outside the "on" channels
//! is zeroed and the on-channel bins are forced to a large constant
//! magnitude (keeping the noise phases), and the inverse transform yields a
//! burst occupying exactly the requested channels. Peak normalization,
//! a linear fade against clicks, clipping and 16-bit quantization finish
//! the block.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::profile::Profile;
use crate::{FADE_FRACTION, MIN_BLOCK_PERIOD_MS, PCM_FULL_SCALE};

/// Seed of the pseudo-noise phase source. Fixed so that rendering is
/// deterministic; only band occupancy matters on the wire.
const NOISE_SEED: u64 = 42;

/// Magnitude the on-channel bins are boosted to.
const BOOST_MAGNITUDE: f64 = 1000.0;

/// Half-width in Hz of the band kept around each on channel.
const CHANNEL_HALF_WIDTH: f64 = 0.5;

/// Window selection for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Payload or sentinel block, one bit period long.
    Data,
    /// Pause block, one pause period long.
    Pause,
}

/// Bit pattern of the start sentinel: lower half off, upper half on.
pub fn start_block_bits(num_frequencies: usize) -> Vec<u8> {
    let mut bits = vec![0u8; num_frequencies];
    for bit in bits.iter_mut().skip(num_frequencies / 2) {
        *bit = 1;
    }
    bits
}

/// Bit pattern of the end sentinel: the start pattern reversed.
pub fn end_block_bits(num_frequencies: usize) -> Vec<u8> {
    let mut bits = vec![1u8; num_frequencies];
    for bit in bits.iter_mut().skip(num_frequencies / 2) {
        *bit = 0;
    }
    bits
}

pub struct ToneBlockSynthesizer {
    profile: Profile,
    planner: FftPlanner<f64>,
}

impl ToneBlockSynthesizer {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            planner: FftPlanner::new(),
        }
    }

    /// Sample count of one block of the given kind: the configured period,
    /// floored at 30 ms when that period is zero, forced even.
    pub fn block_samples(&self, kind: BlockKind) -> usize {
        let mut period_ms = match kind {
            BlockKind::Data => self.profile.bit_period_ms(),
            BlockKind::Pause => self.profile.pause_period_ms(),
        };
        if period_ms == 0 {
            period_ms = MIN_BLOCK_PERIOD_MS;
        }
        let mut samples =
            ((period_ms as f64 * self.profile.sample_rate() as f64) / 1000.0).round() as usize;
        if samples % 2 == 1 {
            samples += 1;
        }
        samples
    }

    /// Renders one bit block as 16-bit PCM.
    ///
    /// A block with no on channel carries no energy and renders as silence
    /// of the window length; this covers pause blocks and the (rare)
    /// all-zero payload block.
    pub fn synthesize_block(&mut self, bits: &[u8], kind: BlockKind) -> Vec<i16> {
        let n = self.block_samples(kind);
        let on_channels: Vec<u32> = bits
            .iter()
            .enumerate()
            .filter(|(_, &bit)| bit == 1)
            .map(|(i, _)| self.profile.frequencies()[i])
            .collect();
        if on_channels.is_empty() {
            return vec![0; n];
        }

        let sample_rate = self.profile.sample_rate() as f64;
        let mut rng = StdRng::seed_from_u64(NOISE_SEED);
        let mut spectrum: Vec<Complex<f64>> = (0..n)
            .map(|_| Complex::new(rng.gen::<f64>(), 0.0))
            .collect();
        self.planner.plan_fft_forward(n).process(&mut spectrum);

        // Keep only the on-channel bands, at constant magnitude with the
        // noise phase; mirror conjugates keep the time signal real.
        let mut shaped = vec![Complex::new(0.0, 0.0); n];
        for &freq in &on_channels {
            let lo = ((freq as f64 - CHANNEL_HALF_WIDTH) * n as f64 / sample_rate).round() as usize;
            let hi = ((freq as f64 + CHANNEL_HALF_WIDTH) * n as f64 / sample_rate).round() as usize;
            for bin in lo.max(1)..=hi.min(n / 2 - 1) {
                let noise = spectrum[bin];
                let phase = if noise.norm() > 0.0 {
                    noise / noise.norm()
                } else {
                    Complex::new(1.0, 0.0)
                };
                shaped[bin] = phase * BOOST_MAGNITUDE;
                shaped[n - bin] = shaped[bin].conj();
            }
        }

        self.planner.plan_fft_inverse(n).process(&mut shaped);
        let mut samples: Vec<f64> = shaped.iter().map(|c| c.re).collect();

        let peak = samples.iter().fold(0.0f64, |max, &s| max.max(s.abs()));
        if peak > 0.0 {
            for sample in samples.iter_mut() {
                *sample /= peak;
            }
        }

        apply_fade(&mut samples);

        samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * PCM_FULL_SCALE) as i16)
            .collect()
    }

    /// Concatenates a full message: start sentinel, the payload blocks each
    /// followed by their inverted twin, end sentinel. Pause blocks separate
    /// every pair of neighbours unless the pause period is zero, in which
    /// case they are omitted entirely.
    pub fn build_message_signal(
        &mut self,
        normal_blocks: &[Vec<u8>],
        inverted_blocks: &[Vec<u8>],
    ) -> Vec<i16> {
        assert_eq!(normal_blocks.len(), inverted_blocks.len());
        let num_frequencies = self.profile.num_frequencies();
        let with_pauses = self.profile.pause_period_ms() != 0;

        let start = self.synthesize_block(&start_block_bits(num_frequencies), BlockKind::Data);
        let end = self.synthesize_block(&end_block_bits(num_frequencies), BlockKind::Data);
        let pause = if with_pauses {
            self.synthesize_block(&vec![0; num_frequencies], BlockKind::Pause)
        } else {
            Vec::new()
        };

        let mut signal = Vec::with_capacity(self.profile.ring_buffer_capacity());
        signal.extend_from_slice(&start);
        signal.extend_from_slice(&pause);
        for (normal, inverted) in normal_blocks.iter().zip(inverted_blocks.iter()) {
            signal.extend(self.synthesize_block(normal, BlockKind::Data));
            signal.extend_from_slice(&pause);
            signal.extend(self.synthesize_block(inverted, BlockKind::Data));
            signal.extend_from_slice(&pause);
        }
        signal.extend_from_slice(&end);
        signal
    }
}

/// Symmetric linear fade over 1/FADE_FRACTION of the window on each side.
fn apply_fade(samples: &mut [f64]) {
    let len = samples.len();
    let fade = ((len as f64) / FADE_FRACTION as f64).round() as usize;
    if fade == 0 {
        return;
    }
    for i in 0..fade.min(len) {
        let factor = i as f64 / fade as f64;
        samples[i] *= factor;
        samples[len - 1 - i] *= factor;
    }
}
