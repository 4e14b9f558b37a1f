//! Spectrogram analysis of a captured message window.
//!
//! Once the frame-sync detector reports that the ring buffer holds exactly
//! one message, a Hamming-windowed short-time spectrum is computed over the
//! whole buffer, cropped to the channel band, log-transformed and
//! normalized per frame. Every payload block has an inverted twin; a bit is
//! decided by comparing the aggregated magnitude at the block center
//! against the inverted-block center.
//!
//! The decision inequality is `normal < inverted => bit is 1`: under the
//! per-frame unit-sum normalization of log magnitudes a present tone
//! *lowers* the local value relative to its complement. This boundary is
//! wire-format-relevant and must not be "fixed".

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::crc::CyclicRedundancyCode;
use crate::filter::hamming_window;
use crate::profile::Profile;
use crate::{DEFAULT_FREQUENCY_OFFSET, DEFAULT_STEP_FACTOR};

/// Floor substituted for zero magnitudes before the log transform.
const LOG_EPSILON: f64 = 1e-7;

/// How a spectrum neighborhood is reduced to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Median,
    Mean,
    Max,
}

/// Result of decoding one captured buffer.
pub struct DecodeOutcome {
    /// Decoded bits, `num_message_blocks * num_frequencies` of them,
    /// channel order within each block, lowest frequency first.
    pub bits: Vec<u8>,
    /// CRC residue weight over the decoded bits; zero means clean.
    pub residue_weight: u32,
    /// Normalized magnitude spectrogram of the whole buffer, one row per
    /// frame, for visualization listeners.
    pub spectrum: Vec<Vec<f32>>,
}

pub struct SpectrogramBitDecoder {
    profile: Profile,
    planner: FftPlanner<f64>,
    crc: CyclicRedundancyCode,
    window_len: usize,
    step: usize,
    overlap_factor: usize,
    frequency_offset: u32,
    aggregation: Aggregation,
    /// Neighborhood half-widths: frequency bins and time frames.
    neighbors_freq: usize,
    neighbors_time: usize,
}

impl SpectrogramBitDecoder {
    pub fn new(profile: Profile) -> Self {
        Self::with_parameters(
            profile,
            DEFAULT_STEP_FACTOR,
            DEFAULT_FREQUENCY_OFFSET,
            Aggregation::Median,
        )
    }

    pub fn with_parameters(
        profile: Profile,
        step_factor: usize,
        frequency_offset: u32,
        aggregation: Aggregation,
    ) -> Self {
        // Spectrum window is one bit period, forced even; the hop is the
        // capture step: half a bit period split by the step factor.
        let mut window_len = profile.bit_period_samples();
        if window_len % 2 == 1 {
            window_len += 1;
        }
        let analysis_window = ((profile.bit_period_samples() as f64) / 2.0).round() as usize;
        let step = ((analysis_window as f64) / step_factor as f64).round() as usize;
        let overlap_factor = ((window_len as f64) / step as f64).round() as usize;

        Self {
            profile,
            planner: FftPlanner::new(),
            crc: CyclicRedundancyCode::new(),
            window_len,
            step,
            overlap_factor,
            frequency_offset,
            aggregation,
            neighbors_freq: 1,
            neighbors_time: 1,
        }
    }

    /// Capture step in samples this decoder was derived from.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Decodes a full ring-buffer snapshot believed to hold one message.
    pub fn decode(&mut self, buffer: &[f32]) -> DecodeOutcome {
        let window_len = self.window_len;
        let half = window_len / 2;
        let overlap_factor = self.overlap_factor;
        let num_frames =
            ((overlap_factor as f64 * buffer.len() as f64) / window_len as f64).round() as usize;

        // Short-time magnitude spectrum over the whole buffer. Frames past
        // the buffer end are zero padded.
        let window = hamming_window(window_len);
        let fft = self.planner.plan_fft_forward(window_len);
        let mut magnitudes: Vec<Vec<f64>> = Vec::with_capacity(num_frames);
        let mut total_magnitude = 0.0f64;
        for j in 0..num_frames {
            let start =
                (j / overlap_factor) * window_len + (j % overlap_factor) * (window_len / overlap_factor);
            let mut frame = vec![Complex::new(0.0, 0.0); window_len];
            for (i, slot) in frame.iter_mut().enumerate() {
                if start + i < buffer.len() {
                    *slot = Complex::new(buffer[start + i] as f64 * window[i], 0.0);
                }
            }
            fft.process(&mut frame);
            let row: Vec<f64> = frame[..half].iter().map(|c| c.norm()).collect();
            total_magnitude += row.iter().sum::<f64>();
            magnitudes.push(row);
        }

        // Visualization spectrum, normalized by the total magnitude of the
        // whole spectrogram.
        let spectrum: Vec<Vec<f32>> = magnitudes
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&m| {
                        if total_magnitude > 0.0 {
                            (m / total_magnitude) as f32
                        } else {
                            1e-4
                        }
                    })
                    .collect()
            })
            .collect();

        // Crop to the channel band plus offset, log transform, normalize
        // each frame to unit sum.
        let sample_rate = self.profile.sample_rate() as f64;
        let frequencies = self.profile.frequencies();
        let lower_freq = frequencies[0].saturating_sub(self.frequency_offset) as f64;
        let upper_freq = (frequencies[frequencies.len() - 1] + self.frequency_offset) as f64;
        let lower_idx = (lower_freq / sample_rate * window_len as f64) as usize + 1;
        let upper_idx = ((upper_freq / sample_rate * window_len as f64) as usize + 1).min(half - 1);

        let mut restricted: Vec<Vec<f64>> = Vec::with_capacity(num_frames);
        for row in &magnitudes {
            let mut log_row: Vec<f64> = row[lower_idx..=upper_idx]
                .iter()
                .map(|&m| {
                    let floored = if m == 0.0 { LOG_EPSILON } else { m };
                    floored.ln()
                })
                .collect();
            let log_sum: f64 = log_row.iter().sum();
            if log_sum != 0.0 {
                for value in log_row.iter_mut() {
                    *value /= log_sum;
                }
            }
            restricted.push(log_row);
        }

        // Time slot centers: one per block, spaced by block+pause duration
        // in frames.
        let vectors_per_block = overlap_factor;
        let vectors_per_pause =
            ((self.profile.pause_period_samples() as f64) / self.step as f64).round() as usize;
        let total_blocks = self.profile.total_blocks();
        let mut block_centers = vec![0usize; total_blocks];
        block_centers[0] = ((vectors_per_block as f64 / 2.0).round() as usize).saturating_sub(1);
        for i in 1..total_blocks {
            block_centers[i] = block_centers[i - 1] + vectors_per_block + vectors_per_pause;
        }

        // Decode payload slots, skipping the sentinels and stepping by two
        // over the normal/inverted pairs.
        let num_frequencies = self.profile.num_frequencies();
        let rows = upper_idx - lower_idx + 1;
        let mut bits = Vec::with_capacity(self.profile.num_message_blocks() * num_frequencies);
        for slot in (1..total_blocks - 1).step_by(2) {
            for channel in 0..num_frequencies {
                let freq_idx =
                    (frequencies[channel] as f64 / sample_rate * window_len as f64).round() as usize
                        + 1;
                let row = freq_idx.saturating_sub(lower_idx).min(rows - 1);

                let normal = self.aggregate(&restricted, block_centers[slot], row);
                let inverted = self.aggregate(&restricted, block_centers[slot + 1], row);
                bits.push(u8::from(normal < inverted));
            }
        }

        let residue_weight = self.crc.check(&bits);
        DecodeOutcome {
            bits,
            residue_weight,
            spectrum,
        }
    }

    /// Reduces the neighborhood around (frame, row) to one value. Indices
    /// are clamped to the spectrogram bounds.
    fn aggregate(&self, data: &[Vec<f64>], frame: usize, row: usize) -> f64 {
        let max_frame = data.len() - 1;
        let max_row = data[0].len() - 1;
        let mut values = Vec::with_capacity(
            (2 * self.neighbors_time + 1) * (2 * self.neighbors_freq + 1),
        );
        for df in -(self.neighbors_time as isize)..=self.neighbors_time as isize {
            for dr in -(self.neighbors_freq as isize)..=self.neighbors_freq as isize {
                let f = (frame as isize + df).clamp(0, max_frame as isize) as usize;
                let r = (row as isize + dr).clamp(0, max_row as isize) as usize;
                values.push(data[f][r]);
            }
        }
        match self.aggregation {
            Aggregation::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Max => values.iter().fold(f64::MIN, |max, &v| max.max(v)),
            Aggregation::Median => {
                values.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let middle = values.len() / 2;
                if values.len() % 2 == 1 {
                    values[middle]
                } else {
                    (values[middle - 1] + values[middle]) / 2.0
                }
            }
        }
    }
}
