use crate::error::{Result, SonalinkError};

/// Transmission profile shared by both ends of a link.
///
/// Holds the six wire-relevant parameters plus the sample rate, and the
/// values derived from them. Derived values are computed once here and are
/// invariant for the lifetime of the profile; every component reads them
/// instead of re-deriving its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    f0: u32,
    bit_period_ms: u32,
    pause_period_ms: u32,
    num_message_blocks: usize,
    num_frequencies: usize,
    frequency_spacing_hz: u32,
    sample_rate: u32,

    frequencies: Vec<u32>,
    bit_period_samples: usize,
    pause_period_samples: usize,
    bandpass_width: u32,
    total_blocks: usize,
    ring_buffer_capacity: usize,
}

impl Profile {
    /// Builds a profile and validates it.
    ///
    /// Fails with `InvalidProfile` when `f0 * 2 > sample_rate` (the carrier
    /// must stay below Nyquist), when any field is zero, or when the channel
    /// count does not map onto whole bytes.
    pub fn new(
        f0: u32,
        bit_period_ms: u32,
        pause_period_ms: u32,
        num_message_blocks: usize,
        num_frequencies: usize,
        frequency_spacing_hz: u32,
        sample_rate: u32,
    ) -> Result<Self> {
        if f0 * 2 > sample_rate {
            return Err(SonalinkError::InvalidProfile(format!(
                "sample rate {} cannot be lower than two times the base frequency {}",
                sample_rate, f0
            )));
        }
        if f0 == 0 || bit_period_ms == 0 || frequency_spacing_hz == 0 || sample_rate == 0 {
            return Err(SonalinkError::InvalidProfile(
                "base frequency, bit period, frequency spacing and sample rate must be positive".into(),
            ));
        }
        if num_frequencies == 0 || num_frequencies % 8 != 0 {
            return Err(SonalinkError::InvalidProfile(format!(
                "number of frequencies must be a positive multiple of eight, got {}",
                num_frequencies
            )));
        }
        if num_message_blocks == 0 {
            return Err(SonalinkError::InvalidProfile(
                "number of message blocks must be positive".into(),
            ));
        }
        if num_message_blocks * (num_frequencies / 8) <= 2 {
            return Err(SonalinkError::InvalidProfile(
                "profile leaves no payload capacity after the CRC parity bytes".into(),
            ));
        }

        let frequencies: Vec<u32> = (0..num_frequencies)
            .map(|i| f0 + i as u32 * frequency_spacing_hz)
            .collect();
        let bit_period_samples = period_samples(bit_period_ms, sample_rate);
        let pause_period_samples = period_samples(pause_period_ms, sample_rate);
        let bandpass_width = frequency_spacing_hz * (num_frequencies as u32 / 2);
        // Two sentinel blocks bracket the payload; every payload block is
        // transmitted twice (normal + inverted).
        let total_blocks = 2 * num_message_blocks + 2;
        let ring_buffer_capacity =
            bit_period_samples * total_blocks + pause_period_samples * (total_blocks - 1);

        Ok(Self {
            f0,
            bit_period_ms,
            pause_period_ms,
            num_message_blocks,
            num_frequencies,
            frequency_spacing_hz,
            sample_rate,
            frequencies,
            bit_period_samples,
            pause_period_samples,
            bandpass_width,
            total_blocks,
            ring_buffer_capacity,
        })
    }

    pub fn f0(&self) -> u32 {
        self.f0
    }

    pub fn bit_period_ms(&self) -> u32 {
        self.bit_period_ms
    }

    pub fn pause_period_ms(&self) -> u32 {
        self.pause_period_ms
    }

    pub fn num_message_blocks(&self) -> usize {
        self.num_message_blocks
    }

    pub fn num_frequencies(&self) -> usize {
        self.num_frequencies
    }

    pub fn frequency_spacing_hz(&self) -> u32 {
        self.frequency_spacing_hz
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel center frequencies, `f0 + i * spacing`, lowest first.
    pub fn frequencies(&self) -> &[u32] {
        &self.frequencies
    }

    pub fn bit_period_samples(&self) -> usize {
        self.bit_period_samples
    }

    pub fn pause_period_samples(&self) -> usize {
        self.pause_period_samples
    }

    /// Width in Hz of each of the two sync half-bands, `spacing * (n/2)`.
    pub fn bandpass_width(&self) -> u32 {
        self.bandpass_width
    }

    /// Number of signal blocks in one message: sentinels + doubled payload.
    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// Sample count of exactly one framed message, pauses included.
    pub fn ring_buffer_capacity(&self) -> usize {
        self.ring_buffer_capacity
    }

    /// Maximum payload size in bytes; two bytes of the block grid are
    /// reserved for the CRC parity bits.
    pub fn byte_capacity(&self) -> usize {
        self.num_message_blocks * (self.num_frequencies / 8) - 2
    }
}

fn period_samples(period_ms: u32, sample_rate: u32) -> usize {
    ((period_ms as f64 * sample_rate as f64) / 1000.0).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_profile() -> Profile {
        Profile::new(18000, 100, 0, 10, 16, 100, 44100).unwrap()
    }

    #[test]
    fn test_derived_values() {
        let profile = reference_profile();
        assert_eq!(profile.bit_period_samples(), 4410);
        assert_eq!(profile.pause_period_samples(), 0);
        assert_eq!(profile.bandpass_width(), 800);
        assert_eq!(profile.total_blocks(), 22);
        assert_eq!(profile.ring_buffer_capacity(), 4410 * 22);
        assert_eq!(profile.byte_capacity(), 18);
    }

    #[test]
    fn test_frequency_table() {
        let profile = reference_profile();
        let freqs = profile.frequencies();
        assert_eq!(freqs.len(), 16);
        assert_eq!(freqs[0], 18000);
        assert_eq!(freqs[1], 18100);
        assert_eq!(freqs[15], 19500);
    }

    #[test]
    fn test_rejects_f0_above_nyquist() {
        let result = Profile::new(23000, 100, 0, 10, 16, 100, 44100);
        assert!(matches!(result, Err(SonalinkError::InvalidProfile(_))));
    }

    #[test]
    fn test_rejects_unaligned_channel_count() {
        let result = Profile::new(18000, 100, 0, 10, 12, 100, 44100);
        assert!(matches!(result, Err(SonalinkError::InvalidProfile(_))));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        // One block of eight channels leaves nothing after the parity bytes.
        let result = Profile::new(18000, 100, 0, 1, 8, 100, 44100);
        assert!(matches!(result, Err(SonalinkError::InvalidProfile(_))));
    }

    #[test]
    fn test_pause_period_derivation() {
        let profile = Profile::new(18000, 100, 50, 5, 16, 100, 44100).unwrap();
        assert_eq!(profile.pause_period_samples(), 2205);
        assert_eq!(
            profile.ring_buffer_capacity(),
            4410 * 12 + 2205 * 11
        );
    }
}
