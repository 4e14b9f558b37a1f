//! Start/end frame detection inside the streamed ring buffer.
//!
//! The channel band is split into two halves. A start sentinel puts all its
//! energy into the upper half, an end sentinel into the lower half, so the
//! detector band-pass filters an analysis window through both half-band
//! filters, sums the Hilbert envelope of each response and compares the
//! sums: the oldest window decides "a message starts here", the newest
//! window decides "and it ends here". Only both together trigger a decode.

use crate::filter::{BandPassFilter, Hilbert};
use crate::profile::Profile;
use crate::{DEFAULT_BANDPASS_ORDER, DEFAULT_END_FACTOR, DEFAULT_START_FACTOR};

pub struct FrameSyncDetector {
    down_filter: BandPassFilter,
    up_filter: BandPassFilter,
    hilbert: Hilbert,
    window_len: usize,
    padded_len: usize,
    start_factor: f64,
    end_factor: f64,
}

impl FrameSyncDetector {
    pub fn new(profile: &Profile) -> Self {
        Self::with_parameters(
            profile,
            DEFAULT_BANDPASS_ORDER,
            DEFAULT_START_FACTOR,
            DEFAULT_END_FACTOR,
        )
    }

    pub fn with_parameters(
        profile: &Profile,
        bandpass_order: usize,
        start_factor: f64,
        end_factor: f64,
    ) -> Self {
        let sample_rate = profile.sample_rate() as f64;
        let bandwidth = profile.bandpass_width() as f64;
        let center_down = profile.f0() as f64 + bandwidth / 2.0;
        let center_up = profile.f0() as f64 + bandwidth + bandwidth / 2.0;

        // Half a bit period, padded to a power of two for the envelope FFT.
        let window_len = ((profile.bit_period_samples() as f64) / 2.0).round() as usize;
        let padded_len = window_len.next_power_of_two();

        Self {
            down_filter: BandPassFilter::new(bandpass_order, sample_rate, center_down, bandwidth),
            up_filter: BandPassFilter::new(bandpass_order, sample_rate, center_up, bandwidth),
            hilbert: Hilbert::new(),
            window_len,
            padded_len,
            start_factor,
            end_factor,
        }
    }

    /// Length in samples of the analysis windows this detector expects.
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// True when the window carries start-sentinel energy: the upper
    /// half-band outweighs the lower by the start factor.
    pub fn test_start(&mut self, window: &[f32]) -> bool {
        let (down, up) = self.band_envelope_sums(window);
        up > self.start_factor * down
    }

    /// True when the window carries end-sentinel energy: roles reversed.
    pub fn test_end(&mut self, window: &[f32]) -> bool {
        let (down, up) = self.band_envelope_sums(window);
        down > self.end_factor * up
    }

    /// Full frame test over the buffer edges. The end test only runs when
    /// the start test already holds on the oldest window.
    pub fn detect_frame(&mut self, first_window: &[f32], last_window: &[f32]) -> bool {
        self.test_start(first_window) && self.test_end(last_window)
    }

    /// Band-passes the window through both half-band filters and sums the
    /// envelope magnitude of each response.
    fn band_envelope_sums(&mut self, window: &[f32]) -> (f64, f64) {
        let input: Vec<f64> = window.iter().map(|&s| s as f64).collect();

        let mut down_response = self.down_filter.process(&input);
        let mut up_response = self.up_filter.process(&input);
        down_response.resize(self.padded_len, 0.0);
        up_response.resize(self.padded_len, 0.0);

        let down_sum: f64 = self.hilbert.envelope(&down_response).iter().sum();
        let up_sum: f64 = self.hilbert.envelope(&up_response).iter().sum();
        (down_sum, up_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{end_block_bits, start_block_bits, BlockKind, ToneBlockSynthesizer};

    fn reference_profile() -> Profile {
        Profile::new(18000, 100, 0, 10, 16, 100, 44100).unwrap()
    }

    fn pcm_window(block: &[i16], len: usize, from_end: bool) -> Vec<f32> {
        let slice = if from_end {
            &block[block.len() - len..]
        } else {
            &block[..len]
        };
        slice.iter().map(|&s| s as f32 / i16::MAX as f32).collect()
    }

    #[test]
    fn test_start_block_triggers_start_condition() {
        let profile = reference_profile();
        let mut detector = FrameSyncDetector::new(&profile);
        let mut synth = ToneBlockSynthesizer::new(profile.clone());

        let block = synth.synthesize_block(&start_block_bits(16), BlockKind::Data);
        let window = pcm_window(&block, detector.window_len(), false);
        assert!(detector.test_start(&window));
        assert!(!detector.test_end(&window));
    }

    #[test]
    fn test_end_block_triggers_end_condition() {
        let profile = reference_profile();
        let mut detector = FrameSyncDetector::new(&profile);
        let mut synth = ToneBlockSynthesizer::new(profile.clone());

        let block = synth.synthesize_block(&end_block_bits(16), BlockKind::Data);
        let window = pcm_window(&block, detector.window_len(), true);
        assert!(detector.test_end(&window));
        assert!(!detector.test_start(&window));
    }

    #[test]
    fn test_silence_triggers_nothing() {
        let profile = reference_profile();
        let mut detector = FrameSyncDetector::new(&profile);
        let silence = vec![0.0f32; detector.window_len()];
        assert!(!detector.test_start(&silence));
        assert!(!detector.test_end(&silence));
        assert!(!detector.detect_frame(&silence, &silence));
    }

    #[test]
    fn test_full_band_block_is_ambiguous() {
        // A block with every channel on spreads energy over both halves;
        // neither factor-2 condition may fire on it.
        let profile = reference_profile();
        let mut detector = FrameSyncDetector::new(&profile);
        let mut synth = ToneBlockSynthesizer::new(profile.clone());

        let block = synth.synthesize_block(&vec![1u8; 16], BlockKind::Data);
        let window = pcm_window(&block, detector.window_len(), false);
        assert!(!detector.test_start(&window));
        assert!(!detector.test_end(&window));
    }

    #[test]
    fn test_detect_frame_on_sentinel_pair() {
        let profile = reference_profile();
        let mut detector = FrameSyncDetector::new(&profile);
        let mut synth = ToneBlockSynthesizer::new(profile.clone());

        let start = synth.synthesize_block(&start_block_bits(16), BlockKind::Data);
        let end = synth.synthesize_block(&end_block_bits(16), BlockKind::Data);
        let first = pcm_window(&start, detector.window_len(), false);
        let last = pcm_window(&end, detector.window_len(), true);
        assert!(detector.detect_frame(&first, &last));
        // Swapped edges must not detect: the sentinels are order-sensitive.
        assert!(!detector.detect_frame(&last, &first));
    }
}
