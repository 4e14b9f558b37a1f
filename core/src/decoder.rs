//! Receive-side orchestrator: capture loop, frame-sync gating, decode
//! dispatch and listener notification.
//!
//! The loop pulls one analysis step of samples per iteration from a
//! caller-supplied source, feeds the ring buffer and, once the buffer is
//! nearly full, runs the frame-sync test every step. A hit snapshots the
//! buffer, decodes it and emits a message. All listener callbacks run
//! synchronously on the loop thread; stop and cancel are cooperative flags
//! polled once per chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{Result, SonalinkError};
use crate::framing::BitFramer;
use crate::message::Message;
use crate::profile::Profile;
use crate::ring_buffer::RingBuffer;
use crate::spectrogram::{Aggregation, SpectrogramBitDecoder};
use crate::sync::FrameSyncDetector;
use crate::{
    DEFAULT_BANDPASS_ORDER, DEFAULT_END_FACTOR, DEFAULT_FREQUENCY_OFFSET, DEFAULT_START_FACTOR,
    DEFAULT_STEP_FACTOR,
};

/// Pull-based source of mono 16-bit PCM, chunked by the capture loop.
pub trait SampleSource {
    /// Fills up to `buf.len()` samples and returns the count. A count of 0
    /// means the source is exhausted; a short count means no full chunk was
    /// available this step. Errors mean the capture device went away.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// An in-memory source over a prepared sample buffer. Used by file-based
/// collaborators and tests; exhausts instead of blocking.
pub struct BufferSource {
    samples: Vec<i16>,
    position: usize,
}

impl BufferSource {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            position: 0,
        }
    }
}

impl SampleSource for BufferSource {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
        let remaining = self.samples.len() - self.position;
        let count = remaining.min(buf.len());
        buf[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

pub trait MessageListener: Send {
    fn on_message_received(&mut self, message: &Message);
    fn on_decode_error(&mut self, reason: &str);
}

pub trait SpectrumListener: Send {
    fn on_spectrum(&mut self, frames: &[Vec<f32>], crc_is_correct: bool);
}

/// Identifies a registered listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Initialized,
    Listening,
    Stopped,
    Cancelled,
}

/// Requests stop or cancellation of a running capture loop from another
/// thread. Flags are polled once per captured chunk; there is no mid-chunk
/// preemption.
#[derive(Clone)]
pub struct DecoderHandle {
    stop: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl DecoderHandle {
    /// Ends the session after the current chunk; the decoder may be
    /// restarted afterwards.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Ends the session terminally; a cancelled decoder cannot be
    /// restarted.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
    }
}

pub struct Decoder {
    profile: Profile,
    framer: BitFramer,
    detector: FrameSyncDetector,
    spectrogram: SpectrogramBitDecoder,

    analysis_window_len: usize,
    analysis_step: usize,
    windows_per_bit: usize,
    windows_per_pause: usize,

    silent_mode: bool,
    return_raw_audio: bool,

    state: DecoderState,
    stop: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,

    message_listeners: Vec<(ListenerId, Box<dyn MessageListener>)>,
    spectrum_listeners: Vec<(ListenerId, Box<dyn SpectrumListener>)>,
    next_listener_id: usize,
}

impl Decoder {
    pub fn new(profile: Profile) -> Self {
        Self::with_parameters(
            profile,
            DEFAULT_STEP_FACTOR,
            DEFAULT_FREQUENCY_OFFSET,
            false,
            DEFAULT_BANDPASS_ORDER,
            DEFAULT_START_FACTOR,
            DEFAULT_END_FACTOR,
        )
    }

    pub fn with_parameters(
        profile: Profile,
        step_factor: usize,
        frequency_offset: u32,
        silent_mode: bool,
        bandpass_order: usize,
        start_factor: f64,
        end_factor: f64,
    ) -> Self {
        let detector =
            FrameSyncDetector::with_parameters(&profile, bandpass_order, start_factor, end_factor);
        let spectrogram = SpectrogramBitDecoder::with_parameters(
            profile.clone(),
            step_factor,
            frequency_offset,
            Aggregation::Median,
        );

        let analysis_window_len = detector.window_len();
        let analysis_step = spectrogram.step();
        let windows_per_bit = (((profile.bit_period_samples() + profile.pause_period_samples())
            as f64)
            / analysis_step as f64)
            .round() as usize;
        let windows_per_pause =
            ((profile.pause_period_samples() as f64) / analysis_step as f64).round() as usize;

        Self {
            profile,
            framer: BitFramer::new(),
            detector,
            spectrogram,
            analysis_window_len,
            analysis_step,
            windows_per_bit,
            windows_per_pause,
            silent_mode,
            return_raw_audio: false,
            state: DecoderState::Initialized,
            stop: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            message_listeners: Vec::new(),
            spectrum_listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Capture chunk size the loop reads per iteration.
    pub fn analysis_step(&self) -> usize {
        self.analysis_step
    }

    /// In silent mode a correct CRC does not stop the session; the loop
    /// keeps listening for further messages.
    pub fn set_silent_mode(&mut self, silent_mode: bool) {
        self.silent_mode = silent_mode;
    }

    /// When enabled, emitted messages carry the captured buffer for
    /// debugging or replay.
    pub fn set_return_raw_audio(&mut self, return_raw_audio: bool) {
        self.return_raw_audio = return_raw_audio;
    }

    pub fn handle(&self) -> DecoderHandle {
        DecoderHandle {
            stop: Arc::clone(&self.stop),
            cancel: Arc::clone(&self.cancel),
        }
    }

    pub fn add_message_listener(&mut self, listener: Box<dyn MessageListener>) -> ListenerId {
        let id = self.allocate_listener_id();
        self.message_listeners.push((id, listener));
        id
    }

    pub fn remove_message_listener(&mut self, id: ListenerId) -> bool {
        let before = self.message_listeners.len();
        self.message_listeners.retain(|(entry, _)| *entry != id);
        self.message_listeners.len() != before
    }

    pub fn add_spectrum_listener(&mut self, listener: Box<dyn SpectrumListener>) -> ListenerId {
        let id = self.allocate_listener_id();
        self.spectrum_listeners.push((id, listener));
        id
    }

    pub fn remove_spectrum_listener(&mut self, id: ListenerId) -> bool {
        let before = self.spectrum_listeners.len();
        self.spectrum_listeners.retain(|(entry, _)| *entry != id);
        self.spectrum_listeners.len() != before
    }

    fn allocate_listener_id(&mut self) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        id
    }

    /// Runs the capture loop on the calling thread until a message with a
    /// correct CRC arrives (outside silent mode), the source ends, or a
    /// handle requests stop/cancel.
    pub fn listen(&mut self, source: &mut dyn SampleSource) -> Result<()> {
        self.listen_until(source, None)
    }

    /// Like `listen`, but cancels the session when `timeout` elapses
    /// without a decode ending it first. After expiry the decoder is
    /// cancelled and cannot be restarted.
    pub fn listen_for(&mut self, source: &mut dyn SampleSource, timeout: Duration) -> Result<()> {
        self.listen_until(source, Some(Instant::now() + timeout))
    }

    fn listen_until(
        &mut self,
        source: &mut dyn SampleSource,
        deadline: Option<Instant>,
    ) -> Result<()> {
        match self.state {
            DecoderState::Cancelled => {
                return Err(SonalinkError::InvalidState(
                    "cannot start a decoder after it was cancelled".into(),
                ))
            }
            DecoderState::Listening => {
                return Err(SonalinkError::InvalidState(
                    "cannot start a decoder that is already listening".into(),
                ))
            }
            DecoderState::Initialized | DecoderState::Stopped => {}
        }

        self.stop.store(false, Ordering::SeqCst);
        self.state = DecoderState::Listening;

        let mut ring = RingBuffer::new(self.profile.ring_buffer_capacity());
        let nearly_full = self.profile.total_blocks() * self.windows_per_bit - self.windows_per_pause;
        let mut chunk = vec![0i16; self.analysis_step];
        let mut converted = vec![0.0f32; self.analysis_step];
        let mut chunks_seen: usize = 0;

        debug!(
            "listening: step {} samples, sync after {} chunks",
            self.analysis_step, nearly_full
        );

        while !self.stop.load(Ordering::SeqCst) && !self.cancel.load(Ordering::SeqCst) {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.cancel.store(true, Ordering::SeqCst);
                    break;
                }
            }

            let read = match source.read(&mut chunk) {
                Ok(read) => read,
                Err(error) => {
                    let reason = format!("capture source failed: {}", error);
                    self.notify_decode_error(&reason);
                    break;
                }
            };
            if read == 0 {
                break;
            }
            if read != chunk.len() {
                // No full chunk this step; treated as no new data, no retry.
                continue;
            }

            let read_instant = Instant::now();
            for (out, &sample) in converted.iter_mut().zip(chunk.iter()) {
                *out = sample as f32 / i16::MAX as f32;
            }
            ring.add(&converted);
            chunks_seen += 1;

            if chunks_seen >= nearly_full {
                self.analyze_buffer(&mut ring, read_instant);
            }
        }

        self.state = if self.cancel.load(Ordering::SeqCst) {
            DecoderState::Cancelled
        } else {
            DecoderState::Stopped
        };
        Ok(())
    }

    /// One frame-sync test over the buffer edges; decodes on a hit. Runs
    /// entirely on the loop thread, outside any lock.
    fn analyze_buffer(&mut self, ring: &mut RingBuffer, read_instant: Instant) {
        let snapshot = ring.snapshot_ordered();
        let first_window = &snapshot[..self.analysis_window_len];
        let last_window = &snapshot[snapshot.len() - self.analysis_window_len..];

        if self.detector.test_start(first_window) && self.detector.test_end(last_window) {
            debug!("frame sync hit, decoding buffer");
            let outcome = self.spectrogram.decode(&snapshot);
            let crc_is_correct = outcome.residue_weight == 0;

            for (_, listener) in self.spectrum_listeners.iter_mut() {
                listener.on_spectrum(&outcome.spectrum, crc_is_correct);
            }

            let payload = self.framer.unpack(&outcome.bits);
            let mut message = Message::received(payload, crc_is_correct, read_instant.elapsed());
            if self.return_raw_audio {
                let raw: Vec<i16> = snapshot
                    .iter()
                    .map(|&s| (s * i16::MAX as f32) as i16)
                    .collect();
                message.set_raw_audio(raw);
            }
            for (_, listener) in self.message_listeners.iter_mut() {
                listener.on_message_received(&message);
            }

            if !self.silent_mode && crc_is_correct {
                self.stop.store(true, Ordering::SeqCst);
            }
        }

        ring.advance_analysis(self.analysis_step);
    }

    fn notify_decode_error(&mut self, reason: &str) {
        for (_, listener) in self.message_listeners.iter_mut() {
            listener.on_decode_error(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn reference_profile() -> Profile {
        Profile::new(18000, 100, 0, 10, 16, 100, 44100).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        messages: Vec<Message>,
        errors: Vec<String>,
    }

    struct RecordingListener(Arc<Mutex<Recorder>>);

    impl MessageListener for RecordingListener {
        fn on_message_received(&mut self, message: &Message) {
            self.0.lock().unwrap().messages.push(message.clone());
        }

        fn on_decode_error(&mut self, reason: &str) {
            self.0.lock().unwrap().errors.push(reason.to_string());
        }
    }

    struct FailingSource;

    impl SampleSource for FailingSource {
        fn read(&mut self, _buf: &mut [i16]) -> Result<usize> {
            Err(SonalinkError::CaptureUnavailable("device lost".into()))
        }
    }

    #[test]
    fn test_initial_state() {
        let decoder = Decoder::new(reference_profile());
        assert_eq!(decoder.state(), DecoderState::Initialized);
        assert_eq!(decoder.analysis_step(), 276);
    }

    #[test]
    fn test_silence_never_triggers_a_message() {
        let profile = reference_profile();
        let mut decoder = Decoder::new(profile.clone());
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        decoder.add_message_listener(Box::new(RecordingListener(Arc::clone(&recorder))));

        // More than two full buffer cycles of silence.
        let mut source = BufferSource::new(vec![0i16; profile.ring_buffer_capacity() * 2 + 4096]);
        decoder.listen(&mut source).unwrap();

        assert_eq!(decoder.state(), DecoderState::Stopped);
        let recorder = recorder.lock().unwrap();
        assert!(recorder.messages.is_empty());
        assert!(recorder.errors.is_empty());
    }

    #[test]
    fn test_stopped_decoder_can_listen_again() {
        let mut decoder = Decoder::new(reference_profile());
        let mut source = BufferSource::new(vec![0i16; 8192]);
        decoder.listen(&mut source).unwrap();
        assert_eq!(decoder.state(), DecoderState::Stopped);

        let mut source = BufferSource::new(vec![0i16; 8192]);
        decoder.listen(&mut source).unwrap();
        assert_eq!(decoder.state(), DecoderState::Stopped);
    }

    #[test]
    fn test_cancelled_decoder_cannot_restart() {
        let mut decoder = Decoder::new(reference_profile());
        decoder.handle().cancel();
        let mut source = BufferSource::new(vec![0i16; 8192]);
        decoder.listen(&mut source).unwrap();
        assert_eq!(decoder.state(), DecoderState::Cancelled);

        let result = decoder.listen(&mut source);
        assert!(matches!(result, Err(SonalinkError::InvalidState(_))));
    }

    #[test]
    fn test_capture_failure_reported_via_callback() {
        let mut decoder = Decoder::new(reference_profile());
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        decoder.add_message_listener(Box::new(RecordingListener(Arc::clone(&recorder))));

        decoder.listen(&mut FailingSource).unwrap();
        assert_eq!(decoder.state(), DecoderState::Stopped);
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.errors.len(), 1);
        assert!(recorder.errors[0].contains("device lost"));
    }

    #[test]
    fn test_listener_removal() {
        let mut decoder = Decoder::new(reference_profile());
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let id = decoder.add_message_listener(Box::new(RecordingListener(Arc::clone(&recorder))));
        assert!(decoder.remove_message_listener(id));
        assert!(!decoder.remove_message_listener(id));

        decoder.listen(&mut FailingSource).unwrap();
        assert!(recorder.lock().unwrap().errors.is_empty());
    }

    #[test]
    fn test_short_reads_are_skipped() {
        // A source that alternates short reads with silence must not panic
        // or emit anything.
        struct ChoppySource {
            reads: usize,
        }
        impl SampleSource for ChoppySource {
            fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
                self.reads += 1;
                if self.reads > 50 {
                    return Ok(0);
                }
                if self.reads % 2 == 0 {
                    buf.fill(0);
                    Ok(buf.len())
                } else {
                    Ok(buf.len() / 2)
                }
            }
        }

        let mut decoder = Decoder::new(reference_profile());
        let mut source = ChoppySource { reads: 0 };
        decoder.listen(&mut source).unwrap();
        assert_eq!(decoder.state(), DecoderState::Stopped);
    }
}
