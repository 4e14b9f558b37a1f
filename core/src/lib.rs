//! Acoustic data-modem library: multi-tone FSK over a speaker/microphone pair
//!
//! Payloads are framed with a polynomial CRC, rendered as band-limited
//! multi-tone blocks bracketed by start/end sentinel blocks, and recovered
//! from a live sample stream by band-energy frame synchronization followed
//! by spectrogram analysis. No external clock or trigger is required.

pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod framing;
pub mod message;
pub mod profile;
pub mod ring_buffer;
pub mod spectrogram;
pub mod sender;
pub mod synth;
pub mod sync;

pub use decoder::{Decoder, DecoderHandle, DecoderState, MessageListener, SampleSource, SpectrumListener};
pub use encoder::Encoder;
pub use error::{Result, SonalinkError};
pub use message::Message;
pub use profile::Profile;
pub use sender::{PlaybackSink, Sender, SenderState};

// Wire-format constants. Both ends of a link must agree on all of these.

/// CRC generator polynomial bits, CRC-17-CAN (0x1685B), MSB first.
/// The parity length (16 bits) is the generator length minus one.
pub const GENERATOR_POLYNOMIAL: [u8; 17] = [1, 0, 1, 1, 0, 1, 0, 0, 0, 0, 1, 0, 1, 1, 0, 1, 1];

/// Padding byte inserted until the framed bit count fills the block grid.
pub const FILLER_PATTERN: [u8; 8] = [0, 0, 0, 1, 1, 0, 0, 1];

/// Full-scale value for 16-bit PCM quantization. Slightly below the i16
/// limit to leave headroom against clipping in downstream resamplers.
pub const PCM_FULL_SCALE: f64 = 32760.0;

/// Sample rate assumed when none is given (valid on effectively all audio hardware).
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Band-pass filter order used by the frame-sync detector.
pub const DEFAULT_BANDPASS_ORDER: usize = 8;

/// Upper-band vs lower-band energy ratio that marks a start block.
pub const DEFAULT_START_FACTOR: f64 = 2.0;

/// Lower-band vs upper-band energy ratio that marks an end block.
pub const DEFAULT_END_FACTOR: f64 = 2.0;

/// Analysis windows per half bit period; controls the capture step size.
pub const DEFAULT_STEP_FACTOR: usize = 8;

/// Margin in Hz kept around the channel band when cropping the spectrogram.
pub const DEFAULT_FREQUENCY_OFFSET: u32 = 50;

/// Window length in ms substituted when a zero pause period must still
/// render a block (sentinels and payload blocks always use the bit period).
pub const MIN_BLOCK_PERIOD_MS: u32 = 30;

/// Fraction of a tone block faded in and out (1/N of the window each side).
pub const FADE_FRACTION: usize = 3;
