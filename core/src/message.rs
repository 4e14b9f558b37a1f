use std::time::Duration;

/// A payload travelling through the modem, received or to be sent.
///
/// Value object: immutable after creation except for attaching the raw
/// audio rendering (generated signal on the send side, captured buffer on
/// the receive side) for debugging or replay. Equality compares payloads.
#[derive(Debug, Clone)]
pub struct Message {
    payload: Vec<u8>,
    crc_is_correct: bool,
    decoding_time: Duration,
    raw_audio: Option<Vec<i16>>,
}

impl Message {
    /// A message built for sending; correct by construction.
    pub fn for_sending(payload: Vec<u8>) -> Self {
        Self {
            payload,
            crc_is_correct: true,
            decoding_time: Duration::ZERO,
            raw_audio: None,
        }
    }

    /// A message produced by the decoder; the CRC flag reflects the actual
    /// parity check, the duration the time from the last captured chunk to
    /// the finished decode.
    pub fn received(payload: Vec<u8>, crc_is_correct: bool, decoding_time: Duration) -> Self {
        Self {
            payload,
            crc_is_correct,
            decoding_time,
            raw_audio: None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn crc_is_correct(&self) -> bool {
        self.crc_is_correct
    }

    pub fn decoding_time(&self) -> Duration {
        self.decoding_time
    }

    pub fn raw_audio(&self) -> Option<&[i16]> {
        self.raw_audio.as_deref()
    }

    pub fn set_raw_audio(&mut self, raw_audio: Vec<i16>) {
        self.raw_audio = Some(raw_audio);
    }

    /// Payload interpreted as UTF-8, lossy.
    pub fn payload_as_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}

impl Eq for Message {}
