//! Encode path: payload bytes to a rendered, transmit-ready message.

use crate::error::Result;
use crate::framing::{invert, split_into_blocks, BitFramer};
use crate::message::Message;
use crate::profile::Profile;
use crate::synth::ToneBlockSynthesizer;

pub struct Encoder {
    profile: Profile,
    framer: BitFramer,
    synth: ToneBlockSynthesizer,
}

impl Encoder {
    pub fn new(profile: Profile) -> Self {
        Self {
            synth: ToneBlockSynthesizer::new(profile.clone()),
            framer: BitFramer::new(),
            profile,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Packs, frames and renders a payload. The returned message carries
    /// the PCM signal ready for a playback sink and is correct by
    /// construction. Fails with `PayloadTooLarge` before any rendering when
    /// the payload exceeds the profile capacity.
    pub fn generate_message(&mut self, payload: &[u8]) -> Result<Message> {
        let signal = self.render(payload)?;
        let mut message = Message::for_sending(payload.to_vec());
        message.set_raw_audio(signal);
        Ok(message)
    }

    /// Renders the PCM signal without wrapping it in a message.
    pub fn render(&mut self, payload: &[u8]) -> Result<Vec<i16>> {
        let bits = self.framer.pack(payload, &self.profile)?;
        let normal = split_into_blocks(&bits, self.profile.num_frequencies());
        let inverted: Vec<Vec<u8>> = normal.iter().map(|block| invert(block)).collect();
        Ok(self.synth.build_message_signal(&normal, &inverted))
    }
}
