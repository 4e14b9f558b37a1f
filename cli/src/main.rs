use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use hound::WavSpec;
use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;

use sonalink_core::decoder::BufferSource;
use sonalink_core::{Decoder, Encoder, Message, MessageListener, Profile};

#[derive(Parser)]
#[command(name = "sonalink")]
#[command(about = "Acoustic data modem: send and receive byte payloads as multi-tone audio")]
struct Cli {
    /// JSON profile file; the built-in default profile is used when omitted
    #[arg(short, long, global = true)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a payload file into a WAV audio file
    Encode {
        /// Input binary file
        #[arg(value_name = "INPUT.BIN")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,
    },

    /// Decode a WAV audio file back to the payload
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output binary file; payload is printed as text when omitted
        #[arg(value_name = "OUTPUT.BIN")]
        output: Option<PathBuf>,

        /// Keep listening after the first clean message and report every
        /// decode attempt
        #[arg(long)]
        all: bool,
    },

    /// Print the profile capacity and signal parameters
    Capacity,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("unsupported WAV format: {0}")]
    UnsupportedWav(String),

    #[error("no message with a valid CRC was decoded")]
    NoMessageDecoded,
}

/// JSON profile record. Keys follow the configuration file convention of
/// compatible implementations.
#[derive(Debug, Deserialize)]
struct ProfileConfig {
    #[serde(rename = "frequency-zero")]
    frequency_zero: u32,
    #[serde(rename = "bit-period")]
    bit_period: u32,
    #[serde(rename = "pause-period")]
    pause_period: u32,
    #[serde(rename = "number-of-message-blocks")]
    number_of_message_blocks: usize,
    #[serde(rename = "number-of-frequencies")]
    number_of_frequencies: usize,
    #[serde(rename = "space-between-frequencies")]
    space_between_frequencies: u32,
    #[serde(rename = "sample-rate", default = "default_sample_rate")]
    sample_rate: u32,
}

fn default_sample_rate() -> u32 {
    sonalink_core::DEFAULT_SAMPLE_RATE
}

fn load_profile(path: &Option<PathBuf>) -> Result<Profile, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let config: ProfileConfig = serde_json::from_reader(File::open(path)?)?;
            Ok(Profile::new(
                config.frequency_zero,
                config.bit_period,
                config.pause_period,
                config.number_of_message_blocks,
                config.number_of_frequencies,
                config.space_between_frequencies,
                config.sample_rate,
            )?)
        }
        None => Ok(Profile::new(18000, 100, 0, 10, 16, 100, 44100)?),
    }
}

fn main() {
    env_logger::init();
    if let Err(error) = run() {
        eprintln!("error: {}", error);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let profile = load_profile(&cli.profile)?;

    match cli.command {
        Commands::Encode { input, output } => encode_command(profile, &input, &output),
        Commands::Decode { input, output, all } => decode_command(profile, &input, output, all),
        Commands::Capacity => {
            capacity_command(&profile);
            Ok(())
        }
    }
}

fn encode_command(
    profile: Profile,
    input: &PathBuf,
    output: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = std::fs::read(input)?;
    info!("encoding {} payload bytes", payload.len());

    let mut encoder = Encoder::new(profile.clone());
    let message = encoder.generate_message(&payload)?;
    let samples = message.raw_audio().expect("encoder always renders audio");

    let spec = WavSpec {
        channels: 1,
        sample_rate: profile.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(File::create(output)?, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    println!(
        "Wrote {} samples ({:.2} s) to {}",
        samples.len(),
        samples.len() as f64 / profile.sample_rate() as f64,
        output.display()
    );
    Ok(())
}

fn decode_command(
    profile: Profile,
    input: &PathBuf,
    output: Option<PathBuf>,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::new(File::open(input)?)?;
    let spec = reader.spec();
    info!(
        "reading WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );
    if spec.channels != 1 {
        return Err(CliError::UnsupportedWav(format!("{} channels, need mono", spec.channels)).into());
    }
    if spec.sample_rate != profile.sample_rate() {
        warn!(
            "WAV sample rate {} differs from profile rate {}; decoding anyway",
            spec.sample_rate,
            profile.sample_rate()
        );
    }

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader.samples::<i16>().collect::<Result<_, _>>()?,
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()?,
        (format, bits) => {
            return Err(CliError::UnsupportedWav(format!("{:?} at {} bits", format, bits)).into())
        }
    };

    let mut decoder = Decoder::new(profile);
    decoder.set_silent_mode(all);

    // Align the stream end to a chunk boundary and append silence so the
    // ring buffer slides fully past the message before the source ends.
    let step = decoder.analysis_step();
    let align = (step - samples.len() % step) % step;
    let mut stream = samples;
    stream.extend(std::iter::repeat(0).take(align + step * 16));

    let messages: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    struct Collector(Arc<Mutex<Vec<Message>>>);
    impl MessageListener for Collector {
        fn on_message_received(&mut self, message: &Message) {
            self.0.lock().unwrap().push(message.clone());
        }
        fn on_decode_error(&mut self, reason: &str) {
            warn!("decode error: {}", reason);
        }
    }
    decoder.add_message_listener(Box::new(Collector(Arc::clone(&messages))));

    let mut source = BufferSource::new(stream);
    decoder.listen(&mut source)?;

    let messages = messages.lock().unwrap();
    if all {
        for (i, message) in messages.iter().enumerate() {
            println!(
                "message {}: crc {} payload {:?}",
                i + 1,
                if message.crc_is_correct() { "ok" } else { "BAD" },
                message.payload_as_text()
            );
        }
    }
    let clean = messages
        .iter()
        .find(|m| m.crc_is_correct())
        .ok_or(CliError::NoMessageDecoded)?;

    match output {
        Some(path) => {
            std::fs::write(&path, clean.payload())?;
            println!("Wrote {} bytes to {}", clean.payload().len(), path.display());
        }
        None => println!("{}", clean.payload_as_text()),
    }
    Ok(())
}

fn capacity_command(profile: &Profile) {
    println!("payload capacity : {} bytes", profile.byte_capacity());
    println!("channels         : {} from {} Hz, {} Hz apart", profile.num_frequencies(), profile.f0(), profile.frequency_spacing_hz());
    println!("bit period       : {} ms ({} samples)", profile.bit_period_ms(), profile.bit_period_samples());
    println!("pause period     : {} ms ({} samples)", profile.pause_period_ms(), profile.pause_period_samples());
    println!("blocks on air    : {}", profile.total_blocks());
    println!(
        "message duration : {:.2} s",
        profile.ring_buffer_capacity() as f64 / profile.sample_rate() as f64
    );
}
