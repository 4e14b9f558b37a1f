use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn binary() -> &'static str {
    env!("CARGO_BIN_EXE_sonalink")
}

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sonalink-cli-test-{}", std::process::id()));
    fs::create_dir_all(&dir).ok();
    dir.join(name)
}

fn run_sonalink(args: &[&str]) -> (String, bool) {
    let output = Command::new(binary())
        .args(args)
        .output()
        .expect("failed to execute sonalink");
    let text =
        String::from_utf8_lossy(&output.stderr).to_string() + &String::from_utf8_lossy(&output.stdout);
    (text, output.status.success())
}

#[test]
fn test_encode_creates_wav() {
    let input = temp_path("encode.bin");
    fs::write(&input, b"Hello SoniTalk").unwrap();
    let wav = temp_path("encode.wav");
    let (output, ok) = run_sonalink(&["encode", input.to_str().unwrap(), wav.to_str().unwrap()]);
    assert!(ok, "encode failed: {}", output);
    assert!(output.contains("Wrote"), "unexpected output: {}", output);

    let size = fs::metadata(&wav).expect("WAV not created").len();
    // 97020 mono 16-bit samples plus header.
    assert!(size > 190_000, "file too small: {} bytes", size);
}

#[test]
fn test_encode_decode_round_trip() {
    let input = temp_path("roundtrip.bin");
    fs::write(&input, b"round trip").unwrap();
    let wav = temp_path("roundtrip.wav");
    let decoded = temp_path("roundtrip.out");

    let (output, ok) = run_sonalink(&["encode", input.to_str().unwrap(), wav.to_str().unwrap()]);
    assert!(ok, "encode failed: {}", output);

    let (output, ok) = run_sonalink(&[
        "decode",
        wav.to_str().unwrap(),
        decoded.to_str().unwrap(),
    ]);
    assert!(ok, "decode failed: {}", output);
    assert_eq!(fs::read(&decoded).unwrap(), b"round trip");
}

#[test]
fn test_decode_prints_text_without_output_file() {
    let input = temp_path("textual.bin");
    fs::write(&input, b"plain text").unwrap();
    let wav = temp_path("textual.wav");
    let (output, ok) = run_sonalink(&["encode", input.to_str().unwrap(), wav.to_str().unwrap()]);
    assert!(ok, "encode failed: {}", output);

    let (output, ok) = run_sonalink(&["decode", wav.to_str().unwrap()]);
    assert!(ok, "decode failed: {}", output);
    assert!(output.contains("plain text"), "payload missing from: {}", output);
}

#[test]
fn test_capacity_reports_default_profile() {
    let (output, ok) = run_sonalink(&["capacity"]);
    assert!(ok, "capacity failed: {}", output);
    assert!(output.contains("18 bytes"), "unexpected capacity: {}", output);
}

#[test]
fn test_json_profile_is_honored() {
    let profile = temp_path("profile.json");
    fs::write(
        &profile,
        r#"{
            "frequency-zero": 18000,
            "bit-period": 100,
            "pause-period": 0,
            "number-of-message-blocks": 5,
            "number-of-frequencies": 16,
            "space-between-frequencies": 100,
            "sample-rate": 44100
        }"#,
    )
    .unwrap();

    let (output, ok) = run_sonalink(&["--profile", profile.to_str().unwrap(), "capacity"]);
    assert!(ok, "capacity failed: {}", output);
    assert!(output.contains("8 bytes"), "unexpected capacity: {}", output);
}

#[test]
fn test_oversized_payload_fails() {
    let input = temp_path("toolarge.bin");
    fs::write(&input, vec![0u8; 64]).unwrap();
    let wav = temp_path("toolarge.wav");

    let (output, ok) = run_sonalink(&["encode", input.to_str().unwrap(), wav.to_str().unwrap()]);
    assert!(!ok, "oversized payload must fail");
    assert!(
        output.contains("exceeds profile capacity"),
        "unexpected error text: {}",
        output
    );
}
