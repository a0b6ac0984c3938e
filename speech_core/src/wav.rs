//! Waveform assembly and output-file bookkeeping.
//!
//! Fragments arrive as raw 16-bit little-endian PCM and are concatenated
//! byte-exactly, in arrival order, into a mono RIFF/WAVE container at the
//! fixed output rate. No resampling, no trimming, no smoothing at fragment
//! boundaries.

use std::path::Path;

use tracing::warn;

use crate::error::SpeechError;
use crate::session::AudioFragment;

pub const WAVE_CHANNELS: u16 = 1;
pub const WAVE_RATE: u32 = 24_000;
pub const WAVE_SAMPLE_WIDTH: u16 = 2; // bytes per sample

fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: WAVE_CHANNELS,
        sample_rate: WAVE_RATE,
        bits_per_sample: (WAVE_SAMPLE_WIDTH * 8),
        sample_format: hound::SampleFormat::Int,
    }
}

/// Write the concatenation of `fragments` to `path`.
///
/// All-or-nothing: an I/O failure mid-write surfaces as an error and the
/// partial file state is unspecified. A fragment with an odd byte count has
/// its trailing byte dropped, since half a sample cannot be played.
pub fn write_clip(path: &Path, fragments: &[AudioFragment]) -> Result<(), SpeechError> {
    let mut writer = hound::WavWriter::create(path, wav_spec())?;
    for fragment in fragments {
        if fragment.len() % 2 != 0 {
            warn!(len = fragment.len(), "fragment has a dangling byte, dropping it");
        }
        for pair in fragment.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Duration in seconds as declared by the written container.
pub fn clip_duration_secs(path: &Path) -> Result<f64, SpeechError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// File name for the `n`-th clip of a voice: `voice-<voice>-<nnn>.wav`.
pub fn clip_file_name(voice_key: &str, n: u32) -> String {
    format!("voice-{voice_key}-{n:03}.wav")
}

/// Next free sequence number for a voice in `dir`.
///
/// Scans existing `voice-<voice>-*.wav` names and returns max + 1, or 0 when
/// none exist. This is a non-atomic read-then-write scan: concurrent callers
/// targeting the same voice can collide on a number. Callers that introduce
/// parallelism must add their own lock around allocation and write.
pub fn next_file_number(dir: &Path, voice_key: &str) -> Result<u32, SpeechError> {
    if !dir.exists() {
        return Ok(0);
    }
    let prefix = format!("voice-{voice_key}-");
    let mut next = 0u32;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".wav") else { continue };
        let Some(seq) = stem.strip_prefix(&prefix) else { continue };
        if let Ok(n) = seq.parse::<u32>() {
            next = next.max(n + 1);
        }
    }
    Ok(next)
}

/// Base names of all generated clips in `dir`, sorted.
pub fn list_generated_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| n.ends_with(".wav"))
        .collect();
    names.sort();
    names
}
