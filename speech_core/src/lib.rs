//! Core pipeline for producing short narrated audio clips through a remote
//! generative speech API.
//!
//! One generation request runs admit -> stream -> assemble -> validate ->
//! record: the [`QuotaTracker`] gates the request against per-minute and
//! daily limits, a [`LiveSession`] streams base64 PCM fragments over a
//! bidirectional WebSocket, the fragments are concatenated into a mono
//! 16-bit 24 kHz WAV, an optional phonetic alignment check gates quality,
//! and one record is appended to the `labels.json` catalog.
//!
//! Requests are processed one at a time; the filename scan and catalog
//! append are not safe for concurrent callers sharing an output directory.

pub mod align;
pub mod catalog;
pub mod error;
pub mod quota;
pub mod session;
pub mod validation;
pub mod wav;

pub use align::{PhonemeAligner, ALIGNMENT_THRESHOLD};
pub use catalog::{Catalog, SampleRecord};
pub use error::SpeechError;
pub use quota::{Decision, QuotaLimits, QuotaTracker};
pub use session::{AudioFragment, LiveSession, MAX_SESSION_DURATION};
pub use validation::{validate_batch_size, validate_text, MAX_BATCH_SIZE, MAX_WORDS, MIN_WORDS};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use chrono::Local;
use futures_util::StreamExt;
use tracing::{info, warn};

/// The fixed set of prebuilt voices the speech API offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Voice {
    Aoede,
    Charon,
    Fenrir,
    Kore,
    Puck,
}

impl Voice {
    pub const ALL: [Voice; 5] = [
        Voice::Aoede,
        Voice::Charon,
        Voice::Fenrir,
        Voice::Kore,
        Voice::Puck,
    ];

    /// Name as the API expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Aoede => "Aoede",
            Voice::Charon => "Charon",
            Voice::Fenrir => "Fenrir",
            Voice::Kore => "Kore",
            Voice::Puck => "Puck",
        }
    }

    /// Lowercase key used for filenames and catalog speaker ids.
    pub fn key(&self) -> &'static str {
        match self {
            Voice::Aoede => "aoede",
            Voice::Charon => "charon",
            Voice::Fenrir => "fenrir",
            Voice::Kore => "kore",
            Voice::Puck => "puck",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Voice::Aoede => "Warm and engaging - perfect for storytelling and personal content",
            Voice::Charon => "Deep and authoritative - ideal for educational and serious topics",
            Voice::Fenrir => "Energetic and dynamic - great for gaming and action content",
            Voice::Kore => "Clear and professional - suited for tutorials and reviews",
            Voice::Puck => "Friendly and conversational - best for vlogs and casual content",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| {
                SpeechError::InvalidInput(format!(
                    "Unknown voice '{s}'. Available voices: {}",
                    Voice::ALL.map(|v| v.as_str()).join(", ")
                ))
            })
    }
}

/// Tone instructions appended to the setup-time system instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TonePreset {
    Default,
    Professional,
    Casual,
}

impl TonePreset {
    pub fn instruction(&self) -> &'static str {
        match self {
            TonePreset::Default => "TONE: READ TEXT EXACTLY AS WRITTEN, VERBATIM, WITHOUT ANY COMMENTARY OR RESPONSE",
            TonePreset::Professional => "TONE: READ TEXT VERBATIM WITH PROFESSIONAL CLARITY AND ENUNCIATION, NO COMMENTARY",
            TonePreset::Casual => "TONE: READ TEXT WORD FOR WORD WITH NATURAL PACING, NO ADDED CONVERSATION",
        }
    }
}

impl FromStr for TonePreset {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(TonePreset::Default),
            "professional" => Ok(TonePreset::Professional),
            "casual" => Ok(TonePreset::Casual),
            other => Err(SpeechError::InvalidInput(format!(
                "Unknown tone preset '{other}'. Use default, professional or casual."
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub output_dir: PathBuf,
    pub limits: QuotaLimits,
    /// Override the streaming endpoint (proxies, tests). `None` uses the
    /// production service.
    pub api_url: Option<String>,
    /// Probe for a phonetic backend and gate clips on alignment score.
    pub quality_validation: bool,
}

impl GeneratorConfig {
    pub fn new(api_key: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_key: api_key.into(),
            output_dir: output_dir.into(),
            limits: QuotaLimits::default(),
            api_url: None,
            quality_validation: true,
        }
    }
}

/// A successfully written and cataloged clip.
#[derive(Debug, Clone)]
pub struct ClipInfo {
    pub path: PathBuf,
    pub file_name: String,
    pub duration_seconds: f64,
    pub alignment_score: Option<f64>,
}

/// Outcome of one generation request that did not fail.
///
/// A stream that closes cleanly without delivering any audio is an empty
/// result, not an error.
#[derive(Debug, Clone)]
pub enum Generation {
    Clip(ClipInfo),
    NoAudio,
}

/// Drives the full request lifecycle, one request at a time.
pub struct SpeechGenerator {
    config: GeneratorConfig,
    quota: QuotaTracker,
    aligner: PhonemeAligner,
}

impl SpeechGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let aligner = if config.quality_validation {
            PhonemeAligner::detect()
        } else {
            PhonemeAligner::disabled()
        };
        Self::with_aligner(config, aligner)
    }

    /// Build with an explicit alignment backend instead of probing the
    /// environment for one.
    pub fn with_aligner(config: GeneratorConfig, aligner: PhonemeAligner) -> Self {
        let quota = QuotaTracker::with_limits(config.limits);
        Self {
            config,
            quota,
            aligner,
        }
    }

    pub fn aligner(&self) -> &PhonemeAligner {
        &self.aligner
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Base names of all clips generated so far, sorted.
    pub fn list_generated_files(&self) -> Vec<String> {
        wav::list_generated_files(&self.config.output_dir)
    }

    /// Generate one clip and return its path, or the empty-result condition.
    pub async fn generate(
        &mut self,
        text: &str,
        voice: Voice,
        tone: Option<&str>,
    ) -> Result<Generation, SpeechError> {
        self.generate_inner(text, voice, tone, None, Instant::now())
            .await
    }

    /// Generate clips for several texts, strictly sequentially.
    ///
    /// Each item gets its own admission check under a shared batch id;
    /// per-item failures are collected in the returned vector rather than
    /// aborting the batch.
    pub async fn generate_batch(
        &mut self,
        texts: &[String],
        voice: Voice,
        tone: Option<&str>,
    ) -> Result<Vec<Result<Generation, SpeechError>>, SpeechError> {
        validation::validate_batch_size(texts.len())?;
        let batch_id = format!("batch-{}", Local::now().format("%Y%m%d%H%M%S"));
        let session_start = Instant::now();

        let mut results = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            info!(item = i + 1, total = texts.len(), "processing batch item");
            let outcome = self
                .generate_inner(text, voice, tone, Some(&batch_id), session_start)
                .await;
            if let Err(e) = &outcome {
                warn!(item = i + 1, error = %e, "batch item failed");
            }
            results.push(outcome);
        }
        Ok(results)
    }

    async fn generate_inner(
        &mut self,
        text: &str,
        voice: Voice,
        tone: Option<&str>,
        batch_id: Option<&str>,
        session_start: Instant,
    ) -> Result<Generation, SpeechError> {
        validation::validate_text(text)?;

        let estimated_tokens = text.split_whitespace().count() as u64;
        match self.quota.admit(estimated_tokens, batch_id).await {
            Decision::Allowed => {}
            Decision::AllowedAfterDelay(secs) => {
                info!(waited_secs = secs, "admitted after quota delay")
            }
            Decision::Rejected(reason) => {
                warn!(%reason, "request rejected by quota");
                return Err(SpeechError::DailyLimitExceeded(
                    self.config.limits.requests_per_day,
                ));
            }
        }

        // Soft session budget, checked at connection-open time only. A
        // session already running is never interrupted by it.
        if session_start.elapsed() >= MAX_SESSION_DURATION {
            return Err(SpeechError::SessionBudgetExceeded);
        }

        std::fs::create_dir_all(&self.config.output_dir)?;
        let key = voice.key();
        let n = wav::next_file_number(&self.config.output_dir, key)?;
        let file_name = wav::clip_file_name(key, n);
        let path = self.config.output_dir.join(&file_name);

        info!(voice = key, file = %file_name, "connecting to speech API");
        let url = match &self.config.api_url {
            Some(url) => url.clone(),
            None => LiveSession::endpoint(&self.config.api_key),
        };
        let mut live = LiveSession::connect(&url, voice, tone).await?;
        live.send_turn(text).await?;

        let mut fragments: Vec<AudioFragment> = Vec::new();
        let stream = live.fragments();
        tokio::pin!(stream);
        while let Some(item) = stream.next().await {
            fragments.push(item?);
        }

        if fragments.is_empty() {
            info!("stream ended with no audio data received");
            return Ok(Generation::NoAudio);
        }

        wav::write_clip(&path, &fragments)?;

        let alignment = if self.aligner.is_active() {
            let aligner = self.aligner;
            let reference = text.to_string();
            let score =
                tokio::task::spawn_blocking(move || aligner.score(&reference, &reference))
                    .await
                    .map_err(|e| std::io::Error::other(format!("alignment task failed: {e}")))?;
            if !self.aligner.passes(score) {
                warn!(score, file = %file_name, "alignment below threshold, discarding clip");
                std::fs::remove_file(&path)?;
                return Err(SpeechError::QualityRejected { score });
            }
            Some(score)
        } else {
            None
        };

        let duration = wav::clip_duration_secs(&path)?;
        let file_size = std::fs::metadata(&path)?.len();
        catalog::append(
            &self.config.output_dir,
            SampleRecord {
                audio_file: file_name.clone(),
                text: text.to_string(),
                duration: (duration * 100.0).round() / 100.0,
                speaker_id: key.to_string(),
                timestamp: Local::now().to_rfc3339(),
                sample_rate: wav::WAVE_RATE,
                channels: wav::WAVE_CHANNELS,
                file_size,
                alignment_score: alignment,
                alignment_passed: alignment.map(|score| self.aligner.passes(score)),
            },
        )?;

        info!(file = %file_name, duration_secs = duration, "audio generated successfully");
        Ok(Generation::Clip(ClipInfo {
            path,
            file_name,
            duration_seconds: duration,
            alignment_score: alignment,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_parses_case_insensitively() {
        assert_eq!("puck".parse::<Voice>().unwrap(), Voice::Puck);
        assert_eq!("AOEDE".parse::<Voice>().unwrap(), Voice::Aoede);
        assert!("narrator".parse::<Voice>().is_err());
    }

    #[test]
    fn voice_keys_are_lowercase_names() {
        for voice in Voice::ALL {
            assert_eq!(voice.key(), voice.as_str().to_lowercase());
            assert!(!voice.description().is_empty());
        }
    }

    #[test]
    fn tone_presets_parse() {
        assert_eq!(
            "professional".parse::<TonePreset>().unwrap(),
            TonePreset::Professional
        );
        assert!("shouty".parse::<TonePreset>().is_err());
        assert!(TonePreset::Default.instruction().starts_with("TONE:"));
    }
}
