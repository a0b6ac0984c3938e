//! Phonetic alignment scoring between requested and synthesized text.
//!
//! The score compares the two texts word by word after converting each word
//! to its IPA representation with the system `espeak-ng` binary. In this
//! system both texts are normally the same string (the API is instructed to
//! read verbatim), so the check validates phonemizer self-consistency, not
//! the produced audio. When no espeak binary is installed, scoring degrades
//! to a no-op that always passes rather than blocking generation.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{info, warn};

/// Minimum acceptable alignment score.
pub const ALIGNMENT_THRESHOLD: f64 = 0.8;

/// Characters stripped when deciding whether a phonemized token is junk.
const JUNK_CHARS: &str = "1234567890,.;:-?!'\"()$%\u{2013}\u{2014}\u{201c}\u{201d}\u{2018}\u{2019}";

#[derive(Debug, Clone, Copy)]
struct EspeakBackend {
    program: &'static str,
}

impl EspeakBackend {
    fn detect() -> Option<Self> {
        for program in ["espeak-ng", "espeak"] {
            let probe = Command::new(program)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if matches!(probe, Ok(status) if status.success()) {
                info!(program, "phonetic backend available");
                return Some(Self { program });
            }
        }
        info!("no espeak binary found, audio quality validation disabled");
        None
    }

    /// IPA representation of each word, one per input word.
    fn phonemize(&self, words: &[&str]) -> std::io::Result<Vec<String>> {
        let mut child = Command::new(self.program)
            .args(["--ipa", "-q", "-v", "en-us"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        // One word per line yields one phoneme line per word.
        if let Some(stdin) = child.stdin.take() {
            let mut stdin = stdin;
            stdin.write_all(words.join("\n").as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
enum Backend {
    Espeak(EspeakBackend),
    Custom(fn(&str, &str) -> f64),
}

/// Quality gate over phonetic alignment, degradable to a no-op.
#[derive(Debug, Clone, Copy)]
pub struct PhonemeAligner {
    backend: Option<Backend>,
}

impl PhonemeAligner {
    /// Probe for an espeak binary once and keep the result.
    pub fn detect() -> Self {
        Self {
            backend: EspeakBackend::detect().map(Backend::Espeak),
        }
    }

    /// An aligner that always scores 1.0 and always passes.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    /// An active aligner scoring with a caller-supplied function instead of
    /// an espeak subprocess.
    pub fn with_scorer(scorer: fn(&str, &str) -> f64) -> Self {
        Self {
            backend: Some(Backend::Custom(scorer)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.backend.is_some()
    }

    /// Similarity in [0, 1] between the two texts' phonetic sequences.
    ///
    /// Returns 1.0 when the backend is unavailable or fails, so a broken
    /// phonemizer install never blocks generation.
    pub fn score(&self, reference: &str, produced: &str) -> f64 {
        let backend = match &self.backend {
            None => return 1.0,
            Some(Backend::Custom(scorer)) => return scorer(reference, produced),
            Some(Backend::Espeak(backend)) => backend,
        };
        let ref_words: Vec<&str> = reference.split_whitespace().collect();
        let prod_words: Vec<&str> = produced.split_whitespace().collect();

        let (ph_ref, ph_prod) = match (backend.phonemize(&ref_words), backend.phonemize(&prod_words))
        {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "phonemizer failed, skipping quality validation");
                return 1.0;
            }
        };
        score_sequences(&ph_ref, &ph_prod)
    }

    /// Accept or reject a score against the fixed threshold. Always accepts
    /// when the backend is unavailable.
    pub fn passes(&self, score: f64) -> bool {
        !self.is_active() || score >= ALIGNMENT_THRESHOLD
    }
}

/// Longest common contiguous run over junk-stripped phoneme sequences,
/// normalized by the produced sequence length.
fn score_sequences(reference: &[String], produced: &[String]) -> f64 {
    let a: Vec<&String> = reference.iter().filter(|w| !is_junk(w)).collect();
    let b: Vec<&String> = produced.iter().filter(|w| !is_junk(w)).collect();
    if b.is_empty() {
        return 0.0;
    }
    longest_common_run(&a, &b) as f64 / b.len() as f64
}

fn is_junk(word: &str) -> bool {
    word.trim_matches(|c| JUNK_CHARS.contains(c)).is_empty()
}

fn longest_common_run(a: &[&String], b: &[&String]) -> usize {
    // Row-by-row DP over run lengths ending at (i, j).
    let mut best = 0usize;
    let mut prev = vec![0usize; b.len() + 1];
    for x in a {
        let mut row = vec![0usize; b.len() + 1];
        for (j, y) in b.iter().enumerate() {
            if x == y {
                row[j + 1] = prev[j] + 1;
                best = best.max(row[j + 1]);
            }
        }
        prev = row;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn disabled_aligner_always_passes() {
        let aligner = PhonemeAligner::disabled();
        assert!(!aligner.is_active());
        assert_eq!(aligner.score("completely", "different"), 1.0);
        assert!(aligner.passes(0.0));
    }

    #[test]
    fn identical_sequences_score_one() {
        let ph = seq(&["h\u{0259}\u{02c8}lo\u{028a}", "w\u{025c}\u{02d0}ld"]);
        assert_eq!(score_sequences(&ph, &ph), 1.0);
    }

    #[test]
    fn partial_overlap_scores_the_common_run() {
        let reference = seq(&["a", "b", "c", "d"]);
        let produced = seq(&["x", "b", "c", "y"]);
        // Longest common run is "b c", produced length 4.
        assert_eq!(score_sequences(&reference, &produced), 0.5);
    }

    #[test]
    fn empty_produced_sequence_scores_zero() {
        let reference = seq(&["a", "b"]);
        assert_eq!(score_sequences(&reference, &[]), 0.0);
    }

    #[test]
    fn junk_tokens_are_stripped_before_matching() {
        assert!(is_junk("123"));
        assert!(is_junk("?!"));
        assert!(is_junk("\"...\""));
        assert!(!is_junk("word"));
        assert!(!is_junk("it's"));

        let reference = seq(&["a", "!!", "b"]);
        let produced = seq(&["a", "42", "b"]);
        assert_eq!(score_sequences(&reference, &produced), 1.0);
    }

    #[test]
    fn threshold_gates_active_scores() {
        let aligner = PhonemeAligner::disabled();
        assert!(aligner.passes(0.1));

        // An active aligner applies the threshold.
        let active = PhonemeAligner::with_scorer(|_, _| 0.0);
        assert!(active.passes(0.8));
        assert!(active.passes(0.95));
        assert!(!active.passes(0.79));
    }

    #[test]
    fn custom_scorer_is_active_and_consulted() {
        let aligner = PhonemeAligner::with_scorer(|reference, produced| {
            if reference == produced {
                1.0
            } else {
                0.25
            }
        });
        assert!(aligner.is_active());
        assert_eq!(aligner.score("same text", "same text"), 1.0);
        assert_eq!(aligner.score("same text", "other text"), 0.25);
    }
}
