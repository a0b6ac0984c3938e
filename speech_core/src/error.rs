use thiserror::Error;

/// Failures of a single generation request.
///
/// Per-message decode failures inside a streaming session are logged and
/// skipped; everything here aborts the request that raised it. The process
/// is expected to keep running across individual request failures.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Daily limit exceeded: {0} requests per day")]
    DailyLimitExceeded(u32),

    /// Connection-level streaming failure. No automatic retry is attempted;
    /// retry, if any, is the caller's responsibility per request.
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Streaming session error: {0}")]
    Stream(String),

    #[error("Session duration limit exceeded (15 minutes)")]
    SessionBudgetExceeded,

    /// Alignment score fell below the acceptance threshold while the
    /// phonetic backend was active. The produced audio has been discarded.
    #[error("Low audio quality detected (alignment score {score:.3} below threshold)")]
    QualityRejected { score: f64 },

    #[error("Audio write error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
