// Configuration from the environment for the narrate binary.

use std::path::PathBuf;

use speech_core::QuotaLimits;

#[derive(Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub output_dir: PathBuf,
    pub limits: QuotaLimits,
    pub quality_validation: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY is not set"))?;

        let output_dir = std::env::var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("generated_audio"));

        let mut limits = QuotaLimits::default();
        if let Some(rpm) = env_parse("RATE_LIMIT_RPM") {
            limits.requests_per_minute = rpm;
        }
        if let Some(tpm) = env_parse("RATE_LIMIT_TPM") {
            limits.tokens_per_minute = tpm;
        }
        if let Some(rpd) = env_parse("RATE_LIMIT_RPD") {
            limits.requests_per_day = rpd;
        }

        let quality_validation = std::env::var("QUALITY_VALIDATION")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        Ok(Self {
            api_key,
            output_dir,
            limits,
            quality_validation,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
