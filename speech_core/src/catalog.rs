//! Append-only metadata catalog for produced clips.
//!
//! One `labels.json` document per output directory holds an ordered list of
//! sample records. Every append is a read-modify-write of the whole
//! document; there is no locking, so two concurrent writers can lose one
//! update (last write wins). Single-writer discipline is required before
//! parallelizing generation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SpeechError;

pub const CATALOG_FILE: &str = "labels.json";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub samples: Vec<SampleRecord>,
}

/// Metadata for one produced clip. Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub audio_file: String,
    pub text: String,
    /// Seconds, rounded to two decimals.
    pub duration: f64,
    pub speaker_id: String,
    /// RFC 3339 local timestamp of the append.
    pub timestamp: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment_passed: Option<bool>,
}

fn catalog_path(dir: &Path) -> PathBuf {
    dir.join(CATALOG_FILE)
}

/// Read the catalog for `dir`, or an empty one if none exists yet.
pub fn load(dir: &Path) -> Result<Catalog, SpeechError> {
    let path = catalog_path(dir);
    if !path.exists() {
        return Ok(Catalog::default());
    }
    let text = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Append one record and rewrite the whole document, pretty-printed for
/// diffability.
pub fn append(dir: &Path, record: SampleRecord) -> Result<(), SpeechError> {
    let mut catalog = load(dir)?;
    catalog.samples.push(record);
    let text = serde_json::to_string_pretty(&catalog)?;
    std::fs::write(catalog_path(dir), text)?;
    Ok(())
}
