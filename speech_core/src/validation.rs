use crate::error::SpeechError;

/// Maximum word count for one narration request
pub const MAX_WORDS: usize = 200;
/// Minimum word count for one narration request
pub const MIN_WORDS: usize = 10;
/// Maximum number of texts in one batch
pub const MAX_BATCH_SIZE: usize = 100;

/// Validate narration text before any quota or network work happens.
pub fn validate_text(text: &str) -> Result<(), SpeechError> {
    if text.trim().is_empty() {
        return Err(SpeechError::InvalidInput("Text cannot be empty".to_string()));
    }
    let word_count = text.split_whitespace().count();
    if word_count > MAX_WORDS {
        return Err(SpeechError::InvalidInput(format!(
            "Text too long ({word_count} words). Please limit to {MAX_WORDS} words for optimal audio quality."
        )));
    }
    if word_count < MIN_WORDS {
        return Err(SpeechError::InvalidInput(format!(
            "Text too short ({word_count} words). Please provide at least {MIN_WORDS} words."
        )));
    }
    Ok(())
}

/// Validate batch size
pub fn validate_batch_size(size: usize) -> Result<(), SpeechError> {
    if size < 1 {
        return Err(SpeechError::InvalidInput(
            "Batch size must be at least 1".to_string(),
        ));
    }
    if size > MAX_BATCH_SIZE {
        return Err(SpeechError::InvalidInput(format!(
            "Batch size too large. Maximum is {MAX_BATCH_SIZE} items."
        )));
    }
    Ok(())
}
