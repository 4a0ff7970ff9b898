//! Input checks applied before any text reaches the model.

use crate::config::TransformConfig;
use crate::errors::{Error, Result};

use super::Level;

/// Characters that make the input look like markup or code rather than prose.
pub const MARKUP_CHARACTERS: &[char] = &['<', '>', '{', '}', '(', ')', '[', ']', '\'', '"'];

/// Trim and check a passage, returning the trimmed text.
pub fn validate_text<'a>(text: &'a str, config: &TransformConfig) -> Result<&'a str> {
    let text = text.trim();

    if text.is_empty() {
        return Err(Error::BadRequest {
            message: "Text cannot be empty".to_string(),
        });
    }

    if config.reject_markup_characters && text.contains(MARKUP_CHARACTERS) {
        return Err(Error::BadRequest {
            message: "Text contains invalid characters".to_string(),
        });
    }

    if text.chars().count() > config.max_text_chars {
        return Err(Error::BadRequest {
            message: format!("Text exceeds {} characters", config.max_text_chars),
        });
    }

    Ok(text)
}

/// Missing levels default to the gentlest transformation.
pub fn validate_level(level: Option<i64>) -> Result<Level> {
    match level {
        None => Ok(Level::default()),
        Some(value) => Level::try_from(value).map_err(|_| Error::BadRequest {
            message: "Level must be between 1 and 5".to_string(),
        }),
    }
}
