//! System prompts and model choice for each transformation.

use crate::config::OpenAiConfig;

use super::{Level, TransformationType};

const BASE_INSTRUCTION: &str = "You are a helpful assistant that transforms text. ";

const LECTURE_INSTRUCTION: &str = " The text was selected from lecture slides: keep subject-specific terminology, \
     and keep list or heading structure where present.";

/// Build the system message for a transformation.
pub fn system_message(kind: TransformationType, level: Level, is_lecture: bool) -> String {
    let level = level.get();
    let instruction = match kind {
        TransformationType::Simplify => format!(
            "Simplify the text to a level {level} (1=elementary, 5=high school). \
             Maintain key information while making it easier to understand."
        ),
        TransformationType::Sophisticate => format!(
            "Make the text more sophisticated to level {level} (1=professional, 5=academic expert). \
             Enhance vocabulary and complexity while maintaining clarity."
        ),
        TransformationType::Casualise => format!(
            "Make the text more casual to level {level} (1=friendly, 5=very informal). \
             Maintain meaning while making it more conversational."
        ),
        TransformationType::Formalise => format!(
            "Make the text more formal to level {level} (1=business, 5=legal/technical). \
             Increase professionalism while maintaining clarity."
        ),
    };

    let mut message = String::with_capacity(BASE_INSTRUCTION.len() + instruction.len() + LECTURE_INSTRUCTION.len());
    message.push_str(BASE_INSTRUCTION);
    message.push_str(&instruction);
    if is_lecture {
        message.push_str(LECTURE_INSTRUCTION);
    }
    message
}

/// Levels 2 and 3 are light enough for the standard model; the extremes need the stronger one.
pub fn select_model(level: Level, config: &OpenAiConfig) -> &str {
    match level.get() {
        2 | 3 => &config.standard_model,
        _ => &config.advanced_model,
    }
}
