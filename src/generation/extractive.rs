//! Offline generator that reads the retrieved passages back.
//!
//! Useful without any model at all: the answer is the most relevant text
//! in the user's own document, streamed a word at a time like a model
//! would.

use async_trait::async_trait;
use futures::stream;

use super::{Prompt, TextGenerator, TextStream};
use crate::error::GenerationError;

pub const NO_CONTEXT_ANSWER: &str =
    "I could not find anything about that in the uploaded documents.";

#[derive(Debug, Default)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextGenerator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn stream_text(&self, prompt: &Prompt) -> Result<TextStream, GenerationError> {
        let source = if prompt.context.trim().is_empty() {
            NO_CONTEXT_ANSWER.to_string()
        } else {
            prompt.context.clone()
        };
        let words: Vec<Result<String, GenerationError>> = source
            .split_inclusive(char::is_whitespace)
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(words)))
    }
}
