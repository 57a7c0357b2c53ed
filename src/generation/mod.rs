//! Streaming text and speech generation.
//!
//! Two capabilities are pluggable:
//! - [`TextGenerator`]: prompt → stream of text fragments.
//! - [`SpeechSynthesizer`]: sentence → stream of encoded audio bytes.
//!
//! [`GenerationEngine`] composes one of each into the three streams the
//! orchestrator serves: plain text, audio, and audio that records its text
//! into a session [`Memo`] as it goes. Audio is produced by cutting the
//! text stream into sentences ([`SentenceBuffer`]) and synthesizing them in
//! order, so playback can start before generation finishes.
//!
//! Every stream the engine hands out is wrapped in an idle timeout: if the
//! provider goes quiet for longer than `generation.idle_timeout_secs`, the
//! stream yields [`GenerationError::Timeout`] and ends.

mod extractive;
mod ollama;
mod openai;

pub use extractive::{ExtractiveGenerator, NO_CONTEXT_ANSWER};
pub use ollama::OllamaGenerator;
pub use openai::{OpenAIChatGenerator, OpenAISpeech};

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;

use crate::config::{Config, GenerationConfig, SpeechConfig};
use crate::error::GenerationError;
use crate::retriever::RetrievedContext;
use crate::session::Memo;

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, GenerationError>> + Send>>;

/// Shortest text handed to the synthesizer, in characters. Shorter
/// sentences are merged with the next one.
pub const MIN_SENTENCE_CHARS: usize = 12;

/// A user message plus the retrieved passages that ground the answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub context: String,
    pub user_message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl Prompt {
    pub fn assemble(
        system: impl Into<String>,
        context: &RetrievedContext,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            context: context.text(),
            user_message: user_message.into(),
        }
    }

    /// The user turn, with the passages in a context block when there are any.
    pub fn user_content(&self) -> String {
        if self.context.trim().is_empty() {
            self.user_message.clone()
        } else {
            format!(
                "Context:\n{}\n\nQuestion: {}",
                self.context, self.user_message
            )
        }
    }

    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if !self.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: self.system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: self.user_content(),
        });
        messages
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Starts a fresh generation. Fragments arrive as the model emits them.
    async fn stream_text(&self, prompt: &Prompt) -> Result<TextStream, GenerationError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// MIME type of the bytes [`synthesize`](Self::synthesize) produces.
    fn media_type(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, GenerationError>;
}

/// Speech provider used when `speech.provider = "disabled"`.
pub struct DisabledSpeech;

#[async_trait]
impl SpeechSynthesizer for DisabledSpeech {
    fn media_type(&self) -> &str {
        "audio/mpeg"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn synthesize(&self, _text: &str) -> Result<AudioStream, GenerationError> {
        Err(GenerationError::Disabled("speech"))
    }
}

pub struct GenerationEngine {
    text: Arc<dyn TextGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    idle_timeout: Duration,
}

impl GenerationEngine {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        speech: Arc<dyn SpeechSynthesizer>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            text,
            speech,
            idle_timeout,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            create_generator(&config.generation)?,
            create_synthesizer(&config.speech)?,
            Duration::from_secs(config.generation.idle_timeout_secs),
        ))
    }

    pub fn generator_name(&self) -> &str {
        self.text.name()
    }

    /// MIME type of the audio streams.
    pub fn media_type(&self) -> &str {
        self.speech.media_type()
    }

    pub async fn stream_text(&self, prompt: &Prompt) -> Result<TextStream, GenerationError> {
        let opened = tokio::time::timeout(self.idle_timeout, self.text.stream_text(prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.idle_timeout))??;
        Ok(with_idle_timeout(opened, self.idle_timeout))
    }

    pub async fn stream_audio(&self, prompt: &Prompt) -> Result<AudioStream, GenerationError> {
        self.speak(prompt, None).await
    }

    /// Like [`stream_audio`](Self::stream_audio), appending every text
    /// fragment to `memo` as it is generated.
    pub async fn stream_text_audio(
        &self,
        prompt: &Prompt,
        memo: Memo,
    ) -> Result<AudioStream, GenerationError> {
        self.speak(prompt, Some(memo)).await
    }

    async fn speak(&self, prompt: &Prompt, memo: Option<Memo>) -> Result<AudioStream, GenerationError> {
        if !self.speech.is_enabled() {
            return Err(GenerationError::Disabled("speech"));
        }
        let text = self.stream_text(prompt).await?;
        Ok(speak(
            text,
            Arc::clone(&self.speech),
            memo,
            self.idle_timeout,
        ))
    }
}

struct SpeakState {
    text: Option<TextStream>,
    speech: Arc<dyn SpeechSynthesizer>,
    sentences: SentenceBuffer,
    pending: VecDeque<String>,
    current: Option<AudioStream>,
    memo: Option<Memo>,
    idle_timeout: Duration,
}

impl SpeakState {
    /// Ends the stream after the item being returned.
    fn stop(&mut self) {
        self.text = None;
        self.pending.clear();
        self.current = None;
    }
}

fn speak(
    text: TextStream,
    speech: Arc<dyn SpeechSynthesizer>,
    memo: Option<Memo>,
    idle_timeout: Duration,
) -> AudioStream {
    let state = SpeakState {
        text: Some(text),
        speech,
        sentences: SentenceBuffer::new(MIN_SENTENCE_CHARS),
        pending: VecDeque::new(),
        current: None,
        memo,
        idle_timeout,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(audio) = st.current.as_mut() {
                match audio.next().await {
                    Some(Ok(bytes)) => return Some((Ok(bytes), st)),
                    Some(Err(e)) => {
                        st.stop();
                        return Some((Err(e), st));
                    }
                    None => st.current = None,
                }
                continue;
            }

            if let Some(sentence) = st.pending.pop_front() {
                let opened =
                    tokio::time::timeout(st.idle_timeout, st.speech.synthesize(&sentence)).await;
                match opened {
                    Ok(Ok(audio)) => st.current = Some(with_idle_timeout(audio, st.idle_timeout)),
                    Ok(Err(e)) => {
                        st.stop();
                        return Some((Err(e), st));
                    }
                    Err(_) => {
                        let timeout = st.idle_timeout;
                        st.stop();
                        return Some((Err(GenerationError::Timeout(timeout)), st));
                    }
                }
                continue;
            }

            let text = st.text.as_mut()?;
            match text.next().await {
                Some(Ok(fragment)) => {
                    let ready = st.sentences.push(&fragment);
                    st.pending.extend(ready);
                    if let Some(memo) = &st.memo {
                        memo.push(fragment);
                    }
                }
                Some(Err(e)) => {
                    st.stop();
                    return Some((Err(e), st));
                }
                None => {
                    st.text = None;
                    st.pending.extend(st.sentences.finish());
                }
            }
        }
    }))
}

/// Ends `inner` with [`GenerationError::Timeout`] if no item arrives within
/// `idle`. The stream also ends after the first error it yields.
pub fn with_idle_timeout<T: Send + 'static>(
    inner: Pin<Box<dyn Stream<Item = Result<T, GenerationError>> + Send>>,
    idle: Duration,
) -> Pin<Box<dyn Stream<Item = Result<T, GenerationError>> + Send>> {
    Box::pin(stream::unfold(Some(inner), move |state| async move {
        let mut inner = state?;
        match tokio::time::timeout(idle, inner.next()).await {
            Ok(Some(Ok(item))) => Some((Ok(item), Some(inner))),
            Ok(Some(Err(e))) => Some((Err(e), None)),
            Ok(None) => None,
            Err(_) => Some((Err(GenerationError::Timeout(idle)), None)),
        }
    }))
}

/// Accumulates streamed text and releases complete sentences.
///
/// A sentence ends at `.`, `!`, `?` or `;` followed by whitespace, at a
/// newline, or at a CJK full stop. Candidates shorter than `min_chars` are
/// held back and merged with what follows.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    buf: String,
    min_chars: usize,
}

impl SentenceBuffer {
    pub fn new(min_chars: usize) -> Self {
        Self {
            buf: String::new(),
            min_chars,
        }
    }

    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buf.push_str(fragment);

        let mut out = Vec::new();
        let mut start = 0;
        let mut chars = self.buf.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let boundary = match c {
                '\n' | '。' | '！' | '？' => true,
                '.' | '!' | '?' | ';' => matches!(chars.peek(), Some((_, next)) if next.is_whitespace()),
                _ => false,
            };
            if !boundary {
                continue;
            }
            let end = i + c.len_utf8();
            let sentence = self.buf[start..end].trim();
            if sentence.chars().count() >= self.min_chars {
                out.push(sentence.to_string());
                start = end;
            }
        }

        self.buf.drain(..start);
        out
    }

    /// Returns whatever text remains, if any.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

/// Create the [`TextGenerator`] named by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator::new())),
        "openai" => Ok(Arc::new(OpenAIChatGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Create the [`SpeechSynthesizer`] named by `speech.provider`.
pub fn create_synthesizer(config: &SpeechConfig) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledSpeech)),
        "openai" => Ok(Arc::new(OpenAISpeech::new(config)?)),
        other => bail!("Unknown speech provider: {}", other),
    }
}
