//! OpenAI chat completions (streamed over SSE) and text-to-speech.
//!
//! Both work against any OpenAI-compatible server via `url`; the key is
//! read from `OPENAI_API_KEY`. Requests are retried with backoff until the
//! response headers arrive. Once a stream is open it is never replayed.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};

use super::{AudioStream, Prompt, SpeechSynthesizer, TextGenerator, TextStream};
use crate::config::{GenerationConfig, SpeechConfig};
use crate::error::GenerationError;
use crate::http::send_with_retry;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

fn api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))
}

pub struct OpenAIChatGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAIChatGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key: api_key()?,
            model,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAIChatGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn stream_text(&self, prompt: &Prompt) -> Result<TextStream, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": prompt.to_messages(),
            "temperature": self.temperature,
            "stream": true,
        });
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = send_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await
        .map_err(GenerationError::Unavailable)?;

        Ok(chat_sse_stream(response.bytes_stream()))
    }
}

/// Turns a chat-completions SSE body into its `delta.content` fragments,
/// stopping at the `[DONE]` sentinel.
pub(crate) fn chat_sse_stream<S, E>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let events = bytes
        .eventsource()
        .take_while(|event| {
            let done = matches!(event, Ok(ev) if ev.data.trim() == "[DONE]");
            futures::future::ready(!done)
        })
        .filter_map(|event| async move {
            match event {
                Ok(ev) => parse_chat_delta(&ev.data).transpose(),
                Err(e) => Some(Err(GenerationError::Provider(format!(
                    "SSE stream error: {}",
                    e
                )))),
            }
        });
    Box::pin(events)
}

fn parse_chat_delta(data: &str) -> Result<Option<String>, GenerationError> {
    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| GenerationError::Provider(format!("failed to parse chunk: {}", e)))?;
    if let Some(err) = json.get("error") {
        return Err(GenerationError::Provider(err.to_string()));
    }
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}

/// Text-to-speech via `POST /audio/speech`, streaming the encoded body.
pub struct OpenAISpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    format: String,
    media_type: &'static str,
}

impl OpenAISpeech {
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key: api_key()?,
            model: config.model.clone(),
            voice: config.voice.clone(),
            format: config.format.clone(),
            media_type: media_type_for(&config.format)?,
        })
    }
}

/// MIME type for an OpenAI `response_format`.
pub fn media_type_for(format: &str) -> Result<&'static str> {
    match format {
        "mp3" => Ok("audio/mpeg"),
        "opus" => Ok("audio/ogg"),
        "aac" => Ok("audio/aac"),
        "flac" => Ok("audio/flac"),
        "wav" => Ok("audio/wav"),
        "pcm" => Ok("audio/pcm"),
        other => anyhow::bail!(
            "Unknown speech format: '{}'. Must be mp3, opus, aac, flac, wav, or pcm.",
            other
        ),
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAISpeech {
    fn media_type(&self) -> &str {
        self.media_type
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "response_format": self.format,
        });
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));

        let response = send_with_retry("OpenAI speech", 0, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await
        .map_err(GenerationError::Unavailable)?;

        Ok(Box::pin(response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| GenerationError::Provider(format!("audio stream error: {}", e)))
        })))
    }
}
