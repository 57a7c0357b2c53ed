//! Chat generation against a local Ollama instance (`POST /api/chat`).
//!
//! Ollama streams newline-delimited JSON objects; each carries a
//! `message.content` fragment and the last one has `"done": true`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use super::{Prompt, TextGenerator, TextStream};
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::http::send_with_retry;

const OLLAMA_URL: &str = "http://localhost:11434";

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            model,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn stream_text(&self, prompt: &Prompt) -> Result<TextStream, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": prompt.to_messages(),
            "stream": true,
            "options": { "temperature": self.temperature },
        });
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));

        let response = send_with_retry("Ollama", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await
        .map_err(GenerationError::Unavailable)?;

        Ok(chat_ndjson_stream(response.bytes_stream()))
    }
}

/// Splits a byte stream into lines, whatever the chunk boundaries.
fn ndjson_lines<S, E>(bytes: S) -> impl Stream<Item = Result<Vec<u8>, GenerationError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (Box::pin(bytes), Vec::<u8>::new(), false);
    stream::unfold(state, |(mut bytes, mut buf, finished)| async move {
        if finished {
            return None;
        }
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                return Some((Ok(line), (bytes, buf, false)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    let err = GenerationError::Provider(format!("stream error: {}", e));
                    return Some((Err(err), (bytes, buf, true)));
                }
                None if buf.is_empty() => return None,
                None => {
                    let line = std::mem::take(&mut buf);
                    return Some((Ok(line), (bytes, buf, true)));
                }
            }
        }
    })
}

pub(crate) fn chat_ndjson_stream<S, E>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(ndjson_lines(bytes).filter_map(|line| async move {
        match line {
            Ok(line) => parse_chat_line(&line).transpose(),
            Err(e) => Some(Err(e)),
        }
    }))
}

fn parse_chat_line(line: &[u8]) -> Result<Option<String>, GenerationError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| GenerationError::Provider(format!("failed to parse line: {}", e)))?;
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        return Err(GenerationError::Provider(err.to_string()));
    }
    Ok(json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}
