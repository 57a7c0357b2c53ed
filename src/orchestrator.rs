//! Query handling: retrieve, build the prompt, stream the answer.
//!
//! Three entry points share the same read path:
//! - [`StreamingOrchestrator::respond_text`]: one-shot text stream.
//! - [`StreamingOrchestrator::respond_audio`]: one-shot audio stream.
//! - [`StreamingOrchestrator::run_turn`]: one websocket turn. Audio
//!   fragments go to the sink as they are produced, then the turn's memo
//!   is sent as a single text frame and cleared.
//!
//! Errors raised before the first fragment are returned to the caller.
//! After that, a failure ends the stream early; fragments already sent
//! stay sent.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use tracing::debug;

use crate::error::{Error, TransportError};
use crate::generation::{AudioStream, GenerationEngine, Prompt, TextStream};
use crate::retriever::Retriever;
use crate::session::{parse_frame, SessionState};

/// A frame the websocket transport should send.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Audio(Bytes),
    Text(String),
}

/// What one completed websocket turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub message: String,
    pub audio_frames: usize,
    pub text: String,
}

pub struct StreamingOrchestrator {
    retriever: Retriever,
    engine: Arc<GenerationEngine>,
    system_prompt: String,
}

impl StreamingOrchestrator {
    pub fn new(retriever: Retriever, engine: Arc<GenerationEngine>, system_prompt: String) -> Self {
        Self {
            retriever,
            engine,
            system_prompt,
        }
    }

    async fn prompt(&self, user_message: &str) -> Result<Prompt, Error> {
        let context = self.retriever.retrieve(user_message).await?;
        Ok(Prompt::assemble(
            self.system_prompt.clone(),
            &context,
            user_message,
        ))
    }

    pub async fn respond_text(&self, user_message: &str) -> Result<TextStream, Error> {
        let prompt = self.prompt(user_message).await?;
        Ok(self.engine.stream_text(&prompt).await?)
    }

    pub async fn respond_audio(&self, user_message: &str) -> Result<AudioStream, Error> {
        let prompt = self.prompt(user_message).await?;
        Ok(self.engine.stream_audio(&prompt).await?)
    }

    /// Runs one turn for `frame`. The memo is empty afterwards whether the
    /// turn succeeds or fails.
    pub async fn run_turn<S>(
        &self,
        session: &SessionState,
        frame: &str,
        sink: &mut S,
    ) -> Result<TurnOutcome, Error>
    where
        S: Sink<Outbound> + Unpin,
        S::Error: Display,
    {
        let result = self.turn(session, frame, sink).await;
        if result.is_err() {
            session.memo.take();
        }
        result
    }

    async fn turn<S>(
        &self,
        session: &SessionState,
        frame: &str,
        sink: &mut S,
    ) -> Result<TurnOutcome, Error>
    where
        S: Sink<Outbound> + Unpin,
        S::Error: Display,
    {
        let message = parse_frame(frame)?;
        debug!(connection_id = %session.connection_id, chars = message.len(), "turn started");

        let prompt = self.prompt(&message).await?;
        let mut audio = self
            .engine
            .stream_text_audio(&prompt, session.memo.clone())
            .await?;

        let mut audio_frames = 0;
        while let Some(chunk) = audio.next().await {
            sink.send(Outbound::Audio(chunk?))
                .await
                .map_err(|e| TransportError::Send(e.to_string()))?;
            audio_frames += 1;
        }

        let text = session.finish_turn();
        sink.send(Outbound::Text(text.clone()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        debug!(
            connection_id = %session.connection_id,
            audio_frames,
            chars = text.len(),
            "turn complete"
        );
        Ok(TurnOutcome {
            message,
            audio_frames,
            text,
        })
    }
}
