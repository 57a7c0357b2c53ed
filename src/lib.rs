//! # Lectio
//!
//! A retrieval-augmented reading companion. Upload a document, ask about
//! it, and get the answer streamed back as text or as synthesized speech,
//! either per request or over a long-lived websocket session.
//!
//! ## Architecture
//!
//! ```text
//! upload ──▶ extract ──▶ chunk ──▶ embed ──▶ VectorMemory
//!                                                │
//! query ──▶ embed ──▶ search ◀────────────────────┘
//!                       │
//!                       ▼
//!                    Prompt ──▶ TextGenerator ──▶ text stream
//!                                      │
//!                                      └──▶ sentences ──▶ SpeechSynthesizer ──▶ audio stream
//! ```
//!
//! Nothing is persisted: the vector memory lives for the lifetime of the
//! process and is cleared on shutdown.
//!
//! ## Quick Start
//!
//! ```bash
//! lectio serve                                  # offline defaults
//! curl -F file=@notes.txt localhost:8000/       # ingest
//! curl -d '{"message":"What is in the notes?"}' \
//!      -H 'content-type: application/json' localhost:8000/text
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`hash`] | Document identifiers and content hashes |
//! | [`extract`] | Document loading and text extraction |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`memory`] | In-memory vector store |
//! | [`ingest`] | Ingestion pipeline, uploads, directory preload |
//! | [`retriever`] | Query-time retrieval |
//! | [`generation`] | Streaming text and speech generation |
//! | [`session`] | Websocket session state and connection registry |
//! | [`orchestrator`] | Text, audio and websocket-turn entry points |
//! | [`context`] | Process-wide application context |
//! | [`server`] | HTTP and websocket transport |

pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod hash;
mod http;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod server;
pub mod session;
