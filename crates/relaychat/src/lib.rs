//! relaychat - Streaming chat relay for Ollama-style generation services
//!
//! This crate provides a small HTTP server that forwards prompts to a
//! text-generation backend and relays its token stream to clients as
//! server-sent events or newline-delimited JSON, with per-client rate
//! limiting. The `stream` module also carries the client-side decoder.

pub mod config;
pub mod error;
pub mod limiter;
pub mod relay;
pub mod stream;
pub mod upstream;

pub use error::RelayError;
