//! Ollama provider implementation (local models)
//!
//! Text generation against a local Ollama server. Local calls are free.

pub mod provider;
pub mod types;

pub use provider::LocalProvider;
