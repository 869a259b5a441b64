//! Anthropic (Claude) remote backend
//!
//! This module provides the remote hosted generation backend.

pub mod client;
pub mod provider;
pub mod types;

pub use client::AnthropicClient;
pub use provider::RemoteProvider;
