//! LLM client abstraction.
//!
//! This module provides a unified interface for completions and embeddings
//! backed by the Anthropic API, plus request/response types and a cost
//! tracker shared by the interactive controller and sub-call router.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rlm_engine::llm::{AnthropicClient, ClientConfig, CompletionRequest, ChatMessage};
//!
//! let client = AnthropicClient::new(
//!     ClientConfig::new("your-api-key")
//!         .with_default_model("claude-3-5-sonnet-20241022")
//! );
//!
//! let request = CompletionRequest::new()
//!     .with_message(ChatMessage::user("Hello"));
//!
//! let response = client.complete(request).await?;
//! ```

mod client;
mod types;

pub use client::{AnthropicClient, ClientConfig, LLMClient};
pub use types::{
    CacheControl, ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker,
    ModelCosts, ModelSpec, ModelTier, Provider, StopReason, TokenUsage,
};
