//! LLM provider adapters.
//!
//! Each provider implements the backend trait for its specific API.

mod anthropic;
mod openai;

pub use anthropic::{ANTHROPIC_API_BASE, AnthropicBackend, AnthropicBackendBuilder};
pub use openai::{DEFAULT_MAX_TOKENS, OPENAI_API_BASE, OpenAiBackend, OpenAiBackendBuilder};
