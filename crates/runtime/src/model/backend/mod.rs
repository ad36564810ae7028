//! Model provider backends.

mod anthropic;

pub use anthropic::{AnthropicAuth, AnthropicClient, AnthropicClientBuilder};
