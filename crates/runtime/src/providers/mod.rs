//! LLM provider adapters.
//!
//! Each provider implements the backend trait for its specific API.

mod gemini;

pub use gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiBackend, GeminiBackendBuilder};
