//! Vision-language model client.

mod client;

pub use client::{
    strip_reasoning, MessageBuilder, ModelClient, ModelConfig, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY_SECS,
};
