//! Completion (reasoning) provider trait and JSON response parsing.
//!
//! Every structured request to the reasoning service goes through
//! [`complete_json`]: the provider is asked for JSON-only output and the
//! reply must deserialize directly into the caller's typed contract. A reply
//! that does not parse is mapped to the caller's fatal error class; there is
//! no fence stripping, no coercion, and no retry at this layer.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};

/// Trait for text-completion backends.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4"`).
    fn model_name(&self) -> &str;

    /// Run one completion. With `json_mode` the backend must return text
    /// that parses directly as a JSON value.
    async fn complete(&self, system_prompt: &str, user_prompt: &str, json_mode: bool)
        -> Result<String>;
}

/// Request a JSON completion and parse it into `T`.
///
/// `on_invalid` builds the error returned when the reply is not valid JSON
/// of the expected shape.
pub async fn complete_json<T, F>(
    provider: &dyn CompletionProvider,
    system_prompt: &str,
    user_prompt: &str,
    on_invalid: F,
) -> Result<T>
where
    T: DeserializeOwned,
    F: FnOnce(String) -> Error,
{
    debug!(
        model = provider.model_name(),
        prompt_chars = user_prompt.len(),
        "requesting JSON completion"
    );
    let text = provider.complete(system_prompt, user_prompt, true).await?;
    serde_json::from_str::<T>(&text).map_err(|e| on_invalid(format!("{} in reply: {}", e, preview(&text))))
}

fn preview(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        format!("{}…", text.chars().take(MAX).collect::<String>())
    }
}
