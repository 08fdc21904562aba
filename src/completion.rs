//! Concrete completion (reasoning) providers.
//!
//! | Config Value | Provider | Endpoint |
//! |-------------|----------|----------|
//! | `"disabled"` | [`DisabledCompleter`] | none |
//! | `"openai"` | [`OpenAICompleter`] | `POST /v1/chat/completions` |
//! | `"ollama"` | [`OllamaCompleter`] | `POST /api/chat` |
//!
//! In JSON mode OpenAI gets `response_format = {"type": "json_object"}` and
//! Ollama gets `format = "json"`; the reply text is returned untouched for
//! the core crate to parse.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rowscout_core::completion::CompletionProvider;
use rowscout_core::Error;
use std::sync::Arc;
use tracing::debug;

use crate::config::CompletionConfig;
use crate::http::{self, JsonPost};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

fn completion_error(e: anyhow::Error) -> Error {
    Error::Completion(format!("{:#}", e))
}

fn messages(system_prompt: &str, user_prompt: &str) -> serde_json::Value {
    serde_json::json!([
        {"role": "system", "content": system_prompt},
        {"role": "user", "content": user_prompt},
    ])
}

/// A completion provider that always returns errors.
pub struct DisabledCompleter;

#[async_trait]
impl CompletionProvider for DisabledCompleter {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _json_mode: bool,
    ) -> rowscout_core::Result<String> {
        Err(Error::Completion(
            "completion provider is disabled; set [completion] provider in the config".to_string(),
        ))
    }
}

/// Chat completions against the OpenAI API (or a compatible gateway).
pub struct OpenAICompleter {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAICompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("completion.model required for OpenAI provider"))?;
        Ok(Self {
            model,
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key: http::openai_api_key()?,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, system_prompt: &str, user_prompt: &str, json_mode: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages(system_prompt, user_prompt),
            "temperature": self.temperature,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompleter {
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        json_mode: bool,
    ) -> rowscout_core::Result<String> {
        let body = self.request_body(system_prompt, user_prompt, json_mode);
        let json = JsonPost {
            service: "OpenAI",
            url: http::endpoint(&self.url, "/v1/chat/completions"),
            bearer: Some(&self.api_key),
            body: &body,
            max_retries: self.max_retries,
        }
        .send(&self.client)
        .await
        .map_err(completion_error)?;
        let text = parse_openai_chat(&json).map_err(completion_error)?;
        debug!(model = %self.model, reply_chars = text.len(), "completion received");
        Ok(text)
    }
}

/// Extract `choices[0].message.content`.
fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))?;
    if content.trim().is_empty() {
        bail!("OpenAI returned an empty completion");
    }
    Ok(content.to_string())
}

/// Chat completions against a local Ollama instance.
pub struct OllamaCompleter {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaCompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("completion.model required for Ollama provider"))?;
        Ok(Self {
            model,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, system_prompt: &str, user_prompt: &str, json_mode: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages(system_prompt, user_prompt),
            "stream": false,
            "options": {"temperature": self.temperature},
        });
        if json_mode {
            body["format"] = serde_json::json!("json");
        }
        body
    }
}

#[async_trait]
impl CompletionProvider for OllamaCompleter {
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        json_mode: bool,
    ) -> rowscout_core::Result<String> {
        let body = self.request_body(system_prompt, user_prompt, json_mode);
        let json = JsonPost {
            service: "Ollama",
            url: http::endpoint(&self.url, "/api/chat"),
            bearer: None,
            body: &body,
            max_retries: self.max_retries,
        }
        .send(&self.client)
        .await
        .map_err(completion_error)?;
        parse_ollama_chat(&json).map_err(completion_error)
    }
}

/// Extract `message.content`.
fn parse_ollama_chat(json: &serde_json::Value) -> Result<String> {
    let content = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))?;
    if content.trim().is_empty() {
        bail!("Ollama returned an empty completion");
    }
    Ok(content.to_string())
}

/// Create the [`CompletionProvider`] selected by configuration.
pub fn create_completer(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompleter)),
        "openai" => Ok(Arc::new(OpenAICompleter::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaCompleter::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ollama() -> OllamaCompleter {
        OllamaCompleter::new(&CompletionConfig {
            provider: "ollama".into(),
            model: Some("llama3.1".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_ollama_json_mode_sets_format() {
        let c = ollama();
        let body = c.request_body("sys", "user", true);
        assert_eq!(body["format"], "json");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");
        assert!(c.request_body("sys", "user", false).get("format").is_none());
    }

    #[test]
    fn test_parse_openai_chat() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"a\": 1}"}}]
        });
        assert_eq!(parse_openai_chat(&json).unwrap(), "{\"a\": 1}");
        assert!(parse_openai_chat(&serde_json::json!({"choices": []})).is_err());
        let empty = serde_json::json!({"choices": [{"message": {"content": "  "}}]});
        assert!(parse_openai_chat(&empty).is_err());
    }

    #[test]
    fn test_parse_ollama_chat() {
        let json = serde_json::json!({"message": {"role": "assistant", "content": "{}"}, "done": true});
        assert_eq!(parse_ollama_chat(&json).unwrap(), "{}");
        assert!(parse_ollama_chat(&serde_json::json!({"done": true})).is_err());
    }

    #[tokio::test]
    async fn test_disabled_completer_fails() {
        let c = create_completer(&CompletionConfig::default()).unwrap();
        let err = c.complete("s", "u", true).await.unwrap_err();
        assert!(matches!(err, Error::Completion(_)));
    }
}
