//! Chat and embedding backends over the Ollama HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use medsig_store::{Embedder, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("cannot reach model server at {0}")]
    Connection(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A chat model: messages in, assistant text out.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn chat(&self, messages: &[Message]) -> Result<String, BackendError>;
}

/// Connection settings for [`OllamaClient`].
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub chat_model: String,
    pub embed_model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            chat_model: "llama3.2".into(),
            embed_model: "llama3.2".into(),
            temperature: 0.1,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Ollama client serving both chat (`/api/chat`) and embeddings (`/api/embed`).
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    chat_model: String,
    embed_model: String,
    embedder_name: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Message,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            embedder_name: format!("ollama:{}", config.embed_model),
            chat_model: config.chat_model,
            embed_model: config.embed_model,
            temperature: config.temperature,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, BackendError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    BackendError::Connection(self.base_url.clone())
                } else {
                    BackendError::Http(e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Server {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    fn model(&self) -> &str {
        &self.chat_model
    }

    async fn chat(&self, messages: &[Message]) -> Result<String, BackendError> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };
        let response: ChatResponse = self.post("/api/chat", &request).await?;
        debug!(model = %self.chat_model, chars = response.message.content.len(), "chat response");
        Ok(response.message.content)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    fn name(&self) -> &str {
        &self.embedder_name
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbedRequest {
            model: &self.embed_model,
            input: texts,
        };
        let response: EmbedResponse = self
            .post("/api/embed", &request)
            .await
            .map_err(|e| StoreError::Embedding(e.to_string()))?;
        if response.embeddings.len() != texts.len() {
            return Err(StoreError::Embedding(format!(
                "requested {} embeddings, server returned {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_matches_wire_format() {
        let messages = [Message::system("be terse"), Message::user("1 tab qd")];
        let request = ChatRequest {
            model: "llama3.2",
            messages: &messages,
            stream: false,
            options: ChatOptions { temperature: 0.5 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "1 tab qd");
        assert_eq!(json["options"]["temperature"], 0.5);
    }

    #[test]
    fn chat_response_decodes() {
        let body = r#"{"model":"llama3.2","message":{"role":"assistant","content":"{\"sigs\":[]}"},"done":true}"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.message.role, Role::Assistant);
        assert_eq!(resp.message.content, "{\"sigs\":[]}");
    }

    #[test]
    fn embed_response_decodes() {
        let resp: EmbedResponse =
            serde_json::from_str(r#"{"model":"m","embeddings":[[0.1,0.2],[0.3,0.4]]}"#).unwrap();
        assert_eq!(resp.embeddings.len(), 2);
    }

    #[test]
    fn base_url_is_normalised() {
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://localhost:11434/".into(),
            ..OllamaConfig::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(Embedder::name(&client), "ollama:llama3.2");
        assert_eq!(client.model(), "llama3.2");
    }
}
