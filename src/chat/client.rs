//! HTTP client for a local OpenAI-compatible server.

use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tokio_util::io::StreamReader;
use url::Url;

use super::stream::{token_stream, TokenStream};
use super::ChatRequest;

/// Bearer token sent when none is configured.
pub const DEFAULT_API_KEY: &str = "sk-default";

/// Connection timeout for HTTP requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall timeout for requests that do not stream.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a non-streaming completion, which may generate for a while.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors from chat client operations.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Unsupported base URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request to {url} failed: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Request to {url} timed out")]
    Timeout { url: String },
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to parse response from {url}: {reason}")]
    ParseError { url: String, reason: String },
}

/// Client for the chat, models and health endpoints of one server.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ChatClient {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:8081`).
    ///
    /// # Errors
    ///
    /// Returns `ChatError::InvalidBaseUrl` if `base_url` does not parse,
    /// `ChatError::UnsupportedScheme` for non-HTTP schemes.
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self, ChatError> {
        let parsed = Url::parse(base_url).map_err(|source| ChatError::InvalidBaseUrl {
            url: base_url.to_string(),
            source,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ChatError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(ChatError::Client)?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.unwrap_or(DEFAULT_API_KEY).to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Stream a chat completion token by token.
    ///
    /// `request.stream` is forced on. The returned stream reads the body
    /// lazily and ends at the `[DONE]` sentinel.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or the server answers
    /// with a non-success status. Failures while reading the body surface as
    /// items of the stream.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<TokenStream, ChatError> {
        let url = self.url("/v1/chat/completions");
        let mut request = request.clone();
        request.stream = true;

        tracing::debug!(%url, model = %request.model, messages = request.messages.len(), "Streaming chat request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        let response = check_status(&url, response).await?;

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(token_stream(StreamReader::new(Box::pin(body))))
    }

    /// Request a complete (non-streaming) chat completion.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or a body
    /// that is not JSON.
    pub async fn chat_completion(&self, request: &ChatRequest) -> Result<Value, ChatError> {
        let url = self.url("/v1/chat/completions");
        let mut request = request.clone();
        request.stream = false;

        tracing::debug!(%url, model = %request.model, "Chat completion request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(COMPLETION_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;

        read_json(&url, response).await
    }

    /// List the models the server exposes.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or a body
    /// that is not JSON.
    pub async fn list_models(&self) -> Result<Value, ChatError> {
        let url = self.url("/v1/models");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;

        read_json(&url, response).await
    }

    /// True only if `GET /health` answers 200.
    pub async fn health_check(&self) -> bool {
        let url = self.url("/health");
        match self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!(%url, error = %e, "Health check failed");
                false
            }
        }
    }
}

fn request_error(url: &str, e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Timeout {
            url: url.to_string(),
        }
    } else {
        ChatError::RequestFailed {
            url: url.to_string(),
            source: e,
        }
    }
}

async fn check_status(url: &str, response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Status {
        url: url.to_string(),
        status,
        body,
    })
}

async fn read_json(url: &str, response: Response) -> Result<Value, ChatError> {
    let response = check_status(url, response).await?;
    response.json().await.map_err(|e| {
        if e.is_timeout() {
            ChatError::Timeout {
                url: url.to_string(),
            }
        } else {
            ChatError::ParseError {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })
}
