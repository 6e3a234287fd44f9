//! OpenAI-compatible model backend.
//!
//! Works against OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any
//! endpoint following the chat completions API. Requests force the JSON
//! response format so every completion is a parseable payload.

use super::{ModelBackend, StructuredRequest};
use crate::config::BackendConfig;
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Model backend speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatibleBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiCompatibleBackend {
    /// Create a backend from configuration.
    ///
    /// Reads the API key from the environment variable named in
    /// `config.api_key_env`. Local endpoints (localhost) fall back to a
    /// dummy bearer token, as Ollama and friends ignore it.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let is_local = config.base_url.contains("localhost") || config.base_url.contains("127.0.0.1");

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local backend; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| BackendError::AuthFailed {
                backend: format!("env var '{}' not set", config.api_key_env),
            })?;

        Self::with_key(config, api_key)
    }

    /// Create a backend with an explicitly provided API key.
    pub fn with_key(config: &BackendConfig, api_key: String) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Connection {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> BackendError {
        match status.as_u16() {
            401 => BackendError::AuthFailed {
                backend: "OpenAI-compatible".to_string(),
            },
            429 => {
                // Providers phrase it as "... try again in Xs".
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim_end_matches('s').parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                BackendError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => BackendError::Api {
                message: format!("server error ({status}): {body}"),
            },
            status => BackendError::Api {
                message: format!("HTTP {status}: {body}"),
            },
        }
    }

    fn extract_content(body: &Value) -> Result<String, BackendError> {
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BackendError::Parse {
                message: "no message content in response".to_string(),
            })
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatibleBackend {
    async fn complete(&self, request: StructuredRequest) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "response_format": {"type": "json_object"},
            "stream": false,
        });

        debug!(url = %url, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    BackendError::Connection {
                        message: format!("request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| BackendError::Api {
            message: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let parsed: Value =
            serde_json::from_str(&response_body).map_err(|e| BackendError::Parse {
                message: format!("invalid response JSON: {e}"),
            })?;

        Self::extract_content(&parsed)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BackendConfig {
        BackendConfig {
            base_url: "https://api.example.com/v1".into(),
            model: "test-model".into(),
            api_key_env: "DELVER_TEST_API_KEY".into(),
            max_tokens: 1024,
            temperature: 0.5,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_new_missing_key() {
        unsafe { std::env::remove_var("DELVER_TEST_API_KEY") };
        let result = OpenAiCompatibleBackend::new(&test_config());
        assert!(matches!(result, Err(BackendError::AuthFailed { .. })));
    }

    #[test]
    fn test_new_local_endpoint_needs_no_key() {
        unsafe { std::env::remove_var("DELVER_TEST_API_KEY") };
        let mut config = test_config();
        config.base_url = "http://localhost:11434/v1".into();
        assert!(OpenAiCompatibleBackend::new(&config).is_ok());
    }

    #[test]
    fn test_with_key_strips_trailing_slash() {
        let mut config = test_config();
        config.base_url = "https://api.example.com/v1/".into();
        let backend = OpenAiCompatibleBackend::with_key(&config, "key".into()).unwrap();
        assert_eq!(backend.base_url, "https://api.example.com/v1");
    }

    #[test]
    fn test_map_http_error_auth() {
        let err = OpenAiCompatibleBackend::map_http_error(reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(matches!(err, BackendError::AuthFailed { .. }));
    }

    #[test]
    fn test_map_http_error_rate_limit_parses_retry() {
        let body = r#"{"error": {"message": "Rate limit reached, try again in 12s"}}"#;
        let err =
            OpenAiCompatibleBackend::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, body);
        match err {
            BackendError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 12),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_map_http_error_server() {
        let err = OpenAiCompatibleBackend::map_http_error(reqwest::StatusCode::BAD_GATEWAY, "oops");
        assert!(matches!(err, BackendError::Api { .. }));
    }

    #[test]
    fn test_extract_content() {
        let body = json!({
            "choices": [{"message": {"content": "{\"ok\": true}"}}]
        });
        assert_eq!(
            OpenAiCompatibleBackend::extract_content(&body).unwrap(),
            "{\"ok\": true}"
        );
    }

    #[test]
    fn test_extract_content_missing() {
        let body = json!({"choices": []});
        assert!(matches!(
            OpenAiCompatibleBackend::extract_content(&body),
            Err(BackendError::Parse { .. })
        ));
    }
}
