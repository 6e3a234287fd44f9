//! DuckDuckGo search provider.
//!
//! Queries the instant-answers API (no API key required) and maps the
//! abstract, related topics, and results arrays into ranked `RawResult`s.

use super::SearchProvider;
use crate::error::SearchErrorKind;
use crate::types::RawResult;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const API_URL: &str = "https://api.duckduckgo.com/";

/// Search provider backed by DuckDuckGo instant answers.
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl DuckDuckGoProvider {
    /// Create a provider with the given per-request timeout.
    pub fn new(timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("delver/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    fn map_request_error(&self, e: reqwest::Error) -> SearchErrorKind {
        if e.is_timeout() {
            SearchErrorKind::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            SearchErrorKind::Provider {
                message: format!("request failed: {e}"),
            }
        }
    }

    fn map_status(status: reqwest::StatusCode, headers: &reqwest::header::HeaderMap) -> SearchErrorKind {
        match status.as_u16() {
            401 | 403 => SearchErrorKind::AuthRejected,
            429 => SearchErrorKind::RateLimited {
                retry_after_secs: headers
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok()),
            },
            s if s >= 500 => SearchErrorKind::Provider {
                message: format!("server error ({s})"),
            },
            s => SearchErrorKind::Provider {
                message: format!("HTTP {s}"),
            },
        }
    }

    /// Flatten the instant-answer body into ranked results.
    fn parse_body(body: &serde_json::Value, max_results: usize) -> Vec<RawResult> {
        let mut results = Vec::new();

        // Abstract: the main answer, when present.
        if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str())
            && !abstract_text.is_empty()
        {
            let title = body
                .get("Heading")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .or_else(|| body.get("AbstractSource").and_then(|v| v.as_str()))
                .unwrap_or("Abstract");
            let url = body
                .get("AbstractURL")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !url.is_empty() {
                results.push(RawResult {
                    title: title.to_string(),
                    url: url.to_string(),
                    snippet: abstract_text.to_string(),
                    source_rank: results.len() as u32,
                });
            }
        }

        // Related topics and direct results share the Text/FirstURL shape.
        for array_key in ["RelatedTopics", "Results"] {
            if let Some(items) = body.get(array_key).and_then(|v| v.as_array()) {
                for item in items {
                    if results.len() >= max_results {
                        break;
                    }
                    let Some(text) = item.get("Text").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let Some(url) = item.get("FirstURL").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    if text.is_empty() || url.is_empty() {
                        continue;
                    }
                    // The topic text leads with a short title phrase.
                    let title = text.split(" - ").next().unwrap_or(text);
                    results.push(RawResult {
                        title: title.to_string(),
                        url: url.to_string(),
                        snippet: text.to_string(),
                        source_rank: results.len() as u32,
                    });
                }
            }
        }

        results.truncate(max_results);
        results
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    async fn query(
        &self,
        query_text: &str,
        max_results: usize,
    ) -> Result<Vec<RawResult>, SearchErrorKind> {
        let url = format!(
            "{API_URL}?q={}&format=json&no_html=1&skip_disambig=1",
            urlencoding::encode(query_text)
        );
        debug!(query = %query_text, "Querying DuckDuckGo");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::map_status(status, response.headers()));
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| SearchErrorKind::Provider {
                    message: format!("failed to parse search response: {e}"),
                })?;

        Ok(Self::parse_body(&body, max_results))
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body_abstract_and_topics() {
        let body = json!({
            "Heading": "Rust (programming language)",
            "AbstractText": "Rust is a systems programming language.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust",
            "RelatedTopics": [
                {"Text": "Cargo - the Rust package manager", "FirstURL": "https://doc.rust-lang.org/cargo"},
                {"Text": "Ownership - memory model", "FirstURL": "https://doc.rust-lang.org/ownership"}
            ],
            "Results": []
        });

        let results = DuckDuckGoProvider::parse_body(&body, 5);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "Rust (programming language)");
        assert_eq!(results[0].url, "https://en.wikipedia.org/wiki/Rust");
        assert_eq!(results[1].title, "Cargo");
        assert_eq!(results[1].source_rank, 1);
    }

    #[test]
    fn test_parse_body_respects_max_results() {
        let topics: Vec<_> = (0..10)
            .map(|i| {
                json!({
                    "Text": format!("Topic {i} - details"),
                    "FirstURL": format!("https://example.com/{i}")
                })
            })
            .collect();
        let body = json!({"AbstractText": "", "RelatedTopics": topics});

        let results = DuckDuckGoProvider::parse_body(&body, 4);
        assert_eq!(results.len(), 4);
        assert_eq!(results[3].source_rank, 3);
    }

    #[test]
    fn test_parse_body_skips_entries_without_url() {
        let body = json!({
            "RelatedTopics": [
                {"Text": "No url here"},
                {"Text": "Good", "FirstURL": "https://example.com/good"}
            ]
        });
        let results = DuckDuckGoProvider::parse_body(&body, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://example.com/good");
    }

    #[test]
    fn test_parse_body_empty() {
        let body = json!({});
        assert!(DuckDuckGoProvider::parse_body(&body, 5).is_empty());
    }

    #[test]
    fn test_map_status() {
        use reqwest::StatusCode;
        let headers = reqwest::header::HeaderMap::new();
        assert!(matches!(
            DuckDuckGoProvider::map_status(StatusCode::UNAUTHORIZED, &headers),
            SearchErrorKind::AuthRejected
        ));
        assert!(matches!(
            DuckDuckGoProvider::map_status(StatusCode::TOO_MANY_REQUESTS, &headers),
            SearchErrorKind::RateLimited { .. }
        ));
        assert!(matches!(
            DuckDuckGoProvider::map_status(StatusCode::BAD_GATEWAY, &headers),
            SearchErrorKind::Provider { .. }
        ));
    }

    #[test]
    fn test_map_status_retry_after() {
        use reqwest::StatusCode;
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "7".parse().unwrap());
        match DuckDuckGoProvider::map_status(StatusCode::TOO_MANY_REQUESTS, &headers) {
            SearchErrorKind::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, Some(7));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }
}
