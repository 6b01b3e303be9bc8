//! Minimal client for the Gemini `generateContent` REST endpoint.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::GeminiConfig;
use crate::errors::Error;

const SERVICE: &str = "Gemini";

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

fn upstream(message: impl Into<String>) -> Error {
    Error::Upstream {
        service: SERVICE.to_string(),
        message: message.into(),
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal {
                operation: format!("create Gemini HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                config.base_url.as_str().trim_end_matches('/'),
                config.model
            ),
            api_key: config.api_key.clone(),
        })
    }

    /// Send one prompt and return the concatenated text of the first candidate.
    #[instrument(skip_all, fields(prompt_len = prompt.len()), err)]
    pub async fn generate(&self, prompt: &str) -> Result<String, Error> {
        let api_key = self.api_key.as_deref().ok_or_else(|| upstream("API key is not configured"))?;

        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream(format!("HTTP {status}: {body}")));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| upstream(format!("decode response: {e}")))?;
        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(upstream("response contained no text"));
        }
        debug!(answer_len = text.len(), "Gemini answered");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, api_key: Option<&str>) -> GeminiClient {
        GeminiClient::new(&GeminiConfig {
            api_key: api_key.map(str::to_string),
            base_url: Url::parse(&server.uri()).unwrap(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_generate_joins_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-pro:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(json!({"contents": [{"parts": [{"text": "Explain slope"}]}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Slope is "}, {"text": "rise over run."}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server, Some("g-key")).generate("Explain slope").await.unwrap();
        assert_eq!(text, "Slope is rise over run.");
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let err = client_for(&server, Some("g-key")).generate("hi").await.unwrap_err();
        assert!(matches!(err, Error::Upstream { ref message, .. } if message.contains("429")));
        assert_eq!(err.user_message(), "Gemini request failed");
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let server = MockServer::start().await;
        let err = client_for(&server, None).generate("hi").await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        assert!(client_for(&server, Some("k")).generate("hi").await.is_err());
    }
}
