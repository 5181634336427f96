use crate::error::{ActivityError, ErrorKind};
use crate::traits::EmbeddingClient;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub struct CohereClient {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl CohereClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, client: Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for CohereClient {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ActivityError> {
        let response = self
            .client
            .post(format!("{}/v1/embed", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": model, "texts": texts }))
            .send()
            .await
            .map_err(|error| {
                ActivityError::new(
                    ErrorKind::Connection,
                    format!("embedding request failed: {error}"),
                )
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ActivityError::new(
                ErrorKind::Authentication,
                format!("embedding service rejected credentials: {status}"),
            ));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let hint = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ActivityError::new(
                ErrorKind::RateLimit,
                "embedding service rate limited the request",
            )
            .with_retry_after(hint));
        }
        if !status.is_success() {
            return Err(ActivityError::new(
                ErrorKind::ServiceUnavailable,
                format!("embedding service returned {status}"),
            ));
        }

        let payload: EmbedResponse = response.json().await.map_err(|error| {
            ActivityError::new(
                ErrorKind::ServiceUnavailable,
                format!("embedding response was unreadable: {error}"),
            )
        })?;

        Ok(payload.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::CohereClient;
    use crate::error::ErrorKind;
    use crate::traits::EmbeddingClient;
    use httpmock::prelude::*;
    use reqwest::Client;
    use std::time::Duration;

    fn texts() -> Vec<String> {
        vec!["alpha".to_string(), "beta".to_string()]
    }

    #[tokio::test]
    async fn successful_response_yields_vectors_in_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embed")
                    .header("authorization", "Bearer test-key")
                    .json_body_partial(r#"{"model": "embed-english-v2.0"}"#);
                then.status(200)
                    .json_body(serde_json::json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] }));
            })
            .await;

        let client = CohereClient::new(server.base_url(), "test-key", Client::new());
        let vectors = client
            .embed("embed-english-v2.0", &texts())
            .await
            .expect("embed");

        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn unauthorized_is_an_authentication_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embed");
                then.status(401);
            })
            .await;

        let client = CohereClient::new(server.base_url(), "bad-key", Client::new());
        let error = client
            .embed("embed-english-v2.0", &texts())
            .await
            .expect_err("must fail");
        assert_eq!(error.kind, ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn rate_limit_carries_the_server_retry_hint() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embed");
                then.status(429).header("retry-after", "11");
            })
            .await;

        let client = CohereClient::new(server.base_url(), "test-key", Client::new());
        let error = client
            .embed("embed-english-v2.0", &texts())
            .await
            .expect_err("must fail");
        assert_eq!(error.kind, ErrorKind::RateLimit);
        assert_eq!(error.retry_after, Some(Duration::from_secs(11)));
    }

    #[tokio::test]
    async fn server_error_is_service_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embed");
                then.status(503);
            })
            .await;

        let client = CohereClient::new(server.base_url(), "test-key", Client::new());
        let error = client
            .embed("embed-english-v2.0", &texts())
            .await
            .expect_err("must fail");
        assert_eq!(error.kind, ErrorKind::ServiceUnavailable);
    }
}
