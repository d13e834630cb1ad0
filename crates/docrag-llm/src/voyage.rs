use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{EmbeddingProvider, Embeddings, InputType, RerankHit, Reranked};

pub const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";

/// Voyage AI embedding and rerank client.
pub struct VoyageProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    embed_model: String,
    rerank_model: String,
}

impl fmt::Debug for VoyageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoyageProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("embed_model", &self.embed_model)
            .field("rerank_model", &self.rerank_model)
            .finish()
    }
}

impl VoyageProvider {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_key: String,
        mut base_url: String,
        embed_model: String,
        rerank_model: String,
    ) -> Result<Self, LlmError> {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            client: crate::http::default_client()?,
            api_key,
            base_url,
            embed_model,
            rerank_model,
        })
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    async fn post<B: Serialize + Sync, R: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<R, LlmError> {
        let response = self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(endpoint, "Voyage API rate limited the request");
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            tracing::error!("Voyage {endpoint} API error {status}: {text}");
            return Err(LlmError::Api {
                provider: "voyage",
                status: status.as_u16(),
                message: text,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

impl EmbeddingProvider for VoyageProvider {
    async fn embed(&self, texts: &[String], input_type: InputType) -> Result<Embeddings, LlmError> {
        if texts.is_empty() {
            return Ok(Embeddings::default());
        }
        let body = EmbeddingRequest {
            input: texts,
            model: &self.embed_model,
            input_type: input_type.as_str(),
        };
        let resp: EmbeddingResponse = self.post("embeddings", &body).await?;

        if resp.data.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "voyage" });
        }
        if resp.data.len() != texts.len() {
            return Err(LlmError::CountMismatch {
                provider: "voyage",
                expected: texts.len(),
                got: resp.data.len(),
            });
        }

        let mut data = resp.data;
        data.sort_by_key(|d| d.index);
        tracing::debug!(
            count = data.len(),
            total_tokens = resp.usage.total_tokens,
            "Voyage embeddings received"
        );

        Ok(Embeddings {
            embeddings: data.into_iter().map(|d| d.embedding).collect(),
            total_tokens: resp.usage.total_tokens,
        })
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Reranked, LlmError> {
        if documents.is_empty() || top_k == 0 {
            return Ok(Reranked::default());
        }
        let body = RerankRequest {
            query,
            documents,
            model: &self.rerank_model,
            top_k: top_k.min(documents.len()),
        };
        let resp: RerankResponse = self.post("rerank", &body).await?;

        let mut results = resp.data;
        results.retain(|hit| hit.index < documents.len());
        results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

        Ok(Reranked {
            results,
            total_tokens: resp.usage.total_tokens,
        })
    }

    fn name(&self) -> &'static str {
        "voyage"
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    input_type: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    model: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    data: Vec<RerankHit>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Default, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider(server: &MockServer) -> VoyageProvider {
        VoyageProvider::new(
            "test-key".into(),
            format!("{}/", server.uri()),
            "voyage-code-3".into(),
            "rerank-2.5".into(),
        )
        .unwrap()
    }

    #[test]
    fn debug_redacts_api_key() {
        let p = VoyageProvider::new(
            "secret".into(),
            DEFAULT_BASE_URL.into(),
            "voyage-code-3".into(),
            "rerank-2.5".into(),
        )
        .unwrap();
        let dbg = format!("{p:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("voyage-code-3"));
    }

    #[tokio::test]
    async fn embed_restores_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "voyage-code-3",
                "input_type": "document"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"embedding": [0.0, 1.0], "index": 1},
                    {"embedding": [1.0, 0.0], "index": 0}
                ],
                "usage": {"total_tokens": 12}
            })))
            .mount(&server)
            .await;

        let out = provider(&server)
            .embed(&["first".into(), "second".into()], InputType::Document)
            .await
            .unwrap();
        assert_eq!(out.embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(out.total_tokens, 12);
    }

    #[tokio::test]
    async fn embed_sends_query_input_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(serde_json::json!({"input_type": "query"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.5], "index": 0}],
                "usage": {"total_tokens": 3}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = provider(&server)
            .embed(&["q".into()], InputType::Query)
            .await
            .unwrap();
        assert_eq!(out.embeddings.len(), 1);
    }

    #[tokio::test]
    async fn embed_empty_input_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let out = provider(&server)
            .embed(&[], InputType::Document)
            .await
            .unwrap();
        assert!(out.embeddings.is_empty());
    }

    #[tokio::test]
    async fn embed_count_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.5], "index": 0}],
                "usage": {"total_tokens": 3}
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .embed(&["a".into(), "b".into()], InputType::Document)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LlmError::CountMismatch {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn too_many_requests_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .embed(&["a".into()], InputType::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[tokio::test]
    async fn server_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .embed(&["a".into()], InputType::Document)
            .await
            .unwrap_err();
        match err {
            LlmError::Api {
                status, message, ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad model");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rerank_sorts_by_relevance_and_caps_top_k() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rerank"))
            .and(body_partial_json(serde_json::json!({
                "model": "rerank-2.5",
                "top_k": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 0, "relevance_score": 0.2},
                    {"index": 1, "relevance_score": 0.9}
                ],
                "usage": {"total_tokens": 40}
            })))
            .mount(&server)
            .await;

        let out = provider(&server)
            .rerank("open a workbook", &["intro".into(), "Workbook.open".into()], 10)
            .await
            .unwrap();
        assert_eq!(out.results[0].index, 1);
        assert_eq!(out.results[1].index, 0);
        assert_eq!(out.total_tokens, 40);
    }
}
