//! Generic adapter for OpenAI-compatible providers.
//!
//! Most of the provider fleet (OpenRouter, Fireworks, Together, DeepInfra,
//! the HuggingFace router, Groq, Mistral, ...) exposes the OpenAI chat
//! wire format at a provider-specific base URL. One adapter covers them
//! all: the slug picks a default endpoint, the request passes through with
//! the model field rewritten to the provider's native id, and streaming is
//! plain SSE.
//!
//! The adapter speaks exactly one route, `POST {base}/chat/completions`,
//! with bearer auth baked into the client at construction. Upstream error
//! responses are decoded through [`decode_upstream_error`] so the HTTP
//! status always survives into the [`ProviderError`]; the failover policy
//! is status-driven and a swallowed status would break retry
//! classification.

use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, StreamChunk};
use crate::providers::{AdapterConfig, ChunkStream, ProviderAdapter};
use async_stream::stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

/// Default chat-completions base URL for well-known OpenAI-compatible
/// providers.
pub fn default_base_url(slug: &str) -> Option<&'static str> {
    match slug {
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "fireworks" => Some("https://api.fireworks.ai/inference/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "deepinfra" => Some("https://api.deepinfra.com/v1/openai"),
        "huggingface" => Some("https://router.huggingface.co/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "perplexity" => Some("https://api.perplexity.ai"),
        "cerebras" => Some("https://api.cerebras.ai/v1"),
        "sambanova" => Some("https://api.sambanova.ai/v1"),
        "novita" => Some("https://api.novita.ai/v3/openai"),
        "hyperbolic" => Some("https://api.hyperbolic.xyz/v1"),
        "nebius" => Some("https://api.studio.nebius.ai/v1"),
        "xai" => Some("https://api.x.ai/v1"),
        "anyscale" => Some("https://api.endpoints.anyscale.com/v1"),
        "lepton" => Some("https://api.lepton.ai/api/v1"),
        _ => None,
    }
}

/// The `{"error": ...}` envelope OpenAI-compatible upstreams wrap their
/// failures in. Some providers put a string where others put an object.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Object { message: Option<String> },
    Text(String),
}

/// Decode an upstream error response into a typed [`ProviderError`].
///
/// The status code is the load-bearing part: retry eligibility is decided
/// per status category, so generic failures keep their code in
/// [`ProviderError::Api`].
pub fn decode_upstream_error(code: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|detail| match detail {
            ErrorDetail::Object { message } => message,
            ErrorDetail::Text(text) => Some(text),
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());

    match code {
        401 => ProviderError::InvalidApiKey,
        404 => ProviderError::ModelNotFound {
            model: if message.is_empty() {
                "unknown".to_string()
            } else {
                message
            },
        },
        429 => ProviderError::RateLimit,
        503 => ProviderError::ServiceUnavailable,
        _ => ProviderError::Api { code, message },
    }
}

/// Adapter for any provider speaking the OpenAI chat protocol.
pub struct OpenAiCompatAdapter {
    slug: String,
    /// Fully-resolved chat-completions URL
    endpoint: String,
    /// Client carrying auth and any provider-specific headers
    http: reqwest::Client,
}

impl OpenAiCompatAdapter {
    /// Build an adapter from connection settings.
    ///
    /// The base URL comes from the config override or the slug's default
    /// endpoint; unknown slugs must supply one explicitly.
    pub fn new(config: AdapterConfig) -> Result<Self, ProviderError> {
        let base = config
            .base_url
            .clone()
            .or_else(|| default_base_url(&config.slug).map(str::to_string))
            .ok_or_else(|| ProviderError::Configuration {
                message: format!("no base url known for provider {}", config.slug),
            })?;
        let endpoint = format!("{}/chat/completions", base.trim_end_matches('/'));

        let mut headers = HeaderMap::new();
        let bearer: HeaderValue = format!("Bearer {}", config.api_key).parse().map_err(|_| {
            ProviderError::Configuration {
                message: format!("api key for {} is not a valid header value", config.slug),
            }
        })?;
        headers.insert(AUTHORIZATION, bearer);
        for (name, value) in &config.headers {
            match (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => {
                    tracing::warn!(provider = %config.slug, header = %name, "dropping invalid header");
                }
            }
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::Configuration {
                message: format!("failed to build http client for {}: {e}", config.slug),
            })?;

        Ok(Self {
            slug: config.slug,
            endpoint,
            http,
        })
    }

    /// Post the request and fail fast on a non-success status, keeping the
    /// status code in the error.
    async fn dispatch(&self, request: &ChatRequest) -> Result<reqwest::Response, ProviderError> {
        let response = self.http.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(decode_upstream_error(status.as_u16(), &body))
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn complete(
        &self,
        native_id: &str,
        mut request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        request.model = native_id.to_string();
        request.stream = None;
        let response = self.dispatch(&request).await?;
        Ok(response.json::<ChatResponse>().await?)
    }

    async fn stream(
        &self,
        native_id: &str,
        mut request: ChatRequest,
    ) -> Result<ChunkStream, ProviderError> {
        request.model = native_id.to_string();
        request.stream = Some(true);

        let response = self.dispatch(&request).await?;

        let stream = Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = futures::StreamExt::next(&mut bytes_stream).await {
                match chunk_result {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));

                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();

                            if let Some(json_str) = line.strip_prefix("data: ") {
                                if json_str == "[DONE]" {
                                    return;
                                }
                                match serde_json::from_str::<StreamChunk>(json_str) {
                                    Ok(stream_chunk) => yield Ok(stream_chunk),
                                    Err(e) => yield Err(ProviderError::Serialization(e)),
                                }
                            }
                        }
                    }
                    Err(e) => yield Err(ProviderError::Http(e)),
                }
            }
        });

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer) -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::new(
            AdapterConfig::new("openrouter", "test-key").with_base_url(server.uri()),
        )
        .unwrap()
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "llama-3.3-70b".to_string(),
            messages: vec![Message::user("hello")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn complete_rewrites_the_model_to_the_native_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "meta-llama/llama-3.3-70b-instruct"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "gen-1",
                "object": "chat.completion",
                "created": 1,
                "model": "meta-llama/llama-3.3-70b-instruct",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "hi"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 4, "completion_tokens": 1, "total_tokens": 5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let response = adapter
            .complete("meta-llama/llama-3.3-70b-instruct", request())
            .await
            .unwrap();
        assert_eq!(response.choices[0].message.content, "hi");
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn upstream_errors_keep_their_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": {"message": "overloaded"}
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let error = adapter.complete("some/native-id", request()).await.unwrap_err();
        assert!(matches!(error, ProviderError::ServiceUnavailable));
        assert!(error.failover_eligible());
    }

    #[tokio::test]
    async fn invalid_key_maps_to_credential_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let error = adapter.complete("some/native-id", request()).await.unwrap_err();
        assert!(matches!(error, ProviderError::InvalidApiKey));
    }

    #[tokio::test]
    async fn stream_parses_sse_chunks_and_trailing_usage() {
        let body = concat!(
            "data: {\"id\":\"gen-1\",\"object\":\"chat.completion.chunk\",\"created\":1,",
            "\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"he\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"gen-1\",\"object\":\"chat.completion.chunk\",\"created\":1,",
            "\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"llo\"},\"finish_reason\":\"stop\"}],",
            "\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2,\"total_tokens\":6}}\n\n",
            "data: [DONE]\n\n"
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/event-stream")
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let mut stream = adapter.stream("some/native-id", request()).await.unwrap();

        let mut content = String::new();
        let mut usage = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            if let Some(choice) = chunk.choices.first() {
                if let Some(delta) = &choice.delta.content {
                    content.push_str(delta);
                }
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }
        assert_eq!(content, "hello");
        assert_eq!(usage.unwrap().completion_tokens, 2);
    }

    #[test]
    fn error_decoding_handles_object_string_and_bare_bodies() {
        let object = decode_upstream_error(500, r#"{"error": {"message": "boom"}}"#);
        assert!(matches!(object, ProviderError::Api { code: 500, ref message } if message == "boom"));

        let string_shaped = decode_upstream_error(502, r#"{"error": "bad gateway"}"#);
        assert!(
            matches!(string_shaped, ProviderError::Api { code: 502, ref message } if message == "bad gateway")
        );

        let bare = decode_upstream_error(418, "i'm a teapot");
        assert!(matches!(bare, ProviderError::Api { code: 418, ref message } if message == "i'm a teapot"));

        assert!(matches!(
            decode_upstream_error(429, ""),
            ProviderError::RateLimit
        ));
    }

    #[test]
    fn known_slugs_have_default_endpoints() {
        for slug in ["openrouter", "fireworks", "together", "deepinfra", "huggingface"] {
            assert!(default_base_url(slug).is_some(), "{slug}");
        }
        assert!(default_base_url("not-a-provider").is_none());
        assert!(OpenAiCompatAdapter::new(AdapterConfig::new("not-a-provider", "k")).is_err());
    }
}
