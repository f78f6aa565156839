//! HTTP connector for the agent invoke-stream endpoint.

use super::{ByteStream, Connector, InvocationParams, TransportError};
use crate::config::ConnectionConfig;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;

#[derive(Serialize)]
struct InvokeRequest<'a> {
    input: InvokeInput<'a>,
    config: InvokeConfig<'a>,
    metadata: InvokeMetadata<'a>,
}

#[derive(Serialize)]
struct InvokeInput<'a> {
    messages: &'a str,
    context: &'a str,
    image_path: Option<&'a str>,
}

#[derive(Serialize)]
struct InvokeConfig<'a> {
    configurable: Configurable<'a>,
}

#[derive(Serialize)]
struct Configurable<'a> {
    thread_id: &'a str,
}

#[derive(Serialize)]
struct InvokeMetadata<'a> {
    model_name: &'a str,
    reset_memory: bool,
    agent_style: &'a str,
}

impl<'a> InvokeRequest<'a> {
    fn from_params(params: &'a InvocationParams) -> Self {
        Self {
            input: InvokeInput {
                messages: &params.message,
                context: "",
                image_path: params.image_path.as_deref(),
            },
            config: InvokeConfig {
                configurable: Configurable {
                    thread_id: &params.thread_id,
                },
            },
            metadata: InvokeMetadata {
                model_name: &params.model.model_name,
                reset_memory: false,
                agent_style: &params.model.agent_style,
            },
        }
    }
}

/// Opens `POST {base_url}/agent-invoke/{agent_id}/invoke-stream`.
#[derive(Debug)]
pub struct HttpConnector {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpConnector {
    pub fn new(config: &ConnectionConfig) -> Self {
        // No overall timeout: invocations stream for as long as the agent runs.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        }
    }

    fn url(&self, agent_id: &str) -> String {
        format!("{}/agent-invoke/{agent_id}/invoke-stream", self.base_url)
    }

    fn build_headers(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                TransportError::Request("Bearer token contains invalid header characters".into())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn open(&self, params: &InvocationParams) -> Result<ByteStream, TransportError> {
        if params.agent_id.is_empty() || params.agent_id.contains('/') {
            return Err(TransportError::Request(format!(
                "invalid agent id: {:?}",
                params.agent_id
            )));
        }

        let url = self.url(&params.agent_id);
        let headers = self.build_headers()?;

        tracing::debug!(
            url = %url,
            thread = %params.thread_id,
            model = %params.model.model_name,
            "Opening invocation stream"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&InvokeRequest::from_params(params))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: format_error_body(&text),
            });
        }

        Ok(Box::pin(response.bytes_stream().map_err(TransportError::from)))
    }
}

/// Pull a readable message out of an error body.
///
/// Handles `{"detail": ...}`, `{"error": {"message": ...}}`,
/// `{"error": "..."}` and `{"message": ...}`; anything else is returned
/// as-is.
fn format_error_body(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };

    let message = json
        .get("detail")
        .and_then(|v| v.as_str())
        .or_else(|| json.get("error")?.get("message")?.as_str())
        .or_else(|| json.get("error")?.as_str())
        .or_else(|| json.get("message")?.as_str());

    match message {
        Some(msg) => msg.to_string(),
        None => body.trim().to_string(),
    }
}
