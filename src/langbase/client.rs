use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{CreatePipeRequest, CreatePipeResponse, PipeRequest, PipeResponse};
use crate::config::{LangbaseConfig, PipeConfig, RequestConfig};
use crate::error::{InvokeError, InvokeResult};
use crate::invoker::{InvokeRequest, Message, ModelInvoker};
use crate::prompts::{CONSTITUTIONAL_REVIEW_PROMPT, CONSTITUTIONAL_REVISE_PROMPT, TOT_EXPAND_PROMPT};

/// Client for interacting with Langbase Pipes API
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> InvokeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(InvokeError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Call a Langbase pipe with the given request.
    ///
    /// Transient failures are retried with exponential backoff; permanent
    /// failures are returned immediately.
    pub async fn call_pipe(&self, request: PipeRequest) -> InvokeResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let pipe_name = request.name.clone();

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = self.backoff_delay(retries);
                warn!(
                    pipe = %pipe_name,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying Langbase request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, &request).await {
                Ok(response) => {
                    info!(
                        pipe = %pipe_name,
                        latency_ms = start.elapsed().as_millis(),
                        "Langbase pipe call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) if !e.is_transient() => {
                    error!(
                        pipe = %pipe_name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        "Langbase pipe call failed permanently"
                    );
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        pipe = %pipe_name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Langbase pipe call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(InvokeError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Delay before retry number `retry` (1-based), doubling each time and
    /// saturating instead of overflowing.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.request_config.retry_delay_ms.saturating_mul(factor))
    }

    /// Execute a single request (internal)
    async fn execute_request(&self, url: &str, request: &PipeRequest) -> InvokeResult<PipeResponse> {
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InvokeError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    InvokeError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(InvokeError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: PipeResponse =
            response
                .json()
                .await
                .map_err(|e| InvokeError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        if !pipe_response.success {
            return Err(InvokeError::InvalidResponse {
                message: "Pipe reported success=false".to_string(),
            });
        }

        Ok(pipe_response)
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a new pipe
    pub async fn create_pipe(
        &self,
        request: CreatePipeRequest,
    ) -> InvokeResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(InvokeError::Http)?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(InvokeError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: CreatePipeResponse =
            response
                .json()
                .await
                .map_err(|e| InvokeError::InvalidResponse {
                    message: format!("Failed to parse create pipe response: {}", e),
                })?;

        info!(
            pipe = %pipe_response.name,
            url = %pipe_response.url,
            "Pipe created successfully"
        );

        Ok(pipe_response)
    }

    /// Ensure the pattern pipes exist, creating or updating them as needed
    pub async fn ensure_pipes(&self, pipes: &PipeConfig) -> InvokeResult<()> {
        let specs = [
            (&pipes.tot, "Tree-of-Thoughts expansion", TOT_EXPAND_PROMPT, 0.7),
            (&pipes.review, "Constitutional review", CONSTITUTIONAL_REVIEW_PROMPT, 0.2),
            (&pipes.revise, "Constitutional revision", CONSTITUTIONAL_REVISE_PROMPT, 0.4),
        ];

        for (name, description, prompt, temperature) in specs {
            let request = CreatePipeRequest::new(name.as_str())
                .with_description(description)
                .with_model("openai:gpt-4o-mini")
                .with_upsert(true)
                .with_json_output(true)
                .with_temperature(temperature)
                .with_max_tokens(2000)
                .with_messages(vec![Message::system(prompt)]);

            match self.create_pipe(request).await {
                Ok(_) => info!(pipe = %name, "Pipe ready"),
                Err(InvokeError::Api { status: 409, .. }) => {
                    info!(pipe = %name, "Pipe already exists");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ModelInvoker for LangbaseClient {
    async fn invoke(&self, request: InvokeRequest) -> InvokeResult<String> {
        let InvokeRequest { messages, options } = request;

        let mut pipe_request = PipeRequest::new(options.model, messages).with_stop(options.stop);
        if let Some(temperature) = options.temperature {
            pipe_request = pipe_request.with_temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            pipe_request = pipe_request.with_max_tokens(max_tokens);
        }

        Ok(self.call_pipe(pipe_request).await?.completion)
    }
}
