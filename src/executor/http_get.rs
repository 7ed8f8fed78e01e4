//! HTTP GET executor, plus the HTTP plumbing shared with the POST executor.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response, redirect};
use tracing::{info, warn};

use crate::classify::MethodKind;
use crate::config::ExecutorConfig;
use crate::error::{Refusal, TransportError};
use crate::executor::rate_limiter::RateLimiter;
use crate::executor::{ExecutionOutcome, ExecutionRequest, Executor, check_preconditions};
use crate::redact::redact_url;
use crate::safety::SafetyValidator;

const MAX_REDIRECTS: usize = 10;
const ERROR_BODY_CHARS: usize = 200;

/// Client with the configured timeout, user agent and redirect policy.
pub(crate) fn build_client(config: &ExecutorConfig) -> Result<Client, TransportError> {
    Client::builder()
        .timeout(config.timeout)
        .redirect(redirect::Policy::limited(MAX_REDIRECTS))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| TransportError::Request(format!("Failed to build HTTP client: {e}")))
}

pub(crate) fn map_send_error(e: reqwest::Error, config: &ExecutorConfig) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            after: config.timeout,
        }
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

/// 2xx → `Ok(status)`, anything else → `HttpStatus` with the start of the body.
pub(crate) async fn check_response(response: Response) -> Result<Option<u16>, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(Some(status.as_u16()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::HttpStatus {
        status: status.as_u16(),
        body: body.chars().take(ERROR_BODY_CHARS).collect(),
    })
}

/// Follows an unsubscribe link with a plain GET.
pub struct HttpGetExecutor {
    config: ExecutorConfig,
    client: Client,
    limiter: RateLimiter,
    safety: Arc<SafetyValidator>,
}

impl HttpGetExecutor {
    pub fn new(
        config: ExecutorConfig,
        safety: Arc<SafetyValidator>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(&config)?,
            limiter: RateLimiter::new(config.rate_limit_delay),
            config,
            safety,
        })
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn get(&self, url: &str) -> Result<Option<u16>, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.config))?;
        check_response(response).await
    }
}

#[async_trait]
impl Executor for HttpGetExecutor {
    fn name(&self) -> &'static str {
        "http_get"
    }

    fn accepts(&self) -> &'static [MethodKind] {
        &[MethodKind::HttpGet]
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, Refusal> {
        let (method, warnings) = check_preconditions(
            request,
            self.accepts(),
            self.name(),
            &self.config,
            &self.safety,
        )?;
        let subscriber_id = request.subscriber.id;
        let url = method.target();
        let shown = redact_url(url);

        if self.config.dry_run {
            info!(subscriber_id = %subscriber_id, url = %shown, "Dry run: skipping GET");
            return Ok(ExecutionOutcome::dry_run(
                subscriber_id,
                method,
                format!("DRY RUN: would GET {shown}"),
                warnings,
            ));
        }

        self.limiter.acquire().await;
        let result = self.get(url).await;
        match &result {
            Ok(code) => info!(
                subscriber_id = %subscriber_id,
                url = %shown,
                status = ?code,
                "GET unsubscribe succeeded"
            ),
            Err(e) => warn!(
                subscriber_id = %subscriber_id,
                url = %shown,
                error = %e,
                "GET unsubscribe failed"
            ),
        }
        Ok(ExecutionOutcome::finished(
            subscriber_id,
            method,
            result,
            format!("GET {shown}"),
            warnings,
        ))
    }
}
