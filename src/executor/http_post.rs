//! HTTP POST executor for form submissions and RFC 8058 one-click.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};

use crate::classify::{ClassifiedMethod, MethodKind};
use crate::config::ExecutorConfig;
use crate::error::{Refusal, TransportError};
use crate::executor::http_get::{build_client, check_response, map_send_error};
use crate::executor::rate_limiter::RateLimiter;
use crate::executor::{ExecutionOutcome, ExecutionRequest, Executor, check_preconditions};
use crate::extract::headers::{LIST_UNSUBSCRIBE, ONE_CLICK_VALUE};
use crate::redact::redact_url;
use crate::safety::SafetyValidator;

/// Form body sent for one-click requests: `List-Unsubscribe=One-Click`.
fn one_click_form() -> BTreeMap<String, String> {
    let (name, value) = ONE_CLICK_VALUE
        .split_once('=')
        .unwrap_or((LIST_UNSUBSCRIBE, "One-Click"));
    BTreeMap::from([(name.to_string(), value.to_string())])
}

/// Submits unsubscribe forms and one-click POSTs.
pub struct HttpPostExecutor {
    config: ExecutorConfig,
    client: Client,
    limiter: RateLimiter,
    safety: Arc<SafetyValidator>,
}

impl HttpPostExecutor {
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

    async fn post(
        &self,
        url: &str,
        fields: &BTreeMap<String, String>,
        one_click: bool,
    ) -> Result<Option<u16>, TransportError> {
        let mut builder = self.client.post(url).form(fields);
        if one_click {
            builder = builder.header(LIST_UNSUBSCRIBE, "One-Click");
        }
        let response = builder
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.config))?;
        check_response(response).await
    }
}

#[async_trait]
impl Executor for HttpPostExecutor {
    fn name(&self) -> &'static str {
        "http_post"
    }

    fn accepts(&self) -> &'static [MethodKind] {
        &[MethodKind::HttpPost, MethodKind::OneClick]
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

        let one_click = matches!(method, ClassifiedMethod::OneClick { .. });
        let fields = match method {
            ClassifiedMethod::HttpPost { form_fields, .. } => form_fields.clone(),
            _ => one_click_form(),
        };
        let label = if one_click { "one-click POST" } else { "POST" };

        if self.config.dry_run {
            info!(
                subscriber_id = %subscriber_id,
                url = %shown,
                one_click,
                "Dry run: skipping POST"
            );
            return Ok(ExecutionOutcome::dry_run(
                subscriber_id,
                method,
                format!("DRY RUN: would {label} {shown} with {} field(s)", fields.len()),
                warnings,
            ));
        }

        self.limiter.acquire().await;
        let result = self.post(url, &fields, one_click).await;
        match &result {
            Ok(code) => info!(
                subscriber_id = %subscriber_id,
                url = %shown,
                status = ?code,
                one_click,
                "POST unsubscribe succeeded"
            ),
            Err(e) => warn!(
                subscriber_id = %subscriber_id,
                url = %shown,
                error = %e,
                one_click,
                "POST unsubscribe failed"
            ),
        }
        Ok(ExecutionOutcome::finished(
            subscriber_id,
            method,
            result,
            format!("{label} {shown}"),
            warnings,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_click_body_matches_rfc_8058() {
        let form = one_click_form();
        assert_eq!(form.len(), 1);
        assert_eq!(form["List-Unsubscribe"], "One-Click");
    }
}
