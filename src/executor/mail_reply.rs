//! Mail-reply executor: sends the unsubscribe message a `mailto:` asks for.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::classify::{ClassifiedMethod, MethodKind};
use crate::config::{ExecutorConfig, SmtpConfig};
use crate::credentials::{AccountCredentials, CredentialResolver};
use crate::error::{PreconditionFailed, Refusal, TransportError};
use crate::executor::rate_limiter::RateLimiter;
use crate::executor::{ExecutionOutcome, ExecutionRequest, Executor, check_preconditions};
use crate::safety::SafetyValidator;

/// SMTP reply codes that mean the server rejected our login.
const AUTH_FAILURE_CODES: &[&str] = &["454", "530", "534", "535", "538"];

/// A plain-text message ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Authenticated, encrypted mail submission.
#[async_trait]
pub trait MailSubmitter: Send + Sync {
    async fn submit(
        &self,
        creds: &AccountCredentials,
        mail: &OutgoingMail,
    ) -> Result<(), TransportError>;
}

/// lettre-backed STARTTLS submitter.
pub struct SmtpSubmitter {
    smtp: SmtpConfig,
    timeout: Duration,
}

impl SmtpSubmitter {
    pub fn new(smtp: SmtpConfig, timeout: Duration) -> Self {
        Self { smtp, timeout }
    }
}

fn is_auth_failure(code: &str) -> bool {
    AUTH_FAILURE_CODES.contains(&code)
}

fn classify_connect_error(e: &lettre::transport::smtp::Error) -> TransportError {
    let is_auth = e
        .status()
        .is_some_and(|code| is_auth_failure(&code.to_string()));
    if is_auth {
        TransportError::SmtpAuth(e.to_string())
    } else {
        TransportError::SmtpConnect(e.to_string())
    }
}

fn build_message(mail: &OutgoingMail) -> Result<Message, TransportError> {
    Message::builder()
        .from(
            mail.from
                .parse()
                .map_err(|e| TransportError::SmtpSend(format!("Invalid from address: {e}")))?,
        )
        .to(mail
            .to
            .parse()
            .map_err(|e| TransportError::SmtpSend(format!("Invalid to address: {e}")))?)
        .subject(mail.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(mail.body.clone())
        .map_err(|e| TransportError::SmtpSend(format!("Failed to build email: {e}")))
}

#[async_trait]
impl MailSubmitter for SmtpSubmitter {
    async fn submit(
        &self,
        creds: &AccountCredentials,
        mail: &OutgoingMail,
    ) -> Result<(), TransportError> {
        let message = build_message(mail)?;
        let host = self.smtp.host.clone();
        let port = self.smtp.port;
        let timeout = self.timeout;
        let login = Credentials::new(
            creds.username.clone(),
            creds.secret.expose_secret().to_string(),
        );

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || {
            let transport = SmtpTransport::starttls_relay(&host)
                .map_err(|e| TransportError::SmtpConnect(format!("SMTP relay error: {e}")))?
                .port(port)
                .credentials(login)
                .timeout(Some(timeout))
                .build();

            match transport.test_connection() {
                Ok(true) => {}
                Ok(false) => {
                    return Err(TransportError::SmtpConnect(format!(
                        "{host}:{port} did not accept the connection"
                    )));
                }
                Err(e) => return Err(classify_connect_error(&e)),
            }

            transport
                .send(&message)
                .map(|_| ())
                .map_err(|e| TransportError::SmtpSend(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::SmtpSend(format!("Mail task failed: {e}")))?
    }
}

/// Replies to a `mailto:` unsubscribe address from the owning account.
pub struct MailReplyExecutor {
    config: ExecutorConfig,
    limiter: RateLimiter,
    safety: Arc<SafetyValidator>,
    credentials: Arc<dyn CredentialResolver>,
    submitter: Arc<dyn MailSubmitter>,
}

impl MailReplyExecutor {
    pub fn new(
        config: ExecutorConfig,
        safety: Arc<SafetyValidator>,
        credentials: Arc<dyn CredentialResolver>,
        submitter: Arc<dyn MailSubmitter>,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(config.rate_limit_delay),
            config,
            safety,
            credentials,
            submitter,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl Executor for MailReplyExecutor {
    fn name(&self) -> &'static str {
        "email_reply"
    }

    fn accepts(&self) -> &'static [MethodKind] {
        &[MethodKind::EmailReply]
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, Refusal> {
        let (method, warnings) = check_preconditions(
            request,
            self.accepts(),
            self.name(),
            &self.config,
            &self.safety,
        )?;
        let ClassifiedMethod::EmailReply {
            recipient,
            subject,
            body,
            ..
        } = method
        else {
            return Err(PreconditionFailed::WrongMethod {
                expected: self.name().to_string(),
                found: method.kind(),
            }
            .into());
        };

        let account_id = &request.subscriber.account_id;
        let creds = self.credentials.resolve(account_id).ok_or_else(|| {
            PreconditionFailed::MissingCredentials {
                account_id: account_id.clone(),
            }
        })?;

        let mail = OutgoingMail {
            from: creds.username.clone(),
            to: recipient.clone(),
            subject: subject.clone(),
            body: body.clone(),
        };
        let subscriber_id = request.subscriber.id;

        if self.config.dry_run {
            info!(subscriber_id = %subscriber_id, to = %mail.to, "Dry run: skipping mail reply");
            return Ok(ExecutionOutcome::dry_run(
                subscriber_id,
                method,
                format!(
                    "DRY RUN: would send mail from {} to {} with subject {:?}",
                    mail.from, mail.to, mail.subject
                ),
                warnings,
            ));
        }

        self.limiter.acquire().await;
        let result = self.submitter.submit(&creds, &mail).await.map(|()| None);
        match &result {
            Ok(_) => info!(
                subscriber_id = %subscriber_id,
                to = %mail.to,
                "Unsubscribe mail sent"
            ),
            Err(e) => warn!(
                subscriber_id = %subscriber_id,
                to = %mail.to,
                error = %e,
                "Unsubscribe mail failed"
            ),
        }
        Ok(ExecutionOutcome::finished(
            subscriber_id,
            method,
            result,
            format!("mail to {} with subject {:?}", mail.to, mail.subject),
            warnings,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::executor::AttemptStatus;
    use crate::store::Subscriber;

    #[derive(Default)]
    struct RecordingSubmitter {
        sent: Mutex<Vec<OutgoingMail>>,
        fail_with: Option<TransportError>,
    }

    #[async_trait]
    impl MailSubmitter for RecordingSubmitter {
        async fn submit(
            &self,
            _creds: &AccountCredentials,
            mail: &OutgoingMail,
        ) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(mail.clone());
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    fn reply_request(account: &str) -> ExecutionRequest {
        let mut subscriber = Subscriber::new(account, "news@shop.test");
        subscriber.active_method = Some(ClassifiedMethod::EmailReply {
            target: "mailto:leave@shop.test?subject=Stop".into(),
            recipient: "leave@shop.test".into(),
            subject: "Stop".into(),
            body: "Please unsubscribe me from this mailing list.".into(),
        });
        ExecutionRequest {
            subscriber,
            failed_attempts: 0,
        }
    }

    fn executor(
        config: ExecutorConfig,
        submitter: Arc<RecordingSubmitter>,
    ) -> MailReplyExecutor {
        let creds = StaticCredentials::new()
            .with_account("acct", AccountCredentials::new("me@home.test", "pw"));
        MailReplyExecutor::new(
            config,
            Arc::new(SafetyValidator::default()),
            Arc::new(creds),
            submitter,
        )
    }

    #[tokio::test]
    async fn sends_plain_text_mail_from_account_address() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let exec = executor(ExecutorConfig::default(), submitter.clone());

        let outcome = exec.execute(&reply_request("acct")).await.unwrap();
        assert!(outcome.is_success());

        let sent = submitter.sent.lock().unwrap();
        assert_eq!(
            sent[0],
            OutgoingMail {
                from: "me@home.test".into(),
                to: "leave@shop.test".into(),
                subject: "Stop".into(),
                body: "Please unsubscribe me from this mailing list.".into(),
            }
        );
    }

    #[tokio::test]
    async fn missing_credentials_is_a_precondition_failure() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let exec = executor(ExecutorConfig::default(), submitter.clone());

        let refusal = exec.execute(&reply_request("unknown")).await.unwrap_err();
        assert_eq!(
            refusal,
            Refusal::Precondition(PreconditionFailed::MissingCredentials {
                account_id: "unknown".into()
            })
        );
        assert!(submitter.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn auth_failure_is_recorded_distinctly() {
        let submitter = Arc::new(RecordingSubmitter {
            sent: Mutex::default(),
            fail_with: Some(TransportError::SmtpAuth("535 bad credentials".into())),
        });
        let exec = executor(ExecutorConfig::default(), submitter);

        let outcome = exec.execute(&reply_request("acct")).await.unwrap();
        assert_eq!(outcome.status(), AttemptStatus::Failed);
        assert!(matches!(outcome.error, Some(TransportError::SmtpAuth(_))));
        assert!(outcome.attempt.error_message.unwrap().contains("authentication"));
    }

    #[tokio::test]
    async fn dry_run_sends_nothing() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let config = ExecutorConfig {
            dry_run: true,
            ..ExecutorConfig::default()
        };
        let exec = executor(config, submitter.clone());

        let outcome = exec.execute(&reply_request("acct")).await.unwrap();
        assert!(outcome.is_dry_run());
        assert!(outcome.description.starts_with("DRY RUN"));
        assert!(submitter.sent.lock().unwrap().is_empty());
        assert!(exec.rate_limiter().last_action().await.is_none());
    }

    #[test]
    fn message_builds_with_plain_text_body() {
        let mail = OutgoingMail {
            from: "me@home.test".into(),
            to: "leave@shop.test".into(),
            subject: "Unsubscribe".into(),
            body: "bye".into(),
        };
        assert!(build_message(&mail).is_ok());

        let bad = OutgoingMail {
            to: "not an address".into(),
            ..mail
        };
        assert!(matches!(build_message(&bad), Err(TransportError::SmtpSend(_))));
    }

    #[test]
    fn only_login_rejections_count_as_auth_failures() {
        for code in ["454", "530", "534", "535", "538"] {
            assert!(is_auth_failure(code), "{code}");
        }
        for code in ["421", "450", "550", "554"] {
            assert!(!is_auth_failure(code), "{code}");
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connect_error() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let submitter = SmtpSubmitter::new(
            SmtpConfig {
                host: "127.0.0.1".into(),
                port,
            },
            Duration::from_secs(2),
        );
        let mail = OutgoingMail {
            from: "me@home.test".into(),
            to: "leave@shop.test".into(),
            subject: "Unsubscribe".into(),
            body: "bye".into(),
        };

        let err = submitter
            .submit(&AccountCredentials::new("me@home.test", "pw"), &mail)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::SmtpConnect(_)), "{err:?}");
    }
}
