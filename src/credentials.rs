//! Credential lookup for the mail-reply executor.
//!
//! Executors receive a [`CredentialResolver`] instead of reading a password
//! store themselves. `None` is a normal answer and becomes a
//! `MissingCredentials` precondition failure.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};

/// Login for one mail account. `username` doubles as the sender address.
#[derive(Debug)]
pub struct AccountCredentials {
    pub username: String,
    pub secret: SecretString,
}

impl AccountCredentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: SecretString::from(secret.into()),
        }
    }
}

impl Clone for AccountCredentials {
    fn clone(&self) -> Self {
        Self::new(self.username.clone(), self.secret.expose_secret())
    }
}

/// Resolves credentials for an account id.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, account_id: &str) -> Option<AccountCredentials>;
}

/// Fixed account → credentials map.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    accounts: HashMap<String, AccountCredentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(
        mut self,
        account_id: impl Into<String>,
        creds: AccountCredentials,
    ) -> Self {
        self.accounts.insert(account_id.into(), creds);
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, account_id: &str) -> Option<AccountCredentials> {
        self.accounts.get(account_id).cloned()
    }
}

/// One account configured through `UNSUB_SMTP_USERNAME` and
/// `UNSUB_SMTP_PASSWORD`.
///
/// The account is matched by `UNSUB_SMTP_ACCOUNT` when set, otherwise by the
/// username itself (case-insensitive).
#[derive(Debug, Default)]
pub struct EnvCredentials {
    account_id: Option<String>,
    creds: Option<AccountCredentials>,
}

impl EnvCredentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let creds = match (non_empty("UNSUB_SMTP_USERNAME"), non_empty("UNSUB_SMTP_PASSWORD")) {
            (Some(user), Some(pass)) => Some(AccountCredentials::new(user.trim(), pass)),
            _ => None,
        };
        Self {
            account_id: non_empty("UNSUB_SMTP_ACCOUNT"),
            creds,
        }
    }
}

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, account_id: &str) -> Option<AccountCredentials> {
        let creds = self.creds.as_ref()?;
        let matches = match &self.account_id {
            Some(id) => id == account_id,
            None => creds.username.eq_ignore_ascii_case(account_id),
        };
        matches.then(|| creds.clone())
    }
}
