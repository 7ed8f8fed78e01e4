//! Masking of one-time tokens and credentials in logged URLs.

use std::sync::LazyLock;

use regex::Regex;

static SENSITIVE_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([?&;](?:[a-z0-9_]*_)?(?:token|key|secret|password|api_key|auth|sig)[a-z0-9_]*=)[^&#\s]*")
        .unwrap()
});

/// Replace the value of sensitive query parameters with `***`.
pub fn redact_url(url: &str) -> String {
    SENSITIVE_PARAM.replace_all(url, "${1}***").into_owned()
}
