//! Plain-text scanning: bare URLs and addresses near an unsubscribe keyword.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::extract::has_unsubscribe_intent;
use crate::extract::qp::unwrap_soft_breaks;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:https?://|mailto:)[^\s<>"'()\[\]]+"#).unwrap()
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").unwrap()
});

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '*'];

/// Find unsubscribe URLs in a plain-text body.
///
/// A URL qualifies when it carries an intent keyword itself, or when one
/// appears within `window` bytes before or after it. The context never
/// reaches past a neighbouring URL, so a "view in browser" link that
/// follows an unsubscribe link is not picked up by the earlier keyword.
/// Bare addresses in the same kind of context come back as `mailto:` URIs.
pub fn scan_text(text: &str, window: usize) -> Vec<String> {
    let text = unwrap_soft_breaks(text);
    let text = text.as_ref();

    let spans: Vec<Range<usize>> = URL_RE
        .find_iter(text)
        .map(|m| {
            let trimmed = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
            m.start()..m.start() + trimmed.len()
        })
        .filter(|span| !span.is_empty())
        .collect();

    let mut out = Vec::new();
    for (i, span) in spans.iter().enumerate() {
        let url = &text[span.clone()];
        let lower_bound = if i == 0 { 0 } else { spans[i - 1].end };
        let upper_bound = spans.get(i + 1).map_or(text.len(), |next| next.start);

        if has_unsubscribe_intent(url)
            || has_unsubscribe_intent(context_before(text, span.start, lower_bound, window))
            || has_unsubscribe_intent(context_after(text, span.end, upper_bound, window))
        {
            out.push(url.to_string());
        }
    }

    out.extend(
        contextual_addresses(text, window, &spans)
            .into_iter()
            .map(|addr| format!("mailto:{addr}")),
    );
    out
}

/// Bare e-mail addresses with an intent keyword within `window` bytes.
///
/// Addresses that sit inside one of `exclude` (typically URL spans) are
/// skipped.
pub fn contextual_addresses(text: &str, window: usize, exclude: &[Range<usize>]) -> Vec<String> {
    EMAIL_RE
        .find_iter(text)
        .filter(|m| {
            !exclude
                .iter()
                .any(|span| m.start() < span.end && span.start < m.end())
        })
        .filter(|m| {
            has_unsubscribe_intent(context_before(text, m.start(), 0, window))
                || has_unsubscribe_intent(context_after(text, m.end(), text.len(), window))
        })
        .map(|m| m.as_str().to_string())
        .collect()
}

fn context_before(text: &str, start: usize, lower_bound: usize, window: usize) -> &str {
    let from = floor_boundary(text, start.saturating_sub(window).max(lower_bound));
    &text[from.min(start)..start]
}

fn context_after(text: &str, end: usize, upper_bound: usize, window: usize) -> &str {
    let to = ceil_boundary(text, end.saturating_add(window).min(upper_bound));
    &text[end..to.max(end)]
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
