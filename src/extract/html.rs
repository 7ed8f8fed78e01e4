//! Bounded HTML scanning for unsubscribe anchors and POST forms.
//!
//! This is not an HTML parser. It looks for `<a>` and `<form>` elements with
//! regexes, reads their attributes, and keeps the ones that show unsubscribe
//! intent. Anything it cannot make sense of is skipped.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::ExtractionError;
use crate::extract::qp::unwrap_soft_breaks;
use crate::extract::text::contextual_addresses;
use crate::extract::{FormContext, has_unsubscribe_intent};

static FORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<form\b([^>]*)>(.*?)</form\s*>").unwrap());

static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").unwrap());

static INPUT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<input\b([^>]*)>").unwrap());

static SELECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<select\b([^>]*)>(.*?)</select\s*>").unwrap());

static OPTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<option\b").unwrap());

static MULTIPLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bmultiple\b").unwrap());

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#)
        .unwrap()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// One unsubscribe target found in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyLink {
    pub value: String,
    pub form: Option<FormContext>,
}

/// Scan an HTML body for unsubscribe anchors, POST forms and addresses.
///
/// Anchors and forms come back in document order, followed by bare
/// addresses found near a keyword in the visible text.
pub fn scan_html(html: &str, window: usize) -> Vec<BodyLink> {
    let html = unwrap_soft_breaks(html);
    let html = html.as_ref();

    let mut found: Vec<(usize, BodyLink)> = Vec::new();

    for cap in FORM_RE.captures_iter(html) {
        let Some(whole) = cap.get(0) else { continue };
        let attrs = parse_attrs(&cap[1]);
        let is_post = attrs
            .get("method")
            .is_some_and(|m| m.trim().eq_ignore_ascii_case("post"));
        if !is_post || !has_unsubscribe_intent(whole.as_str()) {
            continue;
        }
        match form_link(&attrs, &cap[2]) {
            Ok(link) => found.push((whole.start(), link)),
            Err(e) => debug!(error = %e, "Dropping unsubscribe form"),
        }
    }

    for cap in ANCHOR_RE.captures_iter(html) {
        let Some(whole) = cap.get(0) else { continue };
        let attrs = parse_attrs(&cap[1]);
        let Some(href) = attrs.get("href").map(|h| h.trim()).filter(|h| !h.is_empty()) else {
            continue;
        };
        let label = strip_tags(&cap[2]);
        if has_unsubscribe_intent(&label)
            || has_unsubscribe_intent(href)
            || is_unsubscribe_mailto(href)
        {
            found.push((
                whole.start(),
                BodyLink {
                    value: href.to_string(),
                    form: None,
                },
            ));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    let mut links: Vec<BodyLink> = found.into_iter().map(|(_, link)| link).collect();

    let visible = strip_tags(html);
    links.extend(
        contextual_addresses(&visible, window, &[])
            .into_iter()
            .map(|addr| BodyLink {
                value: format!("mailto:{addr}"),
                form: None,
            }),
    );

    links
}

fn is_unsubscribe_mailto(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.starts_with("mailto:") && lower.contains("unsubscribe")
}

fn form_link(attrs: &HashMap<String, String>, inner: &str) -> Result<BodyLink, ExtractionError> {
    let action = attrs
        .get("action")
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .ok_or(ExtractionError::MissingFormAction)?;

    let mut hidden_fields = BTreeMap::new();
    let mut selection_required: Option<String> = None;

    for input in INPUT_RE.captures_iter(inner) {
        let input_attrs = parse_attrs(&input[1]);
        let kind = input_attrs
            .get("type")
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "text".to_string());
        match kind.as_str() {
            "hidden" => {
                if let Some(name) = input_attrs.get("name").filter(|n| !n.is_empty()) {
                    let value = input_attrs.get("value").cloned().unwrap_or_default();
                    hidden_fields.insert(name.clone(), value);
                }
            }
            "checkbox" | "radio" => {
                selection_required
                    .get_or_insert_with(|| format!("form asks the user to tick a {kind} option"));
            }
            _ => {}
        }
    }

    for select in SELECT_RE.captures_iter(inner) {
        let options = OPTION_RE.find_iter(&select[2]).count();
        if MULTIPLE_RE.is_match(&select[1]) || options > 1 {
            selection_required.get_or_insert_with(|| {
                format!("form asks the user to choose from a list of {options} options")
            });
        }
    }

    Ok(BodyLink {
        value: action.to_string(),
        form: Some(FormContext {
            hidden_fields,
            selection_required,
        }),
    })
}

/// Attribute name (lower-cased) → entity-decoded value.
fn parse_attrs(raw: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(raw)
        .filter_map(|cap| {
            let name = cap.get(1)?.as_str().to_ascii_lowercase();
            let value = cap.get(2).or_else(|| cap.get(3)).or_else(|| cap.get(4))?;
            Some((name, decode_entities(value.as_str())))
        })
        .collect()
}

fn strip_tags(html: &str) -> String {
    let text = TAG_RE.replace_all(html, " ");
    let text = decode_entities(&text);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the handful of entities that show up in hrefs and link labels.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
