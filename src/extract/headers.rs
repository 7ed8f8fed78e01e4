//! RFC 2369 `List-Unsubscribe` and RFC 8058 `List-Unsubscribe-Post` parsing.

use std::collections::HashMap;

use crate::error::ExtractionError;

pub const LIST_UNSUBSCRIBE: &str = "List-Unsubscribe";
pub const LIST_UNSUBSCRIBE_POST: &str = "List-Unsubscribe-Post";

/// The only `List-Unsubscribe-Post` value RFC 8058 defines.
pub const ONE_CLICK_VALUE: &str = "List-Unsubscribe=One-Click";

/// Case-insensitive, multi-valued header mapping. Insertion order is kept.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header value; earlier values with the same name are kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a str> + use<'a, 'b> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lower-cased name → values, for persistence and debugging.
    pub fn to_grouped(&self) -> HashMap<String, Vec<String>> {
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in &self.entries {
            grouped
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.clone());
        }
        grouped
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Split one `List-Unsubscribe` value into its URIs.
///
/// Each comma-separated entry must be enclosed in angle brackets. Entries
/// that are not come back as `Err` so the caller can log and skip them
/// without losing their neighbours. Whitespace inside the brackets (left
/// over from header folding) is removed.
pub fn parse_list_unsubscribe(value: &str) -> Vec<Result<String, ExtractionError>> {
    let mut out = Vec::new();
    let mut rest = value;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        if let Some(after_open) = rest.strip_prefix('<') {
            let Some(close) = after_open.find('>') else {
                out.push(Err(ExtractionError::UnbracketedEntry(rest.trim().to_string())));
                break;
            };
            let uri: String = after_open[..close]
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            if uri.is_empty() {
                out.push(Err(ExtractionError::EmptyEntry));
            } else {
                out.push(Ok(uri));
            }
            rest = &after_open[close + 1..];
            // Comments or junk between the bracket and the next comma are ignored.
            rest = match rest.find(',') {
                Some(comma) => &rest[comma..],
                None => "",
            };
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            out.push(Err(ExtractionError::UnbracketedEntry(
                rest[..end].trim().to_string(),
            )));
            rest = &rest[end..];
        }
    }

    out
}

/// Whether the headers advertise RFC 8058 one-click unsubscribe.
pub fn advertises_one_click(headers: &HeaderMap) -> bool {
    headers.get_all(LIST_UNSUBSCRIBE_POST).any(|value| {
        value
            .split(|c: char| c == ',' || c == ';')
            .any(|part| {
                let compact: String = part.chars().filter(|c| !c.is_whitespace()).collect();
                compact.eq_ignore_ascii_case(ONE_CLICK_VALUE)
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_values(value: &str) -> Vec<String> {
        parse_list_unsubscribe(value)
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }

    #[test]
    fn header_map_is_case_insensitive_and_multi_valued() {
        let headers: HeaderMap = [
            ("List-Unsubscribe", "<https://a.test/u>"),
            ("list-unsubscribe", "<mailto:u@a.test>"),
            ("Subject", "hi"),
        ]
        .into_iter()
        .collect();

        let values: Vec<&str> = headers.get_all("LIST-UNSUBSCRIBE").collect();
        assert_eq!(values, vec!["<https://a.test/u>", "<mailto:u@a.test>"]);
        assert_eq!(headers.get("subject"), Some("hi"));
        assert!(!headers.contains("List-Unsubscribe-Post"));
        assert_eq!(headers.to_grouped()["list-unsubscribe"].len(), 2);
    }

    #[test]
    fn k_uris_yield_k_entries_in_order() {
        let value =
            "<mailto:leave@list.test?subject=bye>, <https://list.test/u/1>,<https://list.test/u/2>";
        assert_eq!(
            ok_values(value),
            vec![
                "mailto:leave@list.test?subject=bye",
                "https://list.test/u/1",
                "https://list.test/u/2",
            ]
        );
    }

    #[test]
    fn folded_whitespace_inside_brackets_is_removed() {
        let value = "<https://list.test/unsub?\r\n id=42>";
        assert_eq!(ok_values(value), vec!["https://list.test/unsub?id=42"]);
    }

    #[test]
    fn malformed_entries_are_reported_without_losing_neighbours() {
        let parsed = parse_list_unsubscribe("https://bare.test/u, <>, <https://ok.test/u>");
        assert_eq!(parsed.len(), 3);
        assert!(matches!(parsed[0], Err(ExtractionError::UnbracketedEntry(_))));
        assert_eq!(parsed[1], Err(ExtractionError::EmptyEntry));
        assert_eq!(parsed[2], Ok("https://ok.test/u".to_string()));
    }

    #[test]
    fn unterminated_bracket_is_an_error() {
        let parsed = parse_list_unsubscribe("<https://ok.test/u>, <https://broken.test");
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_ok());
        assert!(parsed[1].is_err());
    }

    #[test]
    fn comments_after_bracket_are_ignored() {
        assert_eq!(
            ok_values("<https://a.test/u> (web), <mailto:x@a.test> (mail)"),
            vec!["https://a.test/u", "mailto:x@a.test"]
        );
    }

    #[test]
    fn one_click_detection() {
        let mut headers = HeaderMap::new();
        assert!(!advertises_one_click(&headers));

        headers.insert("List-Unsubscribe-Post", "List-Unsubscribe=One-Click");
        assert!(advertises_one_click(&headers));

        let mut spaced = HeaderMap::new();
        spaced.insert("list-unsubscribe-post", " List-Unsubscribe = One-Click ");
        assert!(advertises_one_click(&spaced));

        let mut other = HeaderMap::new();
        other.insert("List-Unsubscribe-Post", "Something=Else");
        assert!(!advertises_one_click(&other));
    }
}
