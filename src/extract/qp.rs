//! Quoted-printable repair for bodies that reach us still soft-wrapped.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static SOFT_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"=\r?\n").unwrap());
static ENCODED_EQUALS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)=3D").unwrap());

/// Join soft-wrapped lines and decode `=3D`.
///
/// A trailing `=` directly followed by `\n` or `\r\n` is removed together
/// with the line terminator, so URLs split across encoded lines become one
/// token again. `=3D` (any case) becomes a literal `=`.
pub fn unwrap_soft_breaks(input: &str) -> Cow<'_, str> {
    let joined = SOFT_BREAK.replace_all(input, "");
    if !ENCODED_EQUALS.is_match(&joined) {
        return joined;
    }
    Cow::Owned(ENCODED_EQUALS.replace_all(&joined, "=").into_owned())
}
