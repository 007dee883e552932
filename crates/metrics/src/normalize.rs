//! Route template to metric name normalization.

use {once_cell::sync::Lazy, regex::Regex};

// `$id<[^/]+>` style constraints; the pattern may itself contain `/`.
#[allow(clippy::expect_used)]
static TYPE_ANNOTATION: Lazy<Regex> =
    Lazy::new(|| Regex::new("<[^>]*>").expect("valid literal regex"));

/// Normalizes a declared route template into a metric-name-safe dotted
/// path.
///
/// The template text is transformed, never a concrete request path, so
/// dynamic segments stay literal placeholder tokens and the name space
/// keeps bounded cardinality. A single leading separator is stripped;
/// remaining separators and the querystring marker become `.`; embedded
/// type annotations (`<...>`) are dropped; `:`, `&`, `$`, `{` and
/// whitespace become `_`, and `}` is dropped, so `/user/:id` and
/// `/user/{id}` normalize identically.
///
/// `normalize("/foo/:firstId/bar/:secondId")` is
/// `"foo._firstId.bar._secondId"`.
#[must_use]
pub fn normalize(template: &str) -> String {
    let template = template.strip_prefix('/').unwrap_or(template);
    let stripped = TYPE_ANNOTATION.replace_all(template, "");
    let mut name = String::with_capacity(stripped.len());
    for ch in stripped.chars() {
        match ch {
            '/' | '?' => name.push('.'),
            ':' | '&' | '$' | '{' => name.push('_'),
            '}' => {}
            c if c.is_whitespace() => name.push('_'),
            c => name.push(c),
        }
    }
    name
}
