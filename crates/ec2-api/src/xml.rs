//! Just enough XML scanning for EC2 Query API responses.
//!
//! EC2 responses are flat, attribute-free and never nest an element inside
//! one of the same name, which is all these helpers assume.

/// Text between the first `<tag>` and its matching `</tag>`.
pub(crate) fn tag_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

/// Bodies of every `<tag>...</tag>` element in document order.
pub(crate) fn elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(i) = rest.find(&open) {
        let body_start = i + open.len();
        let Some(len) = rest[body_start..].find(&close) else {
            break;
        };
        out.push(&rest[body_start..body_start + len]);
        rest = &rest[body_start + len + close.len()..];
    }
    out
}

pub(crate) fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
