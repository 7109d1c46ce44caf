//! Request path normalization for span names

use std::sync::OnceLock;

use regex::Regex;

/// Placeholder substituted for identifier-like path segments
pub const ID_PLACEHOLDER: &str = "<id>";

/// Segments longer than this are treated as identifiers
const MAX_SEGMENT_LEN: usize = 32;

fn id_segment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^[0-9a-f\-:]+$").expect("static regex is valid"))
}

/// Collapse identifier-like path segments into `<id>` and strip query strings
///
/// The part of a segment before `?` goes through the same identifier check,
/// which keeps the transform idempotent.
///
/// ```
/// use pxotel::adapter::normalize_path;
///
/// assert_eq!(normalize_path("/users/42/orders?page=2"), "/users/<id>/orders");
/// ```
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let segment = segment.split_once('?').map_or(segment, |(head, _)| head);
            if id_segment().is_match(segment) || segment.len() > MAX_SEGMENT_LEN {
                ID_PLACEHOLDER
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_segments() {
        assert_eq!(normalize_path("category/123"), "category/<id>");
        assert_eq!(normalize_path("category/123-456"), "category/<id>");
        assert_eq!(normalize_path("category/name"), "category/name");
    }

    #[test]
    fn test_hex_uuid_and_ipv6_like_segments() {
        assert_eq!(
            normalize_path("/orders/3F2504E0-4F89-11D3-9A0C-0305E82C3301/items"),
            "/orders/<id>/items"
        );
        assert_eq!(normalize_path("/peer/fe80::1"), "/peer/<id>");
        assert_eq!(normalize_path("/deadbeef"), "/<id>");
    }

    #[test]
    fn test_query_string_truncated() {
        assert_eq!(normalize_path("/search?q=123"), "/search");
        assert_eq!(normalize_path("/items/7?x=1"), "/items/<id>");
    }

    #[test]
    fn test_long_segments() {
        let long = "a".repeat(40) + "z";
        assert_eq!(normalize_path(&format!("/blob/{}", long)), "/blob/<id>");
        let edge = "z".repeat(32);
        assert_eq!(normalize_path(&format!("/blob/{}", edge)), format!("/blob/{}", edge));
    }

    #[test]
    fn test_empty_segments_preserved() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("/api//v1/"), "/api//v1/");
    }

    #[test]
    fn test_idempotent() {
        for path in [
            "category/123",
            "/a/b?c=1/d",
            "/items/7?x=1",
            "/orders/3f2504e0-4f89-11d3/items?x",
            "/users/name/profile",
        ] {
            let once = normalize_path(path);
            assert_eq!(normalize_path(&once), once, "path {}", path);
        }
    }
}
