//! Request parameter extraction.
//!
//! Sticky values derive from named request parameters, so query-string and
//! urlencoded-form pairs are folded into one flat map before derivation.
//! Query pairs win over form pairs on key collision.

use axum::http::request::Parts;

use crate::cluster::Params;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Collect the request's parameters from the query string and, when the
/// content type says so, the buffered urlencoded body.
pub fn extract_params(parts: &Parts, body: &[u8]) -> Params {
    let mut params = Params::new();

    if is_form(parts) {
        for (key, value) in url::form_urlencoded::parse(body) {
            params.insert(key.into_owned(), value.into_owned());
        }
    }

    if let Some(query) = parts.uri.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.insert(key.into_owned(), value.into_owned());
        }
    }

    params
}

fn is_form(parts: &Parts) -> bool {
    parts
        .headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with(FORM_CONTENT_TYPE))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn parts(uri: &str, content_type: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        builder.body(Body::empty()).unwrap().into_parts().0
    }

    #[test]
    fn query_pairs_are_collected() {
        let params = extract_params(&parts("/publish?channel=42&client=c9", None), b"");
        assert_eq!(params.get("channel").map(String::as_str), Some("42"));
        assert_eq!(params.get("client").map(String::as_str), Some("c9"));
    }

    #[test]
    fn form_body_read_only_with_matching_content_type() {
        let body = b"channel=42";
        let without = extract_params(&parts("/publish", None), body);
        assert!(without.is_empty());

        let with = extract_params(
            &parts("/publish", Some("application/x-www-form-urlencoded")),
            body,
        );
        assert_eq!(with.get("channel").map(String::as_str), Some("42"));
    }

    #[test]
    fn query_wins_over_form_on_collision() {
        let params = extract_params(
            &parts(
                "/publish?channel=query",
                Some("application/x-www-form-urlencoded; charset=utf-8"),
            ),
            b"channel=form",
        );
        assert_eq!(params.get("channel").map(String::as_str), Some("query"));
    }

    #[test]
    fn percent_encoding_is_decoded() {
        let params = extract_params(&parts("/publish?channel=a%20b", None), b"");
        assert_eq!(params.get("channel").map(String::as_str), Some("a b"));
    }
}
