//! Request forwarding to the owning node.
//!
//! # Responsibilities
//! - Reissue the inbound request against the owner's address
//! - Strip hop-by-hop / identity headers the outbound client regenerates
//! - Strip length/encoding headers from the relayed response so the local
//!   transport recomputes them
//!
//! # Design Decisions
//! - Transport failures are logged and surfaced; serving the request
//!   locally instead would violate session affinity

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderMap, Request, Response, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

/// Request headers dropped before forwarding; the outbound client and the
/// owner's transport regenerate them.
const HOP_REQUEST_HEADERS: [&str; 7] = [
    "content-length",
    "via",
    "x-forwarded-for",
    "connection",
    "host",
    "content-type",
    "user-agent",
];

/// Response headers dropped before relaying; the local transport must
/// recompute them rather than copy the upstream's.
const HOP_RESPONSE_HEADERS: [&str; 2] = ["content-length", "transfer-encoding"];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid forward target {0}")]
    Target(String),

    #[error("proxy transport failure: {0}")]
    Transport(String),
}

fn strip_request_headers(headers: &mut HeaderMap) {
    for name in HOP_REQUEST_HEADERS {
        headers.remove(name);
    }
}

fn strip_response_headers(headers: &mut HeaderMap) {
    for name in HOP_RESPONSE_HEADERS {
        headers.remove(name);
    }
}

/// Relays requests to the owning node over a shared pooled client.
#[derive(Clone)]
pub struct ProxyForwarder {
    client: Client<HttpConnector, Body>,
}

impl ProxyForwarder {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }

    /// Forward the request to `owner` (host:port), preserving method, path,
    /// query and body. Returns the owner's response with hop headers
    /// removed, or the transport error when the hop fails.
    pub async fn forward(
        &self,
        owner: &str,
        req: Request<Body>,
    ) -> Result<Response<Body>, ForwardError> {
        let (mut parts, body) = req.into_parts();
        strip_request_headers(&mut parts.headers);

        let authority: Authority = owner
            .parse()
            .map_err(|_| ForwardError::Target(owner.to_string()))?;
        let path_and_query = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        let mut uri_parts = parts.uri.clone().into_parts();
        uri_parts.scheme = Some(Scheme::HTTP);
        uri_parts.authority = Some(authority);
        uri_parts.path_and_query = Some(path_and_query);
        parts.uri = Uri::from_parts(uri_parts)
            .map_err(|_| ForwardError::Target(owner.to_string()))?;

        tracing::debug!(owner = %owner, uri = %parts.uri, "forwarding to owner");

        let upstream = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|err| {
                tracing::error!(owner = %owner, error = %err, "proxy hop failed");
                ForwardError::Transport(err.to_string())
            })?;

        let (mut parts, body) = upstream.into_parts();
        strip_response_headers(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl Default for ProxyForwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn request_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        for name in HOP_REQUEST_HEADERS {
            headers.insert(name, HeaderValue::from_static("x"));
        }
        headers.insert("x-custom", HeaderValue::from_static("keep"));
        strip_request_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-custom"));
    }

    #[test]
    fn response_length_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("10"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        strip_response_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("content-type"));
    }
}
