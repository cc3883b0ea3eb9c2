//! Proxy pipeline: the sole request entry point under `/proxy/{remainder}`.
//!
//! For every inbound request it derives the client identity, consults the
//! rate limiter then the circuit breaker (in that order — a throttled
//! client must never consume breaker probe budget), forwards the survivor
//! to the upstream, classifies the outcome, and relays the response.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;

use crate::breaker::CircuitBreaker;
use crate::error::GatewayError;
use crate::limiter::RateLimiter;

/// Headers that describe framing for this hop only and must never be
/// forwarded across the proxy boundary.
const HOP_BY_HOP: &[&str] = &["transfer-encoding", "connection"];

pub struct ProxyPipeline {
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    client: Client,
    upstream_base: String,
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyPipeline {
    pub fn new(limiter: RateLimiter, breaker: CircuitBreaker, upstream_base: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client configuration is valid");

        Self {
            limiter,
            breaker,
            client,
            upstream_base: upstream_base.trim_end_matches('/').to_string(),
        }
    }

    /// Run one request through rate limiting, the circuit breaker, and the
    /// upstream call, returning the response to relay verbatim.
    pub async fn handle(
        &self,
        method: Method,
        remainder: &str,
        query: Option<&str>,
        mut headers: HeaderMap,
        body: Bytes,
        peer: Option<SocketAddr>,
    ) -> Result<UpstreamResponse, GatewayError> {
        let identity = client_identity(&headers, peer);
        tracing::info!(event = "incoming_request", method = %method, path = remainder, client_ip = %identity);

        let (allowed, retry_after_seconds) = self.limiter.allow(&identity).await?;
        if !allowed {
            tracing::info!(event = "rate_limit_block", client_ip = %identity, retry_after = retry_after_seconds);
            return Err(GatewayError::RateLimited { retry_after_seconds });
        }

        let (admitted, state) = self.breaker.before_request().await?;
        if !admitted {
            tracing::info!(event = "circuit_open_block", state = %state);
            return Err(GatewayError::CircuitOpen);
        }

        append_forwarded_for(&mut headers, &identity);
        strip_hop_by_hop(&mut headers);

        let url = match query {
            Some(q) if !q.is_empty() => format!("{}/{}?{}", self.upstream_base, remainder, q),
            _ => format!("{}/{}", self.upstream_base, remainder),
        };

        let result = self
            .client
            .request(method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let mut resp_headers = response.headers().clone();
                strip_hop_by_hop(&mut resp_headers);
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

                if status.as_u16() >= 500 {
                    self.breaker.record_failure().await?;
                } else {
                    self.breaker.record_success().await?;
                }

                Ok(UpstreamResponse { status, headers: resp_headers, body })
            }
            Err(e) => {
                tracing::error!(event = "upstream_error", error = %e);
                self.breaker.record_failure().await?;
                Err(GatewayError::UpstreamUnreachable(e.to_string()))
            }
        }
    }
}

/// Derive client identity: first `X-Forwarded-For` token, else peer
/// address, else `"unknown"`.
fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}

/// Append `identity` to `X-Forwarded-For`, preserving any existing value.
fn append_forwarded_for(headers: &mut HeaderMap, identity: &str) {
    let name = HeaderName::from_static("x-forwarded-for");
    let new_value = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {identity}"),
        None => identity.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&new_value) {
        headers.insert(name, value);
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_forwarded_for_first_token() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9, 8.8.8.8"));
        let peer: SocketAddr = "1.1.1.1:1234".parse().unwrap();
        assert_eq!(client_identity(&headers, Some(peer)), "9.9.9.9");
    }

    #[test]
    fn identity_falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "1.1.1.1:1234".parse().unwrap();
        assert_eq!(client_identity(&headers, Some(peer)), "1.1.1.1");
    }

    #[test]
    fn identity_falls_back_to_unknown() {
        let headers = HeaderMap::new();
        assert_eq!(client_identity(&headers, None), "unknown");
    }

    #[test]
    fn forwarded_for_appends_to_existing_value() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9"));
        append_forwarded_for(&mut headers, "9.9.9.9");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "9.9.9.9, 9.9.9.9");
    }
}
