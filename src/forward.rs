//! The per-request pipeline: authenticate, prepare forwarded headers,
//! consult the cache, call upstream with bounded retry, compress, respond.

use std::net::{IpAddr, SocketAddr};

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use bytes::Bytes;

use crate::cache::CachedResponse;
use crate::compress::{Encoding, compress};
use crate::error::ProxyError;
use crate::fingerprint::fingerprint;
use crate::server::ProxyState;

/// Headers meaningful only to a single transport hop; stripped in both
/// directions.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const X_BACKEND_SERVER: HeaderName = HeaderName::from_static("x-backend-server");
const X_RETRY_COUNT: HeaderName = HeaderName::from_static("x-retry-count");
const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn is_supported(method: &Method) -> bool {
    [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::HEAD,
        Method::OPTIONS,
    ]
    .contains(method)
}

/// Handle one decrypted client request end to end.
pub async fn handle(
    State(state): State<ProxyState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    if !is_supported(request.method()) {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }

    let presented = request
        .headers()
        .get(&X_API_KEY)
        .and_then(|value| value.to_str().ok());
    if presented != Some(state.config.api_key.as_str()) {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Unauthorized - Invalid or missing API key",
        );
    }

    let (parts, body) = request.into_parts();
    let method = parts.method;
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    // The entire body is materialized; streaming is out of scope.
    let body = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {err}"),
            );
        }
    };

    let encoding = Encoding::negotiate(
        parts
            .headers
            .get(ACCEPT_ENCODING)
            .and_then(|value| value.to_str().ok()),
    );

    let forwarded = forwarded_headers(&parts.headers, client.ip());
    let key = fingerprint(&method, &path_and_query, &forwarded, &body, encoding);

    // A cached response needs no backend at all.
    if method == Method::GET {
        let cached = {
            let mut cache = state.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.get(&key, state.clock.now())
        };
        if let Some(cached) = cached {
            tracing::debug!(path = %path_and_query, "cache hit");
            return emit_or_error(
                cached.status,
                &cached.headers,
                &cached.body,
                encoding,
                "HIT",
                None,
                0,
            );
        }
    }

    let mut last_error: Option<ProxyError> = None;
    let mut retries = 0u32;
    let attempts = state.config.max_retries.saturating_add(1);

    for attempt in 1..=attempts {
        let Some(backend) = state.balancer.pick(&state.registry) else {
            // Nothing will become healthy inside this request; don't burn
            // the remaining attempts.
            last_error = Some(ProxyError::NoHealthyBackend);
            break;
        };

        match call_upstream(&state, &method, backend.url(), &path_and_query, &forwarded, body.clone())
            .await
        {
            Ok((status, upstream_headers, upstream_body)) => {
                if method == Method::GET {
                    let mut cache = state.cache.lock().unwrap_or_else(|e| e.into_inner());
                    cache.put(
                        key,
                        CachedResponse {
                            status,
                            headers: upstream_headers.clone(),
                            body: upstream_body.clone(),
                        },
                        state.clock.now(),
                    );
                }
                return emit_or_error(
                    status,
                    &upstream_headers,
                    &upstream_body,
                    encoding,
                    "MISS",
                    Some(backend.url()),
                    retries,
                );
            }
            Err(err) => {
                tracing::debug!(
                    backend = backend.url(),
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "upstream attempt failed"
                );
                last_error = Some(err);
                retries += 1;
            }
        }
    }

    let err = last_error.unwrap_or(ProxyError::NoHealthyBackend);
    let (status, reason) = err.client_response();
    error_response(status, &reason)
}

/// Copy client headers minus hop-by-hop names and stamp the forwarding
/// triplet expected by the backends.
fn forwarded_headers(headers: &HeaderMap, client_ip: IpAddr) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len() + 3);
    for (name, value) in headers {
        if is_hop_by_hop(name) {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    if let Ok(value) = HeaderValue::from_str(&client_ip.to_string()) {
        forwarded.insert(X_FORWARDED_FOR, value);
    }
    let host = headers
        .get(HOST)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(""));
    forwarded.insert(X_FORWARDED_HOST, host);
    forwarded.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
    forwarded
}

async fn call_upstream(
    state: &ProxyState,
    method: &Method,
    base_url: &str,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, HeaderMap, Bytes), ProxyError> {
    let url = format!("{base_url}{path_and_query}");
    let response = state
        .client
        .request(method.clone(), url)
        .headers(headers.clone())
        .body(body)
        .send()
        .await
        .map_err(|err| ProxyError::Transport(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProxyError::UpstreamStatus { status });
    }
    let upstream_headers = response.headers().clone();
    let upstream_body = response
        .bytes()
        .await
        .map_err(|err| ProxyError::Transport(err.to_string()))?;
    Ok((status, upstream_headers, upstream_body))
}

fn emit_or_error(
    status: StatusCode,
    upstream_headers: &HeaderMap,
    body: &[u8],
    encoding: Encoding,
    cache_state: &'static str,
    backend_url: Option<&str>,
    retries: u32,
) -> Response<Body> {
    match emit_response(status, upstream_headers, body, encoding, cache_state, backend_url, retries)
    {
        Ok(response) => response,
        Err(err) => {
            let (status, reason) = err.client_response();
            error_response(status, &reason)
        }
    }
}

/// Build the client-facing response: upstream headers minus hop-by-hop and
/// the length/encoding pair the proxy rewrites, then the proxy's own
/// observability headers, then the (possibly compressed) body.
fn emit_response(
    status: StatusCode,
    upstream_headers: &HeaderMap,
    body: &[u8],
    encoding: Encoding,
    cache_state: &'static str,
    backend_url: Option<&str>,
    retries: u32,
) -> Result<Response<Body>, ProxyError> {
    let out = compress(body, encoding)?;
    let out_len = out.len();

    let mut response = Response::new(Body::from(out));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in upstream_headers {
        if is_hop_by_hop(name) || *name == CONTENT_ENCODING || *name == CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(out_len as u64));
    if let Some(token) = encoding.token() {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(token));
    }
    headers.insert(X_CACHE, HeaderValue::from_static(cache_state));
    if let Some(url) = backend_url {
        if let Ok(value) = HeaderValue::from_str(url) {
            headers.insert(X_BACKEND_SERVER, value);
        }
    }
    if retries > 0 {
        headers.insert(X_RETRY_COUNT, HeaderValue::from(retries));
    }
    Ok(response)
}

fn error_response(status: StatusCode, reason: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(reason.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("proxy.example:8443"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic x"));
        headers
    }

    #[test]
    fn forwarded_headers_strip_hop_by_hop_and_stamp_forwarding_triplet() {
        let forwarded = forwarded_headers(&inbound_headers(), "10.1.2.3".parse().unwrap());

        assert!(forwarded.get("connection").is_none());
        assert!(forwarded.get("te").is_none());
        assert!(forwarded.get("proxy-authorization").is_none());
        assert_eq!(forwarded.get("accept").unwrap(), "application/json");
        assert_eq!(forwarded.get("x-forwarded-for").unwrap(), "10.1.2.3");
        assert_eq!(
            forwarded.get("x-forwarded-host").unwrap(),
            "proxy.example:8443"
        );
        assert_eq!(forwarded.get("x-forwarded-proto").unwrap(), "https");
    }

    #[test]
    fn forwarded_headers_tolerate_a_missing_host() {
        let forwarded = forwarded_headers(&HeaderMap::new(), "10.1.2.3".parse().unwrap());
        assert_eq!(forwarded.get("x-forwarded-host").unwrap(), "");
    }

    #[test]
    fn emit_response_rewrites_length_and_strips_hop_by_hop() {
        let mut upstream = HeaderMap::new();
        upstream.insert("content-type", HeaderValue::from_static("text/plain"));
        upstream.insert(CONTENT_LENGTH, HeaderValue::from_static("999"));
        upstream.insert(CONTENT_ENCODING, HeaderValue::from_static("identity"));
        upstream.insert("connection", HeaderValue::from_static("close"));
        upstream.insert("upgrade", HeaderValue::from_static("h2c"));

        let response = emit_response(
            StatusCode::OK,
            &upstream,
            b"hello",
            Encoding::Identity,
            "MISS",
            Some("https://127.0.0.1:8000"),
            0,
        )
        .unwrap();

        let headers = response.headers();
        assert!(headers.get("connection").is_none());
        assert!(headers.get("upgrade").is_none());
        assert!(headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "5");
        assert_eq!(headers.get("x-cache").unwrap(), "MISS");
        assert_eq!(
            headers.get("x-backend-server").unwrap(),
            "https://127.0.0.1:8000"
        );
        assert!(headers.get("x-retry-count").is_none());
    }

    #[test]
    fn emit_response_reports_retries_and_encoding() {
        let response = emit_response(
            StatusCode::OK,
            &HeaderMap::new(),
            b"hello hello hello hello",
            Encoding::Gzip,
            "MISS",
            None,
            2,
        )
        .unwrap();

        let headers = response.headers();
        assert_eq!(headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(headers.get("x-retry-count").unwrap(), "2");
        let advertised: usize = headers
            .get(CONTENT_LENGTH)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let compressed = compress(b"hello hello hello hello", Encoding::Gzip).unwrap();
        assert_eq!(advertised, compressed.len());
    }

    #[test]
    fn cache_hit_emission_carries_the_hit_marker() {
        let response = emit_response(
            StatusCode::OK,
            &HeaderMap::new(),
            b"cached",
            Encoding::Identity,
            "HIT",
            None,
            0,
        )
        .unwrap();
        assert_eq!(response.headers().get("x-cache").unwrap(), "HIT");
        assert!(response.headers().get("x-backend-server").is_none());
    }
}
