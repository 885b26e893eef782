//! Request logging, gzip and HMAC signature middleware.
//!
//! Layered outermost first as logging, gzip, signature. The signature layer
//! therefore sees decompressed request bodies and signs uncompressed
//! responses.

use std::io::{Read, Write};
use std::time::Instant;

use axum::body::{Body, HttpBody, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::{ACCEPT_ENCODING, AsHeaderName, CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use tally_core::{SIGNATURE_HEADER, SigningCodec};

/// Upper bound on buffered request and response bodies.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const GZIP: &str = "gzip";

fn has_token(headers: &HeaderMap, name: impl AsHeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(token))
}

fn bad_request(msg: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, msg).into_response()
}

// ── Logging ────────────────────────────────────────────────────

/// One `info!` per request with method, uri, status, size and duration.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let resp = next.run(req).await;

    let size = resp.body().size_hint().exact().unwrap_or(0);
    info!(
        %method,
        %uri,
        status = resp.status().as_u16(),
        size,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "request"
    );
    resp
}

// ── Gzip ───────────────────────────────────────────────────────

/// Decode gzip request bodies; gzip responses for clients that accept it.
pub async fn gzip(req: Request, next: Next) -> Response {
    let accepts_gzip = has_token(req.headers(), ACCEPT_ENCODING, GZIP);

    let req = if has_token(req.headers(), CONTENT_ENCODING, GZIP) {
        let (mut parts, body) = req.into_parts();
        let Ok(compressed) = to_bytes(body, MAX_BODY_BYTES).await else {
            return bad_request("unreadable request body");
        };
        let Ok(plain) = gunzip(&compressed) else {
            return bad_request("failed to decompress request body");
        };
        parts.headers.remove(CONTENT_ENCODING);
        parts.headers.remove(CONTENT_LENGTH);
        Request::from_parts(parts, Body::from(plain))
    } else {
        req
    };

    let resp = next.run(req).await;
    if !accepts_gzip || resp.headers().contains_key(CONTENT_ENCODING) {
        return resp;
    }

    let (mut parts, body) = resp.into_parts();
    let plain = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "response body unreadable");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    match gzip_bytes(&plain) {
        Ok(compressed) => {
            parts
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static(GZIP));
            parts.headers.remove(CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(compressed))
        }
        Err(e) => {
            debug!(error = %e, "response compression failed, sending plain");
            Response::from_parts(parts, Body::from(plain))
        }
    }
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

fn gzip_bytes(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}

// ── Signature ──────────────────────────────────────────────────

/// Verify `HashSHA256` on non-empty request bodies and sign every response.
pub async fn signature(State(signer): State<SigningCodec>, req: Request, next: Next) -> Response {
    let (parts, body) = req.into_parts();
    let Ok(body) = to_bytes(body, MAX_BODY_BYTES).await else {
        return bad_request("unreadable request body");
    };

    if !body.is_empty() {
        let valid = parts
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|sig| signer.verify_base64(&body, sig));
        if !valid {
            debug!(uri = %parts.uri, "request signature rejected");
            return bad_request("invalid signature");
        }
    }

    let resp = next.run(Request::from_parts(parts, Body::from(body))).await;

    let (mut parts, body) = resp.into_parts();
    let body: Bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "response body unreadable");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Ok(value) = HeaderValue::from_str(&signer.sign_base64(&body)) {
        parts.headers.insert(SIGNATURE_HEADER, value);
    }
    Response::from_parts(parts, Body::from(body))
}
