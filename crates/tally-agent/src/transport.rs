//! Delivery of encoded reports to the collection service.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::Full;
use thiserror::Error;
use tracing::debug;

use tally_core::SIGNATURE_HEADER;

use crate::retry::Retriable;

/// Path every batch is posted to.
pub const UPDATES_PATH: &str = "/updates/";

/// Failures while encoding or delivering one report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("connect: {0}")]
    Connect(#[source] io::Error),

    #[error("request timed out")]
    Timeout,

    #[error("http: {0}")]
    Http(#[from] hyper::Error),

    #[error("server responded {0}")]
    Status(StatusCode),

    #[error("encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("compress batch: {0}")]
    Compress(#[source] io::Error),

    #[error("build request: {0}")]
    Request(#[from] http::Error),
}

impl Retriable for ReportError {
    /// Only failures where the server may never have seen the request.
    fn is_retriable(&self) -> bool {
        match self {
            ReportError::Connect(_) | ReportError::Timeout => true,
            ReportError::Http(e) => {
                e.is_closed()
                    || e.is_incomplete_message()
                    || e.is_timeout()
                    || io_cause(e).is_some_and(|io| is_transient(io.kind()))
            }
            ReportError::Status(_)
            | ReportError::Encode(_)
            | ReportError::Compress(_)
            | ReportError::Request(_) => false,
        }
    }
}

/// First I/O error in the source chain, e.g. a reset under `hyper::Error`.
fn io_cause<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a io::Error> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            return Some(io);
        }
        source = e.source();
    }
    None
}

fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}

/// An encoded batch ready to post.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub body: Bytes,
    pub content_encoding: Option<&'static str>,
    /// Base64 HMAC-SHA256 of the uncompressed body.
    pub signature: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// One delivery attempt.
    async fn send(&self, request: &ReportRequest) -> Result<(), ReportError>;
}

/// HTTP/1 client opening one connection per attempt.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    address: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn post(&self, request: &ReportRequest) -> Result<(), ReportError> {
        let uri = format!("http://{}{UPDATES_PATH}", self.address);

        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(ReportError::Connect)?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "report connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(&uri)
            .header(HOST, &self.address)
            .header(USER_AGENT, concat!("tally-agent/", env!("CARGO_PKG_VERSION")))
            .header(CONTENT_TYPE, "application/json");
        if let Some(encoding) = request.content_encoding {
            builder = builder.header(CONTENT_ENCODING, encoding);
        }
        if let Some(signature) = &request.signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        let req = builder.body(Full::new(request.body.clone()))?;

        let resp = sender.send_request(req).await?;
        if !resp.status().is_success() {
            return Err(ReportError::Status(resp.status()));
        }
        debug!(%uri, status = %resp.status(), bytes = request.body.len(), "report delivered");
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ReportRequest) -> Result<(), ReportError> {
        tokio::time::timeout(self.timeout, self.post(request))
            .await
            .map_err(|_| ReportError::Timeout)?
    }
}
