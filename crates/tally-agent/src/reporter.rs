//! Encodes batches and hands them to the transport with retries.

use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use tally_core::SigningCodec;

use crate::collector::Batch;
use crate::retry::RetryPolicy;
use crate::transport::{ReportError, ReportRequest, Transport};

pub struct Reporter {
    transport: Box<dyn Transport>,
    retry: RetryPolicy,
    compress: bool,
    signer: Option<SigningCodec>,
}

impl Reporter {
    pub fn new(transport: Box<dyn Transport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            compress: true,
            signer: None,
        }
    }

    /// Toggle gzip for request bodies.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_signer(mut self, signer: Option<SigningCodec>) -> Self {
        self.signer = signer;
        self
    }

    /// Serialize, sign the plain JSON, then compress.
    pub fn prepare(&self, batch: &Batch) -> Result<ReportRequest, ReportError> {
        let json = batch.to_json()?;
        let signature = self.signer.as_ref().map(|s| s.sign_base64(&json));

        let (body, content_encoding) = if self.compress {
            (gzip(&json).map_err(ReportError::Compress)?, Some("gzip"))
        } else {
            (json, None)
        };

        Ok(ReportRequest {
            body: Bytes::from(body),
            content_encoding,
            signature,
        })
    }

    /// Deliver one batch. Empty batches are skipped.
    pub async fn report(&self, batch: &Batch) -> Result<(), ReportError> {
        if batch.is_empty() {
            debug!("empty batch, nothing to report");
            return Ok(());
        }

        let request = self.prepare(batch)?;
        self.retry.run(|| self.transport.send(&request)).await?;
        info!(
            samples = batch.samples.len(),
            poll_delta = batch.poll_delta,
            bytes = request.body.len(),
            "batch reported"
        );
        Ok(())
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use flate2::read::GzDecoder;
    use tally_core::{Metric, SIGNATURE_HEADER};

    use super::*;
    use crate::collector::Sample;

    /// Records every request; fails with the queued errors first.
    #[derive(Default, Clone)]
    struct FakeTransport {
        sent: Arc<Mutex<Vec<ReportRequest>>>,
        failures: Arc<Mutex<Vec<ReportError>>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, request: &ReportRequest) -> Result<(), ReportError> {
            self.sent.lock().unwrap().push(request.clone());
            match self.failures.lock().unwrap().pop() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn batch() -> Batch {
        Batch {
            samples: vec![Sample {
                gauges: vec![("Alloc".to_string(), 42.0)],
            }],
            poll_delta: 1,
        }
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn prepare_signs_uncompressed_payload() {
        let signer = SigningCodec::new("secret");
        let reporter = Reporter::new(Box::new(FakeTransport::default()), RetryPolicy::none())
            .with_signer(Some(signer.clone()));

        let request = reporter.prepare(&batch()).unwrap();
        assert_eq!(request.content_encoding, Some("gzip"));

        let plain = gunzip(&request.body);
        let records: Vec<Metric> = serde_json::from_slice(&plain).unwrap();
        assert_eq!(records[0], Metric::gauge("Alloc", 42.0));
        assert_eq!(records[1], Metric::counter("PollCount", 1));

        let signature = request.signature.unwrap();
        assert!(signer.verify_base64(&plain, &signature));
        assert!(!signer.verify_base64(&request.body, &signature));
        assert_eq!(SIGNATURE_HEADER, "HashSHA256");
    }

    #[test]
    fn prepare_without_compression_or_key() {
        let reporter = Reporter::new(Box::new(FakeTransport::default()), RetryPolicy::none())
            .with_compression(false);
        let request = reporter.prepare(&batch()).unwrap();
        assert_eq!(request.content_encoding, None);
        assert_eq!(request.signature, None);
        assert_eq!(request.body.as_ref(), batch().to_json().unwrap().as_slice());
    }

    #[tokio::test]
    async fn empty_batch_is_not_sent() {
        let transport = FakeTransport::default();
        let reporter = Reporter::new(Box::new(transport.clone()), RetryPolicy::none());
        let empty = Batch {
            samples: Vec::new(),
            poll_delta: 0,
        };
        reporter.report(&empty).await.unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let transport = FakeTransport::default();
        transport.failures.lock().unwrap().push(ReportError::Timeout);
        let reporter = Reporter::new(Box::new(transport.clone()), RetryPolicy::default());

        reporter.report(&batch()).await.unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_batch_is_not_retried() {
        let transport = FakeTransport::default();
        transport
            .failures
            .lock()
            .unwrap()
            .push(ReportError::Status(http::StatusCode::BAD_REQUEST));
        let reporter = Reporter::new(Box::new(transport.clone()), RetryPolicy::default());

        let err = reporter.report(&batch()).await.unwrap_err();
        assert!(matches!(err, ReportError::Status(_)));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }
}
