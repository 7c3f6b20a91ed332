// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::credentials_store::CredentialsStore;
use crate::decoder::DecoderRegistry;
use crate::errors::IngestError;
use crate::parser::LineReader;
use crate::writer::Writer;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tracing::{debug, info, warn};

/// Decoded metrics are handed to the writer in batches of this size while
/// the body is still streaming.
const PUSH_BATCH_SIZE: usize = 100;

/// Counters for one ingested upload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub lines: u64,
    pub bytes: u64,
    pub metrics: usize,
    pub decode_errors: usize,
}

/// Resolves the token, decodes the upload and buffers the metrics.
pub struct Ingestor {
    credentials: Arc<CredentialsStore>,
    decoders: DecoderRegistry,
    writer: Arc<Writer>,
}

impl Ingestor {
    pub fn new(
        credentials: Arc<CredentialsStore>,
        decoders: DecoderRegistry,
        writer: Arc<Writer>,
    ) -> Self {
        Ingestor {
            credentials,
            decoders,
            writer,
        }
    }

    /// Lines that fail to decode are logged and skipped. Delivery happens in
    /// the background, so a successful report says nothing about whether the
    /// destination accepted the metrics.
    ///
    /// If reading the body fails midway, metrics decoded up to that point are
    /// still buffered before the error is returned.
    pub async fn ingest<R>(&self, token: &str, reader: R) -> Result<IngestReport, IngestError>
    where
        R: AsyncBufRead + Unpin,
    {
        let credentials = self
            .credentials
            .get(token)
            .await?
            .ok_or(IngestError::CredentialsNotFound)?;

        let mut report = IngestReport::default();
        let mut lines = LineReader::new(reader);
        let mut metrics = Vec::with_capacity(PUSH_BATCH_SIZE);

        let read_result = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            match self.decoders.classify(&line) {
                Ok(Some(metric)) => {
                    report.metrics += 1;
                    metrics.push(metric);
                    if metrics.len() >= PUSH_BATCH_SIZE {
                        self.writer
                            .push(&credentials, std::mem::take(&mut metrics))?;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    report.decode_errors += 1;
                    warn!("Failed to decode line: {e}: {}", line.raw);
                }
            }
        };

        report.lines = lines.lines();
        report.bytes = lines.bytes();
        self.writer.push(&credentials, metrics)?;

        if let Err(e) = read_result {
            debug!(
                "Body read failed after {} lines for {}: {e}",
                report.lines, credentials.name
            );
            return Err(IngestError::Read(e));
        }

        info!(
            "Ingested {} lines ({} bytes) for {}: {} metrics, {} decode errors",
            report.lines, report.bytes, credentials.name, report.metrics, report.decode_errors
        );
        Ok(report)
    }
}
