//! Batched Writer: fixed-size chunks, one upsert call each, throttled, fail-fast.

use std::time::Duration;

use itemsync_core::UpdateIntent;
use itemsync_storage::SalesStore;
use tracing::debug;

use crate::error::WriteError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub batches: usize,
}

pub struct BatchWriter<'a> {
    store: &'a dyn SalesStore,
    batch_size: usize,
    delay: Duration,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn SalesStore, batch_size: usize, delay: Duration) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            delay,
        }
    }

    /// Number of write calls `pending` intents take.
    pub fn batch_count(&self, pending: usize) -> usize {
        pending.div_ceil(self.batch_size)
    }

    /// Submit `intents` chunk by chunk, pausing between chunks. Stops at the first failed
    /// chunk; chunks already submitted stay committed.
    pub async fn flush(&self, intents: &[UpdateIntent]) -> Result<FlushReport, WriteError> {
        let mut report = FlushReport::default();
        let total_batches = self.batch_count(intents.len());
        for (batch, chunk) in intents.chunks(self.batch_size).enumerate() {
            let written = self
                .store
                .upsert_sales(chunk)
                .await
                .map_err(|source| WriteError {
                    batch,
                    size: chunk.len(),
                    committed: report.written,
                    source,
                })?;
            report.written += written;
            report.batches += 1;
            debug!(batch, rows = chunk.len(), "batch written");

            if batch + 1 < total_batches && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        Ok(report)
    }
}
