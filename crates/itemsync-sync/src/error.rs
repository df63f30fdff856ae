use std::fmt;

use itemsync_storage::StoreError;
use thiserror::Error;

/// Which read a `ReconcileError::Read` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStage {
    PrimaryMappings,
    SecondaryMappings,
    /// Zero-based page index.
    SalesPage(usize),
    ItemLookup,
}

impl fmt::Display for ReadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadStage::PrimaryMappings => f.write_str("primary mappings"),
            ReadStage::SecondaryMappings => f.write_str("secondary mappings"),
            ReadStage::SalesPage(index) => write!(f, "sales page {}", index + 1),
            ReadStage::ItemLookup => f.write_str("sales rows for inspected items"),
        }
    }
}

/// A failed batch write. Batches before `batch` in the same flush were committed.
#[derive(Debug, Error)]
#[error("batch {batch} ({size} rows) failed after {committed} rows were written: {source}")]
pub struct WriteError {
    /// Zero-based batch index within the flush.
    pub batch: usize,
    pub size: usize,
    pub committed: usize,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("reading {stage}: {source}")]
    Read {
        stage: ReadStage,
        #[source]
        source: StoreError,
    },
    #[error("writing sales page {}: {source}", .page + 1)]
    Write {
        page: usize,
        #[source]
        source: WriteError,
    },
}

impl ReconcileError {
    pub(crate) fn read(stage: ReadStage) -> impl FnOnce(StoreError) -> Self {
        move |source| ReconcileError::Read { stage, source }
    }
}
