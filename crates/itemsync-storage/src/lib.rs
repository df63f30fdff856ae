//! Remote store seam for item classification reconciliation: the `SalesStore` contract
//! plus hosted REST, direct Postgres and in-process backends.

use std::time::Duration;

use async_trait::async_trait;
use itemsync_core::{MappingRow, SalesRecord, UpdateIntent};
use serde::Deserialize;
use thiserror::Error;

pub mod memory;
pub mod postgres;
pub mod postgrest;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use postgrest::{PostgrestConfig, PostgrestStore};

pub const CRATE_NAME: &str = "itemsync-storage";

/// Most rows the hosted REST store returns in one response, whatever `limit` asks for.
pub const MAX_PAGE_ROWS: usize = 1000;

/// Window of up to `size` rows starting at row `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub size: usize,
}

impl PageRequest {
    /// Zero-based page `index` of `size` rows.
    pub fn new(index: usize, size: usize) -> Self {
        Self {
            offset: index * size,
            size,
        }
    }

    pub fn starting_at(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    pub fn index(&self) -> usize {
        self.offset / self.size.max(1)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Inclusive row window `[from, to]` covered by this page.
    pub fn window(&self) -> (usize, usize) {
        (self.offset, (self.offset + self.size).saturating_sub(1))
    }

    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + self.size,
            size: self.size,
        }
    }
}

/// Predicate applied to the sales scan: `entity = ? AND item_number IS NOT NULL [AND year = ?]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesFilter {
    pub entity: String,
    pub year: Option<i32>,
}

impl SalesFilter {
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            year: None,
        }
    }
}

/// One window of the filtered sales scan together with the filter's total row count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SalesPage {
    pub records: Vec<SalesRecord>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub primary: String,
    pub secondary: String,
    pub sales: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            primary: "item_master".to_string(),
            secondary: "item_mapping".to_string(),
            sales: "sales_data".to_string(),
        }
    }
}

impl TableNames {
    /// Reject names that are not plain (optionally schema-qualified) SQL identifiers.
    pub fn validate(&self) -> Result<(), StoreError> {
        for name in [&self.primary, &self.secondary, &self.sales] {
            let valid = !name.is_empty()
                && name.split('.').all(|part| {
                    let mut chars = part.chars();
                    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                });
            if !valid {
                return Err(StoreError::InvalidTable(name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some(format!("itemsync/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("decoding {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing or malformed row count in response from {url}")]
    MissingCount { url: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid table name {0:?}")]
    InvalidTable(String),
    #[error("short page at row {offset}: expected {expected} rows, received {received}")]
    ShortPage {
        offset: usize,
        expected: usize,
        received: usize,
    },
    #[error("{0}")]
    Rejected(String),
}

/// Queries and the single write the reconciler issues against the remote store.
#[async_trait]
pub trait SalesStore: Send + Sync {
    /// Short human-readable description of the backend, for status lines.
    fn describe(&self) -> String;

    /// Active rows of the primary mapping source, ordered by item number.
    async fn fetch_primary_mappings(&self, page: PageRequest) -> Result<Vec<MappingRow>, StoreError>;

    /// Active rows of the secondary mapping source for `entity`, ordered by item number.
    async fn fetch_secondary_mappings(
        &self,
        entity: &str,
        page: PageRequest,
    ) -> Result<Vec<MappingRow>, StoreError>;

    /// One window of the filtered sales scan, ordered by id, with the exact total count.
    async fn fetch_sales_page(
        &self,
        filter: &SalesFilter,
        page: PageRequest,
    ) -> Result<SalesPage, StoreError>;

    /// Write all four attributes of each intent, keyed by id. Returns rows submitted.
    async fn upsert_sales(&self, intents: &[UpdateIntent]) -> Result<usize, StoreError>;

    /// Sales rows matching the filter whose item number is one of `items`.
    async fn find_sales_by_items(
        &self,
        filter: &SalesFilter,
        items: &[String],
    ) -> Result<Vec<SalesRecord>, StoreError>;
}
