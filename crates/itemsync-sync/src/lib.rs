//! Reconciliation pipeline: mapping load, paginated sales scan, diff and batched write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use itemsync_core::{MappingEntry, SalesRecord, UpdateIntent};
use itemsync_storage::SalesStore;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod loader;
pub mod reconcile;
pub mod scanner;
pub mod writer;

pub use config::{ReconcileConfig, SettingsFile, StoreConnection};
pub use error::{ReadStage, ReconcileError, WriteError};
pub use loader::{merge_sources, MappingLoader, MappingTable, MAPPING_PAGE_SIZE};
pub use reconcile::{propose_update, reconcile_page, reconcile_record, Disposition, PageOutcome};
pub use scanner::{has_more_after, PageScanner, ScannedPage};
pub use writer::{BatchWriter, FlushReport};

pub const CRATE_NAME: &str = "itemsync-sync";

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub entity: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub mappings: usize,
    pub pages: usize,
    pub processed: usize,
    /// Rows written, or rows that would have been written on a dry run.
    pub updated: usize,
    pub batches: usize,
    pub skipped_blank_key: usize,
    pub unmapped: usize,
    pub unchanged: usize,
}

/// Everything known about one item key, for `inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct ItemInspection {
    pub item: String,
    pub entry: Option<MappingEntry>,
    pub shadowed_secondary: bool,
    pub rows: Vec<InspectedRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectedRow {
    pub record: SalesRecord,
    pub update: Option<UpdateIntent>,
}

pub struct ReconcileRun {
    store: Arc<dyn SalesStore>,
    config: ReconcileConfig,
}

impl ReconcileRun {
    pub fn new(store: Arc<dyn SalesStore>, config: ReconcileConfig) -> Result<Self, ReconcileError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Validate `config`, then open the store selected by the environment.
    pub async fn connect(config: ReconcileConfig) -> Result<Self, ReconcileError> {
        config.validate()?;
        let store = StoreConnection::from_env()?.open(&config.tables).await?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub async fn load_mappings(&self) -> Result<MappingTable, ReconcileError> {
        MappingLoader::new(self.store.as_ref(), &self.config.entity, MAPPING_PAGE_SIZE)
            .load()
            .await
    }

    /// Run the whole pipeline once. Stops at the first read or write failure; batches
    /// written before the failure stay committed.
    pub async fn run(&self) -> Result<RunSummary, ReconcileError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("reconcile", %run_id, entity = %self.config.entity);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunSummary, ReconcileError> {
        let started_at = Utc::now();
        let mut summary = RunSummary {
            run_id,
            entity: self.config.entity.clone(),
            started_at,
            finished_at: started_at,
            dry_run: self.config.dry_run,
            mappings: 0,
            pages: 0,
            processed: 0,
            updated: 0,
            batches: 0,
            skipped_blank_key: 0,
            unmapped: 0,
            unchanged: 0,
        };
        info!(
            store = %self.store.describe(),
            dry_run = self.config.dry_run,
            "starting {} sales_data update",
            self.config.entity
        );

        let table = self.load_mappings().await?;
        summary.mappings = table.len();
        if table.is_empty() {
            warn!("no mappings found, nothing to reconcile");
            summary.finished_at = Utc::now();
            return Ok(summary);
        }

        let filter = self.config.filter();
        let scanner = PageScanner::new(self.store.as_ref(), &filter, self.config.page_size);
        let writer = BatchWriter::new(self.store.as_ref(), self.config.batch_size, self.config.delay);

        let mut index = 0;
        loop {
            let page = scanner.fetch_page(index).await?;
            if page.records.is_empty() {
                break;
            }
            info!(
                page = index + 1,
                records = page.records.len(),
                total = page.total,
                "processing page {} ({} records, total: {})",
                index + 1,
                page.records.len(),
                page.total
            );

            let outcome = reconcile_page(&page.records, &table);
            summary.pages += 1;
            summary.processed += page.records.len();
            summary.skipped_blank_key += outcome.blank_key;
            summary.unmapped += outcome.unmapped;
            summary.unchanged += outcome.unchanged;

            if outcome.intents.is_empty() {
                info!(page = index + 1, "no updates needed for this page");
            } else if self.config.dry_run {
                summary.updated += outcome.intents.len();
                info!(
                    page = index + 1,
                    updates = outcome.intents.len(),
                    "dry run: would update {} records",
                    outcome.intents.len()
                );
            } else {
                let report = writer
                    .flush(&outcome.intents)
                    .await
                    .map_err(|source| ReconcileError::Write { page: index, source })?;
                summary.updated += report.written;
                summary.batches += report.batches;
                info!(
                    page = index + 1,
                    updates = report.written,
                    batches = report.batches,
                    "updated {} records",
                    report.written
                );
            }

            if !page.has_more {
                break;
            }
            index += 1;
            if !self.config.delay.is_zero() {
                tokio::time::sleep(self.config.delay).await;
            }
        }

        summary.finished_at = Utc::now();
        info!(
            processed = summary.processed,
            updated = summary.updated,
            "update completed: {} processed, {} updated",
            summary.processed,
            summary.updated
        );
        Ok(summary)
    }

    /// Mapping entry, provenance and matching sales rows (with their pending update) for
    /// each item key. Nothing is written.
    pub async fn inspect(&self, items: &[String]) -> Result<Vec<ItemInspection>, ReconcileError> {
        let table = self.load_mappings().await?;
        let keys: Vec<String> = items
            .iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect();
        let rows = self
            .store
            .find_sales_by_items(&self.config.filter(), &keys)
            .await
            .map_err(ReconcileError::read(ReadStage::ItemLookup))?;

        Ok(keys
            .iter()
            .map(|key| {
                let entry = table.get(key).cloned();
                let rows = rows
                    .iter()
                    .filter(|r| r.item_key().as_deref() == Some(key.as_str()))
                    .map(|record| InspectedRow {
                        update: entry.as_ref().and_then(|e| propose_update(record, e)),
                        record: record.clone(),
                    })
                    .collect();
                ItemInspection {
                    item: key.clone(),
                    shadowed_secondary: table.is_shadowed(key),
                    entry,
                    rows,
                }
            })
            .collect())
    }
}

/// Defaults, then `ITEMSYNC_*` environment variables, then the settings file.
pub fn config_from_env(settings: Option<SettingsFile>) -> Result<ReconcileConfig, ReconcileError> {
    let mut config = ReconcileConfig::from_env()?;
    if let Some(settings) = settings {
        config.apply_settings(settings);
    }
    Ok(config)
}
