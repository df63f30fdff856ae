//! Mapping Loader: reads both mapping sources and merges them with primary priority.

use std::collections::{BTreeSet, HashMap};

use itemsync_core::{MappingEntry, MappingRow, Provenance};
use itemsync_storage::{PageRequest, SalesStore, MAX_PAGE_ROWS};
use tracing::{debug, info};

use crate::error::{ReadStage, ReconcileError};

/// Merged lookup table from item key to its authoritative entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingTable {
    entries: HashMap<String, MappingEntry>,
    shadowed: BTreeSet<String>,
    pub primary_count: usize,
    pub secondary_count: usize,
}

impl MappingTable {
    pub fn get(&self, key: &str) -> Option<&MappingEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the secondary source also lists `key` but the primary entry won.
    pub fn is_shadowed(&self, key: &str) -> bool {
        self.shadowed.contains(key)
    }

    pub fn shadowed_count(&self) -> usize {
        self.shadowed.len()
    }
}

/// Merge rows from both sources. Within a source the last row for a key wins; across
/// sources a primary entry wins entirely and secondary rows only fill absent keys.
pub fn merge_sources(
    primary: impl IntoIterator<Item = MappingRow>,
    secondary: impl IntoIterator<Item = MappingRow>,
) -> MappingTable {
    let mut primary_map: HashMap<String, MappingEntry> = HashMap::new();
    for row in primary {
        if let Some(entry) = MappingEntry::from_row(&row, Provenance::Primary) {
            primary_map.insert(entry.key.clone(), entry);
        }
    }

    let mut secondary_map: HashMap<String, MappingEntry> = HashMap::new();
    let mut shadowed = BTreeSet::new();
    for row in secondary {
        let Some(entry) = MappingEntry::from_row(&row, Provenance::Secondary) else {
            continue;
        };
        if primary_map.contains_key(&entry.key) {
            shadowed.insert(entry.key);
        } else {
            secondary_map.insert(entry.key.clone(), entry);
        }
    }

    let primary_count = primary_map.len();
    let secondary_count = secondary_map.len();
    let mut entries = primary_map;
    entries.extend(secondary_map);

    MappingTable {
        entries,
        shadowed,
        primary_count,
        secondary_count,
    }
}

/// Rows requested per mapping page, independent of the sales scan page size.
pub const MAPPING_PAGE_SIZE: usize = MAX_PAGE_ROWS;

pub struct MappingLoader<'a> {
    store: &'a dyn SalesStore,
    entity: &'a str,
    page_size: usize,
}

impl<'a> MappingLoader<'a> {
    pub fn new(store: &'a dyn SalesStore, entity: &'a str, page_size: usize) -> Self {
        Self {
            store,
            entity,
            page_size: page_size.max(1),
        }
    }

    pub async fn load(&self) -> Result<MappingTable, ReconcileError> {
        info!("loading primary mappings");
        let primary = self.read_source(Provenance::Primary).await?;
        info!(entity = self.entity, "loading secondary mappings");
        let secondary = self.read_source(Provenance::Secondary).await?;

        let table = merge_sources(primary, secondary);
        info!(
            primary = table.primary_count,
            secondary = table.secondary_count,
            shadowed = table.shadowed_count(),
            "loaded {} mappings ({} primary, {} secondary not in primary)",
            table.len(),
            table.primary_count,
            table.secondary_count
        );
        Ok(table)
    }

    /// Read every active row of one source. Each request starts right after the rows received
    /// so far; the source is exhausted once a page comes back empty.
    async fn read_source(&self, source: Provenance) -> Result<Vec<MappingRow>, ReconcileError> {
        let mut rows = Vec::new();
        loop {
            let page = PageRequest::starting_at(rows.len(), self.page_size);
            let batch = match source {
                Provenance::Primary => self
                    .store
                    .fetch_primary_mappings(page)
                    .await
                    .map_err(ReconcileError::read(ReadStage::PrimaryMappings))?,
                Provenance::Secondary => self
                    .store
                    .fetch_secondary_mappings(self.entity, page)
                    .await
                    .map_err(ReconcileError::read(ReadStage::SecondaryMappings))?,
            };
            debug!(%source, offset = page.offset(), rows = batch.len(), "mapping page read");
            if batch.is_empty() {
                return Ok(rows);
            }
            rows.extend(batch);
        }
    }
}
