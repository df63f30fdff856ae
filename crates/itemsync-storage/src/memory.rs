//! In-process store with the same ordering and filtering rules as the remote backends.
//! Records every page request and write call so workflows can be asserted on.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use itemsync_core::{MappingRow, RecordId, SalesRecord, UpdateIntent};

use crate::{PageRequest, SalesFilter, SalesPage, SalesStore, StoreError};

#[derive(Debug, Clone)]
struct StoredMapping {
    entity: Option<String>,
    active: bool,
    row: MappingRow,
}

#[derive(Debug, Clone)]
struct StoredSale {
    entity: String,
    year: Option<i32>,
    record: SalesRecord,
}

#[derive(Debug, Default)]
struct MemoryState {
    primary: Vec<StoredMapping>,
    secondary: Vec<StoredMapping>,
    sales: BTreeMap<RecordId, StoredSale>,
    sales_page_requests: Vec<PageRequest>,
    upsert_calls: Vec<Vec<RecordId>>,
    fail_upsert_call: Option<usize>,
    fail_sales_page: Option<usize>,
    row_cap: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_primary(&self, row: MappingRow, active: bool) -> &Self {
        self.state().primary.push(StoredMapping {
            entity: None,
            active,
            row,
        });
        self
    }

    pub fn add_secondary(&self, entity: &str, row: MappingRow, active: bool) -> &Self {
        self.state().secondary.push(StoredMapping {
            entity: Some(entity.to_string()),
            active,
            row,
        });
        self
    }

    pub fn add_sale(&self, entity: &str, year: Option<i32>, record: SalesRecord) -> &Self {
        self.state().sales.insert(
            record.id.clone(),
            StoredSale {
                entity: entity.to_string(),
                year,
                record,
            },
        );
        self
    }

    /// Make the `call_index`-th (zero-based) write call fail.
    pub fn fail_upsert_call(&self, call_index: usize) -> &Self {
        self.state().fail_upsert_call = Some(call_index);
        self
    }

    /// Make the sales page with this zero-based index fail.
    pub fn fail_sales_page(&self, page_index: usize) -> &Self {
        self.state().fail_sales_page = Some(page_index);
        self
    }

    /// Return at most `rows` rows from any single read, like a server-side response cap.
    pub fn cap_page_rows(&self, rows: usize) -> &Self {
        self.state().row_cap = Some(rows);
        self
    }

    pub fn sale(&self, id: &RecordId) -> Option<SalesRecord> {
        self.state().sales.get(id).map(|s| s.record.clone())
    }

    /// Ids submitted by each successful write call, in call order.
    pub fn upsert_calls(&self) -> Vec<Vec<RecordId>> {
        self.state().upsert_calls.clone()
    }

    pub fn sales_page_requests(&self) -> Vec<PageRequest> {
        self.state().sales_page_requests.clone()
    }
}

fn page_limit(page: PageRequest, row_cap: Option<usize>) -> usize {
    row_cap.map_or(page.size, |cap| cap.min(page.size))
}

fn mapping_page(
    rows: &[StoredMapping],
    entity: Option<&str>,
    page: PageRequest,
    row_cap: Option<usize>,
) -> Vec<MappingRow> {
    let mut selected: Vec<&StoredMapping> = rows
        .iter()
        .filter(|m| m.active && (entity.is_none() || m.entity.as_deref() == entity))
        .collect();
    selected.sort_by(|a, b| a.row.item_number.cmp(&b.row.item_number));
    selected
        .into_iter()
        .skip(page.offset())
        .take(page_limit(page, row_cap))
        .map(|m| m.row.clone())
        .collect()
}

fn matches_filter(sale: &StoredSale, filter: &SalesFilter) -> bool {
    sale.entity == filter.entity && (filter.year.is_none() || sale.year == filter.year)
}

#[async_trait]
impl SalesStore for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn fetch_primary_mappings(&self, page: PageRequest) -> Result<Vec<MappingRow>, StoreError> {
        let state = self.state();
        Ok(mapping_page(&state.primary, None, page, state.row_cap))
    }

    async fn fetch_secondary_mappings(
        &self,
        entity: &str,
        page: PageRequest,
    ) -> Result<Vec<MappingRow>, StoreError> {
        let state = self.state();
        Ok(mapping_page(&state.secondary, Some(entity), page, state.row_cap))
    }

    async fn fetch_sales_page(
        &self,
        filter: &SalesFilter,
        page: PageRequest,
    ) -> Result<SalesPage, StoreError> {
        let mut state = self.state();
        state.sales_page_requests.push(page);
        if state.fail_sales_page == Some(page.index()) {
            return Err(StoreError::Rejected(format!(
                "injected failure reading sales page {}",
                page.index()
            )));
        }

        let matching: Vec<&StoredSale> = state
            .sales
            .values()
            .filter(|s| matches_filter(s, filter) && s.record.item_number.is_some())
            .collect();
        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(page.offset())
            .take(page_limit(page, state.row_cap))
            .map(|s| s.record.clone())
            .collect();
        Ok(SalesPage { records, total })
    }

    async fn upsert_sales(&self, intents: &[UpdateIntent]) -> Result<usize, StoreError> {
        let mut state = self.state();
        let call_index = state.upsert_calls.len();
        if state.fail_upsert_call == Some(call_index) {
            return Err(StoreError::Rejected(format!(
                "injected failure on write call {call_index}"
            )));
        }

        for intent in intents {
            if let Some(sale) = state.sales.get_mut(&intent.id) {
                sale.record.current = intent.proposed.clone();
            }
        }
        state
            .upsert_calls
            .push(intents.iter().map(|i| i.id.clone()).collect());
        Ok(intents.len())
    }

    async fn find_sales_by_items(
        &self,
        filter: &SalesFilter,
        items: &[String],
    ) -> Result<Vec<SalesRecord>, StoreError> {
        Ok(self
            .state()
            .sales
            .values()
            .filter(|s| matches_filter(s, filter))
            .filter(|s| {
                s.record
                    .item_number
                    .as_ref()
                    .is_some_and(|item| items.contains(item))
            })
            .map(|s| s.record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemsync_core::Classification;

    fn sale(id: i64, item: Option<&str>) -> SalesRecord {
        SalesRecord {
            id: RecordId::Int(id),
            item_number: item.map(Into::into),
            current: Classification::default(),
        }
    }

    #[tokio::test]
    async fn sales_scan_filters_by_entity_year_and_item_presence() {
        let store = MemoryStore::new();
        store
            .add_sale("Japan", Some(2024), sale(3, Some("A1")))
            .add_sale("Japan", Some(2023), sale(1, Some("A1")))
            .add_sale("Japan", Some(2024), sale(2, None))
            .add_sale("Korea", Some(2024), sale(4, Some("A1")));

        let page = store
            .fetch_sales_page(&SalesFilter::for_entity("Japan"), PageRequest::new(0, 10))
            .await
            .expect("page");
        assert_eq!(page.total, 2);
        let ids: Vec<_> = page.records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![RecordId::Int(1), RecordId::Int(3)]);

        let filter = SalesFilter {
            entity: "Japan".into(),
            year: Some(2024),
        };
        let page = store
            .fetch_sales_page(&filter, PageRequest::new(0, 10))
            .await
            .expect("page");
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].id, RecordId::Int(3));
    }

    #[tokio::test]
    async fn row_cap_truncates_every_read() {
        let store = MemoryStore::new();
        store.cap_page_rows(2);
        for id in 1..=5 {
            store.add_sale("Japan", None, sale(id, Some("A1")));
            store.add_primary(MappingRow::new(&format!("K{id}"), Classification::default()), true);
        }

        let page = store
            .fetch_sales_page(&SalesFilter::for_entity("Japan"), PageRequest::new(0, 10))
            .await
            .expect("page");
        assert_eq!(page.total, 5);
        assert_eq!(page.records.len(), 2);

        let rows = store
            .fetch_primary_mappings(PageRequest::starting_at(3, 10))
            .await
            .expect("rows");
        let keys: Vec<_> = rows.iter().filter_map(|r| r.item_number.clone()).collect();
        assert_eq!(keys, vec!["K4".to_string(), "K5".to_string()]);
    }

    #[tokio::test]
    async fn inactive_and_foreign_mappings_are_hidden() {
        let store = MemoryStore::new();
        store
            .add_secondary("Japan", MappingRow::new("B", Classification::default()), true)
            .add_secondary("Japan", MappingRow::new("A", Classification::default()), true)
            .add_secondary("Japan", MappingRow::new("C", Classification::default()), false)
            .add_secondary("Korea", MappingRow::new("D", Classification::default()), true);

        let rows = store
            .fetch_secondary_mappings("Japan", PageRequest::new(0, 10))
            .await
            .expect("rows");
        let keys: Vec<_> = rows.iter().filter_map(|r| r.item_number.clone()).collect();
        assert_eq!(keys, vec!["A".to_string(), "B".to_string()]);
    }
}
