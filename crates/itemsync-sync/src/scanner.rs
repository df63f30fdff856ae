//! Paginated Scanner over the filtered sales rows.

use itemsync_core::SalesRecord;
use itemsync_storage::{PageRequest, SalesFilter, SalesStore, StoreError};

use crate::error::{ReadStage, ReconcileError};

/// Whether rows remain past this page's inclusive window `[from, to]`, i.e. `total > to + 1`.
pub fn has_more_after(total: u64, page: PageRequest) -> bool {
    let (_, to) = page.window();
    total > to as u64 + 1
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedPage {
    pub page: PageRequest,
    pub records: Vec<SalesRecord>,
    pub has_more: bool,
    pub total: u64,
}

pub struct PageScanner<'a> {
    store: &'a dyn SalesStore,
    filter: &'a SalesFilter,
    page_size: usize,
}

impl<'a> PageScanner<'a> {
    pub fn new(store: &'a dyn SalesStore, filter: &'a SalesFilter, page_size: usize) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
        }
    }

    /// Fetch page `index`. Any page before the last must come back full.
    pub async fn fetch_page(&self, index: usize) -> Result<ScannedPage, ReconcileError> {
        let page = PageRequest::new(index, self.page_size);
        let fetched = self
            .store
            .fetch_sales_page(self.filter, page)
            .await
            .map_err(ReconcileError::read(ReadStage::SalesPage(index)))?;
        let has_more = has_more_after(fetched.total, page);
        if has_more && fetched.records.len() < page.size {
            return Err(ReconcileError::Read {
                stage: ReadStage::SalesPage(index),
                source: StoreError::ShortPage {
                    offset: page.offset(),
                    expected: page.size,
                    received: fetched.records.len(),
                },
            });
        }
        Ok(ScannedPage {
            page,
            has_more,
            records: fetched.records,
            total: fetched.total,
        })
    }
}
