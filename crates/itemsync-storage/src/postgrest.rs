//! Hosted REST (PostgREST) backend.

use anyhow::Context;
use async_trait::async_trait;
use itemsync_core::{MappingRow, SalesRecord, UpdateIntent};
use reqwest::header::{HeaderMap, CONTENT_RANGE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info_span, Instrument};

use crate::{
    HttpClientConfig, PageRequest, SalesFilter, SalesPage, SalesStore, StoreError, TableNames,
};

const MAPPING_COLUMNS: &str = "item_number,fg_classification,category,model,product";
const SALES_COLUMNS: &str = "id,item_number,fg_classification,category,model,product";
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    pub base_url: String,
    pub api_key: String,
    pub tables: TableNames,
    pub http: HttpClientConfig,
}

#[derive(Debug)]
pub struct PostgrestStore {
    client: reqwest::Client,
    rest_base: String,
    api_key: String,
    tables: TableNames,
}

impl PostgrestStore {
    pub fn new(config: PostgrestConfig) -> anyhow::Result<Self> {
        config.tables.validate()?;
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.http.timeout);

        if let Some(user_agent) = &config.http.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            rest_base: format!("{}/rest/v1", config.base_url.trim_end_matches('/')),
            api_key: config.api_key,
            tables: config.tables,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_base, table)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
        exact_count: bool,
    ) -> Result<(Vec<T>, HeaderMap), StoreError> {
        let url = self.table_url(table);
        let mut request = self.authorized(self.client.get(&url)).query(query);
        if exact_count {
            request = request.header("Prefer", "count=exact");
        }

        let resp = checked(request.send().await?).await?;
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        let rows = serde_json::from_slice(&body).map_err(|source| StoreError::Decode {
            what: format!("rows from {table}"),
            source,
        })?;
        Ok((rows, headers))
    }

    async fn fetch_mappings(
        &self,
        table: &str,
        entity: Option<&str>,
        page: PageRequest,
    ) -> Result<Vec<MappingRow>, StoreError> {
        let mut query = vec![
            ("select", MAPPING_COLUMNS.to_string()),
            ("is_active", "eq.true".to_string()),
        ];
        if let Some(entity) = entity {
            query.push(("entity", format!("eq.{entity}")));
        }
        query.extend(window_params(page, "item_number.asc"));

        let (rows, _) = self
            .get_rows(table, &query, false)
            .instrument(info_span!("mapping_page", table, page = page.index()))
            .await?;
        Ok(rows)
    }

    fn sales_filter_params(filter: &SalesFilter) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("select", SALES_COLUMNS.to_string()),
            ("entity", format!("eq.{}", filter.entity)),
        ];
        if let Some(year) = filter.year {
            query.push(("year", format!("eq.{year}")));
        }
        query
    }
}

fn window_params(page: PageRequest, order: &str) -> Vec<(&'static str, String)> {
    vec![
        ("order", order.to_string()),
        ("offset", page.offset().to_string()),
        ("limit", page.size.to_string()),
    ]
}

/// Turn non-success responses into `StoreError::HttpStatus` carrying a body excerpt.
async fn checked(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(StoreError::HttpStatus {
        status: status.as_u16(),
        url,
        body,
    })
}

/// Total row count from a `Content-Range` header such as `0-999/12345` or `*/0`.
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.trim().rsplit_once('/')?;
    total.parse().ok()
}

/// PostgREST `in.(...)` list with every value double-quoted.
pub fn in_list(values: &[String]) -> String {
    let quoted = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({quoted})")
}

#[async_trait]
impl SalesStore for PostgrestStore {
    fn describe(&self) -> String {
        format!("rest {}", self.rest_base)
    }

    async fn fetch_primary_mappings(&self, page: PageRequest) -> Result<Vec<MappingRow>, StoreError> {
        self.fetch_mappings(&self.tables.primary, None, page).await
    }

    async fn fetch_secondary_mappings(
        &self,
        entity: &str,
        page: PageRequest,
    ) -> Result<Vec<MappingRow>, StoreError> {
        self.fetch_mappings(&self.tables.secondary, Some(entity), page)
            .await
    }

    async fn fetch_sales_page(
        &self,
        filter: &SalesFilter,
        page: PageRequest,
    ) -> Result<SalesPage, StoreError> {
        let mut query = Self::sales_filter_params(filter);
        query.push(("item_number", "not.is.null".to_string()));
        query.extend(window_params(page, "id.asc"));

        let (records, headers) = self
            .get_rows::<SalesRecord>(&self.tables.sales, &query, true)
            .instrument(info_span!("sales_page", entity = %filter.entity, page = page.index()))
            .await?;
        let total = headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| StoreError::MissingCount {
                url: self.table_url(&self.tables.sales),
            })?;
        debug!(records = records.len(), total, "sales page fetched");
        Ok(SalesPage { records, total })
    }

    async fn upsert_sales(&self, intents: &[UpdateIntent]) -> Result<usize, StoreError> {
        if intents.is_empty() {
            return Ok(0);
        }
        let url = self.table_url(&self.tables.sales);
        let request = self
            .authorized(self.client.post(&url))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(intents);
        checked(request.send().await?).await?;
        Ok(intents.len())
    }

    async fn find_sales_by_items(
        &self,
        filter: &SalesFilter,
        items: &[String],
    ) -> Result<Vec<SalesRecord>, StoreError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = Self::sales_filter_params(filter);
        query.push(("item_number", in_list(items)));
        query.push(("order", "id.asc".to_string()));
        let (records, _) = self.get_rows(&self.tables.sales, &query, false).await?;
        Ok(records)
    }
}
