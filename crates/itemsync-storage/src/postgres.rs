//! Direct Postgres backend over a sqlx pool.
//!
//! Ids are read as text so numeric and uuid keyed tables behave the same; writes match on
//! `id::text`. Rows are only ever written back for ids the scan returned, so the batched
//! write is an `UPDATE ... FROM UNNEST(...)` rather than an insert-or-update.

use async_trait::async_trait;
use itemsync_core::{Classification, MappingRow, RecordId, SalesRecord, UpdateIntent};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::debug;

use crate::{PageRequest, SalesFilter, SalesPage, SalesStore, StoreError, TableNames};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    tables: TableNames,
}

impl PgStore {
    pub async fn connect(database_url: &str, tables: TableNames) -> Result<Self, StoreError> {
        tables.validate()?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self { pool, tables })
    }

    async fn fetch_mappings(
        &self,
        sql: &str,
        entity: Option<&str>,
        page: PageRequest,
    ) -> Result<Vec<MappingRow>, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(entity) = entity {
            query = query.bind(entity);
        }
        let rows = query
            .bind(page.size as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<MappingRow, StoreError> {
                Ok(MappingRow {
                    item_number: row.try_get("item_number")?,
                    fields: classification_from_row(row)?,
                })
            })
            .collect()
    }
}

fn classification_from_row(row: &PgRow) -> Result<Classification, sqlx::Error> {
    Ok(Classification {
        fg_classification: row.try_get("fg_classification")?,
        category: row.try_get("category")?,
        model: row.try_get("model")?,
        product: row.try_get("product")?,
    })
}

fn sales_record_from_row(row: &PgRow) -> Result<SalesRecord, sqlx::Error> {
    let id: String = row.try_get("id")?;
    Ok(SalesRecord {
        id: RecordId::Text(id),
        item_number: row.try_get("item_number")?,
        current: classification_from_row(row)?,
    })
}

fn column(
    intents: &[UpdateIntent],
    field: impl Fn(&Classification) -> &Option<String>,
) -> Vec<Option<String>> {
    intents.iter().map(|i| field(&i.proposed).clone()).collect()
}

#[async_trait]
impl SalesStore for PgStore {
    fn describe(&self) -> String {
        "postgres (DATABASE_URL)".to_string()
    }

    async fn fetch_primary_mappings(&self, page: PageRequest) -> Result<Vec<MappingRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT item_number, fg_classification, category, model, product
              FROM {}
             WHERE is_active = true
             ORDER BY item_number ASC
             LIMIT $1 OFFSET $2
            "#,
            self.tables.primary
        );
        self.fetch_mappings(&sql, None, page).await
    }

    async fn fetch_secondary_mappings(
        &self,
        entity: &str,
        page: PageRequest,
    ) -> Result<Vec<MappingRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT item_number, fg_classification, category, model, product
              FROM {}
             WHERE entity = $1 AND is_active = true
             ORDER BY item_number ASC
             LIMIT $2 OFFSET $3
            "#,
            self.tables.secondary
        );
        self.fetch_mappings(&sql, Some(entity), page).await
    }

    async fn fetch_sales_page(
        &self,
        filter: &SalesFilter,
        page: PageRequest,
    ) -> Result<SalesPage, StoreError> {
        let predicate = "entity = $1 AND item_number IS NOT NULL AND ($2::int IS NULL OR year = $2)";
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE {predicate}",
            self.tables.sales
        ))
        .bind(&filter.entity)
        .bind(filter.year)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT id::text AS id, item_number, fg_classification, category, model, product
              FROM {}
             WHERE {predicate}
             ORDER BY id ASC
             LIMIT $3 OFFSET $4
            "#,
            self.tables.sales
        ))
        .bind(&filter.entity)
        .bind(filter.year)
        .bind(page.size as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .iter()
            .map(sales_record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(records = records.len(), total, "sales page fetched");
        Ok(SalesPage {
            records,
            total: total.max(0) as u64,
        })
    }

    async fn upsert_sales(&self, intents: &[UpdateIntent]) -> Result<usize, StoreError> {
        if intents.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = intents.iter().map(|i| i.id.to_string()).collect();

        sqlx::query(&format!(
            r#"
            UPDATE {} AS s
               SET fg_classification = v.fg_classification,
                   category = v.category,
                   model = v.model,
                   product = v.product
              FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[])
                   AS v(id, fg_classification, category, model, product)
             WHERE s.id::text = v.id
            "#,
            self.tables.sales
        ))
        .bind(ids)
        .bind(column(intents, |c| &c.fg_classification))
        .bind(column(intents, |c| &c.category))
        .bind(column(intents, |c| &c.model))
        .bind(column(intents, |c| &c.product))
        .execute(&self.pool)
        .await?;
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
        let rows = sqlx::query(&format!(
            r#"
            SELECT id::text AS id, item_number, fg_classification, category, model, product
              FROM {}
             WHERE entity = $1 AND ($2::int IS NULL OR year = $2) AND item_number = ANY($3)
             ORDER BY id ASC
            "#,
            self.tables.sales
        ))
        .bind(&filter.entity)
        .bind(filter.year)
        .bind(items.to_vec())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(sales_record_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
