//! Core domain model for sales item classification reconciliation.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "itemsync-core";

/// Entity whose sales rows are reconciled when nothing else is configured.
pub const DEFAULT_ENTITY: &str = "Japan";

/// Primary key of a sales row. The store decides whether ids are numeric or textual;
/// the value is carried back verbatim on upsert.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{id}"),
            RecordId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

/// Trim a raw attribute value; blank or missing values become `None`.
pub fn normalize_value(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// The four classification attributes shared by mapping sources and sales rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Classification {
    pub fg_classification: Option<String>,
    pub category: Option<String>,
    pub model: Option<String>,
    pub product: Option<String>,
}

impl Classification {
    pub fn fields(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("fg_classification", self.fg_classification.as_deref()),
            ("category", self.category.as_deref()),
            ("model", self.model.as_deref()),
            ("product", self.product.as_deref()),
        ]
    }

    /// Trimmed copy with blank attributes dropped.
    pub fn normalized(&self) -> Self {
        Self {
            fg_classification: normalize_value(self.fg_classification.as_deref()),
            category: normalize_value(self.category.as_deref()),
            model: normalize_value(self.model.as_deref()),
            product: normalize_value(self.product.as_deref()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, v)| v.is_none())
    }

    /// Overlay every present value of `overrides` onto `self`. Absent override values
    /// keep the current value; nothing is ever blanked out.
    pub fn filled_from(&self, overrides: &Classification) -> Classification {
        fn pick(over: &Option<String>, current: &Option<String>) -> Option<String> {
            over.as_ref().or(current.as_ref()).cloned()
        }
        Classification {
            fg_classification: pick(&overrides.fg_classification, &self.fg_classification),
            category: pick(&overrides.category, &self.category),
            model: pick(&overrides.model, &self.model),
            product: pick(&overrides.product, &self.product),
        }
    }

    /// Names of attributes whose values differ, compared strictly (`None` != `Some("")`).
    pub fn differing_fields(&self, other: &Classification) -> Vec<&'static str> {
        self.fields()
            .iter()
            .zip(other.fields().iter())
            .filter(|((_, a), (_, b))| a != b)
            .map(|((name, _), _)| *name)
            .collect()
    }
}

/// Raw row as returned by either mapping source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRow {
    #[serde(default)]
    pub item_number: Option<String>,
    #[serde(flatten)]
    pub fields: Classification,
}

impl MappingRow {
    pub fn new(item_number: &str, fields: Classification) -> Self {
        Self {
            item_number: Some(item_number.to_string()),
            fields,
        }
    }
}

/// Which mapping source supplied an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Primary,
    Secondary,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Primary => f.write_str("primary"),
            Provenance::Secondary => f.write_str("secondary"),
        }
    }
}

/// Authoritative correction for one item key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub key: String,
    pub fields: Classification,
    pub provenance: Provenance,
}

impl MappingEntry {
    /// Build an entry from a source row; rows whose key is blank after trimming yield `None`.
    pub fn from_row(row: &MappingRow, provenance: Provenance) -> Option<Self> {
        let key = normalize_value(row.item_number.as_deref())?;
        Some(Self {
            key,
            fields: row.fields.normalized(),
            provenance,
        })
    }
}

/// One sales row under reconciliation. Current values are kept exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub id: RecordId,
    #[serde(default)]
    pub item_number: Option<String>,
    #[serde(flatten)]
    pub current: Classification,
}

impl SalesRecord {
    pub fn item_key(&self) -> Option<String> {
        normalize_value(self.item_number.as_deref())
    }
}

/// Full-row proposal for one sales record; every attribute is carried, changed or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateIntent {
    pub id: RecordId,
    #[serde(flatten)]
    pub proposed: Classification,
}
