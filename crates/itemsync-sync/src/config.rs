//! Run configuration: defaults, environment, optional YAML settings file, store selection.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use itemsync_core::DEFAULT_ENTITY;
use itemsync_storage::{
    HttpClientConfig, PgStore, PostgrestConfig, PostgrestStore, SalesFilter, SalesStore,
    TableNames, MAX_PAGE_ROWS,
};
use serde::Deserialize;

use crate::ReconcileError;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Non-blank value of an environment-style variable.
fn lookup_value(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn lookup_parsed<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ReconcileError> {
    match lookup_value(lookup, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ReconcileError::Config(format!("{key} has invalid value {raw:?}"))),
        None => Ok(None),
    }
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    pub entity: String,
    pub year: Option<i32>,
    pub batch_size: usize,
    pub page_size: usize,
    pub delay: Duration,
    pub dry_run: bool,
    pub tables: TableNames,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            entity: DEFAULT_ENTITY.to_string(),
            year: None,
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            delay: DEFAULT_DELAY,
            dry_run: false,
            tables: TableNames::default(),
        }
    }
}

impl ReconcileConfig {
    pub fn from_env() -> Result<Self, ReconcileError> {
        Self::from_lookup(&process_env)
    }

    /// Defaults overridden by `ITEMSYNC_*` variables.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ReconcileError> {
        let mut config = Self::default();
        if let Some(entity) = lookup_value(lookup, "ITEMSYNC_ENTITY") {
            config.set_entity(&entity);
        }
        if let Some(year) = lookup_parsed(lookup, "ITEMSYNC_YEAR")? {
            config.year = Some(year);
        }
        if let Some(size) = lookup_parsed(lookup, "ITEMSYNC_BATCH_SIZE")? {
            config.batch_size = size;
        }
        if let Some(size) = lookup_parsed(lookup, "ITEMSYNC_PAGE_SIZE")? {
            config.page_size = size;
        }
        if let Some(ms) = lookup_parsed::<u64>(lookup, "ITEMSYNC_DELAY_MS")? {
            config.delay = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// Entity name as used in the `entity = ?` filter; surrounding whitespace is dropped.
    pub fn set_entity(&mut self, entity: &str) {
        self.entity = entity.trim().to_string();
    }

    pub fn apply_settings(&mut self, settings: SettingsFile) {
        if let Some(entity) = settings.entity {
            self.set_entity(&entity);
        }
        if settings.year.is_some() {
            self.year = settings.year;
        }
        if let Some(size) = settings.batch_size {
            self.batch_size = size;
        }
        if let Some(size) = settings.page_size {
            self.page_size = size;
        }
        if let Some(ms) = settings.delay_ms {
            self.delay = Duration::from_millis(ms);
        }
        if let Some(tables) = settings.tables {
            self.tables = tables;
        }
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.entity.trim().is_empty() {
            return Err(ReconcileError::Config("entity must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(ReconcileError::Config("batch size must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(ReconcileError::Config("page size must be at least 1".into()));
        }
        if self.page_size > MAX_PAGE_ROWS {
            return Err(ReconcileError::Config(format!(
                "page size {} exceeds the {MAX_PAGE_ROWS}-row response limit",
                self.page_size
            )));
        }
        self.tables
            .validate()
            .map_err(|err| ReconcileError::Config(err.to_string()))
    }

    pub fn filter(&self) -> SalesFilter {
        SalesFilter {
            entity: self.entity.clone(),
            year: self.year,
        }
    }
}

/// Optional YAML overrides, e.g.
///
/// ```yaml
/// entity: Japan
/// batch_size: 500
/// delay_ms: 50
/// tables:
///   sales: sales_data
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    pub entity: Option<String>,
    pub year: Option<i32>,
    pub batch_size: Option<usize>,
    pub page_size: Option<usize>,
    pub delay_ms: Option<u64>,
    pub tables: Option<TableNames>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> Result<Self, ReconcileError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            ReconcileError::Config(format!("reading {}: {err}", path.display()))
        })?;
        serde_yaml::from_str(&text)
            .map_err(|err| ReconcileError::Config(format!("parsing {}: {err}", path.display())))
    }
}

/// How to reach the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConnection {
    Rest {
        base_url: String,
        api_key: String,
        timeout: Duration,
    },
    Postgres {
        database_url: String,
    },
}

impl StoreConnection {
    pub fn from_env() -> Result<Self, ReconcileError> {
        Self::from_lookup(&process_env)
    }

    /// REST endpoint + credential when configured, otherwise `DATABASE_URL`.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ReconcileError> {
        let base_url = lookup_value(lookup, "NEXT_PUBLIC_SUPABASE_URL")
            .or_else(|| lookup_value(lookup, "SUPABASE_URL"));
        let api_key = lookup_value(lookup, "SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|| lookup_value(lookup, "SUPABASE_ANON_KEY"));

        match (base_url, api_key) {
            (Some(base_url), Some(api_key)) => {
                let timeout_secs = lookup_parsed(lookup, "ITEMSYNC_HTTP_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
                Ok(StoreConnection::Rest {
                    base_url,
                    api_key,
                    timeout: Duration::from_secs(timeout_secs),
                })
            }
            (base_url, api_key) => {
                if let Some(database_url) = lookup_value(lookup, "DATABASE_URL") {
                    return Ok(StoreConnection::Postgres { database_url });
                }
                let missing = match (base_url.is_some(), api_key.is_some()) {
                    (true, false) => "SUPABASE_SERVICE_ROLE_KEY (or SUPABASE_ANON_KEY)",
                    (false, true) => "NEXT_PUBLIC_SUPABASE_URL (or SUPABASE_URL)",
                    _ => "NEXT_PUBLIC_SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY",
                };
                Err(ReconcileError::Config(format!("{missing} must be set")))
            }
        }
    }

    pub async fn open(&self, tables: &TableNames) -> Result<Arc<dyn SalesStore>, ReconcileError> {
        match self {
            StoreConnection::Rest {
                base_url,
                api_key,
                timeout,
            } => {
                let store = PostgrestStore::new(PostgrestConfig {
                    base_url: base_url.clone(),
                    api_key: api_key.clone(),
                    tables: tables.clone(),
                    http: HttpClientConfig {
                        timeout: *timeout,
                        ..HttpClientConfig::default()
                    },
                })
                .map_err(|err| ReconcileError::Config(format!("{err:#}")))?;
                Ok(Arc::new(store))
            }
            StoreConnection::Postgres { database_url } => {
                let store = PgStore::connect(database_url, tables.clone())
                    .await
                    .map_err(|err| ReconcileError::Config(format!("connecting to database: {err}")))?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_documented_constants() {
        let config = ReconcileConfig::from_lookup(&env(&[])).expect("config");
        assert_eq!(config.entity, "Japan");
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.delay, Duration::from_millis(100));
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_and_rejects_garbage() {
        let config = ReconcileConfig::from_lookup(&env(&[
            ("ITEMSYNC_ENTITY", " Korea "),
            ("ITEMSYNC_BATCH_SIZE", "250"),
            ("ITEMSYNC_DELAY_MS", "0"),
            ("ITEMSYNC_YEAR", "2024"),
        ]))
        .expect("config");
        assert_eq!(config.entity, "Korea");
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.delay, Duration::ZERO);
        assert_eq!(config.filter().year, Some(2024));

        let err = ReconcileConfig::from_lookup(&env(&[("ITEMSYNC_PAGE_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, ReconcileError::Config(msg) if msg.contains("ITEMSYNC_PAGE_SIZE")));
    }

    #[test]
    fn zero_sizes_are_configuration_errors() {
        let config = ReconcileConfig {
            batch_size: 0,
            ..ReconcileConfig::default()
        };
        assert!(matches!(config.validate(), Err(ReconcileError::Config(_))));
        let config = ReconcileConfig {
            page_size: 0,
            ..ReconcileConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn page_size_is_bounded_by_the_response_limit() {
        let config = ReconcileConfig {
            page_size: MAX_PAGE_ROWS,
            ..ReconcileConfig::default()
        };
        assert!(config.validate().is_ok());
        let config = ReconcileConfig {
            page_size: MAX_PAGE_ROWS + 1,
            ..ReconcileConfig::default()
        };
        assert!(matches!(config.validate(), Err(ReconcileError::Config(msg)) if msg.contains("1001")));
    }

    #[test]
    fn public_endpoint_variable_wins_over_the_server_one() {
        let conn = StoreConnection::from_lookup(&env(&[
            ("SUPABASE_URL", "https://server.supabase.co"),
            ("NEXT_PUBLIC_SUPABASE_URL", "https://public.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
        ]))
        .expect("connection");
        assert!(matches!(
            conn,
            StoreConnection::Rest { base_url, .. } if base_url == "https://public.supabase.co"
        ));
    }

    #[test]
    fn service_role_key_is_preferred_over_anon_key() {
        let conn = StoreConnection::from_lookup(&env(&[
            ("NEXT_PUBLIC_SUPABASE_URL", "https://proj.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
        ]))
        .expect("connection");
        assert_eq!(
            conn,
            StoreConnection::Rest {
                base_url: "https://proj.supabase.co".into(),
                api_key: "service".into(),
                timeout: Duration::from_secs(30),
            }
        );

        let conn = StoreConnection::from_lookup(&env(&[
            ("SUPABASE_URL", "https://proj.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "  "),
            ("SUPABASE_ANON_KEY", "anon"),
        ]))
        .expect("connection");
        assert!(matches!(conn, StoreConnection::Rest { api_key, .. } if api_key == "anon"));
    }

    #[test]
    fn missing_credentials_fail_before_any_remote_call() {
        let err = StoreConnection::from_lookup(&env(&[("SUPABASE_URL", "https://proj.supabase.co")]))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Config(msg) if msg.contains("SUPABASE_SERVICE_ROLE_KEY")));

        let err = StoreConnection::from_lookup(&env(&[])).unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));

        let conn = StoreConnection::from_lookup(&env(&[("DATABASE_URL", "postgres://localhost/sales")]))
            .expect("postgres fallback");
        assert!(matches!(conn, StoreConnection::Postgres { .. }));
    }

    #[test]
    fn settings_file_overrides_environment() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "entity: Japan\nbatch_size: 500\ndelay_ms: 50\ntables:\n  sales: archive.sales_data\n"
        )
        .expect("write");

        let mut config = ReconcileConfig::from_lookup(&env(&[("ITEMSYNC_ENTITY", "Korea")]))
            .expect("config");
        config.apply_settings(SettingsFile::load(file.path()).expect("settings"));
        assert_eq!(config.entity, "Japan");
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.delay, Duration::from_millis(50));
        assert_eq!(config.tables.sales, "archive.sales_data");
        assert_eq!(config.tables.primary, "item_master");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn entity_from_settings_is_trimmed() {
        let mut config = ReconcileConfig::default();
        config.apply_settings(SettingsFile {
            entity: Some(" Korea\t".into()),
            ..SettingsFile::default()
        });
        assert_eq!(config.entity, "Korea");
        assert_eq!(config.filter().entity, "Korea");
    }

    #[test]
    fn unknown_settings_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "entitiy: Japan").expect("write");
        assert!(matches!(
            SettingsFile::load(file.path()),
            Err(ReconcileError::Config(_))
        ));
    }
}
