//! Remote catalogue store capability, MOLGENIS session and test store.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use eucan_core::{
    Catalogue, ReferenceCatalog, ReferenceKind, ReferenceTable, ReferenceValue, TableMeta,
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

mod memory;
mod molgenis;

pub use memory::{InMemoryStore, StoreCall, StoreOperation};
pub use molgenis::MolgenisSession;

pub const CRATE_NAME: &str = "eucan-storage";

/// Table listing the source catalogues to import.
pub const CATALOGUES_TABLE: &str = "eucan_source_catalogues";

/// Page size used when reading whole reference or target tables.
pub const READ_BATCH_SIZE: usize = 10_000;

pub const DEFAULT_ADD_BATCH_SIZE: usize = 1000;

/// One entity in upload format: references are plain ids, no `_href`.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filter: Option<String>,
    pub attributes: Option<String>,
    pub batch_size: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    /// RSQL filter such as `source_catalogue=="lc"` or `id=in=("a","b")`.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Comma separated attribute names.
    pub fn attributes(mut self, attributes: impl Into<String>) -> Self {
        self.attributes = Some(attributes.into());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Quotes `value` as an RSQL argument so reserved characters survive.
pub fn rsql_value(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {message}")]
    HttpStatus {
        status: u16,
        url: String,
        message: String,
    },
    #[error("unexpected response for {entity_type_id}: {message}")]
    Decode {
        entity_type_id: String,
        message: String,
    },
    #[error("could not encode rows: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("login failed for {username}: {message}")]
    Login { username: String, message: String },
    #[error("Unknown code: {0}")]
    UnknownCatalogueCode(String),
}

impl StoreError {
    fn decode(entity_type_id: &str, message: impl Into<String>) -> Self {
        StoreError::Decode {
            entity_type_id: entity_type_id.to_string(),
            message: message.into(),
        }
    }
}

/// Operations the importer needs from the central catalogue.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_meta(&self, entity_type_id: &str) -> Result<TableMeta, StoreError>;

    /// Reads every matching row, following pagination until exhausted.
    async fn get(&self, entity_type_id: &str, query: &Query) -> Result<Vec<Row>, StoreError>;

    async fn add_all(&self, entity_type_id: &str, rows: &[Row]) -> Result<(), StoreError>;

    async fn delete_list(&self, entity_type_id: &str, ids: &[String]) -> Result<(), StoreError>;

    /// Adds rows in sequential chunks; stops at the first failing chunk.
    async fn add_batched(
        &self,
        entity_type_id: &str,
        rows: &[Row],
        batch_size: usize,
    ) -> Result<(), StoreError> {
        for (index, batch) in rows.chunks(batch_size.max(1)).enumerate() {
            debug!(entity_type_id, batch = index, rows = batch.len(), "adding batch");
            self.add_all(entity_type_id, batch).await?;
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
            timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

impl HttpClientConfig {
    pub fn build_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(self.timeout);

        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        builder.build().context("building reqwest client")
    }
}

/// Id of a referenced value: plain scalars as text, nested entities by their `id`.
pub fn reference_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        Value::Bool(id) => Some(id.to_string()),
        Value::Object(entity) => entity.get("id").and_then(reference_id),
        Value::Null | Value::Array(_) => None,
    }
}

/// Drops `_href` and collapses nested entities to their ids.
pub fn to_upload_format(rows: Vec<Row>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .filter(|(name, _)| name != "_href")
                .map(|(name, value)| (name, collapse_reference(value)))
                .collect()
        })
        .collect()
}

fn collapse_reference(value: Value) -> Value {
    match value {
        Value::Object(entity) => match entity.get("id") {
            Some(id) => id.clone(),
            None => Value::Object(entity),
        },
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(_) => collapse_reference(item),
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

/// Serializes records into store rows. Each record must serialize to an object.
pub fn to_rows<'a, T: Serialize + 'a>(
    records: impl IntoIterator<Item = &'a T>,
) -> Result<Vec<Row>, StoreError> {
    records
        .into_iter()
        .map(|record| match serde_json::to_value(record)? {
            Value::Object(row) => Ok(row),
            other => Err(StoreError::decode(
                "upload",
                format!("expected an object, got {other}"),
            )),
        })
        .collect()
}

/// Reads the identity attribute out of a metadata API response.
pub fn parse_table_meta(entity_type_id: &str, meta: &Value) -> Result<TableMeta, StoreError> {
    let attributes = meta
        .pointer("/data/attributes/items")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::decode(entity_type_id, "metadata without attributes"))?;

    attributes
        .iter()
        .filter_map(|attribute| attribute.get("data"))
        .find(|data| data.get("idAttribute").and_then(Value::as_bool) == Some(true))
        .and_then(|data| data.get("name").and_then(Value::as_str))
        .map(|name| TableMeta::new(entity_type_id, name))
        .ok_or_else(|| StoreError::decode(entity_type_id, "no id attribute in metadata"))
}

/// Source catalogues to import; all of them when `codes` is empty.
pub async fn get_catalogues(
    store: &dyn RemoteStore,
    codes: &[String],
) -> Result<Vec<Catalogue>, StoreError> {
    let query = if codes.is_empty() {
        Query::all()
    } else {
        let values: Vec<String> = codes.iter().map(|code| rsql_value(code)).collect();
        Query::all().filter(format!("id=in=({})", values.join(",")))
    };
    let rows = store.get(CATALOGUES_TABLE, &query).await?;
    let catalogues = rows
        .iter()
        .map(catalogue_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(missing) = codes
        .iter()
        .find(|code| !catalogues.iter().any(|c| c.code == **code))
    {
        return Err(StoreError::UnknownCatalogueCode(missing.clone()));
    }

    Ok(catalogues)
}

fn catalogue_from_row(row: &Row) -> Result<Catalogue, StoreError> {
    let field = |name: &str| {
        row.get(name)
            .and_then(reference_id)
            .ok_or_else(|| StoreError::decode(CATALOGUES_TABLE, format!("missing {name}")))
    };
    Ok(Catalogue::new(
        field("id")?,
        field("description")?,
        field("catalogue_url")?,
        field("catalogue_type")?,
    ))
}

/// Loads the four reference tables as they currently exist centrally.
pub async fn get_reference_data(store: &dyn RemoteStore) -> Result<ReferenceCatalog, StoreError> {
    let mut catalog = ReferenceCatalog::new();
    for kind in ReferenceKind::ALL {
        let table = kind.table();
        let rows = store
            .get(
                &table,
                &Query::all().attributes("id,label").batch_size(READ_BATCH_SIZE),
            )
            .await?;
        let values = rows.iter().filter_map(|row| {
            let id = row.get("id").and_then(reference_id)?;
            let label = row
                .get("label")
                .and_then(reference_id)
                .unwrap_or_else(|| id.clone());
            Some(ReferenceValue::new(id, label))
        });
        catalog.set_table(kind, ReferenceTable::of(values));
        debug!(table = %table, values = catalog.table(kind).len(), "loaded reference data");
    }
    Ok(catalog)
}
