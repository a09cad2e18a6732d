use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use eucan_core::TableMeta;

use crate::{reference_id, Query, RemoteStore, Row, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    GetMeta,
    Get,
    Add,
    Delete,
}

/// One request made against an [`InMemoryStore`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub operation: StoreOperation,
    pub entity_type_id: String,
    pub rows: usize,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Vec<Row>>,
    metas: BTreeMap<String, TableMeta>,
    calls: Vec<StoreCall>,
    failures: HashSet<(StoreOperation, String)>,
}

impl State {
    fn id_attribute(&self, entity_type_id: &str) -> String {
        self.metas
            .get(entity_type_id)
            .map(|meta| meta.id_attribute.clone())
            .unwrap_or_else(|| "id".to_string())
    }

    fn record(
        &mut self,
        operation: StoreOperation,
        entity_type_id: &str,
        rows: usize,
    ) -> Result<(), StoreError> {
        self.calls.push(StoreCall {
            operation,
            entity_type_id: entity_type_id.to_string(),
            rows,
        });
        if self.failures.contains(&(operation, entity_type_id.to_string())) {
            return Err(StoreError::HttpStatus {
                status: 500,
                url: format!("memory://{entity_type_id}"),
                message: format!("injected {operation:?} failure"),
            });
        }
        Ok(())
    }
}

/// In-process store that behaves like the central catalogue for tests.
///
/// Tables without configured metadata use `id` as identity attribute.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, entity_type_id: &str, rows: Vec<Row>) -> Self {
        self.state()
            .tables
            .insert(entity_type_id.to_string(), rows);
        self
    }

    pub fn with_meta(self, meta: TableMeta) -> Self {
        self.state().metas.insert(meta.entity_type_id.clone(), meta);
        self
    }

    /// Makes every later `operation` on `entity_type_id` fail.
    pub fn fail_on(&self, operation: StoreOperation, entity_type_id: &str) {
        self.state()
            .failures
            .insert((operation, entity_type_id.to_string()));
    }

    pub fn rows(&self, entity_type_id: &str) -> Vec<Row> {
        self.state()
            .tables
            .get(entity_type_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn ids(&self, entity_type_id: &str) -> Vec<String> {
        let state = self.state();
        let id_attribute = state.id_attribute(entity_type_id);
        state
            .tables
            .get(entity_type_id)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get(&id_attribute).and_then(reference_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The two RSQL shapes the importer sends: `attr=="value"` and `attr=in=("a","b")`.
#[derive(Debug, PartialEq, Eq)]
enum Filter {
    Equals(String, String),
    In(String, Vec<String>),
}

impl Filter {
    fn parse(entity_type_id: &str, filter: &str) -> Result<Self, StoreError> {
        if let Some((attribute, values)) = filter.split_once("=in=") {
            let values = values
                .trim()
                .strip_prefix('(')
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| StoreError::decode(entity_type_id, format!("bad filter {filter}")))?;
            return Ok(Filter::In(attribute.trim().to_string(), arguments(values)));
        }
        if let Some((attribute, value)) = filter.split_once("==") {
            let value = arguments(value).into_iter().next().unwrap_or_default();
            return Ok(Filter::Equals(attribute.trim().to_string(), value));
        }
        Err(StoreError::decode(
            entity_type_id,
            format!("unsupported filter {filter}"),
        ))
    }

    fn matches(&self, row: &Row) -> bool {
        let value = |attribute: &str| row.get(attribute).and_then(reference_id);
        match self {
            Filter::Equals(attribute, expected) => value(attribute).as_ref() == Some(expected),
            Filter::In(attribute, expected) => {
                value(attribute).is_some_and(|v| expected.contains(&v))
            }
        }
    }
}

/// Splits a comma separated RSQL argument list, unquoting `"..."` arguments.
fn arguments(list: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = list.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if quoted => current.extend(chars.next()),
            '"' => quoted = !quoted,
            ',' if !quoted => values.push(std::mem::take(&mut current)),
            c if quoted || !c.is_whitespace() => current.push(c),
            _ => {}
        }
    }
    values.push(current);
    values
}

fn project(row: &Row, attributes: Option<&str>) -> Row {
    match attributes {
        None => row.clone(),
        Some(attributes) => {
            let wanted: HashSet<&str> = attributes.split(',').map(str::trim).collect();
            row.iter()
                .filter(|(name, _)| wanted.contains(name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn get_meta(&self, entity_type_id: &str) -> Result<TableMeta, StoreError> {
        let mut state = self.state();
        state.record(StoreOperation::GetMeta, entity_type_id, 0)?;
        Ok(TableMeta::new(entity_type_id, state.id_attribute(entity_type_id)))
    }

    async fn get(&self, entity_type_id: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        let filter = query
            .filter
            .as_deref()
            .map(|filter| Filter::parse(entity_type_id, filter))
            .transpose()?;

        let mut state = self.state();
        let rows: Vec<Row> = state
            .tables
            .get(entity_type_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.as_ref().map_or(true, |f| f.matches(row)))
                    .map(|row| project(row, query.attributes.as_deref()))
                    .collect()
            })
            .unwrap_or_default();
        state.record(StoreOperation::Get, entity_type_id, rows.len())?;
        Ok(rows)
    }

    async fn add_all(&self, entity_type_id: &str, rows: &[Row]) -> Result<(), StoreError> {
        let mut state = self.state();
        state.record(StoreOperation::Add, entity_type_id, rows.len())?;

        let id_attribute = state.id_attribute(entity_type_id);
        let table = state.tables.entry(entity_type_id.to_string()).or_default();
        let mut seen: HashSet<String> = table
            .iter()
            .filter_map(|row| row.get(&id_attribute).and_then(reference_id))
            .collect();

        for row in rows {
            let id = row
                .get(&id_attribute)
                .and_then(reference_id)
                .ok_or_else(|| StoreError::HttpStatus {
                    status: 400,
                    url: format!("memory://{entity_type_id}"),
                    message: format!("The attribute '{id_attribute}' is required"),
                })?;
            if !seen.insert(id.clone()) {
                return Err(StoreError::HttpStatus {
                    status: 400,
                    url: format!("memory://{entity_type_id}"),
                    message: format!("Duplicate value '{id}' for unique attribute '{id_attribute}'"),
                });
            }
        }

        table.extend(rows.iter().cloned());
        Ok(())
    }

    async fn delete_list(&self, entity_type_id: &str, ids: &[String]) -> Result<(), StoreError> {
        let mut state = self.state();
        state.record(StoreOperation::Delete, entity_type_id, ids.len())?;

        let id_attribute = state.id_attribute(entity_type_id);
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        if let Some(table) = state.tables.get_mut(entity_type_id) {
            table.retain(|row| {
                row.get(&id_attribute)
                    .and_then(reference_id)
                    .map_or(true, |id| !doomed.contains(id.as_str()))
            });
        }
        Ok(())
    }
}
