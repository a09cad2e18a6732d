use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::catalogue::Catalogue;
use crate::error::EucanError;
use crate::row::Cell;

/// The four entity tables of the central catalogue.
///
/// Variants are declared in import order so `Ord` follows it as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTable {
    Persons,
    Events,
    Populations,
    Studies,
}

impl TargetTable {
    /// Children before the parent that lists their ids.
    pub const IMPORT_ORDER: [TargetTable; 4] = [
        TargetTable::Persons,
        TargetTable::Events,
        TargetTable::Populations,
        TargetTable::Studies,
    ];

    pub fn delete_order() -> impl Iterator<Item = TargetTable> {
        Self::IMPORT_ORDER.into_iter().rev()
    }

    /// Column prefix used for this table in source rows.
    pub fn prefix(self) -> &'static str {
        match self {
            TargetTable::Persons => "persons_",
            TargetTable::Events => "events_",
            TargetTable::Populations => "population_",
            TargetTable::Studies => "study_",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            TargetTable::Persons => "eucan_persons",
            TargetTable::Events => "eucan_events",
            TargetTable::Populations => "eucan_population",
            TargetTable::Studies => "eucan_study",
        }
    }

    /// Middle segment of a record identity.
    pub fn classifier(self) -> &'static str {
        match self {
            TargetTable::Persons => "contactID",
            TargetTable::Events => "eventID",
            TargetTable::Populations => "populationID",
            TargetTable::Studies => "studyID",
        }
    }
}

/// The slice of remote entity metadata the importer relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub entity_type_id: String,
    pub id_attribute: String,
}

impl TableMeta {
    pub fn new(entity_type_id: impl Into<String>, id_attribute: impl Into<String>) -> Self {
        Self {
            entity_type_id: entity_type_id.into(),
            id_attribute: id_attribute.into(),
        }
    }
}

/// Flat attribute map ready to be written to a target table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetRecord {
    attributes: BTreeMap<String, Cell>,
}

impl TargetRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, attribute: &str) -> Option<&Cell> {
        self.attributes.get(attribute)
    }

    pub fn insert(&mut self, attribute: impl Into<String>, value: impl Into<Cell>) {
        self.attributes.insert(attribute.into(), value.into());
    }

    /// Identifier under `id_attribute`, rendered as text.
    pub fn id_value(&self, id_attribute: &str) -> Option<String> {
        match self.attributes.get(id_attribute)? {
            Cell::Scalar(scalar) => Some(scalar.to_string()),
            Cell::List(_) => None,
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl FromIterator<(String, Cell)> for TargetRecord {
    fn from_iter<T: IntoIterator<Item = (String, Cell)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// Records of one target table keyed by identifier.
///
/// Keeps the position of the first record seen for an id and the contents of
/// the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    kind: TargetTable,
    meta: TableMeta,
    ids: Vec<String>,
    records: HashMap<String, TargetRecord>,
}

impl Table {
    pub fn of(
        kind: TargetTable,
        meta: TableMeta,
        records: impl IntoIterator<Item = TargetRecord>,
    ) -> Result<Self, EucanError> {
        let mut ids = Vec::new();
        let mut by_id = HashMap::new();
        for record in records {
            let id = record
                .id_value(&meta.id_attribute)
                .ok_or_else(|| EucanError::MissingIdentifier {
                    table: meta.entity_type_id.clone(),
                    id_attribute: meta.id_attribute.clone(),
                })?;
            if by_id.insert(id.clone(), record).is_none() {
                ids.push(id);
            }
        }

        Ok(Self {
            kind,
            meta,
            ids,
            records: by_id,
        })
    }

    pub fn kind(&self) -> TargetTable {
        self.kind
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn entity_type_id(&self) -> &str {
        &self.meta.entity_type_id
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&TargetRecord> {
        self.records.get(id)
    }

    /// Records in first-seen order.
    pub fn records(&self) -> impl Iterator<Item = &TargetRecord> {
        self.ids.iter().filter_map(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Everything one source catalogue contributes to the central catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogueData {
    pub catalogue: Catalogue,
    tables: BTreeMap<TargetTable, Table>,
}

impl CatalogueData {
    pub fn new(catalogue: Catalogue, persons: Table, events: Table, populations: Table, studies: Table) -> Self {
        let tables = [persons, events, populations, studies]
            .into_iter()
            .map(|table| (table.kind(), table))
            .collect();
        Self { catalogue, tables }
    }

    /// Assembles the data set from tables of any order.
    ///
    /// Returns `None` unless every target table is present exactly once.
    pub fn from_tables(catalogue: Catalogue, tables: impl IntoIterator<Item = Table>) -> Option<Self> {
        let mut by_kind = BTreeMap::new();
        for table in tables {
            if by_kind.insert(table.kind(), table).is_some() {
                return None;
            }
        }
        (by_kind.len() == TargetTable::IMPORT_ORDER.len()).then_some(Self {
            catalogue,
            tables: by_kind,
        })
    }

    pub fn table(&self, kind: TargetTable) -> &Table {
        // construction guarantees one table per kind
        &self.tables[&kind]
    }

    pub fn import_order(&self) -> impl Iterator<Item = &Table> {
        TargetTable::IMPORT_ORDER.into_iter().map(|kind| self.table(kind))
    }

    pub fn delete_order(&self) -> impl Iterator<Item = &Table> {
        TargetTable::delete_order().map(|kind| self.table(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str) -> TargetRecord {
        let mut record = TargetRecord::new();
        record.insert("id", id);
        record.insert("name", name);
        record
    }

    #[test]
    fn import_and_delete_orders_are_mirrored() {
        let delete: Vec<_> = TargetTable::delete_order().collect();
        assert_eq!(
            delete,
            vec![
                TargetTable::Studies,
                TargetTable::Populations,
                TargetTable::Events,
                TargetTable::Persons
            ]
        );
        assert_eq!(TargetTable::Populations.table(), "eucan_population");
        assert_eq!(TargetTable::Persons.classifier(), "contactID");
    }

    #[test]
    fn duplicate_ids_keep_first_position_and_last_contents() {
        let table = Table::of(
            TargetTable::Persons,
            TableMeta::new("eucan_persons", "id"),
            [record("a", "first"), record("b", "other"), record("a", "second")],
        )
        .expect("table");

        assert_eq!(table.ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(table.get("a").and_then(|r| r.get("name")), Some(&Cell::text("second")));
        assert_eq!(table.records().count(), 2);
    }

    #[test]
    fn records_without_identifier_are_rejected() {
        let mut nameless = TargetRecord::new();
        nameless.insert("name", "no id");

        let err = Table::of(
            TargetTable::Events,
            TableMeta::new("eucan_events", "id"),
            [nameless],
        )
        .expect_err("missing id");

        assert!(matches!(err, EucanError::MissingIdentifier { .. }));
    }

    #[test]
    fn catalogue_data_requires_every_table() {
        let catalogue = Catalogue::new("lc", "Life Cycle", "https://lc.example", "LifeCycle");
        let empty = |kind: TargetTable| {
            Table::of(kind, TableMeta::new(kind.table(), "id"), Vec::new()).expect("empty table")
        };

        let partial = CatalogueData::from_tables(
            catalogue.clone(),
            [empty(TargetTable::Studies), empty(TargetTable::Persons)],
        );
        assert!(partial.is_none());

        let full = CatalogueData::from_tables(
            catalogue,
            TargetTable::IMPORT_ORDER.into_iter().rev().map(empty),
        )
        .expect("all tables");
        let order: Vec<_> = full.import_order().map(Table::kind).collect();
        assert_eq!(order, TargetTable::IMPORT_ORDER.to_vec());
    }
}
