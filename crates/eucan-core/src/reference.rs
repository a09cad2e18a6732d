use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Ordered substitutions applied after lower-casing a reference label.
pub const INVALID_ID_CHARACTERS: [(&str, &str); 5] = [
    (" ", "_"),
    ("-", "_till_"),
    ("/", "_or_"),
    ("+", "Plus"),
    ("<", "before_"),
];

/// Turns a free-text reference label into the identifier stored centrally.
///
/// Pure function of its input: the same label always yields the same id.
pub fn normalize_reference_id(label: &str) -> String {
    INVALID_ID_CHARACTERS
        .iter()
        .fold(label.to_lowercase(), |id, (from, to)| id.replace(from, to))
}

/// The controlled-vocabulary tables of the central catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Biosamples,
    DataSources,
    DatabaseTypes,
    RecruitmentSources,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 4] = [
        ReferenceKind::Biosamples,
        ReferenceKind::DataSources,
        ReferenceKind::DatabaseTypes,
        ReferenceKind::RecruitmentSources,
    ];

    pub fn value(self) -> &'static str {
        match self {
            ReferenceKind::Biosamples => "biosamples",
            ReferenceKind::DataSources => "data_sources",
            ReferenceKind::DatabaseTypes => "database_types",
            ReferenceKind::RecruitmentSources => "recruitment_sources",
        }
    }

    /// Remote entity type holding this vocabulary.
    pub fn table(self) -> String {
        format!("eucan_{}", self.value())
    }

    /// Source-row column whose values refer to this vocabulary.
    pub fn source_column(self) -> &'static str {
        match self {
            ReferenceKind::Biosamples => "events_biosamples_type",
            ReferenceKind::DataSources => "events_datasources_type",
            ReferenceKind::DatabaseTypes => "events_type_administrative_databases",
            ReferenceKind::RecruitmentSources => "population_recruitment_sources",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceValue {
    pub id: String,
    pub label: String,
}

impl ReferenceValue {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Values of one reference kind in discovery order, unique by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceTable {
    values: Vec<ReferenceValue>,
    ids: HashSet<String>,
}

impl ReferenceTable {
    pub fn of(values: impl IntoIterator<Item = ReferenceValue>) -> Self {
        let mut table = Self::default();
        for value in values {
            table.add(value);
        }
        table
    }

    /// Returns false when a value with the same id is already present.
    pub fn add(&mut self, value: ReferenceValue) -> bool {
        if self.ids.contains(&value.id) {
            return false;
        }
        self.ids.insert(value.id.clone());
        self.values.push(value);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn values(&self) -> &[ReferenceValue] {
        &self.values
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// All four reference tables; the single source of truth for "is this value known".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCatalog {
    tables: BTreeMap<ReferenceKind, ReferenceTable>,
}

impl Default for ReferenceCatalog {
    fn default() -> Self {
        Self {
            tables: ReferenceKind::ALL
                .into_iter()
                .map(|kind| (kind, ReferenceTable::default()))
                .collect(),
        }
    }
}

impl ReferenceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(mut self, kind: ReferenceKind, values: impl IntoIterator<Item = ReferenceValue>) -> Self {
        self.set_table(kind, ReferenceTable::of(values));
        self
    }

    pub fn set_table(&mut self, kind: ReferenceKind, table: ReferenceTable) {
        self.tables.insert(kind, table);
    }

    pub fn table(&self, kind: ReferenceKind) -> &ReferenceTable {
        // every kind is seeded in Default and set_table only replaces
        &self.tables[&kind]
    }

    pub fn contains(&self, kind: ReferenceKind, id: &str) -> bool {
        self.table(kind).contains(id)
    }

    pub fn add(&mut self, kind: ReferenceKind, value: ReferenceValue) -> bool {
        self.tables.entry(kind).or_default().add(value)
    }

    pub fn values(&self, kind: ReferenceKind) -> &[ReferenceValue] {
        self.table(kind).values()
    }
}
