use std::collections::{BTreeMap, HashSet};

use eucan_core::{
    Catalogue, CatalogueData, EucanError, SourceRow, Table, TableMeta, TargetRecord, TargetTable,
};
use eucan_storage::RemoteStore;
use tracing::debug;

/// Provenance attribute stamped on every target record.
pub const SOURCE_CATALOGUE_ATTRIBUTE: &str = "source_catalogue";

pub type TableMetas = BTreeMap<TargetTable, TableMeta>;

/// Splits reconciled source rows into the four target tables.
#[derive(Debug, Clone, Default)]
pub struct CatalogueDataBuilder {
    metas: TableMetas,
}

impl CatalogueDataBuilder {
    pub fn new(metas: TableMetas) -> Self {
        Self { metas }
    }

    /// Builder with the identity attributes the central catalogue reports.
    pub async fn fetch(store: &dyn RemoteStore) -> Result<Self, EucanError> {
        let mut metas = TableMetas::new();
        for kind in TargetTable::IMPORT_ORDER {
            let meta = store
                .get_meta(kind.table())
                .await
                .map_err(|err| EucanError::metadata(kind.table(), err))?;
            metas.insert(kind, meta);
        }
        Ok(Self::new(metas))
    }

    pub fn meta(&self, kind: TargetTable) -> TableMeta {
        self.metas
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| TableMeta::new(kind.table(), "id"))
    }

    pub fn build(&self, catalogue: &Catalogue, rows: &[SourceRow]) -> Result<CatalogueData, EucanError> {
        let mut tables = Vec::with_capacity(TargetTable::IMPORT_ORDER.len());
        for kind in TargetTable::IMPORT_ORDER {
            let records = project(kind, catalogue, rows);
            debug!(table = kind.table(), records = records.len(), "built target records");
            tables.push(Table::of(kind, self.meta(kind), records)?);
        }

        CatalogueData::from_tables(catalogue.clone(), tables)
            .ok_or_else(|| EucanError::Message("incomplete target table set".to_string()))
    }
}

fn project(kind: TargetTable, catalogue: &Catalogue, rows: &[SourceRow]) -> Vec<TargetRecord> {
    let prefix = kind.prefix();
    let records = rows.iter().map(|row| {
        row.iter()
            .filter_map(|(column, cell)| {
                let attribute = column.strip_prefix(prefix)?;
                let cell = cell.filter(|cell| !cell.is_missing())?;
                Some((attribute.to_string(), cell.clone()))
            })
            .collect::<TargetRecord>()
    });

    let mut records: Vec<TargetRecord> = last_occurrences(records)
        .into_iter()
        .filter(|record| !record.is_empty())
        .collect();
    for record in &mut records {
        record.insert(SOURCE_CATALOGUE_ATTRIBUTE, catalogue.code.as_str());
    }
    records
}

/// Collapses identical records, keeping the position of the last one.
fn last_occurrences(records: impl DoubleEndedIterator<Item = TargetRecord>) -> Vec<TargetRecord> {
    let mut seen = HashSet::new();
    let mut kept: Vec<TargetRecord> = records
        .rev()
        .filter(|record| match serde_json::to_string(record) {
            Ok(key) => seen.insert(key),
            Err(_) => true,
        })
        .collect();
    kept.reverse();
    kept
}
