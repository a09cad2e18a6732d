use std::collections::{BTreeSet, HashSet};

use eucan_core::{
    CatalogueData, EucanError, EucanWarning, ReferenceCatalog, ReferenceKind, Table,
};
use eucan_storage::{
    reference_id, rsql_value, to_rows, Query, RemoteStore, Row, DEFAULT_ADD_BATCH_SIZE,
    READ_BATCH_SIZE,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::builder::SOURCE_CATALOGUE_ATTRIBUTE;
use crate::printer::Reporter;

/// Writes built catalogue data and new reference values to the central store.
///
/// Every request is awaited before the next one is sent.
pub struct SyncEngine<'a> {
    store: &'a dyn RemoteStore,
    batch_size: usize,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a dyn RemoteStore) -> Self {
        Self {
            store,
            batch_size: DEFAULT_ADD_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Replaces everything the catalogue owns centrally with `data`.
    ///
    /// Deletes run in delete order before any insert. The first failing
    /// request aborts the rest; warnings gathered so far stay in `warnings`.
    pub async fn sync(
        &self,
        data: &CatalogueData,
        reporter: &mut dyn Reporter,
        warnings: &mut Vec<EucanWarning>,
    ) -> Result<(), EucanError> {
        reporter.indent();
        let result = self.replace(data, reporter, warnings).await;
        reporter.dedent();
        result
    }

    async fn replace(
        &self,
        data: &CatalogueData,
        reporter: &mut dyn Reporter,
        warnings: &mut Vec<EucanWarning>,
    ) -> Result<(), EucanError> {
        let catalogue = &data.catalogue;

        for table in data.delete_order() {
            let remote_ids = self.owned_ids(table, &catalogue.code).await?;
            for id in remote_ids.iter().filter(|id| !table.contains(id)) {
                let warning = EucanWarning::new(format!(
                    "This {} {} ID {id} is not in the source catalogue anymore.",
                    catalogue.description,
                    table.entity_type_id()
                ));
                reporter.print_warning(&warning);
                warnings.push(warning);
            }

            if remote_ids.is_empty() {
                continue;
            }
            let ids: Vec<String> = remote_ids.into_iter().collect();
            reporter.print(&format!("Deleting {} rows in {}", ids.len(), table.entity_type_id()));
            self.store
                .delete_list(table.entity_type_id(), &ids)
                .await
                .map_err(|err| EucanError::delete_rows(table.entity_type_id(), err))?;
        }

        for table in data.import_order() {
            if table.is_empty() {
                continue;
            }
            reporter.print(&format!("Importing {} rows in {}", table.len(), table.entity_type_id()));
            let rows = to_rows(table.records())
                .map_err(|err| EucanError::import_rows(table.entity_type_id(), err))?;
            self.store
                .add_batched(table.entity_type_id(), &rows, self.batch_size)
                .await
                .map_err(|err| EucanError::import_rows(table.entity_type_id(), err))?;
        }

        info!(catalogue = %catalogue.code, "catalogue synchronized");
        Ok(())
    }

    /// Ids in `table` whose provenance tag is `code`.
    async fn owned_ids(&self, table: &Table, code: &str) -> Result<BTreeSet<String>, EucanError> {
        let id_attribute = &table.meta().id_attribute;
        let query = Query::all()
            .filter(format!("{SOURCE_CATALOGUE_ATTRIBUTE}=={}", rsql_value(code)))
            .attributes(format!("{id_attribute},{SOURCE_CATALOGUE_ATTRIBUTE}"))
            .batch_size(READ_BATCH_SIZE);
        let rows = self
            .store
            .get(table.entity_type_id(), &query)
            .await
            .map_err(|err| EucanError::fetch_rows(table.entity_type_id(), err))?;

        let ids: BTreeSet<String> = rows
            .iter()
            .filter(|row| {
                row.get(SOURCE_CATALOGUE_ATTRIBUTE)
                    .and_then(reference_id)
                    .is_some_and(|owner| owner == code)
            })
            .filter_map(|row| row.get(id_attribute).and_then(reference_id))
            .collect();
        debug!(table = table.entity_type_id(), ids = ids.len(), "fetched owned ids");
        Ok(ids)
    }

    /// Adds catalog values that the central reference tables do not have yet.
    pub async fn import_reference_data(
        &self,
        catalog: &ReferenceCatalog,
        reporter: &mut dyn Reporter,
    ) -> Result<(), EucanError> {
        reporter.indent();
        let result = self.push_reference_data(catalog, reporter).await;
        reporter.dedent();
        result
    }

    async fn push_reference_data(
        &self,
        catalog: &ReferenceCatalog,
        reporter: &mut dyn Reporter,
    ) -> Result<(), EucanError> {
        for kind in ReferenceKind::ALL {
            let table = kind.table();
            let meta = self
                .store
                .get_meta(&table)
                .await
                .map_err(|err| EucanError::metadata(table.as_str(), err))?;
            let existing: HashSet<String> = self
                .store
                .get(
                    &table,
                    &Query::all()
                        .attributes(meta.id_attribute.as_str())
                        .batch_size(READ_BATCH_SIZE),
                )
                .await
                .map_err(|err| EucanError::fetch_rows(table.as_str(), err))?
                .iter()
                .filter_map(|row| row.get(&meta.id_attribute).and_then(reference_id))
                .collect();

            let rows: Vec<Row> = catalog
                .values(kind)
                .iter()
                .filter(|value| !existing.contains(&value.id))
                .map(|value| {
                    let mut row = Row::new();
                    row.insert(meta.id_attribute.clone(), Value::String(value.id.clone()));
                    row.insert("label".to_string(), Value::String(value.label.clone()));
                    row
                })
                .collect();

            if rows.is_empty() {
                reporter.print(&format!("No new data needs to be imported in {table}"));
                continue;
            }
            reporter.print(&format!("{} new row(s) will be imported in {table}", rows.len()));
            self.store
                .add_batched(&table, &rows, self.batch_size)
                .await
                .map_err(|err| EucanError::import_rows(table.as_str(), err))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use eucan_core::{Catalogue, ReferenceValue, TableMeta, TargetRecord, TargetTable};
    use eucan_storage::{InMemoryStore, StoreCall, StoreOperation};
    use serde_json::json;

    use super::*;
    use crate::printer::{Printer, SharedBuffer};

    fn rows(value: Value) -> Vec<Row> {
        serde_json::from_value(value).expect("rows")
    }

    fn catalogue() -> Catalogue {
        Catalogue::new("Test", "Test", "https://test.nl", "LifeCycle")
    }

    fn table(kind: TargetTable, ids: &[&str]) -> Table {
        let records = ids.iter().map(|id| {
            let mut record = TargetRecord::new();
            record.insert("id", *id);
            record.insert(SOURCE_CATALOGUE_ATTRIBUTE, "Test");
            record
        });
        Table::of(kind, TableMeta::new(kind.table(), "id"), records).expect("table")
    }

    fn data(persons: &[&str]) -> CatalogueData {
        CatalogueData::new(
            catalogue(),
            table(TargetTable::Persons, persons),
            table(TargetTable::Events, &[]),
            table(TargetTable::Populations, &[]),
            table(TargetTable::Studies, &[]),
        )
    }

    fn printer() -> (Printer, SharedBuffer) {
        let buffer = SharedBuffer::new();
        (Printer::new(Box::new(buffer.clone())), buffer)
    }

    #[tokio::test]
    async fn vanished_records_warn_and_the_owned_set_is_replaced() {
        let store = InMemoryStore::new().with_table(
            "eucan_persons",
            rows(json!([
                {"id": "person_id", "source_catalogue": "Test"},
                {"id": "person_deleted_id", "source_catalogue": {"id": "Test"}},
                {"id": "other_person", "source_catalogue": "Other"}
            ])),
        );
        let (mut printer, buffer) = printer();
        let mut warnings = Vec::new();

        SyncEngine::new(&store)
            .sync(&data(&["person_id"]), &mut printer, &mut warnings)
            .await
            .expect("sync");

        assert_eq!(
            warnings,
            vec![EucanWarning::new(
                "This Test eucan_persons ID person_deleted_id is not in the source catalogue anymore."
            )]
        );
        assert_eq!(store.ids("eucan_persons"), vec!["other_person", "person_id"]);

        let mutations: Vec<StoreCall> = store
            .calls()
            .into_iter()
            .filter(|call| call.operation != StoreOperation::Get)
            .collect();
        assert_eq!(
            mutations,
            vec![
                StoreCall {
                    operation: StoreOperation::Delete,
                    entity_type_id: "eucan_persons".to_string(),
                    rows: 2,
                },
                StoreCall {
                    operation: StoreOperation::Add,
                    entity_type_id: "eucan_persons".to_string(),
                    rows: 1,
                },
            ]
        );

        let output = buffer.contents();
        assert!(output.contains("    Deleting 2 rows in eucan_persons\n"));
        assert!(output.contains("    Importing 1 rows in eucan_persons\n"));
    }

    #[tokio::test]
    async fn custom_identity_attributes_drive_warnings_and_deletes() {
        let meta = TableMeta::new("eucan_persons", "person_key");
        let store = InMemoryStore::new().with_meta(meta.clone()).with_table(
            "eucan_persons",
            rows(json!([
                {"person_key": "kept", "source_catalogue": "Test"},
                {"person_key": "gone", "source_catalogue": "Test"},
                {"person_key": "foreign", "source_catalogue": "Other"}
            ])),
        );
        let record = |key: &str| {
            let mut record = TargetRecord::new();
            record.insert("person_key", key);
            record.insert(SOURCE_CATALOGUE_ATTRIBUTE, "Test");
            record
        };
        let persons = Table::of(TargetTable::Persons, meta, [record("kept"), record("new")]).expect("table");
        let data = CatalogueData::new(
            catalogue(),
            persons,
            table(TargetTable::Events, &[]),
            table(TargetTable::Populations, &[]),
            table(TargetTable::Studies, &[]),
        );
        let (mut printer, _) = printer();
        let mut warnings = Vec::new();

        SyncEngine::new(&store)
            .sync(&data, &mut printer, &mut warnings)
            .await
            .expect("sync");

        assert_eq!(
            warnings,
            vec![EucanWarning::new("This Test eucan_persons ID gone is not in the source catalogue anymore.")]
        );
        assert_eq!(store.ids("eucan_persons"), vec!["foreign", "kept", "new"]);
        let delete = store
            .calls()
            .into_iter()
            .find(|call| call.operation == StoreOperation::Delete)
            .expect("delete");
        assert_eq!(delete.rows, 2);
    }

    #[tokio::test]
    async fn catalogue_codes_with_reserved_characters_still_match() {
        let store = InMemoryStore::new().with_table(
            "eucan_persons",
            rows(json!([
                {"id": "mine", "source_catalogue": "EU (v2), pilot"},
                {"id": "theirs", "source_catalogue": "EU"}
            ])),
        );
        let mut data = data(&[]);
        data.catalogue = Catalogue::new("EU (v2), pilot", "Pilot", "https://eu.nl", "LifeCycle");
        let (mut printer, _) = printer();
        let mut warnings = Vec::new();

        SyncEngine::new(&store)
            .sync(&data, &mut printer, &mut warnings)
            .await
            .expect("sync");

        assert_eq!(warnings.len(), 1);
        assert_eq!(store.ids("eucan_persons"), vec!["theirs"]);
    }

    #[tokio::test]
    async fn provenance_reads_follow_delete_order() {
        let store = InMemoryStore::new();
        let (mut printer, _) = printer();

        SyncEngine::new(&store)
            .sync(&data(&["a"]), &mut printer, &mut Vec::new())
            .await
            .expect("sync");

        let reads: Vec<String> = store
            .calls()
            .into_iter()
            .filter(|call| call.operation == StoreOperation::Get)
            .map(|call| call.entity_type_id)
            .collect();
        assert_eq!(reads, vec!["eucan_study", "eucan_population", "eucan_events", "eucan_persons"]);
    }

    #[tokio::test]
    async fn failing_delete_stops_before_any_insert() {
        let store = InMemoryStore::new().with_table(
            "eucan_events",
            rows(json!([{"id": "gone", "source_catalogue": "Test"}])),
        );
        store.fail_on(StoreOperation::Delete, "eucan_events");
        let (mut printer, _) = printer();
        let mut warnings = Vec::new();

        let err = SyncEngine::new(&store)
            .sync(&data(&["a"]), &mut printer, &mut warnings)
            .await
            .expect_err("delete fails");

        assert_eq!(err.to_string(), "Error deleting existing rows from eucan_events");
        assert_eq!(warnings.len(), 1);
        assert!(store.calls().iter().all(|call| call.operation != StoreOperation::Add));
        assert!(store.calls().iter().all(|call| call.entity_type_id != "eucan_persons"));
    }

    #[tokio::test]
    async fn inserts_are_chunked_by_batch_size() {
        let store = InMemoryStore::new();
        let ids: Vec<String> = (0..5).map(|i| format!("p{i}")).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (mut printer, _) = printer();

        SyncEngine::new(&store)
            .with_batch_size(2)
            .sync(&data(&ids), &mut printer, &mut Vec::new())
            .await
            .expect("sync");

        let adds: Vec<usize> = store
            .calls()
            .into_iter()
            .filter(|call| call.operation == StoreOperation::Add)
            .map(|call| call.rows)
            .collect();
        assert_eq!(adds, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn only_unknown_reference_values_are_pushed() {
        let store = InMemoryStore::new()
            .with_table("eucan_biosamples", rows(json!([{"id": "blood", "label": "Blood"}])));
        let catalog = ReferenceCatalog::new().with_values(
            ReferenceKind::Biosamples,
            [ReferenceValue::new("blood", "Blood"), ReferenceValue::new("urine", "Urine")],
        );
        let (mut printer, buffer) = printer();

        SyncEngine::new(&store)
            .import_reference_data(&catalog, &mut printer)
            .await
            .expect("push");

        assert_eq!(store.ids("eucan_biosamples"), vec!["blood", "urine"]);
        assert_eq!(store.rows("eucan_biosamples")[1]["label"], json!("Urine"));
        assert_eq!(
            buffer.contents(),
            "    1 new row(s) will be imported in eucan_biosamples\n\
             \x20   No new data needs to be imported in eucan_data_sources\n\
             \x20   No new data needs to be imported in eucan_database_types\n\
             \x20   No new data needs to be imported in eucan_recruitment_sources\n"
        );

        store.clear_calls();
        let (mut again, _) = self::printer();
        SyncEngine::new(&store)
            .import_reference_data(&catalog, &mut again)
            .await
            .expect("second push");
        assert!(store.calls().iter().all(|call| call.operation != StoreOperation::Add));
    }
}
