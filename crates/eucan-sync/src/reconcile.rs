use std::collections::HashSet;

use eucan_core::{
    normalize_reference_id, Cell, EucanWarning, ReferenceCatalog, ReferenceKind, ReferenceValue,
    Scalar, SourceRow,
};
use tracing::debug;

use crate::printer::Reporter;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Newly registered values in discovery order.
    pub added: Vec<(ReferenceKind, ReferenceValue)>,
    pub warnings: Vec<EucanWarning>,
}

/// Registers unseen reference values and rewrites reference cells to ids.
pub struct ReferenceReconciler;

impl ReferenceReconciler {
    /// Discovery over raw labels runs to completion before any cell is rewritten.
    pub fn reconcile(
        rows: &mut [SourceRow],
        catalog: &mut ReferenceCatalog,
        reporter: &mut dyn Reporter,
    ) -> ReconcileOutcome {
        reporter.indent();
        reporter.print("Check for new reference values");
        let outcome = Self::discover(rows, catalog, reporter);

        reporter.print("Replace reference values by ID");
        for row in rows.iter_mut() {
            for kind in ReferenceKind::ALL {
                if let Some(cell) = row.get_mut(kind.source_column()) {
                    rewrite(cell);
                }
            }
        }
        reporter.dedent();

        debug!(added = outcome.added.len(), "reconciled reference values");
        outcome
    }

    fn discover(
        rows: &[SourceRow],
        catalog: &mut ReferenceCatalog,
        reporter: &mut dyn Reporter,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for kind in ReferenceKind::ALL {
            let column = kind.source_column();
            let mut seen = HashSet::new();
            let mut rejected = HashSet::new();

            for cell in rows.iter().filter_map(|row| row.get(column)) {
                for element in elements(cell) {
                    let Some(label) = element.as_text() else {
                        if rejected.insert(element.to_string()) {
                            outcome.warnings.push(EucanWarning::new(format!(
                                "Reference value {element} in {column} is not text and is left unchanged"
                            )));
                        }
                        continue;
                    };
                    if !seen.insert(label) {
                        continue;
                    }

                    let value = ReferenceValue::new(normalize_reference_id(label), label);
                    if catalog.add(kind, value.clone()) {
                        reporter.print(&format!(
                            "A new reference value ({label}) will be added for {column} in the EUCAN-Connect Catalogue"
                        ));
                        outcome.added.push((kind, value));
                    }
                }
            }
        }

        for warning in &outcome.warnings {
            reporter.print_warning(warning);
        }
        outcome
    }
}

fn elements(cell: &Cell) -> &[Scalar] {
    match cell {
        Cell::List(values) => values,
        Cell::Scalar(value) => std::slice::from_ref(value),
    }
}

fn rewrite(cell: &mut Cell) {
    let values = match cell {
        Cell::List(values) => values.as_mut_slice(),
        Cell::Scalar(value) => std::slice::from_mut(value),
    };
    for value in values {
        if let Scalar::Text(label) = value {
            *label = normalize_reference_id(label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::{Printer, SharedBuffer};

    fn catalog() -> ReferenceCatalog {
        ReferenceCatalog::new()
            .with_values(ReferenceKind::Biosamples, [ReferenceValue::new("blood", "blood")])
            .with_values(
                ReferenceKind::DataSources,
                [
                    ReferenceValue::new("biological_samples", "biological_samples"),
                    ReferenceValue::new("questionnaires", "questionnaires"),
                ],
            )
            .with_values(
                ReferenceKind::DatabaseTypes,
                [ReferenceValue::new("health_databases", "health_databases")],
            )
            .with_values(
                ReferenceKind::RecruitmentSources,
                [ReferenceValue::new("general_population", "general_population")],
            )
    }

    fn rows() -> Vec<SourceRow> {
        vec![
            SourceRow::new()
                .with("events_biosamples_type", Cell::list(["Blood", "Urine"]))
                .with("events_datasources_type", Cell::list(["Biological samples", "Survey Data"]))
                .with("population_recruitment_sources", Cell::list(["80-81"])),
            SourceRow::new()
                .with("events_biosamples_type", Cell::list(["New Biosample", "Urine"]))
                .with("events_type_administrative_databases", Cell::list(["DNA Database"]))
                .with("population_recruitment_sources", Cell::list(["3-4", "Phone call"])),
            SourceRow::new().with("study_id", "no reference columns"),
        ]
    }

    fn reconcile(rows: &mut [SourceRow], catalog: &mut ReferenceCatalog) -> (ReconcileOutcome, String) {
        let buffer = SharedBuffer::new();
        let mut printer = Printer::new(Box::new(buffer.clone()));
        let outcome = ReferenceReconciler::reconcile(rows, catalog, &mut printer);
        (outcome, buffer.contents())
    }

    fn ids(catalog: &ReferenceCatalog, kind: ReferenceKind) -> Vec<&str> {
        catalog.table(kind).ids().collect()
    }

    #[test]
    fn new_values_are_registered_and_rows_rewritten() {
        let mut rows = rows();
        let mut catalog = catalog();
        let (outcome, output) = reconcile(&mut rows, &mut catalog);

        assert_eq!(ids(&catalog, ReferenceKind::Biosamples), vec!["blood", "urine", "new_biosample"]);
        assert_eq!(
            ids(&catalog, ReferenceKind::DataSources),
            vec!["biological_samples", "questionnaires", "survey_data"]
        );
        assert_eq!(
            ids(&catalog, ReferenceKind::DatabaseTypes),
            vec!["health_databases", "dna_database"]
        );
        assert_eq!(
            ids(&catalog, ReferenceKind::RecruitmentSources),
            vec!["general_population", "80_till_81", "3_till_4", "phone_call"]
        );
        assert_eq!(outcome.added.len(), 7);
        assert_eq!(outcome.added[0].1, ReferenceValue::new("urine", "Urine"));
        assert!(outcome.warnings.is_empty());

        assert_eq!(rows[0].get("events_biosamples_type"), Some(&Cell::list(["blood", "urine"])));
        assert_eq!(
            rows[0].get("events_datasources_type"),
            Some(&Cell::list(["biological_samples", "survey_data"]))
        );
        assert_eq!(
            rows[1].get("population_recruitment_sources"),
            Some(&Cell::list(["3_till_4", "phone_call"]))
        );
        assert!(!rows[2].has_column("events_biosamples_type"));

        assert!(output.contains(
            "    A new reference value (Urine) will be added for events_biosamples_type in the EUCAN-Connect Catalogue\n"
        ));
        assert_eq!(output.matches("(Urine)").count(), 1);
        assert!(output.starts_with("    Check for new reference values\n"));
        assert!(output.ends_with("    Replace reference values by ID\n"));
    }

    #[test]
    fn second_pass_registers_nothing() {
        let mut catalog = catalog();
        let mut first = rows();
        reconcile(&mut first, &mut catalog);
        let after_first = catalog.clone();

        let mut second = rows();
        let (outcome, _) = reconcile(&mut second, &mut catalog);

        assert!(outcome.added.is_empty());
        assert_eq!(catalog, after_first);
        assert_eq!(first, second);
    }

    #[test]
    fn rewritten_rows_without_plus_signs_are_stable_under_reconciliation() {
        let mut catalog = catalog();
        let mut rows = rows();
        reconcile(&mut rows, &mut catalog);
        let normalized = rows.clone();

        let (outcome, _) = reconcile(&mut rows, &mut catalog);
        assert!(outcome.added.is_empty());
        assert_eq!(rows, normalized);
    }

    #[test]
    fn plus_ids_are_not_fixed_points_of_normalization() {
        let mut catalog = catalog();
        let mut rows = vec![SourceRow::new().with("population_recruitment_sources", Cell::list(["18+"]))];

        let (first, _) = reconcile(&mut rows, &mut catalog);
        assert_eq!(first.added.len(), 1);
        assert_eq!(rows[0].get("population_recruitment_sources"), Some(&Cell::list(["18Plus"])));

        let (second, _) = reconcile(&mut rows, &mut catalog);
        assert_eq!(second.added, vec![(ReferenceKind::RecruitmentSources, ReferenceValue::new("18plus", "18Plus"))]);
        assert_eq!(rows[0].get("population_recruitment_sources"), Some(&Cell::list(["18plus"])));
    }

    #[test]
    fn non_text_elements_warn_and_stay_untouched() {
        let mut rows = vec![
            SourceRow::new().with(
                "events_biosamples_type",
                Cell::List(vec![Scalar::from("Saliva"), Scalar::from(42_i64)]),
            ),
            SourceRow::new().with("events_biosamples_type", Cell::from(42_i64)),
        ];
        rows[0].set_opt("events_datasources_type", None);
        let mut catalog = catalog();

        let (outcome, output) = reconcile(&mut rows, &mut catalog);

        assert_eq!(outcome.warnings.len(), 1);
        assert!(output.contains("⚠️ Reference value 42 in events_biosamples_type is not text"));
        assert_eq!(
            rows[0].get("events_biosamples_type"),
            Some(&Cell::List(vec![Scalar::from("saliva"), Scalar::from(42_i64)]))
        );
        assert_eq!(rows[1].get("events_biosamples_type"), Some(&Cell::from(42_i64)));
        assert!(rows[0].has_column("events_datasources_type"));
        assert_eq!(rows[0].get("events_datasources_type"), None);
    }
}
