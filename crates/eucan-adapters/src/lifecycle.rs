//! LifeCycle cohort registry: GraphQL `Cohorts` query flattened into source rows.

use std::collections::HashMap;

use async_trait::async_trait;
use eucan_core::{Catalogue, CatalogueType, Cell, EucanWarning, Scalar, SourceRow, TargetTable};
use eucan_storage::HttpClientConfig;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};

use crate::{AdapterError, SourceAdapter, SourceData};

pub const COHORTS_QUERY: &str = r#"query {
  Cohorts {
    pid, name, acronym, description, startYear, endYear, website,
    contributors { contact { title { name }, firstName, prefix, surname, email }, contributionType { name } },
    fundingStatement, design { name }, numberOfParticipants, numberOfParticipantsWithSamples,
    supplementaryInformation, dataAccessConditions { name }, dataAccessConditionsDescription,
    designPaper { doi },
    subcohorts { name, description, inclusionCriteria, supplementaryInformation, ageGroups { name, code }, numberOfParticipants },
    collectionEvents { name, description, startYear { name }, endYear { name }, startMonth { code }, endMonth { code },
                       areasOfInformation { name }, dataCategories { name }, sampleCategories { name } }
  }
}"#;

#[derive(Debug, Deserialize)]
struct CohortsResponse {
    data: Option<CohortsData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct CohortsData {
    #[serde(rename = "Cohorts")]
    cohorts: Option<Vec<Cohort>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Named {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Coded {
    pub name: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Doi {
    pub doi: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn iter(&self) -> impl Iterator<Item = &T> {
        match self {
            OneOrMany::One(item) => std::slice::from_ref(item).iter(),
            OneOrMany::Many(items) => items.iter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cohort {
    pub pid: String,
    pub name: Option<String>,
    pub acronym: Option<String>,
    pub description: Option<String>,
    pub start_year: Option<i64>,
    pub end_year: Option<i64>,
    pub website: Option<String>,
    pub contributors: Option<Vec<Contributor>>,
    pub funding_statement: Option<String>,
    pub design: Option<Named>,
    pub number_of_participants: Option<i64>,
    pub number_of_participants_with_samples: Option<i64>,
    pub supplementary_information: Option<String>,
    pub data_access_conditions: Option<Vec<Named>>,
    pub data_access_conditions_description: Option<String>,
    pub design_paper: Option<OneOrMany<Doi>>,
    pub subcohorts: Option<Vec<Subcohort>>,
    pub collection_events: Option<Vec<CollectionEvent>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub contact: Option<Contact>,
    pub contribution_type: Option<Vec<Named>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub title: Option<Named>,
    pub first_name: Option<String>,
    pub prefix: Option<String>,
    pub surname: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subcohort {
    pub name: Option<String>,
    pub description: Option<String>,
    pub inclusion_criteria: Option<String>,
    pub supplementary_information: Option<String>,
    pub age_groups: Option<Vec<Coded>>,
    pub number_of_participants: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEvent {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_year: Option<Named>,
    pub end_year: Option<Named>,
    pub start_month: Option<Coded>,
    pub end_month: Option<Coded>,
    pub areas_of_information: Option<Vec<Named>>,
    pub data_categories: Option<Vec<Named>>,
    pub sample_categories: Option<Vec<Named>>,
}

/// Fetches cohorts from `<catalogue url>/catalogue/graphql`.
#[derive(Debug, Clone)]
pub struct LifeCycleAdapter {
    client: reqwest::Client,
}

impl LifeCycleAdapter {
    pub fn new(config: &HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: config.build_client()?,
        })
    }
}

#[async_trait]
impl SourceAdapter for LifeCycleAdapter {
    fn catalogue_type(&self) -> CatalogueType {
        CatalogueType::LifeCycle
    }

    async fn fetch(&self, catalogue: &Catalogue) -> Result<SourceData, AdapterError> {
        let url = format!("{}/catalogue/graphql", catalogue.url.trim_end_matches('/'));
        let span = info_span!("lifecycle_fetch", catalogue = %catalogue.code, url = %url);

        async move {
            let response = self
                .client
                .post(&url)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(&json!({ "query": COHORTS_QUERY }))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(AdapterError::HttpStatus {
                    status: status.as_u16(),
                    url: url.clone(),
                });
            }

            let body = response.text().await?;
            let cohorts = parse_cohorts_response(&body)?;
            if cohorts.is_empty() {
                return Err(AdapterError::EmptySource(catalogue.description.clone()));
            }
            info!(cohorts = cohorts.len(), "retrieved cohorts");

            Ok::<_, AdapterError>(cohorts_to_rows(catalogue, &cohorts))
        }
        .instrument(span)
        .await
    }
}

pub fn parse_cohorts_response(body: &str) -> Result<Vec<Cohort>, AdapterError> {
    let response: CohortsResponse = serde_json::from_str(body)?;
    let errors = response.errors.unwrap_or_default();

    match response.data.and_then(|data| data.cohorts) {
        Some(cohorts) => Ok(cohorts),
        None if !errors.is_empty() => Err(AdapterError::GraphQl(
            errors
                .into_iter()
                .map(|error| error.message)
                .collect::<Vec<_>>()
                .join("; "),
        )),
        None => Ok(Vec::new()),
    }
}

/// Assigns zero-padded numbers to keys in order of first appearance.
struct GroupIds {
    prefix: String,
    width: usize,
    seen: HashMap<String, usize>,
}

impl GroupIds {
    fn new(prefix: String, width: usize) -> Self {
        Self {
            prefix,
            width,
            seen: HashMap::new(),
        }
    }

    fn id(&mut self, key: String) -> String {
        let next = self.seen.len();
        let number = *self.seen.entry(key).or_insert(next);
        format!("{}{:0width$}", self.prefix, number, width = self.width)
    }
}

/// Per-study list columns, deduplicated in first-appearance order.
#[derive(Default)]
struct StudyLists {
    principal_investigators: Vec<String>,
    contacts: Vec<String>,
    events: Vec<String>,
    populations: Vec<String>,
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

fn text(value: &Option<String>) -> Option<Cell> {
    value.as_deref().map(Cell::text)
}

fn integer(value: Option<i64>) -> Option<Cell> {
    value.map(Cell::from)
}

fn names<'a>(items: impl IntoIterator<Item = &'a Named>) -> Vec<String> {
    items.into_iter().filter_map(|item| item.name.clone()).collect()
}

fn list(values: &[String]) -> Option<Cell> {
    (!values.is_empty()).then(|| Cell::List(values.iter().cloned().map(Scalar::Text).collect()))
}

fn digits(mut value: usize) -> usize {
    let mut count = 1;
    while value >= 10 {
        value /= 10;
        count += 1;
    }
    count
}

fn acronym_name(acronym: Option<&str>, name: &str) -> String {
    match acronym {
        Some(acronym) => format!("{acronym} - {name}"),
        None => name.to_string(),
    }
}

/// Flattens cohorts into one row per contributor/event/subcohort position.
///
/// The zero-pad width of person, event and population ids follows the number
/// of flattened rows. Ids written by an importer that sized the padding
/// differently are re-keyed on the first run, and the old ids are reported as
/// vanished.
pub fn cohorts_to_rows(catalogue: &Catalogue, cohorts: &[Cohort]) -> SourceData {
    let row_count: usize = cohorts.iter().map(row_span).sum();
    let width = digits(row_count) + 1;
    let mut persons = GroupIds::new(catalogue.id_prefix(TargetTable::Persons), width);
    let mut events = GroupIds::new(catalogue.id_prefix(TargetTable::Events), width);
    let mut populations = GroupIds::new(catalogue.id_prefix(TargetTable::Populations), width);
    let mut warnings = Vec::new();
    let mut rows = Vec::with_capacity(row_count);

    for cohort in cohorts {
        let study_id = catalogue.record_identity(TargetTable::Studies, &cohort.pid.replace(' ', "_"));
        let acronym = cohort.acronym.as_deref();
        let contributors = cohort.contributors.as_deref().unwrap_or_default();
        let collection_events = cohort.collection_events.as_deref().unwrap_or_default();
        let subcohorts = cohort.subcohorts.as_deref().unwrap_or_default();
        let mut lists = StudyLists::default();
        let mut study_rows = Vec::new();

        for index in 0..row_span(cohort) {
            let mut row = study_columns(cohort, &study_id);

            if let Some(contributor) = contributors.get(index) {
                match person_columns(contributor, &mut persons, &mut lists) {
                    Some(person) => merge(&mut row, person),
                    None => warnings.push(skipped(catalogue, &study_id, "contributor without e-mail or name")),
                }
            }

            if let Some(event) = collection_events.get(index) {
                match &event.name {
                    Some(name) => {
                        let id = events.id(format!("{study_id}\u{1f}{name}"));
                        push_unique(&mut lists.events, &id);
                        merge(&mut row, event_columns(event, id, acronym_name(acronym, name)));
                    }
                    None => warnings.push(skipped(catalogue, &study_id, "collection event without name")),
                }
            }

            if let Some(subcohort) = subcohorts.get(index) {
                match &subcohort.name {
                    Some(name) => {
                        let id = populations.id(format!("{study_id}\u{1f}{name}"));
                        push_unique(&mut lists.populations, &id);
                        merge(&mut row, population_columns(subcohort, id, acronym_name(acronym, name)));
                    }
                    None => warnings.push(skipped(catalogue, &study_id, "subcohort without name")),
                }
            }

            study_rows.push(row);
        }

        for mut row in study_rows {
            row.set_opt("study_principle_investigators", list(&lists.principal_investigators));
            row.set_opt("study_contacts", list(&lists.contacts));
            row.set_opt("study_data_collection_events", list(&lists.events));
            row.set_opt("study_populations", list(&lists.populations));
            rows.push(row);
        }
    }

    for warning in &warnings {
        warn!(catalogue = %catalogue.code, "{}", warning.message);
    }

    SourceData { rows, warnings }
}

fn row_span(cohort: &Cohort) -> usize {
    [
        cohort.contributors.as_ref().map_or(0, Vec::len),
        cohort.collection_events.as_ref().map_or(0, Vec::len),
        cohort.subcohorts.as_ref().map_or(0, Vec::len),
        1,
    ]
    .into_iter()
    .max()
    .unwrap_or(1)
}

fn skipped(catalogue: &Catalogue, study_id: &str, what: &str) -> EucanWarning {
    EucanWarning::new(format!(
        "{} study {study_id} has a {what}; it is skipped.",
        catalogue.description
    ))
}

fn merge(row: &mut SourceRow, columns: Vec<(&'static str, Option<Cell>)>) {
    for (column, value) in columns {
        row.set_opt(column, value);
    }
}

fn study_columns(cohort: &Cohort, study_id: &str) -> SourceRow {
    let marker_paper = cohort.design_paper.as_ref().and_then(|papers| {
        let dois: Vec<_> = papers.iter().filter_map(|paper| paper.doi.clone()).collect();
        (!dois.is_empty()).then(|| dois.join(", "))
    });
    let access_possible = cohort
        .data_access_conditions
        .as_ref()
        .is_some_and(|conditions| !names(conditions).is_empty());

    let mut row = SourceRow::new().with("study_id", study_id);
    merge(
        &mut row,
        vec![
            ("study_name", text(&cohort.name)),
            ("study_acronym", text(&cohort.acronym)),
            ("study_objectives", text(&cohort.description)),
            ("study_start_year", integer(cohort.start_year)),
            ("study_end_year", integer(cohort.end_year)),
            ("study_website", text(&cohort.website)),
            ("study_funding", text(&cohort.funding_statement)),
            (
                "study_study_design",
                cohort.design.as_ref().and_then(|design| text(&design.name)),
            ),
            ("study_number_of_participants", integer(cohort.number_of_participants)),
            (
                "study_participants_with_biosamples",
                integer(cohort.number_of_participants_with_samples),
            ),
            (
                "study_number_of_participants_supplement",
                text(&cohort.supplementary_information),
            ),
            (
                "study_contact_procedures",
                text(&cohort.data_access_conditions_description),
            ),
            ("study_marker_paper", marker_paper.map(Cell::text)),
            ("study_access_possibility", access_possible.then_some(Cell::from(true))),
        ],
    );
    row
}

fn person_columns(
    contributor: &Contributor,
    persons: &mut GroupIds,
    lists: &mut StudyLists,
) -> Option<Vec<(&'static str, Option<Cell>)>> {
    let contact = contributor.contact.as_ref()?;
    let key = contact.email.clone().or_else(|| {
        contact
            .first_name
            .as_ref()
            .zip(contact.surname.as_ref())
            .map(|(first, last)| format!("{first}{last}"))
    })?;
    let id = persons.id(key);

    let types = names(contributor.contribution_type.iter().flatten()).join(" ");
    let principal_investigator = types.contains("Principal Investigator");
    if principal_investigator {
        push_unique(&mut lists.principal_investigators, &id);
    }
    if types.contains("Contact person") || !principal_investigator {
        push_unique(&mut lists.contacts, &id);
    }

    let last_name = contact.surname.as_ref().map(|surname| {
        format!("{} {surname}", contact.prefix.as_deref().unwrap_or_default())
            .trim_start()
            .to_string()
    });

    Some(vec![
        ("persons_id", Some(Cell::text(id))),
        (
            "persons_title",
            contact.title.as_ref().and_then(|title| text(&title.name)),
        ),
        ("persons_first_name", text(&contact.first_name)),
        ("persons_email", text(&contact.email)),
        ("persons_last_name", last_name.map(Cell::text)),
    ])
}

fn event_columns(
    event: &CollectionEvent,
    id: String,
    name: String,
) -> Vec<(&'static str, Option<Cell>)> {
    let year = |named: &Option<Named>| named.as_ref().and_then(|n| n.name.clone());
    let month = |coded: &Option<Coded>| coded.as_ref().and_then(|c| c.code.clone());

    let start_end_year = year(&event.start_year)
        .map(|start| format!("{start}-{}", year(&event.end_year).unwrap_or_default()));
    let start_end_month = month(&event.start_month)
        .map(|start| format!("{start}-{}", month(&event.end_month).unwrap_or_default()));

    vec![
        ("events_id", Some(Cell::text(id))),
        ("events_name", Some(Cell::text(name))),
        ("events_description", text(&event.description)),
        ("events_start_end_year", start_end_year.map(Cell::text)),
        ("events_start_end_month", start_end_month.map(Cell::text)),
        (
            "events_type_administrative_databases",
            list(&names(event.areas_of_information.iter().flatten())),
        ),
        (
            "events_biosamples_type",
            list(&names(event.sample_categories.iter().flatten())),
        ),
        (
            "events_datasources_type",
            list(&names(event.data_categories.iter().flatten())),
        ),
    ]
}

fn population_columns(
    subcohort: &Subcohort,
    id: String,
    name: String,
) -> Vec<(&'static str, Option<Cell>)> {
    let age_groups: Vec<String> = subcohort
        .age_groups
        .iter()
        .flatten()
        .filter_map(|group| group.code.clone())
        .collect();

    vec![
        ("population_id", Some(Cell::text(id))),
        ("population_name", Some(Cell::text(name))),
        ("population_description", text(&subcohort.description)),
        (
            "population_selection_criteria_supplement",
            text(&subcohort.inclusion_criteria),
        ),
        (
            "population_number_of_participants",
            integer(subcohort.number_of_participants),
        ),
        (
            "population_recruitment_sources_supplement",
            text(&subcohort.supplementary_information),
        ),
        ("population_recruitment_sources", list(&age_groups)),
    ]
}
