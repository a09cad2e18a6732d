use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalogue::{Catalogue, CatalogueType};

/// Cause carried by an [`EucanError`]; usually a store or adapter error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A problem that must be reported but does not stop the current catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EucanWarning {
    pub message: String,
}

impl EucanWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EucanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Fatal error for one source catalogue. Other catalogues keep going.
#[derive(Debug, Error)]
pub enum EucanError {
    #[error("Unknown catalogue type {0}")]
    UnknownCatalogueType(String),
    #[error("{} data. No module available yet!", .0.label())]
    AdapterUnavailable(CatalogueType),
    #[error("Error retrieving data of catalogue {catalogue}")]
    SourceFetch {
        catalogue: String,
        #[source]
        source: BoxError,
    },
    #[error("Error getting metadata of {table}")]
    Metadata {
        table: String,
        #[source]
        source: BoxError,
    },
    #[error("Error getting rows from {table}")]
    FetchRows {
        table: String,
        #[source]
        source: BoxError,
    },
    #[error("Error deleting existing rows from {table}")]
    DeleteRows {
        table: String,
        #[source]
        source: BoxError,
    },
    #[error("Error importing rows to {table}")]
    ImportRows {
        table: String,
        #[source]
        source: BoxError,
    },
    #[error("A row in {table} has no value for identifier {id_attribute}")]
    MissingIdentifier { table: String, id_attribute: String },
    #[error("{0}")]
    Message(String),
}

impl EucanError {
    pub fn source_fetch(catalogue: &Catalogue, source: impl Into<BoxError>) -> Self {
        EucanError::SourceFetch {
            catalogue: catalogue.description.clone(),
            source: source.into(),
        }
    }

    pub fn metadata(table: impl Into<String>, source: impl Into<BoxError>) -> Self {
        EucanError::Metadata {
            table: table.into(),
            source: source.into(),
        }
    }

    pub fn fetch_rows(table: impl Into<String>, source: impl Into<BoxError>) -> Self {
        EucanError::FetchRows {
            table: table.into(),
            source: source.into(),
        }
    }

    pub fn delete_rows(table: impl Into<String>, source: impl Into<BoxError>) -> Self {
        EucanError::DeleteRows {
            table: table.into(),
            source: source.into(),
        }
    }

    pub fn import_rows(table: impl Into<String>, source: impl Into<BoxError>) -> Self {
        EucanError::ImportRows {
            table: table.into(),
            source: source.into(),
        }
    }
}

/// Terminal state of one catalogue in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogueOutcome {
    Succeeded,
    SucceededWithWarnings(usize),
    Failed { warnings: usize },
}

/// Errors and warnings per source catalogue, collected over one run.
#[derive(Debug, Default)]
pub struct ErrorReport {
    pub catalogues: Vec<Catalogue>,
    errors: BTreeMap<String, EucanError>,
    warnings: BTreeMap<String, Vec<EucanWarning>>,
}

impl ErrorReport {
    pub fn new(catalogues: Vec<Catalogue>) -> Self {
        Self {
            catalogues,
            ..Self::default()
        }
    }

    pub fn add_error(&mut self, catalogue: &Catalogue, error: EucanError) {
        self.errors.insert(catalogue.code.clone(), error);
    }

    pub fn add_warnings(&mut self, catalogue: &Catalogue, warnings: Vec<EucanWarning>) {
        if warnings.is_empty() {
            return;
        }
        self.warnings
            .entry(catalogue.code.clone())
            .or_default()
            .extend(warnings);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn error(&self, catalogue: &Catalogue) -> Option<&EucanError> {
        self.errors.get(&catalogue.code)
    }

    pub fn warnings(&self, catalogue: &Catalogue) -> &[EucanWarning] {
        self.warnings
            .get(&catalogue.code)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn outcome(&self, catalogue: &Catalogue) -> CatalogueOutcome {
        let warnings = self.warnings(catalogue).len();
        if self.errors.contains_key(&catalogue.code) {
            CatalogueOutcome::Failed { warnings }
        } else if warnings > 0 {
            CatalogueOutcome::SucceededWithWarnings(warnings)
        } else {
            CatalogueOutcome::Succeeded
        }
    }
}
