use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EucanError;
use crate::table::TargetTable;

/// One external source of cohort and study metadata.
///
/// `code` is the provenance tag written to every record it produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Catalogue {
    pub code: String,
    pub description: String,
    pub url: String,
    pub catalogue_type: String,
}

impl Catalogue {
    pub fn new(
        code: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        catalogue_type: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            url: url.into(),
            catalogue_type: catalogue_type.into(),
        }
    }

    /// `"<description without spaces, lower-cased>:<classifier>:"`
    pub fn id_prefix(&self, table: TargetTable) -> String {
        format!(
            "{}:{}:",
            self.description.to_lowercase().replace(' ', ""),
            table.classifier()
        )
    }

    pub fn record_identity(&self, table: TargetTable, local_id: &str) -> String {
        format!("{}{local_id}", self.id_prefix(table))
    }

    pub fn kind(&self) -> Result<CatalogueType, EucanError> {
        self.catalogue_type.parse()
    }
}

/// Closed set of source catalogue flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CatalogueType {
    LifeCycle,
    Mica,
    BirthCohorts,
}

impl CatalogueType {
    pub fn label(self) -> &'static str {
        match self {
            CatalogueType::LifeCycle => "LifeCycle",
            CatalogueType::Mica => "Mica",
            CatalogueType::BirthCohorts => "Birth cohort",
        }
    }
}

impl FromStr for CatalogueType {
    type Err = EucanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "LifeCycle" => Ok(CatalogueType::LifeCycle),
            "Mica" => Ok(CatalogueType::Mica),
            "BirthCohorts" => Ok(CatalogueType::BirthCohorts),
            other => Err(EucanError::UnknownCatalogueType(other.to_string())),
        }
    }
}

impl fmt::Display for CatalogueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefix_strips_spaces_and_lowercases() {
        let catalogue = Catalogue::new("lc", "Life Cycle", "https://lc.example", "LifeCycle");
        assert_eq!(catalogue.id_prefix(TargetTable::Studies), "lifecycle:studyID:");
        assert_eq!(
            catalogue.record_identity(TargetTable::Events, "01"),
            "lifecycle:eventID:01"
        );
    }

    #[test]
    fn catalogue_types_parse_from_their_remote_names() {
        assert_eq!("LifeCycle".parse::<CatalogueType>().ok(), Some(CatalogueType::LifeCycle));
        assert_eq!("BirthCohorts".parse::<CatalogueType>().ok(), Some(CatalogueType::BirthCohorts));

        let err = "Cohorts".parse::<CatalogueType>().expect_err("unknown type");
        assert_eq!(err.to_string(), "Unknown catalogue type Cohorts");
    }
}
