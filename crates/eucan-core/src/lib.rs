//! Core domain model for the EUCAN-Connect catalogue importer.

pub mod catalogue;
pub mod error;
pub mod reference;
pub mod row;
pub mod table;

pub use catalogue::{Catalogue, CatalogueType};
pub use error::{BoxError, CatalogueOutcome, ErrorReport, EucanError, EucanWarning};
pub use reference::{
    normalize_reference_id, ReferenceCatalog, ReferenceKind, ReferenceTable, ReferenceValue,
    INVALID_ID_CHARACTERS,
};
pub use row::{Cell, Scalar, SourceRow};
pub use table::{CatalogueData, Table, TableMeta, TargetRecord, TargetTable};

pub const CRATE_NAME: &str = "eucan-core";
