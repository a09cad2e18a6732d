use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single scalar cell value as it travels through the importer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Floats that fail reflexive equality carry no information.
    pub fn is_missing(&self) -> bool {
        matches!(self, Scalar::Float(value) if value.is_nan())
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Integer(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Non-null content of a cell: a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    List(Vec<Scalar>),
    Scalar(Scalar),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Scalar(Scalar::Text(value.into()))
    }

    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scalar>,
    {
        Cell::List(values.into_iter().map(Into::into).collect())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Scalar(scalar) => scalar.as_text(),
            Cell::List(_) => None,
        }
    }

    /// An empty list or a NaN float is treated the same as an absent value.
    pub fn is_missing(&self) -> bool {
        match self {
            Cell::List(values) => values.is_empty(),
            Cell::Scalar(scalar) => scalar.is_missing(),
        }
    }
}

macro_rules! cell_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Cell {
                fn from(value: $ty) -> Self {
                    Cell::Scalar(value.into())
                }
            }
        )*
    };
}

cell_from_scalar!(&str, String, i64, f64, bool);

impl From<Scalar> for Cell {
    fn from(value: Scalar) -> Self {
        Cell::Scalar(value)
    }
}

impl From<Vec<Scalar>> for Cell {
    fn from(values: Vec<Scalar>) -> Self {
        Cell::List(values)
    }
}

/// Flattened intermediate row produced by a source adapter.
///
/// Column names carry a target-table prefix (`study_`, `persons_`, `events_`,
/// `population_`). A column can be present with a null value, which is
/// different from the column not being part of the row at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRow {
    cells: BTreeMap<String, Option<Cell>>,
}

impl SourceRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Cell>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Cell>) {
        self.cells.insert(column.into(), Some(value.into()));
    }

    pub fn set_opt(&mut self, column: impl Into<String>, value: Option<Cell>) {
        self.cells.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells.get(column).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Cell> {
        self.cells.get_mut(column).and_then(Option::as_mut)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Cell>)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_deserialize_untagged() {
        let row: SourceRow = serde_json::from_str(
            r#"{"study_id":"lc:studyID:A","study_start_year":2021,"events_biosamples_type":["Blood"],"persons_email":null}"#,
        )
        .expect("row");

        assert_eq!(row.get("study_id"), Some(&Cell::text("lc:studyID:A")));
        assert_eq!(row.get("study_start_year"), Some(&Cell::from(2021_i64)));
        assert_eq!(row.get("events_biosamples_type"), Some(&Cell::list(["Blood"])));
        assert!(row.has_column("persons_email"));
        assert_eq!(row.get("persons_email"), None);
    }

    #[test]
    fn empty_lists_and_nan_count_as_missing() {
        assert!(Cell::List(Vec::new()).is_missing());
        assert!(Cell::from(f64::NAN).is_missing());
        assert!(!Cell::from(0.0).is_missing());
        assert!(!Cell::text("").is_missing());
    }
}
