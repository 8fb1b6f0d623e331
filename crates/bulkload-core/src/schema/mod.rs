//! Schema discovery
//!
//! Per-format discovery of the destination column list. Every discovered
//! column is widened to generic variable-length text; type refinement is a
//! later, separate concern. The column allow-list is applied here so that
//! the destination schema and the row projection always agree.

pub mod defs_file;
pub mod delimited;
pub mod markup;
pub mod spreadsheet;
pub mod statpackage;

use bulkload_common::{LoadError, Result};

/// One destination column: generic text, sized, nullable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Maximum width; None means unbounded text
    pub max_length: Option<u32>,
    pub nullable: bool,
}

impl Column {
    pub fn text(name: impl Into<String>, max_length: u32) -> Self {
        Self {
            name: name.into(),
            max_length: Some(max_length),
            nullable: true,
        }
    }
}

/// Apply the configured column allow-list to a discovered schema.
///
/// Matching is case-insensitive. Every filter entry must match a discovered
/// column or the whole job fails, naming the unmatched entries. The surviving
/// columns keep their *discovery* order, never the filter order; the returned
/// index list maps them back into full-width rows.
pub fn apply_column_filter(
    columns: Vec<Column>,
    filter: &[String],
) -> Result<(Vec<Column>, Option<Vec<usize>>)> {
    if filter.is_empty() {
        return Ok((columns, None));
    }

    let discovered: Vec<String> = columns.iter().map(|c| c.name.to_lowercase()).collect();
    let unmatched: Vec<String> = filter
        .iter()
        .filter(|f| !discovered.contains(&f.to_lowercase()))
        .cloned()
        .collect();
    if !unmatched.is_empty() {
        return Err(LoadError::UnmatchedFilterColumns(unmatched));
    }

    let wanted: Vec<String> = filter.iter().map(|f| f.to_lowercase()).collect();
    let mut kept_columns = Vec::new();
    let mut kept_indices = Vec::new();
    for (index, column) in columns.into_iter().enumerate() {
        if wanted.contains(&column.name.to_lowercase()) {
            kept_columns.push(column);
            kept_indices.push(index);
        }
    }

    Ok((kept_columns, Some(kept_indices)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<Column> {
        names.iter().map(|n| Column::text(*n, 1000)).collect()
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let (cols, projection) =
            apply_column_filter(columns(&["Id", "Name"]), &[]).unwrap();
        assert_eq!(cols.len(), 2);
        assert!(projection.is_none());
    }

    #[test]
    fn test_filter_keeps_discovery_order_not_filter_order() {
        let filter = vec!["Age".to_string(), "Name".to_string()];
        let (cols, projection) =
            apply_column_filter(columns(&["Id", "Name", "Age", "City"]), &filter).unwrap();
        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Name", "Age"]);
        assert_eq!(projection.unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let filter = vec!["name".to_string(), "AGE".to_string()];
        let (cols, _) =
            apply_column_filter(columns(&["Id", "Name", "Age", "City"]), &filter).unwrap();
        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Name", "Age"]);
    }

    #[test]
    fn test_unmatched_filter_column_fails_naming_offender() {
        let filter = vec!["Name".to_string(), "Zzz".to_string()];
        let err = apply_column_filter(columns(&["Id", "Name", "Age", "City"]), &filter)
            .unwrap_err();
        match err {
            LoadError::UnmatchedFilterColumns(names) => assert_eq!(names, vec!["Zzz"]),
            other => panic!("expected UnmatchedFilterColumns, got {other:?}"),
        }
    }
}
