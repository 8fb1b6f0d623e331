//! Column-definition artifact
//!
//! A small structured text file mapping ordinal position to column name and
//! width. Supplied by the caller when a source's schema is already known;
//! otherwise synthesized during discovery and deleted once the job finishes.
//!
//! ```text
//! [extract.csv]
//! Format=CsvDelimited
//! ColNameHeader=True
//! Col1=id Text Width 1000
//! Col2=name Text Width 1000
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;

use bulkload_common::{LoadError, Result};

use crate::schema::Column;
use crate::table::sanitize_sql_name;

/// Parse a column-definition file into an authoritative column list.
pub fn read(path: &Path) -> Result<Vec<Column>> {
    let contents = fs::read_to_string(path)?;
    let mut columns = Vec::new();

    for line in contents.lines() {
        let Some(value) = column_entry(line) else {
            continue;
        };

        let tokens: Vec<&str> = value.split_whitespace().collect();
        if tokens.len() != 4 {
            return Err(LoadError::ColumnDefs(format!(
                "expected 4 parameters in column definition, found {} ({value})",
                tokens.len()
            )));
        }
        if !tokens[2].eq_ignore_ascii_case("width") {
            return Err(LoadError::ColumnDefs(format!(
                "expected 3rd parameter in column definition to be \"Width\", found {}",
                tokens[2]
            )));
        }

        let max_length = if tokens[3].eq_ignore_ascii_case("max") {
            None
        } else {
            Some(tokens[3].parse::<u32>().map_err(|_| {
                LoadError::ColumnDefs(format!("invalid column width '{}' ({value})", tokens[3]))
            })?)
        };

        columns.push(Column {
            name: tokens[0].to_string(),
            max_length,
            nullable: true,
        });
    }

    if columns.is_empty() {
        return Err(LoadError::ColumnDefs(format!(
            "'{}' contains no column definitions",
            path.display()
        )));
    }

    Ok(columns)
}

/// Write the artifact for downstream reuse. Column names are sanitized the
/// same way DDL sanitizes them, so the artifact round-trips into identical
/// destination schemas.
pub fn write(
    path: &Path,
    source_name: &str,
    delimiter: char,
    use_header: bool,
    columns: &[Column],
) -> Result<()> {
    let mut out = fs::File::create(path)?;
    writeln!(out, "[{source_name}]")?;
    if delimiter == '\t' {
        writeln!(out, "Format=TabDelimited")?;
    } else if delimiter == ',' {
        writeln!(out, "Format=CsvDelimited")?;
    } else {
        writeln!(out, "Format=Delimited({delimiter})")?;
    }
    writeln!(
        out,
        "ColNameHeader={}",
        if use_header { "True" } else { "False" }
    )?;

    for (ordinal, column) in columns.iter().enumerate() {
        let width = match column.max_length {
            Some(w) => w.to_string(),
            None => "Max".to_string(),
        };
        writeln!(
            out,
            "Col{}={} Text Width {}",
            ordinal + 1,
            sanitize_sql_name(&column.name),
            width
        )?;
    }
    Ok(())
}

/// `ColN=<value>` lines, case-insensitively; everything else is banner or
/// header material.
fn column_entry(line: &str) -> Option<&str> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let rest = key
        .strip_prefix("Col")
        .or_else(|| key.strip_prefix("col"))
        .or_else(|| key.strip_prefix("COL"))?;
    if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
        Some(value.trim())
    } else {
        None
    }
}
