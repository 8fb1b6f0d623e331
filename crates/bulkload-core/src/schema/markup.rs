//! Markup schema discovery
//!
//! Flattens the first detected record-set of an XML document into an
//! in-memory table: one row per record element, one column per attribute or
//! child element, in first-seen order. The whole document is walked once;
//! the row source re-walks the flattened table.

use std::collections::HashMap;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use bulkload_common::{LoadError, Result};

use crate::rows::Row;
use crate::schema::Column;

/// A flattened record set, shared between discovery and the row source.
#[derive(Debug)]
pub struct MarkupTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

pub fn load(path: &Path, default_width: u32) -> Result<MarkupTable> {
    if !path.exists() {
        return Err(LoadError::SourceMissing(path.to_path_buf()));
    }

    let mut reader = Reader::from_file(path).map_err(xml_err)?;
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    // open-element count; a record element lives at depth 2, its fields at 3
    let mut depth = 0usize;
    let mut record_name: Option<Vec<u8>> = None;

    let mut names: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut rows: Vec<Row> = Vec::new();
    let mut current: Option<Row> = None;
    let mut field: Option<usize> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let element_depth = depth + 1;
                depth += 1;

                if element_depth == 2 {
                    if record_name.is_none() {
                        record_name = Some(e.name().as_ref().to_vec());
                    }
                    if record_name.as_deref() == Some(e.name().as_ref()) {
                        let mut row: Row = Vec::new();
                        collect_attributes(&e, &mut names, &mut index, &mut row)?;
                        current = Some(row);
                    }
                } else if element_depth == 3 && current.is_some() {
                    let key = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let column = intern(&mut names, &mut index, &key);
                    if let Some(row) = current.as_mut() {
                        if column >= row.len() {
                            row.resize(column + 1, None);
                        }
                        row[column] = Some(String::new());
                    }
                    field = Some(column);
                }
            }
            Event::Empty(e) => {
                let element_depth = depth + 1;
                if element_depth == 2 {
                    if record_name.is_none() {
                        record_name = Some(e.name().as_ref().to_vec());
                    }
                    if record_name.as_deref() == Some(e.name().as_ref()) {
                        let mut row: Row = Vec::new();
                        collect_attributes(&e, &mut names, &mut index, &mut row)?;
                        rows.push(row);
                    }
                } else if element_depth == 3 && current.is_some() {
                    let key = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    // register the column; a self-closed field stays null
                    intern(&mut names, &mut index, &key);
                }
            }
            Event::Text(t) => {
                if let (Some(column), Some(row), 3) = (field, current.as_mut(), depth) {
                    let text = t.unescape().map_err(xml_err)?;
                    match row.get_mut(column).and_then(|v| v.as_mut()) {
                        Some(value) => value.push_str(&text),
                        None => {
                            if column >= row.len() {
                                row.resize(column + 1, None);
                            }
                            row[column] = Some(text.into_owned());
                        }
                    }
                }
            }
            Event::CData(t) => {
                if let (Some(column), Some(row), 3) = (field, current.as_mut(), depth) {
                    let text = String::from_utf8_lossy(&t).into_owned();
                    if let Some(slot) = row.get_mut(column) {
                        match slot {
                            Some(value) => value.push_str(&text),
                            None => *slot = Some(text),
                        }
                    }
                }
            }
            Event::End(_) => {
                if depth == 3 {
                    field = None;
                } else if depth == 2 {
                    if let Some(row) = current.take() {
                        rows.push(row);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    // Columns discovered by later records widen earlier rows with nulls.
    for row in &mut rows {
        row.resize(names.len(), None);
    }

    Ok(MarkupTable {
        columns: names
            .into_iter()
            .map(|name| Column::text(name, default_width))
            .collect(),
        rows,
    })
}

fn collect_attributes(
    e: &quick_xml::events::BytesStart<'_>,
    names: &mut Vec<String>,
    index: &mut HashMap<String, usize>,
    row: &mut Row,
) -> Result<()> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| LoadError::provider(format!("XML attribute error: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        let column = intern(names, index, &key);
        if column >= row.len() {
            row.resize(column + 1, None);
        }
        row[column] = Some(value);
    }
    Ok(())
}

fn intern(names: &mut Vec<String>, index: &mut HashMap<String, usize>, key: &str) -> usize {
    if let Some(&existing) = index.get(key) {
        return existing;
    }
    names.push(key.to_string());
    index.insert(key.to_string(), names.len() - 1);
    names.len() - 1
}

fn xml_err(e: quick_xml::Error) -> LoadError {
    LoadError::provider(format!("XML parse error: {e}"))
}
