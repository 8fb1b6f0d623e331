//! Built-in xlsx worksheet provider
//!
//! Reads the workbook catalog and worksheet rows straight out of the xlsx
//! zip container (workbook.xml, its relationships, sharedStrings.xml and the
//! per-sheet XML). Cells are surfaced as raw text; typing is the engine's
//! concern, not the provider's. Sheets are materialized per call, so each
//! `rows()` pass is an independent single-pass stream.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use bulkload_common::{LoadError, Result};

use crate::provider::{ProviderColumn, WorksheetProvider};
use crate::rows::{Row, RowSource, VecRows};

pub struct XlsxProvider {
    path: PathBuf,
}

impl XlsxProvider {
    /// Open a workbook, verifying the container and catalog up front.
    pub fn open(path: &Path) -> Result<Box<dyn WorksheetProvider>> {
        let provider = XlsxProvider {
            path: path.to_path_buf(),
        };
        provider.sheets()?;
        Ok(Box::new(provider))
    }

    fn archive(&self) -> Result<zip::ZipArchive<File>> {
        if !self.path.exists() {
            return Err(LoadError::SourceMissing(self.path.clone()));
        }
        let file = File::open(&self.path)?;
        zip::ZipArchive::new(file).map_err(|e| {
            LoadError::provider(format!(
                "'{}' is not a readable workbook: {e}",
                self.path.display()
            ))
        })
    }

    fn entry_string(
        &self,
        archive: &mut zip::ZipArchive<File>,
        name: &str,
    ) -> Result<Option<String>> {
        match archive.by_name(name) {
            Ok(mut entry) => {
                let mut contents = String::new();
                entry.read_to_string(&mut contents)?;
                Ok(Some(contents))
            }
            Err(zip::result::ZipError::FileNotFound) => Ok(None),
            Err(e) => Err(LoadError::provider(format!(
                "cannot read '{name}' from '{}': {e}",
                self.path.display()
            ))),
        }
    }

    /// Worksheet (name, relationship id) pairs in document order.
    fn sheets(&self) -> Result<Vec<(String, String)>> {
        let mut archive = self.archive()?;
        let workbook = self
            .entry_string(&mut archive, "xl/workbook.xml")?
            .ok_or_else(|| {
                LoadError::provider(format!(
                    "'{}' has no workbook catalog",
                    self.path.display()
                ))
            })?;

        let mut reader = Reader::from_str(&workbook);
        let mut sheets = Vec::new();
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                    let mut name = None;
                    let mut rel_id = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(attr_err)?;
                        let key = attr.key.as_ref();
                        if key == b"name" {
                            name = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
                        } else if key == b"r:id" || key == b"id" {
                            rel_id = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
                        }
                    }
                    if let (Some(name), Some(rel_id)) = (name, rel_id) {
                        sheets.push((name, rel_id));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if sheets.is_empty() {
            return Err(LoadError::provider(format!(
                "'{}' contains no worksheets",
                self.path.display()
            )));
        }
        Ok(sheets)
    }

    /// Relationship id -> archive path for every worksheet part.
    fn relationship_targets(&self) -> Result<HashMap<String, String>> {
        let mut archive = self.archive()?;
        let rels = self
            .entry_string(&mut archive, "xl/_rels/workbook.xml.rels")?
            .unwrap_or_default();

        let mut targets = HashMap::new();
        let mut reader = Reader::from_str(&rels);
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) | Event::Empty(e)
                    if e.local_name().as_ref() == b"Relationship" =>
                {
                    let mut id = None;
                    let mut target = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(attr_err)?;
                        match attr.key.as_ref() {
                            b"Id" => {
                                id = Some(attr.unescape_value().map_err(xml_err)?.into_owned())
                            }
                            b"Target" => {
                                target =
                                    Some(attr.unescape_value().map_err(xml_err)?.into_owned())
                            }
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(target)) = (id, target) {
                        targets.insert(id, normalize_target(&target));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(targets)
    }

    fn sheet_entry(&self, sheet: &str) -> Result<String> {
        let rel_id = self
            .sheets()?
            .into_iter()
            .find(|(name, _)| name == sheet)
            .map(|(_, rel_id)| rel_id)
            .ok_or_else(|| {
                LoadError::provider(format!(
                    "worksheet '{sheet}' not found in '{}'",
                    self.path.display()
                ))
            })?;
        self.relationship_targets()?
            .remove(&rel_id)
            .ok_or_else(|| {
                LoadError::provider(format!("worksheet '{sheet}' has no part in the workbook"))
            })
    }

    fn shared_strings(&self, archive: &mut zip::ZipArchive<File>) -> Result<Vec<String>> {
        let Some(contents) = self.entry_string(archive, "xl/sharedStrings.xml")? else {
            return Ok(Vec::new());
        };

        let mut reader = Reader::from_str(&contents);
        let mut strings = Vec::new();
        let mut current = String::new();
        let mut in_text = false;
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) if e.local_name().as_ref() == b"si" => current.clear(),
                Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
                Event::End(e) if e.local_name().as_ref() == b"t" => in_text = false,
                Event::Text(t) if in_text => {
                    current.push_str(&t.unescape().map_err(xml_err)?)
                }
                Event::End(e) if e.local_name().as_ref() == b"si" => {
                    strings.push(std::mem::take(&mut current))
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(strings)
    }

    /// Materialize every row of a worksheet, header row included, with gaps
    /// filled by nulls so positions line up.
    fn read_sheet(&self, sheet: &str) -> Result<Vec<Row>> {
        let entry = self.sheet_entry(sheet)?;
        let mut archive = self.archive()?;
        let shared = self.shared_strings(&mut archive)?;
        let contents = self.entry_string(&mut archive, &entry)?.ok_or_else(|| {
            LoadError::provider(format!("worksheet part '{entry}' is missing"))
        })?;

        let mut reader = Reader::from_str(&contents);
        let mut rows: Vec<Row> = Vec::new();
        let mut row: Row = Vec::new();
        let mut cell_type = String::new();
        let mut cell_column: Option<usize> = None;
        let mut cell_value: Option<String> = None;
        let mut in_value = false;
        let mut in_inline_text = false;

        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                    // Omitted blank rows still occupy a position.
                    if let Some(number) = row_number(&e)? {
                        while rows.len() + 1 < number {
                            rows.push(Vec::new());
                        }
                    }
                    row = Vec::new();
                }
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                    cell_type.clear();
                    cell_column = None;
                    cell_value = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(attr_err)?;
                        match attr.key.as_ref() {
                            b"r" => {
                                let reference =
                                    attr.unescape_value().map_err(xml_err)?.into_owned();
                                cell_column = column_index(&reference);
                            }
                            b"t" => {
                                cell_type =
                                    attr.unescape_value().map_err(xml_err)?.into_owned()
                            }
                            _ => {}
                        }
                    }
                }
                Event::Start(e) if e.local_name().as_ref() == b"v" => in_value = true,
                Event::End(e) if e.local_name().as_ref() == b"v" => in_value = false,
                Event::Start(e) if e.local_name().as_ref() == b"t" => in_inline_text = true,
                Event::End(e) if e.local_name().as_ref() == b"t" => in_inline_text = false,
                Event::Text(t) if in_value || in_inline_text => {
                    let text = t.unescape().map_err(xml_err)?;
                    match &mut cell_value {
                        Some(existing) => existing.push_str(&text),
                        None => cell_value = Some(text.into_owned()),
                    }
                }
                Event::End(e) if e.local_name().as_ref() == b"c" => {
                    let value = resolve_cell(&cell_type, cell_value.take(), &shared);
                    let column = cell_column.unwrap_or(row.len());
                    if column >= row.len() {
                        row.resize(column + 1, None);
                    }
                    row[column] = value;
                }
                Event::End(e) if e.local_name().as_ref() == b"row" => {
                    rows.push(std::mem::take(&mut row));
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(rows)
    }
}

impl WorksheetProvider for XlsxProvider {
    fn worksheet_names(&mut self) -> Result<Vec<String>> {
        Ok(self.sheets()?.into_iter().map(|(name, _)| name).collect())
    }

    fn catalog(&mut self, sheet: &str) -> Result<Vec<ProviderColumn>> {
        let rows = self.read_sheet(sheet)?;
        let header = rows.first().ok_or_else(|| {
            LoadError::provider(format!("worksheet '{sheet}' is empty"))
        })?;

        Ok(header
            .iter()
            .enumerate()
            .map(|(ordinal, cell)| ProviderColumn {
                ordinal: ordinal as u32,
                name: match cell.as_deref().map(str::trim) {
                    Some(name) if !name.is_empty() => name.to_string(),
                    _ => format!("F{}", ordinal + 1),
                },
                width: None,
                nullable: true,
            })
            .collect())
    }

    fn rows(&mut self, sheet: &str) -> Result<Box<dyn RowSource + Send>> {
        Ok(Box::new(VecRows::new(self.read_sheet(sheet)?)))
    }
}

fn normalize_target(target: &str) -> String {
    let trimmed = target.trim_start_matches('/');
    if trimmed.starts_with("xl/") {
        trimmed.to_string()
    } else {
        format!("xl/{trimmed}")
    }
}

fn row_number(e: &BytesStart<'_>) -> Result<Option<usize>> {
    for attr in e.attributes() {
        let attr = attr.map_err(attr_err)?;
        if attr.key.as_ref() == b"r" {
            let raw = attr.unescape_value().map_err(xml_err)?;
            return Ok(raw.parse().ok());
        }
    }
    Ok(None)
}

/// "BC12" -> zero-based column index 54.
fn column_index(reference: &str) -> Option<usize> {
    let letters: String = reference
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for c in letters.chars() {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(index - 1)
}

fn resolve_cell(cell_type: &str, raw: Option<String>, shared: &[String]) -> Option<String> {
    let raw = raw?;
    if cell_type == "s" {
        let index: usize = raw.trim().parse().ok()?;
        shared.get(index).cloned()
    } else {
        Some(raw)
    }
}

fn xml_err(e: quick_xml::Error) -> LoadError {
    LoadError::provider(format!("workbook XML error: {e}"))
}

fn attr_err(e: quick_xml::events::attributes::AttrError) -> LoadError {
    LoadError::provider(format!("workbook XML attribute error: {e}"))
}
