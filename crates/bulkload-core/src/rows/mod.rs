//! Row sources
//!
//! A [`RowSource`] is a lazy, finite, single-pass stream of rows positionally
//! aligned to the discovered column list. Sources are not restartable; a new
//! pass means re-opening the source. [`RowAdapter`] applies the adjustments
//! every loader needs: leading-row skips, width alignment, and the column
//! filter projection.

pub mod delimited;

use bulkload_common::Result;

/// One row: a value (possibly empty) or a true null per column position.
pub type Row = Vec<Option<String>>;

/// Sequential pull-based row stream.
pub trait RowSource: Send {
    /// The next row, or None when the source is exhausted.
    fn next_row(&mut self) -> Result<Option<Row>>;
}

impl RowSource for Box<dyn RowSource + Send> {
    fn next_row(&mut self) -> Result<Option<Row>> {
        (**self).next_row()
    }
}

/// A materialized table exposed as a row stream (markup documents, provider
/// snapshots).
pub struct VecRows {
    rows: std::vec::IntoIter<Row>,
}

impl VecRows {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RowSource for VecRows {
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// Wraps a raw source with the per-job adjustments: skip the first `skip`
/// rows (header rows and any synthetic header), pad or truncate every row to
/// `width`, then project the kept columns when a filter is active.
pub struct RowAdapter {
    inner: Box<dyn RowSource + Send>,
    skip: u32,
    width: usize,
    projection: Option<Vec<usize>>,
    skipped: bool,
}

impl RowAdapter {
    pub fn new(
        inner: Box<dyn RowSource + Send>,
        skip: u32,
        width: usize,
        projection: Option<Vec<usize>>,
    ) -> Self {
        Self {
            inner,
            skip,
            width,
            projection,
            skipped: false,
        }
    }
}

impl RowSource for RowAdapter {
    fn next_row(&mut self) -> Result<Option<Row>> {
        if !self.skipped {
            for _ in 0..self.skip {
                if self.inner.next_row()?.is_none() {
                    break;
                }
            }
            self.skipped = true;
        }

        let Some(mut row) = self.inner.next_row()? else {
            return Ok(None);
        };

        // Missing trailing fields become nulls; extra fields are dropped.
        row.resize(self.width, None);

        if let Some(keep) = &self.projection {
            let mut projected = Vec::with_capacity(keep.len());
            for &index in keep {
                projected.push(row.get(index).cloned().flatten());
            }
            row = projected;
        }

        Ok(Some(row))
    }
}
