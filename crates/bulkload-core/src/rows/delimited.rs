//! Delimited row decoding
//!
//! Two independent strategies, routed by discovered column count: the
//! **narrow** strategy rides the external csv provider and is limited to 255
//! columns; the **wide** fallback carries its own header/quote/escape
//! handling for anything wider. Both apply `header_rows_to_skip` before the
//! header row is consumed and honor custom quote and escape characters.

use std::io::BufRead;
use std::path::Path;

use bulkload_common::{LoadError, Result};

use crate::config::RetryPolicy;
use crate::notify::JobNotifier;
use crate::rows::{Row, RowSource};
use crate::staging;

/// The narrow strategy cannot decode more columns than this.
pub const NARROW_COLUMN_LIMIT: usize = 255;

/// Which decoder a delimited source routes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingStrategy {
    Narrow,
    Wide,
}

/// Route by discovered column count.
pub fn select_strategy(column_count: usize) -> DecodingStrategy {
    if column_count <= NARROW_COLUMN_LIMIT {
        DecodingStrategy::Narrow
    } else {
        DecodingStrategy::Wide
    }
}

/// Decoder configuration lifted off the job.
#[derive(Debug, Clone)]
pub struct DelimitedOptions {
    pub delimiter: char,
    pub quote: char,
    pub escape: char,
    pub use_header: bool,
    pub header_rows_to_skip: u32,
}

/// Open the row stream for a delimited source, routing by column count.
pub async fn open_rows(
    path: &Path,
    options: &DelimitedOptions,
    column_count: usize,
    retry: RetryPolicy,
    notifier: &JobNotifier,
) -> Result<Box<dyn RowSource + Send>> {
    let file = staging::open_with_retry(path, retry, notifier).await?;
    let reader = std::io::BufReader::new(file);
    match select_strategy(column_count) {
        DecodingStrategy::Narrow => {
            notifier.send("Starting bulk copy (narrow delimited strategy)");
            Ok(Box::new(NarrowRows::new(reader, options)?))
        }
        DecodingStrategy::Wide => {
            notifier.send("Starting bulk copy (wide delimited strategy)");
            Ok(Box::new(WideRows::new(reader, options)?))
        }
    }
}

fn ascii_byte(c: char, what: &str) -> Result<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(LoadError::config(format!(
            "{what} must be an ASCII character, got '{c}'"
        )))
    }
}

fn skip_lines<R: BufRead>(reader: &mut R, count: u32) -> Result<()> {
    let mut line = String::new();
    for _ in 0..count {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
    }
    Ok(())
}

/// Narrow strategy: the csv provider, at most 255 columns.
pub struct NarrowRows {
    records: csv::StringRecordsIntoIter<Box<dyn BufRead + Send>>,
}

impl NarrowRows {
    pub fn new<R: BufRead + Send + 'static>(
        mut reader: R,
        options: &DelimitedOptions,
    ) -> Result<Self> {
        skip_lines(&mut reader, options.header_rows_to_skip)?;

        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(ascii_byte(options.delimiter, "delimiter")?)
            .quote(ascii_byte(options.quote, "quote character")?)
            .has_headers(options.use_header)
            .flexible(true)
            .trim(csv::Trim::All);
        if options.escape != options.quote {
            builder
                .double_quote(false)
                .escape(Some(ascii_byte(options.escape, "escape character")?));
        }

        let boxed: Box<dyn BufRead + Send> = Box::new(reader);
        Ok(Self {
            records: builder.from_reader(boxed).into_records(),
        })
    }
}

impl RowSource for NarrowRows {
    fn next_row(&mut self) -> Result<Option<Row>> {
        match self.records.next() {
            None => Ok(None),
            Some(Err(e)) => Err(LoadError::provider(format!("CSV decode error: {e}"))),
            Some(Ok(record)) => Ok(Some(
                record.iter().map(|field| Some(field.to_string())).collect(),
            )),
        }
    }
}

/// Wide fallback: in-house decoder with its own quote/escape state machine.
/// Handles any column count; quoted fields may span lines.
pub struct WideRows {
    lines: std::io::Lines<Box<dyn BufRead + Send>>,
    delimiter: char,
    quote: char,
    escape: char,
}

impl WideRows {
    pub fn new<R: BufRead + Send + 'static>(
        mut reader: R,
        options: &DelimitedOptions,
    ) -> Result<Self> {
        let mut skip = options.header_rows_to_skip;
        if options.use_header {
            skip += 1;
        }
        skip_lines(&mut reader, skip)?;

        let boxed: Box<dyn BufRead + Send> = Box::new(reader);
        Ok(Self {
            lines: boxed.lines(),
            delimiter: options.delimiter,
            quote: options.quote,
            escape: options.escape,
        })
    }

    fn parse_record(&mut self, first_line: String) -> Result<Row> {
        let mut fields: Row = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut line = first_line;

        loop {
            let mut chars = line.chars().peekable();
            while let Some(c) = chars.next() {
                if in_quotes {
                    if c == self.escape
                        && self.escape != self.quote
                        && matches!(chars.peek(), Some(&n) if n == self.quote || n == self.escape)
                    {
                        if let Some(escaped) = chars.next() {
                            field.push(escaped);
                        }
                    } else if c == self.quote {
                        if self.escape == self.quote && chars.peek() == Some(&self.quote) {
                            chars.next();
                            field.push(self.quote);
                        } else {
                            in_quotes = false;
                        }
                    } else {
                        field.push(c);
                    }
                } else if c == self.quote && field.trim().is_empty() {
                    in_quotes = true;
                    field.clear();
                } else if c == self.delimiter {
                    fields.push(Some(field.trim().to_string()));
                    field.clear();
                } else {
                    field.push(c);
                }
            }

            if !in_quotes {
                break;
            }
            // Quoted field continues on the next physical line.
            match self.lines.next() {
                Some(next) => {
                    field.push('\n');
                    line = next?;
                }
                None => break,
            }
        }

        fields.push(Some(field.trim().to_string()));
        Ok(fields)
    }
}

impl RowSource for WideRows {
    fn next_row(&mut self) -> Result<Option<Row>> {
        match self.lines.next() {
            None => Ok(None),
            Some(line) => Ok(Some(self.parse_record(line?)?)),
        }
    }
}
