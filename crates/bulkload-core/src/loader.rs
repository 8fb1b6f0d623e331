//! Per-job load pipeline
//!
//! One [`Loader`] drives one job through `Created -> SchemaDiscovered ->
//! TableEnsured -> Transferring -> Normalized -> Done`, with `Failed`
//! reachable from every step. Side effects are strictly destination schema
//! mutation, destination data mutation and notification emission; the source
//! is read-only apart from column-definition caching.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use bulkload_common::Result;

use crate::config::RetryPolicy;
use crate::format::SourceFormat;
use crate::job::LoadJob;
use crate::notify::{JobNotifier, NotifySink};
use crate::provider::ProviderRegistry;
use crate::rows::{self, RowAdapter, RowSource, VecRows};
use crate::schema::{self, apply_column_filter, Column};
use crate::sql::{SqlTarget, TransferOptions, TransferResult};
use crate::staging::StagedSource;
use crate::table::{ensure_table, TableRef};

/// Pipeline position of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Created,
    SchemaDiscovered,
    TableEnsured,
    Transferring,
    Normalized,
    Done,
    Failed,
}

/// Result of loading one destination table (spreadsheets may produce several
/// per job).
#[derive(Debug, Clone)]
pub struct TableLoadOutcome {
    pub table: TableRef,
    pub rows_written: u64,
    pub result: TransferResult,
}

/// Everything a job produced, reported back to the scheduler.
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub source_path: PathBuf,
    pub tables: Vec<TableLoadOutcome>,
}

impl LoadSummary {
    pub fn rows_loaded(&self) -> i64 {
        self.tables.iter().map(|t| t.result.rows_loaded()).sum()
    }
}

/// Filtered destination schema plus what the transfer step needs to align
/// raw rows to it.
struct TablePlan {
    columns: Vec<Column>,
    keep: Option<Vec<usize>>,
    before: i64,
}

pub struct Loader {
    job: LoadJob,
    target: Arc<dyn SqlTarget>,
    providers: ProviderRegistry,
    sink: NotifySink,
    retry: RetryPolicy,
    staging_dir: PathBuf,
    state: LoadState,
}

impl Loader {
    pub fn new(
        job: LoadJob,
        target: Arc<dyn SqlTarget>,
        providers: ProviderRegistry,
        sink: NotifySink,
        retry: RetryPolicy,
        staging_dir: PathBuf,
    ) -> Self {
        Self {
            job,
            target,
            providers,
            sink,
            retry,
            staging_dir,
            state: LoadState::Created,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Run the job to completion. The staged copy (if any) is removed whether
    /// the job succeeds or fails.
    pub async fn run(mut self) -> Result<LoadSummary> {
        let notifier = JobNotifier::new(
            self.sink.clone(),
            self.job.target_ref().qualified(),
            &self.job.source_path,
        );
        if self.job.target_table.as_deref().unwrap_or("").is_empty() {
            notifier.send(format!(
                "No target table specified -- using derived table name {}",
                self.job.target_ref()
            ));
        }

        let staged = match StagedSource::prepare(
            &self.job.source_path,
            self.job.copy_local,
            &self.staging_dir,
            &notifier,
        ) {
            Ok(staged) => staged,
            Err(e) => {
                self.state = LoadState::Failed;
                return Err(e);
            }
        };

        let source = staged.path.clone();
        let result = self.execute(&source, &notifier).await;
        staged.cleanup();
        self.state = match &result {
            Ok(_) => LoadState::Done,
            Err(_) => LoadState::Failed,
        };
        result
    }

    async fn execute(&mut self, source: &Path, notifier: &JobNotifier) -> Result<LoadSummary> {
        let format = SourceFormat::resolve(self.job.format_override.as_deref(), source)?;
        debug!(
            job_id = %self.job.id,
            source = %source.display(),
            format = format.as_str(),
            comments = %self.job.effective_comments(),
            "starting load"
        );

        match format {
            SourceFormat::Delimited => self.load_delimited(source, notifier).await,
            SourceFormat::Spreadsheet => self.load_spreadsheet(source, notifier).await,
            SourceFormat::StatPackage => self.load_stat_package(source, notifier).await,
            SourceFormat::Markup => self.load_markup(source, notifier).await,
        }
    }

    async fn load_delimited(
        &mut self,
        source: &Path,
        notifier: &JobNotifier,
    ) -> Result<LoadSummary> {
        let discovery =
            schema::delimited::discover(&self.job, source, self.retry, notifier).await?;
        let synthesized_defs = discovery.synthesized_defs.clone();

        let result = self
            .load_delimited_inner(source, discovery.columns, notifier)
            .await;

        // The synthesized artifact is a per-job byproduct; it goes away once
        // the job finishes, successfully or not.
        if let Some(defs) = synthesized_defs {
            let _ = std::fs::remove_file(defs);
        }
        result
    }

    async fn load_delimited_inner(
        &mut self,
        source: &Path,
        discovered: Vec<Column>,
        notifier: &JobNotifier,
    ) -> Result<LoadSummary> {
        let full_width = discovered.len();
        let table = self.job.target_ref();
        let plan = self
            .plan_table(&table, discovered, full_width, notifier)
            .await?;

        let options = rows::delimited::DelimitedOptions {
            delimiter: self.job.delimiter,
            quote: self.job.quote_char,
            escape: self.job.escape_char,
            use_header: self.job.use_header,
            header_rows_to_skip: self.job.header_rows_to_skip,
        };
        let raw =
            rows::delimited::open_rows(source, &options, full_width, self.retry, notifier)
                .await?;
        // Both delimited strategies consume skipped rows and the header
        // themselves; no further skipping here.
        let mut adapted = RowAdapter::new(raw, 0, full_width, plan.keep.clone());

        let outcome = self
            .transfer_and_finish(&table, &plan, &mut adapted, notifier)
            .await?;
        Ok(LoadSummary {
            source_path: self.job.source_path.clone(),
            tables: vec![outcome],
        })
    }

    async fn load_spreadsheet(
        &mut self,
        source: &Path,
        notifier: &JobNotifier,
    ) -> Result<LoadSummary> {
        let mut provider = self.providers.spreadsheet(source)?;
        let targets = schema::spreadsheet::worksheet_targets(&self.job, provider.as_mut())?;

        let mut outcomes = Vec::new();
        for (sheet, table) in targets {
            let sheet_notifier = notifier.for_table(table.qualified());
            sheet_notifier.send(format!("Loading worksheet '{sheet}' into {table}"));

            let discovered = schema::spreadsheet::discover(
                provider.as_mut(),
                &sheet,
                self.job.default_column_width,
            )?;
            let full_width = discovered.len();
            let plan = self
                .plan_table(&table, discovered, full_width, &sheet_notifier)
                .await?;

            // The sheet keeps its header row in the stream for width control;
            // skip it (after any leading junk rows) before data rows flow.
            let skip = self.job.header_rows_to_skip + u32::from(self.job.use_header);
            let raw = provider.rows(&sheet)?;
            let mut adapted = RowAdapter::new(raw, skip, full_width, plan.keep.clone());

            outcomes.push(
                self.transfer_and_finish(&table, &plan, &mut adapted, &sheet_notifier)
                    .await?,
            );
        }

        Ok(LoadSummary {
            source_path: self.job.source_path.clone(),
            tables: outcomes,
        })
    }

    async fn load_stat_package(
        &mut self,
        source: &Path,
        notifier: &JobNotifier,
    ) -> Result<LoadSummary> {
        let mut provider = self.providers.stat_package(source)?;
        let discovered = schema::statpackage::discover(
            provider.as_mut(),
            self.job.default_column_width,
            self.job.header_rows_to_skip,
            notifier,
        )?;
        let full_width = discovered.len();
        let table = self.job.target_ref();
        let plan = self
            .plan_table(&table, discovered, full_width, notifier)
            .await?;

        let raw = provider.rows()?;
        let mut adapted = RowAdapter::new(raw, 0, full_width, plan.keep.clone());

        let outcome = self
            .transfer_and_finish(&table, &plan, &mut adapted, notifier)
            .await?;
        Ok(LoadSummary {
            source_path: self.job.source_path.clone(),
            tables: vec![outcome],
        })
    }

    async fn load_markup(
        &mut self,
        source: &Path,
        notifier: &JobNotifier,
    ) -> Result<LoadSummary> {
        let document = schema::markup::load(source, self.job.default_column_width)?;
        let full_width = document.columns.len();
        let table = self.job.target_ref();
        let plan = self
            .plan_table(&table, document.columns, full_width, notifier)
            .await?;

        let raw: Box<dyn RowSource + Send> = Box::new(VecRows::new(document.rows));
        let mut adapted = RowAdapter::new(raw, 0, full_width, plan.keep.clone());

        let outcome = self
            .transfer_and_finish(&table, &plan, &mut adapted, notifier)
            .await?;
        Ok(LoadSummary {
            source_path: self.job.source_path.clone(),
            tables: vec![outcome],
        })
    }

    /// Filter the discovered schema, ensure the destination, and capture the
    /// pre-transfer row count.
    async fn plan_table(
        &mut self,
        table: &TableRef,
        discovered: Vec<Column>,
        full_width: usize,
        notifier: &JobNotifier,
    ) -> Result<TablePlan> {
        let (mut columns, projection) =
            apply_column_filter(discovered, &self.job.column_filter)?;
        self.state = LoadState::SchemaDiscovered;

        let destination_width = ensure_table(
            self.target.as_ref(),
            table,
            &columns,
            self.job.overwrite,
            self.job.append,
            notifier,
        )
        .await?;
        self.state = LoadState::TableEnsured;

        columns.truncate(destination_width);
        let keep = match projection {
            Some(mut kept) => {
                kept.truncate(destination_width);
                Some(kept)
            }
            None if destination_width < full_width => {
                Some((0..destination_width).collect())
            }
            None => None,
        };

        let before = if self.job.overwrite {
            0
        } else {
            self.target.row_count(table).await?
        };

        Ok(TablePlan {
            columns,
            keep,
            before,
        })
    }

    /// Stream rows into the destination, normalize nulls, and report.
    async fn transfer_and_finish(
        &mut self,
        table: &TableRef,
        plan: &TablePlan,
        rows: &mut (dyn RowSource + Send),
        notifier: &JobNotifier,
    ) -> Result<TableLoadOutcome> {
        self.state = LoadState::Transferring;
        let started_at = Utc::now();

        let options = TransferOptions {
            batch_size: self.job.batch_size,
            timeout_secs: self.job.transfer_timeout_secs,
        };
        let progress_notifier = notifier.clone();
        let progress = move |total: u64| {
            progress_notifier.send(format!("{total} rows loaded"));
        };
        let rows_written = self
            .target
            .write_rows(table, &plan.columns, rows, &options, &progress)
            .await?;

        // "''" marks values that are already empty; nothing to rewrite then.
        if self.job.null_value != "''" {
            notifier.send(format!(
                "Updating null values: '{}' --> NULL",
                self.job.null_value
            ));
            self.target
                .nullify(table, &plan.columns, &self.job.null_value)
                .await?;
        }
        self.state = LoadState::Normalized;

        let finished_at = Utc::now();
        let result = TransferResult {
            row_count_before: plan.before,
            row_count_after: self.target.row_count(table).await?,
            started_at,
            finished_at,
        };

        notifier.send("Finished loading");
        notifier.send(format!("Rows loaded: {}", result.rows_loaded()));
        notifier.send(format!("Rows per second: {:.0}", result.rows_per_second()));

        Ok(TableLoadOutcome {
            table: table.clone(),
            rows_written,
            result,
        })
    }
}
