//! Ingestion orchestration engine
//!
//! Turns heterogeneous tabular files (delimited text, spreadsheets,
//! stat-package binaries, XML record sets) into bulk-loaded relational
//! tables.
//!
//! # Architecture
//!
//! - **config**: process-wide default job parameters (BULKLOAD_* variables)
//! - **job**: one file -> table load request
//! - **format**: loader variant resolution from overrides and extensions
//! - **schema**: per-format column discovery and the column allow-list
//! - **rows**: single-pass row streams, including the narrow/wide delimited
//!   decoding strategies
//! - **provider**: collaborator boundary for spreadsheet and stat-package
//!   decoding (a built-in xlsx provider ships; sas7bdat needs a registered
//!   provider)
//! - **table**: destination identity and the create/overwrite/append
//!   lifecycle
//! - **sql**: SQL execution and bulk-transfer capabilities, with the
//!   Postgres implementation
//! - **loader**: the per-job pipeline state machine
//! - **scheduler**: batch classification and two-phase execution
//! - **staging**: zip unwrapping, copy-local scratch space, locked-source
//!   retry
//! - **notify**: the one-way progress event stream

pub mod config;
pub mod format;
pub mod job;
pub mod loader;
pub mod notify;
pub mod provider;
pub mod rows;
pub mod scheduler;
pub mod schema;
pub mod sql;
pub mod staging;
pub mod table;

pub use config::{LoadDefaults, RetryPolicy};
pub use format::SourceFormat;
pub use job::LoadJob;
pub use loader::{LoadState, LoadSummary, Loader};
pub use notify::{NotifyEvent, NotifySink};
pub use provider::ProviderRegistry;
pub use scheduler::{BatchReport, BatchScheduler};
pub use schema::Column;
pub use sql::postgres::{PgTarget, PgTargetFactory};
pub use sql::{SqlTarget, TargetFactory, TransferResult};
pub use table::TableRef;
