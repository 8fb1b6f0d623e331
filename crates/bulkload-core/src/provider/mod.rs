//! Format providers
//!
//! Spreadsheet and stat-package sources are decoded by *providers*: external
//! collaborators exposing a uniform capability (a column catalog plus a raw
//! row stream). The engine owns everything around that boundary (worksheet
//! targeting, catalog ordering, header skipping, projection) but never the
//! binary decoding itself.
//!
//! A built-in xlsx provider ships with the engine. No stat-package provider
//! does: decoding sas7bdat is a native-provider concern, so `.sas7bdat`
//! sources require a registered provider and fail with a configuration error
//! otherwise.

pub mod xlsx;

use std::path::Path;
use std::sync::Arc;

use bulkload_common::{LoadError, Result};

use crate::rows::RowSource;

/// One catalog entry as reported by a provider. Widths are advisory;
/// discovery substitutes the configured default. Catalogs may repeat
/// ordinal/name pairs; discovery de-duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderColumn {
    pub ordinal: u32,
    pub name: String,
    pub width: Option<u32>,
    pub nullable: bool,
}

/// Capability of a workbook-shaped source: named worksheets, each with its
/// own catalog and rows. Raw rows include any header row the sheet carries;
/// the engine decides what to skip.
pub trait WorksheetProvider: Send {
    fn worksheet_names(&mut self) -> Result<Vec<String>>;

    fn catalog(&mut self, sheet: &str) -> Result<Vec<ProviderColumn>>;

    fn rows(&mut self, sheet: &str) -> Result<Box<dyn RowSource + Send>>;
}

/// Capability of a stat-package source: one catalog (with provider-reported
/// nullability) and one row stream. There is no header concept.
pub trait StatPackageProvider: Send {
    fn catalog(&mut self) -> Result<Vec<ProviderColumn>>;

    fn rows(&mut self) -> Result<Box<dyn RowSource + Send>>;
}

type WorksheetFactory =
    Arc<dyn Fn(&Path) -> Result<Box<dyn WorksheetProvider>> + Send + Sync>;
type StatPackageFactory =
    Arc<dyn Fn(&Path) -> Result<Box<dyn StatPackageProvider>> + Send + Sync>;

/// Wiring from source files to providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    spreadsheet: Option<WorksheetFactory>,
    stat_package: Option<StatPackageFactory>,
}

impl ProviderRegistry {
    /// The default wiring: xlsx workbooks through the built-in provider,
    /// no stat-package provider.
    pub fn builtin() -> Self {
        Self::default().with_spreadsheet(|path| xlsx::XlsxProvider::open(path))
    }

    pub fn with_spreadsheet(
        mut self,
        factory: impl Fn(&Path) -> Result<Box<dyn WorksheetProvider>> + Send + Sync + 'static,
    ) -> Self {
        self.spreadsheet = Some(Arc::new(factory));
        self
    }

    pub fn with_stat_package(
        mut self,
        factory: impl Fn(&Path) -> Result<Box<dyn StatPackageProvider>> + Send + Sync + 'static,
    ) -> Self {
        self.stat_package = Some(Arc::new(factory));
        self
    }

    pub fn spreadsheet(&self, path: &Path) -> Result<Box<dyn WorksheetProvider>> {
        match &self.spreadsheet {
            Some(factory) => factory(path),
            None => Err(LoadError::config(format!(
                "no spreadsheet provider is registered (source '{}')",
                path.display()
            ))),
        }
    }

    pub fn stat_package(&self, path: &Path) -> Result<Box<dyn StatPackageProvider>> {
        match &self.stat_package {
            Some(factory) => factory(path),
            None => Err(LoadError::config(format!(
                "no stat-package provider is registered (source '{}')",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_no_stat_provider() {
        let registry = ProviderRegistry::builtin();
        let err = registry
            .stat_package(Path::new("trial.sas7bdat"))
            .map(|_| ())
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_registry_rejects_spreadsheets() {
        let registry = ProviderRegistry::default();
        assert!(registry.spreadsheet(Path::new("book.xlsx")).is_err());
    }
}
