//! Source format resolution
//!
//! A job's format comes from an explicit override or from the source file's
//! extension. Zip archives are not a format of their own; they are unwrapped
//! by staging before resolution happens.

use std::path::Path;

use bulkload_common::{LoadError, Result};

/// The four loader variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Delimited text (csv, tab, tsv)
    Delimited,
    /// Workbook with one or more worksheets (xlsx, xls)
    Spreadsheet,
    /// Statistical-package binary (sas7bdat)
    StatPackage,
    /// XML document holding a record set
    Markup,
}

/// Extensions accepted in directory mode (zip included; it unwraps to one of
/// the others).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "csv", "tab", "tsv", "xlsx", "xls", "sas7bdat", "sas", "xml", "zip",
];

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Delimited => "delimited",
            SourceFormat::Spreadsheet => "spreadsheet",
            SourceFormat::StatPackage => "stat-package",
            SourceFormat::Markup => "markup",
        }
    }

    /// Map an extension or explicit override token to a format.
    pub fn from_token(token: &str) -> Option<SourceFormat> {
        match token.trim_start_matches('.').to_lowercase().as_str() {
            "csv" | "tab" | "tsv" | "delimited" => Some(SourceFormat::Delimited),
            "xlsx" | "xls" | "spreadsheet" => Some(SourceFormat::Spreadsheet),
            "sas7bdat" | "sas" => Some(SourceFormat::StatPackage),
            "xml" | "markup" => Some(SourceFormat::Markup),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<SourceFormat> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(SourceFormat::from_token)
    }

    /// Resolve from an explicit override first, then the extension.
    pub fn resolve(override_token: Option<&str>, path: &Path) -> Result<SourceFormat> {
        if let Some(token) = override_token {
            return SourceFormat::from_token(token).ok_or_else(|| LoadError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        }
        SourceFormat::from_path(path).ok_or_else(|| LoadError::UnsupportedFormat {
            path: path.to_path_buf(),
        })
    }
}

/// Whether the path is a zip archive that staging must unwrap first.
pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Whether directory mode should pick this file up.
pub fn is_supported_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}
