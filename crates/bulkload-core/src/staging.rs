//! Source staging
//!
//! Three concerns before a loader ever parses a byte: unwrapping single-entry
//! zip archives, copying sources into a per-job scratch directory (shared
//! network paths lock files under concurrent readers), and opening sources
//! that may be transiently locked by a concurrent writer.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use bulkload_common::{LoadError, Result};

use crate::config::RetryPolicy;
use crate::format;
use crate::notify::JobNotifier;
use crate::table::derive_table_name;

/// Scratch directory names are capped at this many characters.
const SCRATCH_NAME_LIMIT: usize = 60;

/// Open a source file, retrying locked/busy conditions with a fixed backoff.
/// A missing file fails immediately; any other open failure is treated as a
/// transient lock and retried up to the configured attempt count.
pub async fn open_with_retry(
    path: &Path,
    retry: RetryPolicy,
    notifier: &JobNotifier,
) -> Result<File> {
    let attempts = retry.attempts.max(1);
    for attempt in 1..=attempts {
        match File::open(path) {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LoadError::SourceMissing(path.to_path_buf()));
            }
            Err(e) => {
                if attempt == attempts {
                    warn!(path = %path.display(), error = %e, "source still locked, giving up");
                    break;
                }
                notifier.send(format!(
                    "File is locked, waiting {} seconds...",
                    retry.delay_secs
                ));
                sleep(Duration::from_secs(retry.delay_secs)).await;
            }
        }
    }
    Err(LoadError::SourceBusy {
        path: path.to_path_buf(),
        attempts,
    })
}

/// The effective source for one job, plus any scratch state to tear down.
pub struct StagedSource {
    /// Path the loader should read
    pub path: PathBuf,
    scratch: Option<(PathBuf, PathBuf)>,
}

impl StagedSource {
    /// Unwrap zip archives and apply copy-local staging.
    pub fn prepare(
        original: &Path,
        copy_local: bool,
        staging_root: &Path,
        notifier: &JobNotifier,
    ) -> Result<StagedSource> {
        if !original.exists() {
            return Err(LoadError::SourceMissing(original.to_path_buf()));
        }

        let mut source = original.to_path_buf();
        if format::is_zip(&source) {
            source = unzip_single(&source, notifier)?;
        }

        if !copy_local {
            return Ok(StagedSource {
                path: source,
                scratch: None,
            });
        }

        let scratch_dir = staging_root.join(scratch_dir_name(&source));
        fs::create_dir_all(&scratch_dir)?;
        let file_name = source
            .file_name()
            .ok_or_else(|| LoadError::staging(format!("'{}' has no file name", source.display())))?;
        let staged = scratch_dir.join(file_name);

        notifier.send(format!(
            "Copying {} to {} for read/write",
            source.display(),
            staged.display()
        ));
        fs::copy(&source, &staged)?;

        let mut permissions = fs::metadata(&staged)?.permissions();
        if permissions.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(&staged, permissions)?;
        }

        Ok(StagedSource {
            path: staged.clone(),
            scratch: Some((staged, scratch_dir)),
        })
    }

    /// Remove the staged copy and its scratch directory if that leaves it
    /// empty. Runs on success and failure alike; failures here only log.
    pub fn cleanup(&self) {
        if let Some((file, dir)) = &self.scratch {
            debug!(path = %file.display(), "removing staged copy");
            if let Err(e) = fs::remove_file(file) {
                warn!(path = %file.display(), error = %e, "failed to remove staged copy");
            }
            // Only removes an empty directory; shared scratch roots survive.
            let _ = fs::remove_dir(dir);
        }
    }
}

/// Extract the single entry of a zip archive next to the archive itself.
/// Archives with more than one entry are rejected.
pub fn unzip_single(zip_path: &Path, notifier: &JobNotifier) -> Result<PathBuf> {
    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| LoadError::staging(format!("cannot open '{}': {e}", zip_path.display())))?;

    if archive.len() != 1 {
        return Err(LoadError::staging(format!(
            "Expected exactly one file in '{}', found {}",
            zip_path.display(),
            archive.len()
        )));
    }

    let mut entry = archive
        .by_index(0)
        .map_err(|e| LoadError::staging(format!("cannot read '{}': {e}", zip_path.display())))?;
    let entry_name = entry
        .mangled_name()
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| LoadError::staging("zip entry has no file name".to_string()))?;

    let destination = zip_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(entry_name);

    notifier.send(format!("Unzipping {}", destination.display()));
    let mut out = File::create(&destination)?;
    io::copy(&mut entry, &mut out)?;
    Ok(destination)
}

fn scratch_dir_name(path: &Path) -> String {
    let name: String = derive_table_name(path)
        .chars()
        .take(SCRATCH_NAME_LIMIT)
        .collect();
    if name.is_empty() {
        "job".to_string()
    } else {
        name
    }
}
