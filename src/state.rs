//! Problem markers: one sentinel file per alerted check.
//!
//! A marker exists iff its check most recently failed and that failure has
//! been reported. Creation uses `O_CREAT | O_EXCL` and removal uses unlink,
//! so two processes racing on the same name never both see a fresh create.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

/// `ENOSPC` on Linux and macOS.
const ENOSPC: i32 = 28;

/// Error type for marker operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// The name cannot be used as a single file name.
    #[error("invalid marker name: {0:?}")]
    InvalidName(String),
    /// Any unexpected filesystem failure.
    #[error("marker I/O failed for {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Result of attempting to create a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerCreate {
    /// The marker did not exist and now does.
    Created,
    /// The marker was already present; the problem was already reported.
    AlreadyExists,
    /// Storage is full; the marker could not be durably recorded.
    StorageExhausted,
}

/// Result of attempting to remove a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerRemove {
    /// The marker existed and was removed.
    Removed,
    /// There was no marker to remove.
    NotPresent,
}

/// An outstanding problem marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerInfo {
    /// Check name.
    pub name: String,
    /// When the problem was first reported, if recorded.
    pub since: Option<DateTime<Utc>>,
}

/// Whether `name` can be used verbatim as a marker file name.
pub fn is_valid_marker_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Directory of problem markers.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    /// Open the store at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StateError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the markers.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn marker_path(&self, name: &str) -> Result<PathBuf, StateError> {
        if !is_valid_marker_name(name) {
            return Err(StateError::InvalidName(name.to_owned()));
        }
        Ok(self.dir.join(name))
    }

    /// Create the marker for `name` if it does not already exist.
    ///
    /// The marker receives the detection time as content. Once the exclusive
    /// create succeeds the result is `Created`, even if that write fails.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid name or a failed create other than
    /// "already exists" and "no space left".
    pub fn create(&self, name: &str) -> Result<MarkerCreate, StateError> {
        let path = self.marker_path(name)?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }

        let mut file = match options.open(&path) {
            Ok(file) => file,
            Err(e) => {
                return classify_create_error(e).map_err(|source| StateError::Io { path, source })
            }
        };
        Ok(stamp(&path, &mut file))
    }

    /// Remove the marker for `name` if present.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid name or any I/O failure other than
    /// "not found".
    pub fn remove(&self, name: &str) -> Result<MarkerRemove, StateError> {
        let path = self.marker_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(MarkerRemove::Removed),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(MarkerRemove::NotPresent),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }

    /// Whether a marker exists for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid name.
    pub fn exists(&self, name: &str) -> Result<bool, StateError> {
        Ok(self.marker_path(name)?.is_file())
    }

    /// All outstanding markers, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list(&self) -> Result<Vec<MarkerInfo>, StateError> {
        let io_err = |source| StateError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut markers = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if !entry.file_type().map_err(io_err)?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let since = fs::read_to_string(entry.path())
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                .map(|t| t.with_timezone(&Utc));
            markers.push(MarkerInfo { name, since });
        }

        markers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(markers)
    }
}

/// Map a failed exclusive create onto its marker outcome.
///
/// "Already exists" means the problem was reported before; "no space left"
/// means the alert goes out without a durable record.
///
/// # Errors
///
/// Hands back any other error unchanged.
pub fn classify_create_error(err: io::Error) -> Result<MarkerCreate, io::Error> {
    if err.kind() == io::ErrorKind::AlreadyExists {
        Ok(MarkerCreate::AlreadyExists)
    } else if is_storage_full(&err) {
        Ok(MarkerCreate::StorageExhausted)
    } else {
        Err(err)
    }
}

/// Write the detection time into a marker that was just created.
///
/// The file already exists at this point and is the dedup record, so a
/// failed write only loses the timestamp.
fn stamp(path: &Path, file: &mut impl Write) -> MarkerCreate {
    if let Err(e) = file.write_all(Utc::now().to_rfc3339().as_bytes()) {
        warn!(
            path = %path.display(),
            error = %e,
            "marker created but its timestamp could not be written"
        );
    }
    MarkerCreate::Created
}

fn is_storage_full(err: &io::Error) -> bool {
    err.raw_os_error() == Some(ENOSPC)
}
