// Copyright 2025 sturdy developers. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Result};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use snafu::{ensure, ResultExt};
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempfile::TempDir;

/// The reserved name for in-flight writes. A crash between write and rename
/// leaves at most one stale file with this name, which is removed the next
/// time the datastore opens.
const TMP_NAME: &str = "tuf_tmp";

/// `Datastore` persists metadata files to a local directory. Every write goes
/// through a temp-file-then-rename sequence and is read back and compared
/// against the intended payload before being considered durable.
#[derive(Debug, Clone)]
pub(crate) struct Datastore {
    /// A lock around retrieving the datastore path.
    path_lock: Arc<RwLock<DatastorePath>>,
    /// A lock to treat the system_time function as a critical section.
    time_lock: Arc<RwLock<()>>,
}

impl Datastore {
    pub(crate) fn new(path: Option<PathBuf>) -> Result<Self> {
        let datastore = Self {
            path_lock: Arc::new(RwLock::new(match path {
                None => DatastorePath::TempDir(TempDir::new().context(error::DatastoreInitSnafu)?),
                Some(p) => DatastorePath::Path(p),
            })),
            time_lock: Arc::new(RwLock::new(())),
        };
        datastore.remove_stale_tmp()?;
        Ok(datastore)
    }

    // Because we are not actually changing the underlying data in the lock,
    // we can ignore when a lock is poisoned.

    fn read(&self) -> RwLockReadGuard<'_, DatastorePath> {
        self.path_lock
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DatastorePath> {
        self.path_lock
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The directory backing this datastore.
    pub(crate) fn path(&self) -> PathBuf {
        self.read().path().to_path_buf()
    }

    /// Removes a leftover temp file from an interrupted write, if present.
    fn remove_stale_tmp(&self) -> Result<()> {
        let tmp = self.read().path().join(TMP_NAME);
        match fs::remove_file(&tmp) {
            Ok(()) => {
                debug!("removed stale temp file '{}'", tmp.display());
                Ok(())
            }
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(()),
                _ => Err(err).context(error::DatastoreRemoveSnafu { path: &tmp }),
            },
        }
    }

    /// Get a reader for a file in the datastore, or `None` if it does not
    /// exist.
    pub(crate) fn reader(&self, file: &str) -> Result<Option<impl Read>> {
        let path = self.read().path().join(file);
        match File::open(&path) {
            Ok(file) => Ok(Some(file)),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(None),
                _ => Err(err).context(error::DatastoreOpenSnafu { path: &path }),
            },
        }
    }

    /// Reads a file in the datastore into memory, or `None` if it does not
    /// exist.
    pub(crate) fn bytes(&self, file: &str) -> Result<Option<Vec<u8>>> {
        match self.reader(file)? {
            None => Ok(None),
            Some(mut reader) => {
                let path = self.read().path().join(file);
                let mut data = Vec::new();
                reader
                    .read_to_end(&mut data)
                    .context(error::DatastoreReadSnafu { path })?;
                Ok(Some(data))
            }
        }
    }

    /// Writes raw bytes to a file in the datastore atomically, then reads
    /// them back to confirm the file holds exactly the intended payload.
    pub(crate) fn create_bytes(&self, file: &str, data: &[u8]) -> Result<()> {
        let dir = self.write();
        atomic_write(dir.path(), Path::new(file), data)
    }

    /// Serializes a JSON value to a file in the datastore atomically.
    pub(crate) fn create<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value).context(error::DatastoreSerializeSnafu {
            what: format!("{} in datastore", file),
        })?;
        self.create_bytes(file, &data)
    }

    /// Deletes a file from the datastore.
    pub(crate) fn remove(&self, file: &str) -> Result<()> {
        let path = self.write().path().join(file);
        debug!("removing '{}'", path.display());
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(()),
                _ => Err(err).context(error::DatastoreRemoveSnafu { path: &path }),
            },
        }
    }

    /// Samples the system clock, ensuring it has not stepped backward since
    /// it was last sampled. The result is the reference time for an update
    /// cycle.
    pub(crate) fn system_time(&self) -> Result<DateTime<Utc>> {
        // Treat this function as a critical section. This lock is not used
        // for anything else.
        let lock = self.time_lock.write().unwrap_or_else(PoisonError::into_inner);

        let file = "latest_known_time.json";
        // Load the latest known system time, if it exists
        let poss_latest_known_time = self
            .reader(file)?
            .map(serde_json::from_reader::<_, DateTime<Utc>>);

        // Get 'current' system time
        let sys_time = Utc::now();

        if let Some(Ok(latest_known_time)) = poss_latest_known_time {
            // Make sure the sampled system time did not go back in time
            ensure!(
                sys_time >= latest_known_time,
                error::SystemTimeSteppedBackwardSnafu {
                    sys_time,
                    latest_known_time
                }
            );
        }
        // Store the latest known time
        self.create(file, &sys_time)?;

        drop(lock);
        Ok(sys_time)
    }
}

/// Writes `data` to `dir.join(file)` through a `tuf_tmp` temp file in `dir`,
/// renames it into place, sets permissions to `0644` on Unix, and re-reads
/// the result to confirm it matches the intended payload byte for byte.
/// Parent directories of `file` within `dir` are created as needed.
pub(crate) fn atomic_write(dir: &Path, file: &Path, data: &[u8]) -> Result<()> {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context(error::DirCreateSnafu { path: parent })?;
    }
    let tmp = dir.join(TMP_NAME);
    fs::write(&tmp, data).context(error::FileWriteSnafu { path: &tmp })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644))
            .context(error::FileWriteSnafu { path: &tmp })?;
    }
    fs::rename(&tmp, &path).context(error::FileRenameSnafu {
        from: &tmp,
        to: &path,
    })?;
    let reread = fs::read(&path).context(error::FileReadSnafu { path: &path })?;
    ensure!(reread == data, error::PersistVerifySnafu { path: &path });
    Ok(())
}

/// Because `TempDir` is an RAII object, we need to hold on to it. This
/// private enum allows us to hold either a `TempDir` or a `PathBuf` depending
/// on whether or not the user wants to manage the directory.
#[derive(Debug)]
enum DatastorePath {
    /// Path to a user-managed directory.
    Path(PathBuf),
    /// A `TempDir` that we created on the user's behalf.
    TempDir(TempDir),
}

impl DatastorePath {
    /// Provides convenient access to the underlying filepath.
    fn path(&self) -> &Path {
        match self {
            DatastorePath::Path(p) => p,
            DatastorePath::TempDir(t) => t.path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{atomic_write, Datastore};
    use std::path::Path;

    #[test]
    fn write_read_round_trip() {
        let datastore = Datastore::new(None).unwrap();
        datastore.create_bytes("timestamp.json", b"{}").unwrap();
        assert_eq!(datastore.bytes("timestamp.json").unwrap().unwrap(), b"{}");
        assert!(datastore.bytes("missing.json").unwrap().is_none());
    }

    #[test]
    fn stale_tmp_is_removed_on_open() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("tuf_tmp"), b"leftover").unwrap();
        let _datastore = Datastore::new(Some(dir.path().to_path_buf())).unwrap();
        assert!(!dir.path().join("tuf_tmp").exists());
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = tempfile::TempDir::new().unwrap();
        atomic_write(dir.path(), Path::new("nested/dir/file.bin"), b"abc").unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("nested/dir/file.bin")).unwrap(),
            b"abc"
        );
        assert!(!dir.path().join("tuf_tmp").exists());
    }

    #[test]
    fn system_time_is_monotonic() {
        let datastore = Datastore::new(None).unwrap();
        let first = datastore.system_time().unwrap();
        let second = datastore.system_time().unwrap();
        assert!(second >= first);
    }
}
