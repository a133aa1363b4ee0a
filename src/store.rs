//! Ordered in-memory watch map with a versioned JSON snapshot on disk.
//!
//! File layout:
//!
//! ```json
//! { "version": 1, "watches": [ { "url": "http://example.com", ... } ] }
//! ```
//!
//! Loading is record-by-record so one stale or corrupt entry never costs the
//! rest of the file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::error::PersistenceError;
use crate::watch::{Watch, WatchStatus, MIN_INTERVAL_SECS};

pub const STORE_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoreFile<'a> {
    version: u32,
    watches: &'a [Watch],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    /// Records that repeated an earlier URL and replaced it.
    pub duplicates: usize,
}

pub struct WatchStore {
    path: PathBuf,
    watches: Vec<Watch>,
    /// In-memory state differs from the last save or load.
    dirty: bool,
    /// The file on disk could not be read; it is moved aside before the
    /// first save so its records are never overwritten.
    unreadable: bool,
}

impl WatchStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            watches: Vec::new(),
            dirty: false,
            unreadable: false,
        }
    }

    /// Creates the store and restores whatever the file holds. A file that
    /// cannot be read at all is logged, left untouched, and the store starts
    /// empty.
    pub fn open(path: PathBuf) -> Self {
        let mut store = Self::new(path);
        match store.load() {
            Ok(report) => info!(
                "Loaded {} watches from {} ({} skipped, {} duplicates)",
                report.loaded,
                store.path.display(),
                report.skipped,
                report.duplicates
            ),
            Err(err) => {
                warn!("Starting with an empty watch list: {err}");
                store.unreadable = store.path.exists();
            }
        }
        store
    }

    /// Where an unreadable file is moved before the store writes its own.
    pub fn quarantine_path(&self) -> PathBuf {
        self.path.with_extension("json.corrupt")
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn get(&self, url: &str) -> Option<&Watch> {
        self.watches.iter().find(|watch| watch.url == url)
    }

    pub fn get_mut(&mut self, url: &str) -> Option<&mut Watch> {
        let watch = self.watches.iter_mut().find(|watch| watch.url == url)?;
        self.dirty = true;
        Some(watch)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.get(url).is_some()
    }

    /// Inserts a new watch or replaces the one with the same URL in place.
    /// Returns `true` when the URL was not present before.
    pub fn upsert(&mut self, watch: Watch) -> bool {
        self.dirty = true;
        match self.get_mut(&watch.url) {
            Some(existing) => {
                *existing = watch;
                false
            }
            None => {
                self.watches.push(watch);
                true
            }
        }
    }

    pub fn delete(&mut self, url: &str) -> Option<Watch> {
        let index = self.watches.iter().position(|watch| watch.url == url)?;
        self.dirty = true;
        Some(self.watches.remove(index))
    }

    /// Insertion order.
    pub fn all(&self) -> &[Watch] {
        &self.watches
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn save(&mut self) -> Result<(), PersistenceError> {
        let file = StoreFile {
            version: STORE_VERSION,
            watches: &self.watches,
        };
        let serialized = serde_json::to_string_pretty(&file).map_err(PersistenceError::Encode)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PersistenceError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        if self.unreadable {
            self.quarantine()?;
        }

        // Write a sibling file first so a crash mid-write never truncates the snapshot.
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized).map_err(|source| PersistenceError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        })?;

        self.dirty = false;
        Ok(())
    }

    /// Saves only when something changed since the last save or load.
    /// Returns whether a write happened.
    pub fn save_if_dirty(&mut self) -> Result<bool, PersistenceError> {
        if !self.dirty {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    fn quarantine(&mut self) -> Result<(), PersistenceError> {
        let target = self.quarantine_path();
        if self.path.exists() {
            fs::rename(&self.path, &target).map_err(|source| PersistenceError::Write {
                path: target.clone(),
                source,
            })?;
            warn!(
                "Moved unreadable {} to {}",
                self.path.display(),
                target.display()
            );
        }
        self.unreadable = false;
        Ok(())
    }

    /// Replaces the in-memory watches with the file contents. A missing file
    /// is an empty store.
    pub fn load(&mut self) -> Result<LoadReport, PersistenceError> {
        if !self.path.exists() {
            self.watches.clear();
            return Ok(LoadReport::default());
        }

        let contents = fs::read_to_string(&self.path).map_err(|source| PersistenceError::Read {
            path: self.path.clone(),
            source,
        })?;
        let root: Value =
            serde_json::from_str(&contents).map_err(|source| PersistenceError::Decode {
                path: self.path.clone(),
                source,
            })?;

        let records = match root {
            Value::Object(mut map) => {
                if let Some(version) = map.get("version").and_then(Value::as_u64) {
                    if version > u64::from(STORE_VERSION) {
                        warn!(
                            "{} was written by a newer schema (version {version}); loading what is readable",
                            self.path.display()
                        );
                    }
                }
                match map.remove("watches") {
                    Some(Value::Array(records)) => records,
                    _ => {
                        warn!("{} has no watch list", self.path.display());
                        Vec::new()
                    }
                }
            }
            // Unversioned files are a bare list of records.
            Value::Array(records) => records,
            _ => {
                warn!("{} does not hold a watch list", self.path.display());
                Vec::new()
            }
        };

        let mut report = LoadReport::default();
        self.watches.clear();
        for (index, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<Watch>(record) {
                Ok(watch) if !watch.url.trim().is_empty() => {
                    if self.upsert(sanitize(watch)) {
                        report.loaded += 1;
                    } else {
                        report.duplicates += 1;
                    }
                }
                Ok(_) => {
                    warn!("Skipping watch record {index}: empty URL");
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!("Skipping watch record {index}: {err}");
                    report.skipped += 1;
                }
            }
        }

        self.dirty = false;
        Ok(report)
    }
}

fn sanitize(mut watch: Watch) -> Watch {
    if watch.status.is_transient() {
        watch.status = WatchStatus::Idle;
    }
    watch.interval_secs = watch.interval_secs.max(MIN_INTERVAL_SECS);
    match (watch.last_changed_at, watch.last_checked_at) {
        (Some(changed), Some(checked)) if changed > checked => {
            watch.last_changed_at = Some(checked);
        }
        // A change is always observed by a check.
        (Some(changed), None) => watch.last_checked_at = Some(changed),
        _ => {}
    }
    watch
}
