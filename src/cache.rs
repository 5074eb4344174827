//! Open log files, keyed by path
//!
//! Opening a file costs a provisioning pass, an open, an `lstat`, an `fchown` and an `fchmod`, so
//! handles are kept around. The number kept is bounded: when a new file has to be opened and the
//! cache is full, every handle is closed and the cache starts over.

use crate::error::RouteError;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::hash_map::{Entry, HashMap};
use std::fs::File;
use tracing::debug;

pub struct HandleCache {
    handles: HashMap<Utf8PathBuf, File>,
    max_handles: usize,
}

impl HandleCache {
    pub fn new(max_handles: usize) -> Self {
        HandleCache {
            handles: HashMap::new(),
            max_handles: max_handles.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns the cached handle for `path`, calling `open` on a miss.
    ///
    /// A miss on a full cache closes everything before `open` runs. A failed `open` leaves no
    /// entry behind.
    pub fn get_or_open<F>(&mut self, path: &Utf8Path, open: F) -> Result<&mut File, RouteError>
    where
        F: FnOnce() -> Result<File, RouteError>,
    {
        if !self.handles.contains_key(path) && self.handles.len() >= self.max_handles {
            debug!(
                open = self.handles.len(),
                max = self.max_handles,
                "too many open log files"
            );
            self.invalidate_all();
        }

        match self.handles.entry(path.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(open()?)),
        }
    }

    /// Drops a single handle, e.g. after a failed write
    pub fn remove(&mut self, path: &Utf8Path) -> bool {
        self.handles.remove(path).is_some()
    }

    /// Closes every handle, returns how many were open
    pub fn invalidate_all(&mut self) -> usize {
        let closed = self.handles.len();
        for (path, file) in self.handles.drain() {
            debug!(path = %path, "closing log file");
            drop(file);
        }
        closed
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, path: &Utf8Path) -> bool {
        self.handles.contains_key(path)
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, path: Utf8PathBuf, file: File) {
        self.handles.insert(path, file);
    }
}
