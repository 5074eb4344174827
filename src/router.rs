//! Delivering lines to their per-origin log file, or to the fallback file when that's not possible
//!
//! A line for `example.com` ends up in `{prefix}/example.com/public/logs/access.log` without the
//! leading host name. Whenever resolving, provisioning, opening or writing that file fails, the
//! whole unmodified line is written to the fallback file instead, never to both. A write that
//! fails halfway is cut back off the file before falling back, as far as the file allows it.

use crate::cache::HandleCache;
use crate::config::{ConfigError, RouterConfig};
use crate::error::RouteError;
use crate::line::LogLine;
use crate::open::{open_secure, FileOwnership};
use crate::provision::DirectoryProvisioner;
use crate::resolve::{resolve, Destination};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::File;
use std::io::{self, ErrorKind, Seek, SeekFrom, Write};
use tracing::{debug, info, warn};

/// Where a line was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Origin(Utf8PathBuf),
    Fallback(Utf8PathBuf),
}

pub struct LogRouter {
    prefix: Utf8PathBuf,
    filename: String,
    log_subdir: Utf8PathBuf,
    fallback_dir: Utf8PathBuf,
    fallback_name: String,
    sync: bool,
    provisioner: DirectoryProvisioner,
    cache: HandleCache,
}

impl LogRouter {
    pub fn new(config: &RouterConfig) -> Result<Self, ConfigError> {
        let (fallback_dir, fallback_name) = config.fallback_parts()?;
        Ok(LogRouter {
            prefix: config.prefix.clone(),
            filename: config.filename.clone(),
            log_subdir: config.log_subdir.clone(),
            fallback_dir: fallback_dir.to_owned(),
            fallback_name: fallback_name.to_owned(),
            sync: config.sync,
            provisioner: DirectoryProvisioner::new(config.min_owner_id),
            cache: HandleCache::new(config.max_handles),
        })
    }

    pub fn route(&mut self, line: &LogLine<'_>) -> Result<Delivery, RouteError> {
        self.deliver(&line.origin, line.residual, line.raw)
    }

    /// Writes `residual` to the log file of `origin`, or `original` to the fallback file.
    ///
    /// An empty origin goes straight to the fallback file. The only error returned is failing to
    /// write the fallback file.
    pub fn deliver(
        &mut self,
        origin: &str,
        residual: &[u8],
        original: &[u8],
    ) -> Result<Delivery, RouteError> {
        if !origin.is_empty() {
            let routed = resolve(&self.prefix, origin, &self.filename, &self.log_subdir)
                .and_then(|dest| self.append(&dest, residual));
            match routed {
                Ok(path) => return Ok(Delivery::Origin(path)),
                Err(err) => debug!(
                    origin,
                    error = %err.chain(),
                    "failed to write to per-origin log file"
                ),
            }
        }

        let dest = resolve(&self.fallback_dir, "", &self.fallback_name, &self.log_subdir)?;
        self.append(&dest, original).map(Delivery::Fallback)
    }

    /// Closes every open log file, the next line for each reopens it
    pub fn reopen(&mut self) -> usize {
        let closed = self.cache.invalidate_all();
        info!(closed, "closed log files for reopening");
        closed
    }

    pub fn shutdown(&mut self) -> usize {
        let closed = self.cache.invalidate_all();
        debug!(closed, "closed log files");
        closed
    }

    pub fn open_handles(&self) -> usize {
        self.cache.len()
    }

    fn append(&mut self, dest: &Destination, text: &[u8]) -> Result<Utf8PathBuf, RouteError> {
        let provisioner = &self.provisioner;
        let sync = self.sync;
        let file = self.cache.get_or_open(&dest.file, || {
            provisioner.provision(&dest.dir)?;
            let ownership = FileOwnership::inherit_from(&dest.dir)?;
            open_secure(&dest.file, ownership, sync)
        })?;

        // one write per line, so concurrent appenders can't interleave within it
        let mut entry = Vec::with_capacity(text.len() + 1);
        entry.extend_from_slice(text);
        entry.push(b'\n');

        let mut written = 0;
        let failed = loop {
            match file.write(&entry[written..]) {
                Ok(0) => break Some(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) if written + n == entry.len() => break None,
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => break Some(err),
            }
        };

        match failed {
            None => Ok(dest.file.clone()),
            Some(source) => {
                if written > 0 {
                    discard_partial(file, &dest.file, written);
                }
                warn!(path = %dest.file, error = %source, "dropping log file after failed write");
                self.cache.remove(&dest.file);
                Err(RouteError::Write {
                    path: dest.file.clone(),
                    source,
                })
            }
        }
    }
}

/// Cuts the last `written` bytes off `file`, so a line is never left half in its log file
fn discard_partial(file: &mut File, path: &Utf8Path, written: usize) {
    let truncated = file
        .seek(SeekFrom::End(0))
        .and_then(|end| file.set_len(end.saturating_sub(written as u64)));
    match truncated {
        Ok(()) => debug!(path = %path, written, "discarded partially written line"),
        Err(err) => warn!(
            path = %path,
            written,
            error = %err,
            "failed to discard partially written line"
        ),
    }
}
