//! Failures that can occur while routing a single line
//!
//! None of these are fatal to the process, the router answers every one of them by redirecting
//! the original line to the fallback destination.

use camino::Utf8PathBuf;
use std::error::Error as _;
use std::fmt;
use std::io;
use thiserror::Error;

/// Coarse classification of a [`RouteError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// origin directory absent or unreadable, or a path occupied by a non-directory
    Resolution,
    /// refusing a system-owned ancestor, or failing to create a directory
    Provisioning,
    /// destination is (or could not be verified not to be) a symlink
    Security,
    /// create, chown or chmod of the destination failed
    Open,
    /// appending to an already open destination failed
    Write,
}

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("cannot resolve `{path}`")]
    Resolve {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("`{path}` is occupied by a non-directory")]
    Occupied { path: Utf8PathBuf },
    #[error("refusing to provision under `{path}` owned by system account {uid}:{gid}")]
    SystemOwned { path: Utf8PathBuf, uid: u32, gid: u32 },
    #[error("cannot create directory `{path}`")]
    Provision {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("refusing to write through symlink `{path}`")]
    Symlink { path: Utf8PathBuf },
    #[error("cannot verify `{path}` after opening it")]
    Verify {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open `{path}`")]
    Open {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot set ownership or mode of `{path}`")]
    Ownership {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot append to `{path}`")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RouteError {
    pub fn kind(&self) -> ErrorClass {
        match self {
            RouteError::Resolve { .. } | RouteError::Occupied { .. } => ErrorClass::Resolution,
            RouteError::SystemOwned { .. } | RouteError::Provision { .. } => {
                ErrorClass::Provisioning
            }
            RouteError::Symlink { .. } | RouteError::Verify { .. } => ErrorClass::Security,
            RouteError::Open { .. } | RouteError::Ownership { .. } => ErrorClass::Open,
            RouteError::Write { .. } => ErrorClass::Write,
        }
    }

    /// path the failure is about
    pub fn path(&self) -> &Utf8PathBuf {
        match self {
            RouteError::Resolve { path, .. }
            | RouteError::Occupied { path }
            | RouteError::SystemOwned { path, .. }
            | RouteError::Provision { path, .. }
            | RouteError::Symlink { path }
            | RouteError::Verify { path, .. }
            | RouteError::Open { path, .. }
            | RouteError::Ownership { path, .. }
            | RouteError::Write { path, .. } => path,
        }
    }

    /// Displays the error followed by its sources, `: ` separated
    pub fn chain(&self) -> Chain<'_> {
        Chain(self)
    }
}

pub struct Chain<'a>(&'a RouteError);

impl fmt::Display for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
