//! Opening log files for appending without being tricked into writing somewhere else.
//!
//! The file is opened first and its path checked afterwards. Stat-ing the open handle can't tell
//! whether the path was a symlink, so the check is an `lstat` on the path. Swapping a symlink in
//! before the open is caught, either by `O_NOFOLLOW` or by the `lstat`. Swapping one in after the
//! open is harmless, the descriptor keeps pointing at the file that existed at open time. The only
//! window left is between the open and the `lstat`.
//!
//! Ownership and mode are then set through the descriptor, so they can't be redirected either.

use crate::error::RouteError;
use camino::Utf8Path;
use std::fs::{self, File, OpenOptions, Permissions};
use std::os::unix::fs::{fchown, MetadataExt, OpenOptionsExt, PermissionsExt};
use tracing::{debug, warn};

/// Ownership and mode a log file ends up with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileOwnership {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl FileOwnership {
    /// Owner and group of `dir`, with its permission bits minus the execute bits
    pub fn inherit_from(dir: &Utf8Path) -> Result<Self, RouteError> {
        let metadata = fs::symlink_metadata(dir).map_err(|source| RouteError::Provision {
            path: dir.to_owned(),
            source,
        })?;
        Ok(FileOwnership {
            uid: metadata.uid(),
            gid: metadata.gid(),
            mode: metadata.mode() & 0o666,
        })
    }
}

/// Opens `path` for appending, creating it if needed.
///
/// Returns only handles that passed the symlink check and carry `ownership`.
pub fn open_secure(
    path: &Utf8Path,
    ownership: FileOwnership,
    sync: bool,
) -> Result<File, RouteError> {
    let mut flags = libc::O_NOFOLLOW;
    if sync {
        flags |= libc::O_SYNC;
    }

    // owner only until fchmod below
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .custom_flags(flags)
        .open(path)
        .map_err(|source| {
            if source.raw_os_error() == Some(libc::ELOOP) {
                warn!(path = %path, "cowardly refusing to write to symlinked file");
                RouteError::Symlink {
                    path: path.to_owned(),
                }
            } else {
                RouteError::Open {
                    path: path.to_owned(),
                    source,
                }
            }
        })?;

    // check the path, not the handle
    verify_not_symlink(path)?;

    fchown(&file, Some(ownership.uid), Some(ownership.gid))
        .and_then(|()| file.set_permissions(Permissions::from_mode(ownership.mode)))
        .map_err(|source| RouteError::Ownership {
            path: path.to_owned(),
            source,
        })?;

    debug!(
        path = %path,
        uid = ownership.uid,
        gid = ownership.gid,
        mode = format_args!("{:o}", ownership.mode),
        sync,
        "opened log file"
    );
    Ok(file)
}

/// `lstat`s `path`, failing when it is a symlink or can't be examined
fn verify_not_symlink(path: &Utf8Path) -> Result<(), RouteError> {
    let metadata = fs::symlink_metadata(path).map_err(|source| RouteError::Verify {
        path: path.to_owned(),
        source,
    })?;
    if metadata.file_type().is_symlink() {
        warn!(path = %path, "cowardly refusing to write to symlinked file");
        return Err(RouteError::Symlink {
            path: path.to_owned(),
        });
    }
    Ok(())
}
