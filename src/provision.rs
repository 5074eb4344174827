//! Creating missing log directories
//!
//! Ownership and permissions are copied from the nearest existing ancestor, never taken from
//! whoever runs the process, which is usually root. Trees whose nearest existing ancestor belongs
//! to a system account are left alone, so a crafted origin name can't plant directories in them.
//!
//! Each directory is created, then `lchown`ed and `chmod`ed by path. Something replacing the new
//! directory between those calls isn't caught; `lchown` at least won't follow a symlink swapped in,
//! but there is no `lchmod` to close the window for the mode.

use crate::error::RouteError;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{self, DirBuilder, Metadata, Permissions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::{lchown, DirBuilderExt, MetadataExt, PermissionsExt};
use tracing::{debug, warn};

/// Owner and mode of the nearest existing ancestor, applied to everything created below it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AncestorOwnership {
    pub uid: u32,
    pub gid: u32,
    /// permission bits including setgid/sticky, no file type bits
    pub mode: u32,
}

impl AncestorOwnership {
    fn of(metadata: &Metadata) -> Self {
        AncestorOwnership {
            uid: metadata.uid(),
            gid: metadata.gid(),
            mode: metadata.mode() & 0o7777,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DirectoryProvisioner {
    min_owner_id: u32,
}

impl DirectoryProvisioner {
    /// `min_owner_id` is the lowest uid and gid an existing ancestor may have
    pub fn new(min_owner_id: u32) -> Self {
        DirectoryProvisioner { min_owner_id }
    }

    /// Makes sure `dir` exists, creating every missing component.
    ///
    /// A no-op when `dir` already is a directory.
    pub fn provision(&self, dir: &Utf8Path) -> Result<(), RouteError> {
        let dir = absolute(dir)?;

        if let Some(metadata) = lstat(&dir)? {
            return if metadata.is_dir() {
                Ok(())
            } else {
                Err(RouteError::Occupied { path: dir })
            };
        }

        // missing directories, leaf first
        let mut chain = vec![dir.clone()];
        let (ancestor, metadata) = loop {
            let parent = match chain.last().and_then(|path| path.parent()) {
                Some(parent) => parent.to_owned(),
                None => {
                    return Err(RouteError::Provision {
                        path: dir,
                        source: io::Error::new(ErrorKind::NotFound, "no existing ancestor"),
                    })
                }
            };
            match lstat(&parent)? {
                Some(metadata) => break (parent, metadata),
                None => chain.push(parent),
            }
        };
        chain.reverse();

        if !metadata.is_dir() {
            return Err(RouteError::Occupied { path: ancestor });
        }

        let ownership = AncestorOwnership::of(&metadata);
        if ownership.uid < self.min_owner_id || ownership.gid < self.min_owner_id {
            warn!(
                path = %ancestor,
                uid = ownership.uid,
                gid = ownership.gid,
                "refusing to create directories owned by a system account"
            );
            return Err(RouteError::SystemOwned {
                path: ancestor,
                uid: ownership.uid,
                gid: ownership.gid,
            });
        }

        for path in chain {
            create_dir(path, ownership)?;
        }
        Ok(())
    }
}

fn create_dir(path: Utf8PathBuf, ownership: AncestorOwnership) -> Result<(), RouteError> {
    match DirBuilder::new().mode(ownership.mode).create(&path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            // someone else got there first, fine as long as it's a directory
            return match lstat(&path)? {
                Some(metadata) if metadata.is_dir() => Ok(()),
                _ => Err(RouteError::Occupied { path }),
            };
        }
        Err(source) => return Err(RouteError::Provision { path, source }),
    }

    debug!(
        path = %path,
        uid = ownership.uid,
        gid = ownership.gid,
        mode = format_args!("{:o}", ownership.mode),
        "created directory"
    );

    lchown(&path, Some(ownership.uid), Some(ownership.gid))
        .and_then(|()| fs::set_permissions(&path, Permissions::from_mode(ownership.mode)))
        .map_err(|source| RouteError::Ownership { path, source })
}

/// `symlink_metadata` with "not found" turned into `None`
fn lstat(path: &Utf8Path) -> Result<Option<Metadata>, RouteError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RouteError::Provision {
            path: path.to_owned(),
            source,
        }),
    }
}

fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, RouteError> {
    if path.is_absolute() {
        return Ok(path.to_owned());
    }
    let cwd = std::env::current_dir()
        .and_then(|cwd| {
            Utf8PathBuf::try_from(cwd)
                .map_err(|err| io::Error::new(ErrorKind::InvalidData, err.to_string()))
        })
        .map_err(|source| RouteError::Resolve {
            path: path.to_owned(),
            source,
        })?;
    Ok(cwd.join(path))
}
