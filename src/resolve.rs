//! Turns a (prefix, origin, filename) triple into the destination of a log line.
//!
//! The origin directory has to exist already: resolution canonicalizes it, so a deleted origin
//! never reappears as a freshly provisioned tree.

use crate::error::RouteError;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::io;

/// Where a line should end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// directory that must exist before the file can be opened
    pub dir: Utf8PathBuf,
    /// log file inside `dir`
    pub file: Utf8PathBuf,
}

/// Resolves the destination for `origin` below `prefix`.
///
/// An empty origin names the prefix itself, which is how the fallback destination is addressed.
/// Otherwise `subdir` is appended to the canonical origin directory.
pub fn resolve(
    prefix: &Utf8Path,
    origin: &str,
    filename: &str,
    subdir: &Utf8Path,
) -> Result<Destination, RouteError> {
    let dir = if origin.is_empty() {
        prefix.to_owned()
    } else {
        if !is_single_component(origin) {
            return Err(RouteError::Resolve {
                path: prefix.join(origin),
                source: io::Error::new(io::ErrorKind::InvalidInput, "origin is not a plain name"),
            });
        }
        prefix.join(origin)
    };

    let canonical = dir
        .canonicalize_utf8()
        .map_err(|source| RouteError::Resolve { path: dir, source })?;

    let dir = if origin.is_empty() {
        canonical
    } else {
        canonical.join(subdir)
    };
    let file = dir.join(filename);
    Ok(Destination { dir, file })
}

/// `..`, `.` and anything containing a separator would escape the prefix
fn is_single_component(origin: &str) -> bool {
    let mut components = Utf8Path::new(origin).components();
    matches!(
        (components.next(), components.next()),
        (Some(Utf8Component::Normal(name)), None) if name == origin
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::test_util::tempdir;
    use std::fs;

    #[test]
    fn origin_gets_log_subdir() {
        let (_guard, prefix) = tempdir();
        fs::create_dir(prefix.join("example.com")).unwrap();

        let dest = resolve(&prefix, "example.com", "access.log", Utf8Path::new("public/logs")).unwrap();
        assert_eq!(dest.dir, prefix.join("example.com/public/logs"));
        assert_eq!(dest.file, prefix.join("example.com/public/logs/access.log"));
    }

    #[test]
    fn empty_origin_is_the_prefix() {
        let (_guard, prefix) = tempdir();
        let dest = resolve(&prefix, "", "fallback.log", Utf8Path::new("public/logs")).unwrap();
        assert_eq!(dest.dir, prefix);
        assert_eq!(dest.file, prefix.join("fallback.log"));
    }

    #[test]
    fn missing_origin_fails() {
        let (_guard, prefix) = tempdir();
        let err = resolve(&prefix, "ghost.example", "access.log", Utf8Path::new("public/logs"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorClass::Resolution);
        match err {
            RouteError::Resolve { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn symlinked_origin_resolves_to_target() {
        let (_guard, prefix) = tempdir();
        fs::create_dir(prefix.join("example.com")).unwrap();
        std::os::unix::fs::symlink("example.com", prefix.join("example.net")).unwrap();

        let dest = resolve(&prefix, "example.net", "access.log", Utf8Path::new("public/logs")).unwrap();
        assert_eq!(dest.dir, prefix.join("example.com/public/logs"));
    }

    #[test]
    fn traversal_is_rejected() {
        let (_guard, prefix) = tempdir();
        fs::create_dir(prefix.join("inner")).unwrap();
        let inner = prefix.join("inner");
        for origin in ["..", ".", "a/b", "../inner", "/etc"] {
            assert!(
                resolve(&inner, origin, "access.log", Utf8Path::new("public/logs")).is_err(),
                "{origin} resolved"
            );
        }
    }
}
