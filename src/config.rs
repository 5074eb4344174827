use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::{fs, io};
use thiserror::Error;
use tracing::warn;

mod default {
    use camino::Utf8PathBuf;

    pub fn prefix() -> Utf8PathBuf {
        Utf8PathBuf::from("/srv")
    }

    pub fn fallback() -> Utf8PathBuf {
        Utf8PathBuf::from("/var/log/apache2/zz-mass-hosting.log")
    }

    pub fn filename() -> String {
        "access.log".to_owned()
    }

    pub fn max_handles() -> usize {
        50
    }

    pub fn min_owner_id() -> u32 {
        1000
    }

    pub fn log_subdir() -> Utf8PathBuf {
        Utf8PathBuf::from("public/logs")
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration file `{path}`")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration")]
    Parse(#[from] toml::de::Error),
    #[error("fallback destination `{0}` has no file name")]
    Fallback(Utf8PathBuf),
}

/// Compatibility ownership override
///
/// Recorded and reported, but ownership is always inherited from the destination directory.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// Everything the router needs to know
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Directory containing one subdirectory per origin
    #[serde(default = "default::prefix")]
    pub prefix: Utf8PathBuf,

    /// File receiving every line that could not be routed to its origin
    #[serde(default = "default::fallback")]
    pub fallback: Utf8PathBuf,

    /// Name of the log file inside each origin's log directory
    #[serde(default = "default::filename")]
    pub filename: String,

    /// Maximum number of log files held open at any time
    #[serde(default = "default::max_handles")]
    pub max_handles: usize,

    /// Open log files with `O_SYNC`
    #[serde(default)]
    pub sync: bool,

    /// Emit diagnostics on stderr
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub owner: Option<Owner>,

    /// Directories are never created below an ancestor owned by a uid or gid under this value
    #[serde(default = "default::min_owner_id")]
    pub min_owner_id: u32,

    /// Path of the log directory relative to an origin's directory
    #[serde(default = "default::log_subdir")]
    pub log_subdir: Utf8PathBuf,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            prefix: default::prefix(),
            fallback: default::fallback(),
            filename: default::filename(),
            max_handles: default::max_handles(),
            sync: false,
            verbose: false,
            owner: None,
            min_owner_id: default::min_owner_id(),
            log_subdir: default::log_subdir(),
        }
    }
}

impl RouterConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Replaces out of range values with their defaults, the way the flags always behaved
    pub fn sanitize(&mut self) {
        if self.max_handles < 1 {
            warn!(
                max_handles = self.max_handles,
                "the maximum number of files to hold open must be greater than zero"
            );
            self.max_handles = default::max_handles();
        }

        if let Some(owner) = self.owner {
            if (owner.uid == 0) != (owner.gid == 0) {
                warn!(
                    uid = owner.uid,
                    gid = owner.gid,
                    "uid and gid must be either both zero or both non-zero"
                );
                self.owner = None;
            } else if owner.uid == 0 {
                self.owner = None;
            }
        }
    }

    /// Splits the fallback path into its directory and file name
    pub fn fallback_parts(&self) -> Result<(&Utf8Path, &str), ConfigError> {
        match (self.fallback.parent(), self.fallback.file_name()) {
            (Some(dir), Some(name)) => Ok((dir, name)),
            _ => Err(ConfigError::Fallback(self.fallback.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = RouterConfig::from_toml("").unwrap();
        assert_eq!(config.prefix, "/srv");
        assert_eq!(config.fallback, "/var/log/apache2/zz-mass-hosting.log");
        assert_eq!(config.filename, "access.log");
        assert_eq!(config.max_handles, 50);
        assert_eq!(config.min_owner_id, 1000);
        assert_eq!(config.log_subdir, "public/logs");
        assert!(!config.sync);
        assert!(config.owner.is_none());
    }

    #[test]
    fn parses_every_field() {
        let config = RouterConfig::from_toml(
            r#"
            prefix = "/home/sites"
            fallback = "/var/log/other.log"
            filename = "foo.log"
            max_handles = 4
            sync = true
            verbose = true
            min_owner_id = 500
            log_subdir = "logs"
            owner = { uid = 33, gid = 33 }
            "#,
        )
        .unwrap();
        assert_eq!(config.prefix, "/home/sites");
        assert_eq!(config.filename, "foo.log");
        assert_eq!(config.max_handles, 4);
        assert!(config.sync && config.verbose);
        assert_eq!(config.min_owner_id, 500);
        assert_eq!(config.owner, Some(Owner { uid: 33, gid: 33 }));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            RouterConfig::from_toml("max_files = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn sanitize_resets_bad_values() {
        let mut config = RouterConfig {
            max_handles: 0,
            owner: Some(Owner { uid: 100, gid: 0 }),
            ..RouterConfig::default()
        };
        config.sanitize();
        assert_eq!(config.max_handles, 50);
        assert!(config.owner.is_none());

        let mut config = RouterConfig {
            owner: Some(Owner { uid: 100, gid: 200 }),
            ..RouterConfig::default()
        };
        config.sanitize();
        assert_eq!(config.owner, Some(Owner { uid: 100, gid: 200 }));
    }

    #[test]
    fn fallback_parts() {
        let config = RouterConfig::default();
        let (dir, name) = config.fallback_parts().unwrap();
        assert_eq!(dir, "/var/log/apache2");
        assert_eq!(name, "zz-mass-hosting.log");

        let config = RouterConfig {
            fallback: "/".into(),
            ..RouterConfig::default()
        };
        assert!(config.fallback_parts().is_err());
    }
}
