//! Routes access log lines read from a pipe to per-origin log files.
//!
//! Apache pipes every access log entry, prefixed with the virtual host name, into this process.
//! Each entry is appended to `{prefix}/{origin}/public/logs/access.log`; missing log directories are
//! created with the ownership of the origin directory, and anything that can't be written there
//! safely goes to a single fallback file.

pub mod cache;
pub mod config;
pub mod error;
pub mod line;
pub mod open;
pub mod provision;
pub mod reopen;
pub mod resolve;
pub mod router;

#[cfg(test)]
mod test_util;

pub use config::RouterConfig;
pub use error::{ErrorClass, RouteError};
pub use line::{LineSplitter, LogLine};
pub use reopen::{Event, ReopenController};
pub use router::{Delivery, LogRouter};
