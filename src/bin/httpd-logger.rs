//! Reads access log lines on `stdin` and appends each one to the log file of the virtual host it
//! starts with.
//!
//! Meant to be used as Apache's piped logger:
//!
//! ```text
//! CustomLog "|/usr/sbin/httpd-logger -f 50 /var/log/apache2/zz-mass-hosting.log" vhost_combined
//! ```
//!
//! `SIGHUP` closes every open log file, the rotation job sends one after renaming them.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use httpd_logger::config::Owner;
use httpd_logger::{reopen, LineSplitter, LogRouter, ReopenController, RouterConfig};
use tokio::io::{self, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// Open log files in synchronous mode
    #[clap(short = 's')]
    sync: bool,

    /// Maximum number of log files to hold open
    #[clap(short = 'f')]
    files: Option<usize>,

    /// File name of the per-origin log files
    #[clap(short = 'l')]
    filename: Option<String>,

    /// Show verbose output on stderr
    #[clap(short = 'v')]
    verbose: bool,

    /// Default owner of log files, accepted for compatibility
    #[clap(short = 'u')]
    uid: Option<u32>,

    /// Default group of log files, accepted for compatibility
    #[clap(short = 'g')]
    gid: Option<u32>,

    /// Directory containing one directory per origin
    #[clap(short = 'p')]
    prefix: Option<Utf8PathBuf>,

    /// Read the base configuration from a TOML file, flags override it
    #[clap(long)]
    config: Option<Utf8PathBuf>,

    /// File receiving every line that can't be written to its origin's log
    fallback: Option<Utf8PathBuf>,
}

impl Args {
    /// Layers the flags over `config`, relative paths are taken relative to `cwd`
    fn apply(self, config: &mut RouterConfig, cwd: &Utf8Path) {
        config.sync |= self.sync;
        config.verbose |= self.verbose;
        if let Some(files) = self.files {
            config.max_handles = files;
        }
        if let Some(filename) = self.filename {
            config.filename = filename;
        }
        if self.uid.is_some() || self.gid.is_some() {
            config.owner = Some(Owner {
                uid: self.uid.unwrap_or(0),
                gid: self.gid.unwrap_or(0),
            });
        }
        if let Some(prefix) = self.prefix {
            config.prefix = prefix;
        }
        if let Some(fallback) = self.fallback.filter(|path| !path.as_str().is_empty()) {
            config.fallback = fallback;
        }

        if config.prefix.is_relative() {
            config.prefix = cwd.join(&config.prefix);
        }
        if config.fallback.is_relative() {
            config.fallback = cwd.join(&config.fallback);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("HTTPD_LOGGER_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "error" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            RouterConfig::load(path).with_context(|| format!("load configuration: `{path}`"))?
        }
        None => RouterConfig::default(),
    };
    let cwd = std::env::current_dir().context("get working directory")?;
    let cwd = Utf8PathBuf::try_from(cwd).context("working directory is not UTF-8")?;
    args.apply(&mut config, &cwd);

    init_tracing(config.verbose);
    config.sanitize();
    debug!(?config, "starting");

    std::env::set_current_dir(&config.prefix)
        .with_context(|| format!("change directory to prefix: `{}`", config.prefix))?;

    let mut router = LogRouter::new(&config).context("set up router")?;
    let splitter = LineSplitter::new().context("compile origin pattern")?;
    let rotation = ReopenController::new().context("subscribe to SIGHUP")?;

    let input = BufReader::new(io::stdin());
    reopen::run(
        &mut router,
        &splitter,
        reopen::events(input, rotation.into_stream()),
    )
    .await
    .context("read stdin")
}
