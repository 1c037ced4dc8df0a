use std::path::PathBuf;

use crate::cli::{Cli, LogLevel};

/// Resolved application configuration.
#[derive(Debug)]
pub struct Config {
    /// F-Spot photo database to migrate from.
    pub db_path: PathBuf,
    /// Base URL of the store server.
    pub server: String,
    /// Directory holding the ledger and the database working copy.
    pub state_directory: PathBuf,
    /// Explicit starting photo id, overriding the ledger's resume position.
    pub min_id: Option<i64>,
    /// Concurrent upload workers.
    pub concurrency: usize,
    pub log_level: LogLevel,
    pub ping: bool,
    pub status: bool,
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        Self {
            db_path: expand_tilde(&cli.db),
            server: cli.server,
            state_directory: expand_tilde(&cli.state_directory),
            min_id: cli.min_id,
            concurrency: (cli.concurrency as usize).max(1),
            log_level: cli.log_level,
            ping: cli.ping,
            status: cli.status,
        }
    }

    /// Where the migration ledger lives.
    pub fn ledger_path(&self) -> PathBuf {
        self.state_directory.join("ledger.db")
    }

    /// Where the photo database is copied before reading, so a running
    /// F-Spot cannot change it mid-migration.
    pub fn working_copy_path(&self) -> PathBuf {
        self.state_directory.join("photos-working-copy.db")
    }
}
