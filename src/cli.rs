use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "fspot-migrate",
    about = "Migrate an F-Spot photo library into a content-addressed store"
)]
pub struct Cli {
    /// Path to the F-Spot photo database
    #[arg(long, default_value = "~/.config/f-spot/photos.db")]
    pub db: String,

    /// Base URL of the store server
    #[arg(long, env = "FSPOT_MIGRATE_SERVER", default_value = "http://localhost:3179")]
    pub server: String,

    /// Directory for the migration ledger and the database working copy
    #[arg(long, default_value = "~/.config/fspot-migrate")]
    pub state_directory: String,

    /// Start from this photo id instead of the ledger's resume position
    #[arg(long)]
    pub min_id: Option<i64>,

    /// Number of concurrent upload workers
    #[arg(long, default_value_t = 4)]
    pub concurrency: u16,

    /// Check that the server is reachable, then exit
    #[arg(long)]
    pub ping: bool,

    /// Print ledger statistics, then exit
    #[arg(long)]
    pub status: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}
