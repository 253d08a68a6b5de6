//! 命令行参数与服务默认配置。

use clap::Parser;

pub const DEFAULT_TOKEN_SECRET: &str = "dev-secret-key-change-in-prod";
pub const DEFAULT_FILES_ROOT: &str = "./userfiles";
pub const DEFAULT_DB_PATH: &str = "./data/filemanager.db";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_SESSION_SWEEP_THRESHOLD: usize = 1000;
pub const SESSION_PRUNE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_PREVIEW_LINES: usize = 100;
pub const DEFAULT_UPLOAD_MAX_SIZE: usize = 10 * 1024 * 1024;
pub const USER_ID_PREFIX: &str = "user_";

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "filekeep", version, about = "Multi-user file manager server")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "FILEKEEP_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "FILEKEEP_PORT",
        default_value_t = 8080,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        short = 's',
        long,
        env = "FILEKEEP_FILES_ROOT",
        default_value = DEFAULT_FILES_ROOT,
        help = "Root directory holding per-user home directories"
    )]
    pub files_root: String,
    #[arg(
        short = 'd',
        long,
        env = "FILEKEEP_DB_PATH",
        default_value = DEFAULT_DB_PATH,
        help = "SQLite database path"
    )]
    pub db_path: String,
    #[arg(
        long,
        env = "FILEKEEP_TOKEN_SECRET",
        default_value = DEFAULT_TOKEN_SECRET,
        hide_env_values = true,
        help = "Secret used to sign bearer tokens"
    )]
    pub token_secret: String,
    #[arg(
        long,
        env = "FILEKEEP_SESSION_TTL_SECS",
        default_value_t = DEFAULT_SESSION_TTL_SECS,
        help = "Session lifetime in seconds"
    )]
    pub session_ttl_secs: u64,
    #[arg(
        long,
        env = "FILEKEEP_SESSION_SWEEP_THRESHOLD",
        default_value_t = DEFAULT_SESSION_SWEEP_THRESHOLD,
        help = "Session count above which validation sweeps expired entries"
    )]
    pub session_sweep_threshold: usize,
    #[arg(
        long,
        env = "FILEKEEP_SESSION_PRUNE_INTERVAL_SECS",
        default_value_t = SESSION_PRUNE_INTERVAL_SECS,
        help = "Interval of the background session sweep in seconds (0 to disable)"
    )]
    pub session_prune_interval_secs: u64,
    #[arg(
        long,
        env = "FILEKEEP_PREVIEW_LINES",
        default_value_t = DEFAULT_PREVIEW_LINES,
        help = "Max lines returned by preview"
    )]
    pub preview_lines: usize,
    #[arg(
        long,
        env = "FILEKEEP_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request size in bytes"
    )]
    pub upload_max_size: usize,
    #[arg(long, env = "FILEKEEP_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
}
