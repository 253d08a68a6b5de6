//! filekeep server binary.
//!
//! A small multi-user file manager: users register, log in for a bearer
//! token, and upload, list, preview and download files kept in a per-user
//! home directory. User and file records live in SQLite; sessions live in
//! memory only.

mod app;
mod atomic;
mod auth;
mod background;
mod config;
mod credentials;
mod db;
mod error;
mod files;
mod http;
mod logging;
mod records;
mod session;
mod storage;

use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use crate::app::{AppServices, build_router};
use crate::background::spawn_session_pruner;
use crate::config::{Args, DEFAULT_TOKEN_SECRET};
use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::files::FileService;
use crate::http::build_cors_layer;
use crate::records::FileRecordStore;
use crate::session::SessionRegistry;
use crate::storage::Storage;

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    if args.token_secret == DEFAULT_TOKEN_SECRET {
        warn!("using the built-in token secret; set FILEKEEP_TOKEN_SECRET in production");
    }

    let storage = Arc::new(Storage::open(&args.files_root).await?);
    let db_path = Path::new(&args.db_path);
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let db = Arc::new(Database::open(db_path).map_err(std::io::Error::other)?);
    info!(files_root = ?storage.root_path(), db_path = %args.db_path, "storage ready");

    let credentials = Arc::new(CredentialStore::new(db.clone(), storage.clone()));
    let records = Arc::new(FileRecordStore::new(db));
    let sessions = Arc::new(SessionRegistry::new(
        args.token_secret.as_bytes(),
        Duration::from_secs(args.session_ttl_secs),
        args.session_sweep_threshold,
    ));
    let files = Arc::new(
        FileService::new(credentials.clone(), records, storage)
            .with_preview_lines(args.preview_lines),
    );

    let pruner = spawn_session_pruner(
        sessions.clone(),
        Duration::from_secs(args.session_prune_interval_secs),
    );

    let mut app = build_router(
        AppServices {
            credentials,
            sessions,
            files,
        },
        args.upload_max_size,
    );
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("Starting file manager server at {}", addr);

    tokio::spawn(shutdown_signal(handle.clone()));
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    if let Some(pruner) = pruner {
        pruner.abort();
    }
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
