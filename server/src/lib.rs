//! Backend for a single-artist portfolio site.
//!
//! Serves the public JSON API (profile, projects, tags, contact form), the
//! admin API behind a session cookie, and the uploaded images themselves.
//!
//! Two pieces carry actual invariants:
//! - [`ingest`]: uploads are stored as WebP under a content hash (or a stable
//!   key for singleton slots), so identical bytes converge on one file.
//! - [`tags`]: tags are created on first use and swept once no project
//!   references them.
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod ingest;
pub mod messages;
pub mod models;
pub mod profile;
pub mod projects;
pub mod routes;
pub mod security;
pub mod server;
pub mod state;
pub mod tags;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Database(#[from] database::DatabaseError),
    #[error("Failed to seed admin account: {0}")]
    Seed(#[from] error::AppError),
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run() -> Result<(), StartupError> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Loading configuration...");
    let config = config::Config::load()?;

    let db = database::Database::open(&config.data_dir)?;
    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        auth::ensure_admin(&db, email, password)?;
    }

    let ingestor = ingest::ImageIngestor::new(&config.upload_dir, &config.upload_url_prefix);
    info!(
        dir = %ingestor.dir().display(),
        prefix = %ingestor.url_prefix(),
        "Serving uploads"
    );

    let sessions = auth::SessionKeys::new(
        &config.session_secret,
        chrono::Duration::hours(config.session_ttl_hours),
    )
    .with_secure(config.cookie_secure);
    if !config.cookie_secure {
        warn!("Session cookies are not marked Secure");
    }

    let app_state = state::AppState::new(db, ingestor, sessions);
    server::start_server(app_state, config.port).await?;
    Ok(())
}
