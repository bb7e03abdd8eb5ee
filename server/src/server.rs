use crate::routes;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{header::CONTENT_TYPE, Method},
    routing::{delete, get, patch, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Upload bodies above this are cut off by the HTTP layer. Files between the
/// 5 MiB ingestion limit and this are read and rejected with a 400.
pub const UPLOAD_BODY_LIMIT: usize = 16 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    // Public reads may be fetched cross-origin; writes stay same-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let uploads = ServeDir::new(state.ingestor.dir());
    let upload_prefix = state.ingestor.url_prefix().to_string();

    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/portfolio",
            get(routes::get_portfolio).post(routes::update_portfolio),
        )
        .route(
            "/api/projects",
            get(routes::list_projects).post(routes::create_project),
        )
        .route(
            "/api/projects/:id",
            patch(routes::update_project).delete(routes::delete_project),
        )
        .route("/api/projects/slug/:slug", get(routes::get_project_by_slug))
        .route("/api/tags", get(routes::list_tags))
        .route(
            "/api/upload",
            post(routes::upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/api/messages",
            get(routes::list_messages).post(routes::create_message),
        )
        .route("/api/messages/:id", delete(routes::delete_message))
        .route("/api/auth/sign-in", post(routes::sign_in))
        .route("/api/auth/sign-out", post(routes::sign_out))
        .route("/api/auth/session", get(routes::session))
        .route("/api/auth/change-password", post(routes::change_password))
        .route("/api/auth/change-email", post(routes::change_email))
        .nest_service(&upload_prefix, uploads)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(app_state: AppState, port: u16) -> Result<(), std::io::Error> {
    let app = router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Server running on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
