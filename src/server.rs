//! HTTP surface: health check, onboarding status API and the Telegram
//! webhook.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub const HEALTH_BODY: &str = "Pet Butler AI is running!";

async fn health() -> &'static str {
    HEALTH_BODY
}

/// Assemble the full router. `extra` carries routes owned by other
/// components (webhook, status API).
pub fn router(extra: Vec<Router>) -> Router {
    extra
        .into_iter()
        .fold(Router::new().route("/", get(health)), |app, r| app.merge(r))
        .layer(TraceLayer::new_for_http())
}

/// Bind `port` on all interfaces and serve `app` in the background.
pub async fn spawn(
    app: Router,
    port: u16,
) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "HTTP server stopped");
        }
    });
    Ok((addr, handle))
}
