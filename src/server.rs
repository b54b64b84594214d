use crate::error::Result;
use crate::metrics::RegistryRouter;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use hyper::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "json_log_exporter",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn render(router: &RegistryRouter, path: &str) -> impl IntoResponse {
    match router.by_path(path) {
        Some(registry) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE)],
            registry.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, CONTENT_TYPE)],
            String::new(),
        ),
    }
}

/// Router with one route per registry plus `/health`.
pub fn create_server(router: Arc<RegistryRouter>) -> Router {
    let mut app = Router::new().route("/health", get(health));

    for registry in router.registries() {
        let path = registry.path().to_string();
        let registries = router.clone();
        app = app.route(
            registry.path(),
            get(move || {
                let registries = registries.clone();
                let path = path.clone();
                async move { render(&registries, &path) }
            }),
        );
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Serve the registries on `addr` until the process ends.
pub async fn start_server(router: Arc<RegistryRouter>, addr: SocketAddr) -> Result<()> {
    for registry in router.registries() {
        if registry.is_empty() {
            warn!(registry = registry.name(), path = registry.path(), "Export group has no metrics");
        }
        info!(
            registry = registry.name(),
            metrics = registry.len(),
            "Serving metrics at http://{}{}",
            addr,
            registry.path()
        );
    }
    let app = create_server(router);
    Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}
