pub mod rewrite;
mod routes;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use log::info;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::backend::Backend;
use crate::cache::Cache;
use crate::config::Config;
use crate::error::{MirrorError, Result};

/// Shared, cheaply-cloned state handed to every request. The cache is
/// internally synchronised (single-writer mutex, concurrent readers); the
/// backend is `Send + Sync` behind its own `Arc`. No other state is shared
/// across requests.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub cache: Cache,
    pub external_url: Arc<str>,
}

/// Answers a CORS preflight with the status the contract mandates. The
/// `CorsLayer` below still attaches `Access-Control-Allow-*` headers to this
/// response (including the mirrored `Access-Control-Allow-Headers`), but the
/// status code itself comes from this handler rather than the layer's own
/// default.
async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Builds the gallery router. `CorsLayer` mirrors `Access-Control-Request-Headers`
/// back as `Access-Control-Allow-Headers` (rather than a blanket `*`) and
/// attaches the rest of the `Access-Control-Allow-*` headers to every
/// response; each route also registers an explicit `OPTIONS` handler so the
/// preflight response status matches the contract's `204` rather than the
/// layer's own default.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(AllowHeaders::mirror_request());

    Router::new()
        .route(
            "/asset/{publisher}/{name}/{version}/{platform}/{asset_type}",
            get(routes::get_asset).options(preflight),
        )
        .route(
            "/_gallery/{publisher}/{name}/latest",
            get(routes::get_latest).options(preflight),
        )
        .route(
            "/_apis/public/gallery/extensionquery",
            post(routes::post_extensionquery).options(preflight),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Binds and serves the gallery, running until `shutdown` is cancelled.
pub async fn serve(config: &Config, backend: Arc<dyn Backend>, cache: Cache, shutdown: CancellationToken) -> Result<()> {
    let state = AppState {
        backend,
        cache,
        external_url: Arc::from(config.external_url.as_str()),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.gallery_listen_addr.as_str())
        .await
        .map_err(MirrorError::Io)?;
    info!("gallery listening on {}", config.gallery_listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(MirrorError::Io)
}
