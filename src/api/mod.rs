pub mod dispatch;
pub mod error;
mod handlers;
mod transfer;
pub mod web;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post, MethodRouter},
    Router,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use std::convert::Infallible;
use std::sync::Arc;

use crate::config::DEFAULT_UPLOAD_LIMIT;
use crate::connections::ConnectionRegistry;
use crate::jobs::JobRunner;
use crate::media::Toolkit;
use crate::state_store::StateStore;
use crate::storage::{base_name, Storage};

use error::ApiError;
use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub connections: ConnectionRegistry,
    pub jobs: JobRunner,
    pub states: StateStore,
    pub storage: Storage,
    pub toolkit: Toolkit,
    /// Codename announced in `connected` replies.
    pub server_id: Arc<str>,
    pub assets: Arc<web::Assets>,
    /// Cancelled once on process shutdown; every open channel closes.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire a fresh registry and job runner around the given collaborators.
    /// Must be called inside a Tokio runtime.
    pub fn new(storage: Storage, states: StateStore, toolkit: Toolkit, assets: web::Assets) -> Self {
        let connections = ConnectionRegistry::new();
        let jobs = JobRunner::spawn(connections.clone(), toolkit.media.clone());
        Self {
            connections,
            jobs,
            states,
            storage,
            toolkit,
            server_id: crate::codename::generate().into(),
            assets: Arc::new(assets),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Configuration for the HTTP/WS router.
///
/// Use `RouterConfig::default()` in tests.
pub struct RouterConfig {
    pub upload_limit_bytes: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            upload_limit_bytes: DEFAULT_UPLOAD_LIMIT,
        }
    }
}

/// Query parameters identifying the caller of `/ws`, upload and download.
#[derive(Debug, Default, Deserialize)]
pub struct ClientParams {
    pub id: Option<String>,
    pub place: Option<String>,
}

impl ClientParams {
    /// Client id and sanitized workspace name, or the first missing one.
    pub fn require(&self) -> Result<(String, String), ApiError> {
        let id = match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(ApiError::MissingParameter("id")),
        };
        let place = self
            .place
            .as_deref()
            .and_then(|p| base_name(p).ok())
            .ok_or(ApiError::MissingParameter("place"))?;
        Ok((id, place))
    }
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    // Everything not routed explicitly: GET serves static files, POST is an upload.
    let fallback: MethodRouter = get(web::web_asset)
        .layer::<_, Infallible>(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer::<_, Infallible>(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer::<_, Infallible>(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .merge(
            post(transfer::upload)
                .layer::<_, Infallible>(DefaultBodyLimit::max(config.upload_limit_bytes)),
        )
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/favicon.ico", get(web::favicon))
        .route("/download", post(transfer::download))
        .with_state(state)
        .fallback_service(fallback)
        .layer(middleware::from_fn(redirect_trailing_slash))
        .layer(TraceLayer::new_for_http())
}

/// Permanently redirect `/a/b/` to `/a/b`, keeping any query string.
async fn redirect_trailing_slash(req: Request, next: Next) -> Response {
    let path = req.uri().path();
    if path == "/" || !path.ends_with('/') {
        return next.run(req).await;
    }
    let trimmed = match path.trim_end_matches('/') {
        "" => "/",
        p => p,
    };
    let target = match req.uri().query() {
        Some(q) => format!("{trimmed}?{q}"),
        None => trimmed.to_string(),
    };
    tracing::debug!(from = %path, to = %target, "redirecting trailing slash");
    Redirect::permanent(&target).into_response()
}
