use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::{
    config::{AllowList, CorsConfig},
    error::AppError,
};

/// Header policy for every response, preflights included. A wildcard paired
/// with credentials mirrors the request, since browsers reject `*` there.
pub fn layer(cfg: &CorsConfig) -> anyhow::Result<CorsLayer> {
    let mirror = cfg.allow_credentials;

    let origins = match &cfg.allow_origins {
        AllowList::Any if mirror => AllowOrigin::mirror_request(),
        AllowList::Any => AllowOrigin::from(Any),
        AllowList::Only(items) => AllowOrigin::list(
            items
                .iter()
                .map(|o| HeaderValue::from_str(o).with_context(|| format!("CORS origin {o:?}")))
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
    };
    let methods = match &cfg.allow_methods {
        AllowList::Any if mirror => AllowMethods::mirror_request(),
        AllowList::Any => AllowMethods::from(Any),
        AllowList::Only(items) => AllowMethods::list(
            items
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                        .with_context(|| format!("CORS method {m:?}"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
    };
    let headers = match &cfg.allow_headers {
        AllowList::Any if mirror => AllowHeaders::mirror_request(),
        AllowList::Any => AllowHeaders::from(Any),
        AllowList::Only(items) => AllowHeaders::list(
            items
                .iter()
                .map(|h| HeaderName::try_from(h.as_str()).with_context(|| format!("CORS header {h:?}")))
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
    };

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(cfg.allow_credentials))
}

/// Rejects requests carrying an `Origin` outside the allow list before they
/// reach any router. Requests without `Origin` are not cross-origin and pass.
pub async fn reject_disallowed_origin(
    State(origins): State<Arc<AllowList>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .map(|v| v.to_str().unwrap_or_default().to_string());
    match origin {
        Some(origin) if !origins.allows(&origin) => {
            warn!(%origin, method = %request.method(), "origin not allowed");
            AppError::Forbidden(format!("origin {origin} is not allowed")).into_response()
        }
        _ => next.run(request).await,
    }
}
