use axum::{
    extract::State,
    http::{header, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{CreateEntryRequest, ListParams, UpdateEntryRequest},
    repo_types::Entry,
    services, Ledger,
};
use crate::{
    auth::AuthUser,
    error::{ApiJson, ApiPath, ApiQuery, ApiResult},
    state::AppState,
};

/// Routes of one ledger resource, mounted under its own prefix
/// (`/income`, `/expense`).
pub fn routes<K: Ledger>() -> Router<AppState> {
    let base = format!("/{}", K::KIND.name());
    Router::new()
        .route(&base, get(list::<K>).post(create::<K>))
        .route(&format!("{base}/"), get(list::<K>).post(create::<K>))
        .route(&format!("{base}/add_{}", K::KIND.name()), post(create::<K>))
        .route(
            &format!("{base}/:id"),
            get(get_one::<K>)
                .patch(update::<K>)
                .put(update::<K>)
                .delete(delete::<K>),
        )
}

#[instrument(skip(state, body), fields(kind = K::KIND.name()))]
pub async fn create<K: Ledger>(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(body): ApiJson<CreateEntryRequest>,
) -> ApiResult<(StatusCode, [(header::HeaderName, String); 1], Json<Entry>)> {
    let row = services::create(&state, K::KIND, user_id, body).await?;
    let location = format!("/{}/{}", K::KIND.name(), row.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(row)))
}

#[instrument(skip(state), fields(kind = K::KIND.name()))]
pub async fn list<K: Ledger>(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<Vec<Entry>>> {
    Ok(Json(services::list(&state, K::KIND, user_id, &params).await?))
}

#[instrument(skip(state), fields(kind = K::KIND.name()))]
pub async fn get_one<K: Ledger>(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Entry>> {
    Ok(Json(services::get(&state, K::KIND, user_id, id).await?))
}

#[instrument(skip(state, body), fields(kind = K::KIND.name()))]
pub async fn update<K: Ledger>(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<UpdateEntryRequest>,
) -> ApiResult<Json<Entry>> {
    Ok(Json(services::update(&state, K::KIND, user_id, id, body).await?))
}

#[instrument(skip(state), fields(kind = K::KIND.name()))]
pub async fn delete<K: Ledger>(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<StatusCode> {
    services::delete(&state, K::KIND, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
