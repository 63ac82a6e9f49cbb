use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{FormParams, FormSummary},
    services,
};
use crate::{
    auth::AuthUser,
    error::{ApiQuery, ApiResult},
    state::AppState,
};

pub fn form_routes() -> Router<AppState> {
    Router::new()
        .route("/form", get(generate_form))
        .route("/form/", get(generate_form))
        .route("/form/csv", get(export_form_csv))
}

/// GET /form?start=YYYY-MM-DD&end=YYYY-MM-DD
#[instrument(skip(state))]
pub async fn generate_form(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(params): ApiQuery<FormParams>,
) -> ApiResult<Json<FormSummary>> {
    Ok(Json(services::generate(&state, user_id, &params).await?))
}

#[instrument(skip(state))]
pub async fn export_form_csv(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(params): ApiQuery<FormParams>,
) -> ApiResult<impl IntoResponse> {
    let body = services::export_csv(&state, user_id, &params).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"form.csv\""),
        ],
        body,
    ))
}
