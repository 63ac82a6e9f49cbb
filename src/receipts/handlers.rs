use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};

use super::{
    dto::{Base64UploadRequest, UpdateReceiptRequest},
    repo_types::Receipt,
    services::{self, ArtifactAccess, UploadItem},
};
use crate::{
    auth::AuthUser,
    error::{ApiJson, ApiPath, ApiResult, AppError},
    state::AppState,
};

const FILE_FIELDS: [&str; 4] = ["file", "receipt", "files", "files[]"];

pub fn receipt_routes(max_bytes: usize) -> Router<AppState> {
    // Multipart framing and base64 inflation both need headroom over the raw limit.
    let multipart_limit = max_bytes + 64 * 1024;
    let base64_limit = max_bytes / 3 * 4 + 64 * 1024;

    let upload = Router::new()
        .route("/receipt", get(list_receipts).post(upload_multipart))
        .route("/receipt/", get(list_receipts).post(upload_multipart))
        .layer(DefaultBodyLimit::max(multipart_limit));
    let upload_b64 = Router::new()
        .route("/receipt/base64", post(upload_base64))
        .layer(DefaultBodyLimit::max(base64_limit));

    Router::new()
        .merge(upload)
        .merge(upload_b64)
        .route(
            "/receipt/:id",
            get(get_receipt).patch(update_receipt).delete(delete_receipt),
        )
        .route("/receipt/:id/file", get(get_receipt_file))
        .route("/receipt/:id/extract", post(reextract_receipt))
}

fn created(receipt: Receipt) -> (StatusCode, [(header::HeaderName, String); 1], Json<Receipt>) {
    let location = format!("/receipt/{}", receipt.id);
    (StatusCode::CREATED, [(header::LOCATION, location)], Json(receipt))
}

/// POST /receipt (multipart)
/// Fields: `file` (required), `expense_id` (optional).
#[instrument(skip(state, mp))]
pub async fn upload_multipart(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> ApiResult<impl IntoResponse> {
    let mut mp = mp.map_err(|e| AppError::invalid(e.body_text()))?;
    let mut item: Option<UploadItem> = None;
    let mut expense_id: Option<i64> = None;

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::invalid(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if FILE_FIELDS.contains(&name.as_str()) {
            if item.is_some() {
                return Err(AppError::invalid_field("file", "exactly one file per upload"));
            }
            let content_type = field.content_type().map(str::to_string);
            let file_name = field.file_name().map(str::to_string);
            let body = field
                .bytes()
                .await
                .map_err(|e| AppError::invalid(e.body_text()))?;
            item = Some(UploadItem {
                body,
                content_type,
                file_name,
                expense_id: None,
            });
        } else if name == "expense_id" {
            let raw = field
                .text()
                .await
                .map_err(|e| AppError::invalid(e.body_text()))?;
            let raw = raw.trim();
            if !raw.is_empty() {
                expense_id = Some(
                    raw.parse()
                        .map_err(|_| AppError::invalid_field("expense_id", "must be an integer"))?,
                );
            }
        } else {
            warn!(field = %name, "ignoring unknown multipart field");
        }
    }

    let mut item = item.ok_or_else(|| AppError::invalid_field("file", "is required"))?;
    item.expense_id = expense_id;
    let receipt = services::upload(&state, user_id, item).await?;
    Ok(created(receipt))
}

/// POST /receipt/base64 { file_b64, content_type?, file_name?, expense_id? }
#[instrument(skip(state, body))]
pub async fn upload_base64(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(body): ApiJson<Base64UploadRequest>,
) -> ApiResult<impl IntoResponse> {
    let receipt = services::upload_base64(&state, user_id, body).await?;
    Ok(created(receipt))
}

#[instrument(skip(state))]
pub async fn list_receipts(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Vec<Receipt>>> {
    Ok(Json(services::list(&state, user_id).await?))
}

#[instrument(skip(state))]
pub async fn get_receipt(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Receipt>> {
    Ok(Json(services::get(&state, user_id, id).await?))
}

#[instrument(skip(state, body))]
pub async fn update_receipt(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<UpdateReceiptRequest>,
) -> ApiResult<Json<Receipt>> {
    Ok(Json(services::update(&state, user_id, id, body).await?))
}

#[instrument(skip(state))]
pub async fn reextract_receipt(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Receipt>> {
    Ok(Json(services::reextract(&state, user_id, id).await?))
}

#[instrument(skip(state))]
pub async fn delete_receipt(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<StatusCode> {
    services::delete(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 307 to a presigned URL when the backend supports it, else the bytes.
#[instrument(skip(state))]
pub async fn get_receipt_file(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Response> {
    Ok(match services::artifact(&state, user_id, id).await? {
        ArtifactAccess::Redirect(url) => Redirect::temporary(&url).into_response(),
        ArtifactAccess::Inline { body, content_type } => {
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
    })
}
