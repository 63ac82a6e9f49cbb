use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{Base64UploadRequest, UpdateReceiptRequest},
    repo_types::{ExtractionOutcome, NewReceipt, Receipt, ReceiptStatus},
};
use crate::{
    error::{ApiResult, AppError},
    ledger::EntryKind,
    state::AppState,
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const FILE_NAME_MAX: usize = 255;
pub const PRESIGN_TTL_SECS: u64 = 10 * 60;

/// An artifact as received, before anything is stored.
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub expense_id: Option<i64>,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    let essence = ct.split(';').next().unwrap_or(ct).trim();
    match essence {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "application/pdf" => Some("pdf"),
        "text/plain" => Some("txt"),
        _ => None,
    }
}

fn mime_from_file_name(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "pdf" => Some("application/pdf"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}

/// Declared type, unless it is missing or generic and the file name says more.
fn resolve_content_type(declared: Option<&str>, file_name: Option<&str>) -> String {
    match declared.map(str::trim).filter(|s| !s.is_empty()) {
        Some(ct) if ct != DEFAULT_CONTENT_TYPE => ct.to_string(),
        _ => file_name
            .and_then(mime_from_file_name)
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string(),
    }
}

fn sanitize_file_name(name: Option<&str>) -> Option<String> {
    let base = name?.rsplit(['/', '\\']).next()?.trim();
    let clean: String = base
        .chars()
        .filter(|c| !c.is_control())
        .take(FILE_NAME_MAX)
        .collect();
    (!clean.is_empty()).then_some(clean)
}

pub fn sha256_hex(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Content-addressed key: identical uploads of one user share an object.
pub fn storage_key(user_id: Uuid, sha256: &str, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("receipts/{user_id}/{sha256}.{ext}")
}

pub fn decode_base64(payload: &str) -> ApiResult<(Bytes, Option<String>)> {
    let (declared, data) = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| AppError::invalid_field("file_b64", "malformed data URL"))?;
            let ct = meta.strip_suffix(";base64").unwrap_or(meta);
            (Some(ct.to_string()).filter(|s| !s.is_empty()), data)
        }
        None => (None, payload),
    };
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(cleaned)
        .map_err(|_| AppError::invalid_field("file_b64", "invalid base64"))?;
    Ok((Bytes::from(bytes), declared))
}

async fn ensure_expense_owned(state: &AppState, user_id: Uuid, expense_id: i64) -> ApiResult<()> {
    state
        .ledger
        .get(EntryKind::Expense, user_id, expense_id)
        .await?
        .map(|_| ())
        .ok_or(AppError::NotFound("Expense"))
}

fn run_extraction(state: &AppState, receipt: &Receipt, body: &[u8]) -> ExtractionOutcome {
    match state.extractor.extract(&receipt.content_type, body) {
        Ok(fields) => ExtractionOutcome {
            status: ReceiptStatus::Processed,
            vendor: fields.vendor,
            amount: Some(fields.amount),
            receipt_date: fields.date,
        },
        Err(e) => {
            warn!(receipt_id = receipt.id, error = %e, "receipt extraction failed");
            ExtractionOutcome {
                status: ReceiptStatus::ExtractionFailed,
                vendor: None,
                amount: None,
                receipt_date: None,
            }
        }
    }
}

async fn record(
    state: &AppState,
    user_id: Uuid,
    receipt: &Receipt,
    outcome: ExtractionOutcome,
) -> ApiResult<Receipt> {
    state
        .receipts
        .record_extraction(user_id, receipt.id, &outcome)
        .await?
        .ok_or(AppError::NotFound("Receipt"))
}

pub async fn upload(state: &AppState, user_id: Uuid, item: UploadItem) -> ApiResult<Receipt> {
    if item.body.is_empty() {
        return Err(AppError::invalid_field("file", "must not be empty"));
    }
    if item.body.len() > state.config.receipt_max_bytes {
        return Err(AppError::invalid_field(
            "file",
            format!("must be at most {} bytes", state.config.receipt_max_bytes),
        ));
    }
    if let Some(expense_id) = item.expense_id {
        ensure_expense_owned(state, user_id, expense_id).await?;
    }

    let file_name = sanitize_file_name(item.file_name.as_deref());
    let content_type = resolve_content_type(item.content_type.as_deref(), file_name.as_deref());
    let sha256 = sha256_hex(&item.body);
    let file_key = storage_key(user_id, &sha256, &content_type);

    // Held until the row exists, so a concurrent delete of the last receipt
    // sharing this object cannot remove it in between.
    let mut artifact = state.receipts.lock_artifact(&file_key).await?;
    state
        .storage
        .put_object(&file_key, item.body.clone(), &content_type)
        .await
        .map_err(|e| AppError::Unavailable(format!("store receipt artifact: {e:#}")))?;
    let pending = artifact
        .insert(
            user_id,
            &NewReceipt {
                file_key,
                file_name,
                content_type,
                size_bytes: item.body.len() as i64,
                sha256,
                expense_id: item.expense_id,
            },
        )
        .await?;
    artifact.commit().await?;
    info!(receipt_id = pending.id, %user_id, size = pending.size_bytes, "receipt uploaded");

    let outcome = run_extraction(state, &pending, &item.body);
    let receipt = record(state, user_id, &pending, outcome).await?;
    info!(receipt_id = receipt.id, status = %receipt.status, "receipt extraction recorded");
    Ok(receipt)
}

pub async fn upload_base64(
    state: &AppState,
    user_id: Uuid,
    req: Base64UploadRequest,
) -> ApiResult<Receipt> {
    let (body, data_url_type) = decode_base64(&req.file_b64)?;
    let item = UploadItem {
        body,
        content_type: req.content_type.or(data_url_type),
        file_name: req.file_name,
        expense_id: req.expense_id,
    };
    upload(state, user_id, item).await
}

pub async fn get(state: &AppState, user_id: Uuid, id: i64) -> ApiResult<Receipt> {
    state
        .receipts
        .get(user_id, id)
        .await?
        .ok_or(AppError::NotFound("Receipt"))
}

pub async fn list(state: &AppState, user_id: Uuid) -> ApiResult<Vec<Receipt>> {
    state.receipts.list(user_id).await
}

pub async fn update(
    state: &AppState,
    user_id: Uuid,
    id: i64,
    req: UpdateReceiptRequest,
) -> ApiResult<Receipt> {
    let Some(expense_id) = req.expense_id else {
        return get(state, user_id, id).await;
    };
    if let Some(expense_id) = expense_id {
        ensure_expense_owned(state, user_id, expense_id).await?;
    }
    let receipt = state
        .receipts
        .set_expense(user_id, id, expense_id)
        .await?
        .ok_or(AppError::NotFound("Receipt"))?;
    info!(receipt_id = id, ?expense_id, "receipt expense link updated");
    Ok(receipt)
}

/// Runs extraction again on the stored artifact.
pub async fn reextract(state: &AppState, user_id: Uuid, id: i64) -> ApiResult<Receipt> {
    let receipt = get(state, user_id, id).await?;
    let body = state
        .storage
        .get_object(&receipt.file_key)
        .await
        .map_err(|e| AppError::Unavailable(format!("read receipt artifact: {e:#}")))?;
    let outcome = run_extraction(state, &receipt, &body);
    record(state, user_id, &receipt, outcome).await
}

/// Either a presigned URL to redirect to, or the artifact itself.
pub enum ArtifactAccess {
    Redirect(String),
    Inline { body: Bytes, content_type: String },
}

pub async fn artifact(state: &AppState, user_id: Uuid, id: i64) -> ApiResult<ArtifactAccess> {
    let receipt = get(state, user_id, id).await?;
    let presigned = state
        .storage
        .presign_get(&receipt.file_key, PRESIGN_TTL_SECS)
        .await
        .map_err(|e| AppError::Unavailable(format!("presign receipt artifact: {e:#}")))?;
    if let Some(url) = presigned {
        return Ok(ArtifactAccess::Redirect(url));
    }
    let body = state
        .storage
        .get_object(&receipt.file_key)
        .await
        .map_err(|e| AppError::Unavailable(format!("read receipt artifact: {e:#}")))?;
    Ok(ArtifactAccess::Inline {
        body,
        content_type: receipt.content_type,
    })
}

pub async fn delete(state: &AppState, user_id: Uuid, id: i64) -> ApiResult<()> {
    let file_key = get(state, user_id, id).await?.file_key;
    let mut artifact = state.receipts.lock_artifact(&file_key).await?;
    artifact
        .delete(user_id, id)
        .await?
        .ok_or(AppError::NotFound("Receipt"))?;

    if artifact.count_by_key(&file_key).await? == 0 {
        // The row is gone either way; a leftover object is only wasted space.
        if let Err(e) = state
            .storage
            .delete_object(&file_key)
            .await
            .context("delete receipt artifact")
        {
            warn!(error = %e, key = %file_key, "artifact left behind");
        }
    }
    artifact.commit().await?;
    info!(receipt_id = id, %user_id, "receipt deleted");
    Ok(())
}
