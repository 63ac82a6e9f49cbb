use serde::Deserialize;

use crate::serde_ext::double_option;

/// JSON upload for clients that cannot send multipart bodies.
#[derive(Debug, Deserialize)]
pub struct Base64UploadRequest {
    /// Raw base64, or a `data:<type>;base64,<payload>` URL.
    pub file_b64: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub expense_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateReceiptRequest {
    /// `null` unlinks; absent leaves the link as is.
    #[serde(default, deserialize_with = "double_option")]
    pub expense_id: Option<Option<i64>>,
}
