//! Plain HTTP helpers for tooling that does not want a WebSocket.

use crate::ClientError;

/// Upload a blob via `POST /api/storage/upload?name=…` and return the
/// content address reported by the broker.
pub async fn upload_via_http(
    base_url: &str,
    name: &str,
    media: &str,
    blob: Vec<u8>,
) -> Result<String, ClientError> {
    let url = format!("{}/api/storage/upload?name={}", base_url.trim_end_matches('/'), name);
    let response = reqwest::Client::new()
        .post(url)
        .header(http::header::CONTENT_TYPE, media)
        .body(blob)
        .send()
        .await?
        .error_for_status()?;
    let body = response.text().await?;
    Ok(body.trim().to_string())
}
