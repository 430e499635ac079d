//! Direct HTTP access to the file store: download by ref or name, upload
//! with an optional friendly name.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use log::warn;
use serde::Deserialize;

use super::AppState;

/// `GET /api/storage/{filename}`
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    let Some(file) = state.store.storage.get(&filename) else {
        return (StatusCode::NOT_FOUND, "file not found in storage").into_response();
    };

    let mut headers = HeaderMap::new();
    if let Ok(media) = HeaderValue::from_str(&file.media) {
        headers.insert(http::header::CONTENT_TYPE, media);
    }
    if let Ok(r#ref) = HeaderValue::from_str(file.r#ref()) {
        headers.insert("x-wasimoff-ref", r#ref);
    }
    (StatusCode::OK, headers, file.bytes).into_response()
}

#[derive(Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    name: String,
}

/// `POST /api/storage/upload?name=…`: body is the blob, content type must
/// be on the allow-list; responds with the content address.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let media = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|c| c.to_str().ok())
        .unwrap_or_default();

    match state.store.storage.insert(&query.name, media, body.to_vec()) {
        Ok(file) => {
            state.store.distribute(file.clone());
            let mut headers = HeaderMap::new();
            headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            if let Ok(r#ref) = HeaderValue::from_str(file.r#ref()) {
                headers.insert("x-wasimoff-ref", r#ref);
            }
            (StatusCode::OK, headers, format!("{}\n", file.r#ref())).into_response()
        }
        Err(err) => {
            warn!("upload failed: {err}");
            (StatusCode::UNSUPPORTED_MEDIA_TYPE, err.to_string()).into_response()
        }
    }
}
