//! Handler for presigned object downloads.
//!
//! Serves `GET /objects/*key?expires=..&signature=..` for the local and
//! memory backends. The S3 backend presigns directly against the
//! bucket, so this route sees no traffic there.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use std::sync::Arc;

use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub expires: u64,
    pub signature: String,
}

/// `GET /objects/*key` -- verify the link signature and stream the bytes.
pub async fn download_object(
    State(state): State<Arc<AppState>>,
    Path(object_key): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let object_key = object_key.trim_start_matches('/').to_string();
    state
        .signer
        .verify(&object_key, query.expires, &query.signature)?;

    let data = state.store.get(&object_key).await?;
    Ok((
        StatusCode::OK,
        [
            ("content-type", "application/octet-stream".to_string()),
            ("content-length", data.len().to_string()),
            ("cache-control", "private, max-age=0".to_string()),
        ],
        data,
    ))
}
