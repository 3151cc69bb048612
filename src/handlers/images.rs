//! Handlers for the `/api/v1/images` routes.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use metrics::counter;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::errors::ServiceError;
use crate::index::{ListFilters, SortOrder, Visibility, DEFAULT_PAGE_SIZE};
use crate::metrics::{DELETES_TOTAL, PRESIGNED_LINKS_TOTAL, UPLOADS_TOTAL, UPLOAD_BYTES_TOTAL};
use crate::service::UploadRequest;
use crate::AppState;

/// Pull the request credential from `Authorization: Bearer` or the
/// `x-api-key` header.
pub fn extract_credential(headers: &HeaderMap) -> Result<String, ServiceError> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Ok(token.trim().to_string());
        }
        return Err(ServiceError::unauthorized(
            "authorization header must use the Bearer scheme",
        ));
    }
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Ok(value.trim().to_string());
    }
    Err(ServiceError::unauthorized("missing credentials"))
}

fn parse_tags(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

// ── Upload ──────────────────────────────────────────────────────────

/// `POST /api/v1/images` -- multipart upload.
///
/// Expected fields: `file` (the image), `owner_id`, `category`, and
/// optionally `tags` (comma separated) and `visibility`.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ServiceError> {
    let credential = extract_credential(&headers)?;

    let mut data: Option<Bytes> = None;
    let mut filename = String::new();
    let mut content_type = String::new();
    let mut owner_id = String::new();
    let mut category = String::new();
    let mut tags = BTreeSet::new();
    let mut visibility = Visibility::Public;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                filename = field.file_name().unwrap_or("").to_string();
                content_type = field.content_type().unwrap_or("").to_string();
                data = Some(field.bytes().await.map_err(|e| {
                    ServiceError::validation(format!("failed to read file field: {e}"))
                })?);
            }
            "owner_id" => owner_id = text_field(field).await?,
            "category" => category = text_field(field).await?,
            "tags" => tags = parse_tags(&text_field(field).await?),
            "visibility" => visibility = Visibility::parse(&text_field(field).await?)?,
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ServiceError::validation("missing 'file' field"))?;
    let size = data.len() as u64;

    let (record, url) = state
        .service
        .upload(
            &credential,
            UploadRequest {
                owner_id,
                filename,
                content_type,
                category,
                tags,
                visibility,
                data,
            },
        )
        .await?;

    counter!(UPLOADS_TOTAL).increment(1);
    counter!(UPLOAD_BYTES_TOTAL).increment(size);

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "image": record,
            "url": url,
        })),
    ))
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ServiceError> {
    field
        .text()
        .await
        .map_err(|e| ServiceError::validation(format!("malformed multipart field: {e}")))
}

// ── Retrieval ───────────────────────────────────────────────────────

/// `GET /api/v1/images/:asset_id` -- one record plus a fresh download URL.
///
/// No credential: the asset id is the capability, and the returned
/// link expires on its own.
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(asset_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let (record, url) = state.service.get(&asset_id).await?;

    counter!(PRESIGNED_LINKS_TOTAL).increment(1);

    Ok(Json(serde_json::json!({
        "success": true,
        "image": record,
        "url": url,
    })))
}

/// Query parameters of the listing endpoint.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub owner_id: String,
    pub category: Option<String>,
    /// Comma-separated tag list; all must match.
    pub tags: Option<String>,
    pub visibility: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub filename_contains: Option<String>,
    /// `asc` or `desc` (default).
    pub order: Option<String>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

/// `GET /api/v1/images` -- owner-scoped listing with cursor pagination.
pub async fn list_images(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = match query.order.as_deref() {
        None | Some("desc") => SortOrder::Descending,
        Some("asc") => SortOrder::Ascending,
        Some(other) => {
            return Err(ServiceError::validation(format!(
                "order must be 'asc' or 'desc', got '{other}'"
            )))
        }
    };

    let filters = ListFilters {
        category: query.category,
        tags: query.tags.as_deref().map(parse_tags).unwrap_or_default(),
        visibility: query
            .visibility
            .as_deref()
            .map(Visibility::parse)
            .transpose()?,
        created_after: query.created_after,
        created_before: query.created_before,
        filename_contains: query.filename_contains,
    };

    let result = state
        .service
        .list(
            &query.owner_id,
            &filters,
            order,
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.cursor.as_deref(),
        )
        .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "count": result.records.len(),
        "images": result.records,
        "next_cursor": result.next_cursor,
    })))
}

// ── Deletion ────────────────────────────────────────────────────────

/// Body of the bulk delete endpoint.
#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub owner_id: String,
    pub asset_ids: Vec<String>,
}

/// `DELETE /api/v1/images` -- bulk delete with per-id outcomes.
pub async fn delete_images(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DeleteRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let credential = extract_credential(&headers)?;
    let summary = state
        .service
        .delete_bulk(&credential, &body.owner_id, &body.asset_ids)
        .await?;

    counter!(DELETES_TOTAL).increment(summary.deleted.len() as u64);

    Ok(Json(serde_json::json!({
        "success": true,
        "deleted": summary.deleted,
        "failed": summary.failed,
    })))
}

/// `DELETE /api/v1/images/:asset_id` -- delete one asset.
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(asset_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let credential = extract_credential(&headers)?;
    state.service.delete(&credential, &asset_id).await?;

    counter!(DELETES_TOTAL).increment(1);

    Ok(Json(serde_json::json!({
        "success": true,
        "asset_id": asset_id,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_credential_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer u1:tok"));
        assert_eq!(extract_credential(&headers).unwrap(), "u1:tok");
    }

    #[test]
    fn test_extract_credential_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("u1:tok"));
        assert_eq!(extract_credential(&headers).unwrap(), "u1:tok");
    }

    #[test]
    fn test_extract_credential_missing_or_malformed() {
        assert!(extract_credential(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_credential(&headers).is_err());
    }

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("sunset, beach ,,  ");
        let expected: BTreeSet<String> =
            ["sunset", "beach"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tags, expected);
        assert!(parse_tags("").is_empty());
    }
}
