//! Signed artifact and artwork downloads.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use chrono::Utc;
use fulfillment::Bucket;
use order_store::OrderStore;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// GET /files/{bucket}/{*path} — serve an object behind a signed link.
#[tracing::instrument(skip_all)]
pub async fn download<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((bucket, path)): Path<(String, String)>,
    query: Result<Query<SignedQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Ok(Query(query)) = query else {
        return Err(ApiError::Forbidden);
    };
    if !state
        .url_signer
        .verify(&bucket, &path, query.expires, &query.signature, Utc::now())
    {
        return Err(ApiError::Forbidden);
    }

    let bucket = Bucket::parse(&bucket)
        .ok_or_else(|| ApiError::NotFound("object_not_found", "Object not found".to_string()))?;
    let data = state.storage.download(bucket, &path).await?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&path)),
            (header::CACHE_CONTROL, "private, no-store"),
        ],
        data,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("o1/print.pdf"), "application/pdf");
        assert_eq!(content_type_for("o1/wrap.JPG"), "image/jpeg");
        assert_eq!(content_type_for("o1/wrap.webp"), "image/webp");
        assert_eq!(content_type_for("o1/blob"), "application/octet-stream");
    }
}
