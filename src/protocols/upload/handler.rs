//! Upload protocol handler.

use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{header, HeaderMap};
use axum::Json;
use tracing::debug;

use super::collector::{UploadCollector, UploadMeasurement, UploadReport};
use crate::error::UploadError;

/// Name of the multipart part carrying the payload.
const FILE_FIELD: &str = "file";

/// Handle `POST /upload`.
pub async fn upload(request: Request) -> Result<Json<UploadReport>, UploadError> {
    let measurement = if is_multipart(request.headers()) {
        let multipart = Multipart::from_request(request, &()).await?;
        collect_multipart(multipart).await
    } else {
        collect_raw(request).await
    };

    let measurement = measurement.inspect_err(|e| debug!(error = %e, "Upload failed"))?;
    debug!(
        bytes = measurement.bytes_transferred,
        elapsed_secs = measurement.elapsed_seconds,
        mbps = measurement.throughput_mbps,
        "Upload session ended"
    );

    Ok(Json(measurement.report()))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// Count a raw request body.
async fn collect_raw(request: Request) -> Result<UploadMeasurement, UploadError> {
    let mut collector = UploadCollector::new();
    collector
        .consume(request.into_body().into_data_stream())
        .await?;
    Ok(collector.finish())
}

/// Count the file part of a multipart body, skipping every other part.
async fn collect_multipart(mut multipart: Multipart) -> Result<UploadMeasurement, UploadError> {
    let mut collector = UploadCollector::new();
    let mut found = false;

    while let Some(mut field) = multipart.next_field().await? {
        if !is_file_part(&field) {
            continue;
        }
        found = true;
        while let Some(chunk) = field.chunk().await? {
            collector.record(chunk.len());
        }
        debug!(
            name = field.name().unwrap_or_default(),
            bytes = collector.total_bytes(),
            "File part received"
        );
    }

    if !found {
        return Err(UploadError::MissingFile);
    }
    Ok(collector.finish())
}

fn is_file_part(field: &Field<'_>) -> bool {
    field.file_name().is_some() || field.name() == Some(FILE_FIELD)
}
