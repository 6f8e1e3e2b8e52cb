//! API request handlers

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::models::HealthStatus;
use super::server::AppState;
use crate::error::{RelayError, Result};
use crate::event::StreamEvent;
use crate::job::{JobKind, ProcessRequest};
use crate::storage::{StoredUpload, UploadStore};

/// Fields read from an upload form
#[derive(Debug, Default)]
pub struct UploadForm {
    /// The `file` field, already written to the upload store
    pub file: Option<StoredUpload>,
    /// Optional `gap` text field
    pub gap: Option<String>,
}

impl UploadForm {
    /// Drop a stored upload that will not be processed
    pub async fn discard(&self) {
        if let Some(file) = &self.file {
            file.remove().await;
        }
    }
}

/// Handle health check requests
pub async fn health_check() -> HealthStatus {
    HealthStatus {
        status: "healthy".to_string(),
        service: "vidscribe".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

fn invalid_upload(err: MultipartError) -> RelayError {
    RelayError::InvalidUpload(err.to_string())
}

/// Read a multipart body, streaming the first `file` field into `store`
pub async fn read_upload(store: &UploadStore, mut multipart: Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::default();
    if let Err(e) = read_fields(store, &mut multipart, &mut form).await {
        form.discard().await;
        return Err(e);
    }
    Ok(form)
}

async fn read_fields(store: &UploadStore, multipart: &mut Multipart, form: &mut UploadForm) -> Result<()> {
    while let Some(field) = multipart.next_field().await.map_err(invalid_upload)? {
        match field.name() {
            Some("file") if form.file.is_none() => {
                form.file = store_field(store, field).await?;
            }
            Some("gap") => {
                form.gap = Some(field.text().await.map_err(invalid_upload)?);
            }
            other => debug!("Ignoring form field {:?}", other),
        }
    }
    Ok(())
}

async fn store_field(store: &UploadStore, mut field: Field<'_>) -> Result<Option<StoredUpload>> {
    let original_name = field.file_name().unwrap_or("upload").to_string();
    let mut writer = store.begin(&original_name).await?;

    let copied = async {
        while let Some(chunk) = field.chunk().await.map_err(invalid_upload)? {
            writer.write(&chunk).await?;
        }
        Ok::<_, RelayError>(())
    }
    .await;

    match copied {
        Ok(()) => writer.finish().await,
        Err(e) => {
            writer.discard().await;
            Err(e)
        }
    }
}

/// Handle `POST /audio`
pub async fn start_audio_job(
    state: &AppState,
    bitrate: Option<String>,
    multipart: Multipart,
) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
    let kind = JobKind::audio(bitrate.as_deref(), state.runner.profile())?;
    let form = read_upload(&state.store, multipart).await?;
    let request = ProcessRequest::new(form.file, kind)?;
    start_job(state, request).await
}

/// Handle `POST /keyframes`; the query `gap` wins over the form field
pub async fn start_keyframe_job(
    state: &AppState,
    gap: Option<String>,
    multipart: Multipart,
) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
    let profile = state.runner.profile();
    let query_kind = match gap.filter(|g| !g.trim().is_empty()) {
        Some(gap) => Some(JobKind::keyframes(Some(gap.as_str()), profile)?),
        None => None,
    };

    let form = read_upload(&state.store, multipart).await?;
    let kind = match query_kind {
        Some(kind) => kind,
        None => match JobKind::keyframes(form.gap.as_deref(), profile) {
            Ok(kind) => kind,
            Err(e) => {
                form.discard().await;
                return Err(e);
            }
        },
    };

    let request = ProcessRequest::new(form.file, kind)?;
    start_job(state, request).await
}

/// Start the job for a stored upload
pub async fn start_job(state: &AppState, request: ProcessRequest) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
    info!(
        "📹 {} request for {} ({} bytes)",
        request.kind.name(),
        request.upload.file_name,
        request.upload.size
    );
    state.runner.start(&request.kind, &request.upload.path).await
}
