use axum::{Json, extract::State};

use super::ApiPath;

use crate::types::KeyMetadata;
use crate::{LabGuardError, router::LabGuardState};

pub async fn list_keys(
    State(state): State<LabGuardState>,
) -> Result<Json<Vec<KeyMetadata>>, LabGuardError> {
    Ok(Json(state.keys.list().await?))
}

pub async fn rotate_key(
    State(state): State<LabGuardState>,
    ApiPath(purpose): ApiPath<String>,
) -> Result<Json<KeyMetadata>, LabGuardError> {
    Ok(Json(state.keys.rotate(&purpose).await?))
}
