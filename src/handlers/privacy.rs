use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

use super::{ApiJson, ApiPath};
use crate::types::{ConsentRecord, ConsentState, DataExport, ErasureReceipt, NewUser, User};
use crate::{LabGuardError, router::LabGuardState};

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub purpose: String,
    pub granted: bool,
}

pub async fn register_user(
    State(state): State<LabGuardState>,
    ApiJson(body): ApiJson<NewUser>,
) -> Result<(StatusCode, Json<User>), LabGuardError> {
    let user = state.privacy.register_user(body).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn export(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<DataExport>, LabGuardError> {
    Ok(Json(state.privacy.export(id).await?))
}

pub async fn erase(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ErasureReceipt>, LabGuardError> {
    Ok(Json(state.privacy.erase(id).await?))
}

pub async fn anonymize(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<User>, LabGuardError> {
    Ok(Json(state.privacy.anonymize(id).await?))
}

pub async fn list_consents(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<ConsentState>>, LabGuardError> {
    Ok(Json(state.privacy.consents(id).await?))
}

pub async fn record_consent(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<ConsentRequest>,
) -> Result<(StatusCode, Json<ConsentRecord>), LabGuardError> {
    let record = state
        .privacy
        .record_consent(id, &body.purpose, body.granted)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}
