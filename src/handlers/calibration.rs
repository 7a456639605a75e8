use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiJson, ApiPath};
use crate::calibration::{self, CalibrationProtocol, CalibrationResult, SimulationRequest};
use crate::service::OverdueReport;
use crate::types::timestamp;
use crate::types::{CalibrationRecord, Equipment, NewEquipment};
use crate::{LabGuardError, router::LabGuardState};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScheduleRequest {
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub measurements: CalibrationProtocol,
    #[serde(default)]
    pub performed_by: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SimulationResponse {
    pub measurements: CalibrationProtocol,
    pub result: CalibrationResult,
}

pub async fn register_equipment(
    State(state): State<LabGuardState>,
    ApiJson(body): ApiJson<NewEquipment>,
) -> Result<(StatusCode, Json<Equipment>), LabGuardError> {
    let equipment = state.calibration.register_equipment(body).await?;
    Ok((StatusCode::CREATED, Json(equipment)))
}

pub async fn list_equipment(
    State(state): State<LabGuardState>,
) -> Result<Json<Vec<Equipment>>, LabGuardError> {
    Ok(Json(state.calibration.list_equipment().await?))
}

pub async fn get_equipment(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Equipment>, LabGuardError> {
    Ok(Json(state.calibration.get_equipment(id).await?))
}

pub async fn retire_equipment(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Equipment>, LabGuardError> {
    Ok(Json(state.calibration.retire_equipment(id).await?))
}

pub async fn list_calibrations(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<CalibrationRecord>>, LabGuardError> {
    Ok(Json(state.calibration.list_records(id).await?))
}

pub async fn schedule_calibration(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<ScheduleRequest>,
) -> Result<(StatusCode, Json<CalibrationRecord>), LabGuardError> {
    let record = state.calibration.schedule(id, body.scheduled_for).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn start_calibration(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<CalibrationRecord>, LabGuardError> {
    Ok(Json(state.calibration.start(id).await?))
}

pub async fn cancel_calibration(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<CalibrationRecord>, LabGuardError> {
    Ok(Json(state.calibration.cancel(id).await?))
}

pub async fn complete_calibration(
    State(state): State<LabGuardState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<CompleteRequest>,
) -> Result<Json<CalibrationRecord>, LabGuardError> {
    let record = state
        .calibration
        .complete(id, &body.measurements, body.performed_by, body.notes)
        .await?;
    Ok(Json(record))
}

pub async fn overdue(
    State(state): State<LabGuardState>,
) -> Result<Json<OverdueReport>, LabGuardError> {
    Ok(Json(state.calibration.overdue(timestamp::now()).await?))
}

/// Stateless check; nothing is stored.
pub async fn validate(
    State(state): State<LabGuardState>,
    ApiJson(body): ApiJson<CalibrationProtocol>,
) -> Result<Json<CalibrationResult>, LabGuardError> {
    Ok(Json(state.calibration.validator().validate(&body)?))
}

pub async fn simulate(
    State(state): State<LabGuardState>,
    ApiJson(body): ApiJson<SimulationRequest>,
) -> Result<Json<SimulationResponse>, LabGuardError> {
    let measurements = calibration::simulate(&body)?;
    let result = state.calibration.validator().validate(&measurements)?;
    Ok(Json(SimulationResponse {
        measurements,
        result,
    }))
}
