use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::service::MaintenanceReport;
use crate::{LabGuardError, router::LabGuardState};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Rotate expired keys and run a compliance check right away.
pub async fn run_maintenance(
    State(state): State<LabGuardState>,
) -> Result<Json<MaintenanceReport>, LabGuardError> {
    Ok(Json(state.maintenance.run_now().await?))
}
