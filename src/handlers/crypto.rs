use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ApiJson;
use crate::types::{AuditEvent, EncryptedField};
use crate::{LabGuardError, router::LabGuardState};

#[derive(Debug, Deserialize)]
pub struct EncryptRequest {
    pub plaintext: String,
    /// Seal under the managed data key for this purpose instead of the
    /// passphrase-derived field token.
    #[serde(default)]
    pub purpose: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sealed {
    Managed(EncryptedField),
    Token { token: String },
}

#[derive(Debug, Serialize)]
pub struct DecryptResponse {
    pub plaintext: String,
}

pub async fn encrypt(
    State(state): State<LabGuardState>,
    ApiJson(body): ApiJson<EncryptRequest>,
) -> Result<Json<Sealed>, LabGuardError> {
    let sealed = match body.purpose.as_deref() {
        Some(purpose) => Sealed::Managed(state.keys.encrypt_field(purpose, &body.plaintext).await?),
        None => Sealed::Token {
            token: state.encryption.seal_field(body.plaintext).await?,
        },
    };
    Ok(Json(sealed))
}

pub async fn decrypt(
    State(state): State<LabGuardState>,
    ApiJson(body): ApiJson<Sealed>,
) -> Result<Json<DecryptResponse>, LabGuardError> {
    let (plaintext, key_id) = match &body {
        Sealed::Managed(field) => (
            state.keys.decrypt_field(field).await?,
            Some(field.key_id.clone()),
        ),
        Sealed::Token { token } => (state.encryption.open_field(token.clone()).await?, None),
    };

    state
        .audit
        .record(
            AuditEvent::new("crypto.decrypt", "encrypted_field")
                .details(json!({ "key_id": key_id })),
        )
        .await?;

    Ok(Json(DecryptResponse { plaintext }))
}
