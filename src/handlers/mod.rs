pub mod audit;
pub mod calibration;
pub mod crypto;
pub mod keys;
pub mod privacy;
pub mod system;

use axum::{
    Json, RequestPartsExt,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, rejection::JsonRejection},
    http::{StatusCode, request::Parts},
};
use serde::de::DeserializeOwned;

use crate::LabGuardError;

/// `Json<T>` whose rejections use the crate's error body. Every body
/// rejection is a 400 except an over-limit body, which stays 413.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = LabGuardError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(body)) => Ok(ApiJson(body)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> LabGuardError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        LabGuardError::PayloadTooLarge(rejection.body_text())
    } else {
        LabGuardError::InvalidJson(rejection.body_text())
    }
}

/// `Path<T>` with rejections as 400 `INVALID_REQUEST`.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send + 'static,
{
    type Rejection = LabGuardError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extract::<Path<T>>().await {
            Ok(Path(value)) => Ok(ApiPath(value)),
            Err(rejection) => Err(LabGuardError::InvalidRequest(rejection.body_text())),
        }
    }
}

/// `Query<T>` with rejections as 400 `INVALID_REQUEST`.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send + 'static,
{
    type Rejection = LabGuardError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extract::<Query<T>>().await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(LabGuardError::InvalidRequest(rejection.body_text())),
        }
    }
}
