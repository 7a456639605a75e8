use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::time::Duration;

use crate::calibration::{AcceptanceCriteria, CalibrationValidator};
use crate::config::Config;
use crate::crypto::EncryptionService;
use crate::db::Storage;
use crate::error::LabGuardError;
use crate::handlers::{audit, calibration, crypto, keys, privacy, system};
use crate::service::maintenance_actor::{self, MaintenanceArgs};
use crate::service::{
    AuditService, CalibrationService, KeyManager, MaintenanceHandle, PrivacyService,
};

#[derive(Clone)]
pub struct LabGuardState {
    pub calibration: CalibrationService,
    pub audit: AuditService,
    pub keys: KeyManager,
    pub privacy: PrivacyService,
    pub encryption: EncryptionService,
    pub maintenance: MaintenanceHandle,
    pub body_limit: usize,
}

impl LabGuardState {
    /// Wire every service over `storage` and start the maintenance actor.
    pub async fn build(storage: Storage, cfg: &Config) -> Result<Self, LabGuardError> {
        let audit = AuditService::new(storage.clone());
        let keys = KeyManager::new(
            storage.clone(),
            cfg.master_secret.as_bytes(),
            cfg.master_salt.as_bytes(),
            cfg.pbkdf2_iterations,
            cfg.key_rotation_period(),
            audit.clone(),
        );
        let calibration = CalibrationService::new(
            storage.clone(),
            CalibrationValidator::new(AcceptanceCriteria::default()),
            audit.clone(),
        );
        let privacy = PrivacyService::new(storage, keys.clone(), audit.clone());
        let encryption = EncryptionService::new(cfg.master_secret.as_bytes(), cfg.pbkdf2_iterations);

        let maintenance = maintenance_actor::spawn(MaintenanceArgs {
            keys: keys.clone(),
            audit: audit.clone(),
            interval: Duration::from_secs(cfg.maintenance_interval_secs),
        })
        .await?;

        Ok(Self {
            calibration,
            audit,
            keys,
            privacy,
            encryption,
            maintenance,
            body_limit: cfg.body_limit_bytes,
        })
    }
}

pub fn labguard_router(state: LabGuardState) -> Router {
    let body_limit = state.body_limit;

    Router::new()
        .route("/health", get(system::health))
        .route(
            "/api/equipment",
            post(calibration::register_equipment).get(calibration::list_equipment),
        )
        .route(
            "/api/equipment/{id}",
            get(calibration::get_equipment).delete(calibration::retire_equipment),
        )
        .route(
            "/api/equipment/{id}/calibrations",
            get(calibration::list_calibrations).post(calibration::schedule_calibration),
        )
        .route(
            "/api/calibrations/{id}/start",
            post(calibration::start_calibration),
        )
        .route(
            "/api/calibrations/{id}/complete",
            post(calibration::complete_calibration),
        )
        .route(
            "/api/calibrations/{id}/cancel",
            post(calibration::cancel_calibration),
        )
        .route("/api/calibrations/overdue", get(calibration::overdue))
        .route("/api/calibrations/validate", post(calibration::validate))
        .route("/api/calibrations/simulate", post(calibration::simulate))
        .route("/api/audit/logs", get(audit::list_logs))
        .route("/api/audit/verify", get(audit::verify))
        .route("/api/compliance/check", post(audit::compliance_check))
        .route(
            "/api/compliance/reports/{framework}",
            get(audit::compliance_report),
        )
        .route("/api/keys", get(keys::list_keys))
        .route("/api/keys/{purpose}/rotate", post(keys::rotate_key))
        .route("/api/maintenance/run", post(system::run_maintenance))
        .route("/api/users", post(privacy::register_user))
        .route("/api/privacy/users/{id}/export", get(privacy::export))
        .route("/api/privacy/users/{id}/erase", post(privacy::erase))
        .route("/api/privacy/users/{id}/anonymize", post(privacy::anonymize))
        .route(
            "/api/privacy/users/{id}/consents",
            get(privacy::list_consents).post(privacy::record_consent),
        )
        .route("/api/crypto/encrypt", post(crypto::encrypt))
        .route("/api/crypto/decrypt", post(crypto::decrypt))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
