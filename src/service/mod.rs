pub mod audit_service;
pub mod calibration_service;
pub mod key_manager;
pub mod maintenance_actor;
pub mod privacy_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use audit_service::AuditService;
pub use calibration_service::{CalibrationService, OverdueReport};
pub use key_manager::KeyManager;
pub use maintenance_actor::{MaintenanceArgs, MaintenanceHandle, MaintenanceReport};
pub use privacy_service::{PII_PURPOSE, PrivacyService};
