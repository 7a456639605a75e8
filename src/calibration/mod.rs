//! Calibration engine: measurement protocols, acceptance criteria and scoring.
//!
//! Everything here is pure; persistence and scheduling live in
//! `service::calibration_service`.

pub mod protocol;
pub mod simulate;
pub mod stats;
pub mod validator;

pub use protocol::{
    AcceptanceCriteria, CalibrationProtocol, CalibrationResult, Criterion, Outcome, ProtocolKind,
    TargetMeasurements,
};
pub use simulate::{SimulationRequest, simulate};
pub use validator::CalibrationValidator;
