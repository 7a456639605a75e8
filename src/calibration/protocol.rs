use serde::{Deserialize, Serialize};
use std::fmt;

/// Thermal accuracy tolerance, ±°C around the set point.
pub const THERMAL_ACCURACY_TOLERANCE_C: f64 = 0.5;
/// Maximum replicate standard deviation for a thermal set point, °C.
pub const THERMAL_STABILITY_MAX_STDDEV_C: f64 = 0.2;
/// Pipette systematic error tolerance, percent of nominal volume.
pub const PIPETTE_ACCURACY_TOLERANCE_PCT: f64 = 1.0;
/// Pipette random error limit (CV), percent. Must be strictly below.
pub const PIPETTE_MAX_CV_PCT: f64 = 1.0;
pub const MIN_REPLICATES: usize = 3;
/// Score deduction for each violated criterion.
pub const PENALTY_PER_VIOLATION: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Thermal,
    Pipette,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Thermal => f.write_str("thermal"),
            ProtocolKind::Pipette => f.write_str("pipette"),
        }
    }
}

/// Replicate readings taken at one target (temperature or volume).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMeasurements {
    pub target: f64,
    pub readings: Vec<f64>,
}

/// Gravimetric pipette check: readings are masses in mg, converted with `z_factor` (µL/mg).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gravimetric {
    pub z_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum CalibrationProtocol {
    Thermal {
        points: Vec<TargetMeasurements>,
    },
    Pipette {
        points: Vec<TargetMeasurements>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gravimetric: Option<Gravimetric>,
    },
}

impl CalibrationProtocol {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            CalibrationProtocol::Thermal { .. } => ProtocolKind::Thermal,
            CalibrationProtocol::Pipette { .. } => ProtocolKind::Pipette,
        }
    }

    pub fn points(&self) -> &[TargetMeasurements] {
        match self {
            CalibrationProtocol::Thermal { points } => points,
            CalibrationProtocol::Pipette { points, .. } => points,
        }
    }
}

/// Acceptance limits applied by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceCriteria {
    pub thermal_accuracy_c: f64,
    pub thermal_max_std_dev_c: f64,
    pub pipette_accuracy_pct: f64,
    pub pipette_max_cv_pct: f64,
    pub min_replicates: usize,
    pub penalty_per_violation: u32,
}

impl Default for AcceptanceCriteria {
    fn default() -> Self {
        Self {
            thermal_accuracy_c: THERMAL_ACCURACY_TOLERANCE_C,
            thermal_max_std_dev_c: THERMAL_STABILITY_MAX_STDDEV_C,
            pipette_accuracy_pct: PIPETTE_ACCURACY_TOLERANCE_PCT,
            pipette_max_cv_pct: PIPETTE_MAX_CV_PCT,
            min_replicates: MIN_REPLICATES,
            penalty_per_violation: PENALTY_PER_VIOLATION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Mean close enough to the target.
    Accuracy,
    /// Thermal spread across replicates.
    Stability,
    /// Pipette coefficient of variation.
    Precision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion: Criterion,
    pub measured: f64,
    pub limit: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointResult {
    pub target: f64,
    pub mean: f64,
    pub std_dev: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cv_percent: Option<f64>,
    pub deviation: f64,
    pub criteria: Vec<CriterionResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub protocol: ProtocolKind,
    pub outcome: Outcome,
    pub points: Vec<PointResult>,
    pub violations: usize,
    pub compliance_score: u32,
}

impl CalibrationResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}
