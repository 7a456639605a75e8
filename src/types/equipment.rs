use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::calibration::{CalibrationResult, ProtocolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentKind {
    Thermometer,
    Incubator,
    Refrigerator,
    Freezer,
    WaterBath,
    Pipette,
    Other,
}

impl EquipmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentKind::Thermometer => "thermometer",
            EquipmentKind::Incubator => "incubator",
            EquipmentKind::Refrigerator => "refrigerator",
            EquipmentKind::Freezer => "freezer",
            EquipmentKind::WaterBath => "water_bath",
            EquipmentKind::Pipette => "pipette",
            EquipmentKind::Other => "other",
        }
    }

    /// Whether measurements of this protocol are meaningful for this kind.
    pub fn accepts(&self, protocol: ProtocolKind) -> bool {
        match self {
            EquipmentKind::Pipette => protocol == ProtocolKind::Pipette,
            EquipmentKind::Other => true,
            _ => protocol == ProtocolKind::Thermal,
        }
    }
}

impl FromStr for EquipmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "thermometer" => EquipmentKind::Thermometer,
            "incubator" => EquipmentKind::Incubator,
            "refrigerator" => EquipmentKind::Refrigerator,
            "freezer" => EquipmentKind::Freezer,
            "water_bath" => EquipmentKind::WaterBath,
            "pipette" => EquipmentKind::Pipette,
            "other" => EquipmentKind::Other,
            other => return Err(format!("unknown equipment kind `{other}`")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EquipmentStatus {
    Active,
    OutOfService,
    Retired,
}

impl EquipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentStatus::Active => "ACTIVE",
            EquipmentStatus::OutOfService => "OUT_OF_SERVICE",
            EquipmentStatus::Retired => "RETIRED",
        }
    }
}

impl FromStr for EquipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ACTIVE" => EquipmentStatus::Active,
            "OUT_OF_SERVICE" => EquipmentStatus::OutOfService,
            "RETIRED" => EquipmentStatus::Retired,
            other => return Err(format!("unknown equipment status `{other}`")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: i64,
    pub name: String,
    pub kind: EquipmentKind,
    pub serial_number: String,
    pub location: Option<String>,
    pub calibration_interval_days: i64,
    pub last_calibrated_at: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub status: EquipmentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEquipment {
    pub name: String,
    pub kind: EquipmentKind,
    pub serial_number: String,
    #[serde(default)]
    pub location: Option<String>,
    pub calibration_interval_days: i64,
    /// First calibration due date; defaults to now.
    #[serde(default)]
    pub next_due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalibrationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl CalibrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationStatus::Pending => "PENDING",
            CalibrationStatus::InProgress => "IN_PROGRESS",
            CalibrationStatus::Completed => "COMPLETED",
            CalibrationStatus::Failed => "FAILED",
            CalibrationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CalibrationStatus::Completed | CalibrationStatus::Failed | CalibrationStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: CalibrationStatus) -> bool {
        use CalibrationStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }
}

impl fmt::Display for CalibrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalibrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PENDING" => CalibrationStatus::Pending,
            "IN_PROGRESS" => CalibrationStatus::InProgress,
            "COMPLETED" => CalibrationStatus::Completed,
            "FAILED" => CalibrationStatus::Failed,
            "CANCELLED" => CalibrationStatus::Cancelled,
            other => return Err(format!("unknown calibration status `{other}`")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub id: i64,
    pub equipment_id: i64,
    pub scheduled_for: DateTime<Utc>,
    pub performed_at: Option<DateTime<Utc>>,
    pub performed_by: Option<i64>,
    pub status: CalibrationStatus,
    pub result: Option<CalibrationResult>,
    pub compliance_score: Option<u32>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_transition() {
        for from in [
            CalibrationStatus::Completed,
            CalibrationStatus::Failed,
            CalibrationStatus::Cancelled,
        ] {
            assert!(from.is_terminal());
            for to in [
                CalibrationStatus::Pending,
                CalibrationStatus::InProgress,
                CalibrationStatus::Completed,
                CalibrationStatus::Failed,
                CalibrationStatus::Cancelled,
            ] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn pending_can_complete_directly_but_not_go_back() {
        assert!(CalibrationStatus::Pending.can_transition_to(CalibrationStatus::Completed));
        assert!(!CalibrationStatus::InProgress.can_transition_to(CalibrationStatus::Pending));
    }

    #[test]
    fn equipment_kind_gates_protocols() {
        assert!(EquipmentKind::Incubator.accepts(ProtocolKind::Thermal));
        assert!(!EquipmentKind::Incubator.accepts(ProtocolKind::Pipette));
        assert!(EquipmentKind::Pipette.accepts(ProtocolKind::Pipette));
        assert!(EquipmentKind::Other.accepts(ProtocolKind::Pipette));
        assert_eq!(
            "water_bath".parse::<EquipmentKind>(),
            Ok(EquipmentKind::WaterBath)
        );
    }
}
