use super::protocol::{
    AcceptanceCriteria, CalibrationProtocol, CalibrationResult, Criterion, CriterionResult,
    Outcome, PointResult, TargetMeasurements,
};
use super::stats::{coefficient_of_variation, mean, sample_std_dev};
use crate::error::LabGuardError;

/// Stateless acceptance check for calibration measurements.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationValidator {
    criteria: AcceptanceCriteria,
}

impl CalibrationValidator {
    pub fn new(criteria: AcceptanceCriteria) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &AcceptanceCriteria {
        &self.criteria
    }

    pub fn validate(
        &self,
        protocol: &CalibrationProtocol,
    ) -> Result<CalibrationResult, LabGuardError> {
        let points = protocol.points();
        if points.is_empty() {
            return Err(LabGuardError::InvalidMeasurement(
                "at least one target is required".to_string(),
            ));
        }

        let results = match protocol {
            CalibrationProtocol::Thermal { points } => points
                .iter()
                .map(|p| self.thermal_point(p))
                .collect::<Result<Vec<_>, _>>()?,
            CalibrationProtocol::Pipette {
                points,
                gravimetric,
            } => {
                let z = match gravimetric {
                    Some(g) if !(g.z_factor.is_finite() && g.z_factor > 0.0) => {
                        return Err(LabGuardError::InvalidMeasurement(format!(
                            "z_factor must be positive, got {}",
                            g.z_factor
                        )));
                    }
                    Some(g) => g.z_factor,
                    None => 1.0,
                };
                points
                    .iter()
                    .map(|p| self.pipette_point(p, z))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        let violations = results
            .iter()
            .flat_map(|p| p.criteria.iter())
            .filter(|c| !c.passed)
            .count();
        let penalty = self
            .criteria
            .penalty_per_violation
            .saturating_mul(violations as u32);
        let compliance_score = 100u32.saturating_sub(penalty);
        let outcome = if violations == 0 {
            Outcome::Pass
        } else {
            Outcome::Fail
        };

        Ok(CalibrationResult {
            protocol: protocol.kind(),
            outcome,
            points: results,
            violations,
            compliance_score,
        })
    }

    fn check_readings(&self, point: &TargetMeasurements) -> Result<(), LabGuardError> {
        if !point.target.is_finite() {
            return Err(LabGuardError::InvalidMeasurement(
                "target must be a finite number".to_string(),
            ));
        }
        if point.readings.len() < self.criteria.min_replicates {
            return Err(LabGuardError::InvalidMeasurement(format!(
                "target {} has {} readings, at least {} required",
                point.target,
                point.readings.len(),
                self.criteria.min_replicates
            )));
        }
        if let Some(bad) = point.readings.iter().find(|r| !r.is_finite()) {
            return Err(LabGuardError::InvalidMeasurement(format!(
                "target {} has a non-finite reading {}",
                point.target, bad
            )));
        }
        Ok(())
    }

    fn thermal_point(&self, point: &TargetMeasurements) -> Result<PointResult, LabGuardError> {
        self.check_readings(point)?;
        let (m, sd) = mean_and_sd(&point.readings)?;
        let deviation = m - point.target;

        let criteria = vec![
            CriterionResult {
                criterion: Criterion::Accuracy,
                measured: deviation.abs(),
                limit: self.criteria.thermal_accuracy_c,
                passed: deviation.abs() <= self.criteria.thermal_accuracy_c,
            },
            CriterionResult {
                criterion: Criterion::Stability,
                measured: sd,
                limit: self.criteria.thermal_max_std_dev_c,
                passed: sd <= self.criteria.thermal_max_std_dev_c,
            },
        ];

        Ok(PointResult {
            target: point.target,
            mean: m,
            std_dev: sd,
            cv_percent: None,
            deviation,
            criteria,
        })
    }

    fn pipette_point(
        &self,
        point: &TargetMeasurements,
        z_factor: f64,
    ) -> Result<PointResult, LabGuardError> {
        self.check_readings(point)?;
        if point.target <= 0.0 {
            return Err(LabGuardError::InvalidMeasurement(format!(
                "pipette nominal volume must be positive, got {}",
                point.target
            )));
        }
        let volumes: Vec<f64> = point.readings.iter().map(|r| r * z_factor).collect();
        let (m, sd) = mean_and_sd(&volumes)?;
        let cv = coefficient_of_variation(&volumes).ok_or_else(|| {
            LabGuardError::InvalidMeasurement(format!(
                "target {} has a zero mean volume",
                point.target
            ))
        })?;
        let deviation = m - point.target;
        let systematic_pct = deviation.abs() / point.target * 100.0;

        let criteria = vec![
            CriterionResult {
                criterion: Criterion::Accuracy,
                measured: systematic_pct,
                limit: self.criteria.pipette_accuracy_pct,
                passed: systematic_pct <= self.criteria.pipette_accuracy_pct,
            },
            CriterionResult {
                criterion: Criterion::Precision,
                measured: cv,
                limit: self.criteria.pipette_max_cv_pct,
                passed: cv < self.criteria.pipette_max_cv_pct,
            },
        ];

        Ok(PointResult {
            target: point.target,
            mean: m,
            std_dev: sd,
            cv_percent: Some(cv),
            deviation,
            criteria,
        })
    }
}

fn mean_and_sd(values: &[f64]) -> Result<(f64, f64), LabGuardError> {
    let m = mean(values)
        .ok_or_else(|| LabGuardError::InvalidMeasurement("no readings".to_string()))?;
    let sd = sample_std_dev(values).ok_or_else(|| {
        LabGuardError::InvalidMeasurement("at least two readings required".to_string())
    })?;
    Ok((m, sd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::protocol::{Gravimetric, ProtocolKind};

    fn point(target: f64, readings: &[f64]) -> TargetMeasurements {
        TargetMeasurements {
            target,
            readings: readings.to_vec(),
        }
    }

    #[test]
    fn thermal_within_tolerance_passes_with_full_score() {
        let protocol = CalibrationProtocol::Thermal {
            points: vec![
                point(37.0, &[37.1, 37.0, 36.9, 37.05]),
                point(4.0, &[4.2, 4.1, 4.15]),
            ],
        };
        let result = CalibrationValidator::default().validate(&protocol).unwrap();
        assert_eq!(result.protocol, ProtocolKind::Thermal);
        assert_eq!(result.outcome, Outcome::Pass);
        assert_eq!(result.violations, 0);
        assert_eq!(result.compliance_score, 100);
        assert_eq!(result.points.len(), 2);
    }

    #[test]
    fn thermal_offset_violates_accuracy_only() {
        let protocol = CalibrationProtocol::Thermal {
            points: vec![point(37.0, &[37.7, 37.6, 37.65])],
        };
        let result = CalibrationValidator::default().validate(&protocol).unwrap();
        assert_eq!(result.outcome, Outcome::Fail);
        assert_eq!(result.violations, 1);
        assert_eq!(result.compliance_score, 75);
        let accuracy = &result.points[0].criteria[0];
        assert_eq!(accuracy.criterion, Criterion::Accuracy);
        assert!(!accuracy.passed);
        assert!(result.points[0].criteria[1].passed);
    }

    #[test]
    fn score_never_drops_below_zero() {
        let protocol = CalibrationProtocol::Thermal {
            points: vec![
                point(20.0, &[22.0, 25.0, 28.0]),
                point(30.0, &[32.0, 35.0, 38.0]),
                point(40.0, &[42.0, 45.0, 48.0]),
            ],
        };
        let result = CalibrationValidator::default().validate(&protocol).unwrap();
        assert_eq!(result.violations, 6);
        assert_eq!(result.compliance_score, 0);
    }

    #[test]
    fn pipette_scatter_violates_precision() {
        let protocol = CalibrationProtocol::Pipette {
            points: vec![point(100.0, &[98.5, 100.0, 101.5])],
            gravimetric: None,
        };
        let result = CalibrationValidator::default().validate(&protocol).unwrap();
        let precision = &result.points[0].criteria[1];
        assert_eq!(precision.criterion, Criterion::Precision);
        assert!(!precision.passed);
        assert!(result.points[0].criteria[0].passed);
        assert_eq!(result.compliance_score, 75);
    }

    #[test]
    fn gravimetric_readings_are_converted_to_volume() {
        let z = 1.0029;
        let masses: Vec<f64> = [99.8, 99.7, 99.75, 99.72].iter().map(|v| v / z).collect();
        let protocol = CalibrationProtocol::Pipette {
            points: vec![point(100.0, &masses)],
            gravimetric: Some(Gravimetric { z_factor: z }),
        };
        let result = CalibrationValidator::default().validate(&protocol).unwrap();
        assert!(result.passed());
        assert!((result.points[0].mean - 99.7425).abs() < 1e-6);
    }

    #[test]
    fn too_few_replicates_is_rejected() {
        let protocol = CalibrationProtocol::Thermal {
            points: vec![point(37.0, &[37.0, 37.1])],
        };
        let err = CalibrationValidator::default()
            .validate(&protocol)
            .unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidMeasurement(_)));
    }

    #[test]
    fn empty_and_non_finite_inputs_are_rejected() {
        let empty = CalibrationProtocol::Thermal { points: vec![] };
        assert!(CalibrationValidator::default().validate(&empty).is_err());

        let nan = CalibrationProtocol::Thermal {
            points: vec![point(37.0, &[37.0, f64::NAN, 37.1])],
        };
        assert!(CalibrationValidator::default().validate(&nan).is_err());

        let zero_volume = CalibrationProtocol::Pipette {
            points: vec![point(0.0, &[0.0, 0.0, 0.0])],
            gravimetric: None,
        };
        assert!(CalibrationValidator::default().validate(&zero_volume).is_err());

        let bad_z = CalibrationProtocol::Pipette {
            points: vec![point(10.0, &[10.0, 10.0, 10.0])],
            gravimetric: Some(Gravimetric { z_factor: 0.0 }),
        };
        assert!(CalibrationValidator::default().validate(&bad_z).is_err());
    }

    #[test]
    fn protocol_deserializes_from_tagged_json() {
        let json = r#"{"protocol":"pipette","points":[{"target":10.0,"readings":[10.0,10.01,9.99]}]}"#;
        let protocol: CalibrationProtocol = serde_json::from_str(json).unwrap();
        assert_eq!(protocol.kind(), ProtocolKind::Pipette);
        assert_eq!(protocol.points()[0].readings.len(), 3);
    }

    #[test]
    fn deviation_equal_to_tolerance_passes() {
        let readings = [37.5, 37.5, 37.5];
        let criteria = AcceptanceCriteria {
            thermal_accuracy_c: mean(&readings).unwrap() - 37.0,
            ..AcceptanceCriteria::default()
        };
        let protocol = CalibrationProtocol::Thermal {
            points: vec![point(37.0, &readings)],
        };
        let result = CalibrationValidator::new(criteria).validate(&protocol).unwrap();
        let accuracy = &result.points[0].criteria[0];
        assert_eq!(accuracy.measured, accuracy.limit);
        assert!(accuracy.passed);
        assert_eq!(result.outcome, Outcome::Pass);
    }

    #[test]
    fn cv_equal_to_limit_fails_precision() {
        let readings = [99.0, 100.0, 101.0];
        let criteria = AcceptanceCriteria {
            pipette_max_cv_pct: coefficient_of_variation(&readings).unwrap(),
            ..AcceptanceCriteria::default()
        };
        let protocol = CalibrationProtocol::Pipette {
            points: vec![point(100.0, &readings)],
            gravimetric: None,
        };
        let result = CalibrationValidator::new(criteria).validate(&protocol).unwrap();
        let precision = &result.points[0].criteria[1];
        assert_eq!(precision.criterion, Criterion::Precision);
        assert_eq!(precision.measured, precision.limit);
        assert!(!precision.passed);
        assert!(result.points[0].criteria[0].passed);
        assert_eq!(result.violations, 1);
    }

    #[test]
    fn pipette_systematic_error_equal_to_tolerance_passes() {
        let readings = [101.0, 101.0, 101.0];
        let criteria = AcceptanceCriteria {
            pipette_accuracy_pct: (mean(&readings).unwrap() - 100.0).abs() / 100.0 * 100.0,
            ..AcceptanceCriteria::default()
        };
        let protocol = CalibrationProtocol::Pipette {
            points: vec![point(100.0, &readings)],
            gravimetric: None,
        };
        let result = CalibrationValidator::new(criteria).validate(&protocol).unwrap();
        let accuracy = &result.points[0].criteria[0];
        assert_eq!(accuracy.measured, accuracy.limit);
        assert!(accuracy.passed);
    }
}
