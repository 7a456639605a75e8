use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use super::protocol::{CalibrationProtocol, ProtocolKind, TargetMeasurements};
use crate::error::LabGuardError;

pub const MAX_SIMULATION_TARGETS: usize = 100;
pub const MAX_SIMULATION_REPLICATES: usize = 1_000;

/// Parameters for generating synthetic replicate readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub protocol: ProtocolKind,
    pub targets: Vec<f64>,
    #[serde(default = "default_replicates")]
    pub replicates: usize,
    /// Systematic offset added to every reading (°C or µL).
    #[serde(default)]
    pub bias: f64,
    /// Half-width of the uniform noise band (°C or µL).
    #[serde(default = "default_noise")]
    pub noise: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_replicates() -> usize {
    5
}

fn default_noise() -> f64 {
    0.05
}

pub fn simulate(req: &SimulationRequest) -> Result<CalibrationProtocol, LabGuardError> {
    if req.targets.is_empty() {
        return Err(LabGuardError::InvalidMeasurement(
            "simulation needs at least one target".to_string(),
        ));
    }
    if req.targets.len() > MAX_SIMULATION_TARGETS {
        return Err(LabGuardError::InvalidMeasurement(format!(
            "at most {MAX_SIMULATION_TARGETS} targets can be simulated"
        )));
    }
    if req.targets.iter().any(|t| !t.is_finite()) {
        return Err(LabGuardError::InvalidMeasurement(
            "targets must be finite numbers".to_string(),
        ));
    }
    // The noise band spans 2 * noise; it must stay representable.
    if !(req.noise >= 0.0 && (req.noise * 2.0).is_finite()) || !req.bias.is_finite() {
        return Err(LabGuardError::InvalidMeasurement(
            "bias and noise must be finite, noise non-negative".to_string(),
        ));
    }
    if !(1..=MAX_SIMULATION_REPLICATES).contains(&req.replicates) {
        return Err(LabGuardError::InvalidMeasurement(format!(
            "replicates must be between 1 and {MAX_SIMULATION_REPLICATES}"
        )));
    }

    let mut rng = match req.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let points = req
        .targets
        .iter()
        .map(|&target| {
            let readings = (0..req.replicates)
                .map(|_| {
                    let jitter = if req.noise > 0.0 {
                        rng.gen_range(-req.noise..=req.noise)
                    } else {
                        0.0
                    };
                    target + req.bias + jitter
                })
                .collect();
            TargetMeasurements { target, readings }
        })
        .collect();

    Ok(match req.protocol {
        ProtocolKind::Thermal => CalibrationProtocol::Thermal { points },
        ProtocolKind::Pipette => CalibrationProtocol::Pipette {
            points,
            gravimetric: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationValidator;

    fn request(seed: u64) -> SimulationRequest {
        SimulationRequest {
            protocol: ProtocolKind::Thermal,
            targets: vec![4.0, 37.0],
            replicates: 6,
            bias: 0.0,
            noise: 0.05,
            seed: Some(seed),
        }
    }

    #[test]
    fn same_seed_yields_same_readings() {
        assert_eq!(simulate(&request(7)).unwrap(), simulate(&request(7)).unwrap());
    }

    #[test]
    fn readings_stay_within_noise_band() {
        let protocol = simulate(&request(42)).unwrap();
        for p in protocol.points() {
            assert_eq!(p.readings.len(), 6);
            assert!(p.readings.iter().all(|r| (r - p.target).abs() <= 0.05 + 1e-12));
        }
        assert!(CalibrationValidator::default().validate(&protocol).unwrap().passed());
    }

    #[test]
    fn large_bias_fails_validation() {
        let mut req = request(1);
        req.bias = 1.0;
        let protocol = simulate(&req).unwrap();
        let result = CalibrationValidator::default().validate(&protocol).unwrap();
        assert!(!result.passed());
        assert_eq!(result.violations, 2);
    }

    #[test]
    fn noise_with_unrepresentable_band_is_rejected() {
        let mut req = request(3);
        req.noise = 1e308;
        let err = simulate(&req).unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidMeasurement(_)));

        req.noise = f64::MAX / 4.0;
        assert!(simulate(&req).is_ok());
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let mut req = request(5);
        req.replicates = MAX_SIMULATION_REPLICATES + 1;
        assert!(matches!(
            simulate(&req).unwrap_err(),
            LabGuardError::InvalidMeasurement(_)
        ));

        let mut req = request(5);
        req.targets = vec![37.0; MAX_SIMULATION_TARGETS + 1];
        assert!(matches!(
            simulate(&req).unwrap_err(),
            LabGuardError::InvalidMeasurement(_)
        ));

        let mut req = request(5);
        req.replicates = MAX_SIMULATION_REPLICATES;
        let protocol = simulate(&req).unwrap();
        assert_eq!(protocol.points()[0].readings.len(), MAX_SIMULATION_REPLICATES);
    }
}
