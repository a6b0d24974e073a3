//! Vibration-energy gate deciding whether a burst is worth transmitting

use crate::burst::{mg_to_mps2, SampleBurst};

/// Outcome of the energy gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Transmit,
    Suppress,
}

impl GateDecision {
    /// Inclusive threshold: `rms == threshold` transmits
    ///
    /// Compared at the threshold's `f32` precision, so a configured
    /// `9.80665` matches a 1 g burst.
    pub fn classify(rms_mps2: f64, threshold_mps2: f32) -> Self {
        if rms_mps2 as f32 >= threshold_mps2 {
            GateDecision::Transmit
        } else {
            GateDecision::Suppress
        }
    }
}

/// Gate decision together with the statistic it was based on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateVerdict {
    pub decision: GateDecision,
    pub rms_mps2: f64,
    pub threshold_mps2: f32,
}

/// RMS of the 3-axis magnitude over the burst, in m/s²
///
/// Squares are accumulated in `f64` so that summing up to 2000 terms does not
/// bias the result.
pub fn magnitude_rms(burst: &SampleBurst) -> f64 {
    let n = burst.len();
    if n == 0 {
        return 0.0;
    }

    let sum_sq: f64 = burst
        .accel_x_mg()
        .iter()
        .zip(burst.accel_y_mg())
        .zip(burst.accel_z_mg())
        .map(|((&x, &y), &z)| {
            let ax = mg_to_mps2(x);
            let ay = mg_to_mps2(y);
            let az = mg_to_mps2(z);
            ax * ax + ay * ay + az * az
        })
        .sum();

    (sum_sq / n as f64).sqrt()
}

/// Decide whether `burst` is transmitted
pub fn decide(burst: &SampleBurst, threshold_mps2: f32) -> GateDecision {
    GateDecision::classify(magnitude_rms(burst), threshold_mps2)
}

/// Energy gate bound to one threshold
#[derive(Debug, Clone, Copy)]
pub struct EnergyGate {
    threshold_mps2: f32,
}

impl EnergyGate {
    pub fn new(threshold_mps2: f32) -> Self {
        Self { threshold_mps2 }
    }

    /// Compute the statistic and the decision for `burst`
    pub fn evaluate(&self, burst: &SampleBurst) -> GateVerdict {
        let rms_mps2 = magnitude_rms(burst);
        let decision = GateDecision::classify(rms_mps2, self.threshold_mps2);
        tracing::info!(
            mag_rms = format_args!("{:.3}", rms_mps2),
            threshold = format_args!("{:.2}", self.threshold_mps2),
            ?decision,
            "energy gate"
        );
        GateVerdict {
            decision,
            rms_mps2,
            threshold_mps2: self.threshold_mps2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burst(x: Vec<i16>, y: Vec<i16>, z: Vec<i16>) -> SampleBurst {
        let dt = vec![1000; x.len() - 1];
        SampleBurst::from_parts(0, x, y, z, dt).unwrap()
    }

    #[test]
    fn test_one_g_on_single_axis() {
        let b = burst(vec![0; 100], vec![0; 100], vec![1000; 100]);
        assert!((magnitude_rms(&b) - 9.80665).abs() < 1e-9);

        let b = burst(vec![-1000; 50], vec![0; 50], vec![0; 50]);
        assert!((magnitude_rms(&b) - 9.80665).abs() < 1e-9);
    }

    #[test]
    fn test_order_independent() {
        let x: Vec<i16> = (0..200).map(|i| ((i * 37) % 900 - 450) as i16).collect();
        let y: Vec<i16> = (0..200).map(|i| ((i * 53) % 700 - 350) as i16).collect();
        let z: Vec<i16> = (0..200).map(|i| (1000 + (i * 11) % 300) as i16).collect();
        let forward = magnitude_rms(&burst(x.clone(), y.clone(), z.clone()));

        let mut rx = x;
        let mut ry = y;
        let mut rz = z;
        rx.reverse();
        ry.reverse();
        rz.reverse();
        // Rotate as well as reverse to get a non-trivial permutation.
        rx.rotate_left(17);
        ry.rotate_left(17);
        rz.rotate_left(17);
        let permuted = magnitude_rms(&burst(rx, ry, rz));

        assert!((forward - permuted).abs() < 1e-9);
    }

    #[test]
    fn test_mixed_axes() {
        // 3-4-5 triangle in g: magnitude 5 g everywhere.
        let b = burst(vec![3000; 10], vec![4000; 10], vec![0; 10]);
        assert!((magnitude_rms(&b) - 5.0 * 9.80665).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert_eq!(GateDecision::classify(2.5, 2.5), GateDecision::Transmit);
        assert_eq!(GateDecision::classify(2.4999, 2.5), GateDecision::Suppress);
        assert_eq!(GateDecision::classify(0.0, 0.0), GateDecision::Transmit);

        let still = burst(vec![0; 10], vec![0; 10], vec![0; 10]);
        assert_eq!(decide(&still, 0.0), GateDecision::Transmit);
    }

    #[test]
    fn test_threshold_equal_to_one_g_transmits() {
        let b = burst(vec![0; 4], vec![0; 4], vec![1000; 4]);
        // The f32 threshold widens to 9.806650161..., above the f64 RMS.
        assert!(f64::from(9.80665_f32) > magnitude_rms(&b));
        assert_eq!(decide(&b, 9.80665_f32), GateDecision::Transmit);
        assert_eq!(
            EnergyGate::new(9.80665_f32).evaluate(&b).decision,
            GateDecision::Transmit
        );
        assert_eq!(decide(&b, 9.8067_f32), GateDecision::Suppress);
    }

    #[test]
    fn test_gate_against_one_g() {
        let b = burst(vec![0; 4], vec![0; 4], vec![1000; 4]);
        assert_eq!(decide(&b, 9.8), GateDecision::Transmit);
        assert_eq!(decide(&b, 10.78), GateDecision::Suppress);

        let verdict = EnergyGate::new(9.0).evaluate(&b);
        assert_eq!(verdict.decision, GateDecision::Transmit);
        assert!((verdict.rms_mps2 - 9.807).abs() < 1e-3);
        assert_eq!(verdict.threshold_mps2, 9.0);
    }
}
