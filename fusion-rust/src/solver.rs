//! # solver
//!
//! Levenberg-Marquardt localisation over exactly three delay/Doppler
//! detections: six residuals against a six-dimensional position+velocity
//! state, solved in the ENU frame of the mean receiver position.
//!
//! The initial position comes from the spherical-intersection closed form;
//! the damping factor shrinks on accepted steps and grows on rejected ones.
//! Non-convergence or a residual norm above the configured ceiling yields
//! no output, like every other degenerate-geometry case.

use nalgebra::{Matrix6, Vector6};
use tracing::debug;

use radar_types::geometry::{distance_lla, enu_to_lla, lla_to_enu};
use radar_types::SPEED_OF_LIGHT_MPS;

use crate::associator::AssociatedDetections;
use crate::localiser::{LocalisedTarget, LocalisedTargets};
use crate::radar_client::RadarData;
use crate::spherical::{self, BistaticMeasurement};

/// Detections consumed per solve; the state is exactly determined.
const TRIPLE: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    pub max_iterations: usize,
    /// Stop once the state update norm falls below this
    pub convergence_threshold: f64,
    /// Reject solutions whose final residual norm exceeds this
    pub residual_ceiling: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 1e-6,
            residual_ceiling: 1000.0,
        }
    }
}

/// One detection with the geometry needed by the residual model.
#[derive(Debug, Clone, Copy)]
pub struct SolverDetection {
    pub sensor_lla: [f64; 3],
    pub ioo_lla: [f64; 3],
    /// Centre frequency in Hz
    pub fc_hz: f64,
    pub bistatic_range_km: f64,
    pub doppler_hz: f64,
    pub timestamp: f64,
}

pub struct LmSolver {
    config: SolverConfig,
}

impl LmSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn process(
        &self,
        associated: &AssociatedDetections,
        radar_data: &RadarData,
    ) -> LocalisedTargets {
        let mut output = LocalisedTargets::new();

        for (hex, detections) in associated {
            if detections.len() < TRIPLE {
                continue;
            }

            let mut triple = Vec::with_capacity(TRIPLE);
            for detection in detections.iter().take(TRIPLE) {
                let Some(config) = radar_data
                    .get(&detection.radar)
                    .and_then(|s| s.config.as_ref())
                else {
                    break;
                };
                let Some(fc) = config.fc() else {
                    break;
                };
                triple.push(SolverDetection {
                    sensor_lla: config.location.rx.lla(),
                    ioo_lla: config.location.tx.lla(),
                    fc_hz: fc,
                    bistatic_range_km: detection.delay,
                    doppler_hz: detection.doppler,
                    timestamp: detection.timestamp,
                });
            }
            if triple.len() < TRIPLE {
                continue;
            }

            match solve_position_velocity(&triple, &self.config) {
                Some((lla, velocity_enu)) => {
                    output.insert(
                        hex.clone(),
                        LocalisedTarget {
                            points: vec![lla],
                            velocity_enu: Some(velocity_enu),
                        },
                    );
                }
                None => debug!("solver: no convergence for {hex}"),
            }
        }

        output
    }
}

// ── Residual model ────────────────────────────────────────────────────────────

/// ENU geometry of one detection relative to the solve reference.
struct Site {
    tx: [f64; 3],
    rx: [f64; 3],
    baseline_m: f64,
    range_m: f64,
    doppler_hz: f64,
    fc_hz: f64,
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Six residuals: three bistatic-range errors (m), three Doppler errors (Hz).
fn residuals(state: &Vector6<f64>, sites: &[Site]) -> Vector6<f64> {
    let p = [state[0], state[1], state[2]];
    let v = [state[3], state[4], state[5]];

    let mut out = Vector6::zeros();
    for (i, site) in sites.iter().enumerate() {
        let d_tx = [p[0] - site.tx[0], p[1] - site.tx[1], p[2] - site.tx[2]];
        let d_rx = [p[0] - site.rx[0], p[1] - site.rx[1], p[2] - site.rx[2]];
        let r_tx = norm(d_tx).max(1.0);
        let r_rx = norm(d_rx).max(1.0);

        out[i] = (r_tx + r_rx - site.baseline_m) - site.range_m;

        let range_rate = (0..3)
            .map(|k| v[k] * (d_tx[k] / r_tx + d_rx[k] / r_rx))
            .sum::<f64>();
        let doppler_pred = -(site.fc_hz / SPEED_OF_LIGHT_MPS) * range_rate;
        out[i + TRIPLE] = doppler_pred - site.doppler_hz;
    }
    out
}

/// Central-difference Jacobian; 1 m position steps, 0.1 m/s velocity steps.
fn jacobian(state: &Vector6<f64>, sites: &[Site]) -> Matrix6<f64> {
    let mut j = Matrix6::zeros();
    for col in 0..6 {
        let h = if col < 3 { 1.0 } else { 0.1 };
        let mut fwd = *state;
        let mut bwd = *state;
        fwd[col] += h;
        bwd[col] -= h;
        let df = residuals(&fwd, sites) - residuals(&bwd, sites);
        for row in 0..6 {
            j[(row, col)] = df[row] / (2.0 * h);
        }
    }
    j
}

/// Solve one detection triple for position and velocity.
///
/// Returns the LLA point and ENU velocity, or None on degenerate geometry,
/// non-convergence, or a residual above the ceiling.
pub fn solve_position_velocity(
    detections: &[SolverDetection],
    config: &SolverConfig,
) -> Option<([f64; 3], [f64; 3])> {
    if detections.len() < TRIPLE {
        return None;
    }

    // Reference: mean receiver position
    let mut reference = [0.0; 3];
    for d in detections.iter().take(TRIPLE) {
        for k in 0..3 {
            reference[k] += d.sensor_lla[k] / TRIPLE as f64;
        }
    }

    let sites: Vec<Site> = detections
        .iter()
        .take(TRIPLE)
        .map(|d| Site {
            tx: lla_to_enu(d.ioo_lla, reference),
            rx: lla_to_enu(d.sensor_lla, reference),
            baseline_m: distance_lla(d.ioo_lla, d.sensor_lla),
            range_m: d.bistatic_range_km * 1000.0,
            doppler_hz: d.doppler_hz,
            fc_hz: d.fc_hz,
        })
        .collect();

    // Initial guess: spherical intersection at zero velocity, else the
    // reference point at a nominal cruise altitude
    let measurements: Vec<BistaticMeasurement> = detections
        .iter()
        .take(TRIPLE)
        .map(|d| BistaticMeasurement {
            tx_lla: d.ioo_lla,
            rx_lla: d.sensor_lla,
            delay_km: d.bistatic_range_km,
        })
        .collect();
    let guess_lla =
        spherical::solve(&measurements).unwrap_or([reference[0], reference[1], 5000.0]);
    let guess_enu = lla_to_enu(guess_lla, reference);

    let mut state = Vector6::new(guess_enu[0], guess_enu[1], guess_enu[2], 0.0, 0.0, 0.0);
    let mut lambda = 1e-2;
    let mut cost = residuals(&state, &sites).norm_squared();
    let mut converged = false;

    for _ in 0..config.max_iterations {
        let r = residuals(&state, &sites);
        let j = jacobian(&state, &sites);
        let jtj = j.transpose() * j;
        let jtr = j.transpose() * r;

        let damped = jtj + Matrix6::identity() * lambda;
        let Some(inverse) = damped.try_inverse() else {
            lambda *= 10.0;
            continue;
        };
        let step = -(inverse * jtr);
        if !step.iter().all(|x| x.is_finite()) {
            return None;
        }

        let candidate = state + step;
        let candidate_cost = residuals(&candidate, &sites).norm_squared();
        if candidate_cost < cost {
            state = candidate;
            cost = candidate_cost;
            lambda = (lambda / 10.0).max(1e-12);
            if step.norm() < config.convergence_threshold {
                converged = true;
                break;
            }
        } else {
            lambda *= 10.0;
        }
    }

    if !converged || cost.sqrt() > config.residual_ceiling {
        return None;
    }

    let lla = enu_to_lla([state[0], state[1], state[2]], reference);
    Some((lla, [state[3], state[4], state[5]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use radar_types::geometry::bistatic_doppler_hz;

    const TX: [f64; 3] = [-34.9000, 138.5500, 150.0];
    const FC: f64 = 204_640_000.0;

    fn receivers() -> [[f64; 3]; 3] {
        [
            [-34.8500, 138.6500, 30.0],
            [-34.9900, 138.6300, 45.0],
            [-34.9200, 138.4700, 20.0],
        ]
    }

    fn synthetic_triple(tgt: [f64; 3], vel_enu: [f64; 3]) -> Vec<SolverDetection> {
        receivers()
            .iter()
            .map(|&rx| {
                let range_m =
                    distance_lla(TX, tgt) + distance_lla(rx, tgt) - distance_lla(TX, rx);
                let doppler = bistatic_doppler_hz(TX, rx, tgt, vel_enu, FC);
                SolverDetection {
                    sensor_lla: rx,
                    ioo_lla: TX,
                    fc_hz: FC,
                    bistatic_range_km: range_m / 1000.0,
                    doppler_hz: doppler,
                    timestamp: 1000.0,
                }
            })
            .collect()
    }

    #[test]
    fn converges_on_static_target() {
        let tgt = [-34.9286, 138.5999, 3000.0];
        let (lla, vel) =
            solve_position_velocity(&synthetic_triple(tgt, [0.0, 0.0, 0.0]), &SolverConfig::default())
                .expect("should converge");
        assert!(distance_lla(lla, tgt) < 50.0);
        for component in vel {
            assert!(component.abs() < 10.0);
        }
    }

    #[test]
    fn recovers_easterly_velocity() {
        let tgt = [-34.9286, 138.5999, 3000.0];
        let truth_vel = [250.0, 0.0, 0.0];
        let (lla, vel) =
            solve_position_velocity(&synthetic_triple(tgt, truth_vel), &SolverConfig::default())
                .expect("should converge");

        assert!(distance_lla(lla, tgt) < 50.0);
        for k in 0..3 {
            assert!(
                (vel[k] - truth_vel[k]).abs() < 10.0,
                "velocity component {k} is {} want {}",
                vel[k],
                truth_vel[k]
            );
        }
    }

    #[test]
    fn inconsistent_ranges_are_rejected() {
        let tgt = [-34.9286, 138.5999, 3000.0];
        let mut triple = synthetic_triple(tgt, [0.0, 0.0, 0.0]);
        // 30 km of contradiction in one range: no state satisfies the triple
        triple[0].bistatic_range_km += 30.0;
        let config = SolverConfig {
            residual_ceiling: 100.0,
            ..SolverConfig::default()
        };
        assert!(solve_position_velocity(&triple, &config).is_none());
    }
}
