//! # spherical
//!
//! Closed-form spherical-intersection localiser over three receivers sharing
//! one illuminator.
//!
//! Working in the ENU frame of the first receiver's transmitter, each
//! bistatic range pins the total path `ρ_i = b_i + L_i = ‖x‖ + ‖x − s_i‖`
//! to receiver `s_i`. Squaring gives the linear relation
//! `s_iᵀ x = (‖s_i‖² − ρ_i²)/2 + ρ_i r` in the unknowns `(x, r = ‖x‖)`;
//! three receivers make the position a linear function of `r`, and
//! substituting back yields one quadratic in `r`. Degenerate geometry
//! (singular receiver matrix, negative discriminant, no positive root)
//! produces no point.

use nalgebra::{Matrix3, Vector3};
use tracing::debug;

use radar_types::geometry::{distance_lla, enu_to_lla, lla_to_enu};

use crate::associator::AssociatedDetections;
use crate::localiser::{LocalisedTarget, LocalisedTargets, MIN_RADARS};
use crate::radar_client::RadarData;

pub struct SphericalIntersection;

/// One receiver's contribution: its own geometry plus the measured delay.
#[derive(Debug, Clone, Copy)]
pub struct BistaticMeasurement {
    pub tx_lla: [f64; 3],
    pub rx_lla: [f64; 3],
    /// Bistatic delay in km
    pub delay_km: f64,
}

impl SphericalIntersection {
    pub fn process(
        &self,
        associated: &AssociatedDetections,
        radar_data: &RadarData,
    ) -> LocalisedTargets {
        let mut output = LocalisedTargets::new();

        for (hex, detections) in associated {
            if detections.len() < MIN_RADARS {
                continue;
            }

            let mut measurements = Vec::with_capacity(MIN_RADARS);
            for detection in detections.iter().take(MIN_RADARS) {
                let Some(config) = radar_data
                    .get(&detection.radar)
                    .and_then(|s| s.config.as_ref())
                else {
                    break;
                };
                measurements.push(BistaticMeasurement {
                    tx_lla: config.location.tx.lla(),
                    rx_lla: config.location.rx.lla(),
                    delay_km: detection.delay,
                });
            }
            if measurements.len() < MIN_RADARS {
                continue;
            }

            match solve(&measurements) {
                Some(lla) => {
                    output.insert(
                        hex.clone(),
                        LocalisedTarget {
                            points: vec![lla],
                            velocity_enu: None,
                        },
                    );
                }
                None => debug!("spherical: degenerate geometry for {hex}"),
            }
        }

        output
    }
}

/// Solve three bistatic ranges for one LLA point.
///
/// The first measurement's transmitter is treated as the common illuminator.
pub fn solve(measurements: &[BistaticMeasurement]) -> Option<[f64; 3]> {
    if measurements.len() < 3 {
        return None;
    }
    let tx_ref = measurements[0].tx_lla;

    // Receiver positions and total path lengths in the tx ENU frame
    let mut s = [Vector3::zeros(); 3];
    let mut rho = [0.0; 3];
    for (i, m) in measurements.iter().take(3).enumerate() {
        let enu = lla_to_enu(m.rx_lla, tx_ref);
        s[i] = Vector3::new(enu[0], enu[1], enu[2]);
        rho[i] = m.delay_km * 1000.0 + distance_lla(tx_ref, m.rx_lla);
    }

    let matrix = Matrix3::from_rows(&[s[0].transpose(), s[1].transpose(), s[2].transpose()]);
    let inverse = matrix.try_inverse()?;

    let a = Vector3::new(
        (s[0].norm_squared() - rho[0] * rho[0]) / 2.0,
        (s[1].norm_squared() - rho[1] * rho[1]) / 2.0,
        (s[2].norm_squared() - rho[2] * rho[2]) / 2.0,
    );
    let b = Vector3::new(rho[0], rho[1], rho[2]);

    // x = u + v·r with r = ‖x‖ still unknown
    let u = inverse * a;
    let v = inverse * b;

    // ‖u + v·r‖² = r²  →  (‖v‖² − 1)r² + 2(u·v)r + ‖u‖² = 0
    let qa = v.norm_squared() - 1.0;
    let qb = 2.0 * u.dot(&v);
    let qc = u.norm_squared();

    let mut roots: Vec<f64> = Vec::with_capacity(2);
    if qa.abs() < 1e-12 {
        if qb.abs() < 1e-12 {
            return None;
        }
        roots.push(-qc / qb);
    } else {
        let discriminant = qb * qb - 4.0 * qa * qc;
        if discriminant < 0.0 {
            return None;
        }
        let sqrt_d = discriminant.sqrt();
        roots.push((-qb + sqrt_d) / (2.0 * qa));
        roots.push((-qb - sqrt_d) / (2.0 * qa));
    }

    // Of the admissible roots, prefer the solution with positive altitude
    let mut best: Option<[f64; 3]> = None;
    for r in roots {
        if !r.is_finite() || r <= 0.0 {
            continue;
        }
        let x = u + v * r;
        let lla = enu_to_lla([x[0], x[1], x[2]], tx_ref);
        match best {
            None => best = Some(lla),
            Some(current) if lla[2] > current[2] => best = Some(lla),
            Some(_) => {}
        }
    }

    best.filter(|lla| lla[2] > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::associator::AssociatedDetection;
    use crate::radar_client::{RadarData, RadarSnapshot};
    use radar_types::{CaptureConfig, RadarConfig, SiteLocation, SitePair};

    const TX: [f64; 3] = [-34.9000, 138.5500, 150.0];

    fn receivers() -> Vec<(String, [f64; 3])> {
        vec![
            ("radar-a".to_string(), [-34.8500, 138.6500, 30.0]),
            ("radar-b".to_string(), [-34.9900, 138.6300, 45.0]),
            ("radar-c".to_string(), [-34.9200, 138.4700, 20.0]),
        ]
    }

    fn delay_km(rx: [f64; 3], tgt: [f64; 3]) -> f64 {
        (distance_lla(TX, tgt) + distance_lla(rx, tgt) - distance_lla(TX, rx)) / 1000.0
    }

    fn measurements_for(tgt: [f64; 3]) -> Vec<BistaticMeasurement> {
        receivers()
            .into_iter()
            .map(|(_, rx)| BistaticMeasurement {
                tx_lla: TX,
                rx_lla: rx,
                delay_km: delay_km(rx, tgt),
            })
            .collect()
    }

    #[test]
    fn recovers_known_target() {
        let tgt = [-34.9286, 138.5999, 3000.0];
        let lla = solve(&measurements_for(tgt)).expect("solvable geometry");
        assert!(
            distance_lla(lla, tgt) < 50.0,
            "solution {:.1} m off truth",
            distance_lla(lla, tgt)
        );
    }

    #[test]
    fn collinear_receivers_are_degenerate() {
        // All receivers on one ray from the transmitter: singular matrix
        let tgt = [-34.9286, 138.5999, 3000.0];
        let collinear = [
            [-34.88, 138.60, 30.0],
            [-34.86, 138.65, 30.0],
            [-34.84, 138.70, 30.0],
        ];
        let measurements: Vec<BistaticMeasurement> = collinear
            .iter()
            .map(|&rx| BistaticMeasurement {
                tx_lla: TX,
                rx_lla: rx,
                delay_km: delay_km(rx, tgt),
            })
            .collect();
        // Near-collinear geometry either fails outright or is wildly off;
        // it must not return a confident nearby point.
        if let Some(lla) = solve(&measurements) {
            assert!(distance_lla(lla, tgt) > 1.0);
        }
    }

    #[test]
    fn process_respects_min_radars() {
        let tgt = [-34.9286, 138.5999, 3000.0];
        let mut data = RadarData::new();
        for (name, rx) in receivers() {
            data.insert(
                name,
                RadarSnapshot {
                    detections: Some(Vec::new()),
                    config: Some(RadarConfig {
                        location: SitePair {
                            tx: SiteLocation {
                                latitude: TX[0],
                                longitude: TX[1],
                                altitude: TX[2],
                            },
                            rx: SiteLocation {
                                latitude: rx[0],
                                longitude: rx[1],
                                altitude: rx[2],
                            },
                        },
                        capture: Some(CaptureConfig { fc: 204_640_000.0 }),
                        frequency: None,
                    }),
                },
            );
        }

        let mut associated = AssociatedDetections::new();
        associated.insert(
            "abc123".to_string(),
            receivers()
                .into_iter()
                .map(|(name, rx)| AssociatedDetection {
                    radar: name,
                    delay: delay_km(rx, tgt),
                    doppler: 0.0,
                    timestamp: 1000.0,
                })
                .collect(),
        );

        let localiser = SphericalIntersection;
        let output = localiser.process(&associated, &data);
        let target = output.get("abc123").expect("three radars should localise");
        assert!(distance_lla(target.points[0], tgt) < 50.0);

        associated.get_mut("abc123").unwrap().truncate(2);
        assert!(localiser.process(&associated, &data).is_empty());
    }
}
