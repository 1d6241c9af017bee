//! # parametric
//!
//! Ellipse/ellipsoid parametric localisation. Each associated receiver
//! contributes a constant-bistatic-range surface; the target sits where the
//! surfaces intersect.
//!
//! A receiver's surface is sampled on a parametric grid, rotated onto the
//! tx–rx baseline and expressed in the ENU frame of the baseline midpoint.
//! The first receiver acts as master; its samples are scored against every
//! other receiver's sample set and the surviving sample (mean or minimum
//! policy) converts back to LLA.

use tracing::debug;

use radar_types::geometry::{average_points, distance_enu, enu_to_lla, lla_to_enu};
use radar_types::Ellipsoid;

use crate::associator::AssociatedDetections;
use crate::localiser::{LocalisedTarget, LocalisedTargets, MIN_RADARS};
use crate::radar_client::RadarData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMode {
    /// 2-D ring in the baseline plane; output altitude forced to zero
    Ellipse,
    /// Full prolate ellipsoid surface
    Ellipsoid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intersection {
    /// Mean of all master samples close to every other surface
    Mean,
    /// Master sample minimising the norm of per-surface minimum distances
    Min,
}

pub struct ParametricLocaliser {
    mode: SurfaceMode,
    method: Intersection,
    n_samples: usize,
    threshold: f64,
    /// Per-radar ellipsoids survive across ticks; geometry is static
    ellipsoids: Vec<Ellipsoid>,
}

impl ParametricLocaliser {
    pub fn new(mode: SurfaceMode, method: Intersection, n_samples: usize, threshold: f64) -> Self {
        Self {
            mode,
            method,
            n_samples,
            threshold,
            ellipsoids: Vec::new(),
        }
    }

    /// Cached ellipsoid for a radar, built from its config on first sight.
    fn ellipsoid_for(&mut self, radar: &str, radar_data: &RadarData) -> Option<usize> {
        if let Some(i) = self.ellipsoids.iter().position(|e| e.name == radar) {
            return Some(i);
        }
        let config = radar_data.get(radar)?.config.as_ref()?;
        let ellipsoid = Ellipsoid::new(
            config.location.tx.lla(),
            config.location.rx.lla(),
            radar,
        );
        self.ellipsoids.push(ellipsoid);
        Some(self.ellipsoids.len() - 1)
    }

    pub fn process(
        &mut self,
        associated: &AssociatedDetections,
        radar_data: &RadarData,
    ) -> LocalisedTargets {
        let mut output = LocalisedTargets::new();

        for (hex, detections) in associated {
            if detections.len() < MIN_RADARS {
                continue;
            }

            // Sample every contributing surface. The first receiver is the
            // master; every surface is re-expressed in the master midpoint
            // frame so the distance comparisons share one origin.
            let mut surfaces: Vec<(String, Vec<[f64; 3]>)> = Vec::new();
            let mut master_midpoint: Option<[f64; 3]> = None;
            for detection in detections {
                let Some(i) = self.ellipsoid_for(&detection.radar, radar_data) else {
                    debug!("parametric: no geometry for {}", detection.radar);
                    continue;
                };
                let midpoint = self.ellipsoids[i].midpoint_lla;
                let reference = *master_midpoint.get_or_insert(midpoint);
                let samples: Vec<[f64; 3]> = sample_surface(
                    self.mode,
                    &self.ellipsoids[i],
                    detection.delay * 1000.0,
                    self.n_samples,
                )
                .into_iter()
                .map(|p| lla_to_enu(enu_to_lla(p, midpoint), reference))
                .collect();
                surfaces.push((detection.radar.clone(), samples));
            }
            if surfaces.len() < MIN_RADARS {
                continue;
            }

            let intersect = match self.method {
                Intersection::Mean => intersect_mean(&surfaces, self.threshold),
                Intersection::Min => intersect_min(&surfaces, self.threshold),
            };
            let Some(enu_points) = intersect else {
                continue;
            };

            // Back to LLA around the master midpoint
            let reference = master_midpoint.unwrap_or_default();
            let points: Vec<[f64; 3]> = enu_points
                .iter()
                .map(|&p| {
                    let lla = enu_to_lla(p, reference);
                    let alt = match self.mode {
                        SurfaceMode::Ellipse => 0.0,
                        SurfaceMode::Ellipsoid => lla[2].round(),
                    };
                    [round3(lla[0]), round3(lla[1]), alt]
                })
                .collect();

            output.insert(
                hex.clone(),
                LocalisedTarget {
                    points,
                    velocity_enu: None,
                },
            );
        }

        output
    }

    /// Surface samples for the reply's display layer, converted to LLA.
    pub fn display_samples(
        &mut self,
        radar: &str,
        radar_data: &RadarData,
        bistatic_range_m: f64,
        n: usize,
    ) -> Vec<[f64; 3]> {
        let Some(i) = self.ellipsoid_for(radar, radar_data) else {
            return Vec::new();
        };
        let reference = self.ellipsoids[i].midpoint_lla;
        sample_surface(self.mode, &self.ellipsoids[i], bistatic_range_m, n)
            .into_iter()
            .map(|p| {
                let lla = enu_to_lla(p, reference);
                let alt = match self.mode {
                    SurfaceMode::Ellipse => 0.0,
                    SurfaceMode::Ellipsoid => lla[2].round(),
                };
                [round3(lla[0]), round3(lla[1]), alt]
            })
            .collect()
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ── Surface sampling ──────────────────────────────────────────────────────────

/// Rotate a baseline-frame sample into the midpoint ENU frame.
fn rotate(r: [f64; 3], yaw: f64, pitch: f64) -> [f64; 3] {
    let (st, ct) = yaw.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    // Row-vector product with the yaw/pitch matrix of the baseline
    [
        r[0] * ct + r[1] * st,
        r[0] * (-st * cp) + r[1] * (ct * cp) + r[2] * sp,
        r[0] * (st * sp) + r[1] * (-ct * sp) + r[2] * cp,
    ]
}

/// Parametric samples of the constant-range surface, ENU relative to the
/// baseline midpoint.
///
/// Ellipsoid: product grid `u ∈ [0,2π) × v ∈ [−π/2,π/2]` of `n × n/2`
/// points, keeping only samples above local ground. Ellipse: the n-point
/// ring in the baseline plane.
pub fn sample_surface(
    mode: SurfaceMode,
    ellipsoid: &Ellipsoid,
    bistatic_range_m: f64,
    n: usize,
) -> Vec<[f64; 3]> {
    let a = (bistatic_range_m + ellipsoid.distance) / 2.0;
    let b_sq = a * a - (ellipsoid.distance / 2.0) * (ellipsoid.distance / 2.0);
    if b_sq <= 0.0 || n == 0 {
        return Vec::new();
    }
    let b = b_sq.sqrt();

    let mut samples = Vec::new();
    match mode {
        SurfaceMode::Ellipse => {
            for i in 0..n {
                let u = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
                let r = rotate([a * u.cos(), b * u.sin(), 0.0], ellipsoid.yaw, ellipsoid.pitch);
                samples.push([round3(r[0]), round3(r[1]), 0.0]);
            }
        }
        SurfaceMode::Ellipsoid => {
            let nv = (n / 2).max(1);
            for i in 0..n {
                let u = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
                for j in 0..nv {
                    let v = -std::f64::consts::FRAC_PI_2
                        + std::f64::consts::PI * j as f64 / (nv.saturating_sub(1).max(1)) as f64;
                    let r = rotate(
                        [a * u.cos(), b * u.sin() * v.cos(), b * u.sin() * v.sin()],
                        ellipsoid.yaw,
                        ellipsoid.pitch,
                    );
                    // only keep points above local ground
                    if r[2] > 0.0 {
                        samples.push([round3(r[0]), round3(r[1]), round3(r[2])]);
                    }
                }
            }
        }
    }
    samples
}

// ── Intersection policies ─────────────────────────────────────────────────────

/// Mean policy: a master sample survives iff every other surface has a
/// sample within `threshold`; the output is the component-wise mean.
fn intersect_mean(surfaces: &[(String, Vec<[f64; 3]>)], threshold: f64) -> Option<Vec<[f64; 3]>> {
    let master = &surfaces[0].1;
    let mut retained = Vec::new();

    for &candidate in master {
        let close_to_all = surfaces[1..].iter().all(|(_, samples)| {
            samples
                .iter()
                .any(|&s| distance_enu(candidate, s) < threshold)
        });
        if close_to_all {
            retained.push(candidate);
        }
    }

    average_points(&retained).map(|mean| vec![mean])
}

/// Min policy: per master sample, collect the minimum distance to each other
/// surface and score by the vector norm. A candidate is dropped as soon as a
/// completed component stayed at the threshold.
fn intersect_min(surfaces: &[(String, Vec<[f64; 3]>)], threshold: f64) -> Option<Vec<[f64; 3]>> {
    let master = &surfaces[0].1;
    let others = &surfaces[1..];

    let mut best: Option<([f64; 3], f64)> = None;

    for &candidate in master {
        let mut min_distances = vec![threshold; others.len()];
        let mut valid = true;

        for (i, (_, samples)) in others.iter().enumerate() {
            if i > 0 && min_distances[i - 1] >= threshold {
                // previous surface never came close; no need to finish
                valid = false;
                break;
            }
            for &s in samples {
                let d = distance_enu(candidate, s);
                if d < min_distances[i] {
                    min_distances[i] = d;
                }
            }
        }
        if !valid {
            continue;
        }

        let norm = min_distances.iter().map(|d| d * d).sum::<f64>().sqrt();
        if norm < best.map_or(threshold, |(_, n)| n) {
            best = Some((candidate, norm));
        }
    }

    best.map(|(p, _)| vec![p])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::associator::AssociatedDetection;
    use crate::radar_client::{RadarData, RadarSnapshot};
    use radar_types::geometry::{bistatic_delay_km, distance_lla};
    use radar_types::{CaptureConfig, RadarConfig, SiteLocation, SitePair};

    fn site(lat: f64, lon: f64, alt: f64) -> SiteLocation {
        SiteLocation {
            latitude: lat,
            longitude: lon,
            altitude: alt,
        }
    }

    /// Three short-baseline radars around the target area, baselines facing
    /// east-west, north-south and diagonal. Kilometre-scale bistatic ranges
    /// keep the surfaces fat and the sampling finer than the intersection
    /// threshold.
    fn triangle_radar_data() -> (Vec<(String, [f64; 3], [f64; 3])>, RadarData) {
        let sites = vec![
            ("radar-a".to_string(), [-34.900, 138.575, 60.0], [-34.900, 138.597, 30.0]),
            ("radar-b".to_string(), [-34.930, 138.610, 90.0], [-34.912, 138.610, 40.0]),
            ("radar-c".to_string(), [-34.938, 138.570, 70.0], [-34.925, 138.558, 25.0]),
        ];

        let mut data = RadarData::new();
        for (name, tx, rx) in &sites {
            data.insert(
                name.clone(),
                RadarSnapshot {
                    detections: Some(Vec::new()),
                    config: Some(RadarConfig {
                        location: SitePair {
                            tx: site(tx[0], tx[1], tx[2]),
                            rx: site(rx[0], rx[1], rx[2]),
                        },
                        capture: Some(CaptureConfig { fc: 204_640_000.0 }),
                        frequency: None,
                    }),
                },
            );
        }
        (sites, data)
    }

    fn associated_for(
        sites: &[(String, [f64; 3], [f64; 3])],
        tgt: [f64; 3],
    ) -> AssociatedDetections {
        let mut associated = AssociatedDetections::new();
        associated.insert(
            "abc123".to_string(),
            sites
                .iter()
                .map(|(name, tx, rx)| AssociatedDetection {
                    radar: name.clone(),
                    delay: bistatic_delay_km(*tx, *rx, tgt),
                    doppler: 0.0,
                    timestamp: 1000.0,
                })
                .collect(),
        );
        associated
    }

    #[test]
    fn focus_sum_invariant() {
        let ellipsoid = Ellipsoid::new([-34.70, 138.40, 60.0], [-34.75, 138.52, 30.0], "r");
        let bistatic_range = 40_000.0;
        let samples = sample_surface(SurfaceMode::Ellipsoid, &ellipsoid, bistatic_range, 60);
        assert!(!samples.is_empty());

        for s in samples.iter().take(50) {
            let lla = enu_to_lla(*s, ellipsoid.midpoint_lla);
            let sum = distance_lla(ellipsoid.f1_lla, lla) + distance_lla(ellipsoid.f2_lla, lla);
            let expected = bistatic_range + ellipsoid.distance;
            assert!(
                (sum - expected).abs() < 1.0,
                "focus sum {sum} differs from {expected}"
            );
        }
    }

    #[test]
    fn ellipsoid_mean_localises_known_target() {
        let (sites, data) = triangle_radar_data();
        let tgt = [-34.9200, 138.5850, 1000.0];
        let associated = associated_for(&sites, tgt);

        let mut localiser =
            ParametricLocaliser::new(SurfaceMode::Ellipsoid, Intersection::Mean, 100, 500.0);
        let output = localiser.process(&associated, &data);

        let target = output.get("abc123").expect("target should localise");
        assert_eq!(target.points.len(), 1);
        let err = distance_lla(target.points[0], tgt);
        assert!(err < 200.0, "mean intersection {err:.1} m from truth");
    }

    #[test]
    fn ellipsoid_min_localises_known_target() {
        let (sites, data) = triangle_radar_data();
        let tgt = [-34.9200, 138.5850, 1000.0];
        let associated = associated_for(&sites, tgt);

        let mut localiser =
            ParametricLocaliser::new(SurfaceMode::Ellipsoid, Intersection::Min, 100, 500.0);
        let output = localiser.process(&associated, &data);

        let target = output.get("abc123").expect("target should localise");
        let err = distance_lla(target.points[0], tgt);
        assert!(err < 500.0, "min intersection {err:.1} m from truth");
    }

    #[test]
    fn ellipse_points_are_flat() {
        let (sites, data) = triangle_radar_data();
        let tgt = [-34.9200, 138.5850, 0.0];
        let associated = associated_for(&sites, tgt);

        let mut localiser =
            ParametricLocaliser::new(SurfaceMode::Ellipse, Intersection::Mean, 200, 1000.0);
        let output = localiser.process(&associated, &data);
        if let Some(target) = output.get("abc123") {
            for p in &target.points {
                assert_eq!(p[2], 0.0);
            }
        }
    }

    #[test]
    fn two_radars_are_not_enough() {
        let (sites, data) = triangle_radar_data();
        let tgt = [-34.9200, 138.5850, 1000.0];
        let mut associated = associated_for(&sites, tgt);
        associated.get_mut("abc123").unwrap().truncate(2);

        let mut localiser =
            ParametricLocaliser::new(SurfaceMode::Ellipsoid, Intersection::Mean, 100, 500.0);
        assert!(localiser.process(&associated, &data).is_empty());
    }
}
