//! # tracker
//!
//! Multi-target tracker over the localised point stream: predict, gate,
//! associate, update, initiate, delete.
//!
//! The filter runs in one cartesian frame for its whole life — ECEF or ENU
//! around a configured reference, chosen by knob — and LLA exists only at
//! the conversion boundary. ADS-B measurements are consumed before radar
//! measurements and carry enough trust to initiate confirmed tracks;
//! radar-only evidence starts tentative. Measurement order and greedy
//! assignment order are deterministic: insertion order, then ascending cost.

use nalgebra::{Matrix3, Matrix6, Vector3, Vector6};
use tracing::{debug, warn};

use radar_types::geometry::{lla_to_ecef, lla_to_enu};

use crate::track::{AdsbInfo, Track, TrackSnapshot, TrackStatus};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerFrame {
    Ecef,
    Enu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Standard Kalman measurement update
    Kalman,
    /// Legacy weighted blend of predicted position and measurement
    Blend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatingMode {
    Euclidean,
    Mahalanobis,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub frame: TrackerFrame,
    pub update_mode: UpdateMode,
    pub gating: GatingMode,
    pub max_misses_to_delete: u32,
    pub min_hits_to_confirm: u32,
    pub coast_misses: u32,
    pub gating_euclidean_threshold_m: f64,
    pub gating_mahalanobis_threshold: f64,
    pub initial_pos_uncertainty_m: [f64; 3],
    pub initial_vel_uncertainty_mps: [f64; 3],
    pub dt_default_s: f64,
    pub process_noise_coeff: f64,
    pub measurement_noise_coeff: f64,
    /// ENU frame origin (ignored in ECEF mode)
    pub ref_lla: [f64; 3],
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            frame: TrackerFrame::Enu,
            update_mode: UpdateMode::Kalman,
            gating: GatingMode::Euclidean,
            max_misses_to_delete: 5,
            min_hits_to_confirm: 3,
            coast_misses: 3,
            gating_euclidean_threshold_m: 10_000.0,
            gating_mahalanobis_threshold: 11.345,
            initial_pos_uncertainty_m: [500.0, 500.0, 500.0],
            initial_vel_uncertainty_mps: [100.0, 100.0, 100.0],
            dt_default_s: 1.0,
            process_noise_coeff: 0.1,
            measurement_noise_coeff: 500.0,
            ref_lla: [-34.9286, 138.5999, 0.0],
        }
    }
}

// Blend-update weights: ADS-B is trusted most; radar evidence counts for
// less on a track already fused with ADS-B.
const BLEND_ALPHA_ADSB: f64 = 0.8;
const BLEND_ALPHA_RADAR: f64 = 0.6;
const BLEND_ALPHA_RADAR_ON_ADSB: f64 = 0.4;

// ── Measurement input ─────────────────────────────────────────────────────────

/// One localised point handed to the tracker, still in LLA.
#[derive(Debug, Clone)]
pub struct TrackerInput {
    pub lla: [f64; 3],
    pub timestamp_ms: i64,
    /// Query hash (or `adsb_{url}`) that produced the point
    pub source_hash: String,
    /// Localiser target id (hex) the point belongs to
    pub source_target_id: String,
    pub adsb_info: Option<AdsbInfo>,
}

// ── Tracker ───────────────────────────────────────────────────────────────────

pub struct Tracker {
    config: TrackerConfig,
    /// Insertion-ordered; association iterates tracks in this order
    tracks: Vec<Track>,
    last_timestamp_ms: Option<i64>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            last_timestamp_ms: None,
        }
    }

    pub fn snapshots(&self) -> Vec<TrackSnapshot> {
        self.tracks.iter().map(Track::snapshot).collect()
    }

    fn to_frame(&self, lla: [f64; 3]) -> Option<Vector3<f64>> {
        let p = match self.config.frame {
            TrackerFrame::Ecef => lla_to_ecef(lla),
            TrackerFrame::Enu => lla_to_enu(lla, self.config.ref_lla),
        };
        if p.iter().all(|x| x.is_finite()) {
            Some(Vector3::new(p[0], p[1], p[2]))
        } else {
            None
        }
    }

    // ── Prediction ───────────────────────────────────────────────────────

    fn transition(dt: f64) -> Matrix6<f64> {
        let mut f = Matrix6::identity();
        for i in 0..3 {
            f[(i, i + 3)] = dt;
        }
        f
    }

    fn process_noise(&self, dt: f64) -> Matrix6<f64> {
        let q = self.config.process_noise_coeff;
        let dt2 = dt * dt;
        let mut out = Matrix6::zeros();
        for i in 0..3 {
            out[(i, i)] = q * dt2 * dt2 / 4.0;
            out[(i, i + 3)] = q * dt2 * dt / 2.0;
            out[(i + 3, i)] = q * dt2 * dt / 2.0;
            out[(i + 3, i + 3)] = q * dt2;
        }
        out
    }

    fn predict_all(&mut self, dt: f64) {
        let f = Self::transition(dt);
        let q = self.process_noise(dt);
        for track in &mut self.tracks {
            track.state = f * track.state;
            track.covariance = f * track.covariance * f.transpose() + q;
        }
    }

    // ── Gating ───────────────────────────────────────────────────────────

    /// Gate distance of a measurement against a predicted track; None when
    /// the gate rejects the pair. Euclidean distance doubles as the cost.
    fn gate(&self, track: &Track, z: &Vector3<f64>) -> Option<f64> {
        let p = Vector3::new(track.state[0], track.state[1], track.state[2]);
        let euclidean = (z - p).norm();
        match self.config.gating {
            GatingMode::Euclidean => {
                (euclidean < self.config.gating_euclidean_threshold_m).then_some(euclidean)
            }
            GatingMode::Mahalanobis => {
                let r = self.config.measurement_noise_coeff.powi(2);
                let s = track.covariance.fixed_view::<3, 3>(0, 0) + Matrix3::identity() * r;
                let s_inv = s.try_inverse()?;
                let residual = z - p;
                let d2 = (residual.transpose() * s_inv * residual)[(0, 0)];
                (d2 < self.config.gating_mahalanobis_threshold).then_some(euclidean)
            }
        }
    }

    // ── Measurement updates ──────────────────────────────────────────────

    /// Kalman position update. False when the innovation covariance is
    /// singular or the result is non-finite; the caller keeps the
    /// prediction in that case.
    fn kalman_update(track: &mut Track, z: &Vector3<f64>, sigma: f64) -> bool {
        let p_prior = track.covariance;
        let s = p_prior.fixed_view::<3, 3>(0, 0) + Matrix3::identity() * sigma * sigma;
        let Some(s_inv) = s.try_inverse() else {
            return false;
        };

        // K = P Hᵀ S⁻¹ with H = [I₃ | 0₃]
        let ph_t = p_prior.fixed_view::<6, 3>(0, 0);
        let gain = ph_t * s_inv;

        let residual = z - Vector3::new(track.state[0], track.state[1], track.state[2]);
        let new_state = track.state + gain * residual;

        let mut kh = Matrix6::zeros();
        kh.view_mut((0, 0), (6, 3)).copy_from(&gain);
        let new_cov = (Matrix6::identity() - kh) * p_prior;

        if !new_state.iter().all(|x| x.is_finite()) || !new_cov.iter().all(|x| x.is_finite()) {
            return false;
        }
        track.state = new_state;
        track.covariance = new_cov;
        true
    }

    /// Legacy blend: weighted average of predicted and measured position,
    /// predicted velocity kept.
    fn blend_update(track: &mut Track, z: &Vector3<f64>, alpha: f64) -> bool {
        for i in 0..3 {
            track.state[i] = (1.0 - alpha) * track.state[i] + alpha * z[i];
        }
        track.state.iter().all(|x| x.is_finite())
    }

    fn apply_update(&self, track: &mut Track, z: &Vector3<f64>, is_adsb: bool) -> bool {
        match self.config.update_mode {
            UpdateMode::Kalman => {
                let sigma = if is_adsb {
                    // tight measurement noise for surveyed truth
                    self.config.measurement_noise_coeff * 0.2
                } else {
                    self.config.measurement_noise_coeff
                };
                Self::kalman_update(track, z, sigma)
            }
            UpdateMode::Blend => {
                let alpha = if is_adsb {
                    BLEND_ALPHA_ADSB
                } else if track.adsb_info.is_some() {
                    BLEND_ALPHA_RADAR_ON_ADSB
                } else {
                    BLEND_ALPHA_RADAR
                };
                Self::blend_update(track, z, alpha)
            }
        }
    }

    fn initiate(&mut self, z: Vector3<f64>, status: TrackStatus, adsb_info: Option<AdsbInfo>, timestamp_ms: i64) {
        let state = Vector6::new(z[0], z[1], z[2], 0.0, 0.0, 0.0);
        let mut covariance = Matrix6::zeros();
        for i in 0..3 {
            covariance[(i, i)] = self.config.initial_pos_uncertainty_m[i].powi(2);
            covariance[(i + 3, i + 3)] = self.config.initial_vel_uncertainty_mps[i].powi(2);
        }
        self.tracks
            .push(Track::new(state, covariance, status, adsb_info, timestamp_ms));
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    /// One fusion-scan update. ADS-B measurements are consumed first, then
    /// radar measurements; returns the surviving track snapshots.
    pub fn update_all_tracks(
        &mut self,
        radar_inputs: &[TrackerInput],
        adsb_inputs: &[TrackerInput],
        now_ms: i64,
    ) -> Vec<TrackSnapshot> {
        let dt = match self.last_timestamp_ms {
            Some(last) if now_ms > last => (now_ms - last) as f64 / 1000.0,
            Some(_) => self.config.dt_default_s,
            None => self.config.dt_default_s,
        };
        self.last_timestamp_ms = Some(now_ms);

        self.predict_all(dt);

        // Tracks touched this tick, by index; they neither miss nor double-update
        let mut updated = vec![false; self.tracks.len()];

        // ── ADS-B pass (priority) ────────────────────────────────────────
        for input in adsb_inputs {
            let Some(z) = self.to_frame(input.lla) else {
                debug!("tracker: dropping non-finite ADS-B input {:?}", input.lla);
                continue;
            };

            let mut nearest: Option<(usize, f64)> = None;
            for (i, track) in self.tracks.iter().enumerate() {
                if let Some(cost) = self.gate(track, &z) {
                    if nearest.map_or(true, |(_, best)| cost < best) {
                        nearest = Some((i, cost));
                    }
                }
            }

            match nearest {
                Some((i, _)) => {
                    let mut track = self.tracks[i].clone();
                    if self.apply_update(&mut track, &z, true) {
                        track.adsb_info = input.adsb_info.clone();
                        track.record_update(input.timestamp_ms);
                        self.tracks[i] = track;
                        if i < updated.len() {
                            updated[i] = true;
                        }
                    } else {
                        warn!("tracker: ADS-B update failed for {}, keeping prediction", self.tracks[i].id);
                        if i < updated.len() {
                            updated[i] = true;
                        }
                    }
                }
                None => {
                    // Truth with no matching hypothesis is a confirmed target
                    self.initiate(z, TrackStatus::Confirmed, input.adsb_info.clone(), input.timestamp_ms);
                    updated.push(true);
                }
            }
        }

        // ── Radar pass ───────────────────────────────────────────────────
        let measurements: Vec<(usize, Vector3<f64>, &TrackerInput)> = radar_inputs
            .iter()
            .enumerate()
            .filter_map(|(j, input)| {
                let z = self.to_frame(input.lla)?;
                Some((j, z, input))
            })
            .collect();
        if measurements.len() < radar_inputs.len() {
            debug!(
                "tracker: dropped {} unconvertible radar inputs",
                radar_inputs.len() - measurements.len()
            );
        }

        // Cost matrix restricted to gated pairs, then greedy ascending-cost
        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for (i, track) in self.tracks.iter().enumerate() {
            if updated[i] {
                continue;
            }
            for (j_idx, (_, z, _)) in measurements.iter().enumerate() {
                if let Some(cost) = self.gate(track, z) {
                    pairs.push((cost, i, j_idx));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut measurement_taken = vec![false; measurements.len()];
        for (_, i, j_idx) in pairs {
            if updated[i] || measurement_taken[j_idx] {
                continue;
            }
            let (_, z, input) = &measurements[j_idx];
            let mut track = self.tracks[i].clone();
            if self.apply_update(&mut track, z, false) {
                track.record_update(input.timestamp_ms);
                self.tracks[i] = track;
            } else {
                warn!("tracker: radar update failed for {}, keeping prediction", self.tracks[i].id);
            }
            updated[i] = true;
            measurement_taken[j_idx] = true;
        }

        // ── Misses ───────────────────────────────────────────────────────
        let coast = self.config.coast_misses;
        for (i, track) in self.tracks.iter_mut().enumerate() {
            if !updated[i] {
                track.record_miss(coast);
            }
        }

        // ── New tentative tracks from leftover radar measurements ────────
        for (j_idx, (_, z, input)) in measurements.iter().enumerate() {
            if !measurement_taken[j_idx] {
                self.initiate(*z, TrackStatus::Tentative, None, input.timestamp_ms);
            }
        }

        // ── Lifecycle ────────────────────────────────────────────────────
        for track in &mut self.tracks {
            if track.status == TrackStatus::Tentative && track.hits >= self.config.min_hits_to_confirm {
                track.status = TrackStatus::Confirmed;
            }
        }
        let max_misses = self.config.max_misses_to_delete;
        self.tracks.retain(|track| {
            let keep = track.misses <= max_misses;
            if !keep {
                debug!("tracker: deleting {} after {} misses", track.id, track.misses);
            }
            keep
        });

        for track in &mut self.tracks {
            track.age_scans += 1;
        }

        self.snapshots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINT: [f64; 3] = [-34.9286, 138.5999, 1000.0];

    fn radar_input(lla: [f64; 3], timestamp_ms: i64) -> TrackerInput {
        TrackerInput {
            lla,
            timestamp_ms,
            source_hash: "test".into(),
            source_target_id: "abc123".into(),
            adsb_info: None,
        }
    }

    fn adsb_input(lla: [f64; 3], timestamp_ms: i64, hex: &str, flight: &str) -> TrackerInput {
        TrackerInput {
            lla,
            timestamp_ms,
            source_hash: "adsb_test".into(),
            source_target_id: hex.into(),
            adsb_info: Some(AdsbInfo {
                hex: hex.into(),
                flight: Some(flight.into()),
            }),
        }
    }

    #[test]
    fn single_point_starts_tentative_then_ages_out() {
        let mut tracker = Tracker::new(TrackerConfig::default());

        let tracks = tracker.update_all_tracks(&[radar_input(POINT, 1000)], &[], 1000);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].status, TrackStatus::Tentative);
        assert_eq!(tracks[0].hits, 1);
        assert_eq!(tracks[0].misses, 0);
        assert_eq!(tracks[0].age_scans, 1);

        let tracks = tracker.update_all_tracks(&[], &[], 2000);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].hits, 1);
        assert_eq!(tracks[0].misses, 1);
        assert_eq!(tracks[0].age_scans, 2);

        // misses = 5 survives the boundary, misses = 6 deletes
        for t in [3000, 4000, 5000, 6000] {
            let tracks = tracker.update_all_tracks(&[], &[], t);
            assert_eq!(tracks.len(), 1);
        }
        assert_eq!(tracker.snapshots()[0].misses, 5);
        let tracks = tracker.update_all_tracks(&[], &[], 7000);
        assert!(tracks.is_empty());
    }

    #[test]
    fn repeated_hits_confirm() {
        let mut tracker = Tracker::new(TrackerConfig::default());

        tracker.update_all_tracks(&[radar_input(POINT, 1000)], &[], 1000);
        tracker.update_all_tracks(&[radar_input(POINT, 2000)], &[], 2000);
        let tracks = tracker.update_all_tracks(&[radar_input(POINT, 3000)], &[], 3000);

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].hits, 3);
        assert_eq!(tracks[0].status, TrackStatus::Confirmed);
    }

    #[test]
    fn adsb_initiates_confirmed() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let tracks =
            tracker.update_all_tracks(&[], &[adsb_input(POINT, 1000, "ABC123", "TEST01")], 1000);

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].status, TrackStatus::Confirmed);
        let info = tracks[0].adsb_info.as_ref().expect("adsb info carried");
        assert_eq!(info.hex, "ABC123");
        assert_eq!(info.flight.as_deref(), Some("TEST01"));
    }

    #[test]
    fn nearby_detection_associates_instead_of_duplicating() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update_all_tracks(&[radar_input(POINT, 1000)], &[], 1000);

        // 400 m away: inside the 10 km gate
        let tracks =
            tracker.update_all_tracks(&[radar_input([-34.9290, 138.6000, 1050.0], 2000)], &[], 2000);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].hits, 2);
        assert_eq!(tracks[0].misses, 0);
    }

    #[test]
    fn distant_detection_creates_second_track() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update_all_tracks(&[radar_input(POINT, 1000)], &[], 1000);

        let tracks =
            tracker.update_all_tracks(&[radar_input([-35.2000, 139.0000, 2000.0], 2000)], &[], 2000);
        assert_eq!(tracks.len(), 2);
    }

    #[test]
    fn greedy_assignment_is_one_to_one() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update_all_tracks(&[radar_input(POINT, 1000)], &[], 1000);

        // Two nearby measurements: one associates, the other initiates
        let tracks = tracker.update_all_tracks(
            &[
                radar_input([-34.9290, 138.6000, 1050.0], 2000),
                radar_input([-34.9292, 138.6002, 1055.0], 2000),
            ],
            &[],
            2000,
        );
        assert_eq!(tracks.len(), 2);
        let hits: Vec<u32> = tracks.iter().map(|t| t.hits).collect();
        assert!(hits.contains(&2));
        assert!(hits.contains(&1));
    }

    #[test]
    fn ecef_frame_behaves_like_enu() {
        let config = TrackerConfig {
            frame: TrackerFrame::Ecef,
            ..TrackerConfig::default()
        };
        let mut tracker = Tracker::new(config);
        tracker.update_all_tracks(&[radar_input(POINT, 1000)], &[], 1000);
        let tracks =
            tracker.update_all_tracks(&[radar_input([-34.9290, 138.6000, 1050.0], 2000)], &[], 2000);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].hits, 2);
    }

    #[test]
    fn blend_update_moves_toward_measurement() {
        let config = TrackerConfig {
            update_mode: UpdateMode::Blend,
            ..TrackerConfig::default()
        };
        let mut tracker = Tracker::new(config);
        tracker.update_all_tracks(&[radar_input(POINT, 1000)], &[], 1000);

        let offset = [-34.9350, 138.6050, 1200.0];
        let tracks = tracker.update_all_tracks(&[radar_input(offset, 2000)], &[], 2000);
        assert_eq!(tracks.len(), 1);

        // Blended position sits strictly between prediction and measurement
        let z = lla_to_enu(offset, TrackerConfig::default().ref_lla);
        let p0 = lla_to_enu(POINT, TrackerConfig::default().ref_lla);
        let state = tracks[0].current_state_vector;
        assert!(state[0] > p0[0].min(z[0]) && state[0] < p0[0].max(z[0]));
    }
}
