//! # track
//!
//! One persistent target hypothesis: six-dimensional state, covariance,
//! counters and lifecycle status. The tracker owns the collection; this
//! type owns nothing but its own history.

use nalgebra::{Matrix6, Vector6};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackStatus {
    Tentative,
    Confirmed,
    Coasting,
}

/// ADS-B identity carried by a track that has consumed truth measurements.
#[derive(Debug, Clone, Serialize)]
pub struct AdsbInfo {
    pub hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    pub status: TrackStatus,
    /// `[x, y, z, vx, vy, vz]` in the tracker's cartesian frame, meters
    pub state: Vector6<f64>,
    pub covariance: Matrix6<f64>,
    /// `(timestamp_ms, state)` per update
    pub history: Vec<(i64, Vector6<f64>)>,
    pub hits: u32,
    pub misses: u32,
    pub age_scans: u32,
    pub adsb_info: Option<AdsbInfo>,
    pub created_ms: i64,
    pub updated_ms: i64,
}

impl Track {
    pub fn new(
        state: Vector6<f64>,
        covariance: Matrix6<f64>,
        status: TrackStatus,
        adsb_info: Option<AdsbInfo>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status,
            state,
            covariance,
            history: vec![(timestamp_ms, state)],
            hits: 1,
            misses: 0,
            age_scans: 0,
            adsb_info,
            created_ms: timestamp_ms,
            updated_ms: timestamp_ms,
        }
    }

    /// Record a successful measurement update. Misses reset; hits only grow.
    pub fn record_update(&mut self, timestamp_ms: i64) {
        self.hits += 1;
        self.misses = 0;
        self.updated_ms = timestamp_ms;
        self.history.push((timestamp_ms, self.state));
    }

    /// Record a missed scan; a confirmed track starts coasting once missed
    /// past the threshold.
    pub fn record_miss(&mut self, coast_threshold: u32) {
        self.misses += 1;
        if self.status == TrackStatus::Confirmed && self.misses >= coast_threshold {
            self.status = TrackStatus::Coasting;
        }
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            track_id: self.id.clone(),
            status: self.status,
            timestamp_creation_ms: self.created_ms,
            timestamp_update_ms: self.updated_ms,
            current_state_vector: [
                self.state[0],
                self.state[1],
                self.state[2],
                self.state[3],
                self.state[4],
                self.state[5],
            ],
            hits: self.hits,
            misses: self.misses,
            age_scans: self.age_scans,
            adsb_info: self.adsb_info.clone(),
            history_len: self.history.len(),
        }
    }
}

/// The serialisable view published as `system_tracks`.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub track_id: String,
    pub status: TrackStatus,
    pub timestamp_creation_ms: i64,
    pub timestamp_update_ms: i64,
    pub current_state_vector: [f64; 6],
    pub hits: u32,
    pub misses: u32,
    pub age_scans: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adsb_info: Option<AdsbInfo>,
    pub history_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_past_threshold_starts_coasting() {
        let mut track = Track::new(
            Vector6::zeros(),
            Matrix6::identity(),
            TrackStatus::Confirmed,
            None,
            1000,
        );
        track.record_miss(3);
        track.record_miss(3);
        assert_eq!(track.status, TrackStatus::Confirmed);
        track.record_miss(3);
        assert_eq!(track.status, TrackStatus::Coasting);
    }

    #[test]
    fn update_resets_misses_and_grows_history() {
        let mut track = Track::new(
            Vector6::zeros(),
            Matrix6::identity(),
            TrackStatus::Tentative,
            None,
            1000,
        );
        track.record_miss(3);
        track.record_update(2000);
        assert_eq!(track.hits, 2);
        assert_eq!(track.misses, 0);
        assert_eq!(track.history.len(), 2);
        assert_eq!(track.snapshot().history_len, 2);
    }
}
