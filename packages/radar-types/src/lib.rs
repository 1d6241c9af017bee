//! # radar-types
//!
//! Shared wire formats for the Passive Radar Suite.
//!
//! These types are used by:
//! - `fusion-rust`: decoding receiver detection/config replies and ADS-B truth
//! - `packages/radar-sim`: producing the same documents synthetically
//!
//! ## Coordinate conventions
//!
//! - **LLA**: geodetic `[lat_deg, lon_deg, alt_m]` above the WGS-84 ellipsoid
//! - **ECEF**: earth-centred earth-fixed Cartesian, meters
//! - **ENU**: local East-North-Up Cartesian tangent at a reference LLA, meters
//!
//! Bistatic delay is reported in kilometers
//! (`|tx→tgt| + |tgt→rx| − |tx→rx|`), bistatic Doppler in Hz.

use serde::{Deserialize, Serialize};

pub mod geometry;

pub use geometry::Ellipsoid;

// ── Receiver detection document (`GET /api/detection`) ───────────────────────

/// One bistatic detection from a receiver's processing chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarDetection {
    /// Bistatic delay in kilometers
    pub delay: f64,
    /// Bistatic Doppler in Hz
    pub doppler: f64,
    /// Receiver timestamp in milliseconds
    pub timestamp: f64,
}

/// Detection reply body. Some receiver builds return a bare list, others wrap
/// it in `{"detections": [...]}` — accept either.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DetectionDocument {
    List(Vec<RadarDetection>),
    Wrapped { detections: Vec<RadarDetection> },
}

impl DetectionDocument {
    pub fn into_detections(self) -> Vec<RadarDetection> {
        match self {
            DetectionDocument::List(d) => d,
            DetectionDocument::Wrapped { detections } => detections,
        }
    }
}

// ── Receiver geometry document (`GET /api/config`) ───────────────────────────

/// A transmitter or receiver site position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SiteLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl SiteLocation {
    /// Position as a `[lat, lon, alt]` triple for the geometry helpers.
    pub fn lla(&self) -> [f64; 3] {
        [self.latitude, self.longitude, self.altitude]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SitePair {
    pub tx: SiteLocation,
    pub rx: SiteLocation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Centre frequency in Hz
    pub fc: f64,
}

/// Static geometry of one receiver node. The centre frequency is spelled
/// `capture.fc` by current receiver builds and `frequency` by older ones;
/// both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarConfig {
    pub location: SitePair,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
}

impl RadarConfig {
    /// Centre frequency in Hz, whichever field the receiver populated.
    pub fn fc(&self) -> Option<f64> {
        self.capture.map(|c| c.fc).or(self.frequency)
    }
}

// ── ADS-B truth document (`GET /data/aircraft.json`) ─────────────────────────

/// One aircraft entry from a tar1090-style feed. Unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aircraft {
    pub hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    /// Geometric altitude in meters. Absent entries are ineligible as truth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_geom: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight: Option<String>,
    /// Seconds since the last position report
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_pos: Option<f64>,
    /// Ground speed in knots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gs: Option<f64>,
    /// True track over ground in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<f64>,
    /// Geometric vertical rate in ft/min
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geom_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AircraftJson {
    /// Feed wall-clock in seconds since the epoch
    pub now: f64,
    pub aircraft: Vec<Aircraft>,
}

// ── Physical constants ────────────────────────────────────────────────────────

/// Speed of light in m/s, used for delay/Doppler prediction
pub const SPEED_OF_LIGHT_MPS: f64 = 299_792_458.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_document_accepts_both_shapes() {
        let bare = r#"[{"delay": 12.5, "doppler": -40.0, "timestamp": 1000.0}]"#;
        let wrapped = r#"{"detections": [{"delay": 12.5, "doppler": -40.0, "timestamp": 1000.0}]}"#;

        let a: DetectionDocument = serde_json::from_str(bare).unwrap();
        let b: DetectionDocument = serde_json::from_str(wrapped).unwrap();
        assert_eq!(a.into_detections().len(), 1);
        assert_eq!(b.into_detections().len(), 1);
    }

    #[test]
    fn radar_config_accepts_either_frequency_spelling() {
        let capture = r#"{
            "location": {
                "tx": {"latitude": -34.9, "longitude": 138.5, "altitude": 50.0},
                "rx": {"latitude": -34.8, "longitude": 138.6, "altitude": 20.0}
            },
            "capture": {"fc": 204640000.0}
        }"#;
        let legacy = r#"{
            "location": {
                "tx": {"latitude": -34.9, "longitude": 138.5, "altitude": 50.0},
                "rx": {"latitude": -34.8, "longitude": 138.6, "altitude": 20.0}
            },
            "frequency": 204640000.0
        }"#;

        let a: RadarConfig = serde_json::from_str(capture).unwrap();
        let b: RadarConfig = serde_json::from_str(legacy).unwrap();
        assert_eq!(a.fc(), Some(204_640_000.0));
        assert_eq!(b.fc(), Some(204_640_000.0));
    }

    #[test]
    fn aircraft_json_tolerates_partial_entries() {
        let body = r#"{
            "now": 1700000000.0,
            "aircraft": [
                {"hex": "7c6b2d", "lat": -34.9, "lon": 138.6, "alt_geom": 10000.0,
                 "flight": "QFA123", "seen_pos": 0.4, "gs": 430.0, "track": 90.0},
                {"hex": "7c0000"}
            ]
        }"#;
        let doc: AircraftJson = serde_json::from_str(body).unwrap();
        assert_eq!(doc.aircraft.len(), 2);
        assert!(doc.aircraft[1].lat.is_none());
    }
}
