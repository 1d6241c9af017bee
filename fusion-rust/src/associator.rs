//! # associator
//!
//! ADS-B associator: links per-receiver bistatic detections to ADS-B truth
//! targets by predicted delay/Doppler residuals, so only co-referenced
//! detections reach the localisers.
//!
//! For every truth aircraft and every receiver, the expected bistatic delay
//! follows from the tx/target/rx geometry and the expected Doppler from the
//! aircraft's reported ground speed, track and climb rate. The receiver's
//! detection with the smallest weighted residual wins, provided both
//! residuals sit under their gates. A target is emitted only when at least
//! two receivers contributed.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use radar_types::geometry::{bistatic_delay_km, bistatic_doppler_hz};

use crate::radar_client::RadarData;
use crate::truth::{TruthMap, TruthTarget};

const KNOTS_TO_MPS: f64 = 0.514444;
const FTMIN_TO_MPS: f64 = 0.00508;

// ── Output type ───────────────────────────────────────────────────────────────

/// One detection attributed to a truth target, tagged with its receiver.
#[derive(Debug, Clone, Serialize)]
pub struct AssociatedDetection {
    pub radar: String,
    /// Bistatic delay in km
    pub delay: f64,
    /// Bistatic Doppler in Hz
    pub doppler: f64,
    pub timestamp: f64,
}

/// hex → at most one associated detection per receiver, in radar-key order.
pub type AssociatedDetections = BTreeMap<String, Vec<AssociatedDetection>>;

// ── Truth kinematics ──────────────────────────────────────────────────────────

/// ENU velocity from reported ground speed (knots), track (deg) and
/// geometric climb rate (ft/min). None when the feed gave no speed/track.
fn truth_velocity_enu(truth: &TruthTarget) -> Option<[f64; 3]> {
    let gs = truth.gs? * KNOTS_TO_MPS;
    let track = truth.track?.to_radians();
    let climb = truth.geom_rate.unwrap_or(0.0) * FTMIN_TO_MPS;
    Some([gs * track.sin(), gs * track.cos(), climb])
}

// ── Associator ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct AssociatorConfig {
    /// Delay residual gate, km
    pub delay_gate_km: f64,
    /// Doppler residual gate, Hz
    pub doppler_gate_hz: f64,
    pub delay_weight: f64,
    pub doppler_weight: f64,
}

impl Default for AssociatorConfig {
    fn default() -> Self {
        Self {
            delay_gate_km: 5.0,
            doppler_gate_hz: 50.0,
            delay_weight: 1.0,
            doppler_weight: 0.1,
        }
    }
}

pub struct AdsbAssociator {
    config: AssociatorConfig,
}

impl AdsbAssociator {
    pub fn new(config: AssociatorConfig) -> Self {
        Self { config }
    }

    /// Associate each radar's detections against the truth set.
    ///
    /// `radar_keys` fixes the per-target radar ordering; `_timestamp_ms` is
    /// the tick time the predictions are nominally valid for.
    pub fn process(
        &self,
        radar_keys: &[String],
        radar_data: &RadarData,
        truth: &TruthMap,
        _timestamp_ms: i64,
    ) -> AssociatedDetections {
        let mut output = AssociatedDetections::new();

        for (hex, target) in truth {
            let tgt_lla = target.lla();
            let vel_enu = truth_velocity_enu(target);
            let mut per_radar: Vec<AssociatedDetection> = Vec::new();

            for radar in radar_keys {
                let Some(snapshot) = radar_data.get(radar) else {
                    continue;
                };
                let (Some(config), Some(detections)) =
                    (snapshot.config.as_ref(), snapshot.detections.as_ref())
                else {
                    continue;
                };
                let Some(fc) = config.fc() else {
                    debug!("associator: {radar} config has no centre frequency");
                    continue;
                };

                let tx_lla = config.location.tx.lla();
                let rx_lla = config.location.rx.lla();
                let delay_pred = bistatic_delay_km(tx_lla, rx_lla, tgt_lla);
                let doppler_pred =
                    vel_enu.map(|v| bistatic_doppler_hz(tx_lla, rx_lla, tgt_lla, v, fc));

                let mut best: Option<(f64, &radar_types::RadarDetection)> = None;
                for detection in detections {
                    let delay_residual = (detection.delay - delay_pred).abs();
                    if delay_residual >= self.config.delay_gate_km {
                        continue;
                    }

                    // Doppler participates only when the feed reported kinematics
                    let mut score = self.config.delay_weight * delay_residual;
                    if let Some(doppler_pred) = doppler_pred {
                        let doppler_residual = (detection.doppler - doppler_pred).abs();
                        if doppler_residual >= self.config.doppler_gate_hz {
                            continue;
                        }
                        score += self.config.doppler_weight * doppler_residual;
                    }

                    // Strict < keeps the earliest detection on exact ties
                    if best.map_or(true, |(best_score, _)| score < best_score) {
                        best = Some((score, detection));
                    }
                }

                if let Some((_, detection)) = best {
                    per_radar.push(AssociatedDetection {
                        radar: radar.clone(),
                        delay: detection.delay,
                        doppler: detection.doppler,
                        timestamp: detection.timestamp,
                    });
                }
            }

            // Localisation needs multiple receivers; singletons carry no cross-range info
            if per_radar.len() >= 2 {
                output.insert(hex.clone(), per_radar);
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar_client::RadarSnapshot;
    use radar_types::{CaptureConfig, RadarConfig, RadarDetection, SiteLocation, SitePair};

    fn site(lat: f64, lon: f64, alt: f64) -> SiteLocation {
        SiteLocation {
            latitude: lat,
            longitude: lon,
            altitude: alt,
        }
    }

    fn radar_config(tx: SiteLocation, rx: SiteLocation) -> RadarConfig {
        RadarConfig {
            location: SitePair { tx, rx },
            capture: Some(CaptureConfig { fc: 204_640_000.0 }),
            frequency: None,
        }
    }

    fn truth_target(lat: f64, lon: f64, alt: f64) -> TruthTarget {
        TruthTarget {
            lat,
            lon,
            alt,
            flight: "TEST01".into(),
            timestamp: 1000.0,
            gs: None,
            track: None,
            geom_rate: None,
        }
    }

    fn two_radar_fixture(tgt: [f64; 3]) -> (Vec<String>, RadarData) {
        let configs = [
            radar_config(site(-34.90, 138.50, 50.0), site(-34.80, 138.70, 20.0)),
            radar_config(site(-35.05, 138.52, 80.0), site(-34.95, 138.72, 30.0)),
        ];

        let keys: Vec<String> = vec!["radar-a".into(), "radar-b".into()];
        let mut data = RadarData::new();
        for (key, config) in keys.iter().zip(configs) {
            let delay = bistatic_delay_km(
                config.location.tx.lla(),
                config.location.rx.lla(),
                tgt,
            );
            data.insert(
                key.clone(),
                RadarSnapshot {
                    detections: Some(vec![RadarDetection {
                        delay,
                        doppler: 0.0,
                        timestamp: 1000.0,
                    }]),
                    config: Some(config),
                },
            );
        }
        (keys, data)
    }

    #[test]
    fn in_gate_detections_associate() {
        let tgt = [-34.9286, 138.5999, 8000.0];
        let (keys, data) = two_radar_fixture(tgt);

        let mut truth = TruthMap::new();
        truth.insert("abc123".into(), truth_target(tgt[0], tgt[1], tgt[2]));

        let associator = AdsbAssociator::new(AssociatorConfig::default());
        let output = associator.process(&keys, &data, &truth, 1000);

        let dets = output.get("abc123").expect("target should associate");
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].radar, "radar-a");
        assert_eq!(dets[1].radar, "radar-b");
    }

    #[test]
    fn out_of_gate_detection_is_dropped() {
        let tgt = [-34.9286, 138.5999, 8000.0];
        let (keys, mut data) = two_radar_fixture(tgt);

        // Push radar-a's detection 20 km off the prediction
        if let Some(d) = data
            .get_mut("radar-a")
            .and_then(|s| s.detections.as_mut())
            .and_then(|d| d.first_mut())
        {
            d.delay += 20.0;
        }

        let mut truth = TruthMap::new();
        truth.insert("abc123".into(), truth_target(tgt[0], tgt[1], tgt[2]));

        let associator = AdsbAssociator::new(AssociatorConfig::default());
        let output = associator.process(&keys, &data, &truth, 1000);

        // Only one radar left in gate → below the two-receiver floor
        assert!(output.is_empty());
    }

    #[test]
    fn closest_detection_wins() {
        let tgt = [-34.9286, 138.5999, 8000.0];
        let (keys, mut data) = two_radar_fixture(tgt);

        // Add a second, worse detection on radar-a
        if let Some(d) = data.get_mut("radar-a").and_then(|s| s.detections.as_mut()) {
            let good_delay = d[0].delay;
            d.insert(
                0,
                RadarDetection {
                    delay: good_delay + 2.0,
                    doppler: 0.0,
                    timestamp: 1000.0,
                },
            );
        }

        let mut truth = TruthMap::new();
        truth.insert("abc123".into(), truth_target(tgt[0], tgt[1], tgt[2]));

        let associator = AdsbAssociator::new(AssociatorConfig::default());
        let output = associator.process(&keys, &data, &truth, 1000);
        let dets = output.get("abc123").unwrap();

        // The near detection (index 1) wins over the offset one (index 0)
        let expected = bistatic_delay_km(
            data["radar-a"].config.as_ref().unwrap().location.tx.lla(),
            data["radar-a"].config.as_ref().unwrap().location.rx.lla(),
            tgt,
        );
        assert!((dets[0].delay - expected).abs() < 1e-9);
    }
}
