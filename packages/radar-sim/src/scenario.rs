//! scenario.rs — synthetic multistatic geometry and target motion
//!
//! One illuminator, N receivers around it, one scripted aircraft flying a
//! constant-velocity ENU track. Positions are a pure function of elapsed
//! time, so every endpoint handler can evaluate the scenario statelessly.

use rand_distr::{Distribution, Normal};
use serde::Serialize;

use radar_types::geometry::{bistatic_delay_km, bistatic_doppler_hz, enu_to_lla};
use radar_types::{Aircraft, AircraftJson, CaptureConfig, RadarConfig, RadarDetection, SiteLocation, SitePair};

const MPS_TO_KNOTS: f64 = 1.0 / 0.514444;
const MPS_TO_FTMIN: f64 = 1.0 / 0.00508;

// ── Scenario definition ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RadarNode {
    pub name: String,
    pub tx_lla: [f64; 3],
    pub rx_lla: [f64; 3],
    pub fc_hz: f64,
}

#[derive(Debug, Clone)]
pub struct AircraftTrack {
    pub hex: String,
    pub flight: String,
    /// Track origin at t = 0
    pub origin_lla: [f64; 3],
    /// Constant ENU velocity, m/s
    pub velocity_enu: [f64; 3],
}

impl AircraftTrack {
    pub fn position_at(&self, t_s: f64) -> [f64; 3] {
        enu_to_lla(
            [
                self.velocity_enu[0] * t_s,
                self.velocity_enu[1] * t_s,
                self.velocity_enu[2] * t_s,
            ],
            self.origin_lla,
        )
    }

    fn ground_speed_knots(&self) -> f64 {
        (self.velocity_enu[0].powi(2) + self.velocity_enu[1].powi(2)).sqrt() * MPS_TO_KNOTS
    }

    fn track_deg(&self) -> f64 {
        let deg = f64::atan2(self.velocity_enu[0], self.velocity_enu[1]).to_degrees();
        if deg < 0.0 {
            deg + 360.0
        } else {
            deg
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub nodes: Vec<RadarNode>,
    pub aircraft: AircraftTrack,
    /// 1-σ delay noise, km
    pub sigma_delay_km: f64,
    /// 1-σ Doppler noise, Hz
    pub sigma_doppler_hz: f64,
}

impl Scenario {
    /// Default Adelaide layout: one VHF illuminator, `n_nodes` receivers on
    /// a ring around it.
    pub fn adelaide(n_nodes: usize, aircraft: AircraftTrack) -> Self {
        let tx_lla = [-34.9000, 138.5500, 150.0];
        let ring = [
            [-34.8500, 138.6500, 30.0],
            [-34.9900, 138.6300, 45.0],
            [-34.9200, 138.4700, 20.0],
            [-34.8300, 138.5200, 35.0],
            [-35.0100, 138.5000, 55.0],
        ];

        let nodes = (0..n_nodes.min(ring.len()))
            .map(|i| RadarNode {
                name: format!("radar-{}", (b'a' + i as u8) as char),
                tx_lla,
                rx_lla: ring[i],
                fc_hz: 204_640_000.0,
            })
            .collect();

        Self {
            nodes,
            aircraft,
            sigma_delay_km: 0.05,
            sigma_doppler_hz: 2.0,
        }
    }

    /// The receiver's `/api/config` document.
    pub fn config_for(&self, node: usize) -> RadarConfig {
        let n = &self.nodes[node];
        RadarConfig {
            location: SitePair {
                tx: SiteLocation {
                    latitude: n.tx_lla[0],
                    longitude: n.tx_lla[1],
                    altitude: n.tx_lla[2],
                },
                rx: SiteLocation {
                    latitude: n.rx_lla[0],
                    longitude: n.rx_lla[1],
                    altitude: n.rx_lla[2],
                },
            },
            capture: Some(CaptureConfig { fc: n.fc_hz }),
            frequency: None,
        }
    }

    /// The receiver's `/api/detection` document at elapsed time `t_s`:
    /// the true bistatic observables plus Gaussian measurement noise.
    pub fn detections_for(&self, node: usize, t_s: f64, now_ms: f64) -> Vec<RadarDetection> {
        let n = &self.nodes[node];
        let tgt = self.aircraft.position_at(t_s);

        let delay = bistatic_delay_km(n.tx_lla, n.rx_lla, tgt);
        let doppler =
            bistatic_doppler_hz(n.tx_lla, n.rx_lla, tgt, self.aircraft.velocity_enu, n.fc_hz);

        // fresh rng per call keeps the handlers stateless
        let mut rng = rand::thread_rng();
        let delay_noise = Normal::new(0.0, self.sigma_delay_km).map_or(0.0, |d| d.sample(&mut rng));
        let doppler_noise =
            Normal::new(0.0, self.sigma_doppler_hz).map_or(0.0, |d| d.sample(&mut rng));

        vec![RadarDetection {
            delay: delay + delay_noise,
            doppler: doppler + doppler_noise,
            timestamp: now_ms,
        }]
    }

    /// The `/data/aircraft.json` truth document at elapsed time `t_s`.
    pub fn aircraft_json(&self, t_s: f64, now_s: f64) -> AircraftJson {
        let tgt = self.aircraft.position_at(t_s);
        AircraftJson {
            now: now_s,
            aircraft: vec![Aircraft {
                hex: self.aircraft.hex.clone(),
                lat: Some(tgt[0]),
                lon: Some(tgt[1]),
                alt_geom: Some(tgt[2]),
                flight: Some(self.aircraft.flight.clone()),
                seen_pos: Some(0.2),
                gs: Some(self.aircraft.ground_speed_knots()),
                track: Some(self.aircraft.track_deg()),
                geom_rate: Some(self.aircraft.velocity_enu[2] * MPS_TO_FTMIN),
            }],
        }
    }
}
