//! # truth
//!
//! ADS-B truth ingester. Pulls `/data/aircraft.json` from a tar1090-style
//! server and reduces it to the live, position-bearing aircraft set.
//!
//! Failures never reach the fusion loop: network errors, bad JSON and
//! ineligible aircraft all collapse to an empty (or smaller) map with a log
//! line.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use radar_types::AircraftJson;

/// One eligible ADS-B aircraft, keyed by its 24-bit hex id.
///
/// Only the position fields appear in reply JSON; the kinematics are kept
/// for Doppler prediction in the associator.
#[derive(Debug, Clone, Serialize)]
pub struct TruthTarget {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub flight: String,
    /// Position timestamp in seconds (`now − seen_pos`)
    pub timestamp: f64,
    /// Ground speed in knots, when reported
    #[serde(skip_serializing)]
    pub gs: Option<f64>,
    /// True track in degrees, when reported
    #[serde(skip_serializing)]
    pub track: Option<f64>,
    /// Geometric climb rate in ft/min, when reported
    #[serde(skip_serializing)]
    pub geom_rate: Option<f64>,
}

impl TruthTarget {
    pub fn lla(&self) -> [f64; 3] {
        [self.lat, self.lon, self.alt]
    }
}

pub type TruthMap = BTreeMap<String, TruthTarget>;

/// Local servers are reached over plain http, everything else over https.
fn is_local(server: &str) -> bool {
    let host = server.split(':').next().unwrap_or("");
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_private(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => host.starts_with("localhost"),
    }
}

pub fn truth_url(server: &str) -> String {
    let scheme = if is_local(server) { "http" } else { "https" };
    format!("{scheme}://{server}/data/aircraft.json")
}

/// Fetch and filter ADS-B truth from one server.
///
/// Eligibility is exactly: `seen_pos` present, `alt_geom` present, `flight`
/// present, and `seen_pos < seen_pos_limit` seconds.
pub async fn fetch_truth(
    client: &reqwest::Client,
    server: &str,
    seen_pos_limit: f64,
    timeout: Duration,
) -> TruthMap {
    let url = truth_url(server);
    let mut output = TruthMap::new();

    let doc: AircraftJson = match client.get(&url).timeout(timeout).send().await {
        Ok(response) => match response.error_for_status() {
            Ok(response) => match response.json().await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("truth: bad JSON from {url}: {e}");
                    return output;
                }
            },
            Err(e) => {
                warn!("truth: {url} returned error status: {e}");
                return output;
            }
        },
        Err(e) => {
            warn!("truth: fetch from {url} failed: {e}");
            return output;
        }
    };

    for aircraft in doc.aircraft {
        let (Some(seen_pos), Some(alt), Some(flight)) =
            (aircraft.seen_pos, aircraft.alt_geom, aircraft.flight.clone())
        else {
            continue;
        };
        if seen_pos >= seen_pos_limit {
            continue;
        }
        let (Some(lat), Some(lon)) = (aircraft.lat, aircraft.lon) else {
            debug!("truth: {} has no position, dropping", aircraft.hex);
            continue;
        };

        output.insert(
            aircraft.hex.clone(),
            TruthTarget {
                lat,
                lon,
                alt,
                flight: flight.trim().to_string(),
                timestamp: doc.now - seen_pos,
                gs: aircraft.gs,
                track: aircraft.track,
                geom_rate: aircraft.geom_rate,
            },
        );
    }

    debug!("truth: {} eligible aircraft from {url}", output.len());
    output
}
