//! geometry.rs — WGS-84 coordinate conversions and the bistatic ellipsoid
//!
//! All functions are pure and operate on `[f64; 3]` triples:
//! LLA `[lat_deg, lon_deg, alt_m]`, ECEF `[x, y, z]` m, ENU `[e, n, u]` m.
//!
//! The LLA↔ENU pair uses a spherical small-angle approximation on the
//! semi-major axis; LLA↔ECEF uses the full ellipsoid formula with an
//! iterative latitude refinement on the way back.

use serde::{Deserialize, Serialize};

/// WGS-84 semi-major axis, meters
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 first eccentricity squared
pub const WGS84_E2: f64 = 0.006_694_379_990_14;

// ── LLA ↔ ECEF ────────────────────────────────────────────────────────────────

/// Geodetic LLA to ECEF.
pub fn lla_to_ecef(lla: [f64; 3]) -> [f64; 3] {
    let lat = lla[0].to_radians();
    let lon = lla[1].to_radians();
    let alt = lla[2];

    let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin().powi(2)).sqrt();

    [
        (n + alt) * lat.cos() * lon.cos(),
        (n + alt) * lat.cos() * lon.sin(),
        (n * (1.0 - WGS84_E2) + alt) * lat.sin(),
    ]
}

/// ECEF to geodetic LLA, three latitude refinement rounds.
pub fn ecef_to_lla(ecef: [f64; 3]) -> [f64; 3] {
    let [x, y, z] = ecef;
    let p = (x * x + y * y).sqrt();

    let mut lat = f64::atan2(z, p * (1.0 - WGS84_E2));
    for _ in 0..3 {
        let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin().powi(2)).sqrt();
        lat = f64::atan2(z + WGS84_E2 * n * lat.sin(), p);
    }

    let lon = f64::atan2(y, x);
    let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin().powi(2)).sqrt();
    let alt = p / lat.cos() - n;

    [lat.to_degrees(), lon.to_degrees(), alt]
}

// ── LLA ↔ ENU ─────────────────────────────────────────────────────────────────

/// LLA to ENU relative to a reference LLA (spherical approximation).
pub fn lla_to_enu(target: [f64; 3], reference: [f64; 3]) -> [f64; 3] {
    let dlat = (target[0] - reference[0]).to_radians();
    let dlon = (target[1] - reference[1]).to_radians();

    [
        dlon * WGS84_A * reference[0].to_radians().cos(),
        dlat * WGS84_A,
        target[2] - reference[2],
    ]
}

/// ENU relative to a reference LLA back to LLA.
pub fn enu_to_lla(enu: [f64; 3], reference: [f64; 3]) -> [f64; 3] {
    let dlat = enu[1] / WGS84_A;
    let dlon = enu[0] / (WGS84_A * reference[0].to_radians().cos());

    [
        reference[0] + dlat.to_degrees(),
        reference[1] + dlon.to_degrees(),
        reference[2] + enu[2],
    ]
}

/// ENU relative to a reference LLA to ECEF.
pub fn enu_to_ecef(enu: [f64; 3], reference: [f64; 3]) -> [f64; 3] {
    lla_to_ecef(enu_to_lla(enu, reference))
}

/// ECEF to ENU relative to a reference LLA.
pub fn ecef_to_enu(ecef: [f64; 3], reference: [f64; 3]) -> [f64; 3] {
    lla_to_enu(ecef_to_lla(ecef), reference)
}

// ── Distances & means ─────────────────────────────────────────────────────────

/// Euclidean distance between two points in the same Cartesian frame.
pub fn distance_enu(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let dz = b[2] - a[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Distance between two LLA points, via ENU around the first.
pub fn distance_lla(a: [f64; 3], b: [f64; 3]) -> f64 {
    let enu = lla_to_enu(b, a);
    (enu[0] * enu[0] + enu[1] * enu[1] + enu[2] * enu[2]).sqrt()
}

/// Component-wise mean of a point set. None when empty.
pub fn average_points(points: &[[f64; 3]]) -> Option<[f64; 3]> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let mut sum = [0.0; 3];
    for p in points {
        sum[0] += p[0];
        sum[1] += p[1];
        sum[2] += p[2];
    }
    Some([sum[0] / n, sum[1] / n, sum[2] / n])
}

// ── Bistatic predictions ──────────────────────────────────────────────────────

/// Bistatic delay in km for a target at `tgt`:
/// `(‖tx−tgt‖ + ‖rx−tgt‖ − ‖tx−rx‖) / 1000`.
pub fn bistatic_delay_km(tx_lla: [f64; 3], rx_lla: [f64; 3], tgt_lla: [f64; 3]) -> f64 {
    (distance_lla(tx_lla, tgt_lla) + distance_lla(rx_lla, tgt_lla) - distance_lla(tx_lla, rx_lla))
        / 1000.0
}

/// Bistatic Doppler in Hz for a target at `tgt` moving at `vel_enu` m/s.
///
/// The bistatic range rate is the projection of the velocity onto the sum
/// of the tx→target and rx→target unit vectors; an approaching target
/// yields positive Doppler.
pub fn bistatic_doppler_hz(
    tx_lla: [f64; 3],
    rx_lla: [f64; 3],
    tgt_lla: [f64; 3],
    vel_enu: [f64; 3],
    fc_hz: f64,
) -> f64 {
    // ENU frame at the target: tx/rx positions relative to the aircraft
    let tx = lla_to_enu(tx_lla, tgt_lla);
    let rx = lla_to_enu(rx_lla, tgt_lla);
    let r_tx = (tx[0] * tx[0] + tx[1] * tx[1] + tx[2] * tx[2]).sqrt();
    let r_rx = (rx[0] * rx[0] + rx[1] * rx[1] + rx[2] * rx[2]).sqrt();
    if r_tx < 1.0 || r_rx < 1.0 {
        return 0.0;
    }

    // d/dt (|tgt−tx| + |tgt−rx|) = v · (u_tx→tgt + u_rx→tgt)
    let mut range_rate = 0.0;
    for i in 0..3 {
        range_rate += vel_enu[i] * (-tx[i] / r_tx - rx[i] / r_rx);
    }

    -(fc_hz / crate::SPEED_OF_LIGHT_MPS) * range_rate
}

// ── Bistatic ellipsoid ────────────────────────────────────────────────────────

/// Surface of constant bistatic range for one tx/rx pair.
///
/// Stores the foci, their midpoint, the focal separation and the baseline
/// orientation. A bistatic range `b` maps onto the prolate ellipsoid with
/// semi-major `a = (b + distance) / 2` around this baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ellipsoid {
    pub f1_lla: [f64; 3],
    pub f2_lla: [f64; 3],
    pub name: String,
    pub midpoint_lla: [f64; 3],
    /// Baseline yaw from the ENU east axis, radians
    pub yaw: f64,
    /// Baseline pitch above the local horizontal, radians
    pub pitch: f64,
    /// Focal separation `‖f1 − f2‖`, meters
    pub distance: f64,
}

impl Ellipsoid {
    pub fn new(f1_lla: [f64; 3], f2_lla: [f64; 3], name: impl Into<String>) -> Self {
        let midpoint_lla = [
            (f1_lla[0] + f2_lla[0]) / 2.0,
            (f1_lla[1] + f2_lla[1]) / 2.0,
            (f1_lla[2] + f2_lla[2]) / 2.0,
        ];

        let [e1, n1, u1] = lla_to_enu(f1_lla, midpoint_lla);
        let yaw = -f64::atan2(n1, e1);
        let pitch = f64::atan2(u1, (e1 * e1 + n1 * n1).sqrt());

        Self {
            f1_lla,
            f2_lla,
            name: name.into(),
            midpoint_lla,
            yaw,
            pitch,
            distance: distance_lla(f1_lla, f2_lla),
        }
    }
}
