//! # config
//!
//! Every environment knob the engine reads, collected in one place.
//!
//! Required variables abort startup with a descriptive error when missing
//! or unparseable; tunables fall back to their documented defaults. Remote
//! failures are recovered at runtime, configuration failures are not.

use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::associator::AssociatorConfig;
use crate::solver::SolverConfig;
use crate::tracker::{GatingMode, TrackerConfig, TrackerFrame, UpdateMode};

// ── Parse helpers ─────────────────────────────────────────────────────────────

fn required<T: FromStr>(name: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name)
        .with_context(|| format!("missing required environment variable {name}"))?;
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}"))
}

fn optional<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Comma-separated triple, e.g. `500.0,500.0,500.0`
fn optional_triple(name: &str, default: [f64; 3]) -> Result<[f64; 3]> {
    let raw = match std::env::var(name) {
        Ok(raw) => raw,
        Err(_) => return Ok(default),
    };
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("invalid {name}={raw}"))?;
    if parts.len() != 3 {
        bail!("invalid {name}={raw}: expected three comma-separated values");
    }
    Ok([parts[0], parts[1], parts[2]])
}

// ── Parametric localiser knobs ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ParametricKnobs {
    /// Samples along the u axis (v gets half as many)
    pub n_samples: usize,
    /// Intersection acceptance threshold, meters
    pub threshold: f64,
    /// Samples used for the display ellipsoids in the reply
    pub n_display: usize,
}

// ── Engine configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub ellipse: ParametricKnobs,
    pub ellipsoid: ParametricKnobs,

    /// ADS-B truth entries older than this many seconds are ineligible
    pub adsb_t_delete_s: f64,
    /// Query configs unseen for this many seconds are reaped
    pub t_delete_s: i64,
    /// Append each tick's reply set as one NDJSON line
    pub save: bool,
    pub save_dir: String,

    /// Port for the length-prefixed query socket
    pub event_port: u16,
    /// Truth fetch timeout, seconds
    pub truth_timeout_s: u64,

    pub associator: AssociatorConfig,
    pub solver: SolverConfig,
    pub tracker: TrackerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let ellipse = ParametricKnobs {
            n_samples: required("ELLIPSE_N_SAMPLES")?,
            threshold: required("ELLIPSE_THRESHOLD")?,
            n_display: required("ELLIPSE_N_DISPLAY")?,
        };
        let ellipsoid = ParametricKnobs {
            n_samples: required("ELLIPSOID_N_SAMPLES")?,
            threshold: required("ELLIPSOID_THRESHOLD")?,
            n_display: required("ELLIPSOID_N_DISPLAY")?,
        };

        let save_raw: String = required("THREE_LIPS_SAVE")?;
        let save = save_raw.eq_ignore_ascii_case("true");

        let frame = match optional("TRACKER_FRAME", "enu".to_string())?.as_str() {
            "enu" => TrackerFrame::Enu,
            "ecef" => TrackerFrame::Ecef,
            other => bail!("invalid TRACKER_FRAME={other}: expected enu or ecef"),
        };
        let update_mode = match optional("TRACKER_UPDATE_MODE", "kalman".to_string())?.as_str() {
            "kalman" => UpdateMode::Kalman,
            "blend" => UpdateMode::Blend,
            other => bail!("invalid TRACKER_UPDATE_MODE={other}: expected kalman or blend"),
        };
        let gating = match optional("TRACKER_GATING", "euclidean".to_string())?.as_str() {
            "euclidean" => GatingMode::Euclidean,
            "mahalanobis" => GatingMode::Mahalanobis,
            other => bail!("invalid TRACKER_GATING={other}: expected euclidean or mahalanobis"),
        };

        let tracker = TrackerConfig {
            frame,
            update_mode,
            gating,
            max_misses_to_delete: optional("TRACKER_MAX_MISSES_TO_DELETE", 5)?,
            min_hits_to_confirm: optional("TRACKER_MIN_HITS_TO_CONFIRM", 3)?,
            coast_misses: optional("TRACKER_COAST_MISSES", 3)?,
            gating_euclidean_threshold_m: optional(
                "TRACKER_GATING_EUCLIDEAN_THRESHOLD_M",
                10_000.0,
            )?,
            gating_mahalanobis_threshold: optional("TRACKER_GATING_MAHALANOBIS_THRESHOLD", 11.345)?,
            initial_pos_uncertainty_m: optional_triple(
                "TRACKER_INITIAL_POS_UNCERTAINTY_M",
                [500.0, 500.0, 500.0],
            )?,
            initial_vel_uncertainty_mps: optional_triple(
                "TRACKER_INITIAL_VEL_UNCERTAINTY_MPS",
                [100.0, 100.0, 100.0],
            )?,
            dt_default_s: optional("TRACKER_DT_DEFAULT_S", 1.0)?,
            process_noise_coeff: optional("TRACKER_PROCESS_NOISE_COEFF", 0.1)?,
            measurement_noise_coeff: optional("TRACKER_MEASUREMENT_NOISE_COEFF", 500.0)?,
            ref_lla: [
                optional("MAP_LATITUDE", -34.9286)?,
                optional("MAP_LONGITUDE", 138.5999)?,
                optional("MAP_ALTITUDE", 0.0)?,
            ],
        };

        let associator = AssociatorConfig {
            delay_gate_km: optional("ASSOC_DELAY_GATE_KM", 5.0)?,
            doppler_gate_hz: optional("ASSOC_DOPPLER_GATE_HZ", 50.0)?,
            delay_weight: optional("ASSOC_DELAY_WEIGHT", 1.0)?,
            doppler_weight: optional("ASSOC_DOPPLER_WEIGHT", 0.1)?,
        };

        let solver = SolverConfig {
            max_iterations: optional("SOLVER_MAX_ITERATIONS", 100)?,
            convergence_threshold: optional("SOLVER_CONVERGENCE_THRESHOLD", 1e-6)?,
            residual_ceiling: optional("SOLVER_RESIDUAL_CEILING", 1000.0)?,
        };

        Ok(Self {
            ellipse,
            ellipsoid,
            adsb_t_delete_s: required("ADSB_T_DELETE")?,
            t_delete_s: required("THREE_LIPS_T_DELETE")?,
            save,
            save_dir: optional("SAVE_DIR", "./save".to_string())?,
            event_port: optional("EVENT_PORT", 6969)?,
            truth_timeout_s: optional("TRUTH_TIMEOUT_S", 1)?,
            associator,
            solver,
            tracker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_required_vars() {
        for (k, v) in [
            ("ELLIPSE_N_SAMPLES", "100"),
            ("ELLIPSE_THRESHOLD", "500"),
            ("ELLIPSE_N_DISPLAY", "40"),
            ("ELLIPSOID_N_SAMPLES", "100"),
            ("ELLIPSOID_THRESHOLD", "500"),
            ("ELLIPSOID_N_DISPLAY", "40"),
            ("ADSB_T_DELETE", "10"),
            ("THREE_LIPS_SAVE", "false"),
            ("THREE_LIPS_T_DELETE", "60"),
        ] {
            std::env::set_var(k, v);
        }
    }

    #[test]
    fn from_env_with_required_vars() {
        set_required_vars();
        let config = Config::from_env().unwrap();
        assert_eq!(config.ellipse.n_samples, 100);
        assert_eq!(config.t_delete_s, 60);
        assert!(!config.save);
        assert_eq!(config.tracker.max_misses_to_delete, 5);
    }
}
