//! # localiser
//!
//! The localiser family behind a single tagged variant, so the fusion loop
//! selects by query id and the policy set stays a one-file swap point.
//!
//! Every variant shares the signature
//! `process(associated, radar_data) → hex → LocalisedTarget` and only
//! attempts targets with at least [`MIN_RADARS`] associated receivers.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::associator::AssociatedDetections;
use crate::config::ParametricKnobs;
use crate::parametric::{Intersection, ParametricLocaliser, SurfaceMode};
use crate::radar_client::RadarData;
use crate::solver::{LmSolver, SolverConfig};
use crate::spherical::SphericalIntersection;

/// Geometric localisation needs three independent bistatic surfaces.
pub const MIN_RADARS: usize = 3;

// ── Output type ───────────────────────────────────────────────────────────────

/// Localiser output for one target.
#[derive(Debug, Clone, Serialize)]
pub struct LocalisedTarget {
    /// LLA points, `[lat, lon, alt]`
    pub points: Vec<[f64; 3]>,
    /// ENU velocity `[e, n, u]` m/s, LM solver only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_enu: Option<[f64; 3]>,
}

pub type LocalisedTargets = BTreeMap<String, LocalisedTarget>;

// ── Variant ───────────────────────────────────────────────────────────────────

/// One engine-owned instance per algorithm id; the parametric variants cache
/// per-radar ellipsoids across ticks.
pub enum Localiser {
    Parametric(ParametricLocaliser),
    Spherical(SphericalIntersection),
    Solver(LmSolver),
}

impl Localiser {
    pub fn process(
        &mut self,
        associated: &AssociatedDetections,
        radar_data: &RadarData,
    ) -> LocalisedTargets {
        match self {
            Localiser::Parametric(p) => p.process(associated, radar_data),
            Localiser::Spherical(s) => s.process(associated, radar_data),
            Localiser::Solver(s) => s.process(associated, radar_data),
        }
    }
}

/// The full algorithm set, built once at startup from the env knobs.
pub struct LocaliserSet {
    pub ellipse_mean: Localiser,
    pub ellipse_min: Localiser,
    pub ellipsoid_mean: Localiser,
    pub ellipsoid_min: Localiser,
    pub spherical: Localiser,
    pub solver: Localiser,
}

impl LocaliserSet {
    pub fn new(ellipse: ParametricKnobs, ellipsoid: ParametricKnobs, solver: SolverConfig) -> Self {
        let parametric = |mode, method, knobs: ParametricKnobs| {
            Localiser::Parametric(ParametricLocaliser::new(
                mode,
                method,
                knobs.n_samples,
                knobs.threshold,
            ))
        };
        Self {
            ellipse_mean: parametric(SurfaceMode::Ellipse, Intersection::Mean, ellipse),
            ellipse_min: parametric(SurfaceMode::Ellipse, Intersection::Min, ellipse),
            ellipsoid_mean: parametric(SurfaceMode::Ellipsoid, Intersection::Mean, ellipsoid),
            ellipsoid_min: parametric(SurfaceMode::Ellipsoid, Intersection::Min, ellipsoid),
            spherical: Localiser::Spherical(SphericalIntersection),
            solver: Localiser::Solver(LmSolver::new(solver)),
        }
    }

    /// Resolve a query's `localisation` id. None for unknown ids.
    pub fn by_id(&mut self, id: &str) -> Option<&mut Localiser> {
        match id {
            "ellipse-parametric-mean" => Some(&mut self.ellipse_mean),
            "ellipse-parametric-min" => Some(&mut self.ellipse_min),
            "ellipsoid-parametric-mean" => Some(&mut self.ellipsoid_mean),
            "ellipsoid-parametric-min" => Some(&mut self.ellipsoid_min),
            "spherical-intersection" => Some(&mut self.spherical),
            "lm-solver" => Some(&mut self.solver),
            _ => None,
        }
    }

    pub fn is_parametric_id(id: &str) -> bool {
        matches!(
            id,
            "ellipse-parametric-mean"
                | "ellipse-parametric-min"
                | "ellipsoid-parametric-mean"
                | "ellipsoid-parametric-min"
        )
    }

    pub fn is_ellipse_id(id: &str) -> bool {
        matches!(id, "ellipse-parametric-mean" | "ellipse-parametric-min")
    }
}
