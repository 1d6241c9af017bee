//! main.rs — synthetic receiver + ADS-B server entry point
//!
//! Stands in for the external collaborators during development: each
//! simulated receiver gets its own port serving `/api/detection` and
//! `/api/config`, and one extra port serves tar1090-style
//! `/data/aircraft.json` truth. All documents describe the same scripted
//! aircraft, so the fusion engine can be driven end-to-end on one machine:
//!
//! ```text
//! radar-sim --nodes 3 --base-port 8081 --adsb-port 5001
//! # engine query: server=127.0.0.1:8081&server=127.0.0.1:8082&server=127.0.0.1:8083
//! #               &localisation=ellipsoid-parametric-mean&adsb=127.0.0.1:5001
//! ```

mod scenario;

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use tracing::info;

use radar_types::{AircraftJson, RadarConfig, RadarDetection};
use scenario::{AircraftTrack, Scenario};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "radar-sim", about = "Passive Radar Suite synthetic feeds")]
struct Args {
    /// Number of simulated receivers (max 5)
    #[arg(long, default_value = "3")]
    nodes: usize,
    /// First receiver port; node i listens on base_port + i
    #[arg(long, default_value = "8081")]
    base_port: u16,
    /// ADS-B truth port
    #[arg(long, default_value = "5001")]
    adsb_port: u16,
    /// Aircraft ground speed, m/s
    #[arg(long, default_value = "250.0")]
    speed: f64,
    /// Aircraft track over ground, degrees
    #[arg(long, default_value = "90.0")]
    heading: f64,
    /// Aircraft altitude, m
    #[arg(long, default_value = "8000.0")]
    altitude: f64,
    /// 1-σ delay noise, km
    #[arg(long, default_value = "0.05")]
    sigma_delay: f64,
    /// 1-σ Doppler noise, Hz
    #[arg(long, default_value = "2.0")]
    sigma_doppler: f64,
}

// ── Shared context ────────────────────────────────────────────────────────────

struct SimContext {
    scenario: Scenario,
    started: Instant,
}

impl SimContext {
    fn elapsed_s(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

fn now_s() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn detection(
    State((ctx, node)): State<(Arc<SimContext>, usize)>,
) -> Json<Vec<RadarDetection>> {
    let t = ctx.elapsed_s();
    Json(ctx.scenario.detections_for(node, t, now_s() * 1000.0))
}

async fn config(State((ctx, node)): State<(Arc<SimContext>, usize)>) -> Json<RadarConfig> {
    Json(ctx.scenario.config_for(node))
}

async fn aircraft_json(State(ctx): State<Arc<SimContext>>) -> Json<AircraftJson> {
    let t = ctx.elapsed_s();
    Json(ctx.scenario.aircraft_json(t, now_s()))
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "radar_sim=info".into()),
        )
        .init();

    let args = Args::parse();

    let heading = args.heading.to_radians();
    let aircraft = AircraftTrack {
        hex: "7c6b2d".into(),
        flight: "SIM001".into(),
        origin_lla: [-34.9286, 138.5999, args.altitude],
        velocity_enu: [args.speed * heading.sin(), args.speed * heading.cos(), 0.0],
    };

    let mut scenario = Scenario::adelaide(args.nodes, aircraft);
    scenario.sigma_delay_km = args.sigma_delay;
    scenario.sigma_doppler_hz = args.sigma_doppler;

    info!(
        "radar-sim starting — {} receivers from :{}, ADS-B on :{}",
        scenario.nodes.len(),
        args.base_port,
        args.adsb_port
    );

    let ctx = Arc::new(SimContext {
        scenario,
        started: Instant::now(),
    });

    // one server per receiver, so each looks like an independent remote
    for node in 0..ctx.scenario.nodes.len() {
        let app = Router::new()
            .route("/api/detection", get(detection))
            .route("/api/config", get(config))
            .with_state((ctx.clone(), node));

        let port = args.base_port + node as u16;
        let name = ctx.scenario.nodes[node].name.clone();
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .expect("bind receiver port");
            info!("{name} listening on :{port}");
            axum::serve(listener, app).await.expect("receiver server");
        });
    }

    let adsb_app = Router::new()
        .route("/data/aircraft.json", get(aircraft_json))
        .with_state(ctx.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.adsb_port)).await?;
    info!("ADS-B truth listening on :{}", args.adsb_port);
    axum::serve(listener, adsb_app).await?;
    Ok(())
}
