//! # fusion
//!
//! The periodic fusion loop. Once per second: reap stale query configs,
//! fan out receiver and truth fetches (once per distinct remote), run each
//! config's associate→localise pipeline, feed the deduplicated point set
//! plus ADS-B truth into the global tracker, and attach the resulting track
//! file to every reply.
//!
//! Ticks never overlap; if one runs long the next fires after it finishes.
//! Remote failures surface as missing slots, not as tick aborts.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::associator::{AdsbAssociator, AssociatedDetections};
use crate::config::Config;
use crate::localiser::{Localiser, LocaliserSet, MIN_RADARS};
use crate::persistence;
use crate::query_store::{QueryConfig, SharedQueryStore};
use crate::radar_client::{self, RadarData};
use crate::track::AdsbInfo;
use crate::tracker::{Tracker, TrackerInput};
use crate::truth::{self, TruthMap};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Two LLA points count as the same tracker input when they agree to
/// 1e-4 degrees horizontally and 0.1 m vertically.
fn dedup_key(lla: [f64; 3]) -> (i64, i64, i64) {
    (
        (lla[0] * 1e4).round() as i64,
        (lla[1] * 1e4).round() as i64,
        (lla[2] * 10.0).round() as i64,
    )
}

/// Union of the radars referenced by live configs, first-seen order.
fn radar_union(configs: &[QueryConfig]) -> Vec<String> {
    let mut radars: Vec<String> = Vec::new();
    for config in configs {
        for server in &config.server {
            if !radars.contains(server) {
                radars.push(server.clone());
            }
        }
    }
    radars
}

/// Distinct non-empty ADS-B source URLs, first-seen order.
fn adsb_union(configs: &[QueryConfig]) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for config in configs {
        if !config.adsb.is_empty() && !urls.contains(&config.adsb) {
            urls.push(config.adsb.clone());
        }
    }
    urls
}

pub struct FusionEngine {
    config: Config,
    client: reqwest::Client,
    store: SharedQueryStore,
    associator: AdsbAssociator,
    localisers: LocaliserSet,
    tracker: Tracker,
    save_path: String,
}

impl FusionEngine {
    pub fn new(config: Config, store: SharedQueryStore) -> Self {
        let save_path = persistence::save_path(&config.save_dir);
        Self {
            client: reqwest::Client::new(),
            associator: AdsbAssociator::new(config.associator),
            localisers: LocaliserSet::new(config.ellipse, config.ellipsoid, config.solver),
            tracker: Tracker::new(config.tracker.clone()),
            store,
            save_path,
            config,
        }
    }

    /// Run the loop forever at ~1 Hz.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("fusion loop started");
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        let timestamp = now_ms();

        let configs = {
            let mut store = self.store.write().await;
            store.reap(timestamp, self.config.t_delete_s);
            store.snapshot()
        };

        if configs.is_empty() {
            // keep predicting so existing tracks coast and die on schedule
            self.tracker.update_all_tracks(&[], &[], timestamp);
            return;
        }

        // ── Remote fan-out, once per distinct remote ─────────────────────
        let radar_names = radar_union(&configs);
        let radar_data = radar_client::fetch_all(&self.client, &radar_names).await;

        let adsb_urls = adsb_union(&configs);
        let truth_by_url = self.fetch_truth_all(&adsb_urls).await;

        // ── Per-config pipeline ──────────────────────────────────────────
        let mut radar_inputs: Vec<TrackerInput> = Vec::new();
        let mut seen_points = std::collections::HashSet::new();
        let mut replies: Vec<(String, Value)> = Vec::new();

        for config in &configs {
            let started = Instant::now();
            let truth = truth_by_url
                .get(&config.adsb)
                .cloned()
                .unwrap_or_default();

            let radar_data_item: RadarData = config
                .server
                .iter()
                .filter_map(|key| radar_data.get(key).map(|s| (key.clone(), s.clone())))
                .collect();

            if !radar_data_item.values().any(|s| s.has_config()) {
                warn!(
                    "skipping {} — no radar config available for its servers",
                    config.hash
                );
                replies.push((
                    config.hash.clone(),
                    error_reply(
                        config,
                        timestamp,
                        "Missing radar data/config for configured servers.",
                        TruthMap::new(),
                    ),
                ));
                continue;
            }

            let Some(localiser) = self.localisers.by_id(&config.localisation) else {
                warn!(
                    "invalid localisation {:?} for {}",
                    config.localisation, config.hash
                );
                replies.push((
                    config.hash.clone(),
                    error_reply(
                        config,
                        timestamp,
                        &format!("Invalid localisation: {}", config.localisation),
                        truth,
                    ),
                ));
                continue;
            };

            let associated =
                self.associator
                    .process(&config.server, &radar_data_item, &truth, timestamp);

            // The geometric localisers want the ≥3-receiver subset; the LM
            // solver filters internally.
            let localiser_input: AssociatedDetections =
                if config.localisation == "lm-solver" {
                    associated.clone()
                } else {
                    associated
                        .iter()
                        .filter(|(_, dets)| dets.len() >= MIN_RADARS)
                        .map(|(hex, dets)| (hex.clone(), dets.clone()))
                        .collect()
                };

            let localised = localiser.process(&localiser_input, &radar_data_item);

            // collect unique points for the global tracker
            for (target_id, target) in &localised {
                for &point in &target.points {
                    if seen_points.insert(dedup_key(point)) {
                        radar_inputs.push(TrackerInput {
                            lla: point,
                            timestamp_ms: timestamp,
                            source_hash: config.hash.clone(),
                            source_target_id: target_id.clone(),
                            adsb_info: None,
                        });
                    }
                }
            }

            let ellipsoids = display_ellipsoids(
                localiser,
                &config.localisation,
                &associated,
                &radar_data_item,
                if LocaliserSet::is_ellipse_id(&config.localisation) {
                    self.config.ellipse.n_display
                } else {
                    self.config.ellipsoid.n_display
                },
            );

            let elapsed = started.elapsed().as_secs_f64();
            debug!(
                "{}: {} targets associated, {} localised in {elapsed:.4}s",
                config.hash,
                associated.len(),
                localised.len()
            );

            replies.push((
                config.hash.clone(),
                json!({
                    "hash": config.hash,
                    "timestamp": config.timestamp,
                    "timestamp_event": timestamp,
                    "server": config.server,
                    "associator": config.associator,
                    "localisation": config.localisation,
                    "adsb": config.adsb,
                    "detections_associated": associated,
                    "detections_localised": localised,
                    "ellipsoids": ellipsoids,
                    "truth": truth,
                    "time": elapsed,
                }),
            ));
        }

        // ── Global tracker update ────────────────────────────────────────
        let adsb_inputs = adsb_tracker_inputs(&adsb_urls, &truth_by_url, timestamp);
        let snapshots = self
            .tracker
            .update_all_tracks(&radar_inputs, &adsb_inputs, timestamp);
        debug!(
            "tracker: {} radar + {} adsb inputs → {} tracks",
            radar_inputs.len(),
            adsb_inputs.len(),
            snapshots.len()
        );
        let system_tracks = json!(snapshots);

        // ── Reply assembly & persistence ─────────────────────────────────
        let mut saved: Vec<Value> = Vec::with_capacity(replies.len());
        {
            let mut store = self.store.write().await;
            for (hash, mut reply) in replies {
                reply["system_tracks"] = system_tracks.clone();
                store.store_reply(&hash, reply.clone());
                saved.push(reply);
            }
        }

        if self.config.save {
            persistence::append_replies(&self.save_path, &saved).await;
        }
    }

    /// Truth fan-out, once per distinct source URL.
    async fn fetch_truth_all(&self, urls: &[String]) -> HashMap<String, TruthMap> {
        let mut set = JoinSet::new();
        for url in urls {
            let client = self.client.clone();
            let url = url.clone();
            let limit = self.config.adsb_t_delete_s;
            let timeout = Duration::from_secs(self.config.truth_timeout_s);
            set.spawn(async move {
                let truth = truth::fetch_truth(&client, &url, limit, timeout).await;
                (url, truth)
            });
        }

        let mut by_url = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((url, truth)) => {
                    by_url.insert(url, truth);
                }
                Err(e) => warn!("truth: fetch task panicked: {e}"),
            }
        }
        by_url
    }
}

/// Reply for a config that could not be processed this tick.
fn error_reply(config: &QueryConfig, timestamp: i64, error: &str, truth: TruthMap) -> Value {
    json!({
        "hash": config.hash,
        "timestamp": config.timestamp,
        "timestamp_event": timestamp,
        "server": config.server,
        "associator": config.associator,
        "localisation": config.localisation,
        "adsb": config.adsb,
        "error": error,
        "detections_associated": {},
        "detections_localised": {},
        "ellipsoids": {},
        "truth": truth,
        "time": 0.0,
    })
}

/// Display surfaces for the map layer: the first multi-receiver target's
/// per-radar sample rings, parametric localisers only.
fn display_ellipsoids(
    localiser: &mut Localiser,
    localisation_id: &str,
    associated: &AssociatedDetections,
    radar_data: &RadarData,
    n_display: usize,
) -> HashMap<String, Vec<[f64; 3]>> {
    let mut output = HashMap::new();
    if !LocaliserSet::is_parametric_id(localisation_id) {
        return output;
    }
    let Localiser::Parametric(parametric) = localiser else {
        return output;
    };
    let Some((_, detections)) = associated.iter().find(|(_, dets)| dets.len() >= 2) else {
        return output;
    };

    for detection in detections {
        let samples = parametric.display_samples(
            &detection.radar,
            radar_data,
            detection.delay * 1000.0,
            n_display,
        );
        output.insert(detection.radar.clone(), samples);
    }
    output
}

/// Every eligible truth aircraft becomes one high-confidence tracker input.
fn adsb_tracker_inputs(
    urls: &[String],
    truth_by_url: &HashMap<String, TruthMap>,
    timestamp: i64,
) -> Vec<TrackerInput> {
    let mut inputs = Vec::new();
    for url in urls {
        let Some(truth) = truth_by_url.get(url) else {
            continue;
        };
        for (hex, target) in truth {
            let timestamp_ms = if target.timestamp > 0.0 {
                (target.timestamp * 1000.0) as i64
            } else {
                timestamp
            };
            inputs.push(TrackerInput {
                lla: target.lla(),
                timestamp_ms,
                source_hash: format!("adsb_{url}"),
                source_target_id: hex.clone(),
                adsb_info: Some(AdsbInfo {
                    hex: hex.clone(),
                    flight: Some(target.flight.clone()),
                }),
            });
        }
    }
    inputs
}
