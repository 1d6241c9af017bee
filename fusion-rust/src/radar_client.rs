//! # radar_client
//!
//! Per-tick receiver fetches: `/api/detection` and `/api/config`, both with a
//! hard 1 s timeout. A failed call yields `None` for that slot so the loop
//! degrades gracefully when a receiver is down.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::warn;

use radar_types::{DetectionDocument, RadarConfig, RadarDetection};

const FETCH_TIMEOUT: Duration = Duration::from_secs(1);

/// What one receiver gave us this tick. Either side may be absent.
#[derive(Debug, Clone, Default)]
pub struct RadarSnapshot {
    pub detections: Option<Vec<RadarDetection>>,
    pub config: Option<RadarConfig>,
}

impl RadarSnapshot {
    pub fn has_config(&self) -> bool {
        self.config.is_some()
    }
}

/// Radar key → this tick's snapshot.
pub type RadarData = HashMap<String, RadarSnapshot>;

async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Option<T> {
    match client.get(url).timeout(FETCH_TIMEOUT).send().await {
        Ok(response) => match response.error_for_status() {
            Ok(response) => match response.json().await {
                Ok(body) => Some(body),
                Err(e) => {
                    warn!("radar: bad JSON from {url}: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("radar: {url} returned error status: {e}");
                None
            }
        },
        Err(e) => {
            warn!("radar: fetch from {url} failed: {e}");
            None
        }
    }
}

/// Fetch one receiver's detection list and static geometry.
pub async fn fetch_radar(client: &reqwest::Client, radar: &str) -> RadarSnapshot {
    let detections = fetch_json::<DetectionDocument>(
        client,
        &format!("http://{radar}/api/detection"),
    )
    .await
    .map(DetectionDocument::into_detections);

    let config = fetch_json::<RadarConfig>(client, &format!("http://{radar}/api/config")).await;

    RadarSnapshot { detections, config }
}

/// Concurrent fan-out over all radars referenced this tick; joins before the
/// per-query compute begins. One fetch per radar regardless of how many
/// query configs reference it.
pub async fn fetch_all(client: &reqwest::Client, radars: &[String]) -> RadarData {
    let mut set = JoinSet::new();
    for radar in radars {
        let client = client.clone();
        let radar = radar.clone();
        set.spawn(async move {
            let snapshot = fetch_radar(&client, &radar).await;
            (radar, snapshot)
        });
    }

    let mut data = RadarData::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((radar, snapshot)) => {
                data.insert(radar, snapshot);
            }
            Err(e) => warn!("radar: fetch task panicked: {e}"),
        }
    }
    data
}
