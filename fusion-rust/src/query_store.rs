//! # query_store
//!
//! Outstanding client fusion configurations, keyed by a short SHA-256 hash
//! of the raw request payload. The listener task inserts/refreshes, the
//! fusion task snapshots and reaps; both sides go through one lock.
//!
//! A config's stored value starts as its bare parsed form and is replaced by
//! the full reply JSON after every tick, so a re-received request answers
//! with the freshest available output.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// First 10 hex chars of SHA-256, the config identity.
pub fn short_hash(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(digest)[..10].to_string()
}

#[derive(Debug, Error)]
pub enum QueryParseError {
    #[error("malformed key=value pair: {0:?}")]
    MalformedPair(String),
    #[error("missing required key: {0}")]
    MissingKey(&'static str),
}

/// One validated client fusion request.
#[derive(Debug, Clone, Serialize)]
pub struct QueryConfig {
    pub hash: String,
    pub server: Vec<String>,
    pub associator: String,
    pub localisation: String,
    /// ADS-B source host:port; empty means no truth feed
    pub adsb: String,
    /// Receipt / refresh time, ms
    pub timestamp: i64,
}

impl QueryConfig {
    /// Parse the query-string form (`server=a&server=b&associator=…`).
    /// Unknown keys were rejected at the HTTP boundary; here they are
    /// simply ignored.
    pub fn parse(payload: &str, timestamp: i64) -> Result<Self, QueryParseError> {
        let mut server = Vec::new();
        let mut associator = None;
        let mut localisation = None;
        let mut adsb = String::new();

        for pair in payload.split('&').filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(QueryParseError::MalformedPair(pair.to_string()));
            };
            match key {
                "server" => server.push(value.to_string()),
                "associator" => associator = Some(value.to_string()),
                "localisation" => localisation = Some(value.to_string()),
                "adsb" => adsb = value.to_string(),
                _ => debug!("query: ignoring unknown key {key}"),
            }
        }

        if server.is_empty() {
            return Err(QueryParseError::MissingKey("server"));
        }
        let localisation = localisation.ok_or(QueryParseError::MissingKey("localisation"))?;

        Ok(Self {
            hash: short_hash(payload),
            server,
            associator: associator.unwrap_or_else(|| "adsb-associator".to_string()),
            localisation,
            adsb,
            timestamp,
        })
    }
}

struct QueryEntry {
    config: QueryConfig,
    /// Full reply from the most recent tick, once one has run
    last_reply: Option<Value>,
}

/// Insertion-ordered store of live query configs.
#[derive(Default)]
pub struct QueryStore {
    entries: Vec<QueryEntry>,
}

pub type SharedQueryStore = Arc<RwLock<QueryStore>>;

impl QueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a new config or refresh the timestamp of an identical one.
    /// Returns the JSON the client should see right now.
    pub fn upsert(&mut self, payload: &str, now_ms: i64) -> Result<Value, QueryParseError> {
        let hash = short_hash(payload);
        if let Some(entry) = self.entries.iter_mut().find(|e| e.config.hash == hash) {
            entry.config.timestamp = now_ms;
            debug!("query: refreshed {hash}");
            return Ok(entry
                .last_reply
                .clone()
                .unwrap_or_else(|| json!(entry.config)));
        }

        let config = QueryConfig::parse(payload, now_ms)?;
        let reply = json!(config);
        debug!("query: added {} ({payload})", config.hash);
        self.entries.push(QueryEntry {
            config,
            last_reply: None,
        });
        Ok(reply)
    }

    /// Drop configs not refreshed within `ttl_s` seconds.
    pub fn reap(&mut self, now_ms: i64, ttl_s: i64) {
        self.entries.retain(|entry| {
            let live = now_ms - entry.config.timestamp <= ttl_s * 1000;
            if !live {
                debug!("query: reaping expired {}", entry.config.hash);
            }
            live
        });
    }

    /// Live configs in insertion order, cloned for lock-free processing.
    pub fn snapshot(&self) -> Vec<QueryConfig> {
        self.entries.iter().map(|e| e.config.clone()).collect()
    }

    /// Attach this tick's reply to its config.
    pub fn store_reply(&mut self, hash: &str, reply: Value) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.config.hash == hash) {
            entry.last_reply = Some(reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str =
        "server=radar-a:8080&server=radar-b:8080&associator=adsb-associator&localisation=ellipsoid-parametric-mean&adsb=adsb.local:5001";

    #[test]
    fn parse_collects_repeated_servers() {
        let config = QueryConfig::parse(PAYLOAD, 1000).unwrap();
        assert_eq!(config.server, vec!["radar-a:8080", "radar-b:8080"]);
        assert_eq!(config.localisation, "ellipsoid-parametric-mean");
        assert_eq!(config.adsb, "adsb.local:5001");
        assert_eq!(config.hash.len(), 10);
    }

    #[test]
    fn parse_rejects_malformed_and_empty() {
        assert!(QueryConfig::parse("server=a&garbage", 0).is_err());
        assert!(QueryConfig::parse("associator=adsb-associator", 0).is_err());
    }

    #[test]
    fn identical_payload_refreshes_in_place() {
        let mut store = QueryStore::new();
        store.upsert(PAYLOAD, 1000).unwrap();
        store.upsert(PAYLOAD, 5000).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].timestamp, 5000);
    }

    #[test]
    fn reap_honours_ttl() {
        let mut store = QueryStore::new();
        store.upsert(PAYLOAD, 1000).unwrap();
        store.reap(60_000, 60);
        assert_eq!(store.len(), 1);
        store.reap(62_001, 60);
        assert!(store.is_empty());
    }

    #[test]
    fn refresh_returns_latest_reply() {
        let mut store = QueryStore::new();
        let first = store.upsert(PAYLOAD, 1000).unwrap();
        assert!(first.get("system_tracks").is_none());

        let hash = short_hash(PAYLOAD);
        store.store_reply(&hash, json!({"hash": hash, "system_tracks": []}));
        let second = store.upsert(PAYLOAD, 2000).unwrap();
        assert!(second.get("system_tracks").is_some());
    }
}
