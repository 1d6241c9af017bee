//! # persistence
//!
//! Optional append-only NDJSON record of every tick's reply set. One line
//! per tick, the list of per-query replies. Write failures are logged and
//! swallowed; the fusion loop never stalls on disk.

use anyhow::Result;
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Save file for this run, stamped at startup.
pub fn save_path(save_dir: &str) -> String {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    format!("{save_dir}/{stamp}.ndjson")
}

async fn append_line(path: &str, line: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}

/// Append one tick's replies as a single NDJSON line.
pub async fn append_replies(path: &str, replies: &[Value]) {
    if replies.is_empty() {
        return;
    }
    match serde_json::to_string(replies) {
        Ok(line) => {
            if let Err(e) = append_line(path, &line).await {
                warn!("save: could not append to {path}: {e}");
            } else {
                info!("save: appended {} replies to {path}", replies.len());
            }
        }
        Err(e) => warn!("save: could not serialise replies: {e}"),
    }
}
