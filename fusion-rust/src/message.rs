//! # message
//!
//! Length-prefixed request/reply socket between the query intake and the
//! fusion loop. One frame is a u32 big-endian byte length followed by a
//! UTF-8 payload; replies use the same framing. A connection may carry any
//! number of frames.
//!
//! Socket errors never propagate: a broken connection is logged and
//! dropped, the listener keeps accepting.

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::fusion::now_ms;
use crate::query_store::SharedQueryStore;

/// Frames larger than this are junk, not queries.
const MAX_FRAME_BYTES: u32 = 64 * 1024;

/// Accept-loop task. Bound once at startup; per-connection work is spawned
/// so a slow client never blocks intake.
pub async fn start_listener(port: u16, store: SharedQueryStore) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("query socket listening on {addr}");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("query: connection from {peer}");
                let store = store.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, store).await {
                        debug!("query: connection from {peer} closed: {e}");
                    }
                });
            }
            Err(e) => warn!("query: accept failed: {e}"),
        }
    }
}

async fn serve_connection(mut stream: TcpStream, store: SharedQueryStore) -> anyhow::Result<()> {
    loop {
        let len = match stream.read_u32().await {
            Ok(len) => len,
            Err(_) => return Ok(()), // clean EOF between frames
        };
        if len == 0 || len > MAX_FRAME_BYTES {
            anyhow::bail!("unreasonable frame length {len}");
        }

        let mut payload = vec![0u8; len as usize];
        stream.read_exact(&mut payload).await?;
        let request = String::from_utf8_lossy(&payload).to_string();

        let reply = handle_request(&request, &store).await;
        let body = reply.to_string();
        stream.write_u32(body.len() as u32).await?;
        stream.write_all(body.as_bytes()).await?;
    }
}

/// Parse-or-refresh one request; parse failures answer with an error
/// document and leave the store untouched.
pub async fn handle_request(request: &str, store: &SharedQueryStore) -> serde_json::Value {
    let mut store = store.write().await;
    match store.upsert(request, now_ms()) {
        Ok(reply) => reply,
        Err(e) => {
            warn!("query: rejected request {request:?}: {e}");
            json!({
                "error": format!("Invalid API request format: {e}"),
                "request": request,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_store::QueryStore;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[tokio::test]
    async fn valid_request_is_stored() {
        let store: SharedQueryStore = Arc::new(RwLock::new(QueryStore::new()));
        let reply = handle_request(
            "server=radar-a:8080&localisation=spherical-intersection&adsb=",
            &store,
        )
        .await;
        assert!(reply.get("hash").is_some());
        assert_eq!(store.read().await.len(), 1);
    }

    #[tokio::test]
    async fn bad_request_yields_error_reply() {
        let store: SharedQueryStore = Arc::new(RwLock::new(QueryStore::new()));
        let reply = handle_request("not-a-query-string", &store).await;
        assert!(reply.get("error").is_some());
        assert_eq!(reply["request"], "not-a-query-string");
        assert!(store.read().await.is_empty());
    }
}
