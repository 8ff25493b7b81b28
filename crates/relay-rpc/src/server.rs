// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Stdio transport: newline-delimited JSON requests on stdin, responses and
//! runtime events interleaved on stdout.
//!
//! Responses carry the request `id`; events are `{type, payload}` objects
//! with no `id`. Each request line is dispatched on its own task so a slow
//! call (an OAuth flow, a queued send) never blocks the read loop.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use relay_core::Runtime;

use crate::router::RpcRouter;

pub async fn serve_stdio(rt: Arc<Runtime>) -> anyhow::Result<()> {
    let router = Arc::new(RpcRouter::new(Arc::clone(&rt)));
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);

    // Single writer task: everything destined for stdout funnels through one
    // channel so response and event lines never interleave mid-line.
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // Event forwarder.
    let event_tx = out_tx.clone();
    let mut events = rt.events().subscribe();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let line = event.to_wire().to_string();
                    if event_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "event subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let router = Arc::clone(&router);
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let response = router.dispatch_line(&line).await;
            match serde_json::to_string(&response) {
                Ok(text) => {
                    let _ = out_tx.send(text).await;
                }
                Err(e) => warn!(error = %e, "failed to serialize response"),
            }
        });
        if rt.is_shutting_down() {
            break;
        }
    }

    debug!("stdin closed; shutting down");
    rt.shutdown();
    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
