// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracer push channel.
//!
//! Loopback TCP listener accepting concurrent tracer connections. Frames are
//! newline-delimited JSON; each connection task parses and forwards into a
//! bounded channel drained by a single [`pipeline::Pipeline`] task, which
//! serializes all writes (per-run `seq` order is preserved by construction).
//! A malformed line is logged and dropped; the stream continues.

pub mod pipeline;

pub use pipeline::{IngestError, Pipeline};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use forked_core::TraceFrame;

/// Queue depth between connection readers and the pipeline.
pub const FRAME_QUEUE_DEPTH: usize = 1024;

/// Listener task accepting tracer connections until shutdown.
pub struct IngestListener {
    listener: TcpListener,
    frames: mpsc::Sender<TraceFrame>,
    shutdown: CancellationToken,
}

impl IngestListener {
    pub fn new(
        listener: TcpListener,
        frames: mpsc::Sender<TraceFrame>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { listener, frames, shutdown }
    }

    pub async fn run(self) {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!(%addr, "tracer connected");
                            let frames = self.frames.clone();
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, frames, shutdown).await;
                            });
                        }
                        Err(e) => error!("ingest accept error: {}", e),
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }
    }
}

/// Read newline-delimited frames from one tracer connection.
async fn handle_connection(
    stream: TcpStream,
    frames: mpsc::Sender<TraceFrame>,
    shutdown: CancellationToken,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<TraceFrame>(&line) {
                            Ok(frame) => {
                                if frames.send(frame).await.is_err() {
                                    // Pipeline gone; daemon is shutting down.
                                    return;
                                }
                            }
                            Err(e) => {
                                // One bad frame never stalls the stream.
                                warn!(error = %e, "dropping malformed trace frame");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("tracer disconnected");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "tracer read error");
                        return;
                    }
                }
            }
            _ = shutdown.cancelled() => return,
        }
    }
}
