//! SDCP printer feed: the print lifecycle state machine and the websocket
//! listener that drives it.
//!
//! The printer pushes status packets over a websocket. Code 13 means a
//! print is running and code 1 means the machine is idle; every other code
//! counts as not-printing. The listener reconnects forever on connection
//! loss, and a keepalive task pings the printer so it does not drop the
//! connection on its own.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::matcher::find_spool_for_preset;

pub const STATUS_PRINTING: i64 = 13;
pub const STATUS_IDLE: i64 = 1;

/// Keepalive ping period; the printer closes idle connections after about
/// a minute without traffic.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
/// Fixed backoff between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An inbound feed packet. Packets without a `Status` block carry no
/// lifecycle information and are ignored.
#[derive(Debug, Deserialize)]
pub struct FeedMessage {
    #[serde(rename = "Status")]
    pub status: Option<StatusBlock>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBlock {
    #[serde(rename = "PrintInfo", default)]
    pub print_info: PrintInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrintInfo {
    #[serde(rename = "Status")]
    pub status: Option<i64>,
    #[serde(rename = "Filename", default)]
    pub filename: String,
}

/// Edges the state machine can emit for one status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    PrintStarted,
    PrintFinished,
    Idle,
}

/// Print lifecycle tracker, driven solely by inbound status codes.
///
/// State survives reconnects: a disconnect mid-print must not re-trigger
/// the start edge when the next status packet still reports code 13.
#[derive(Debug, Default)]
pub struct PrintLifecycle {
    print_active: bool,
    waiting_for_idle: bool,
}

impl PrintLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one status code through the machine. The edges are evaluated
    /// in order, so a packet that jumps straight from printing to idle
    /// emits both `PrintFinished` and `Idle`.
    pub fn observe(&mut self, code: i64) -> Vec<Transition> {
        let mut transitions = Vec::new();

        if code == STATUS_PRINTING && !self.print_active {
            self.print_active = true;
            transitions.push(Transition::PrintStarted);
        }

        if code != STATUS_PRINTING && self.print_active {
            self.print_active = false;
            self.waiting_for_idle = true;
            transitions.push(Transition::PrintFinished);
        }

        if self.waiting_for_idle && code == STATUS_IDLE {
            self.waiting_for_idle = false;
            transitions.push(Transition::Idle);
        }

        transitions
    }
}

/// Long-lived feed consumer: connects, reads status packets one at a time
/// and drives the lifecycle machine, reconnecting on any connection loss
/// until shutdown is signaled.
pub struct FeedListener {
    engine: Arc<Engine>,
    lifecycle: PrintLifecycle,
}

impl FeedListener {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            lifecycle: PrintLifecycle::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            if self.engine.shutdown().is_signaled() {
                return;
            }

            let url = self.engine.config.feed_url.clone();
            info!("connecting to printer feed at {}", url);

            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    info!("printer feed connected");
                    let (sink, stream) = ws.split();
                    let heartbeat = tokio::spawn(keepalive(sink));

                    let shutdown = self.read_loop(stream).await;

                    heartbeat.abort();
                    if shutdown {
                        return;
                    }
                }
                Err(e) => warn!("feed connection failed: {}", e),
            }

            info!("reconnecting in {}s", RECONNECT_DELAY.as_secs());
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// Consume packets until the connection ends. Returns true when the
    /// one-shot shutdown path fired and the listener should not reconnect.
    async fn read_loop(&mut self, mut stream: SplitStream<WsStream>) -> bool {
        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("feed read error: {}", e);
                    return false;
                }
            };

            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => {
                    info!("printer closed the feed connection");
                    return false;
                }
                // Pings are answered by tungstenite itself.
                _ => continue,
            };

            if self.handle_packet(&text).await {
                return true;
            }
        }

        warn!("feed connection ended");
        false
    }

    /// Process one packet; returns true when shutdown was signaled.
    async fn handle_packet(&mut self, raw: &str) -> bool {
        let packet: FeedMessage = match serde_json::from_str(raw) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("ignoring unparseable feed packet: {}", e);
                return false;
            }
        };

        let Some(status) = packet.status else {
            return false;
        };
        let Some(code) = status.print_info.status else {
            return false;
        };

        for transition in self.lifecycle.observe(code) {
            match transition {
                Transition::PrintStarted => {
                    self.handle_print_start(&status.print_info.filename).await;
                }
                Transition::PrintFinished => {
                    info!("print ended or paused, waiting for idle");
                }
                Transition::Idle => {
                    info!("printer is idle");
                    if !self.engine.config.always_running {
                        info!("one-shot mode: signaling shutdown");
                        self.engine.shutdown().signal();
                        return true;
                    }
                }
            }
        }

        false
    }

    /// The print-start edge: correlate the reported file with a pending
    /// job and deduct each filament's usage from its matched spool.
    async fn handle_print_start(&mut self, reported: &str) {
        info!("print start detected, reported file: '{}'", reported);

        let shortname = Path::new(reported)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(reported)
            .to_string();

        let Some(job) = self.engine.wait_for_job(&shortname).await else {
            error!(
                "no pending job for '{}' after the full retry window, skipping deduction",
                shortname
            );
            return;
        };

        if job.presets.is_empty() || job.usage_grams.is_empty() {
            error!("missing filament metadata for '{}'", shortname);
        } else {
            info!(
                "using metadata for '{}': presets={:?}, usage={:?}",
                shortname, job.presets, job.usage_grams
            );
            self.engine.refresh_spools().await;
            let spools = self.engine.spools();

            for (preset, grams) in job.presets.iter().zip(&job.usage_grams) {
                if *grams <= 0.0 {
                    continue;
                }

                let Some(spool_id) = find_spool_for_preset(preset, &spools) else {
                    error!("no matching spool for preset '{}'", preset);
                    continue;
                };

                if let Err(e) = self.engine.spoolman.use_filament(spool_id, *grams).await {
                    error!("failed to deduct from spool {}: {}", spool_id, e);
                }
            }
        }

        if self.engine.config.delete_after_print {
            match tokio::fs::remove_file(&job.path).await {
                Ok(()) => info!("deleted {}", job.path.display()),
                Err(e) => warn!("failed to delete {}: {}", job.path.display(), e),
            }
        }

        // The job is consumed by this start even when deletion is off or
        // failed; re-printing the same file requires re-copying it into
        // the watch folder.
        self.engine.jobs.remove(&shortname);
    }
}

/// Periodic keepalive sender tied to one connection. The first ping goes
/// out immediately; a failed send silently ends the task, and the read
/// loop aborts it when the connection closes.
async fn keepalive(mut sink: SplitSink<WsStream, Message>) {
    let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
    loop {
        ticker.tick().await;
        let ping = serde_json::json!({ "cmd": "get_state" }).to_string();
        if sink.send(Message::Text(ping)).await.is_err() {
            return;
        }
    }
}
