//! Subscription to the camera stream source.
//!
//! The source calls back on its own thread with a buffer it may reuse as soon
//! as the callback returns, so every frame is copied before it is handed on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::log::LogThrottle;
use crate::packet::{Packet, StreamInfo};

/// Camera component a stream is requested from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentIndex {
    #[default]
    LeftOrMain,
    Right,
    Up,
    Fpv,
}

pub type ListenerId = u64;

/// Receiver of raw frames from a [`StreamSource`]
pub trait StreamListener: Send + Sync {
    /// `data[offset..offset + length]` is the frame; `data` is only valid for
    /// the duration of the call
    fn on_receive_stream(&self, data: &[u8], offset: usize, length: usize, info: &StreamInfo);
}

/// External camera stream provider
pub trait StreamSource: Send + Sync {
    fn add_receive_stream_listener(
        &self,
        component: ComponentIndex,
        listener: Arc<dyn StreamListener>,
    ) -> Result<ListenerId, SourceError>;

    fn remove_receive_stream_listener(&self, id: ListenerId) -> Result<(), SourceError>;

    /// Ask the source to keep its stream decoder alive without a visible consumer
    fn set_keep_alive_decoding(&self, enabled: bool) -> Result<(), SourceError>;
}

/// Where copied packets go; must not block
pub type PacketSink = Arc<dyn Fn(Packet) + Send + Sync>;

/// Receive counters of the current (or last) session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub session: u64,
    pub frames: u64,
    pub bytes: u64,
}

struct RxListener {
    session: u64,
    started: Instant,
    frames: AtomicU64,
    bytes: AtomicU64,
    active: RwLock<bool>,
    rx_interval: Duration,
    throttle: LogThrottle,
    sink: PacketSink,
}

impl RxListener {
    fn stats(&self) -> ClientStats {
        ClientStats {
            session: self.session,
            frames: self.frames.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

impl StreamListener for RxListener {
    fn on_receive_stream(&self, data: &[u8], offset: usize, length: usize, info: &StreamInfo) {
        // held across the post so that `stop` waits for in-progress callbacks
        let active = self.active.read();
        if !*active {
            return;
        }

        let Some(frame) = offset
            .checked_add(length)
            .and_then(|end| data.get(offset..end))
        else {
            warn!(
                offset,
                length,
                buffer = data.len(),
                "stream client: frame range outside delivered buffer, dropped"
            );
            return;
        };

        let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = self.bytes.fetch_add(length as u64, Ordering::Relaxed) + length as u64;

        // each session gets a fresh listener, so one key per throttle
        if self.throttle.every("rx", self.rx_interval) {
            let elapsed_ms = (self.started.elapsed().as_millis() as u64).max(1);
            info!(
                session = self.session,
                frames,
                bytes,
                kbit_per_s = bytes * 8 / elapsed_ms,
                offset,
                length,
                info = %info.summary(),
                "stream client: rx"
            );
        }

        (self.sink)(Packet::from_stream(frame.to_vec(), info));
    }
}

/// Forwards frames of one camera component into a [`PacketSink`]
pub struct CameraStreamClient {
    source: Arc<dyn StreamSource>,
    component: ComponentIndex,
    keep_alive_decoding: bool,
    rx_interval: Duration,
    sink: PacketSink,
    session: u64,
    listener: Option<(ListenerId, Arc<RxListener>)>,
    last_stats: ClientStats,
}

impl CameraStreamClient {
    pub fn new(
        source: Arc<dyn StreamSource>,
        component: ComponentIndex,
        keep_alive_decoding: bool,
        rx_interval: Duration,
        sink: PacketSink,
    ) -> Self {
        Self {
            source,
            component,
            keep_alive_decoding,
            rx_interval,
            sink,
            session: 0,
            listener: None,
            last_stats: ClientStats::default(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.listener.is_some()
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn stats(&self) -> ClientStats {
        match &self.listener {
            Some((_, listener)) => listener.stats(),
            None => self.last_stats,
        }
    }

    /// Register with the source; no-op while already started
    pub fn start(&mut self) -> Result<(), SourceError> {
        if self.listener.is_some() {
            return Ok(());
        }

        self.session += 1;
        info!(
            component = ?self.component,
            session = self.session,
            "stream client: start"
        );

        let listener = Arc::new(RxListener {
            session: self.session,
            started: Instant::now(),
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            active: RwLock::new(true),
            rx_interval: self.rx_interval,
            throttle: LogThrottle::new(),
            sink: self.sink.clone(),
        });
        let id = self
            .source
            .add_receive_stream_listener(self.component, listener.clone())?;
        self.listener = Some((id, listener));

        if self.keep_alive_decoding {
            match self.source.set_keep_alive_decoding(true) {
                Ok(()) => debug!("stream client: keep-alive decoding enabled"),
                Err(err) => warn!(error = %err, "stream client: enabling keep-alive decoding failed"),
            }
        }
        Ok(())
    }

    /// Unregister from the source. No packet reaches the sink after this returns.
    pub fn stop(&mut self) {
        let Some((id, listener)) = self.listener.take() else {
            return;
        };
        *listener.active.write() = false;

        let stats = listener.stats();
        self.last_stats = stats;
        info!(
            component = ?self.component,
            session = stats.session,
            frames = stats.frames,
            bytes = stats.bytes,
            "stream client: stop"
        );

        if let Err(err) = self.source.remove_receive_stream_listener(id) {
            warn!(error = %err, listener = id, "stream client: removing listener failed");
        }
    }
}

impl Drop for CameraStreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}
