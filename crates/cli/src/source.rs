//! File-backed stream source and headless render target.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use native_decoder::RenderTarget;
use parking_lot::Mutex;
use stream_bridge::{
    ComponentIndex, ListenerId, SourceError, StreamInfo, StreamListener, StreamSource,
};
use tracing::{debug, info};

#[derive(Default)]
struct Shared {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn StreamListener>)>>,
    delivered: AtomicU64,
}

/// Replays pre-split access units to its listeners from a dedicated thread,
/// through one reused delivery buffer
pub struct FileStreamSource {
    shared: Arc<Shared>,
    units: Arc<Vec<Vec<u8>>>,
    info: StreamInfo,
    frame_interval: Option<Duration>,
    next_id: AtomicU64,
    keep_alive: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

impl FileStreamSource {
    /// `frame_interval` paces delivery; `None` delivers as fast as possible
    pub fn new(units: Vec<Vec<u8>>, info: StreamInfo, frame_interval: Option<Duration>) -> Self {
        let (done_tx, done_rx) = bounded(1);
        Self {
            shared: Arc::new(Shared::default()),
            units: Arc::new(units),
            info,
            frame_interval,
            next_id: AtomicU64::new(1),
            keep_alive: AtomicBool::new(false),
            worker: Mutex::new(None),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::SeqCst)
    }

    pub fn keep_alive_requested(&self) -> bool {
        self.keep_alive.load(Ordering::SeqCst)
    }

    /// Block until every unit was delivered or `timeout` passed
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        // the worker drops its sender at end of stream
        !matches!(
            self.done_rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }

    fn spawn_worker(&self) -> Result<(), SourceError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let shared = self.shared.clone();
        let units = self.units.clone();
        let info = self.info.clone();
        let interval = self.frame_interval;
        let done = self.done_tx.lock().take();
        let handle = thread::Builder::new()
            .name("file-stream-source".to_string())
            .spawn(move || {
                deliver(shared, units, info, interval);
                drop(done);
            })
            .map_err(|err| SourceError::Other(err.to_string()))?;
        *worker = Some(handle);
        Ok(())
    }
}

fn deliver(
    shared: Arc<Shared>,
    units: Arc<Vec<Vec<u8>>>,
    mut info: StreamInfo,
    interval: Option<Duration>,
) {
    let fps = i64::from(info.frame_rate.max(1));
    let mut buffer: Vec<u8> = Vec::new();
    let started = Instant::now();

    for (index, unit) in units.iter().enumerate() {
        // leading padding keeps the frame at a non-zero offset
        buffer.clear();
        buffer.extend_from_slice(&[0xFF; 4]);
        buffer.extend_from_slice(unit);
        info.presentation_time_ms = Some((index as i64 + 1) * 1000 / fps);

        let listeners: Vec<_> = shared.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in &listeners {
            listener.on_receive_stream(&buffer, 4, unit.len(), &info);
        }
        shared.delivered.fetch_add(1, Ordering::SeqCst);

        if let Some(interval) = interval {
            let due = started + interval * (index as u32 + 1);
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
    }

    info!(units = units.len(), "file source: end of stream");
}

impl StreamSource for FileStreamSource {
    fn add_receive_stream_listener(
        &self,
        component: ComponentIndex,
        listener: Arc<dyn StreamListener>,
    ) -> Result<ListenerId, SourceError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.listeners.lock().push((id, listener));
        debug!(id, ?component, "file source: listener added");
        self.spawn_worker()?;
        Ok(id)
    }

    fn remove_receive_stream_listener(&self, id: ListenerId) -> Result<(), SourceError> {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        if listeners.len() == before {
            return Err(SourceError::UnknownListener(id));
        }
        Ok(())
    }

    fn set_keep_alive_decoding(&self, enabled: bool) -> Result<(), SourceError> {
        self.keep_alive.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

/// Render target without a display; counts what would have been shown
pub struct HeadlessTarget {
    id: u64,
    presented: AtomicU64,
    last_pts_us: AtomicI64,
}

impl HeadlessTarget {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            presented: AtomicU64::new(0),
            last_pts_us: AtomicI64::new(0),
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::SeqCst)
    }

    pub fn last_pts_us(&self) -> i64 {
        self.last_pts_us.load(Ordering::SeqCst)
    }
}

impl RenderTarget for HeadlessTarget {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn frame_presented(&self, pts_us: i64) {
        self.presented.fetch_add(1, Ordering::SeqCst);
        self.last_pts_us.store(pts_us, Ordering::SeqCst);
    }
}
