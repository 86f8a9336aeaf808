//! Shared fixtures for stream-bridge integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use native_decoder::{
    DecoderBackend, DecoderConfig, DecoderResult, DecoderSession, FallbackBackend, RenderTarget,
    VideoFormat,
};
use parking_lot::Mutex;
use stream_bridge::{
    ComponentIndex, ListenerId, MimeType, Packet, SourceError, StreamInfo, StreamListener,
    StreamSource,
};

/// Fallback backend that remembers every format it was asked to start
pub struct RecordingBackend {
    inner: FallbackBackend,
    pub formats: Mutex<Vec<VideoFormat>>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: FallbackBackend::new(DecoderConfig::default()),
            formats: Mutex::new(Vec::new()),
        })
    }

    pub fn sessions_created(&self) -> usize {
        self.formats.lock().len()
    }

    pub fn last_format(&self) -> Option<VideoFormat> {
        self.formats.lock().last().cloned()
    }
}

impl DecoderBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn create_session(
        &self,
        format: &VideoFormat,
        target: Arc<dyn RenderTarget>,
    ) -> DecoderResult<Box<dyn DecoderSession>> {
        let session = self.inner.create_session(format, target)?;
        self.formats.lock().push(format.clone());
        Ok(session)
    }
}

/// Render target counting presented frames
pub struct CountingTarget {
    id: u64,
    valid: AtomicBool,
    presented: AtomicUsize,
    last_pts: AtomicU64,
}

impl CountingTarget {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            valid: AtomicBool::new(true),
            presented: AtomicUsize::new(0),
            last_pts: AtomicU64::new(0),
        })
    }

    pub fn presented(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }

    pub fn last_pts(&self) -> u64 {
        self.last_pts.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }
}

impl RenderTarget for CountingTarget {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn frame_presented(&self, pts_us: i64) {
        self.presented.fetch_add(1, Ordering::SeqCst);
        self.last_pts.store(pts_us.max(0) as u64, Ordering::SeqCst);
    }
}

/// In-process stream source the test drives by hand
#[derive(Default)]
pub struct ManualSource {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn StreamListener>)>>,
    next_id: AtomicU64,
    pub keep_alive: AtomicBool,
}

impl ManualSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver `frame` through a scratch buffer that is overwritten afterwards
    pub fn deliver(&self, frame: &[u8], info: &StreamInfo) {
        let mut scratch = vec![0xEE; 8];
        scratch.extend_from_slice(frame);
        let listeners: Vec<_> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener.on_receive_stream(&scratch, 8, frame.len(), info);
        }
        scratch.fill(0);
    }
}

impl StreamSource for ManualSource {
    fn add_receive_stream_listener(
        &self,
        _component: ComponentIndex,
        listener: Arc<dyn StreamListener>,
    ) -> Result<ListenerId, SourceError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, listener));
        Ok(id)
    }

    fn remove_receive_stream_listener(&self, id: ListenerId) -> Result<(), SourceError> {
        self.listeners.lock().retain(|(l, _)| *l != id);
        Ok(())
    }

    fn set_keep_alive_decoding(&self, enabled: bool) -> Result<(), SourceError> {
        self.keep_alive.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

pub const H264_SPS: [u8; 8] = [0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F];
pub const H264_PPS: [u8; 7] = [0, 0, 0, 1, 0x68, 0xCE, 0x3C];
pub const H264_IDR: [u8; 8] = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];
pub const H264_SLICE: [u8; 7] = [0, 0, 0, 1, 0x41, 0x9A, 0x02];

/// Parameter sets followed by an IDR slice
pub fn h264_keyframe() -> Vec<u8> {
    [&H264_SPS[..], &H264_PPS[..], &H264_IDR[..]].concat()
}

pub fn h264_packet(bytes: Vec<u8>, width: u32, height: u32) -> Packet {
    Packet {
        bytes,
        pts_us: 0,
        codec: MimeType::H264,
        width,
        height,
        frame_rate: 30,
    }
}

pub fn h264_info(width: i32, height: i32) -> StreamInfo {
    StreamInfo {
        width,
        height,
        frame_rate: 30,
        mime_type: Some(MimeType::H264),
        presentation_time_ms: None,
    }
}
