//! Hardware video decoder sessions for live elementary streams
//!
//! This crate defines the seam between the stream bridge and a platform video
//! decoder: a configuration descriptor, a session trait modelled on the
//! dequeue/queue/release buffer protocol used by hardware codecs, and the
//! render target decoded frames are pushed onto. Decoded pixels never cross
//! this boundary; the session renders straight onto the bound target.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

mod fallback;

pub use fallback::{FallbackBackend, FallbackSession};

/// Supported compressed video codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    H264,
    H265,
}

impl CodecKind {
    /// MIME type understood by platform decoders
    pub const fn mime(self) -> &'static str {
        match self {
            CodecKind::H264 => "video/avc",
            CodecKind::H265 => "video/hevc",
        }
    }

    /// Number of codec-specific-data buffers a decoder needs before it can start
    pub const fn csd_count(self) -> usize {
        match self {
            CodecKind::H264 => 2,
            CodecKind::H265 => 3,
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Keys under which codec-specific data is attached to a [`VideoFormat`]
pub const CSD_KEYS: [&str; 3] = ["csd-0", "csd-1", "csd-2"];

/// Output buffer flags reported by a session
pub mod buffer_flags {
    pub const CODEC_CONFIG: u32 = 0x2;
    pub const END_OF_STREAM: u32 = 0x4;
    pub const DECODE_ONLY: u32 = 0x20;
}

/// Decoder configuration descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub codec: CodecKind,
    pub width: u32,
    pub height: u32,
    pub max_input_size: usize,
    pub frame_rate: Option<u32>,
    csd: BTreeMap<&'static str, Vec<u8>>,
}

impl VideoFormat {
    pub fn new(codec: CodecKind, width: u32, height: u32) -> Self {
        Self {
            codec,
            width,
            height,
            max_input_size: 0,
            frame_rate: None,
            csd: BTreeMap::new(),
        }
    }

    pub fn mime(&self) -> &'static str {
        self.codec.mime()
    }

    /// Attach a codec-specific-data buffer under one of [`CSD_KEYS`]
    pub fn set_csd(&mut self, key: &'static str, bytes: Vec<u8>) {
        self.csd.insert(key, bytes);
    }

    pub fn csd(&self, key: &str) -> Option<&[u8]> {
        self.csd.get(key).map(Vec::as_slice)
    }

    /// True when every buffer the codec requires is attached
    pub fn has_required_csd(&self) -> bool {
        CSD_KEYS[..self.codec.csd_count()]
            .iter()
            .all(|key| self.csd.contains_key(key))
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} max_in={}",
            self.mime(),
            self.width,
            self.height,
            self.max_input_size
        )?;
        if let Some(fps) = self.frame_rate {
            write!(f, " fps={fps}")?;
        }
        for (key, bytes) in &self.csd {
            write!(f, " {key}={}B", bytes.len())?;
        }
        Ok(())
    }
}

/// Opaque destination surface a session draws decoded frames into.
///
/// Implementations are owned by the host; validity may change at any time
/// from any thread.
pub trait RenderTarget: Send + Sync {
    /// Stable identifier used in diagnostics
    fn id(&self) -> u64;

    /// Whether the surface can still receive frames
    fn is_valid(&self) -> bool;

    /// Called by a session each time it renders a frame onto this target
    fn frame_presented(&self, _pts_us: i64) {}
}

/// Identity comparison for shared render targets
pub fn same_target(a: &Arc<dyn RenderTarget>, b: &Arc<dyn RenderTarget>) -> bool {
    Arc::ptr_eq(a, b)
}

/// Metadata of a decoded output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBufferInfo {
    pub index: usize,
    pub flags: u32,
    pub pts_us: i64,
    pub size: usize,
}

impl OutputBufferInfo {
    pub fn is_codec_config(&self) -> bool {
        self.flags & buffer_flags::CODEC_CONFIG != 0
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags & buffer_flags::END_OF_STREAM != 0
    }

    pub fn is_decode_only(&self) -> bool {
        self.flags & buffer_flags::DECODE_ONLY != 0
    }
}

/// Result of polling a session's output side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    /// A decoded buffer is ready and must be released
    Buffer(OutputBufferInfo),
    /// The output format is now known; buffers after this are renderable
    FormatChanged,
    /// Nothing ready yet
    TryAgainLater,
}

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("decoder configuration failed: {0}")]
    Configure(String),
    #[error("render target is not valid")]
    InvalidTarget,
    #[error("input of {len} bytes exceeds buffer capacity {capacity}")]
    InputOverflow { len: usize, capacity: usize },
    #[error("buffer index {0} is not owned by the caller")]
    InvalidIndex(usize),
    #[error("decoder is in an illegal state: {0}")]
    IllegalState(&'static str),
}

pub type DecoderResult<T> = std::result::Result<T, DecoderError>;

/// A configured and started decoder instance.
///
/// Input and output buffers are addressed by index; a dequeued index is owned
/// by the caller until it is queued (input) or released (output).
pub trait DecoderSession: Send {
    /// Decoder implementation name
    fn name(&self) -> &str;

    /// Wait up to `timeout` for a free input buffer
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> DecoderResult<Option<usize>>;

    /// Capacity in bytes of a dequeued input buffer, if the index is valid
    fn input_buffer_capacity(&self, index: usize) -> Option<usize>;

    /// Copy `data` into the input buffer and submit it for decoding
    fn queue_input_buffer(
        &mut self,
        index: usize,
        data: &[u8],
        pts_us: i64,
        flags: u32,
    ) -> DecoderResult<()>;

    /// Wait up to `timeout` for decoded output
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> DecoderResult<OutputEvent>;

    /// Return an output buffer, rendering it onto the bound target when `render` is set
    fn release_output_buffer(&mut self, index: usize, render: bool) -> DecoderResult<()>;

    /// Rebind the output to a different target without reconfiguring
    fn set_output_target(&mut self, target: Arc<dyn RenderTarget>) -> DecoderResult<()>;

    /// Output format reported by the decoder, once known
    fn output_format(&self) -> Option<VideoFormat>;

    fn stop(&mut self) -> DecoderResult<()>;

    /// Free decoder resources; the session is unusable afterwards
    fn release(&mut self) -> DecoderResult<()>;
}

/// Creates decoder sessions
pub trait DecoderBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Create, configure and start a session rendering onto `target`
    fn create_session(
        &self,
        format: &VideoFormat,
        target: Arc<dyn RenderTarget>,
    ) -> DecoderResult<Box<dyn DecoderSession>>;
}

/// Backend selection options
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Prefer a hardware decoder when the platform offers one
    pub hardware_acceleration: bool,
    /// Number of input buffers a session exposes
    pub input_slots: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            hardware_acceleration: true,
            input_slots: 4,
        }
    }
}

/// Return a descriptive string for the decoder the runtime will use.
pub fn describe_platform_decoder() -> String {
    if is_native_decoding_available() {
        "Platform hardware decoder".to_string()
    } else {
        "Fallback decoder (buffer protocol only, no pixel output)".to_string()
    }
}

/// Check if a hardware decoder backend is compiled in for this platform
pub fn is_native_decoding_available() -> bool {
    false
}

/// Create the decoder backend for this platform
pub fn create_backend(config: DecoderConfig) -> Arc<dyn DecoderBackend> {
    if config.hardware_acceleration && !is_native_decoding_available() {
        info!("native decoder: hardware decoder unavailable, using fallback backend");
    } else {
        info!(
            input_slots = config.input_slots,
            "native decoder: fallback backend selected"
        );
    }
    Arc::new(FallbackBackend::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_config_default() {
        let config = DecoderConfig::default();
        assert!(config.hardware_acceleration);
        assert_eq!(config.input_slots, 4);
    }

    #[test]
    fn codec_mime_and_csd_count() {
        assert_eq!(CodecKind::H264.mime(), "video/avc");
        assert_eq!(CodecKind::H265.mime(), "video/hevc");
        assert_eq!(CodecKind::H264.csd_count(), 2);
        assert_eq!(CodecKind::H265.csd_count(), 3);
    }

    #[test]
    fn format_requires_all_csd_for_codec() {
        let mut format = VideoFormat::new(CodecKind::H265, 1920, 1080);
        format.set_csd("csd-0", vec![0, 0, 0, 1, 0x40]);
        format.set_csd("csd-1", vec![0, 0, 0, 1, 0x42]);
        assert!(!format.has_required_csd());
        format.set_csd("csd-2", vec![0, 0, 0, 1, 0x44]);
        assert!(format.has_required_csd());
        assert_eq!(format.csd("csd-1"), Some(&[0, 0, 0, 1, 0x42][..]));
    }

    #[test]
    fn output_flags() {
        let info = OutputBufferInfo {
            index: 0,
            flags: buffer_flags::CODEC_CONFIG | buffer_flags::DECODE_ONLY,
            pts_us: 0,
            size: 0,
        };
        assert!(info.is_codec_config());
        assert!(info.is_decode_only());
        assert!(!info.is_end_of_stream());
    }

    #[test]
    fn format_display_lists_csd() {
        let mut format = VideoFormat::new(CodecKind::H264, 1280, 720);
        format.max_input_size = 4096;
        format.frame_rate = Some(30);
        format.set_csd("csd-0", vec![1, 2, 3]);
        assert_eq!(
            format.to_string(),
            "video/avc 1280x720 max_in=4096 fps=30 csd-0=3B"
        );
    }
}
