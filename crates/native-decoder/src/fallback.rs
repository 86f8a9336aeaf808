//! Fallback implementation for platforms without a hardware decoder
//!
//! The fallback session performs the full buffer protocol of a hardware codec
//! (bounded input slots, capacity checks, a format-changed signal ahead of
//! the first output, render-on-release) but produces no pixels. Presented
//! frames are reported to the render target by timestamp only.

use super::*;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Backend producing [`FallbackSession`]s
pub struct FallbackBackend {
    config: DecoderConfig,
}

impl FallbackBackend {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }
}

impl DecoderBackend for FallbackBackend {
    fn name(&self) -> &str {
        "fallback"
    }

    fn create_session(
        &self,
        format: &VideoFormat,
        target: Arc<dyn RenderTarget>,
    ) -> DecoderResult<Box<dyn DecoderSession>> {
        let session = FallbackSession::new(format.clone(), target, self.config.input_slots)?;
        info!(format = %format, "native decoder: fallback session started");
        Ok(Box::new(session))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Running,
    Stopped,
    Released,
}

#[derive(Debug, Clone, Copy)]
struct PendingOutput {
    pts_us: i64,
    flags: u32,
    size: usize,
}

/// Session that tracks buffer ownership like a hardware codec
pub struct FallbackSession {
    format: VideoFormat,
    target: Arc<dyn RenderTarget>,
    state: SessionState,
    free_inputs: VecDeque<usize>,
    input_slots: usize,
    pending: VecDeque<PendingOutput>,
    in_flight: HashMap<usize, PendingOutput>,
    next_output_index: usize,
    format_reported: bool,
}

impl FallbackSession {
    pub fn new(
        format: VideoFormat,
        target: Arc<dyn RenderTarget>,
        input_slots: usize,
    ) -> DecoderResult<Self> {
        if !format.has_required_csd() {
            return Err(DecoderError::Configure(format!(
                "missing codec-specific data for {}",
                format.mime()
            )));
        }
        if format.width == 0 || format.height == 0 {
            return Err(DecoderError::Configure(format!(
                "invalid dimensions {}x{}",
                format.width, format.height
            )));
        }
        if format.max_input_size == 0 {
            return Err(DecoderError::Configure("max input size is zero".into()));
        }
        if !target.is_valid() {
            return Err(DecoderError::InvalidTarget);
        }
        let input_slots = input_slots.max(1);
        Ok(Self {
            format,
            target,
            state: SessionState::Running,
            free_inputs: (0..input_slots).collect(),
            input_slots,
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            next_output_index: 0,
            format_reported: false,
        })
    }

    fn ensure_running(&self) -> DecoderResult<()> {
        match self.state {
            SessionState::Running => Ok(()),
            SessionState::Stopped => Err(DecoderError::IllegalState("session stopped")),
            SessionState::Released => Err(DecoderError::IllegalState("session released")),
        }
    }
}

impl DecoderSession for FallbackSession {
    fn name(&self) -> &str {
        match self.format.codec {
            CodecKind::H264 => "fallback.avc.decoder",
            CodecKind::H265 => "fallback.hevc.decoder",
        }
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> DecoderResult<Option<usize>> {
        self.ensure_running()?;
        Ok(self.free_inputs.pop_front())
    }

    fn input_buffer_capacity(&self, index: usize) -> Option<usize> {
        (index < self.input_slots && !self.free_inputs.contains(&index))
            .then_some(self.format.max_input_size)
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        data: &[u8],
        pts_us: i64,
        flags: u32,
    ) -> DecoderResult<()> {
        self.ensure_running()?;
        let capacity = self
            .input_buffer_capacity(index)
            .ok_or(DecoderError::InvalidIndex(index))?;
        if data.len() > capacity {
            return Err(DecoderError::InputOverflow {
                len: data.len(),
                capacity,
            });
        }
        self.free_inputs.push_back(index);
        if !data.is_empty() || flags & buffer_flags::END_OF_STREAM != 0 {
            self.pending.push_back(PendingOutput {
                pts_us,
                flags,
                size: data.len(),
            });
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> DecoderResult<OutputEvent> {
        self.ensure_running()?;
        if self.pending.is_empty() {
            return Ok(OutputEvent::TryAgainLater);
        }
        if !self.format_reported {
            self.format_reported = true;
            debug!(format = %self.format, "fallback session: output format changed");
            return Ok(OutputEvent::FormatChanged);
        }
        let Some(out) = self.pending.pop_front() else {
            return Ok(OutputEvent::TryAgainLater);
        };
        let index = self.next_output_index;
        self.next_output_index = self.next_output_index.wrapping_add(1);
        self.in_flight.insert(index, out);
        Ok(OutputEvent::Buffer(OutputBufferInfo {
            index,
            flags: out.flags,
            pts_us: out.pts_us,
            size: out.size,
        }))
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> DecoderResult<()> {
        self.ensure_running()?;
        let out = self
            .in_flight
            .remove(&index)
            .ok_or(DecoderError::InvalidIndex(index))?;
        if render {
            if !self.target.is_valid() {
                return Err(DecoderError::InvalidTarget);
            }
            self.target.frame_presented(out.pts_us);
        }
        Ok(())
    }

    fn set_output_target(&mut self, target: Arc<dyn RenderTarget>) -> DecoderResult<()> {
        self.ensure_running()?;
        if !target.is_valid() {
            return Err(DecoderError::InvalidTarget);
        }
        debug!(
            old = self.target.id(),
            new = target.id(),
            "fallback session: output target switched"
        );
        self.target = target;
        Ok(())
    }

    fn output_format(&self) -> Option<VideoFormat> {
        self.format_reported.then(|| self.format.clone())
    }

    fn stop(&mut self) -> DecoderResult<()> {
        self.ensure_running()?;
        self.state = SessionState::Stopped;
        self.pending.clear();
        self.in_flight.clear();
        Ok(())
    }

    fn release(&mut self) -> DecoderResult<()> {
        if self.state == SessionState::Released {
            warn!("fallback session: release called twice");
            return Err(DecoderError::IllegalState("session released"));
        }
        self.state = SessionState::Released;
        self.pending.clear();
        self.in_flight.clear();
        self.free_inputs.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestTarget {
        valid: AtomicBool,
        presented: AtomicUsize,
    }

    impl TestTarget {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                valid: AtomicBool::new(true),
                presented: AtomicUsize::new(0),
            })
        }
    }

    impl RenderTarget for TestTarget {
        fn id(&self) -> u64 {
            7
        }
        fn is_valid(&self) -> bool {
            self.valid.load(Ordering::SeqCst)
        }
        fn frame_presented(&self, _pts_us: i64) {
            self.presented.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn h264_format() -> VideoFormat {
        let mut format = VideoFormat::new(CodecKind::H264, 1280, 720);
        format.max_input_size = 16;
        format.set_csd("csd-0", vec![0, 0, 0, 1, 0x67]);
        format.set_csd("csd-1", vec![0, 0, 0, 1, 0x68]);
        format
    }

    const T: Duration = Duration::from_millis(0);

    #[test]
    fn test_fallback_session_creation() {
        let backend = FallbackBackend::new(DecoderConfig::default());
        let session = backend.create_session(&h264_format(), TestTarget::new());
        assert!(session.is_ok());
    }

    #[test]
    fn creation_requires_csd_and_valid_target() {
        let backend = FallbackBackend::new(DecoderConfig::default());
        let bare = VideoFormat::new(CodecKind::H264, 1280, 720);
        assert!(matches!(
            backend.create_session(&bare, TestTarget::new()),
            Err(DecoderError::Configure(_))
        ));

        let target = TestTarget::new();
        target.valid.store(false, Ordering::SeqCst);
        assert!(matches!(
            backend.create_session(&h264_format(), target),
            Err(DecoderError::InvalidTarget)
        ));
    }

    #[test]
    fn format_change_precedes_first_buffer() {
        let target = TestTarget::new();
        let mut session = FallbackSession::new(h264_format(), target.clone(), 2).unwrap();
        assert_eq!(
            session.dequeue_output_buffer(T).unwrap(),
            OutputEvent::TryAgainLater
        );

        let idx = session.dequeue_input_buffer(T).unwrap().unwrap();
        session.queue_input_buffer(idx, &[1, 2, 3], 100, 0).unwrap();

        assert_eq!(
            session.dequeue_output_buffer(T).unwrap(),
            OutputEvent::FormatChanged
        );
        assert!(session.output_format().is_some());
        let OutputEvent::Buffer(info) = session.dequeue_output_buffer(T).unwrap() else {
            panic!("expected a buffer");
        };
        assert_eq!(info.pts_us, 100);
        session.release_output_buffer(info.index, true).unwrap();
        assert_eq!(target.presented.load(Ordering::SeqCst), 1);
        assert_eq!(
            session.dequeue_output_buffer(T).unwrap(),
            OutputEvent::TryAgainLater
        );
    }

    #[test]
    fn input_slots_are_bounded() {
        let mut session = FallbackSession::new(h264_format(), TestTarget::new(), 2).unwrap();
        let a = session.dequeue_input_buffer(T).unwrap();
        let b = session.dequeue_input_buffer(T).unwrap();
        assert!(a.is_some() && b.is_some());
        assert_eq!(session.dequeue_input_buffer(T).unwrap(), None);
    }

    #[test]
    fn oversized_input_is_rejected() {
        let mut session = FallbackSession::new(h264_format(), TestTarget::new(), 1).unwrap();
        let idx = session.dequeue_input_buffer(T).unwrap().unwrap();
        assert_eq!(session.input_buffer_capacity(idx), Some(16));
        assert!(matches!(
            session.queue_input_buffer(idx, &[0u8; 17], 0, 0),
            Err(DecoderError::InputOverflow {
                len: 17,
                capacity: 16
            })
        ));
    }

    #[test]
    fn stopped_session_rejects_calls() {
        let mut session = FallbackSession::new(h264_format(), TestTarget::new(), 1).unwrap();
        session.stop().unwrap();
        assert!(session.dequeue_input_buffer(T).is_err());
        session.release().unwrap();
        assert!(session.release().is_err());
    }

    #[test]
    fn rebinding_requires_valid_target() {
        let mut session = FallbackSession::new(h264_format(), TestTarget::new(), 1).unwrap();
        let next = TestTarget::new();
        next.valid.store(false, Ordering::SeqCst);
        assert!(session.set_output_target(next).is_err());
        assert!(session.set_output_target(TestTarget::new()).is_ok());
    }
}
