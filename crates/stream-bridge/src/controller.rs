//! Decoder session lifecycle.
//!
//! [`CodecController`] owns at most one [`DecoderSession`] and is driven once
//! per packet from the decode thread:
//!
//! ```text
//!   Idle ──(target valid, params known)──> AwaitingInitData ──(CSD ready)──> Active
//!    ^                                                                         │
//!    └──────────── target lost / params changed / decoder error ──────────────┘
//! ```
//!
//! Whether a packet requires a new session is decided by [`plan_configure`],
//! a pure function of the live session's parameters and the packet's.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use native_decoder::{
    same_target, CodecKind, DecoderBackend, DecoderError, DecoderSession, OutputBufferInfo,
    OutputEvent, RenderTarget, VideoFormat,
};
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, LogIntervals};
use crate::csd::CsdStore;
use crate::error::Result;
use crate::log::LogThrottle;
use crate::packet::{MimeType, Packet};
use crate::pts::PtsGenerator;
use crate::surface::SurfaceState;

/// Codec a packet is decoded as; unidentified streams are treated as H.264
pub fn codec_for(mime: MimeType) -> CodecKind {
    match mime {
        MimeType::H265 => CodecKind::H265,
        MimeType::H264 | MimeType::Unknown => CodecKind::H264,
    }
}

/// Stream parameters a session is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub codec: CodecKind,
    pub width: u32,
    pub height: u32,
}

impl SessionParams {
    pub fn for_packet(packet: &Packet) -> Self {
        Self {
            codec: codec_for(packet.codec),
            width: packet.width,
            height: packet.height,
        }
    }
}

impl fmt::Display for SessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.codec, self.width, self.height)
    }
}

/// Why a new session is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateReason {
    NoSession,
    StreamParamsChanged {
        old: SessionParams,
        new: SessionParams,
    },
    MaxInputGrow {
        old: usize,
        new: usize,
    },
}

impl fmt::Display for RecreateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecreateReason::NoSession => f.write_str("no session"),
            RecreateReason::StreamParamsChanged { old, new } => {
                write!(f, "stream params changed {old} -> {new}")
            }
            RecreateReason::MaxInputGrow { old, new } => {
                write!(f, "max input grow {old} -> {new}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureDecision {
    Keep,
    Recreate(RecreateReason),
}

impl ConfigureDecision {
    /// Parameter sets collected so far belong to the old stream and must be dropped
    pub fn resets_init_data(&self) -> bool {
        matches!(
            self,
            ConfigureDecision::Recreate(RecreateReason::StreamParamsChanged { .. })
        )
    }
}

/// Max input size for a packet of `packet_len` bytes; never below `floor` or `current`
pub fn desired_max_input_size(floor: usize, packet_len: usize, current: usize) -> usize {
    floor.max(packet_len.saturating_mul(3)).max(current)
}

/// Transition function for `ensure_configured`
pub fn plan_configure(
    live: Option<SessionParams>,
    wanted: SessionParams,
    current_max: usize,
    desired_max: usize,
) -> ConfigureDecision {
    let Some(old) = live else {
        return ConfigureDecision::Recreate(RecreateReason::NoSession);
    };
    if old != wanted {
        return ConfigureDecision::Recreate(RecreateReason::StreamParamsChanged { old, new: wanted });
    }
    if desired_max > current_max {
        return ConfigureDecision::Recreate(RecreateReason::MaxInputGrow {
            old: current_max,
            new: desired_max,
        });
    }
    ConfigureDecision::Keep
}

/// Render decision for one decoded buffer. Marker buffers are never rendered.
pub fn should_render(
    render_mode: bool,
    target_valid: bool,
    format_ready: bool,
    info: &OutputBufferInfo,
) -> bool {
    render_mode
        && target_valid
        && format_ready
        && !info.is_codec_config()
        && !info.is_end_of_stream()
        && !info.is_decode_only()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    AwaitingInitData,
    Active,
}

struct LiveSession {
    decoder: Box<dyn DecoderSession>,
    params: SessionParams,
    target: Arc<dyn RenderTarget>,
    format_ready: bool,
    render_mode: bool,
}

#[derive(Debug, Default)]
struct DrainStats {
    rendered: u32,
    dropped: u32,
    skipped: u32,
}

impl DrainStats {
    fn total(&self) -> u32 {
        self.rendered + self.dropped + self.skipped
    }
}

/// Owner of the decoder session; single-threaded, driven by the pipeline
pub struct CodecController {
    surface: Arc<SurfaceState>,
    backend: Arc<dyn DecoderBackend>,
    input_timeout: Duration,
    min_max_input_size: usize,
    intervals: LogIntervals,
    throttle: LogThrottle,
    session: Option<LiveSession>,
    current_max_input_size: usize,
    awaiting_init_data: bool,
    sessions_created: u64,
}

impl CodecController {
    pub fn new(
        surface: Arc<SurfaceState>,
        backend: Arc<dyn DecoderBackend>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            surface,
            backend,
            input_timeout: config.input_timeout(),
            min_max_input_size: config.min_max_input_size,
            intervals: config.log.clone(),
            throttle: LogThrottle::new(),
            session: None,
            current_max_input_size: 0,
            awaiting_init_data: false,
            sessions_created: 0,
        }
    }

    pub fn state(&self) -> ControllerState {
        if self.session.is_some() {
            ControllerState::Active
        } else if self.awaiting_init_data {
            ControllerState::AwaitingInitData
        } else {
            ControllerState::Idle
        }
    }

    pub fn sessions_created(&self) -> u64 {
        self.sessions_created
    }

    pub fn current_max_input_size(&self) -> usize {
        self.current_max_input_size
    }

    /// Parameters of the live session, if any
    pub fn session_params(&self) -> Option<SessionParams> {
        self.session.as_ref().map(|s| s.params)
    }

    /// Make sure a session matching `packet` is running, creating one when the
    /// parameter sets are available. Cheap when nothing changed.
    ///
    /// On `Err` the controller has already returned to `Idle`.
    pub fn ensure_configured(
        &mut self,
        packet: &Packet,
        csd: &mut CsdStore,
        pts: &mut PtsGenerator,
    ) -> Result<()> {
        let snapshot = self.surface.snapshot();
        let target = match snapshot.target.clone() {
            Some(target) if snapshot.valid => target,
            _ => {
                if self.throttle.once("surface_invalid_configure") {
                    info!(
                        target = ?snapshot.target_id(),
                        "codec: render target invalid, releasing decoder"
                    );
                }
                self.release();
                return Ok(());
            }
        };

        pts.set_fps_hint(packet.frame_rate);

        let wanted = SessionParams::for_packet(packet);
        let desired_max = desired_max_input_size(
            self.min_max_input_size,
            packet.bytes.len(),
            self.current_max_input_size,
        );
        let decision = plan_configure(
            self.session_params(),
            wanted,
            self.current_max_input_size,
            desired_max,
        );
        let reason = match decision {
            ConfigureDecision::Keep => return Ok(()),
            ConfigureDecision::Recreate(reason) => reason,
        };
        debug!(%reason, "codec: recreate needed");

        if decision.resets_init_data() {
            info!(%reason, "codec: stream params changed, resetting parameter sets");
            csd.reset();
            self.release();
            // the replacement session keeps the grown input size
            self.current_max_input_size = desired_max;
            csd.update_from(packet);
        }

        if !csd.is_ready_for(wanted.codec) {
            self.awaiting_init_data = true;
            if self
                .throttle
                .every(wait_csd_key(wanted.codec), self.intervals.wait_csd())
            {
                info!(codec = %wanted.codec, "codec: waiting for parameter sets before creating decoder");
            }
            return Ok(());
        }

        self.release();

        let mut format = VideoFormat::new(wanted.codec, wanted.width, wanted.height);
        format.max_input_size = desired_max;
        format.frame_rate = (packet.frame_rate > 0).then_some(packet.frame_rate);
        csd.apply_to(&mut format, wanted.codec)?;

        info!(
            %reason,
            format = %format,
            target = target.id(),
            "codec: creating decoder session"
        );
        let decoder = match self.backend.create_session(&format, target.clone()) {
            Ok(decoder) => decoder,
            Err(err) => {
                self.release();
                return Err(err.into());
            }
        };

        info!(
            name = decoder.name(),
            params = %wanted,
            target = target.id(),
            "codec: decoder started"
        );
        self.session = Some(LiveSession {
            decoder,
            params: wanted,
            target,
            format_ready: false,
            render_mode: true,
        });
        self.current_max_input_size = desired_max;
        self.awaiting_init_data = false;
        self.sessions_created += 1;
        pts.reset();
        Ok(())
    }

    /// Follow a render target update: rebind in place, or tear down if the new
    /// target is unusable
    pub fn on_render_target_possibly_changed(&mut self) -> Result<()> {
        if self.session.is_none() {
            debug!("codec: render target update without a session");
            return Ok(());
        }

        let snapshot = self.surface.snapshot();
        let target = match snapshot.target.clone() {
            Some(target) if snapshot.valid => target,
            _ => {
                info!("codec: new render target invalid, releasing decoder");
                self.release();
                return Ok(());
            }
        };

        let Some(live) = self.session.as_mut() else {
            return Ok(());
        };
        if same_target(&live.target, &target) {
            debug!(target = target.id(), "codec: render target unchanged");
            return Ok(());
        }

        let old = live.target.id();
        match live.decoder.set_output_target(target.clone()) {
            Ok(()) => {
                info!(old, new = target.id(), "codec: output target switched");
                live.target = target;
                live.render_mode = true;
                Ok(())
            }
            Err(err) => {
                self.release();
                Err(err.into())
            }
        }
    }

    /// Queue `packet` into the live session and drain all ready output.
    ///
    /// Without a session the packet is dropped. On `Err` the controller has
    /// already returned to `Idle`.
    pub fn feed_and_drain(&mut self, packet: &Packet, pts: &mut PtsGenerator) -> Result<()> {
        if self.session.is_none() {
            return Ok(());
        }
        if let Err(err) = self.feed(packet, pts) {
            self.release();
            return Err(err);
        }
        if let Err(err) = self.drain() {
            self.release();
            return Err(err.into());
        }
        Ok(())
    }

    fn feed(&mut self, packet: &Packet, pts: &mut PtsGenerator) -> Result<()> {
        let Some(live) = self.session.as_mut() else {
            return Ok(());
        };
        let Some(index) = live.decoder.dequeue_input_buffer(self.input_timeout)? else {
            if self.throttle.every("no_input_buf", self.intervals.no_input()) {
                debug!("codec: no input buffer available");
            }
            return Ok(());
        };

        let pts_us = pts.monotonic_us(packet.pts_us);
        let capacity = live
            .decoder
            .input_buffer_capacity(index)
            .ok_or(DecoderError::InvalidIndex(index))?;
        let len = packet.bytes.len();
        if len > capacity {
            warn!(len, capacity, "codec: frame exceeds input buffer, forcing recreate");
            self.current_max_input_size = 0;
            return Err(DecoderError::InputOverflow { len, capacity }.into());
        }

        live.decoder.queue_input_buffer(index, &packet.bytes, pts_us, 0)?;
        Ok(())
    }

    fn drain(&mut self) -> std::result::Result<(), DecoderError> {
        let Some(live) = self.session.as_mut() else {
            return Ok(());
        };
        let mut stats = DrainStats::default();

        loop {
            match live.decoder.dequeue_output_buffer(Duration::ZERO)? {
                OutputEvent::Buffer(info) => {
                    let target_valid = self.surface.snapshot().is_valid();
                    let render =
                        should_render(live.render_mode, target_valid, live.format_ready, &info);
                    if !render {
                        if self.throttle.every("skip_render", self.intervals.skip_render()) {
                            debug!(
                                flags = info.flags,
                                pts_us = info.pts_us,
                                target_valid,
                                format_ready = live.format_ready,
                                render_mode = live.render_mode,
                                "codec: skipping render"
                            );
                        }
                    }
                    live.decoder.release_output_buffer(info.index, render)?;
                    if render {
                        stats.rendered += 1;
                    } else if info.is_codec_config()
                        || info.is_end_of_stream()
                        || info.is_decode_only()
                    {
                        stats.skipped += 1;
                    } else {
                        stats.dropped += 1;
                    }
                }
                OutputEvent::FormatChanged => {
                    live.format_ready = true;
                    match live.decoder.output_format() {
                        Some(format) => info!(format = %format, "codec: output format changed"),
                        None => info!("codec: output format changed"),
                    }
                }
                OutputEvent::TryAgainLater => {
                    if stats.total() > 0
                        && self.throttle.every("drain_stats", self.intervals.drain_stats())
                    {
                        debug!(
                            rendered = stats.rendered,
                            dropped = stats.dropped,
                            skipped = stats.skipped,
                            "codec: drain stats"
                        );
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Stop and free the live session and clear all session state. Idempotent.
    pub fn release(&mut self) {
        let max_input = self.current_max_input_size;
        self.current_max_input_size = 0;
        self.awaiting_init_data = false;

        let Some(mut live) = self.session.take() else {
            return;
        };
        if let Err(err) = live.decoder.stop() {
            debug!(error = %err, "codec: stop failed");
        }
        if let Err(err) = live.decoder.release() {
            warn!(error = %err, "codec: release failed");
        }
        info!(
            params = %live.params,
            max_input,
            target = live.target.id(),
            "codec: decoder released"
        );
    }
}

impl Drop for CodecController {
    fn drop(&mut self) {
        self.release();
    }
}

/// Throttle key for the waiting-for-parameter-sets message, one per codec
fn wait_csd_key(codec: CodecKind) -> &'static str {
    match codec {
        CodecKind::H264 => "wait_csd_h264",
        CodecKind::H265 => "wait_csd_h265",
    }
}
