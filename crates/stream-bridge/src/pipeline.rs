//! Per-packet orchestration on the decode thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use native_decoder::DecoderBackend;
use tracing::{debug, error, info};

use crate::config::{BridgeConfig, LogIntervals};
use crate::controller::{CodecController, ControllerState};
use crate::csd::CsdStore;
use crate::error::{PipelineError, Result};
use crate::log::LogThrottle;
use crate::packet::Packet;
use crate::pts::PtsGenerator;
use crate::surface::{SurfaceSnapshot, SurfaceState};

/// Fallback dimensions and frame rate for packets that carry none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDefaults {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl From<&BridgeConfig> for PacketDefaults {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            width: config.default_width,
            height: config.default_height,
            frame_rate: config.default_frame_rate,
        }
    }
}

/// Fill unknown packet dimensions from the surface, then from `defaults`
pub fn resolve_packet(
    packet: Packet,
    surface: &SurfaceSnapshot,
    defaults: PacketDefaults,
) -> Packet {
    let pick = |own: u32, surface: u32, default: u32| {
        if own > 0 {
            own
        } else if surface > 0 {
            surface
        } else {
            default
        }
    };
    let width = pick(packet.width, surface.width, defaults.width);
    let height = pick(packet.height, surface.height, defaults.height);
    let frame_rate = pick(packet.frame_rate, 0, defaults.frame_rate);
    packet.resolved(width, height, frame_rate)
}

/// Owns all decode state for one channel. Must only be driven from the decode thread.
pub struct DecoderPipeline {
    surface: Arc<SurfaceState>,
    controller: CodecController,
    csd: CsdStore,
    pts: PtsGenerator,
    defaults: PacketDefaults,
    intervals: LogIntervals,
    throttle: LogThrottle,
    packets: u64,
    failures: u64,
}

impl DecoderPipeline {
    pub fn new(
        surface: Arc<SurfaceState>,
        backend: Arc<dyn DecoderBackend>,
        config: &BridgeConfig,
    ) -> Self {
        info!(backend = backend.name(), "pipeline: created");
        Self {
            controller: CodecController::new(surface.clone(), backend, config),
            surface,
            csd: CsdStore::new(),
            pts: PtsGenerator::new(),
            defaults: PacketDefaults::from(config),
            intervals: config.log.clone(),
            throttle: LogThrottle::new(),
            packets: 0,
            failures: 0,
        }
    }

    /// Run one packet through configure, feed and drain.
    ///
    /// Never fails: errors and panics are logged and reset the decoder, and
    /// the next packet starts over from `Idle`.
    pub fn on_packet(&mut self, packet: Packet) {
        self.packets += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process(packet)));
        let err = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(payload) => PipelineError::Panicked(panic_message(payload.as_ref())),
        };
        self.failures += 1;
        error!(error = %err, "pipeline: decode error, resetting decoder");
        self.controller.release();
    }

    fn process(&mut self, packet: Packet) -> Result<()> {
        let snapshot = self.surface.snapshot();
        let (own_width, own_height, own_fps) = (packet.width, packet.height, packet.frame_rate);
        let packet = resolve_packet(packet, &snapshot, self.defaults);

        if (own_width, own_height, own_fps) != (packet.width, packet.height, packet.frame_rate)
            && self.throttle.every("resolve", self.intervals.resolve())
        {
            debug!(
                packet = %format!("{own_width}x{own_height}@{own_fps}"),
                surface = %format!("{}x{}", snapshot.width, snapshot.height),
                resolved = %format!("{}x{}@{}", packet.width, packet.height, packet.frame_rate),
                "pipeline: filled missing packet parameters"
            );
        }
        if self.throttle.every("pkt", self.intervals.packet()) {
            debug!(
                codec = ?packet.codec,
                width = packet.width,
                height = packet.height,
                fps = packet.frame_rate,
                bytes = packet.bytes.len(),
                pts_us = packet.pts_us,
                target_valid = snapshot.is_valid(),
                "pipeline: packet"
            );
        }

        self.csd.update_from(&packet);
        self.controller
            .ensure_configured(&packet, &mut self.csd, &mut self.pts)?;
        self.controller.feed_and_drain(&packet, &mut self.pts)
    }

    /// The host bound a new render target (or re-sent the old one)
    pub fn on_surface_possibly_changed(&mut self) {
        debug!("pipeline: render target possibly changed");
        if let Err(err) = self.controller.on_render_target_possibly_changed() {
            self.failures += 1;
            error!(error = %err, "pipeline: render target switch failed, decoder reset");
            self.controller.release();
        }
    }

    pub fn release(&mut self) {
        info!(
            packets = self.packets,
            failures = self.failures,
            sessions = self.controller.sessions_created(),
            "pipeline: release"
        );
        self.controller.release();
    }

    pub fn state(&self) -> ControllerState {
        self.controller.state()
    }

    pub fn controller(&self) -> &CodecController {
        &self.controller
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Packets or target updates that ended in a decoder reset
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
