//! Live camera stream to hardware decoder bridge
//!
//! Raw H.264/H.265 frames arrive from a [`StreamSource`] on the source's own
//! thread, are copied and posted to a single decode thread, and are fed from
//! there into a decoder session that renders straight onto the host's
//! [`RenderTarget`](native_decoder::RenderTarget).
//!
//! ```text
//! StreamSource ─> CameraStreamClient ─(copy, post)─> DecodeExecutor
//!     ─> DecoderPipeline ─> { CsdStore, PtsGenerator, CodecController } ─> decoder ─> target
//! ```
//!
//! [`BridgeController`] is the host entry point.

pub mod bridge;
pub mod client;
pub mod config;
pub mod controller;
pub mod csd;
pub mod error;
pub mod executor;
pub mod log;
pub mod nal;
pub mod packet;
pub mod pipeline;
pub mod pts;
pub mod surface;

pub use bridge::{BridgeController, SourceProvider};
pub use client::{
    CameraStreamClient, ClientStats, ComponentIndex, ListenerId, PacketSink, StreamListener,
    StreamSource,
};
pub use config::{BridgeConfig, LogIntervals};
pub use controller::{CodecController, ControllerState, RecreateReason};
pub use csd::CsdStore;
pub use error::{ConfigError, PipelineError, SourceError};
pub use executor::{DecodeCmd, DecodeExecutor, DecodeHandle};
pub use packet::{MimeType, Packet, StreamInfo};
pub use pipeline::DecoderPipeline;
pub use pts::PtsGenerator;
pub use surface::{SurfaceSnapshot, SurfaceState};
