//! Inbound packet model and stream metadata.

use serde::{Deserialize, Serialize};

/// Codec identifier carried by the stream metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeType {
    H264,
    H265,
    Unknown,
}

/// Metadata delivered alongside each raw frame by the stream source.
///
/// Fields a given source cannot provide stay zero / `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamInfo {
    pub width: i32,
    pub height: i32,
    pub frame_rate: i32,
    pub mime_type: Option<MimeType>,
    pub presentation_time_ms: Option<i64>,
}

impl StreamInfo {
    /// Compact one-line form for RX diagnostics
    pub fn summary(&self) -> String {
        let mut out = String::from("info{");
        if self.width > 0 {
            out.push_str(&format!("w={} ", self.width));
        }
        if self.height > 0 {
            out.push_str(&format!("h={} ", self.height));
        }
        if self.frame_rate > 0 {
            out.push_str(&format!("fps={} ", self.frame_rate));
        }
        if let Some(mime) = self.mime_type {
            out.push_str(&format!("mime={mime:?} "));
        }
        if let Some(pts) = self.presentation_time_ms {
            out.push_str(&format!("pts={pts} "));
        }
        out.push('}');
        out
    }
}

/// One compressed frame as received from the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub bytes: Vec<u8>,
    /// Presentation timestamp in microseconds; 0 when the source gave none
    pub pts_us: i64,
    pub codec: MimeType,
    /// 0 = unknown
    pub width: u32,
    /// 0 = unknown
    pub height: u32,
    pub frame_rate: u32,
}

impl Packet {
    /// Build a packet from an owned copy of the frame and its metadata
    pub fn from_stream(frame: Vec<u8>, info: &StreamInfo) -> Self {
        let frame_rate = if info.frame_rate > 0 {
            info.frame_rate as u32
        } else {
            30
        };
        let pts_us = match info.presentation_time_ms {
            Some(ms) if ms > 0 => ms.saturating_mul(1000),
            _ => 0,
        };
        Self {
            bytes: frame,
            pts_us,
            codec: info.mime_type.unwrap_or(MimeType::Unknown),
            width: info.width.max(0) as u32,
            height: info.height.max(0) as u32,
            frame_rate,
        }
    }

    /// Same packet with dimensions and frame rate replaced
    pub fn resolved(self, width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            frame_rate,
            ..self
        }
    }
}
