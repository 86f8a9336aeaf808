//! Codec-specific data (parameter sets) observed in the bitstream.
//!
//! H.264: csd-0 = SPS (7), csd-1 = PPS (8).
//! H.265: csd-0 = VPS (32), csd-1 = SPS (33), csd-2 = PPS (34).

use native_decoder::{CodecKind, VideoFormat, CSD_KEYS};

use crate::error::{PipelineError, Result};
use crate::nal::nal_units;
use crate::packet::{MimeType, Packet};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Write-once-until-reset store of parameter sets
#[derive(Debug, Default, Clone)]
pub struct CsdStore {
    slots: [Option<Vec<u8>>; 3],
}

impl CsdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.slots = Default::default();
    }

    /// Capture any parameter sets in `packet` whose slot is still empty
    pub fn update_from(&mut self, packet: &Packet) {
        let codec = match packet.codec {
            MimeType::H264 => CodecKind::H264,
            MimeType::H265 => CodecKind::H265,
            MimeType::Unknown => return,
        };
        for unit in nal_units(&packet.bytes, codec) {
            let Some(slot) = slot_for(codec, unit.nal_type) else {
                continue;
            };
            if self.slots[slot].is_none() {
                self.slots[slot] = Some(with_start_code(unit.data));
            }
        }
    }

    pub fn is_ready_for(&self, codec: CodecKind) -> bool {
        self.slots[..codec.csd_count()].iter().all(Option::is_some)
    }

    /// Attach the stored buffers to `format`; callers check [`Self::is_ready_for`] first
    pub fn apply_to(&self, format: &mut VideoFormat, codec: CodecKind) -> Result<()> {
        if !self.is_ready_for(codec) {
            return Err(PipelineError::InitDataMissing { codec });
        }
        for (key, slot) in CSD_KEYS.iter().copied().zip(&self.slots).take(codec.csd_count()) {
            if let Some(bytes) = slot {
                format.set_csd(key, bytes.clone());
            }
        }
        Ok(())
    }

    /// Stored buffer for slot `index` (start code included)
    pub fn slot(&self, index: usize) -> Option<&[u8]> {
        self.slots.get(index)?.as_deref()
    }
}

fn slot_for(codec: CodecKind, nal_type: u8) -> Option<usize> {
    match (codec, nal_type) {
        (CodecKind::H264, 7) => Some(0),
        (CodecKind::H264, 8) => Some(1),
        (CodecKind::H265, 32) => Some(0),
        (CodecKind::H265, 33) => Some(1),
        (CodecKind::H265, 34) => Some(2),
        _ => None,
    }
}

fn with_start_code(unit: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(START_CODE.len() + unit.len());
    out.extend_from_slice(&START_CODE);
    out.extend_from_slice(unit);
    out
}
