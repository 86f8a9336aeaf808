//! Access-unit splitting for Annex-B elementary stream files.

use native_decoder::CodecKind;
use stream_bridge::nal::{is_vcl, nal_units, NalUnit};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// True if `unit` is the first slice of a new picture
fn starts_picture(unit: &NalUnit<'_>, codec: CodecKind) -> bool {
    match codec {
        // first_mb_in_slice == 0 encodes as a single `1` bit
        CodecKind::H264 => unit.data.get(1).is_some_and(|b| b & 0x80 != 0),
        // first_slice_segment_in_pic_flag
        CodecKind::H265 => unit.data.get(2).is_some_and(|b| b & 0x80 != 0),
    }
}

/// Non-VCL units that open a new access unit when they follow picture data
fn opens_access_unit(nal_type: u8, codec: CodecKind) -> bool {
    match codec {
        CodecKind::H264 => matches!(nal_type, 6..=9 | 14..=18),
        CodecKind::H265 => matches!(nal_type, 32..=35 | 39 | 41..=44 | 48..=55),
    }
}

/// Group the NAL units of `data` into access units, each re-emitted with
/// 4-byte start codes. Units before the first picture join the first access unit.
pub fn split_access_units(data: &[u8], codec: CodecKind) -> Vec<Vec<u8>> {
    let mut units = Vec::new();
    let mut current = Vec::new();
    let mut has_picture = false;

    for unit in nal_units(data, codec) {
        let vcl = is_vcl(unit.nal_type, codec);
        let boundary = has_picture
            && ((vcl && starts_picture(&unit, codec)) || (!vcl && opens_access_unit(unit.nal_type, codec)));
        if boundary {
            units.push(std::mem::take(&mut current));
            has_picture = false;
        }
        current.extend_from_slice(&START_CODE);
        current.extend_from_slice(unit.data);
        has_picture |= vcl;
    }
    if !current.is_empty() {
        units.push(current);
    }
    units
}

/// Human-readable NAL unit type
pub fn nal_type_name(nal_type: u8, codec: CodecKind) -> &'static str {
    match (codec, nal_type) {
        (CodecKind::H264, 1) => "slice",
        (CodecKind::H264, 5) => "idr",
        (CodecKind::H264, 6) => "sei",
        (CodecKind::H264, 7) => "sps",
        (CodecKind::H264, 8) => "pps",
        (CodecKind::H264, 9) => "aud",
        (CodecKind::H265, 0..=9) => "slice",
        (CodecKind::H265, 16..=21) => "irap",
        (CodecKind::H265, 32) => "vps",
        (CodecKind::H265, 33) => "sps",
        (CodecKind::H265, 34) => "pps",
        (CodecKind::H265, 35) => "aud",
        (CodecKind::H265, 39 | 40) => "sei",
        _ => "other",
    }
}
