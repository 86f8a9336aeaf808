//! NAL unit extraction for Annex-B (start-code delimited) and AVCC
//! (4-byte length-prefixed) bitstreams.
//!
//! Parsing is stateless and lossy by design: malformed or truncated trailing
//! data ends the walk without an error.

use native_decoder::CodecKind;

/// Bitstream framing convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Units separated by `00 00 01` or `00 00 00 01`
    AnnexB,
    /// Each unit preceded by a 4-byte big-endian length
    LengthPrefixed,
}

/// Detect framing from the first four bytes
pub fn detect_framing(data: &[u8]) -> Framing {
    if data.len() >= 4 && (data[..3] == [0, 0, 1] || data[..4] == [0, 0, 0, 1]) {
        Framing::AnnexB
    } else {
        Framing::LengthPrefixed
    }
}

/// NAL unit type of `unit`, `None` for an empty unit
pub fn nal_type(unit: &[u8], codec: CodecKind) -> Option<u8> {
    let first = *unit.first()?;
    Some(match codec {
        CodecKind::H264 => first & 0x1F,
        CodecKind::H265 => (first >> 1) & 0x3F,
    })
}

/// Whether `nal_type` carries coded picture data
pub fn is_vcl(nal_type: u8, codec: CodecKind) -> bool {
    match codec {
        CodecKind::H264 => (1..=5).contains(&nal_type),
        CodecKind::H265 => nal_type <= 31,
    }
}

/// One framing unit, borrowed from the parsed buffer (start code / length excluded)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    pub data: &'a [u8],
    pub nal_type: u8,
}

/// Iterate the NAL units of `data` in stream order
pub fn nal_units(data: &[u8], codec: CodecKind) -> NalUnits<'_> {
    NalUnits {
        data,
        codec,
        framing: detect_framing(data),
        pos: 0,
        done: data.is_empty(),
    }
}

pub struct NalUnits<'a> {
    data: &'a [u8],
    codec: CodecKind,
    framing: Framing,
    pos: usize,
    done: bool,
}

impl<'a> NalUnits<'a> {
    fn start_code_len_at(&self, pos: usize) -> usize {
        let d = self.data;
        if pos + 3 < d.len() && d[pos..pos + 4] == [0, 0, 0, 1] {
            4
        } else if pos + 2 < d.len() && d[pos..pos + 3] == [0, 0, 1] {
            3
        } else {
            0
        }
    }

    fn unit(&self, start: usize, end: usize) -> Option<NalUnit<'a>> {
        let data = &self.data[start..end];
        nal_type(data, self.codec).map(|nal_type| NalUnit { data, nal_type })
    }

    fn next_annex_b(&mut self) -> Option<NalUnit<'a>> {
        let len = self.data.len();
        loop {
            while self.pos < len && self.start_code_len_at(self.pos) == 0 {
                self.pos += 1;
            }
            if self.pos >= len {
                return None;
            }
            let start = self.pos + self.start_code_len_at(self.pos);
            let mut end = start;
            while end < len && self.start_code_len_at(end) == 0 {
                end += 1;
            }
            self.pos = end;
            if start < end {
                return self.unit(start, end);
            }
        }
    }

    fn next_length_prefixed(&mut self) -> Option<NalUnit<'a>> {
        let d = self.data;
        if self.pos + 4 > d.len() {
            return None;
        }
        let declared = u32::from_be_bytes([
            d[self.pos],
            d[self.pos + 1],
            d[self.pos + 2],
            d[self.pos + 3],
        ]) as usize;
        let start = self.pos + 4;
        if declared == 0 || declared > d.len() - start {
            return None;
        }
        self.pos = start + declared;
        self.unit(start, start + declared)
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = NalUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = match self.framing {
            Framing::AnnexB => self.next_annex_b(),
            Framing::LengthPrefixed => self.next_length_prefixed(),
        };
        if next.is_none() {
            self.done = true;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(data: &[u8], codec: CodecKind) -> Vec<(Vec<u8>, u8)> {
        nal_units(data, codec)
            .map(|u| (u.data.to_vec(), u.nal_type))
            .collect()
    }

    #[test]
    fn annex_b_mixed_start_codes() {
        let data = [
            0, 0, 0, 1, 0x67, 0xAA, 0xBB, // SPS, 4-byte marker
            0, 0, 1, 0x68, 0xCC, // PPS, 3-byte marker
            0, 0, 0, 1, 0x65, 0x01, 0x02, 0x03, // IDR slice
        ];
        let units = collect(&data, CodecKind::H264);
        assert_eq!(
            units,
            vec![
                (vec![0x67, 0xAA, 0xBB], 7),
                (vec![0x68, 0xCC], 8),
                (vec![0x65, 0x01, 0x02, 0x03], 5),
            ]
        );
        assert_eq!(detect_framing(&data), Framing::AnnexB);
    }

    #[test]
    fn annex_b_skips_empty_units_and_leading_garbage() {
        let data = [0xFF, 0, 0, 1, 0, 0, 1, 0x41, 0x9A, 0, 0, 0, 1];
        // leading byte means detection sees length-prefixed framing
        assert_eq!(detect_framing(&data), Framing::LengthPrefixed);

        let data = [0, 0, 1, 0, 0, 1, 0x41, 0x9A, 0, 0, 0, 1];
        let units = collect(&data, CodecKind::H264);
        assert_eq!(units, vec![(vec![0x41, 0x9A], 1)]);
    }

    #[test]
    fn hevc_types_use_bits_one_to_six() {
        let data = [
            0, 0, 0, 1, 0x40, 0x01, // VPS (32)
            0, 0, 0, 1, 0x42, 0x01, // SPS (33)
            0, 0, 0, 1, 0x44, 0x01, // PPS (34)
            0, 0, 0, 1, 0x26, 0x01, // IDR_W_RADL (19)
        ];
        let types: Vec<u8> = nal_units(&data, CodecKind::H265).map(|u| u.nal_type).collect();
        assert_eq!(types, vec![32, 33, 34, 19]);
    }

    #[test]
    fn length_prefixed_stops_at_overrun() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 0, 2, 0x67, 0x42]);
        data.extend_from_slice(&[0, 0, 0, 1, 0x68]);
        data.extend_from_slice(&[0, 0, 0, 9, 0x65, 0x88]); // declares 9, has 2
        let units = collect(&data, CodecKind::H264);
        assert_eq!(units, vec![(vec![0x67, 0x42], 7), (vec![0x68], 8)]);
    }

    #[test]
    fn length_prefixed_ignores_short_tail() {
        let data = [0, 0, 0, 2, 0x09, 0x10, 0, 0];
        let units = collect(&data, CodecKind::H264);
        assert_eq!(units, vec![(vec![0x09, 0x10], 9)]);
    }

    #[test]
    fn empty_and_tiny_buffers_yield_nothing() {
        assert!(collect(&[], CodecKind::H264).is_empty());
        assert!(collect(&[0, 0, 1], CodecKind::H264).is_empty());
    }

    #[test]
    fn parsing_is_idempotent() {
        let data = [0, 0, 1, 0x67, 1, 0, 0, 1, 0x68, 2, 0, 0, 1, 0x41, 3];
        assert_eq!(
            collect(&data, CodecKind::H264),
            collect(&data, CodecKind::H264)
        );
    }

    #[test]
    fn nal_type_of_empty_unit_is_none() {
        assert_eq!(nal_type(&[], CodecKind::H264), None);
        assert_eq!(nal_type(&[0x67], CodecKind::H264), Some(7));
        assert_eq!(nal_type(&[0x42], CodecKind::H265), Some(33));
    }

    #[test]
    fn vcl_classification() {
        assert!(is_vcl(5, CodecKind::H264));
        assert!(!is_vcl(7, CodecKind::H264));
        assert!(is_vcl(19, CodecKind::H265));
        assert!(!is_vcl(33, CodecKind::H265));
    }
}
