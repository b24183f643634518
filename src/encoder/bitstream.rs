//! H.264 RBSP bit writer and Annex B helpers

use bytes::{BufMut, BytesMut};

pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL unit types used by the encoders
pub mod nal {
    pub const SLICE: u8 = 1;
    pub const IDR: u8 = 5;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
}

/// MSB-first bit writer producing an RBSP (no emulation prevention).
#[derive(Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    bits: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            current: 0,
            bits: 0,
        }
    }

    #[inline]
    pub fn put_bit(&mut self, bit: bool) {
        self.current = (self.current << 1) | bit as u8;
        self.bits += 1;
        if self.bits == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.bits = 0;
        }
    }

    /// Write the low `count` bits of `value`, most significant first. `count <= 32`.
    pub fn put_bits(&mut self, value: u32, count: u8) {
        debug_assert!(count <= 32);
        for i in (0..count).rev() {
            self.put_bit((value >> i) & 1 == 1);
        }
    }

    /// Unsigned Exp-Golomb, ue(v)
    pub fn put_ue(&mut self, value: u32) {
        let code = value as u64 + 1;
        let len = 64 - code.leading_zeros() as u8;
        for _ in 0..len - 1 {
            self.put_bit(false);
        }
        for i in (0..len).rev() {
            self.put_bit((code >> i) & 1 == 1);
        }
    }

    /// Signed Exp-Golomb, se(v)
    pub fn put_se(&mut self, value: i32) {
        let mapped = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.put_ue(mapped);
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bits == 0
    }

    /// Pad with zero bits up to the next byte boundary.
    pub fn align_zero(&mut self) {
        while !self.is_byte_aligned() {
            self.put_bit(false);
        }
    }

    /// Append whole bytes. The writer must be byte aligned.
    pub fn put_aligned_bytes(&mut self, data: &[u8]) {
        debug_assert!(self.is_byte_aligned());
        self.bytes.extend_from_slice(data);
    }

    /// rbsp_trailing_bits(): a stop bit followed by zero alignment.
    pub fn trailing_bits(&mut self) {
        self.put_bit(true);
        self.align_zero();
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.align_zero();
        self.bytes
    }
}

/// Append one NAL unit to `out` in Annex B form: start code, header, escaped payload.
pub fn write_nal(out: &mut BytesMut, nal_ref_idc: u8, nal_type: u8, rbsp: &[u8]) {
    out.reserve(START_CODE.len() + 1 + rbsp.len() + rbsp.len() / 64);
    out.put_slice(&START_CODE);
    out.put_u8(((nal_ref_idc & 0x03) << 5) | (nal_type & 0x1F));

    let mut zeros = 0;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 3 {
            out.put_u8(0x03);
            zeros = 0;
        }
        out.put_u8(byte);
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
}

/// Split Annex B data into NAL units (header byte included, start codes stripped).
pub fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &(_, payload_start)) in starts.iter().enumerate() {
        let mut end = match starts.get(n + 1) {
            Some(&(next, _)) => next,
            None => data.len(),
        };
        // a 4-byte start code leaves one zero behind
        while end > payload_start && data[end - 1] == 0 && n + 1 < starts.len() {
            end -= 1;
        }
        units.push(&data[payload_start..end]);
    }
    units
}

/// Scan Annex B data for a NAL unit with the given type.
pub fn contains_nal_type(data: &[u8], target_type: u8) -> bool {
    nal_units(data)
        .iter()
        .any(|unit| !unit.is_empty() && (unit[0] & 0x1F) == target_type)
}

/// Remove emulation prevention bytes from a NAL payload.
pub fn unescape_rbsp(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut zeros = 0;
    for &byte in payload {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        out.push(byte);
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
    out
}

/// MSB-first reader over an RBSP, used to verify the syntax the writer produces.
#[cfg(test)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

#[cfg(test)]
impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn bit(&mut self) -> bool {
        let byte = self.data[self.pos / 8];
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        bit == 1
    }

    pub fn bits(&mut self, count: u8) -> u32 {
        let mut value = 0;
        for _ in 0..count {
            value = (value << 1) | self.bit() as u32;
        }
        value
    }

    pub fn ue(&mut self) -> u32 {
        let mut zeros = 0;
        while !self.bit() {
            zeros += 1;
        }
        ((1u64 << zeros) - 1 + self.bits(zeros) as u64) as u32
    }

    pub fn se(&mut self) -> i32 {
        let k = self.ue();
        if k % 2 == 1 {
            k.div_ceil(2) as i32
        } else {
            -((k / 2) as i32)
        }
    }

    pub fn align(&mut self) {
        self.pos = self.pos.div_ceil(8) * 8;
    }

    pub fn byte_pos(&self) -> usize {
        self.pos / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exp_golomb() {
        let mut w = BitWriter::new();
        for v in [0u32, 1, 2, 3, 7, 25, 255, 65_535] {
            w.put_ue(v);
        }
        for v in [0i32, 1, -1, 2, -2, 26, -26] {
            w.put_se(v);
        }
        let data = w.finish();

        let mut r = BitReader::new(&data);
        for v in [0u32, 1, 2, 3, 7, 25, 255, 65_535] {
            assert_eq!(r.ue(), v);
        }
        for v in [0i32, 1, -1, 2, -2, 26, -26] {
            assert_eq!(r.se(), v);
        }
    }

    #[test]
    fn test_ue_known_codes() {
        // ue(0) = 1, ue(1) = 010, ue(2) = 011 -> 1010 011 + padding
        let mut w = BitWriter::new();
        w.put_ue(0);
        w.put_ue(1);
        w.put_ue(2);
        assert_eq!(w.finish(), vec![0b1010_0110]);
    }

    #[test]
    fn test_emulation_prevention() {
        let mut out = BytesMut::new();
        write_nal(&mut out, 3, nal::SLICE, &[0, 0, 0, 0, 0, 1, 0, 0, 4]);
        assert_eq!(
            &out[..],
            &[0, 0, 0, 1, 0x61, 0, 0, 3, 0, 0, 3, 0, 1, 0, 0, 4]
        );

        let units = nal_units(&out);
        assert_eq!(units.len(), 1);
        assert_eq!(unescape_rbsp(&units[0][1..]), vec![0, 0, 0, 0, 0, 1, 0, 0, 4]);
    }

    #[test]
    fn test_nal_scan() {
        let mut out = BytesMut::new();
        write_nal(&mut out, 3, nal::SPS, &[0x42, 0xC0]);
        write_nal(&mut out, 3, nal::PPS, &[0xCE]);
        write_nal(&mut out, 3, nal::IDR, &[0x88, 0x80]);

        let units = nal_units(&out);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], &[0x67, 0x42, 0xC0]);
        assert_eq!(units[1], &[0x68, 0xCE]);
        assert!(contains_nal_type(&out, nal::IDR));
        assert!(!contains_nal_type(&out, nal::SLICE));
    }
}
