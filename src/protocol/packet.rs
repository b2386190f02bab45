// src/protocol/packet.rs
//! Bounded packet buffer speaking the Cube engine's compressed integer format.
//!
//! Integers are written in one of three forms depending on magnitude:
//!
//! | range               | bytes                         |
//! |---------------------|-------------------------------|
//! | `-126..=127`        | the value itself              |
//! | `-32768..=32767`    | `0x80` + little-endian `i16`  |
//! | anything else       | `0x81` + little-endian `i32`  |
//!
//! Reading is overread-tolerant: every getter past the end of the readable
//! data yields zero and raises the overread flag instead of failing. Callers
//! decode a whole message and then check [`PacketBuf::overread`] before
//! trusting any of it.

use byteorder::{ByteOrder, LittleEndian};

const TAG_INT16: u8 = 0x80;
const TAG_INT32: u8 = 0x81;

/// Signed views of the tag bytes as seen by the decoder.
const TAG_INT16_SIGNED: i8 = TAG_INT16 as i8; // -128
const TAG_INT32_SIGNED: i8 = TAG_INT32 as i8; // -127

#[derive(Debug, Clone)]
pub struct PacketBuf {
    buf: Vec<u8>,
    capacity: usize,
    pos: usize,
    read_len: usize,
    overread: bool,
}

impl PacketBuf {
    /// Creates an empty buffer for writing at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            pos: 0,
            read_len: 0,
            overread: false,
        }
    }

    /// Wraps received bytes for reading.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            buf: data.to_vec(),
            capacity: data.len(),
            pos: 0,
            read_len: data.len(),
            overread: false,
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.read_len = 0;
        self.overread = false;
    }

    /// Bytes that can still be written.
    pub fn available(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn overread(&self) -> bool {
        self.overread
    }

    /// Unread bytes; zero once the buffer has been overread.
    pub fn remaining(&self) -> usize {
        if self.overread {
            0
        } else {
            self.read_len - self.pos
        }
    }

    pub fn add_byte(&mut self, byte: u8) {
        if self.buf.len() >= self.capacity {
            return;
        }
        self.buf.push(byte);
    }

    pub fn get_byte(&mut self) -> u8 {
        if self.pos >= self.read_len {
            self.overread = true;
            return 0;
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        byte
    }

    pub fn get_byte_signed(&mut self) -> i8 {
        self.get_byte() as i8
    }

    pub fn add_int(&mut self, val: i32) {
        if val > -127 && val < 128 {
            self.add_byte(val as u8);
        } else if (-0x8000..0x8000).contains(&val) {
            let mut raw = [0u8; 2];
            LittleEndian::write_i16(&mut raw, val as i16);
            self.add_byte(TAG_INT16);
            raw.iter().for_each(|b| self.add_byte(*b));
        } else {
            let mut raw = [0u8; 4];
            LittleEndian::write_i32(&mut raw, val);
            self.add_byte(TAG_INT32);
            raw.iter().for_each(|b| self.add_byte(*b));
        }
    }

    pub fn get_int(&mut self) -> i32 {
        match self.get_byte_signed() {
            TAG_INT16_SIGNED => {
                let raw = [self.get_byte(), self.get_byte()];
                LittleEndian::read_i16(&raw) as i32
            }
            TAG_INT32_SIGNED => {
                let raw = [
                    self.get_byte(),
                    self.get_byte(),
                    self.get_byte(),
                    self.get_byte(),
                ];
                LittleEndian::read_i32(&raw)
            }
            val => val as i32,
        }
    }

    /// Low word first, both words in the compressed integer format.
    pub fn add_int64(&mut self, val: i64) {
        self.add_int(val as i32);
        self.add_int((val >> 32) as i32);
    }

    pub fn get_int64(&mut self) -> i64 {
        let low = self.get_int() as u32 as i64;
        let high = self.get_int() as i64;
        (high << 32) | low
    }

    /// Writes each byte as an integer followed by a zero terminator.
    pub fn add_string(&mut self, text: &[u8]) {
        for &c in text.iter().take_while(|c| **c != 0) {
            self.add_int(c as i32);
        }
        self.add_int(0);
    }

    /// Reads a zero-terminated string, keeping at most `limit` characters.
    ///
    /// Characters beyond `limit` are consumed and dropped so the stream stays
    /// aligned on whatever follows the terminator.
    pub fn get_string(&mut self, limit: usize) -> Vec<u8> {
        let mut text = Vec::new();
        loop {
            let val = self.get_int();
            if val == 0 {
                break;
            }
            if text.len() < limit {
                text.push(val as u8);
            }
            if self.overread {
                break;
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(val: i32) -> Vec<u8> {
        let mut pb = PacketBuf::new(16);
        pb.add_int(val);
        pb.as_bytes().to_vec()
    }

    #[test]
    fn test_int_encoding_widths() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(127), vec![0x7F]);
        assert_eq!(encoded(-126), vec![0x82]);
        assert_eq!(encoded(-127), vec![0x80, 0x81, 0xFF]);
        assert_eq!(encoded(128), vec![0x80, 0x80, 0x00]);
        assert_eq!(encoded(-32768), vec![0x80, 0x00, 0x80]);
        assert_eq!(encoded(32768), vec![0x81, 0x00, 0x80, 0x00, 0x00]);
        assert_eq!(encoded(-1), vec![0xFF]);
    }

    #[test]
    fn test_int_roundtrip_boundaries() {
        let values = [
            i32::MIN,
            i32::MIN + 1,
            -0x8001,
            -0x8000,
            -128,
            -127,
            -126,
            -1,
            0,
            1,
            127,
            128,
            0x7FFF,
            0x8000,
            i32::MAX,
        ];

        let mut pb = PacketBuf::new(values.len() * 5);
        for v in values {
            pb.add_int(v);
        }

        let mut reader = PacketBuf::from_bytes(pb.as_bytes());
        for v in values {
            assert_eq!(reader.get_int(), v);
        }
        assert!(!reader.overread());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_int_roundtrip_sweep() {
        // Stride through the whole i32 space, crossing every width boundary.
        let mut v = i32::MIN as i64;
        while v <= i32::MAX as i64 {
            let mut pb = PacketBuf::new(5);
            pb.add_int(v as i32);
            let mut reader = PacketBuf::from_bytes(pb.as_bytes());
            assert_eq!(reader.get_int() as i64, v);
            assert!(!reader.overread());
            v += 7_919_993;
        }
    }

    #[test]
    fn test_int64_two_words() {
        for v in [0i64, -1, 1 << 40, i64::MIN, i64::MAX, 0x0000_0001_FFFF_FFFF] {
            let mut pb = PacketBuf::new(10);
            pb.add_int64(v);
            let mut reader = PacketBuf::from_bytes(pb.as_bytes());
            assert_eq!(reader.get_int64(), v);
            assert!(!reader.overread());
        }
    }

    #[test]
    fn test_overread_yields_zero_and_flags() {
        let mut reader = PacketBuf::from_bytes(&[0x05]);
        assert_eq!(reader.get_int(), 5);
        assert!(!reader.overread());
        assert_eq!(reader.get_int(), 0);
        assert!(reader.overread());
        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.get_byte(), 0);
    }

    #[test]
    fn test_truncated_wide_int_flags_overread() {
        // 0x81 announces four more bytes but only two follow.
        let mut reader = PacketBuf::from_bytes(&[0x81, 0x01, 0x02]);
        let _ = reader.get_int();
        assert!(reader.overread());
    }

    #[test]
    fn test_empty_buffer_overread() {
        let mut reader = PacketBuf::from_bytes(&[]);
        assert!(reader.get_string(10).is_empty());
        assert!(reader.overread());
    }

    #[test]
    fn test_string_truncation_keeps_stream_aligned() {
        let mut pb = PacketBuf::new(64);
        pb.add_string(b"abcdefghij");
        pb.add_int(4242);

        let mut reader = PacketBuf::from_bytes(pb.as_bytes());
        assert_eq!(reader.get_string(4), b"abcd".to_vec());
        assert_eq!(reader.get_int(), 4242);
        assert!(!reader.overread());
    }

    #[test]
    fn test_unterminated_string_stops_on_overread() {
        let mut reader = PacketBuf::from_bytes(b"abc");
        assert_eq!(reader.get_string(16), b"abc".to_vec());
        assert!(reader.overread());
    }

    #[test]
    fn test_write_capacity_is_enforced() {
        let mut pb = PacketBuf::new(2);
        pb.add_int(100_000);
        assert_eq!(pb.len(), 2);
        assert_eq!(pb.available(), 0);
    }
}
