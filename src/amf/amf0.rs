//! AMF0 encoder and decoder
//!
//! Only the subset of AMF0 that RTMP control and metadata messages carry is
//! supported.
//!
//! Type Markers:
//! ```text
//! 0x00 - Number (IEEE 754 double, big-endian)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x08 - ECMA Array (32-bit count, then object layout)
//! 0x09 - Object End (0x000009 sequence)
//! 0x0A - Strict Array (32-bit count, then values)
//! ```
//!
//! A command payload is several values back to back. Decoding is sequential
//! and stops at the first marker it does not know: whatever follows is
//! treated as the end of the payload rather than an error.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::value::AmfValue;
use crate::error::AmfError;

pub(crate) const MARKER_NUMBER: u8 = 0x00;
pub(crate) const MARKER_BOOLEAN: u8 = 0x01;
pub(crate) const MARKER_STRING: u8 = 0x02;
pub(crate) const MARKER_OBJECT: u8 = 0x03;
pub(crate) const MARKER_NULL: u8 = 0x05;
pub(crate) const MARKER_UNDEFINED: u8 = 0x06;
pub(crate) const MARKER_ECMA_ARRAY: u8 = 0x08;
pub(crate) const MARKER_OBJECT_END: u8 = 0x09;
pub(crate) const MARKER_STRICT_ARRAY: u8 = 0x0A;

/// Maximum nesting depth for objects/arrays (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// AMF0 decoder
#[derive(Debug, Default)]
pub struct Amf0Decoder {
    depth: usize,
}

impl Amf0Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a single AMF0 value from the buffer
    ///
    /// Returns `Ok(None)` without consuming anything when the next marker is
    /// not one this decoder understands (or the buffer is empty). Callers
    /// should stop reading at that point.
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<Option<AmfValue>, AmfError> {
        let Some(&marker) = buf.first() else {
            return Ok(None);
        };

        if !is_known_marker(marker) {
            return Ok(None);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }

        buf.advance(1);
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    /// Decode values until the buffer is exhausted or an undecodable value
    /// is reached
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Vec<AmfValue> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            match self.decode(buf) {
                Ok(Some(value)) => values.push(value),
                Ok(None) => break,
                Err(e) => {
                    tracing::trace!(error = %e, decoded = values.len(), "AMF0 decode stopped");
                    break;
                }
            }
        }
        values
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<Option<AmfValue>, AmfError> {
        let value = match marker {
            MARKER_NUMBER => {
                if buf.remaining() < 8 {
                    return Err(AmfError::UnexpectedEof);
                }
                AmfValue::Number(buf.get_f64())
            }
            MARKER_BOOLEAN => {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                AmfValue::Boolean(buf.get_u8() != 0)
            }
            MARKER_STRING => AmfValue::String(read_utf8(buf)?),
            MARKER_NULL => AmfValue::Null,
            MARKER_UNDEFINED => AmfValue::Undefined,
            MARKER_OBJECT => match self.decode_properties(buf)? {
                Some(props) => AmfValue::Object(props),
                None => return Ok(None),
            },
            MARKER_ECMA_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                // Count hint, frequently wrong in the wild
                let _count = buf.get_u32();
                match self.decode_properties(buf)? {
                    Some(props) => AmfValue::EcmaArray(props),
                    None => return Ok(None),
                }
            }
            MARKER_STRICT_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                let count = buf.get_u32() as usize;
                let mut elements = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    match self.decode(buf)? {
                        Some(v) => elements.push(v),
                        None => return Ok(None),
                    }
                }
                AmfValue::Array(elements)
            }
            _ => return Ok(None),
        };

        Ok(Some(value))
    }

    /// Key/value pairs shared by objects and ECMA arrays
    ///
    /// A missing end marker at the end of the buffer is tolerated; some
    /// encoders omit it.
    fn decode_properties(
        &mut self,
        buf: &mut Bytes,
    ) -> Result<Option<HashMap<String, AmfValue>>, AmfError> {
        let mut properties = HashMap::new();

        loop {
            if buf.is_empty() {
                break;
            }
            if buf[0] == MARKER_OBJECT_END {
                buf.advance(1);
                break;
            }

            let key = read_utf8(buf)?;
            if key.is_empty() {
                if buf.first() == Some(&MARKER_OBJECT_END) {
                    buf.advance(1);
                }
                break;
            }

            match self.decode(buf)? {
                Some(value) => {
                    properties.insert(key, value);
                }
                None => return Ok(None),
            }
        }

        Ok(Some(properties))
    }
}

fn is_known_marker(marker: u8) -> bool {
    matches!(
        marker,
        MARKER_NUMBER
            | MARKER_BOOLEAN
            | MARKER_STRING
            | MARKER_OBJECT
            | MARKER_NULL
            | MARKER_UNDEFINED
            | MARKER_ECMA_ARRAY
            | MARKER_STRICT_ARRAY
    )
}

/// Read UTF-8 string with 16-bit length prefix
fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEof);
    }

    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }

    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Get the encoded bytes and reset encoder
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a single AMF0 value
    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Null => self.buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::String(s) => {
                self.buf.put_u8(MARKER_STRING);
                self.write_utf8(s);
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_properties(props);
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props);
            }
            AmfValue::Array(elements) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(elements.len() as u32);
                for elem in elements {
                    self.encode(elem);
                }
            }
        }
    }

    /// Encode multiple values
    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    fn write_properties(&mut self, props: &HashMap<String, AmfValue>) {
        for (key, val) in props {
            self.write_utf8(key);
            self.encode(val);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }

    /// Write UTF-8 string with 16-bit length prefix (no type marker)
    ///
    /// Strings longer than 65535 bytes are cut at the last char boundary
    /// that fits.
    fn write_utf8(&mut self, s: &str) {
        let mut len = s.len().min(0xFFFF);
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&s.as_bytes()[..len]);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a single value
pub fn encode(value: &AmfValue) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(value);
    encoder.finish()
}

/// Encode multiple values back to back
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

/// Decode the first value of a buffer
pub fn decode(data: &[u8]) -> Result<Option<AmfValue>, AmfError> {
    let mut buf = Bytes::copy_from_slice(data);
    Amf0Decoder::new().decode(&mut buf)
}

/// Decode every value up to the first undecodable one
pub fn decode_all(data: &[u8]) -> Vec<AmfValue> {
    let mut buf = Bytes::copy_from_slice(data);
    Amf0Decoder::new().decode_all(&mut buf)
}
