//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks for multiplexing. Each chunk has a header
//! that identifies the chunk stream and message being sent.
//!
//! ```text
//! +-------------+-----------------+--------------------+------------+
//! | Basic Header| Message Header  | Extended Timestamp | Chunk Data |
//! | (1-3 bytes) | (0/3/7/11 bytes)| (0/4 bytes)        | (variable) |
//! +-------------+-----------------+--------------------+------------+
//!
//! Basic Header formats (low 6 bits of the first byte):
//! - 2..=63: 1 byte,  csid = low bits
//! - 0:      2 bytes, csid = 64 + b1
//! - 1:      3 bytes, csid = 64 + b1 + b2 * 256
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4 LE)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//! ```
//!
//! The decoder is a resumable state machine. A socket read may end at any
//! byte, including inside a header, and the next call picks up where the
//! previous one stopped.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::constants::{
    CHUNK_HEADER_MAX_SIZE, DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP_THRESHOLD, MAX_CHUNK_SIZE,
    MAX_MESSAGE_SIZE, MESSAGE_HEADER_SIZES, MSG_SET_CHUNK_SIZE, PAYLOAD_SLACK,
};

/// Smallest csid a basic header can carry
pub const MIN_CSID: u32 = 2;

/// Largest csid a basic header can carry
pub const MAX_CSID: u32 = 65599;

/// Merged chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkHeader {
    /// Header format (0-3) of the last chunk seen
    pub fmt: u8,
    /// Chunk stream id
    pub csid: u32,
    /// Timestamp field as sent; 0xFFFFFF means an extended timestamp follows
    pub timestamp: u32,
    pub message_length: u32,
    pub message_type: u8,
    pub stream_id: u32,
}

/// Message header fields present for a given fmt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeaderFields {
    pub timestamp: Option<u32>,
    pub message_length: Option<u32>,
    pub message_type: Option<u8>,
    pub stream_id: Option<u32>,
}

impl ChunkHeader {
    /// Fmt 0 header for an outbound message
    pub fn new(csid: u32, timestamp: u32, message_type: u8, stream_id: u32) -> Self {
        Self {
            fmt: 0,
            csid,
            timestamp,
            message_length: 0,
            message_type,
            stream_id,
        }
    }

    /// Overlay the fields a new chunk carried on top of the inherited ones
    fn merge(&mut self, fmt: u8, csid: u32, fields: &MessageHeaderFields) {
        if let Some(ts) = fields.timestamp {
            self.timestamp = ts;
        }
        if let Some(len) = fields.message_length {
            self.message_length = len;
        }
        if let Some(ty) = fields.message_type {
            self.message_type = ty;
        }
        if let Some(sid) = fields.stream_id {
            self.stream_id = sid;
        }
        self.fmt = fmt;
        self.csid = csid;
    }
}

/// A reassembled (or to be chunked) RTMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMessage {
    pub header: ChunkHeader,
    /// Absolute message time in milliseconds
    pub timer: u32,
    pub payload: Bytes,
}

impl ChunkMessage {
    /// Outbound message with a fmt 0 header stamped with `timestamp`
    pub fn new(csid: u32, message_type: u8, stream_id: u32, timestamp: u32, payload: Bytes) -> Self {
        let mut header = ChunkHeader::new(csid, timestamp, message_type, stream_id);
        header.message_length = payload.len() as u32;
        Self {
            header,
            timer: timestamp,
            payload,
        }
    }

    pub fn message_type(&self) -> u8 {
        self.header.message_type
    }

    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }
}

/// One message being reassembled
#[derive(Debug, Default)]
struct ChunkStreamBuffer {
    header: ChunkHeader,
    payload: BytesMut,
    /// Payload bytes received so far
    byte_size: usize,
    ext_timestamp: u32,
    timer: u32,
    /// Completion order, used to dispatch interleaved streams in order
    sequence: u64,
    started: bool,
    awaiting: bool,
    parsed: bool,
    dispatched: bool,
}

impl ChunkStreamBuffer {
    fn is_in_progress(&self) -> bool {
        self.started && !self.parsed && self.byte_size > 0
    }

    fn discard(&mut self) {
        self.payload = BytesMut::new();
        self.byte_size = 0;
        self.awaiting = false;
        self.parsed = true;
        self.dispatched = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsePhase {
    Init,
    BasicHeader,
    MessageHeader,
    ExtTimestamp,
    PrePayload,
    Payload,
}

/// Transient decode position
#[derive(Debug)]
struct ParserCursor {
    phase: ParsePhase,
    header: [u8; CHUNK_HEADER_MAX_SIZE],
    header_len: usize,
    basic_size: usize,
    /// Buffer being filled; meaningful from ExtTimestamp onwards
    index: usize,
}

impl ParserCursor {
    fn new() -> Self {
        Self {
            phase: ParsePhase::Init,
            header: [0; CHUNK_HEADER_MAX_SIZE],
            header_len: 0,
            basic_size: 1,
            index: 0,
        }
    }

    fn fmt(&self) -> u8 {
        self.header[0] >> 6
    }

    /// Copy header bytes until `wanted` are buffered; returns bytes taken
    fn fill(&mut self, data: &[u8], pos: usize, end: usize, wanted: usize) -> usize {
        let take = wanted.saturating_sub(self.header_len).min(end - pos);
        self.header[self.header_len..self.header_len + take].copy_from_slice(&data[pos..pos + take]);
        self.header_len += take;
        take
    }
}

/// Result of one [`ChunkCodec::read`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// True when the input range was fully consumed
    pub done: bool,
    /// Where to continue reading when `done` is false
    pub resume_offset: Option<usize>,
}

impl ReadOutcome {
    fn done() -> Self {
        Self {
            done: true,
            resume_offset: None,
        }
    }

    fn resume_at(offset: usize) -> Self {
        Self {
            done: false,
            resume_offset: Some(offset),
        }
    }
}

/// Chunk stream decoder and encoder for one connection
///
/// Inbound and outbound chunk sizes are negotiated independently.
#[derive(Debug)]
pub struct ChunkCodec {
    in_chunk_size: u32,
    out_chunk_size: u32,
    cursor: ParserCursor,
    buffers: Vec<ChunkStreamBuffer>,
    completed: u64,
}

impl ChunkCodec {
    pub fn new() -> Self {
        Self {
            in_chunk_size: DEFAULT_CHUNK_SIZE,
            out_chunk_size: DEFAULT_CHUNK_SIZE,
            cursor: ParserCursor::new(),
            buffers: Vec::new(),
            completed: 0,
        }
    }

    pub fn in_chunk_size(&self) -> u32 {
        self.in_chunk_size
    }

    pub fn out_chunk_size(&self) -> u32 {
        self.out_chunk_size
    }

    /// Apply a peer's Set Chunk Size; values below 1 are ignored
    pub fn set_in_chunk_size(&mut self, size: u32) {
        if size < 1 {
            return;
        }
        self.in_chunk_size = size.min(MAX_CHUNK_SIZE);
    }

    /// Chunk size used by [`ChunkCodec::encode`]; values below 1 are ignored
    pub fn set_out_chunk_size(&mut self, size: u32) {
        if size < 1 {
            return;
        }
        self.out_chunk_size = size.min(MAX_CHUNK_SIZE);
    }

    /// Number of reassembly buffers currently held
    pub fn buffered(&self) -> usize {
        self.buffers.len()
    }

    /// True while a message is only partially received
    pub fn is_awaiting(&self) -> bool {
        self.buffers.iter().any(|b| b.awaiting)
    }

    /// Decode `len` bytes of `data` starting at `offset`
    ///
    /// Completed messages are collected with [`ChunkCodec::take_ready`].
    /// A Set Chunk Size message that completes before the end of the
    /// input stops the read early with `done == false` so the caller can
    /// apply the new size before the remaining bytes are parsed.
    pub fn read(&mut self, data: &[u8], offset: usize, len: usize) -> ReadOutcome {
        let end = offset.saturating_add(len).min(data.len());
        let mut pos = offset.min(end);

        loop {
            match self.cursor.phase {
                ParsePhase::Init => {
                    if pos >= end {
                        break;
                    }
                    let first = data[pos];
                    pos += 1;
                    self.cursor.header[0] = first;
                    self.cursor.header_len = 1;
                    self.cursor.basic_size = basic_header_size(first);
                    self.cursor.phase = ParsePhase::BasicHeader;
                }
                ParsePhase::BasicHeader => {
                    let wanted = self.cursor.basic_size;
                    pos += self.cursor.fill(data, pos, end, wanted);
                    if self.cursor.header_len < wanted {
                        break;
                    }
                    self.cursor.phase = ParsePhase::MessageHeader;
                }
                ParsePhase::MessageHeader => {
                    let fmt = self.cursor.fmt();
                    let wanted = self.cursor.basic_size + MESSAGE_HEADER_SIZES[fmt as usize];
                    pos += self.cursor.fill(data, pos, end, wanted);
                    if self.cursor.header_len < wanted {
                        break;
                    }
                    self.open_buffer(fmt);
                    self.cursor.phase = ParsePhase::ExtTimestamp;
                }
                ParsePhase::ExtTimestamp => {
                    let buffer = &mut self.buffers[self.cursor.index];
                    let fmt = buffer.header.fmt;
                    let base = self.cursor.basic_size + MESSAGE_HEADER_SIZES[fmt as usize];
                    let extended = buffer.header.timestamp == EXTENDED_TIMESTAMP_THRESHOLD;
                    let wanted = if extended { base + 4 } else { base };

                    pos += self.cursor.fill(data, pos, end, wanted);
                    if self.cursor.header_len < wanted {
                        break;
                    }

                    let timestamp = if extended {
                        let h = &self.cursor.header;
                        u32::from_be_bytes([h[base], h[base + 1], h[base + 2], h[base + 3]])
                    } else {
                        buffer.header.timestamp
                    };

                    buffer.ext_timestamp = buffer.ext_timestamp.wrapping_add(timestamp);
                    if buffer.byte_size == 0 {
                        buffer.timer = if fmt == 0 {
                            buffer.ext_timestamp
                        } else {
                            buffer.timer.wrapping_add(buffer.ext_timestamp)
                        };
                    }
                    self.cursor.phase = ParsePhase::PrePayload;
                }
                ParsePhase::PrePayload => {
                    let buffer = &mut self.buffers[self.cursor.index];
                    if buffer.byte_size == 0 {
                        let capacity = buffer.header.message_length as usize + PAYLOAD_SLACK;
                        buffer.payload = BytesMut::with_capacity(capacity);
                    }
                    self.cursor.phase = ParsePhase::Payload;
                }
                ParsePhase::Payload => {
                    let chunk_size = self.in_chunk_size as usize;
                    let buffer = &mut self.buffers[self.cursor.index];
                    let length = buffer.header.message_length as usize;

                    if buffer.byte_size < length && pos >= end {
                        break;
                    }

                    let chunk_left = chunk_size - buffer.byte_size % chunk_size;
                    let n = chunk_left
                        .min(length.saturating_sub(buffer.byte_size))
                        .min(end - pos);
                    buffer.payload.extend_from_slice(&data[pos..pos + n]);
                    buffer.byte_size += n;
                    pos += n;

                    if buffer.byte_size >= length {
                        buffer.parsed = true;
                        buffer.awaiting = false;
                        buffer.sequence = self.completed;
                        self.completed += 1;
                        self.cursor.phase = ParsePhase::Init;

                        if pos >= end {
                            return ReadOutcome::done();
                        }
                        if buffer.header.message_type == MSG_SET_CHUNK_SIZE {
                            return ReadOutcome::resume_at(pos);
                        }
                    } else if buffer.byte_size % chunk_size == 0 {
                        self.cursor.phase = ParsePhase::Init;
                    } else {
                        break;
                    }
                }
            }
        }

        if let Some(buffer) = self.buffers.get_mut(self.cursor.index) {
            if buffer.started && !buffer.parsed {
                buffer.awaiting = true;
            }
        }

        ReadOutcome::done()
    }

    /// Pick the buffer the chunk whose header was just read belongs to
    fn open_buffer(&mut self, fmt: u8) {
        let basic = self.cursor.basic_size;
        let csid = parse_csid(&self.cursor.header[..basic]);
        let fields = parse_message_header(&self.cursor.header[basic..], fmt);

        let in_progress = self
            .buffers
            .iter()
            .rposition(|b| b.header.csid == csid && b.is_in_progress());

        let index = match in_progress {
            Some(i) if fmt == 3 => i,
            other => {
                if let Some(i) = other {
                    tracing::debug!(csid, fmt, "Unfinished message replaced by a new header");
                    self.buffers[i].discard();
                }
                let mut buffer = ChunkStreamBuffer::default();
                if let Some(prev) = self.buffers.iter().rev().find(|b| b.header.csid == csid) {
                    buffer.header = prev.header;
                    buffer.timer = prev.timer;
                }
                self.buffers.push(buffer);
                self.buffers.len() - 1
            }
        };

        let buffer = &mut self.buffers[index];
        buffer.header.merge(fmt, csid, &fields);
        buffer.started = true;
        self.cursor.index = index;
    }

    /// Hand out parsed messages in arrival order, marking them dispatched
    pub fn take_ready(&mut self) -> Vec<ChunkMessage> {
        let mut ready: Vec<(u64, ChunkMessage)> = self
            .buffers
            .iter_mut()
            .filter(|b| b.parsed && !b.dispatched)
            .map(|b| {
                b.dispatched = true;
                let message = ChunkMessage {
                    header: b.header,
                    timer: b.timer,
                    payload: std::mem::take(&mut b.payload).freeze(),
                };
                (b.sequence, message)
            })
            .collect();
        ready.sort_by_key(|(sequence, _)| *sequence);
        ready.into_iter().map(|(_, message)| message).collect()
    }

    /// Drop dispatched buffers that a newer buffer on the same csid supersedes
    ///
    /// The newest buffer per csid is kept so later chunks can inherit its
    /// header.
    pub fn clear_dispatched_duplicates(&mut self) {
        let cursor = self.cursor.index;
        let mut kept: Vec<ChunkStreamBuffer> = Vec::with_capacity(self.buffers.len());
        let mut new_cursor = None;

        for (i, buffer) in self.buffers.drain(..).enumerate() {
            let dup = kept.iter().position(|k| k.header.csid == buffer.header.csid);
            if let Some(dup) = dup {
                if kept[dup].dispatched {
                    kept.remove(dup);
                    new_cursor = match new_cursor {
                        Some(c) if c > dup => Some(c - 1),
                        Some(c) if c == dup => None,
                        other => other,
                    };
                }
            }
            if i == cursor {
                new_cursor = Some(kept.len());
            }
            kept.push(buffer);
        }

        let last = kept.len().saturating_sub(1);
        self.buffers = kept;
        self.cursor.index = new_cursor.unwrap_or(last).min(last);
    }

    /// Discard the unfinished message on `csid` (Abort message)
    pub fn abort(&mut self, csid: u32) {
        for buffer in self.buffers.iter_mut().filter(|b| b.header.csid == csid && !b.parsed) {
            buffer.discard();
        }
    }

    /// Serialize a message with the negotiated outbound chunk size
    pub fn encode(&self, message: &ChunkMessage) -> Result<Bytes, ProtocolError> {
        to_bytes(message, self.out_chunk_size)
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Basic header length announced by its first byte
pub fn basic_header_size(first: u8) -> usize {
    match first & 0x3F {
        0 => 2,
        1 => 3,
        _ => 1,
    }
}

/// Chunk stream id from a complete basic header
pub fn parse_csid(basic: &[u8]) -> u32 {
    match basic.len() {
        2 => 64 + basic[1] as u32,
        3 => 64 + basic[1] as u32 + (basic[2] as u32) * 256,
        _ => (basic[0] & 0x3F) as u32,
    }
}

/// Read the message header fields that `fmt` carries
///
/// `bytes` must hold at least the header size for `fmt`.
pub fn parse_message_header(bytes: &[u8], fmt: u8) -> MessageHeaderFields {
    let be24 = |b: &[u8]| ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32;
    let mut fields = MessageHeaderFields::default();

    if fmt <= 2 {
        fields.timestamp = Some(be24(&bytes[0..3]));
    }
    if fmt <= 1 {
        fields.message_length = Some(be24(&bytes[3..6]));
        fields.message_type = Some(bytes[6]);
    }
    if fmt == 0 {
        fields.stream_id = Some(u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]));
    }
    fields
}

/// Basic header length needed for `csid`
fn basic_header_len(csid: u32) -> usize {
    if csid >= 64 + 255 {
        3
    } else if csid >= 64 {
        2
    } else {
        1
    }
}

/// Write a basic header
pub fn write_basic_header(buf: &mut BytesMut, fmt: u8, csid: u32) -> Result<(), ProtocolError> {
    if !(MIN_CSID..=MAX_CSID).contains(&csid) {
        return Err(ProtocolError::InvalidChunkStreamId(csid));
    }
    let fmt_bits = (fmt & 0x03) << 6;
    match basic_header_len(csid) {
        3 => {
            let id = csid - 64;
            buf.put_u8(fmt_bits | 1);
            buf.put_u8((id & 0xFF) as u8);
            buf.put_u8(((id >> 8) & 0xFF) as u8);
        }
        2 => {
            buf.put_u8(fmt_bits);
            buf.put_u8((csid - 64) as u8);
        }
        _ => buf.put_u8(fmt_bits | csid as u8),
    }
    Ok(())
}

/// Write the message header fields `header.fmt` calls for
///
/// Timestamps at or above 0xFFFFFF are written as the sentinel; the caller
/// appends the extended timestamp.
pub fn write_message_header(buf: &mut BytesMut, header: &ChunkHeader) {
    if header.fmt <= 2 {
        buf.put_uint(header.timestamp.min(EXTENDED_TIMESTAMP_THRESHOLD) as u64, 3);
    }
    if header.fmt <= 1 {
        buf.put_uint(header.message_length as u64, 3);
        buf.put_u8(header.message_type);
    }
    if header.fmt == 0 {
        buf.put_u32_le(header.stream_id);
    }
}

/// Split a message into chunks of at most `chunk_size` payload bytes
///
/// The first chunk carries the message's own header, the rest use fmt 3.
/// With an extended timestamp the 4 timestamp bytes follow every header.
pub fn to_bytes(message: &ChunkMessage, chunk_size: u32) -> Result<Bytes, ProtocolError> {
    let length = message.payload.len();
    if length > MAX_MESSAGE_SIZE as usize {
        return Err(ProtocolError::MessageTooLarge(length as u32));
    }

    let chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE) as usize;
    let mut header = message.header;
    header.message_length = length as u32;

    let extended = header.timestamp >= EXTENDED_TIMESTAMP_THRESHOLD;
    let ext_len = if extended { 4 } else { 0 };
    let basic_len = basic_header_len(header.csid);
    let continuations = length.saturating_sub(1) / chunk_size;
    let size = basic_len
        + MESSAGE_HEADER_SIZES[(header.fmt & 0x03) as usize]
        + ext_len
        + length
        + continuations * (basic_len + ext_len);

    let mut out = BytesMut::with_capacity(size);
    write_basic_header(&mut out, header.fmt, header.csid)?;
    write_message_header(&mut out, &header);
    if extended {
        out.put_u32(header.timestamp);
    }

    for (i, chunk) in message.payload.chunks(chunk_size).enumerate() {
        if i > 0 {
            write_basic_header(&mut out, 3, header.csid)?;
            if extended {
                out.put_u32(header.timestamp);
            }
        }
        out.put_slice(chunk);
    }

    debug_assert_eq!(out.len(), size);
    Ok(out.freeze())
}
