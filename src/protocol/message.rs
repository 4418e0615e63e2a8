//! RTMP message types and parsing
//!
//! RTMP messages are classified into:
//! - Protocol Control Messages (types 1-6): Chunk/flow control
//! - Command Messages (types 17, 20): AMF-encoded commands
//! - Data Messages (types 15, 18): Metadata
//! - Audio/Video Messages (types 8, 9): Media data
//!
//! The builders at the bottom produce ready-to-chunk [`ChunkMessage`]s for
//! everything the server sends on its own behalf.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{amf0, AmfValue};
use crate::error::ProtocolError;
use crate::protocol::chunk::ChunkMessage;
use crate::protocol::constants::*;

/// Parsed RTMP message
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    /// Set Chunk Size (type 1)
    SetChunkSize(u32),

    /// Abort Message (type 2)
    Abort { csid: u32 },

    /// Acknowledgement (type 3)
    Acknowledgement { sequence: u32 },

    /// User Control Message (type 4)
    UserControl(UserControlEvent),

    /// Window Acknowledgement Size (type 5)
    WindowAckSize(u32),

    /// Set Peer Bandwidth (type 6)
    SetPeerBandwidth { size: u32, limit_type: u8 },

    /// Audio data (type 8)
    Audio(Bytes),

    /// Video data (type 9)
    Video(Bytes),

    /// Command message (types 20 and 17)
    Command(Command),

    /// Data message (types 18 and 15)
    Data(Vec<AmfValue>),

    /// Anything else; skipped by sessions
    Unknown { type_id: u8 },
}

/// User Control Event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    PingRequest(u32),
    PingResponse(u32),
    Other { event_type: u16 },
}

/// RTMP command (connect, publish, play, etc.)
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Command name
    pub name: String,
    /// Transaction ID
    pub transaction_id: f64,
    /// Command object (often null)
    pub command_object: AmfValue,
    /// Additional arguments
    pub arguments: Vec<AmfValue>,
    /// Message stream ID (from chunk)
    pub stream_id: u32,
}

impl Command {
    /// Build a command from its decoded AMF0 values
    ///
    /// Returns `None` when the first value is not a string name.
    pub fn from_values(values: Vec<AmfValue>, stream_id: u32) -> Option<Self> {
        let mut iter = values.into_iter();
        let name = match iter.next()? {
            AmfValue::String(name) => name,
            _ => return None,
        };
        let transaction_id = iter.next().and_then(|v| v.as_number()).unwrap_or(0.0);
        let command_object = iter.next().unwrap_or(AmfValue::Null);
        Some(Self {
            name,
            transaction_id,
            command_object,
            arguments: iter.collect(),
            stream_id,
        })
    }

    /// Argument at `index`, counting after the command object
    pub fn arg(&self, index: usize) -> Option<&AmfValue> {
        self.arguments.get(index)
    }

    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.arg(index)?.as_str()
    }
}

impl RtmpMessage {
    /// Classify a reassembled message by its type id
    pub fn from_chunk(message: &ChunkMessage) -> Result<Self, ProtocolError> {
        let type_id = message.header.message_type;
        let mut payload = message.payload.clone();

        let parsed = match type_id {
            MSG_SET_CHUNK_SIZE => {
                require(type_id, &payload, 4)?;
                RtmpMessage::SetChunkSize(payload.get_u32() & 0x7FFF_FFFF)
            }
            MSG_ABORT => {
                require(type_id, &payload, 4)?;
                RtmpMessage::Abort {
                    csid: payload.get_u32(),
                }
            }
            MSG_ACKNOWLEDGEMENT => {
                require(type_id, &payload, 4)?;
                RtmpMessage::Acknowledgement {
                    sequence: payload.get_u32(),
                }
            }
            MSG_USER_CONTROL => {
                require(type_id, &payload, 2)?;
                let event_type = payload.get_u16();
                let value = if payload.remaining() >= 4 {
                    payload.get_u32()
                } else {
                    0
                };
                RtmpMessage::UserControl(match event_type {
                    UC_STREAM_BEGIN => UserControlEvent::StreamBegin(value),
                    UC_STREAM_EOF => UserControlEvent::StreamEof(value),
                    UC_STREAM_DRY => UserControlEvent::StreamDry(value),
                    UC_PING_REQUEST => UserControlEvent::PingRequest(value),
                    UC_PING_RESPONSE => UserControlEvent::PingResponse(value),
                    other => UserControlEvent::Other { event_type: other },
                })
            }
            MSG_WINDOW_ACK_SIZE => {
                require(type_id, &payload, 4)?;
                RtmpMessage::WindowAckSize(payload.get_u32())
            }
            MSG_SET_PEER_BANDWIDTH => {
                require(type_id, &payload, 5)?;
                RtmpMessage::SetPeerBandwidth {
                    size: payload.get_u32(),
                    limit_type: payload.get_u8(),
                }
            }
            MSG_AUDIO => RtmpMessage::Audio(payload),
            MSG_VIDEO => RtmpMessage::Video(payload),
            MSG_COMMAND_AMF0 | MSG_FLEX_MESSAGE => {
                let values = amf0::decode_all(amf_body(type_id, &payload));
                match Command::from_values(values, message.header.stream_id) {
                    Some(cmd) => RtmpMessage::Command(cmd),
                    None => RtmpMessage::Unknown { type_id },
                }
            }
            MSG_DATA_AMF0 | MSG_FLEX_STREAM => {
                RtmpMessage::Data(amf0::decode_all(amf_body(type_id, &payload)))
            }
            other => RtmpMessage::Unknown { type_id: other },
        };

        Ok(parsed)
    }
}

/// Flex commands carry one leading format byte before the AMF0 body;
/// flex stream data is decoded as is
fn amf_body(type_id: u8, payload: &[u8]) -> &[u8] {
    match type_id {
        MSG_FLEX_MESSAGE if !payload.is_empty() => &payload[1..],
        _ => payload,
    }
}

fn require(type_id: u8, payload: &Bytes, len: usize) -> Result<(), ProtocolError> {
    if payload.len() < len {
        return Err(ProtocolError::TruncatedControl {
            type_id,
            len: payload.len(),
        });
    }
    Ok(())
}

// ============================================================================
// Outbound builders
// ============================================================================

fn control(message_type: u8, payload: BytesMut) -> ChunkMessage {
    ChunkMessage::new(CSID_PROTOCOL_CONTROL, message_type, 0, 0, payload.freeze())
}

/// Window Acknowledgement Size
pub fn window_ack_size(size: u32) -> ChunkMessage {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(size);
    control(MSG_WINDOW_ACK_SIZE, buf)
}

/// Set Peer Bandwidth
pub fn set_peer_bandwidth(size: u32, limit_type: u8) -> ChunkMessage {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u32(size);
    buf.put_u8(limit_type);
    control(MSG_SET_PEER_BANDWIDTH, buf)
}

/// Set Chunk Size
pub fn set_chunk_size(size: u32) -> ChunkMessage {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(size & 0x7FFF_FFFF);
    control(MSG_SET_CHUNK_SIZE, buf)
}

/// Acknowledgement carrying the received byte count
pub fn acknowledgement(sequence: u32) -> ChunkMessage {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(sequence);
    control(MSG_ACKNOWLEDGEMENT, buf)
}

/// User control stream status (Begin, EOF, Dry, Empty, Ready)
pub fn stream_status(code: u16, stream_id: u32) -> ChunkMessage {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u16(code);
    buf.put_u32(stream_id);
    control(MSG_USER_CONTROL, buf)
}

/// Ping request carrying milliseconds since connect
pub fn ping_request(elapsed_ms: u32) -> ChunkMessage {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u16(UC_PING_REQUEST);
    buf.put_u32(elapsed_ms);
    control(MSG_USER_CONTROL, buf)
}

/// AMF0 command on the command chunk stream
pub fn invoke(stream_id: u32, values: &[AmfValue]) -> ChunkMessage {
    ChunkMessage::new(CSID_COMMAND, MSG_COMMAND_AMF0, stream_id, 0, amf0::encode_all(values))
}

/// AMF0 data message on the data chunk stream
pub fn data_message(stream_id: u32, values: &[AmfValue]) -> ChunkMessage {
    ChunkMessage::new(CSID_DATA, MSG_DATA_AMF0, stream_id, 0, amf0::encode_all(values))
}

/// `onStatus` notification
pub fn on_status(stream_id: u32, level: &str, code: &str, description: &str) -> ChunkMessage {
    invoke(
        stream_id,
        &[
            AmfValue::from(CMD_ON_STATUS),
            AmfValue::Number(0.0),
            AmfValue::Null,
            AmfValue::object([
                ("level", AmfValue::from(level)),
                ("code", AmfValue::from(code)),
                ("description", AmfValue::from(description)),
            ]),
        ],
    )
}

/// `_result` for `connect`
pub fn connect_result(transaction_id: f64, object_encoding: f64) -> ChunkMessage {
    invoke(
        0,
        &[
            AmfValue::from(CMD_RESULT),
            AmfValue::Number(transaction_id),
            AmfValue::object([
                ("fmsVer", AmfValue::from(FMS_VERSION)),
                ("capabilities", AmfValue::Number(FMS_CAPABILITIES)),
            ]),
            AmfValue::object([
                ("level", AmfValue::from("status")),
                ("code", AmfValue::from(NC_CONNECT_SUCCESS)),
                ("description", AmfValue::from("Connection succeeded.")),
                ("objectEncoding", AmfValue::Number(object_encoding)),
            ]),
        ],
    )
}

/// `_result` for `createStream`
pub fn create_stream_result(transaction_id: f64, stream_id: u32) -> ChunkMessage {
    invoke(
        0,
        &[
            AmfValue::from(CMD_RESULT),
            AmfValue::Number(transaction_id),
            AmfValue::Null,
            AmfValue::from(stream_id),
        ],
    )
}

/// `|RtmpSampleAccess` grant, both flags false
pub fn sample_access(stream_id: u32) -> ChunkMessage {
    data_message(
        stream_id,
        &[
            AmfValue::from(CMD_SAMPLE_ACCESS),
            AmfValue::Boolean(false),
            AmfValue::Boolean(false),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(type_id: u8, payload: &'static [u8]) -> ChunkMessage {
        ChunkMessage::new(CSID_PROTOCOL_CONTROL, type_id, 0, 0, Bytes::from_static(payload))
    }

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(
            RtmpMessage::from_chunk(&message(MSG_SET_CHUNK_SIZE, &[0, 0, 0x10, 0])).unwrap(),
            RtmpMessage::SetChunkSize(4096)
        );
        assert_eq!(
            RtmpMessage::from_chunk(&message(MSG_WINDOW_ACK_SIZE, &[0, 0, 0xC3, 0x50])).unwrap(),
            RtmpMessage::WindowAckSize(50_000)
        );
        assert_eq!(
            RtmpMessage::from_chunk(&message(MSG_ABORT, &[0, 0, 0, 5])).unwrap(),
            RtmpMessage::Abort { csid: 5 }
        );
        assert_eq!(
            RtmpMessage::from_chunk(&message(MSG_USER_CONTROL, &[0, 7, 0, 0, 0, 9])).unwrap(),
            RtmpMessage::UserControl(UserControlEvent::PingResponse(9))
        );
    }

    #[test]
    fn test_truncated_control_message() {
        let err = RtmpMessage::from_chunk(&message(MSG_SET_CHUNK_SIZE, &[0, 1])).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::TruncatedControl {
                type_id: MSG_SET_CHUNK_SIZE,
                len: 2
            }
        );
    }

    #[test]
    fn test_parse_command() {
        let values = [
            AmfValue::from("publish"),
            AmfValue::Number(5.0),
            AmfValue::Null,
            AmfValue::from("stream?key=1"),
            AmfValue::from("live"),
        ];
        let msg = invoke(1, &values);
        let RtmpMessage::Command(cmd) = RtmpMessage::from_chunk(&msg).unwrap() else {
            panic!("expected command");
        };
        assert_eq!(cmd.name, "publish");
        assert_eq!(cmd.transaction_id, 5.0);
        assert_eq!(cmd.stream_id, 1);
        assert_eq!(cmd.arg_str(0), Some("stream?key=1"));
        assert_eq!(cmd.arg_str(1), Some("live"));
    }

    #[test]
    fn test_flex_message_skips_format_byte() {
        let mut payload = BytesMut::new();
        payload.put_u8(0);
        payload.put_slice(&amf0::encode_all(&[AmfValue::from("createStream"), AmfValue::Number(2.0)]));
        let msg = ChunkMessage::new(CSID_COMMAND, MSG_FLEX_MESSAGE, 0, 0, payload.freeze());

        let RtmpMessage::Command(cmd) = RtmpMessage::from_chunk(&msg).unwrap() else {
            panic!("expected command");
        };
        assert_eq!(cmd.name, "createStream");
        assert_eq!(cmd.transaction_id, 2.0);
    }

    #[test]
    fn test_flex_stream_decoded_without_skip() {
        let body = amf0::encode_all(&[AmfValue::from("@setDataFrame"), AmfValue::from("onMetaData")]);
        let msg = ChunkMessage::new(CSID_DATA, MSG_FLEX_STREAM, 1, 0, body);

        let RtmpMessage::Data(values) = RtmpMessage::from_chunk(&msg).unwrap() else {
            panic!("expected data");
        };
        assert_eq!(values[0].as_str(), Some("@setDataFrame"));
        assert_eq!(values[1].as_str(), Some("onMetaData"));
    }

    #[test]
    fn test_command_without_name_is_unknown() {
        let msg = invoke(0, &[AmfValue::Number(1.0)]);
        assert_eq!(
            RtmpMessage::from_chunk(&msg).unwrap(),
            RtmpMessage::Unknown {
                type_id: MSG_COMMAND_AMF0
            }
        );
    }

    #[test]
    fn test_builder_layouts() {
        let msg = set_peer_bandwidth(50_000, BANDWIDTH_LIMIT_DYNAMIC);
        assert_eq!(msg.header.csid, CSID_PROTOCOL_CONTROL);
        assert_eq!(&msg.payload[..], &[0, 0, 0xC3, 0x50, 2]);

        let msg = stream_status(UC_STREAM_BEGIN, 1);
        assert_eq!(msg.header.message_type, MSG_USER_CONTROL);
        assert_eq!(&msg.payload[..], &[0, 0, 0, 0, 0, 1]);

        let msg = ping_request(30_000);
        assert_eq!(&msg.payload[..2], &[0, 6]);
    }

    #[test]
    fn test_connect_result_values() {
        let msg = connect_result(1.0, 0.0);
        assert_eq!(msg.header.csid, CSID_COMMAND);
        assert_eq!(msg.header.stream_id, 0);

        let values = amf0::decode_all(&msg.payload);
        assert_eq!(values[0].as_str(), Some("_result"));
        assert_eq!(values[2].get_string("fmsVer"), Some(FMS_VERSION));
        assert_eq!(values[2].get_number("capabilities"), Some(31.0));
        assert_eq!(values[3].get_string("code"), Some(NC_CONNECT_SUCCESS));
    }

    #[test]
    fn test_sample_access() {
        let msg = sample_access(1);
        assert_eq!(msg.header.csid, CSID_DATA);
        assert_eq!(msg.header.message_type, MSG_DATA_AMF0);
        let values = amf0::decode_all(&msg.payload);
        assert_eq!(values.len(), 3);
        assert_eq!(values[1], AmfValue::Boolean(false));
    }
}
