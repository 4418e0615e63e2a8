//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012)

/// RTMP version number (always 3 for standard RTMP)
pub const RTMP_VERSION: u8 = 3;

/// Default RTMP port
pub const RTMP_PORT: u16 = 1935;

/// Handshake packet size (C1/C2/S1/S2)
pub const HANDSHAKE_SIZE: usize = 1536;

/// HMAC-SHA256 digest length embedded in digest handshakes
pub const SHA256_DIGEST_LENGTH: usize = 32;

/// Key used by Flash Player style clients to sign C1
pub const GENUINE_FP_KEY: &[u8] = b"Genuine Adobe Flash Player 001";

/// Key used to sign S1
pub const GENUINE_FMS_KEY: &[u8] = b"Genuine Adobe Flash Media Server 001";

/// Default chunk size before any Set Chunk Size
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Maximum chunk size allowed
pub const MAX_CHUNK_SIZE: u32 = 0xFFFFFF;

/// Largest length a 24-bit message header field can carry
pub const MAX_MESSAGE_SIZE: u32 = 0xFFFFFF;

/// Largest chunk header: 3 basic + 11 message + 4 extended timestamp
pub const CHUNK_HEADER_MAX_SIZE: usize = 18;

/// Message header size indexed by fmt
pub const MESSAGE_HEADER_SIZES: [usize; 4] = [11, 7, 3, 0];

/// Extra capacity reserved on top of the declared message length
pub const PAYLOAD_SLACK: usize = 1024;

/// Timestamp field value signalling a 4-byte extended timestamp
pub const EXTENDED_TIMESTAMP_THRESHOLD: u32 = 0xFFFFFF;

/// Received-byte counter wraps back to zero at this value
pub const ACK_COUNTER_WRAP: u32 = 0xF000_0000;

/// Window acknowledgement size advertised after connect
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 50_000;

/// Peer bandwidth advertised after connect
pub const DEFAULT_PEER_BANDWIDTH: u32 = 50_000;

// ============================================================================
// Chunk Stream IDs (CSID)
// ============================================================================

/// Protocol control messages (Set Chunk Size, Abort, etc.)
pub const CSID_PROTOCOL_CONTROL: u32 = 2;

/// Command messages (connect, createStream, etc.)
pub const CSID_COMMAND: u32 = 3;

/// Audio data
pub const CSID_AUDIO: u32 = 4;

/// Data messages (metadata, sample access)
pub const CSID_DATA: u32 = 5;

/// Video data
pub const CSID_VIDEO: u32 = 6;

// ============================================================================
// Message Type IDs
// ============================================================================

pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
/// Flex stream send (AMF3 framing of a data message)
pub const MSG_FLEX_STREAM: u8 = 15;
/// Flex message (AMF3 framing of a command, one leading format byte)
pub const MSG_FLEX_MESSAGE: u8 = 17;
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_SHARED_OBJECT_AMF0: u8 = 19;
pub const MSG_COMMAND_AMF0: u8 = 20;
pub const MSG_AGGREGATE: u8 = 22;

// ============================================================================
// User Control Event Types / Stream status codes
// ============================================================================

/// Stream Begin - server sends when stream becomes functional
pub const UC_STREAM_BEGIN: u16 = 0x00;

/// Stream EOF - server sends when playback ends
pub const UC_STREAM_EOF: u16 = 0x01;

/// Stream Dry - no more data available
pub const UC_STREAM_DRY: u16 = 0x02;

/// Ping Request - server pings client
pub const UC_PING_REQUEST: u16 = 0x06;

/// Ping Response - client responds to ping
pub const UC_PING_RESPONSE: u16 = 0x07;

/// Stream buffer empty
pub const UC_STREAM_EMPTY: u16 = 0x1f;

/// Stream buffer ready
pub const UC_STREAM_READY: u16 = 0x20;

// ============================================================================
// Peer Bandwidth Limit Types
// ============================================================================

pub const BANDWIDTH_LIMIT_HARD: u8 = 0;
pub const BANDWIDTH_LIMIT_SOFT: u8 = 1;
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

// ============================================================================
// Command Names
// ============================================================================

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_CLOSE_STREAM: &str = "closeStream";
pub const CMD_RELEASE_STREAM: &str = "releaseStream";
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PLAY: &str = "play";
pub const CMD_PAUSE: &str = "pause";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ON_STATUS: &str = "onStatus";
pub const CMD_SET_DATA_FRAME: &str = "@setDataFrame";
pub const CMD_ON_METADATA: &str = "onMetaData";
pub const CMD_SAMPLE_ACCESS: &str = "|RtmpSampleAccess";

// ============================================================================
// Status Codes
// ============================================================================

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PUBLISH_BAD_NAME: &str = "NetStream.Publish.BadName";
pub const NS_PUBLISH_UNAUTHORIZED: &str = "NetStream.Publish.Unauthorized";
pub const NS_UNPUBLISH_SUCCESS: &str = "NetStream.Unpublish.Success";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PLAY_STOP: &str = "NetStream.Play.Stop";
pub const NS_PLAY_FAILED: &str = "NetStream.Play.Failed";
pub const NS_PLAY_UNAUTHORIZED: &str = "NetStream.Play.Unauthorized";
pub const NS_PAUSE_NOTIFY: &str = "NetStream.Pause.Notify";
pub const NS_UNPAUSE_NOTIFY: &str = "NetStream.Unpause.Notify";

/// Version advertised in the connect reply
pub const FMS_VERSION: &str = "FMS/3,0,1,123";

/// Capabilities advertised in the connect reply
pub const FMS_CAPABILITIES: f64 = 31.0;

// ============================================================================
// Media
// ============================================================================

/// FLV sound format id for AAC
pub const AUDIO_CODEC_AAC: u8 = 10;

/// FLV video codec id for AVC/H.264
pub const VIDEO_CODEC_AVC: u8 = 7;

/// Legacy FLV video codec id for HEVC/H.265
pub const VIDEO_CODEC_HEVC: u8 = 12;

/// FLV video frame type for keyframes
pub const VIDEO_FRAME_KEY: u8 = 1;

/// FLV sound rate index to sample rate
pub const AUDIO_SAMPLE_RATES: [u32; 4] = [5512, 11025, 22050, 44100];
