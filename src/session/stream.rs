//! Per-publisher stream cache
//!
//! A publishing session remembers the last metadata and one codec config
//! frame per track so subscribers joining mid-stream can initialize their
//! decoders before the first regular frame arrives.

use bytes::Bytes;

use crate::amf::{amf0, AmfValue};
use crate::protocol::chunk::ChunkMessage;
use crate::protocol::constants::{
    AUDIO_CODEC_AAC, AUDIO_SAMPLE_RATES, CMD_ON_METADATA, CSID_AUDIO, CSID_DATA, CSID_VIDEO,
    MSG_AUDIO, MSG_DATA_AMF0, MSG_VIDEO, VIDEO_CODEC_AVC, VIDEO_CODEC_HEVC, VIDEO_FRAME_KEY,
};

/// First byte of an FLV audio tag, decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTagHeader {
    pub codec: u8,
    pub sample_rate: u32,
    pub channels: u8,
    /// AAC sequence header
    pub is_config: bool,
}

impl AudioTagHeader {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let b0 = *payload.first()?;
        let codec = b0 >> 4;
        Some(Self {
            codec,
            sample_rate: AUDIO_SAMPLE_RATES[((b0 >> 2) & 0x03) as usize],
            channels: (b0 & 0x01) + 1,
            is_config: codec == AUDIO_CODEC_AAC && payload.get(1) == Some(&0),
        })
    }
}

/// First byte of an FLV video tag, decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTagHeader {
    pub frame_type: u8,
    pub codec: u8,
    /// AVC/HEVC sequence header
    pub is_config: bool,
}

impl VideoTagHeader {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let b0 = *payload.first()?;
        let frame_type = b0 >> 4;
        let codec = b0 & 0x0F;
        Some(Self {
            frame_type,
            codec,
            is_config: matches!(codec, VIDEO_CODEC_AVC | VIDEO_CODEC_HEVC)
                && frame_type == VIDEO_FRAME_KEY
                && payload.get(1) == Some(&0),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioInfo {
    pub codec: Option<u8>,
    pub sample_rate: u32,
    pub channels: u8,
    pub config: Option<Bytes>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    pub codec: Option<u8>,
    pub width: f64,
    pub height: f64,
    pub frame_rate: f64,
    pub config: Option<Bytes>,
}

/// Cached stream description of a publisher
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCache {
    /// AMF0 payload of `["onMetaData", {...}]`
    pub metadata: Option<Bytes>,
    pub audio: AudioInfo,
    pub video: VideoInfo,
}

impl StreamCache {
    /// Record `@setDataFrame` properties and cache them re-wrapped as
    /// `onMetaData`; returns the wrapped payload
    pub fn apply_metadata(&mut self, properties: &AmfValue) -> Bytes {
        if properties.as_object().is_some() {
            if let Some(rate) = properties.get_number("audiosamplerate") {
                self.audio.sample_rate = rate as u32;
            }
            if let Some(stereo) = properties.get_bool("stereo") {
                self.audio.channels = if stereo { 2 } else { 1 };
            }
            if let Some(fps) = properties.get_number("framerate") {
                self.video.frame_rate = fps;
            }
            if let Some(width) = properties.get_number("width") {
                self.video.width = width;
            }
            if let Some(height) = properties.get_number("height") {
                self.video.height = height;
            }
        }

        let payload = amf0::encode_all(&[AmfValue::from(CMD_ON_METADATA), properties.clone()]);
        self.metadata = Some(payload.clone());
        payload
    }

    /// Track an audio frame; returns true when the cache changed
    pub fn observe_audio(&mut self, payload: &Bytes) -> bool {
        let Some(tag) = AudioTagHeader::parse(payload) else {
            return false;
        };

        let mut changed = false;
        if self.audio.codec != Some(tag.codec) {
            self.audio.codec = Some(tag.codec);
            self.audio.sample_rate = tag.sample_rate;
            self.audio.channels = tag.channels;
            changed = true;
        }
        if tag.is_config {
            self.audio.config = Some(payload.clone());
            changed = true;
        }
        changed
    }

    /// Track a video frame; returns true when the cache changed
    pub fn observe_video(&mut self, payload: &Bytes) -> bool {
        let Some(tag) = VideoTagHeader::parse(payload) else {
            return false;
        };

        let mut changed = false;
        if tag.is_config {
            self.video.config = Some(payload.clone());
            changed = true;
        }
        if self.video.codec != Some(tag.codec) {
            self.video.codec = Some(tag.codec);
            changed = true;
        }
        changed
    }

    /// Frames a late joiner needs, in order: metadata, audio config, video config
    pub fn bootstrap_frames(&self, stream_id: u32) -> Vec<ChunkMessage> {
        let mut frames = Vec::with_capacity(3);

        if let Some(meta) = self.metadata.as_ref().filter(|m| !m.is_empty()) {
            frames.push(ChunkMessage::new(CSID_DATA, MSG_DATA_AMF0, stream_id, 0, meta.clone()));
        }
        if self.audio.codec == Some(AUDIO_CODEC_AAC) {
            if let Some(config) = &self.audio.config {
                frames.push(ChunkMessage::new(CSID_AUDIO, MSG_AUDIO, stream_id, 0, config.clone()));
            }
        }
        if matches!(self.video.codec, Some(VIDEO_CODEC_AVC | VIDEO_CODEC_HEVC)) {
            if let Some(config) = &self.video.config {
                frames.push(ChunkMessage::new(CSID_VIDEO, MSG_VIDEO, stream_id, 0, config.clone()));
            }
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_header_parse() {
        // AAC, 44.1kHz, 16 bit, stereo, sequence header
        let tag = AudioTagHeader::parse(&[0xAF, 0x00, 0x12, 0x10]).unwrap();
        assert_eq!(tag.codec, 10);
        assert_eq!(tag.sample_rate, 44100);
        assert_eq!(tag.channels, 2);
        assert!(tag.is_config);

        let raw = AudioTagHeader::parse(&[0xAF, 0x01, 0x21]).unwrap();
        assert!(!raw.is_config);

        // MP3 never yields a config frame
        assert!(!AudioTagHeader::parse(&[0x2F, 0x00]).unwrap().is_config);
        assert!(AudioTagHeader::parse(&[]).is_none());
    }

    #[test]
    fn test_video_header_parse() {
        let avc = VideoTagHeader::parse(&[0x17, 0x00, 0, 0, 0]).unwrap();
        assert_eq!(avc.frame_type, 1);
        assert_eq!(avc.codec, 7);
        assert!(avc.is_config);

        let hevc = VideoTagHeader::parse(&[0x1C, 0x00]).unwrap();
        assert!(hevc.is_config);

        // inter frame with a zero second byte is not a config
        assert!(!VideoTagHeader::parse(&[0x27, 0x00]).unwrap().is_config);
        assert!(!VideoTagHeader::parse(&[0x17, 0x01]).unwrap().is_config);
    }

    #[test]
    fn test_metadata_wrapped_and_recorded() {
        let mut cache = StreamCache::default();
        let props = AmfValue::object([
            ("width", AmfValue::Number(1280.0)),
            ("height", AmfValue::Number(720.0)),
            ("framerate", AmfValue::Number(30.0)),
            ("audiosamplerate", AmfValue::Number(48000.0)),
            ("stereo", AmfValue::Boolean(true)),
        ]);

        let payload = cache.apply_metadata(&props);
        let values = amf0::decode_all(&payload);
        assert_eq!(values[0].as_str(), Some("onMetaData"));
        assert_eq!(values[1].get_number("width"), Some(1280.0));

        assert_eq!(cache.video.width, 1280.0);
        assert_eq!(cache.video.frame_rate, 30.0);
        assert_eq!(cache.audio.sample_rate, 48000);
        assert_eq!(cache.audio.channels, 2);
        assert_eq!(cache.metadata, Some(payload));
    }

    #[test]
    fn test_bootstrap_order() {
        let mut cache = StreamCache::default();
        cache.apply_metadata(&AmfValue::object([("width", AmfValue::Number(640.0))]));
        assert!(cache.observe_video(&Bytes::from_static(&[0x17, 0x00, 1, 2])));
        assert!(cache.observe_audio(&Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10])));
        // regular frames leave the cache alone
        assert!(!cache.observe_audio(&Bytes::from_static(&[0xAF, 0x01, 0x21])));

        let frames = cache.bootstrap_frames(7);
        let types: Vec<u8> = frames.iter().map(|f| f.header.message_type).collect();
        assert_eq!(types, vec![MSG_DATA_AMF0, MSG_AUDIO, MSG_VIDEO]);
        assert!(frames.iter().all(|f| f.header.stream_id == 7 && f.header.timestamp == 0));
        assert_eq!(&frames[2].payload[..], &[0x17, 0x00, 1, 2]);
    }

    #[test]
    fn test_bootstrap_skips_unsupported_codecs() {
        let mut cache = StreamCache::default();
        cache.observe_audio(&Bytes::from_static(&[0x2F, 0x00]));
        // VP6 keyframe
        cache.observe_video(&Bytes::from_static(&[0x14, 0x00]));
        assert!(cache.bootstrap_frames(1).is_empty());
    }
}
