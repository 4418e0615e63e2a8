//! RTMP handshake implementation
//!
//! The RTMP handshake consists of three phases:
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes) ---------------|
//!   |<------ S2 (1536 bytes) ---------------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! Two C1 layouts are accepted. The plain one is answered by echoing C1
//! twice. The digest one (used by Flash Player derived clients) embeds an
//! HMAC-SHA256 of the packet at an offset derived from four bytes in
//! either the first or second half of the packet:
//!
//! ```text
//! DigestV1: offset = (c1[8] + c1[9] + c1[10] + c1[11]) % 728 + 12
//! DigestV2: offset = (c1[772] + .. + c1[775]) % 728 + 776
//! ```
//!
//! Detection never fails outright: anything that does not verify is
//! treated as a plain handshake.

use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::HandshakeError;
use crate::protocol::constants::{
    GENUINE_FMS_KEY, GENUINE_FP_KEY, HANDSHAKE_SIZE, RTMP_VERSION, SHA256_DIGEST_LENGTH,
};

type HmacSha256 = Hmac<Sha256>;

/// Detected C1 layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFormat {
    /// No embedded digest, echo C1
    Plain,
    /// Digest located through the bytes at offset 8
    DigestV1,
    /// Digest located through the bytes at offset 772
    DigestV2,
}

impl HandshakeFormat {
    fn digest_base(self) -> Option<usize> {
        match self {
            HandshakeFormat::Plain => None,
            HandshakeFormat::DigestV1 => Some(8),
            HandshakeFormat::DigestV2 => Some(772),
        }
    }
}

/// Offset of the digest for the region starting at `base`
fn digest_offset(packet: &[u8], base: usize) -> usize {
    let sum: usize = packet[base..base + 4].iter().map(|&b| b as usize).sum();
    sum % 728 + base + 4
}

/// HMAC-SHA256 of `parts` concatenated
fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; SHA256_DIGEST_LENGTH], HandshakeError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| HandshakeError::InvalidKey)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Digest of a packet with the 32 digest bytes at `offset` left out
fn packet_digest(
    packet: &[u8],
    offset: usize,
    key: &[u8],
) -> Result<[u8; SHA256_DIGEST_LENGTH], HandshakeError> {
    hmac_sha256(
        key,
        &[&packet[..offset], &packet[offset + SHA256_DIGEST_LENGTH..]],
    )
}

/// Work out which handshake layout a C1 signature uses
///
/// Offset 8 is tried before offset 772; the first verified digest wins.
/// Short input and digest mismatches fall back to [`HandshakeFormat::Plain`].
pub fn detect_format(signature: &[u8]) -> HandshakeFormat {
    if signature.len() < HANDSHAKE_SIZE {
        return HandshakeFormat::Plain;
    }
    let signature = &signature[..HANDSHAKE_SIZE];

    for format in [HandshakeFormat::DigestV1, HandshakeFormat::DigestV2] {
        let Some(base) = format.digest_base() else {
            continue;
        };
        let offset = digest_offset(signature, base);
        let expected = match packet_digest(signature, offset, GENUINE_FP_KEY) {
            Ok(d) => d,
            Err(_) => continue,
        };
        if signature[offset..offset + SHA256_DIGEST_LENGTH] == expected {
            return format;
        }
    }

    HandshakeFormat::Plain
}

/// Build S0 + S1 + S2 for a client C1
pub fn generate_server_response(client_signature: &[u8]) -> Result<Bytes, HandshakeError> {
    if client_signature.len() < HANDSHAKE_SIZE {
        return Err(HandshakeError::ShortSignature(client_signature.len()));
    }
    let c1 = &client_signature[..HANDSHAKE_SIZE];

    let mut out = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
    out.put_u8(RTMP_VERSION);

    let format = detect_format(c1);
    match format.digest_base() {
        None => {
            out.put_slice(c1);
            out.put_slice(c1);
        }
        Some(base) => {
            out.put_slice(&signed_packet(base, GENUINE_FMS_KEY)?);
            out.put_slice(&challenge_response(c1, base)?);
        }
    }

    tracing::trace!(format = ?format, "Handshake response generated");
    Ok(out.freeze())
}

/// `[0,0,0,0,1,2,3,4]` followed by random bytes, with a digest keyed by
/// `key` embedded for the region at `base`
fn signed_packet(base: usize, key: &[u8]) -> Result<[u8; HANDSHAKE_SIZE], HandshakeError> {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    packet[4..8].copy_from_slice(&[1, 2, 3, 4]);
    rand::thread_rng().fill_bytes(&mut packet[8..]);

    let offset = digest_offset(&packet, base);
    let digest = packet_digest(&packet, offset, key)?;
    packet[offset..offset + SHA256_DIGEST_LENGTH].copy_from_slice(&digest);
    Ok(packet)
}

/// S2: random filler followed by an HMAC of the filler, keyed by a key
/// derived from the client's digest
fn challenge_response(c1: &[u8], base: usize) -> Result<[u8; HANDSHAKE_SIZE], HandshakeError> {
    let offset = digest_offset(c1, base);
    let challenge = &c1[offset..offset + SHA256_DIGEST_LENGTH];

    let mut key_suffix = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key_suffix);
    let mut server_key = Vec::with_capacity(GENUINE_FMS_KEY.len() + key_suffix.len());
    server_key.extend_from_slice(GENUINE_FMS_KEY);
    server_key.extend_from_slice(&key_suffix);

    let derived_key = hmac_sha256(&server_key, &[challenge])?;

    let mut packet = [0u8; HANDSHAKE_SIZE];
    let filler_len = HANDSHAKE_SIZE - SHA256_DIGEST_LENGTH;
    rand::thread_rng().fill_bytes(&mut packet[..filler_len]);
    let signature = hmac_sha256(&derived_key, &[&packet[..filler_len]])?;
    packet[filler_len..].copy_from_slice(&signature);
    Ok(packet)
}

/// Build a C1 signed the way Flash Player clients sign it
///
/// Useful to exercise the digest path against a server.
pub fn generate_client_signature(
    format: HandshakeFormat,
) -> Result<[u8; HANDSHAKE_SIZE], HandshakeError> {
    match format.digest_base() {
        Some(base) => signed_packet(base, GENUINE_FP_KEY),
        None => {
            let mut packet = [0u8; HANDSHAKE_SIZE];
            rand::thread_rng().fill_bytes(&mut packet[8..]);
            Ok(packet)
        }
    }
}

/// Server-side handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Waiting for C0
    None,
    /// C0 seen, collecting C1
    S0,
    /// S0S1S2 sent, collecting C2
    S1,
    /// C2 received, chunk stream follows
    S2,
}

/// Incremental server handshake
///
/// Fed with whatever the socket produced; C0, C1 and C2 may be split or
/// coalesced arbitrarily across reads.
#[derive(Debug)]
pub struct Handshake {
    phase: HandshakePhase,
    version: u8,
    buffer: BytesMut,
}

/// Result of feeding bytes into the handshake
#[derive(Debug, Default)]
pub struct HandshakeProgress {
    /// Bytes to write back to the client (S0S1S2)
    pub response: Option<Bytes>,
    /// Number of input bytes the handshake consumed
    pub consumed: usize,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            phase: HandshakePhase::None,
            version: 0,
            buffer: BytesMut::with_capacity(HANDSHAKE_SIZE),
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Version byte the client sent in C0
    pub fn client_version(&self) -> u8 {
        self.version
    }

    /// Check if handshake is complete
    pub fn is_done(&self) -> bool {
        self.phase == HandshakePhase::S2
    }

    /// Consume handshake bytes from `data`
    ///
    /// Stops as soon as the handshake is complete; anything after
    /// `consumed` belongs to the chunk stream.
    pub fn process(&mut self, data: &[u8]) -> Result<HandshakeProgress, HandshakeError> {
        let mut progress = HandshakeProgress::default();
        let mut pos = 0;

        while pos < data.len() && !self.is_done() {
            match self.phase {
                HandshakePhase::None => {
                    self.version = data[pos];
                    if self.version != RTMP_VERSION {
                        tracing::debug!(version = self.version, "Unexpected RTMP version, continuing");
                    }
                    pos += 1;
                    self.phase = HandshakePhase::S0;
                }
                HandshakePhase::S0 | HandshakePhase::S1 => {
                    let wanted = HANDSHAKE_SIZE - self.buffer.len();
                    let take = wanted.min(data.len() - pos);
                    self.buffer.put_slice(&data[pos..pos + take]);
                    pos += take;

                    if self.buffer.len() == HANDSHAKE_SIZE {
                        if self.phase == HandshakePhase::S0 {
                            progress.response = Some(generate_server_response(&self.buffer)?);
                            self.phase = HandshakePhase::S1;
                        } else {
                            // C2 content is not verified
                            self.phase = HandshakePhase::S2;
                        }
                        self.buffer.clear();
                    }
                }
                HandshakePhase::S2 => break,
            }
        }

        progress.consumed = pos;
        Ok(progress)
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_c1() -> Vec<u8> {
        let mut packet = vec![0u8; HANDSHAKE_SIZE];
        packet[0..4].copy_from_slice(&1_700_000_000u32.to_be_bytes());
        rand::thread_rng().fill_bytes(&mut packet[8..]);
        packet
    }

    #[test]
    fn test_zeroed_buffer_is_plain() {
        assert_eq!(detect_format(&[0u8; 1000]), HandshakeFormat::Plain);
        assert_eq!(detect_format(&[0u8; HANDSHAKE_SIZE]), HandshakeFormat::Plain);
    }

    #[test]
    fn test_short_buffer_is_plain() {
        let mut c0 = [0u8; 8];
        c0[0] = RTMP_VERSION;
        assert_eq!(detect_format(&c0), HandshakeFormat::Plain);
    }

    #[test]
    fn test_random_c1_is_plain() {
        assert_eq!(detect_format(&plain_c1()), HandshakeFormat::Plain);
    }

    #[test]
    fn test_detects_digest_v1() {
        let c1 = generate_client_signature(HandshakeFormat::DigestV1).unwrap();
        assert_eq!(detect_format(&c1), HandshakeFormat::DigestV1);
    }

    #[test]
    fn test_detects_digest_v2() {
        let c1 = generate_client_signature(HandshakeFormat::DigestV2).unwrap();
        assert_eq!(detect_format(&c1), HandshakeFormat::DigestV2);
    }

    #[test]
    fn test_tampered_digest_falls_back_to_plain() {
        let mut c1 = generate_client_signature(HandshakeFormat::DigestV2).unwrap();
        let offset = digest_offset(&c1, 772);
        c1[offset] ^= 0xFF;
        assert_eq!(detect_format(&c1), HandshakeFormat::Plain);
    }

    #[test]
    fn test_digest_offset_range() {
        let mut packet = [0u8; HANDSHAKE_SIZE];
        packet[8..12].copy_from_slice(&[0xFF; 4]);
        // 1020 % 728 = 292
        assert_eq!(digest_offset(&packet, 8), 292 + 12);
        assert_eq!(digest_offset(&packet, 772), 776);
    }

    #[test]
    fn test_plain_response_echoes_c1() {
        let c1 = plain_c1();
        let response = generate_server_response(&c1).unwrap();

        assert_eq!(response.len(), 1 + HANDSHAKE_SIZE * 2);
        assert_eq!(response[0], RTMP_VERSION);
        assert_eq!(&response[1..1 + HANDSHAKE_SIZE], &c1[..]);
        assert_eq!(&response[1 + HANDSHAKE_SIZE..], &c1[..]);
    }

    #[test]
    fn test_digest_response_is_signed() {
        let c1 = generate_client_signature(HandshakeFormat::DigestV1).unwrap();
        let response = generate_server_response(&c1).unwrap();

        assert_eq!(response.len(), 1 + HANDSHAKE_SIZE * 2);
        assert_ne!(&response[1..1 + HANDSHAKE_SIZE], &c1[..]);

        // S1 carries an FMS-keyed digest in the same region
        let s1 = &response[1..1 + HANDSHAKE_SIZE];
        assert_eq!(&s1[4..8], &[1, 2, 3, 4]);
        let offset = digest_offset(s1, 8);
        let expected = packet_digest(s1, offset, GENUINE_FMS_KEY).unwrap();
        assert_eq!(&s1[offset..offset + SHA256_DIGEST_LENGTH], &expected[..]);
    }

    #[test]
    fn test_short_signature_rejected() {
        assert_eq!(
            generate_server_response(&[3u8; 10]).unwrap_err(),
            HandshakeError::ShortSignature(10)
        );
    }

    #[test]
    fn test_incremental_handshake() {
        let mut handshake = Handshake::new();
        let c1 = plain_c1();

        let mut c0c1 = vec![RTMP_VERSION];
        c0c1.extend_from_slice(&c1);

        // C0 and half of C1
        let progress = handshake.process(&c0c1[..700]).unwrap();
        assert_eq!(progress.consumed, 700);
        assert!(progress.response.is_none());
        assert_eq!(handshake.phase(), HandshakePhase::S0);

        // Rest of C1
        let progress = handshake.process(&c0c1[700..]).unwrap();
        let response = progress.response.unwrap();
        assert_eq!(&response[1..1 + HANDSHAKE_SIZE], &c1[..]);
        assert_eq!(handshake.phase(), HandshakePhase::S1);

        // C2 followed by the first chunk bytes
        let mut tail = vec![0u8; HANDSHAKE_SIZE];
        tail.extend_from_slice(&[0x03, 0x00]);
        let progress = handshake.process(&tail).unwrap();
        assert_eq!(progress.consumed, HANDSHAKE_SIZE);
        assert!(handshake.is_done());
        assert_eq!(handshake.client_version(), RTMP_VERSION);
    }

    #[test]
    fn test_odd_version_is_accepted() {
        let mut handshake = Handshake::new();
        let mut data = vec![6u8];
        data.extend_from_slice(&plain_c1());

        let progress = handshake.process(&data).unwrap();
        assert!(progress.response.is_some());
        assert_eq!(handshake.client_version(), 6);
    }
}
