//! Length-prefixed frame codec.
//!
//! Everything on the wire travels inside a frame. There are two flavors:
//!
//! - **Client frames** (game client ↔ this process): a 4-byte little-endian
//!   length followed by that many payload bytes.
//! - **Tagged frames** (this process ↔ coordinator): the length covers a
//!   4-byte little-endian correlation id plus the payload. Correlation id 0
//!   marks an unsolicited push; any other id matches a pending request.
//!
//! ```text
//! client:  [len: u32 LE][payload ...............]
//! tagged:  [len: u32 LE][corr id: i32 LE][payload ........]
//!                        └──────── len covers this ───────┘
//! ```
//!
//! An empty payload is a heartbeat in both flavors: it refreshes the
//! peer's activity clock and is never surfaced to the dispatcher.
//!
//! The `split_*` functions consume from the FRONT of a [`BytesMut`] that
//! the read loop appends to; a partial frame stays buffered untouched
//! until more bytes arrive.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of the length prefix on every frame.
pub const LEN_PREFIX: usize = 4;

/// Size of the correlation id inside a tagged frame body.
pub const TAG_LEN: usize = 4;

/// Upper bound on a frame body.
///
/// Chat payloads are small JSON documents; a length prefix anywhere near
/// this cap means the stream is desynchronized or the peer is hostile,
/// and the connection must be dropped before the length drives an
/// allocation.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// One frame received on the coordinator link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedFrame {
    /// 0 for pushes and heartbeats, otherwise the id of the request this
    /// frame answers.
    pub correlation_id: i32,
    /// JSON body; empty for heartbeats.
    pub payload: Bytes,
}

impl TaggedFrame {
    /// True when this frame is a link heartbeat (empty body).
    pub fn is_heartbeat(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Wraps `payload` in a client frame.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Splits one complete client frame off the front of `buf`.
///
/// Returns `Ok(None)` while the buffer holds less than a full frame —
/// the caller keeps appending and retries. An empty returned payload is
/// the client heartbeat.
pub fn split_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    if buf.len() < LEN_PREFIX + len {
        return Ok(None);
    }
    buf.advance(LEN_PREFIX);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Wraps `payload` in a tagged frame carrying `correlation_id`.
pub fn encode_tagged(correlation_id: i32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + TAG_LEN + payload.len());
    buf.put_u32_le((TAG_LEN + payload.len()) as u32);
    buf.put_i32_le(correlation_id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Splits one complete tagged frame off the front of `buf`.
///
/// Returns `Ok(None)` on insufficient data. A zero-length body is the
/// link heartbeat and comes back as correlation id 0 with an empty
/// payload; a non-empty body shorter than the correlation id is a
/// protocol error.
pub fn split_tagged(buf: &mut BytesMut) -> Result<Option<TaggedFrame>, ProtocolError> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > TAG_LEN + MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: TAG_LEN + MAX_FRAME_LEN,
        });
    }
    if buf.len() < LEN_PREFIX + len {
        return Ok(None);
    }
    buf.advance(LEN_PREFIX);
    let mut body = buf.split_to(len);
    if body.is_empty() {
        return Ok(Some(TaggedFrame {
            correlation_id: 0,
            payload: Bytes::new(),
        }));
    }
    if body.len() < TAG_LEN {
        return Err(ProtocolError::TruncatedFrame { len: body.len() });
    }
    let correlation_id = body.get_i32_le();
    Ok(Some(TaggedFrame {
        correlation_id,
        payload: body.freeze(),
    }))
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(bytes: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(bytes);
        buf
    }

    // =====================================================================
    // Client frames
    // =====================================================================

    #[test]
    fn test_split_frame_round_trip() {
        let mut buf = feed(&encode_frame(b"hello"));
        let payload = split_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_split_frame_every_prefix_is_insufficient() {
        // Feeding any strict prefix of an encoded frame must yield
        // "not yet" and leave the buffer intact for the next read.
        let encoded = encode_frame(b"payload");
        for cut in 0..encoded.len() {
            let mut buf = feed(&encoded[..cut]);
            assert!(
                split_frame(&mut buf).unwrap().is_none(),
                "prefix of {cut} bytes should be insufficient"
            );
            assert_eq!(buf.len(), cut, "partial frame must stay buffered");
        }
    }

    #[test]
    fn test_split_frame_partial_survives_across_feeds() {
        let encoded = encode_frame(b"split me");
        let mut buf = feed(&encoded[..6]);
        assert!(split_frame(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[6..]);
        let payload = split_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"split me");
    }

    #[test]
    fn test_split_frame_consumes_only_one_frame() {
        let mut buf = feed(&encode_frame(b"one"));
        buf.extend_from_slice(&encode_frame(b"two"));

        let first = split_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&first[..], b"one");
        let second = split_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&second[..], b"two");
        assert!(split_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_split_frame_empty_payload_is_heartbeat() {
        let mut buf = feed(&encode_frame(b""));
        let payload = split_frame(&mut buf).unwrap().unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_split_frame_oversized_length_is_error() {
        let mut buf = feed(&(MAX_FRAME_LEN as u32 + 1).to_le_bytes());
        let err = split_frame(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    // =====================================================================
    // Tagged frames
    // =====================================================================

    #[test]
    fn test_split_tagged_round_trip() {
        let mut buf = feed(&encode_tagged(7, b"{\"Code\":0}"));
        let frame = split_tagged(&mut buf).unwrap().unwrap();
        assert_eq!(frame.correlation_id, 7);
        assert_eq!(&frame.payload[..], b"{\"Code\":0}");
        assert!(!frame.is_heartbeat());
    }

    #[test]
    fn test_split_tagged_negative_id_round_trip() {
        let mut buf = feed(&encode_tagged(-3, b"x"));
        let frame = split_tagged(&mut buf).unwrap().unwrap();
        assert_eq!(frame.correlation_id, -3);
    }

    #[test]
    fn test_split_tagged_every_prefix_is_insufficient() {
        let encoded = encode_tagged(42, b"body");
        for cut in 0..encoded.len() {
            let mut buf = feed(&encoded[..cut]);
            assert!(split_tagged(&mut buf).unwrap().is_none());
        }
    }

    #[test]
    fn test_split_tagged_empty_body_is_heartbeat() {
        // A zero-length body carries no correlation id at all.
        let mut buf = feed(&0u32.to_le_bytes());
        let frame = split_tagged(&mut buf).unwrap().unwrap();
        assert_eq!(frame.correlation_id, 0);
        assert!(frame.is_heartbeat());
    }

    #[test]
    fn test_split_tagged_body_shorter_than_id_is_error() {
        let mut buf = feed(&2u32.to_le_bytes());
        buf.extend_from_slice(&[0xAA, 0xBB]);
        let err = split_tagged(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedFrame { len: 2 }));
    }

    #[test]
    fn test_split_tagged_length_covers_id_and_payload() {
        // encode_tagged(id, "abc") must announce 4 + 3 = 7 body bytes.
        let encoded = encode_tagged(1, b"abc");
        assert_eq!(&encoded[..4], &7u32.to_le_bytes());
        assert_eq!(encoded.len(), 4 + 7);
    }
}
