//! Binary envelope for socket frames
//!
//! ```text
//! +--------+----------------------+-------------------+
//! | kind   | length (24-bit, BE)  | payload           |
//! | 1 byte | 3 bytes              | `length` bytes    |
//! +--------+----------------------+-------------------+
//! ```
//!
//! Control payloads are UTF-8 JSON. Inbound stream payloads start with a
//! 44-byte audio container header followed by PCM16 LE samples.

use crate::{Error, Result};

/// Size of the envelope header (kind byte + 24-bit length)
pub const HEADER_LEN: usize = 4;

/// Largest payload that fits the 24-bit length field
pub const MAX_PAYLOAD_LEN: usize = 0x00FF_FFFF;

/// Container header preceding PCM samples in inbound stream payloads
pub const STREAM_SUBHEADER_LEN: usize = 44;

/// Frame kind discriminator (first envelope byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// JSON command or metadata
    Control,
    /// Raw audio samples
    Stream,
}

impl FrameKind {
    /// Wire byte for this kind
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Control => 0x00,
            Self::Stream => 0x01,
        }
    }

    /// Parse a kind byte
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Control),
            0x01 => Some(Self::Stream),
            _ => None,
        }
    }
}

/// A decoded frame borrowing its payload from the received buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Frame kind
    pub kind: FrameKind,
    /// Payload length announced in the header
    pub length: usize,
    /// Payload bytes
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// PCM bytes of a stream frame with the container header removed
    ///
    /// Returns `None` for control frames and for stream frames too short to
    /// carry the header.
    #[must_use]
    pub fn stream_pcm(&self) -> Option<&'a [u8]> {
        if self.kind != FrameKind::Stream {
            return None;
        }
        self.payload.get(STREAM_SUBHEADER_LEN..)
    }

    /// Payload of a control frame as UTF-8 text
    ///
    /// # Errors
    ///
    /// Returns error if this is not a control frame or the payload is not UTF-8
    pub fn control_text(&self) -> Result<&'a str> {
        if self.kind != FrameKind::Control {
            return Err(Error::Protocol("not a control frame".to_string()));
        }
        std::str::from_utf8(self.payload)
            .map_err(|e| Error::Protocol(format!("control payload is not utf-8: {e}")))
    }
}

/// Encode a payload into an envelope
///
/// # Panics
///
/// Panics if `payload` is longer than [`MAX_PAYLOAD_LEN`]; callers only ever
/// frame single JSON commands or single capture blocks.
#[must_use]
pub fn encode(kind: FrameKind, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    assert!(
        len <= MAX_PAYLOAD_LEN,
        "frame payload of {len} bytes exceeds 24-bit length field"
    );

    let mut buf = Vec::with_capacity(HEADER_LEN + len);
    buf.push(kind.as_byte());
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
    buf.extend_from_slice(payload);
    buf
}

/// Decode an envelope
///
/// # Errors
///
/// Returns a protocol error if the buffer is shorter than the header, the kind
/// byte is unknown, or the announced length exceeds the bytes received.
pub fn decode(bytes: &[u8]) -> Result<Frame<'_>> {
    let Some(header) = bytes.get(..HEADER_LEN) else {
        return Err(Error::Protocol(format!(
            "frame of {} bytes is shorter than header",
            bytes.len()
        )));
    };

    let kind = FrameKind::from_byte(header[0])
        .ok_or_else(|| Error::Protocol(format!("unknown frame kind 0x{:02x}", header[0])))?;

    let length =
        (usize::from(header[1]) << 16) | (usize::from(header[2]) << 8) | usize::from(header[3]);

    let payload = bytes
        .get(HEADER_LEN..HEADER_LEN + length)
        .ok_or_else(|| {
            Error::Protocol(format!(
                "frame announces {length} bytes but carries {}",
                bytes.len() - HEADER_LEN
            ))
        })?;

    Ok(Frame {
        kind,
        length,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let payload = vec![0xAB; 0x01_0203];
        let buf = encode(FrameKind::Stream, &payload);

        assert_eq!(&buf[..4], &[0x01, 0x01, 0x02, 0x03]);
        assert_eq!(buf.len(), 4 + payload.len());
    }

    #[test]
    fn test_roundtrip() {
        let buf = encode(FrameKind::Control, br#"{"a":1}"#);
        let frame = decode(&buf).unwrap();

        assert_eq!(frame.kind, FrameKind::Control);
        assert_eq!(frame.length, 7);
        assert_eq!(frame.control_text().unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn test_empty_payload() {
        let buf = encode(FrameKind::Control, &[]);
        assert_eq!(buf, vec![0, 0, 0, 0]);

        let frame = decode(&buf).unwrap();
        assert_eq!(frame.length, 0);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_unknown_kind() {
        let err = decode(&[0x07, 0, 0, 0]).unwrap_err();
        assert!(err.to_string().contains("unknown frame kind 0x07"));
    }

    #[test]
    fn test_truncated() {
        assert!(decode(&[0x00, 0x00]).is_err());
        assert!(decode(&[0x00, 0x00, 0x00, 0x05, b'a']).is_err());
    }

    #[test]
    fn test_stream_pcm_strips_subheader() {
        let mut payload = vec![0u8; STREAM_SUBHEADER_LEN];
        payload.extend_from_slice(&[1, 2, 3, 4]);
        let buf = encode(FrameKind::Stream, &payload);
        let frame = decode(&buf).unwrap();

        assert_eq!(frame.stream_pcm(), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_short_stream_has_no_pcm() {
        let buf = encode(FrameKind::Stream, &[0u8; 10]);
        let frame = decode(&buf).unwrap();
        assert_eq!(frame.stream_pcm(), None);
    }

    #[test]
    #[should_panic(expected = "exceeds 24-bit length field")]
    fn test_oversized_payload_panics() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        let _ = encode(FrameKind::Stream, &payload);
    }
}
