//! Length-prefixed TCP framing.
//!
//! Wire format: a 4-byte big-endian header holding `len(payload) XOR
//! head_blend`, followed by `len` payload bytes. `head_blend` is a
//! per-service mask, not an encryption key — it only obscures the length
//! field from a passive observer of raw socket bytes.

use crate::buffer::Buffer;
use crate::error::{Result, ServiceError};
use bytes::{Buf, Bytes, BytesMut};

/// Maximum accepted frame payload length.
pub const MAX_FRAME_LEN: u32 = 2 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Drains as many complete frames as `buf` currently holds into `out`,
/// leaving any trailing partial frame in `buf` for the next read.
///
/// Returns `Err` the moment a header decodes to a length outside `0 <
/// len <= MAX_FRAME_LEN`; the caller must treat this as fatal for the
/// connection. Frames already pushed to `out` before the bad header was
/// seen are still valid and should be delivered.
pub fn decode_frames(buf: &mut BytesMut, head_blend: u32, out: &mut Vec<Bytes>) -> Result<()> {
    loop {
        if buf.len() < HEADER_LEN {
            return Ok(());
        }
        let header = u32::from_be_bytes(buf[..HEADER_LEN].try_into().unwrap());
        let len = header ^ head_blend;
        if len == 0 || len > MAX_FRAME_LEN {
            return Err(ServiceError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        let total = HEADER_LEN + len as usize;
        if buf.len() < total {
            return Ok(());
        }
        buf.advance(HEADER_LEN);
        out.push(buf.split_to(len as usize).freeze());
    }
}

/// Encodes `payload` into `buf` as `header || payload`. `buf` is not reset
/// first; callers drawing a reused [`Buffer`] from a pool must call
/// [`Buffer::reset`] themselves.
pub fn encode_into(buf: &mut Buffer, payload: &[u8], head_blend: u32) -> Result<()> {
    let len = payload.len();
    if len == 0 {
        return Err(ServiceError::ZeroLengthFrame);
    }
    if len as u64 > MAX_FRAME_LEN as u64 {
        return Err(ServiceError::FrameTooLarge {
            len: len as u32,
            max: MAX_FRAME_LEN,
        });
    }
    buf.write_u32_be((len as u32) ^ head_blend);
    buf.write(payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLEND: u32 = 0xA5A5_A5A5;

    fn encode(payload: &[u8]) -> Bytes {
        let mut buf = Buffer::new();
        encode_into(&mut buf, payload, BLEND).unwrap();
        Bytes::copy_from_slice(buf.bytes())
    }

    #[test]
    fn round_trips_a_single_frame() {
        let wire = encode(b"hello");
        let mut acc = BytesMut::from(&wire[..]);
        let mut out = Vec::new();
        decode_frames(&mut acc, BLEND, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], b"hello");
        assert!(acc.is_empty());
    }

    #[test]
    fn yields_nothing_on_a_partial_header() {
        let mut acc = BytesMut::from(&[0u8, 0, 0][..]);
        let mut out = Vec::new();
        decode_frames(&mut acc, BLEND, &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn yields_nothing_on_a_partial_body_and_resumes_once_complete() {
        let wire = encode(b"world");
        let mut acc = BytesMut::from(&wire[..wire.len() - 1]);
        let mut out = Vec::new();
        decode_frames(&mut acc, BLEND, &mut out).unwrap();
        assert!(out.is_empty());

        acc.extend_from_slice(&wire[wire.len() - 1..]);
        decode_frames(&mut acc, BLEND, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], b"world");
    }

    #[test]
    fn decodes_multiple_frames_delivered_in_one_read() {
        let mut acc = BytesMut::new();
        acc.extend_from_slice(&encode(b"one"));
        acc.extend_from_slice(&encode(b"two"));
        let mut out = Vec::new();
        decode_frames(&mut acc, BLEND, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][..], b"one");
        assert_eq!(&out[1][..], b"two");
    }

    #[test]
    fn rejects_a_zero_length_frame() {
        let mut acc = BytesMut::new();
        acc.extend_from_slice(&(0u32 ^ BLEND).to_be_bytes());
        let mut out = Vec::new();
        let err = decode_frames(&mut acc, BLEND, &mut out).unwrap_err();
        assert!(matches!(err, ServiceError::FrameTooLarge { len: 0, .. }));
    }

    #[test]
    fn rejects_a_frame_over_the_limit() {
        let mut acc = BytesMut::new();
        let over = MAX_FRAME_LEN + 1;
        acc.extend_from_slice(&(over ^ BLEND).to_be_bytes());
        let mut out = Vec::new();
        let err = decode_frames(&mut acc, BLEND, &mut out).unwrap_err();
        assert!(matches!(err, ServiceError::FrameTooLarge { len, .. } if len == over));
    }

    #[test]
    fn encode_rejects_a_zero_length_payload() {
        let mut buf = Buffer::new();
        let err = encode_into(&mut buf, b"", BLEND).unwrap_err();
        assert!(matches!(err, ServiceError::ZeroLengthFrame));
    }
}
