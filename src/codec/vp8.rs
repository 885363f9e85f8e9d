//! RFC 7741 VP8 depacketizer.
//!
//! Strips the VP8 payload descriptor from each fragment and concatenates the
//! remainders into one raw VP8 frame.

use crate::error::RtspcError;
use crate::Result;
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Default)]
pub struct Vp8Depacketizer;

impl Vp8Depacketizer {
    pub fn new() -> Self {
        Self
    }

    pub fn depacketize(&mut self, payloads: &[Bytes]) -> Result<Bytes> {
        let mut out = BytesMut::new();

        for payload in payloads {
            let offset = descriptor_len(payload)?;
            out.put_slice(&payload[offset..]);
        }

        if out.is_empty() {
            return Err(RtspcError::Depacketization("empty VP8 access unit".into()));
        }

        Ok(out.freeze())
    }
}

/// Length of the VP8 payload descriptor at the start of `payload`.
fn descriptor_len(payload: &[u8]) -> Result<usize> {
    let truncated = || RtspcError::Depacketization("truncated VP8 payload descriptor".into());

    let first = *payload.first().ok_or_else(truncated)?;
    let mut len = 1;

    // X bit: extended control bits present
    if first & 0x80 != 0 {
        let ext = *payload.get(len).ok_or_else(truncated)?;
        len += 1;

        // I bit: PictureID, one or two bytes (M bit)
        if ext & 0x80 != 0 {
            let pid = *payload.get(len).ok_or_else(truncated)?;
            len += 1;
            if pid & 0x80 != 0 {
                len += 1;
            }
        }
        // L bit: TL0PICIDX
        if ext & 0x40 != 0 {
            len += 1;
        }
        // T or K bit: TID/KEYIDX byte
        if ext & 0x30 != 0 {
            len += 1;
        }
    }

    if len > payload.len() {
        return Err(truncated());
    }
    Ok(len)
}
