//! RFC 7587 Opus depacketizer. One RTP payload carries one Opus packet, so
//! this is a passthrough that rejects empty input.

use crate::error::RtspcError;
use crate::Result;
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Default)]
pub struct OpusDepacketizer;

impl OpusDepacketizer {
    pub fn new() -> Self {
        Self
    }

    pub fn depacketize(&mut self, payloads: &[Bytes]) -> Result<Bytes> {
        match payloads {
            [] => Err(RtspcError::Depacketization("empty Opus access unit".into())),
            [single] => Ok(single.clone()),
            many => {
                let mut out = BytesMut::new();
                for payload in many {
                    out.put_slice(payload);
                }
                Ok(out.freeze())
            }
        }
    }
}
