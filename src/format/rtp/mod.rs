//! RTP packet parsing and access-unit assembly.
//!
//! The engine receives interleaved blocks that may carry RTP or RTCP.
//! [`RtpSession`] tells the two apart, parses RTP packets, and groups the
//! packets of one access unit (same timestamp, terminated by the marker bit)
//! so the stream can depacketize them as a whole.

use crate::error::RtspcError;
use crate::format::rtcp::RtcpInfo;
use crate::Result;
use bytes::Bytes;
use log::{debug, warn};
use std::collections::HashMap;

/// An RTP packet with its parsed header fields.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(RtspcError::Protocol("RTP packet shorter than header".into()));
        }

        let first_byte = data[0];
        let second_byte = data[1];

        let version = (first_byte >> 6) & 0x03;
        if version != 2 {
            return Err(RtspcError::Protocol(format!(
                "unsupported RTP version {}",
                version
            )));
        }

        let padding = (first_byte & 0x20) != 0;
        let extension = (first_byte & 0x10) != 0;
        let csrc_count = first_byte & 0x0f;

        let marker = (second_byte & 0x80) != 0;
        let payload_type = second_byte & 0x7f;

        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = 12;

        let mut csrc = Vec::with_capacity(csrc_count as usize);
        for _ in 0..csrc_count {
            if offset + 4 > data.len() {
                return Err(RtspcError::Protocol("truncated RTP CSRC list".into()));
            }
            csrc.push(u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]));
            offset += 4;
        }

        if extension {
            if offset + 4 > data.len() {
                return Err(RtspcError::Protocol("truncated RTP extension header".into()));
            }
            let ext_length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize * 4;
            offset += 4;
            if offset + ext_length > data.len() {
                return Err(RtspcError::Protocol("truncated RTP extension data".into()));
            }
            offset += ext_length;
        }

        let payload = if padding {
            let padding_len = data[data.len() - 1] as usize;
            if padding_len == 0 || offset + padding_len > data.len() {
                return Err(RtspcError::Protocol("invalid RTP padding length".into()));
            }
            Bytes::copy_from_slice(&data[offset..data.len() - padding_len])
        } else {
            Bytes::copy_from_slice(&data[offset..])
        };

        Ok(Self {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            payload,
        })
    }
}

/// The ordered RTP packets of one complete access unit.
pub type AccessUnit = Vec<RtpPacket>;

/// Assembles interleaved block payloads into complete access units, keyed by
/// payload type. RTCP blocks are recognized and counted but trigger no
/// action.
#[derive(Debug, Default)]
pub struct RtpSession {
    pending: HashMap<u8, AccessUnit>,
    rtcp_received: u64,
}

impl RtpSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one interleaved block payload. Returns every access unit the
    /// block completed, in arrival order.
    pub fn on_data_received(&mut self, data: &Bytes) -> Result<Vec<AccessUnit>> {
        if is_rtcp(data) {
            match RtcpInfo::parse(data) {
                Ok(info) => {
                    self.rtcp_received += 1;
                    debug!("RTCP received: {:?}", info);
                }
                Err(e) => warn!("Ignoring unparsable RTCP block: {}", e),
            }
            return Ok(Vec::new());
        }

        let packet = RtpPacket::parse(data)?;
        let payload_type = packet.payload_type;
        let marker = packet.marker;
        let mut completed = Vec::new();

        let pending = self.pending.entry(payload_type).or_default();

        // A timestamp change without a marker still ends the previous unit.
        if let Some(first) = pending.first() {
            if first.timestamp != packet.timestamp {
                completed.push(std::mem::take(pending));
            }
        }

        pending.push(packet);

        if marker {
            if let Some(unit) = self.pending.remove(&payload_type) {
                completed.push(unit);
            }
        }

        Ok(completed)
    }

    /// Number of RTCP blocks seen so far.
    pub fn rtcp_count(&self) -> u64 {
        self.rtcp_received
    }
}

/// RTCP packet types occupy 200..=204 where an RTP payload type would be,
/// which is how the two are told apart on a shared channel.
fn is_rtcp(data: &Bytes) -> bool {
    data.len() >= 2 && (200..=204).contains(&data[1])
}
