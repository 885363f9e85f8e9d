//! Minimal RTCP recognition.
//!
//! The engine accepts RTCP on the interleaved stream but takes no action on
//! it; this module only pulls apart the common header so received blocks can
//! be identified and logged.

use crate::error::RtspcError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpPacketType {
    SenderReport,
    ReceiverReport,
    SourceDescription,
    Goodbye,
    ApplicationDefined,
}

impl RtcpPacketType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            200 => Some(Self::SenderReport),
            201 => Some(Self::ReceiverReport),
            202 => Some(Self::SourceDescription),
            203 => Some(Self::Goodbye),
            204 => Some(Self::ApplicationDefined),
            _ => None,
        }
    }
}

/// Common-header fields of one RTCP packet.
#[derive(Debug, Clone, Copy)]
pub struct RtcpInfo {
    pub packet_type: RtcpPacketType,
    pub report_count: u8,
    /// Total packet length in bytes, per the length field
    pub length: usize,
}

impl RtcpInfo {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(RtspcError::Protocol("RTCP packet shorter than header".into()));
        }

        let version = (data[0] >> 6) & 0x03;
        if version != 2 {
            return Err(RtspcError::Protocol(format!(
                "unsupported RTCP version {}",
                version
            )));
        }

        let packet_type = RtcpPacketType::from_u8(data[1]).ok_or_else(|| {
            RtspcError::Protocol(format!("unknown RTCP packet type {}", data[1]))
        })?;

        let length = (u16::from_be_bytes([data[2], data[3]]) as usize + 1) * 4;

        Ok(Self {
            packet_type,
            report_count: data[0] & 0x1f,
            length,
        })
    }
}
