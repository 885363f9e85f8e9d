//! RFC 6184 H.264 depacketizer (single NAL, STAP-A, FU-A).
//!
//! Input is the ordered payload list of one access unit; output is an
//! Annex-B NAL stream. Interleaved packetization modes (FU-B, MTAP) are not
//! supported and fail depacketization.

use crate::error::RtspcError;
use crate::Result;
use bytes::{BufMut, Bytes, BytesMut};

const NAL_START_CODE: &[u8] = &[0x00, 0x00, 0x00, 0x01];

const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;

#[derive(Debug, Default)]
pub struct H264Depacketizer {
    /// FU-A reassembly in progress, complete NAL content so far
    fua: Option<BytesMut>,
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depacketize(&mut self, payloads: &[Bytes]) -> Result<Bytes> {
        let mut out = BytesMut::new();

        for payload in payloads {
            self.push_payload(payload, &mut out)?;
        }

        // A fragment run that never saw its end bit leaves nothing usable.
        if self.fua.take().is_some() {
            return Err(RtspcError::Depacketization(
                "access unit ended inside an unfinished FU-A".into(),
            ));
        }

        if out.is_empty() {
            return Err(RtspcError::Depacketization("empty H.264 access unit".into()));
        }

        Ok(out.freeze())
    }

    fn push_payload(&mut self, payload: &[u8], out: &mut BytesMut) -> Result<()> {
        let header = *payload.first().ok_or_else(|| {
            RtspcError::Depacketization("empty H.264 RTP payload".into())
        })?;
        let nal_type = header & 0x1f;

        match nal_type {
            1..=23 => {
                if self.fua.is_some() {
                    // A single NAL in the middle of a fragment run means loss.
                    self.fua = None;
                    return Err(RtspcError::Depacketization(
                        "single NAL interrupted FU-A reassembly".into(),
                    ));
                }
                out.put_slice(NAL_START_CODE);
                out.put_slice(payload);
            }
            NAL_TYPE_STAP_A => self.push_stap_a(&payload[1..], out)?,
            NAL_TYPE_FU_A => self.push_fu_a(header, payload, out)?,
            _ => {
                return Err(RtspcError::Depacketization(format!(
                    "unsupported H.264 packetization type {}",
                    nal_type
                )));
            }
        }

        Ok(())
    }

    /// STAP-A aggregates NAL units as (u16 size, NALU) pairs.
    fn push_stap_a(&mut self, mut data: &[u8], out: &mut BytesMut) -> Result<()> {
        while !data.is_empty() {
            if data.len() < 2 {
                return Err(RtspcError::Depacketization("truncated STAP-A header".into()));
            }
            let size = u16::from_be_bytes([data[0], data[1]]) as usize;
            data = &data[2..];
            if size == 0 || size > data.len() {
                return Err(RtspcError::Depacketization("bad STAP-A unit size".into()));
            }
            out.put_slice(NAL_START_CODE);
            out.put_slice(&data[..size]);
            data = &data[size..];
        }
        Ok(())
    }

    fn push_fu_a(&mut self, fu_indicator: u8, payload: &[u8], out: &mut BytesMut) -> Result<()> {
        if payload.len() < 2 {
            return Err(RtspcError::Depacketization("truncated FU-A payload".into()));
        }

        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        // Original one-byte NAL header: F and NRI from the indicator, type
        // from the FU header.
        let nal_header = (fu_indicator & 0xe0) | (fu_header & 0x1f);

        if start {
            let mut buf = BytesMut::with_capacity(payload.len() - 1);
            buf.put_u8(nal_header);
            buf.put_slice(&payload[2..]);
            self.fua = Some(buf);
        } else {
            match self.fua.as_mut() {
                Some(buf) => buf.put_slice(&payload[2..]),
                None => {
                    return Err(RtspcError::Depacketization(
                        "FU-A continuation without a start fragment".into(),
                    ));
                }
            }
        }

        if end {
            let buf = self.fua.take().ok_or_else(|| {
                RtspcError::Depacketization("FU-A end without a start fragment".into())
            })?;
            out.put_slice(NAL_START_CODE);
            out.put_slice(&buf);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fu_a(nri: u8, nal_type: u8, start: bool, end: bool, data: &[u8]) -> Bytes {
        let indicator = (nri << 5) | NAL_TYPE_FU_A;
        let mut header = nal_type;
        if start {
            header |= 0x80;
        }
        if end {
            header |= 0x40;
        }
        let mut p = vec![indicator, header];
        p.extend_from_slice(data);
        Bytes::from(p)
    }

    #[test]
    fn test_single_nal() {
        let mut d = H264Depacketizer::new();
        let nalu = Bytes::from_static(&[0x65, 0xaa, 0xbb]);
        let out = d.depacketize(&[nalu]).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x65, 0xaa, 0xbb]);
    }

    #[test]
    fn test_fu_a_reassembly() {
        let mut d = H264Depacketizer::new();
        let payloads = [
            fu_a(3, 5, true, false, &[0x11, 0x22]),
            fu_a(3, 5, false, false, &[0x33]),
            fu_a(3, 5, false, true, &[0x44]),
        ];
        let out = d.depacketize(&payloads).unwrap();
        // Reconstructed header: NRI=3, type=5 => 0x65
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x65, 0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_stap_a() {
        let mut d = H264Depacketizer::new();
        let payload = Bytes::from(vec![
            NAL_TYPE_STAP_A,
            0x00, 0x02, 0x67, 0x42, // SPS, 2 bytes
            0x00, 0x01, 0x68, // PPS, 1 byte
        ]);
        let out = d.depacketize(&[payload]).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68]);
    }

    #[test]
    fn test_unfinished_fu_a_fails() {
        let mut d = H264Depacketizer::new();
        let payloads = [fu_a(3, 1, true, false, &[0x11])];
        assert!(d.depacketize(&payloads).is_err());
        // State is cleared; the next complete unit still works.
        let out = d.depacketize(&[Bytes::from_static(&[0x41, 0x99])]).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x41, 0x99]);
    }

    #[test]
    fn test_continuation_without_start_fails() {
        let mut d = H264Depacketizer::new();
        assert!(d.depacketize(&[fu_a(3, 1, false, true, &[0x11])]).is_err());
    }
}
