use super::{BitstreamFormat, MediaType};
use bytes::Bytes;

/// One complete access unit, normalized for the downstream pipeline.
///
/// `pts` and `dts` always carry the same adjusted timestamp; the engine does
/// not reorder frames.
#[derive(Debug, Clone)]
pub struct Frame {
    pub track_id: u8,
    pub media_type: MediaType,
    pub data: Bytes,
    pub pts: u64,
    pub dts: u64,
    pub format: BitstreamFormat,
}

impl Frame {
    pub fn new(
        track_id: u8,
        media_type: MediaType,
        data: impl Into<Bytes>,
        timestamp: u64,
        format: BitstreamFormat,
    ) -> Self {
        Self {
            track_id,
            media_type,
            data: data.into(),
            pts: timestamp,
            dts: timestamp,
            format,
        }
    }
}
