//! Incremental framer for the shared TCP stream.
//!
//! The server mixes two encodings on one connection: RTSP text messages
//! (terminated by a blank line, body bounded by `Content-Length`) and
//! interleaved binary blocks (`$`, channel id, big-endian u16 length,
//! payload). The demuxer splits them losslessly: a trailing partial frame is
//! kept across calls and bytes are only consumed as part of a decoded frame.

use super::message::RtspMessage;
use crate::error::RtspcError;
use crate::Result;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

const INTERLEAVED_MARKER: u8 = b'$';
const INTERLEAVED_HEADER_LEN: usize = 4;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// One interleaved binary block.
#[derive(Debug, Clone)]
pub struct InterleavedData {
    pub channel: u8,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
pub struct RtspDemuxer {
    buffer: BytesMut,
    messages: VecDeque<RtspMessage>,
    data_blocks: VecDeque<InterleavedData>,
}

impl RtspDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a run of received bytes and decodes every complete frame in
    /// the buffer. An unclassifiable leading byte is an unrecoverable parse
    /// error; the stream must be torn down.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);

        loop {
            let Some(&first) = self.buffer.first() else {
                return Ok(());
            };

            let progressed = if first == INTERLEAVED_MARKER {
                self.try_decode_data()?
            } else if first.is_ascii_uppercase() {
                self.try_decode_message()?
            } else {
                return Err(RtspcError::Protocol(format!(
                    "cannot classify stream byte 0x{:02x}",
                    first
                )));
            };

            if !progressed {
                // Partial frame; keep it for the next append.
                return Ok(());
            }
        }
    }

    pub fn has_message(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn pop_message(&mut self) -> Option<RtspMessage> {
        self.messages.pop_front()
    }

    pub fn has_data(&self) -> bool {
        !self.data_blocks.is_empty()
    }

    pub fn pop_data(&mut self) -> Option<InterleavedData> {
        self.data_blocks.pop_front()
    }

    fn try_decode_data(&mut self) -> Result<bool> {
        if self.buffer.len() < INTERLEAVED_HEADER_LEN {
            return Ok(false);
        }

        let channel = self.buffer[1];
        let length = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
        if self.buffer.len() < INTERLEAVED_HEADER_LEN + length {
            return Ok(false);
        }

        self.buffer.advance(INTERLEAVED_HEADER_LEN);
        let payload = self.buffer.split_to(length).freeze();
        self.data_blocks.push_back(InterleavedData { channel, payload });
        Ok(true)
    }

    fn try_decode_message(&mut self) -> Result<bool> {
        let Some(head_len) = find_terminator(&self.buffer) else {
            return Ok(false);
        };

        let head = std::str::from_utf8(&self.buffer[..head_len])
            .map_err(|_| RtspcError::Protocol("non-UTF8 RTSP message header".into()))?;

        let body_len = content_length(head)?;
        let total = head_len + HEADER_TERMINATOR.len() + body_len;
        if self.buffer.len() < total {
            return Ok(false);
        }

        let head = self.buffer.split_to(head_len);
        self.buffer.advance(HEADER_TERMINATOR.len());
        let body = self.buffer.split_to(body_len).freeze();

        // Validated as UTF-8 above
        let head = std::str::from_utf8(&head)
            .map_err(|_| RtspcError::Protocol("non-UTF8 RTSP message header".into()))?;

        let message = RtspMessage::parse(head, body)?;
        self.messages.push_back(message);
        Ok(true)
    }
}

/// Byte offset of the blank-line header terminator, if present.
fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

fn content_length(head: &str) -> Result<usize> {
    for line in head.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value
                    .trim()
                    .parse()
                    .map_err(|_| RtspcError::Protocol("invalid Content-Length".into()));
            }
        }
    }
    Ok(0)
}
