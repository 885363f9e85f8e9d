#![doc(html_root_url = "https://docs.rs/rtspc/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # rtspc - Pull-mode RTSP client engine
//!
//! `rtspc` pulls media from an RTSP origin over a single TCP connection:
//! it negotiates tracks via SDP, requests TCP-interleaved transport, and
//! demultiplexes the shared byte stream into control replies and RTP/RTCP
//! data, emitting normalized, timestamped elementary-bitstream frames to a
//! downstream [`av::FrameSink`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtspc::av::{Frame, FrameSink, Track};
//! use rtspc::format::rtsp::{ProcessMediaResult, RtspcStream};
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl FrameSink for Printer {
//!     async fn on_track(&mut self, track: Track) {
//!         println!("track {} ({:?})", track.id, track.codec);
//!     }
//!     async fn on_frame(&mut self, frame: Frame) {
//!         println!("frame pts={} len={}", frame.pts, frame.data.len());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let urls = vec!["rtsp://example.com/stream".to_string()];
//!     let mut stream = RtspcStream::new(&urls, Box::new(Printer))?;
//!
//!     stream.start().await?;
//!     stream.play().await?;
//!
//!     // The surrounding framework schedules this step; TryAgain means
//!     // "no bytes right now, come back later".
//!     loop {
//!         match stream.process_media().await {
//!             ProcessMediaResult::Success | ProcessMediaResult::TryAgain => {
//!                 tokio::task::yield_now().await;
//!             }
//!             ProcessMediaResult::Failure => break,
//!         }
//!     }
//!
//!     stream.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: frames, tracks, codec ids, and the downstream sink trait
//! - `codec`: per-codec RTP depacketizers (H.264, VP8, Opus)
//! - `format`: the wire layer - RTSP messages and session, RTP assembly,
//!   RTCP recognition
//! - `error`: the error taxonomy shared across the crate

/// Frames, tracks and downstream collaborator traits
pub mod av;

/// Per-codec depacketizers
pub mod codec;

/// Error types and utilities
pub mod error;

/// Wire formats: RTSP, RTP, RTCP
pub mod format;

pub use error::{Result, RtspcError};
