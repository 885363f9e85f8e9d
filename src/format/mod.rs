/// RTCP packet recognition
pub mod rtcp;

/// RTP packet parsing and access-unit assembly
pub mod rtp;

/// RTSP client protocol: messages, demuxer, session negotiation
pub mod rtsp;

pub use rtp::RtpPacket;
