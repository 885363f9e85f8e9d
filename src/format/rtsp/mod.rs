mod connection;
mod demuxer;
pub mod message;
mod sdp;
mod stream;
mod subscription;

pub use connection::{RtspConnection, DEFAULT_RTSP_PORT};
pub use demuxer::{InterleavedData, RtspDemuxer};
pub use message::{Method, RtspMessage, RtspRequest, RtspResponse, SessionHeader};
pub use sdp::{MediaDescription, Rtpmap, SessionDescription};
pub use stream::{ProcessMediaResult, RtspcStream, StartupMetrics, State, StreamConfig};
pub use subscription::ResponseSubscriptions;
