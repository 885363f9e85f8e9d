//! RTSP message building and parsing for the request subset the engine
//! speaks: DESCRIBE, SETUP, PLAY, TEARDOWN.

use crate::error::RtspcError;
use crate::Result;
use bytes::Bytes;

pub const RTSP_VERSION: &str = "RTSP/1.0";
pub const USER_AGENT: &str = concat!("rtspc/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Describe,
    Setup,
    Play,
    Teardown,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Teardown => "TEARDOWN",
        }
    }
}

/// An outgoing request. CSeq and User-Agent are always written; other
/// headers are added per request.
#[derive(Debug, Clone)]
pub struct RtspRequest {
    method: Method,
    uri: String,
    cseq: u32,
    headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: Method, cseq: u32, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            cseq,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut request = format!("{} {} {}\r\n", self.method.as_str(), self.uri, RTSP_VERSION);
        request.push_str(&format!("CSeq: {}\r\n", self.cseq));
        request.push_str(&format!("User-Agent: {}\r\n", USER_AGENT));
        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("\r\n");
        Bytes::from(request)
    }
}

/// A parsed response: status line, headers, `Content-Length`-bounded body.
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RtspResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").and_then(|v| v.trim().parse().ok())
    }
}

/// `Session` response header value: `session-id[;timeout=delta-seconds]`.
/// The timeout is parsed but currently unused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub id: String,
    pub timeout: Option<u64>,
}

impl SessionHeader {
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = value.splitn(2, ';');
        let id = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RtspcError::Protocol("empty Session header".into()))?;

        let timeout = parts.next().and_then(|rest| {
            rest.trim()
                .strip_prefix("timeout=")
                .and_then(|t| t.trim().parse().ok())
        });

        Ok(Self {
            id: id.to_string(),
            timeout,
        })
    }
}

/// Any full RTSP text message decoded off the wire.
#[derive(Debug, Clone)]
pub enum RtspMessage {
    /// Server-initiated request; method kept as received
    Request {
        method: String,
        uri: String,
        headers: Vec<(String, String)>,
    },
    Response(RtspResponse),
}

impl RtspMessage {
    /// Parses a message from its header block (status/request line plus
    /// header lines, without the blank-line terminator) and body.
    pub fn parse(head: &str, body: Bytes) -> Result<Self> {
        let mut lines = head.lines();
        let start_line = lines
            .next()
            .ok_or_else(|| RtspcError::Protocol("empty RTSP message".into()))?;

        let headers = parse_headers(lines)?;

        if let Some(rest) = start_line.strip_prefix("RTSP/") {
            // Status line: RTSP/1.0 <code> <reason>
            let mut parts = rest.splitn(3, ' ');
            let _version = parts.next();
            let status = parts
                .next()
                .and_then(|code| code.parse::<u16>().ok())
                .ok_or_else(|| RtspcError::Protocol("invalid response status".into()))?;
            let reason = parts.next().unwrap_or("").trim().to_string();

            Ok(Self::Response(RtspResponse {
                status,
                reason,
                headers,
                body,
            }))
        } else {
            // Request line: <method> <uri> RTSP/1.0
            let mut parts = start_line.split_whitespace();
            let method = parts
                .next()
                .ok_or_else(|| RtspcError::Protocol("missing request method".into()))?
                .to_string();
            let uri = parts
                .next()
                .ok_or_else(|| RtspcError::Protocol("missing request uri".into()))?
                .to_string();

            Ok(Self::Request {
                method,
                uri,
                headers,
            })
        }
    }

    pub fn cseq(&self) -> Option<u32> {
        let headers = match self {
            Self::Request { headers, .. } => headers,
            Self::Response(response) => return response.cseq(),
        };
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("CSeq"))
            .and_then(|(_, v)| v.trim().parse().ok())
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RtspcError::Protocol(format!("malformed header line: {}", line)))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_serialization() {
        let request = RtspRequest::new(Method::Describe, 7, "rtsp://example.com/stream")
            .header("Accept", "application/sdp");
        let text = String::from_utf8(request.to_bytes().to_vec()).unwrap();

        assert!(text.starts_with("DESCRIBE rtsp://example.com/stream RTSP/1.0\r\n"));
        assert!(text.contains("CSeq: 7\r\n"));
        assert!(text.contains(&format!("User-Agent: {}\r\n", USER_AGENT)));
        assert!(text.contains("Accept: application/sdp\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_response_parse() {
        let head = "RTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Base: rtsp://example.com/stream/\r\nSession: 12345;timeout=60";
        let message = RtspMessage::parse(head, Bytes::from_static(b"v=0")).unwrap();
        let response = match message {
            RtspMessage::Response(r) => r,
            _ => panic!("expected response"),
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.cseq(), Some(3));
        assert_eq!(response.header("content-base"), Some("rtsp://example.com/stream/"));
        assert_eq!(&response.body[..], b"v=0");
    }

    #[test]
    fn test_server_request_parse() {
        let head = "OPTIONS rtsp://example.com/stream RTSP/1.0\r\nCSeq: 1";
        let message = RtspMessage::parse(head, Bytes::new()).unwrap();
        match message {
            RtspMessage::Request { method, uri, .. } => {
                assert_eq!(method, "OPTIONS");
                assert_eq!(uri, "rtsp://example.com/stream");
            }
            _ => panic!("expected request"),
        }
        assert_eq!(message_cseq(head), Some(1));
    }

    fn message_cseq(head: &str) -> Option<u32> {
        RtspMessage::parse(head, Bytes::new()).ok()?.cseq()
    }

    #[test]
    fn test_session_header_parse() {
        let session = SessionHeader::parse("ABCD1234;timeout=60").unwrap();
        assert_eq!(session.id, "ABCD1234");
        assert_eq!(session.timeout, Some(60));

        let bare = SessionHeader::parse("ABCD1234").unwrap();
        assert_eq!(bare.id, "ABCD1234");
        assert_eq!(bare.timeout, None);

        assert!(SessionHeader::parse("").is_err());
    }

    #[test]
    fn test_invalid_status_line() {
        assert!(RtspMessage::parse("RTSP/1.0 abc invalid", Bytes::new()).is_err());
    }
}
