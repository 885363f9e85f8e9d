//! SDP consumption.
//!
//! Only what negotiation needs: media sections with their type, payload
//! format, `control` attribute, and `rtpmap` codec/clock-rate declaration.

use crate::error::RtspcError;
use crate::Result;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub media_type: String,
    pub port: u16,
    pub protocol: String,
    /// First format token of the m= line, the declared payload type
    pub format: String,
    pub attributes: HashMap<String, String>,
}

/// Decoded `a=rtpmap:<pt> <encoding>/<clock-rate>[/...]` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rtpmap {
    pub payload_type: u8,
    pub encoding: String,
    pub clock_rate: u32,
}

impl MediaDescription {
    fn new(media_type: &str, port: u16, protocol: &str, format: &str) -> Self {
        Self {
            media_type: media_type.to_string(),
            port,
            protocol: protocol.to_string(),
            format: format.to_string(),
            attributes: HashMap::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&String> {
        self.attributes.get(name)
    }

    pub fn control(&self) -> Option<&str> {
        self.attribute("control").map(String::as_str).filter(|c| !c.is_empty())
    }

    pub fn payload_type(&self) -> Result<u8> {
        self.format
            .parse()
            .map_err(|_| RtspcError::Sdp(format!("invalid payload format '{}'", self.format)))
    }

    pub fn rtpmap(&self) -> Result<Rtpmap> {
        let value = self
            .attribute("rtpmap")
            .ok_or_else(|| RtspcError::Sdp("media section without rtpmap".into()))?;

        let (pt, mapping) = value
            .split_once(' ')
            .ok_or_else(|| RtspcError::Sdp(format!("malformed rtpmap '{}'", value)))?;
        let payload_type = pt
            .trim()
            .parse()
            .map_err(|_| RtspcError::Sdp(format!("invalid rtpmap payload type '{}'", pt)))?;

        let mut parts = mapping.trim().split('/');
        let encoding = parts
            .next()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| RtspcError::Sdp(format!("rtpmap without encoding '{}'", value)))?
            .to_string();
        let clock_rate = parts
            .next()
            .and_then(|r| r.trim().parse().ok())
            .ok_or_else(|| RtspcError::Sdp(format!("rtpmap without clock rate '{}'", value)))?;

        Ok(Rtpmap {
            payload_type,
            encoding,
            clock_rate,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    pub version: i32,
    pub origin: Option<String>,
    pub session_name: Option<String>,
    pub connection: Option<String>,
    pub attributes: HashMap<String, String>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    pub fn parse(content: &str) -> Result<Self> {
        let mut sdp = SessionDescription::default();
        let mut current_media: Option<MediaDescription> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Each line must be of the form <type>=<value>
            let (typ, value) = match line.split_once('=') {
                Some((t, v)) if t.len() == 1 => (t, v.trim()),
                _ => return Err(RtspcError::Sdp("invalid SDP line format".into())),
            };

            match (typ, current_media.as_mut()) {
                ("v", _) => sdp.version = i32::from_str(value)?,
                ("o", _) => sdp.origin = Some(value.to_string()),
                ("s", _) => sdp.session_name = Some(value.to_string()),
                ("c", _) => sdp.connection = Some(value.to_string()),
                ("m", _) => {
                    if let Some(media) = current_media.take() {
                        sdp.media.push(media);
                    }

                    // <media> <port> <proto> <fmt>
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() < 4 {
                        return Err(RtspcError::Sdp("invalid media description".into()));
                    }

                    let port = u16::from_str(parts[1])
                        .map_err(|_| RtspcError::Sdp("invalid media port".into()))?;
                    current_media = Some(MediaDescription::new(parts[0], port, parts[2], parts[3]));
                }
                ("a", target) => {
                    // Attribute is either a=<flag> or a=<name>:<value>
                    let (name, val) = match value.split_once(':') {
                        Some((n, v)) => (n.to_string(), v.to_string()),
                        None => (value.to_string(), String::new()),
                    };
                    match target {
                        Some(media) => media.attributes.insert(name, val),
                        None => sdp.attributes.insert(name, val),
                    };
                }
                _ => {} // Ignore unknown types
            }
        }

        if let Some(media) = current_media {
            sdp.media.push(media);
        }

        if sdp.media.is_empty() {
            return Err(RtspcError::Sdp("no media sections in SDP".into()));
        }

        Ok(sdp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SDP: &str = "\
v=0
o=- 123 456 IN IP4 127.0.0.1
s=Test Session
c=IN IP4 127.0.0.1
t=0 0
m=video 0 RTP/AVP 96
a=control:trackID=0
a=rtpmap:96 H264/90000
m=audio 0 RTP/AVP 111
a=control:trackID=1
a=rtpmap:111 opus/48000/2
";

    #[test]
    fn test_parse_media_sections() {
        let sdp = SessionDescription::parse(SDP).unwrap();
        assert_eq!(sdp.version, 0);
        assert_eq!(sdp.session_name, Some("Test Session".to_string()));
        assert_eq!(sdp.media.len(), 2);

        let video = &sdp.media[0];
        assert_eq!(video.media_type, "video");
        assert_eq!(video.payload_type().unwrap(), 96);
        assert_eq!(video.control(), Some("trackID=0"));
        assert_eq!(
            video.rtpmap().unwrap(),
            Rtpmap {
                payload_type: 96,
                encoding: "H264".to_string(),
                clock_rate: 90000,
            }
        );

        // Extra encoding parameters (channel count) are tolerated.
        let audio = &sdp.media[1];
        assert_eq!(audio.rtpmap().unwrap().clock_rate, 48000);
    }

    #[test]
    fn test_missing_rtpmap_is_an_error() {
        let sdp = SessionDescription::parse("v=0\nm=video 0 RTP/AVP 96\n").unwrap();
        assert!(sdp.media[0].rtpmap().is_err());
    }

    #[test]
    fn test_empty_sdp_is_an_error() {
        assert!(SessionDescription::parse("v=0\n").is_err());
    }

    #[test]
    fn test_empty_control_is_absent() {
        let sdp = SessionDescription::parse("v=0\nm=video 0 RTP/AVP 96\na=control\n").unwrap();
        assert_eq!(sdp.media[0].control(), None);
    }
}
