//! End-to-end session tests against a scripted in-process RTSP server.

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rtspc::av::{CodecId, Frame, FrameSink, MediaType, Track};
use rtspc::format::rtsp::{ProcessMediaResult, RtspcStream, State, StreamConfig};
use rtspc::RtspcError;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const SDP_H264: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Mock\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=control:trackID=0\r\n\
a=rtpmap:96 H264/90000\r\n";

const SDP_H265: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Mock\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=control:trackID=0\r\n\
a=rtpmap:96 H265/90000\r\n";

#[derive(Clone, Default)]
struct RecordingSink {
    tracks: Arc<Mutex<Vec<Track>>>,
    frames: Arc<Mutex<Vec<Frame>>>,
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn on_track(&mut self, track: Track) {
        self.tracks.lock().push(track);
    }

    async fn on_frame(&mut self, frame: Frame) {
        self.frames.lock().push(frame);
    }
}

#[derive(Clone)]
struct ServerScript {
    sdp: String,
    with_session_header: bool,
    /// Interleaved blocks written right after the PLAY reply
    media: Vec<Vec<u8>>,
}

impl ServerScript {
    fn h264() -> Self {
        Self {
            sdp: SDP_H264.to_string(),
            with_session_header: true,
            media: Vec::new(),
        }
    }
}

/// One interleaved block carrying a single-NAL H.264 RTP packet.
fn interleaved_h264(seq: u16, timestamp: u32, nal: &[u8]) -> Vec<u8> {
    let mut rtp = vec![0x80, 0x80 | 96, (seq >> 8) as u8, seq as u8];
    rtp.extend_from_slice(&timestamp.to_be_bytes());
    rtp.extend_from_slice(&0xdead_beefu32.to_be_bytes());
    rtp.extend_from_slice(nal);

    let mut block = vec![b'$', 0];
    block.extend_from_slice(&(rtp.len() as u16).to_be_bytes());
    block.extend_from_slice(&rtp);
    block
}

async fn read_request(socket: &mut TcpStream, buf: &mut Vec<u8>) -> Option<(String, u32)> {
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).to_string();
            buf.drain(..pos + 4);
            let method = head.split_whitespace().next()?.to_string();
            let cseq = head
                .lines()
                .find_map(|l| l.strip_prefix("CSeq:"))?
                .trim()
                .parse()
                .ok()?;
            return Some((method, cseq));
        }
        let mut tmp = [0u8; 2048];
        match socket.read(&mut tmp).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    }
}

/// Accepts one client and answers its requests per the script. Records every
/// CSeq it sees.
async fn run_server(listener: TcpListener, script: ServerScript, cseq_log: Arc<Mutex<Vec<u32>>>) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let base = format!("rtsp://{}/live/", socket.local_addr().unwrap());
    let mut buf = Vec::new();

    while let Some((method, cseq)) = read_request(&mut socket, &mut buf).await {
        cseq_log.lock().push(cseq);

        let response = match method.as_str() {
            "DESCRIBE" => {
                let session = if script.with_session_header {
                    "Session: 1234ABCD;timeout=60\r\n"
                } else {
                    ""
                };
                format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {}\r\n{}Content-Base: {}\r\n\
                     Content-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
                    cseq,
                    session,
                    base,
                    script.sdp.len(),
                    script.sdp
                )
            }
            "SETUP" => format!(
                "RTSP/1.0 200 OK\r\nCSeq: {}\r\nSession: 1234ABCD\r\n\
                 Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
                cseq
            ),
            "PLAY" | "TEARDOWN" => {
                format!("RTSP/1.0 200 OK\r\nCSeq: {}\r\nSession: 1234ABCD\r\n\r\n", cseq)
            }
            _ => format!("RTSP/1.0 501 Not Implemented\r\nCSeq: {}\r\n\r\n", cseq),
        };

        socket.write_all(response.as_bytes()).await.unwrap();

        if method == "PLAY" {
            for block in &script.media {
                socket.write_all(block).await.unwrap();
            }
        }
        if method == "TEARDOWN" {
            break;
        }
    }
}

async fn start_mock(script: ServerScript) -> (String, Arc<Mutex<Vec<u32>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("rtsp://{}/live", listener.local_addr().unwrap());
    let cseq_log = Arc::new(Mutex::new(Vec::new()));
    tokio::spawn(run_server(listener, script, Arc::clone(&cseq_log)));
    (url, cseq_log)
}

#[tokio::test]
async fn test_full_session_delivers_frames() {
    let script = ServerScript {
        media: vec![
            interleaved_h264(1, 90_000, &[0x65, 0x01, 0x02]),
            interleaved_h264(2, 93_000, &[0x41, 0x03]),
        ],
        ..ServerScript::h264()
    };
    let (url, cseq_log) = start_mock(script).await;

    let sink = RecordingSink::default();
    let tracks = Arc::clone(&sink.tracks);
    let frames = Arc::clone(&sink.frames);
    let mut stream = RtspcStream::new(&[url], Box::new(sink)).unwrap();

    tokio::time::timeout(TEST_TIMEOUT, async {
        stream.start().await.unwrap();
        assert_eq!(stream.state(), State::Described);
        assert_eq!(stream.session_id(), Some("1234ABCD"));

        stream.play().await.unwrap();
        assert_eq!(stream.state(), State::Playing);

        while frames.lock().len() < 2 {
            match stream.process_media().await {
                ProcessMediaResult::Failure => panic!("media processing failed"),
                _ => tokio::task::yield_now().await,
            }
        }

        stream.stop().await.unwrap();
        assert_eq!(stream.state(), State::Stopped);
    })
    .await
    .expect("session did not finish in time");

    let tracks = tracks.lock();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].id, 96);
    assert_eq!(tracks[0].codec, CodecId::H264);
    assert_eq!(tracks[0].media_type, MediaType::Video);
    // Relative control joined with the Content-Base the server advertised
    assert!(tracks[0].control_url.ends_with("/live/trackID=0"));

    let frames = frames.lock();
    assert_eq!(frames[0].pts, 0);
    assert_eq!(&frames[0].data[..], &[0, 0, 0, 1, 0x65, 0x01, 0x02]);
    assert_eq!(frames[1].pts, 3000);
    assert_eq!(frames[1].dts, 3000);

    // DESCRIBE, SETUP, PLAY, TEARDOWN: one strictly increasing CSeq each
    let cseqs = cseq_log.lock();
    assert_eq!(cseqs.len(), 4);
    assert!(cseqs.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_missing_session_header_aborts_construction() {
    let script = ServerScript {
        with_session_header: false,
        ..ServerScript::h264()
    };
    let (url, _) = start_mock(script).await;

    let mut stream = RtspcStream::new(&[url], Box::new(RecordingSink::default())).unwrap();
    let result = tokio::time::timeout(TEST_TIMEOUT, stream.start())
        .await
        .unwrap();

    assert!(matches!(result, Err(RtspcError::Protocol(_))));
    assert_eq!(stream.state(), State::Error);
}

#[tokio::test]
async fn test_unsupported_video_codec_aborts_construction() {
    let script = ServerScript {
        sdp: SDP_H265.to_string(),
        ..ServerScript::h264()
    };
    let (url, _) = start_mock(script).await;

    let sink = RecordingSink::default();
    let tracks = Arc::clone(&sink.tracks);
    let mut stream = RtspcStream::new(&[url], Box::new(sink)).unwrap();
    let result = tokio::time::timeout(TEST_TIMEOUT, stream.start())
        .await
        .unwrap();

    assert!(matches!(result, Err(RtspcError::Sdp(_))));
    assert_eq!(stream.state(), State::Error);
    // Failed before any track was registered
    assert!(tracks.lock().is_empty());
}

#[tokio::test]
async fn test_audio_only_sdp_still_negotiates() {
    let script = ServerScript {
        sdp: "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=Mock\r\nt=0 0\r\n\
              m=audio 0 RTP/AVP 111\r\na=control:trackID=0\r\n\
              a=rtpmap:111 opus/48000/2\r\n"
            .to_string(),
        ..ServerScript::h264()
    };
    let (url, cseq_log) = start_mock(script).await;

    let sink = RecordingSink::default();
    let tracks = Arc::clone(&sink.tracks);
    let mut stream = RtspcStream::new(&[url], Box::new(sink)).unwrap();

    tokio::time::timeout(TEST_TIMEOUT, async {
        stream.start().await.unwrap();
        assert_eq!(stream.state(), State::Described);
        assert!(stream.tracks().is_empty());
        assert!(tracks.lock().is_empty());

        // With no tracks there is nothing to SETUP, but PLAY still goes out.
        stream.play().await.unwrap();
        assert_eq!(stream.state(), State::Playing);
    })
    .await
    .expect("session did not finish in time");

    // DESCRIBE and PLAY only; no SETUP was issued.
    assert_eq!(cseq_log.lock().len(), 2);
}

#[tokio::test]
async fn test_rtpmap_format_mismatch_is_rejected() {
    let script = ServerScript {
        sdp: "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=Mock\r\nt=0 0\r\n\
              m=video 0 RTP/AVP 96\r\na=control:trackID=0\r\n\
              a=rtpmap:97 H264/90000\r\n"
            .to_string(),
        ..ServerScript::h264()
    };
    let (url, _) = start_mock(script).await;

    let mut stream = RtspcStream::new(&[url], Box::new(RecordingSink::default())).unwrap();
    let result = tokio::time::timeout(TEST_TIMEOUT, stream.start())
        .await
        .unwrap();

    assert!(matches!(result, Err(RtspcError::Sdp(_))));
    assert_eq!(stream.state(), State::Error);
}

#[tokio::test]
async fn test_full_payload_type_range_sets_up() {
    // One video section per possible payload type; the channel pair counter
    // must walk past the 8-bit range without wrapping.
    let mut sdp = String::from("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=Mock\r\nt=0 0\r\n");
    for pt in 0u8..=127 {
        sdp.push_str(&format!(
            "m=video 0 RTP/AVP {pt}\r\na=control:trackID={pt}\r\na=rtpmap:{pt} H264/90000\r\n"
        ));
    }
    let script = ServerScript {
        sdp,
        ..ServerScript::h264()
    };
    let (url, cseq_log) = start_mock(script).await;

    let mut stream = RtspcStream::new(&[url], Box::new(RecordingSink::default())).unwrap();
    tokio::time::timeout(TEST_TIMEOUT, stream.start())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stream.state(), State::Described);
    assert_eq!(stream.tracks().len(), 128);
    // DESCRIBE plus one SETUP per track
    assert_eq!(cseq_log.lock().len(), 129);
}

#[tokio::test]
async fn test_silent_server_times_out() {
    // Accepts the connection but never answers anything.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("rtsp://{}/live", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let config = StreamConfig::default().with_response_timeout(Duration::from_millis(50));
    let mut stream =
        RtspcStream::with_config(&[url], Box::new(RecordingSink::default()), config).unwrap();
    let result = tokio::time::timeout(TEST_TIMEOUT, stream.start())
        .await
        .unwrap();

    assert!(matches!(result, Err(RtspcError::Connection(_))));
    assert_eq!(stream.state(), State::Error);
}

#[tokio::test]
async fn test_second_stop_performs_no_io() {
    let (url, cseq_log) = start_mock(ServerScript::h264()).await;

    let mut stream = RtspcStream::new(&[url], Box::new(RecordingSink::default())).unwrap();
    tokio::time::timeout(TEST_TIMEOUT, async {
        stream.start().await.unwrap();
        stream.play().await.unwrap();

        stream.stop().await.unwrap();
        assert_eq!(stream.state(), State::Stopped);
        let requests_after_first_stop = cseq_log.lock().len();

        stream.stop().await.unwrap();
        assert_eq!(stream.state(), State::Stopped);
        assert_eq!(cseq_log.lock().len(), requests_after_first_stop);
    })
    .await
    .expect("session did not finish in time");
}
