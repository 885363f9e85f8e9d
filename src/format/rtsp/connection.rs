use crate::error::RtspcError;
use crate::Result;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default RTSP port, used when the URL carries none.
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// The signalling TCP connection. Before PLAY the negotiator owns it and
/// reads with explicit timeouts; after PLAY the poll step owns it and reads
/// without blocking.
#[derive(Debug)]
pub struct RtspConnection {
    stream: TcpStream,
}

impl RtspConnection {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RtspcError::Connection(format!("connect to {} timed out", addr)))?
            .map_err(|e| RtspcError::Connection(format!("connect to {} failed: {}", addr, e)))?;

        stream.set_nodelay(true)?;

        Ok(Self { stream })
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Blocking read with a receive timeout, for the pre-PLAY handshake.
    pub async fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let read = tokio::time::timeout(timeout, self.stream.read(buf))
            .await
            .map_err(|_| RtspcError::Connection("receive timed out".into()))??;

        if read == 0 {
            return Err(RtspcError::Connection("connection closed by peer".into()));
        }
        Ok(read)
    }

    /// Non-blocking read for the steady-state poll step. `Ok(None)` means
    /// no bytes were available; try again on the next scheduled invocation.
    pub fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.stream.try_read(buf) {
            Ok(0) => Err(RtspcError::Connection("connection closed by peer".into())),
            Ok(n) => Ok(Some(n)),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
