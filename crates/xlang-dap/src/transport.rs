use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, XlangAdapterError};
use crate::gateway::RemoteChannel;

/// Engine endpoint used when none is configured.
pub const DEFAULT_ENGINE_ADDRESS: &str = "127.0.0.1:3142";

/// Upper bound on a single response frame.
const MAX_FRAME_LEN: u32 = 32 * 1024 * 1024;

/// [`RemoteChannel`] over TCP. Each message is a little-endian `u32` length
/// followed by that many UTF-8 bytes.
#[derive(Debug)]
pub struct TcpChannel {
    address: String,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpChannel {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Default for TcpChannel {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_ADDRESS)
    }
}

#[async_trait]
impl RemoteChannel for TcpChannel {
    async fn connect(&self) -> Result<()> {
        let stream = TcpStream::connect(&self.address).await.map_err(|e| {
            XlangAdapterError::ConnectionFailed(format!("{}: {}", self.address, e))
        })?;
        stream
            .set_nodelay(true)
            .map_err(|e| XlangAdapterError::ConnectionFailed(e.to_string()))?;

        info!(address = %self.address, "Connected to remote engine");
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    /// The stream is only put back once a full reply has been read. An
    /// exchange that fails or is dropped halfway closes the connection, so a
    /// late reply can never be read as the answer to a later request.
    async fn send(&self, request: String) -> Result<String> {
        let mut stream = self.stream.lock().await.take().ok_or_else(|| {
            XlangAdapterError::ConnectionFailed(format!("not connected to {}", self.address))
        })?;

        write_frame(&mut stream, request.as_bytes()).await?;
        let response = read_frame(&mut stream).await?;
        debug!(bytes = response.len(), "Received response frame");
        *self.stream.lock().await = Some(stream);

        String::from_utf8(response).map_err(|e| XlangAdapterError::RemoteCall(e.to_string()))
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| XlangAdapterError::RemoteCall("request too large".to_string()))?;
    writer.write_u32_le(len).await.map_err(io_error)?;
    writer.write_all(payload).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader.read_u32_le().await.map_err(io_error)?;
    if len > MAX_FRAME_LEN {
        return Err(XlangAdapterError::RemoteCall(format!(
            "response frame of {len} bytes exceeds limit"
        )));
    }

    let mut buf = vec![0; len as usize];
    reader.read_exact(&mut buf).await.map_err(io_error)?;
    Ok(buf)
}

fn io_error(e: std::io::Error) -> XlangAdapterError {
    XlangAdapterError::RemoteCall(e.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;
    use crate::command::{ModuleHandle, Step};
    use crate::gateway::Gateway;

    #[tokio::test]
    async fn test_frames_round_trip_through_engine() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let engine = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_frame(&mut socket).await.unwrap();
            assert_eq!(request, b"import xdb\nreturn xdb.get_startline(7)");
            write_frame(&mut socket, b"3").await.unwrap();
        });

        let channel = TcpChannel::new(address);
        channel.connect().await.unwrap();
        let response = channel
            .send("import xdb\nreturn xdb.get_startline(7)".to_string())
            .await
            .unwrap();
        assert_eq!(response, "3");
        engine.await.unwrap();
    }

    #[tokio::test]
    async fn test_late_reply_is_not_taken_for_the_next_one() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let engine = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            read_frame(&mut first).await.unwrap();
            let (mut second, _) = listener.accept().await.unwrap();
            let _ = write_frame(&mut first, b"10").await;
            read_frame(&mut second).await.unwrap();
            write_frame(&mut second, b"20").await.unwrap();
        });

        let gateway = Gateway::new(TcpChannel::new(address))
            .with_timeout(Some(Duration::from_millis(100)));
        let step = Step {
            module: ModuleHandle::new("1"),
        };

        assert!(matches!(
            gateway.call(&step).await,
            Err(XlangAdapterError::RemoteTimeout(100))
        ));
        assert_eq!(gateway.call(&step).await.unwrap(), 20);
        engine.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_exchange_closes_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let engine = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_frame(&mut socket).await.unwrap();
            socket.write_u32_le(8).await.unwrap();
            socket.write_all(b"abc").await.unwrap();
        });

        let channel = TcpChannel::new(address);
        channel.connect().await.unwrap();
        assert!(matches!(
            channel.send("x".to_string()).await,
            Err(XlangAdapterError::RemoteCall(_))
        ));
        engine.await.unwrap();

        assert!(matches!(
            channel.send("y".to_string()).await,
            Err(XlangAdapterError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_send_without_connect_fails() {
        let channel = TcpChannel::new("127.0.0.1:1");
        assert!(matches!(
            channel.send("x".to_string()).await,
            Err(XlangAdapterError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32_le(MAX_FRAME_LEN + 1).await.unwrap();
        assert!(read_frame(&mut server).await.is_err());
    }
}
