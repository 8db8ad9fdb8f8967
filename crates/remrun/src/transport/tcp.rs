//! Length-prefixed framing over a TCP stream.
//!
//! Each message travels as `[Len: u32 LE][Message: Len]`.

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::ToSocketAddrs;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::transport;
use crate::transport::Transport;

pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    max_frame_len: usize,
}

impl TcpTransport {
    pub async fn connect(addr: impl ToSocketAddrs, max_frame_len: usize) -> transport::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream, max_frame_len))
    }

    /// Wraps an accepted or connected stream.
    pub fn from_stream(stream: TcpStream, max_frame_len: usize) -> Self {
        // Frames are small and latency bound.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "nodelay not set");
        }
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            max_frame_len,
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        if payload.len() > self.max_frame_len {
            return Err(transport::Error::FrameTooLarge(payload.len()));
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| transport::Error::FrameTooLarge(payload.len()))?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&len.to_le_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;

        let mut header = [0u8; 4];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(header) as usize;
        if len > self.max_frame_len {
            return Err(transport::Error::FrameTooLarge(len));
        }

        let mut frame = vec![0u8; len];
        reader
            .read_exact(&mut frame)
            .await
            .map_err(|e| transport::Error::ConnectionLost(e.to_string()))?;
        Ok(Some(frame))
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
