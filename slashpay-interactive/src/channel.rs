use crate::{InteractiveError, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16MB is far more than any payment message needs)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// An established, message-oriented connection to a peer.
///
/// Channels between hosts are [`NoiseChannel`](crate::NoiseChannel)s, which
/// encrypt every message and authenticate the payee.
#[async_trait]
pub trait SecureChannel: Send {
    /// Send one message.
    async fn send(&mut self, message: &[u8]) -> Result<()>;

    /// Receive the next message. `None` once the peer has closed the channel.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    /// Close our side of the channel.
    async fn close(&mut self) -> Result<()>;
}

/// Serialize `message` as JSON and send it.
pub async fn send_json<C, T>(channel: &mut C, message: &T) -> Result<()>
where
    C: SecureChannel + ?Sized,
    T: Serialize + Sync,
{
    let bytes = serde_json::to_vec(message)?;
    channel.send(&bytes).await
}

/// A [`SecureChannel`] over a byte stream, one message per frame.
///
/// Each frame is a 4-byte big-endian length followed by the payload. Frames
/// are sent as is; over a network, wrap the channel in a
/// [`NoiseChannel`](crate::NoiseChannel).
pub struct FramedChannel<S> {
    stream: S,
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(feature = "tcp-transport")]
impl FramedChannel<tokio::net::TcpStream> {
    /// Connect to a peer listening on `addr`.
    pub async fn connect(addr: std::net::SocketAddr) -> Result<Self> {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| InteractiveError::Transport(format!("Connect to {} failed: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| InteractiveError::Transport(format!("Socket setup failed: {}", e)))?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl<S> SecureChannel for FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &[u8]) -> Result<()> {
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(InteractiveError::Transport(format!(
                "Message too large: {} bytes (max {})",
                message.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let len = (message.len() as u32).to_be_bytes();
        self.stream
            .write_all(&len)
            .await
            .map_err(|e| InteractiveError::Transport(format!("Write failed: {}", e)))?;
        self.stream
            .write_all(message)
            .await
            .map_err(|e| InteractiveError::Transport(format!("Write failed: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| InteractiveError::Transport(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_bytes = [0u8; 4];
        match self.stream.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            // A clean close between frames.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(InteractiveError::Transport(format!("Read failed: {}", e))),
        }
        let len = u32::from_be_bytes(len_bytes) as usize;

        // Validate message length to prevent DoS via memory exhaustion
        if len > MAX_MESSAGE_SIZE {
            return Err(InteractiveError::Transport(format!(
                "Message too large: {} bytes (max {})",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut message = vec![0u8; len];
        self.stream
            .read_exact(&mut message)
            .await
            .map_err(|e| InteractiveError::Transport(format!("Read failed: {}", e)))?;

        Ok(Some(message))
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| InteractiveError::Transport(format!("Shutdown failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (
        FramedChannel<tokio::io::DuplexStream>,
        FramedChannel<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (FramedChannel::new(a), FramedChannel::new(b))
    }

    #[tokio::test]
    async fn frames_keep_message_boundaries() {
        let (mut a, mut b) = pair();
        a.send(b"first").await.unwrap();
        a.send(b"").await.unwrap();
        a.send(b"third").await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap(), b"first");
        assert_eq!(b.recv().await.unwrap().unwrap(), b"");
        assert_eq!(b.recv().await.unwrap().unwrap(), b"third");
    }

    #[tokio::test]
    async fn close_is_seen_as_end_of_stream() {
        let (mut a, mut b) = pair();
        a.send(b"bye").await.unwrap();
        a.close().await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap(), b"bye");
        assert!(b.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (a, mut b) = pair();
        let mut raw = a.into_inner();
        let len = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
        raw.write_all(&len).await.unwrap();

        let err = b.recv().await.unwrap_err();
        assert!(matches!(err, InteractiveError::Transport(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (a, mut b) = pair();
        let mut raw = a.into_inner();
        raw.write_all(&10u32.to_be_bytes()).await.unwrap();
        raw.write_all(b"short").await.unwrap();
        raw.shutdown().await.unwrap();

        assert!(b.recv().await.is_err());
    }

    #[tokio::test]
    async fn send_json_writes_one_frame() {
        let (mut a, mut b) = pair();
        send_json(&mut a, &serde_json::json!({"amount": 1}))
            .await
            .unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), br#"{"amount":1}"#);
    }
}
