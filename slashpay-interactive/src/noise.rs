//! Noise-encrypted channels.
//!
//! A payee listens with a static X25519 keypair whose public half is the
//! [`PeerAddress`] it publishes. Payers run the `NK` handshake against that
//! key: only the holder of the secret can answer it, so a completed handshake
//! proves the payer reached the payee it resolved. The payer stays anonymous.
//!
//! After the handshake every message is sealed into one frame of the
//! underlying [`FramedChannel`]. Messages larger than a single Noise message
//! are sealed in consecutive chunks inside that frame.

use crate::channel::{FramedChannel, SecureChannel, MAX_MESSAGE_SIZE};
use crate::{InteractiveError, Result};
use async_trait::async_trait;
use slashpay_lib::{PeerAddress, PublicKey};
use snow::params::NoiseParams;
use snow::{Builder, HandshakeState, TransportState};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Handshake pattern and primitives.
pub const NOISE_PARAMS: &str = "Noise_NK_25519_ChaChaPoly_BLAKE2s";

/// Largest Noise message, ciphertext included.
const MAX_NOISE_MESSAGE: usize = 65_535;
/// ChaChaPoly authentication tag.
const TAG_LEN: usize = 16;
/// Largest plaintext sealed into one Noise message.
const MAX_CHUNK: usize = MAX_NOISE_MESSAGE - TAG_LEN;

/// Static X25519 keypair a payee listens with.
#[derive(Clone)]
pub struct NoiseKeypair {
    secret: [u8; 32],
    public: PublicKey,
}

impl NoiseKeypair {
    /// A fresh random keypair.
    pub fn generate() -> Self {
        Self::from_secret(rand::random())
    }

    /// Rebuild a keypair from its stored secret.
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let public = x25519_dalek::x25519(secret, x25519_dalek::X25519_BASEPOINT_BYTES);
        Self {
            secret,
            public: PublicKey::from_bytes(public),
        }
    }

    /// The secret, for persistence.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    /// Address payers connect to.
    pub fn peer_address(&self) -> PeerAddress {
        PeerAddress(self.public)
    }
}

impl fmt::Debug for NoiseKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseKeypair")
            .field("public", &self.public.to_hex())
            .finish_non_exhaustive()
    }
}

fn noise_error(e: snow::Error) -> InteractiveError {
    InteractiveError::Crypto(e.to_string())
}

fn params() -> Result<NoiseParams> {
    NOISE_PARAMS.parse().map_err(noise_error)
}

/// A [`SecureChannel`] that encrypts every message with Noise.
pub struct NoiseChannel<S> {
    inner: FramedChannel<S>,
    transport: TransportState,
}

impl<S> NoiseChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Payer side: handshake with the payee listening as `payee`.
    ///
    /// Fails unless the peer holds the secret behind `payee`.
    pub async fn connect(mut inner: FramedChannel<S>, payee: &PeerAddress) -> Result<Self> {
        let mut handshake = Builder::new(params()?)
            .remote_public_key(payee.public_key().as_bytes())
            .build_initiator()
            .map_err(noise_error)?;
        let mut buf = vec![0u8; MAX_NOISE_MESSAGE];

        let len = handshake.write_message(&[], &mut buf).map_err(noise_error)?;
        inner.send(&buf[..len]).await?;

        let reply = inner.recv().await?.ok_or_else(|| {
            InteractiveError::Transport("payee closed the channel during the handshake".into())
        })?;
        handshake.read_message(&reply, &mut buf).map_err(|e| {
            InteractiveError::Crypto(format!(
                "peer did not prove key {}: {}",
                payee.public_key().to_hex(),
                e
            ))
        })?;

        debug!("Noise handshake with {} complete", payee.public_key().to_hex());
        Self::finish(inner, handshake)
    }

    /// Payee side: answer a payer's handshake with `keypair`.
    pub async fn accept(mut inner: FramedChannel<S>, keypair: &NoiseKeypair) -> Result<Self> {
        let mut handshake = Builder::new(params()?)
            .local_private_key(keypair.secret_bytes())
            .build_responder()
            .map_err(noise_error)?;
        let mut buf = vec![0u8; MAX_NOISE_MESSAGE];

        let hello = inner.recv().await?.ok_or_else(|| {
            InteractiveError::Transport("payer closed the channel during the handshake".into())
        })?;
        handshake.read_message(&hello, &mut buf).map_err(noise_error)?;

        let len = handshake.write_message(&[], &mut buf).map_err(noise_error)?;
        inner.send(&buf[..len]).await?;

        Self::finish(inner, handshake)
    }

    fn finish(inner: FramedChannel<S>, handshake: HandshakeState) -> Result<Self> {
        let transport = handshake.into_transport_mode().map_err(noise_error)?;
        Ok(Self { inner, transport })
    }
}

#[async_trait]
impl<S> SecureChannel for NoiseChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &[u8]) -> Result<()> {
        // An empty message is still sealed once so the peer can authenticate it.
        let chunks: Vec<&[u8]> = if message.is_empty() {
            vec![message]
        } else {
            message.chunks(MAX_CHUNK).collect()
        };
        let sealed_len = message.len() + chunks.len() * TAG_LEN;
        if sealed_len > MAX_MESSAGE_SIZE {
            return Err(InteractiveError::Transport(format!(
                "Message too large: {} bytes (max {})",
                sealed_len, MAX_MESSAGE_SIZE
            )));
        }

        let mut frame = Vec::with_capacity(sealed_len);
        let mut buf = vec![0u8; MAX_NOISE_MESSAGE];
        for chunk in chunks {
            let len = self
                .transport
                .write_message(chunk, &mut buf)
                .map_err(noise_error)?;
            frame.extend_from_slice(&buf[..len]);
        }
        self.inner.send(&frame).await
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(frame) = self.inner.recv().await? else {
            return Ok(None);
        };
        if frame.is_empty() {
            return Err(InteractiveError::Crypto("empty encrypted frame".into()));
        }

        let mut message = Vec::with_capacity(frame.len());
        let mut buf = vec![0u8; MAX_NOISE_MESSAGE];
        for chunk in frame.chunks(MAX_NOISE_MESSAGE) {
            let len = self
                .transport
                .read_message(chunk, &mut buf)
                .map_err(noise_error)?;
            message.extend_from_slice(&buf[..len]);
        }
        Ok(Some(message))
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn framed_pair() -> (FramedChannel<DuplexStream>, FramedChannel<DuplexStream>) {
        let (a, b) = tokio::io::duplex(256 * 1024);
        (FramedChannel::new(a), FramedChannel::new(b))
    }

    async fn handshake(
        payee: &NoiseKeypair,
        expected: &PeerAddress,
    ) -> (
        Result<NoiseChannel<DuplexStream>>,
        Result<NoiseChannel<DuplexStream>>,
    ) {
        let (payer_side, payee_side) = framed_pair();
        tokio::join!(
            NoiseChannel::connect(payer_side, expected),
            NoiseChannel::accept(payee_side, payee)
        )
    }

    #[test]
    fn keypair_is_rebuilt_from_secret() {
        let keypair = NoiseKeypair::generate();
        let restored = NoiseKeypair::from_secret(*keypair.secret_bytes());
        assert_eq!(restored.peer_address(), keypair.peer_address());
        assert_ne!(
            keypair.peer_address(),
            NoiseKeypair::generate().peer_address()
        );
        assert!(!format!("{:?}", keypair).contains(&hex_of(keypair.secret_bytes())));
    }

    fn hex_of(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let payee = NoiseKeypair::generate();
        let (payer, accepted) = handshake(&payee, &payee.peer_address()).await;
        let mut payer = payer.unwrap();
        let mut accepted = accepted.unwrap();

        payer.send(b"{\"amount\":10}").await.unwrap();
        assert_eq!(accepted.recv().await.unwrap().unwrap(), b"{\"amount\":10}");

        accepted.send(b"").await.unwrap();
        assert_eq!(payer.recv().await.unwrap().unwrap(), b"");

        accepted.close().await.unwrap();
        assert_eq!(payer.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn wrong_payee_key_fails_the_handshake() {
        let payee = NoiseKeypair::generate();
        let impostor = NoiseKeypair::generate();
        let (payer, accepted) = handshake(&impostor, &payee.peer_address()).await;
        assert!(payer.is_err());
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn large_messages_span_noise_chunks() {
        let payee = NoiseKeypair::generate();
        let (payer, accepted) = handshake(&payee, &payee.peer_address()).await;
        let mut payer = payer.unwrap();
        let mut accepted = accepted.unwrap();

        let message: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        payer.send(&message).await.unwrap();
        assert_eq!(accepted.recv().await.unwrap().unwrap(), message);
    }

    #[tokio::test]
    async fn frames_on_the_wire_are_sealed() {
        let payee = NoiseKeypair::generate();
        let (payer_io, relay_payer) = tokio::io::duplex(64 * 1024);
        let (relay_payee, payee_io) = tokio::io::duplex(64 * 1024);

        // Forwards the handshake and one message, keeping the message frame.
        let relay = tokio::spawn(async move {
            let mut from_payer = FramedChannel::new(relay_payer);
            let mut to_payee = FramedChannel::new(relay_payee);
            let hello = from_payer.recv().await.unwrap().unwrap();
            to_payee.send(&hello).await.unwrap();
            let reply = to_payee.recv().await.unwrap().unwrap();
            from_payer.send(&reply).await.unwrap();
            let sealed = from_payer.recv().await.unwrap().unwrap();
            to_payee.send(&sealed).await.unwrap();
            sealed
        });

        let payee_address = payee.peer_address();
        let (payer, accepted) = tokio::join!(
            NoiseChannel::connect(FramedChannel::new(payer_io), &payee_address),
            NoiseChannel::accept(FramedChannel::new(payee_io), &payee)
        );
        let mut payer = payer.unwrap();
        let mut accepted = accepted.unwrap();

        let plaintext = b"lnbcrt500n1invoice";
        payer.send(plaintext).await.unwrap();
        assert_eq!(accepted.recv().await.unwrap().unwrap(), plaintext);

        let sealed = relay.await.unwrap();
        assert_eq!(sealed.len(), plaintext.len() + TAG_LEN);
        assert!(!sealed
            .windows(plaintext.len())
            .any(|window| window == plaintext));
    }
}
