//! Payee resolution.
//!
//! A payee publishes a [`ServiceDocument`] as the latest entry of a replicated
//! log keyed by its public key. Resolving an identifier means decoding the
//! key, syncing that log through the discovery network and reading the peer
//! address of the `SlashPay` service from the latest entry.
//!
//! The log and the discovery network are external collaborators, consumed
//! through [`ReplicatedLog`] and [`DiscoveryNetwork`].

mod local;

pub use local::LocalDiscovery;

use crate::{Identifier, PeerAddress, PublicKey, Result, ServiceDocument, SlashpayError};
use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// An append-only log replicated from its writer.
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Number of entries in the local replica.
    async fn len(&self) -> Result<u64>;

    /// Latest entry of the local replica.
    async fn latest(&self) -> Result<Option<Value>>;

    /// Append an entry. Only the log's writer may append.
    async fn append(&self, entry: Value) -> Result<()>;

    /// Pull the newest entries from connected peers.
    async fn update(&self) -> Result<()>;
}

/// How to take part in a discovery topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinMode {
    /// Announce ourselves so others can connect.
    pub server: bool,
    /// Look up and connect to others.
    pub client: bool,
}

impl JoinMode {
    /// Look up peers only.
    pub const CLIENT: Self = Self {
        server: false,
        client: true,
    };

    /// Announce only.
    pub const SERVER: Self = Self {
        server: true,
        client: false,
    };
}

/// Discovery substrate: opens logs and joins topics.
#[async_trait]
pub trait DiscoveryNetwork: Send + Sync {
    /// Open the local replica of the log written by `key`.
    async fn open_log(&self, key: &PublicKey) -> Result<Arc<dyn ReplicatedLog>>;

    /// Join `topic`. Settles once the initial peer lookup has finished.
    async fn join(&self, topic: &DiscoveryTopic, mode: JoinMode) -> Result<()>;
}

/// 32-byte topic under which replicas of a log find each other.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryTopic(pub [u8; 32]);

impl DiscoveryTopic {
    /// Keyed BLAKE2b-256 of `hypercore` under the log's public key.
    ///
    /// Anyone who knows the key can derive the topic, but the topic does not
    /// reveal the key.
    pub fn for_key(key: &PublicKey) -> Self {
        let mut bytes = [0u8; 32];
        // Keys up to 64 bytes are valid BLAKE2b MAC keys.
        if let Ok(mut mac) = Blake2bMac::<U32>::new_from_slice(key.as_bytes()) {
            mac.update(b"hypercore");
            bytes.copy_from_slice(&mac.finalize().into_bytes());
        }
        Self(bytes)
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for DiscoveryTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiscoveryTopic({})", self.to_hex())
    }
}

/// Resolver options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Skip network sync when the local replica already has entries.
    #[serde(default)]
    pub use_cache: bool,
    /// Give up after this long. `None` waits indefinitely.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl ResolverConfig {
    /// Allow answering from cached log data.
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Bound the whole resolution.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Turns identifiers into peer addresses.
///
/// Resolution is one-shot: the first failure is returned, nothing is retried.
pub struct Resolver<N> {
    network: N,
    config: ResolverConfig,
}

impl<N: DiscoveryNetwork> Resolver<N> {
    /// Create a resolver over `network`.
    pub fn new(network: N, config: ResolverConfig) -> Self {
        Self { network, config }
    }

    /// The active configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve an identifier string.
    ///
    /// Malformed identifiers fail before any network action.
    #[instrument(skip(self))]
    pub async fn resolve(&self, identifier: &str) -> Result<PeerAddress> {
        let identifier = Identifier::parse(identifier)?;
        self.resolve_identifier(&identifier).await
    }

    /// Resolve an already decoded identifier.
    pub async fn resolve_identifier(&self, identifier: &Identifier) -> Result<PeerAddress> {
        let lookup = self.resolve_key(identifier.public_key());
        match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, lookup)
                .await
                .map_err(|_| SlashpayError::timeout("resolution", limit))?,
            None => lookup.await,
        }
    }

    async fn resolve_key(&self, key: &PublicKey) -> Result<PeerAddress> {
        let log = self.network.open_log(key).await?;

        let cached = self.config.use_cache && log.len().await? > 0;
        if cached {
            debug!("Using cached log for {}", key);
        } else {
            self.network
                .join(&DiscoveryTopic::for_key(key), JoinMode::CLIENT)
                .await?;
            log.update().await?;
            if log.len().await? == 0 {
                return Err(SlashpayError::DocumentNotFound(key.to_hex()));
            }
        }

        let latest = log
            .latest()
            .await?
            .ok_or_else(|| SlashpayError::DocumentNotFound(key.to_hex()))?;
        // An entry that is not a service document has no payment service.
        let document: ServiceDocument = serde_json::from_value(latest)
            .map_err(|_| SlashpayError::NoPaymentService(key.to_hex()))?;
        let service = document
            .payment_service()
            .ok_or_else(|| SlashpayError::NoPaymentService(key.to_hex()))?;

        PeerAddress::from_endpoint(&service.service_endpoint)
    }
}

/// Publish a payment service for `peer` as the latest entry of the log
/// written by `log_key`, announcing the log on its discovery topic.
#[instrument(skip(network))]
pub async fn publish_service<N: DiscoveryNetwork + ?Sized>(
    network: &N,
    log_key: &PublicKey,
    peer: &PeerAddress,
) -> Result<()> {
    let log = network.open_log(log_key).await?;
    network
        .join(&DiscoveryTopic::for_key(log_key), JoinMode::SERVER)
        .await?;
    let document = serde_json::to_value(ServiceDocument::slashpay(peer))?;
    log.append(document).await?;
    debug!("Published payment service for {}", log_key);
    Ok(())
}
