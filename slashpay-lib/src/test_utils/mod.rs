//! Test utilities for Slashpay.
//!
//! - [`MockBackend`]: scriptable payment node with manual settlement
//! - [`MemoryDiscovery`]: in-memory discovery network with stale replicas
//! - fixtures for identifiers and service documents
//!
//! ## Usage
//!
//! ```rust,ignore
//! use slashpay_lib::test_utils::{MockBackend, MemoryDiscovery};
//!
//! let backend = MockBackend::new().with_channel("1", "03partner", 1000, 1);
//! let discovery = MemoryDiscovery::new();
//! ```

mod memory_discovery;
mod mock_backend;

pub use memory_discovery::MemoryDiscovery;
pub use mock_backend::MockBackend;

use crate::backend::BackendAdapter;
use crate::rate_limit::{BackendRateLimiter, RateLimitConfig};
use crate::{Identifier, PeerAddress, PublicKey};
use std::sync::Arc;

/// An adapter over `backend` with no rate limiting.
pub fn unlimited_adapter(backend: Arc<MockBackend>) -> BackendAdapter<Arc<MockBackend>> {
    BackendAdapter::new(
        backend,
        BackendRateLimiter::new_shared(RateLimitConfig::unlimited()),
    )
}

/// A random payee log key and its identifier string.
pub fn test_identifier() -> (PublicKey, String) {
    let key = PublicKey::random();
    (key, Identifier::new(key).to_string())
}

/// A random peer address.
pub fn test_peer() -> PeerAddress {
    PeerAddress(PublicKey::random())
}
