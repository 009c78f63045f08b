//! wgprov-profiles - Client Profile Provisioning
//!
//! Everything needed to issue a VPN client profile: X25519 key
//! material, IPv4 address allocation from a CIDR pool, AmneziaWG
//! config rendering, and the transactional SQLite store that keeps
//! the "one active profile per user, one per address" invariants.
//!
//! # Provisioning flow
//!
//! ```text
//! ┌───────────────┐    ┌────────────────┐    ┌───────────────┐
//! │ ProfileStore  │───▶│  pool::allocate │───▶│ next free IP  │
//! │ (transaction) │    └────────────────┘    └───────┬───────┘
//! │               │    ┌────────────────────┐        │
//! │               │───▶│ ProfileBuilder     │◀───────┘
//! │               │    │ (keys + config)    │
//! └───────┬───────┘    └────────────────────┘
//!         ▼
//!   active profile row (unique per user, unique per address)
//! ```
//!
//! Remote-router reconciliation lives in `wgprov-router`; this crate
//! never talks to the network.

mod config;
mod generator;
mod keys;
mod pool;
mod store;

pub use config::{ConfigError, ObfuscationConfig, WgConfig};
pub use generator::{CredentialGenerator, Credentials, ProfileBuilder, ProfileMaterial};
pub use keys::{KeyError, KeyPair, PresharedKey, PrivateKey, PublicKey};
pub use pool::{allocate, Ipv4Cidr, PoolError};
pub use store::{Profile, ProfileStore, StoreError, DEFAULT_ALLOCATION_RETRIES};
