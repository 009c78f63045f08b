//! wgprov-router - RouterOS Peer Reconciliation
//!
//! Keeps a MikroTik router's WireGuard peer table consistent with the
//! locally issued profiles. Three layers:
//!
//! - [`RetryPolicy`]: bounded retries, per-attempt timeout, linear
//!   backoff - every remote call runs under it.
//! - [`RouterOsClient`]: thin REST client (hyper + rustls, basic auth)
//!   for list/add/update/remove peer and device identity.
//! - [`PeerReconciler`]: the idempotent create/update/no-op decision,
//!   correlated through the peer comment field.
//!
//! A reconciliation failure is always recoverable: re-running
//! [`PeerReconciler::ensure_peer`] against the same profile repairs
//! the remote state.

mod client;
mod config;
mod reconcile;
mod retry;

pub use client::{ClientError, NewPeer, PeerPatch, RemotePeer, RouterApi, RouterOsClient};
pub use config::RouterConfig;
pub use reconcile::{PeerAction, PeerReconciler, PeerSpec, ReconcileError, ReconcileOutcome};
pub use retry::{RemoteClientError, RetryPolicy};
