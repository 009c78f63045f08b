//! Peer Reconciler
//!
//! Makes the router's peer table match one local profile. The peer
//! comment carries the correlation key (subject id + profile id),
//! because the router-assigned id only exists after creation and can
//! change if a peer is recreated out of band.
//!
//! The procedure is idempotent: repeated calls with unchanged inputs
//! converge to [`PeerAction::Exists`] without further remote writes.

use crate::client::{NewPeer, PeerPatch, RemotePeer, RouterApi};
use crate::retry::RemoteClientError;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// What reconciliation did (or would have done)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAction {
    /// Peer was created on the router
    Created,
    /// An existing peer was brought in line with the profile
    Updated,
    /// Peer already matches the profile; nothing written
    Exists,
    /// Dry-run mode: a mutation was required but skipped
    DryRun,
}

impl PeerAction {
    /// Short name for logs and audit details
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerAction::Created => "created",
            PeerAction::Updated => "updated",
            PeerAction::Exists => "exists",
            PeerAction::DryRun => "dry_run",
        }
    }
}

/// Desired peer state for one profile
#[derive(Debug, Clone)]
pub struct PeerSpec {
    /// Stable external subject id (chat user)
    pub subject_id: i64,
    /// Local profile id
    pub profile_id: i64,
    /// Client public key (base64)
    pub public_key: String,
    /// Client tunnel address, plain dotted quad
    pub address: String,
    /// Preshared key; compared and pushed only when supplied
    pub preshared_key: Option<String>,
    /// Router peer id recorded on a previous run, if any. A reissued
    /// profile carries its predecessor's id so the old peer is updated
    /// in place instead of duplicated.
    pub remote_peer_id: Option<String>,
}

/// Reconciliation result
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub action: PeerAction,
    /// Router-assigned peer id, when one is known
    pub peer_id: Option<String>,
}

/// Reconciliation errors
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Invalid peer address '{0}'")]
    Validation(String),

    #[error(transparent)]
    Remote(#[from] RemoteClientError),
}

/// Idempotent profile-to-peer reconciler
pub struct PeerReconciler<C> {
    client: C,
    interface: String,
    dry_run: bool,
}

impl<C: RouterApi> PeerReconciler<C> {
    /// Create a reconciler for one WireGuard interface
    pub fn new(client: C, interface: impl Into<String>, dry_run: bool) -> Self {
        Self {
            client,
            interface: interface.into(),
            dry_run,
        }
    }

    /// The underlying router client (diagnostics)
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Correlation key stored in the peer comment
    pub fn comment_key(subject_id: i64, profile_id: i64) -> String {
        format!("wgprov:tg{subject_id}:cfg{profile_id}")
    }

    fn peer_name(subject_id: i64) -> String {
        format!("peer-tg{subject_id}")
    }

    /// Ensure the router has a peer matching `spec`.
    ///
    /// Lookup order: the comment correlation key, then the recorded
    /// peer id, then public key / allowed address alone. A peer
    /// matched only by the last is reported as [`PeerAction::Exists`]
    /// and left untouched - it was created out of band and this
    /// reconciler does not own it.
    pub async fn ensure_peer(&self, spec: &PeerSpec) -> Result<ReconcileOutcome, ReconcileError> {
        let address: Ipv4Addr = spec
            .address
            .parse()
            .map_err(|_| ReconcileError::Validation(spec.address.clone()))?;
        let allowed_address = format!("{address}/32");
        let comment = Self::comment_key(spec.subject_id, spec.profile_id);
        let name = Self::peer_name(spec.subject_id);

        let peers = self.client.list_peers(&self.interface).await?;

        if let Some(peer) = peers.iter().find(|p| p.comment.as_deref() == Some(&comment)) {
            return self
                .converge_existing(peer, spec, &allowed_address, &name, &comment)
                .await;
        }

        // After a reissue the comment still names the retired profile;
        // the recorded peer id finds it, and the update repairs the key.
        if let Some(known) = &spec.remote_peer_id {
            if let Some(peer) = peers.iter().find(|p| &p.id == known) {
                return self
                    .converge_existing(peer, spec, &allowed_address, &name, &comment)
                    .await;
            }
        }

        // Orphaned or manually-created peers that would collide
        if let Some(peer) = peers
            .iter()
            .find(|p| p.public_key == spec.public_key || p.allowed_address == allowed_address)
        {
            info!(
                peer_id = %peer.id,
                %allowed_address,
                "Unmanaged peer collides with profile, leaving as-is"
            );
            return Ok(ReconcileOutcome {
                action: PeerAction::Exists,
                peer_id: Some(peer.id.clone()),
            });
        }

        if self.dry_run {
            debug!(%comment, "Dry run: would create peer");
            return Ok(ReconcileOutcome {
                action: PeerAction::DryRun,
                peer_id: None,
            });
        }

        self.client
            .add_peer(&NewPeer {
                interface: self.interface.clone(),
                name,
                public_key: spec.public_key.clone(),
                allowed_address: allowed_address.clone(),
                preshared_key: spec.preshared_key.clone(),
                comment: comment.clone(),
            })
            .await?;

        // The router assigns the id at creation; fetch it back
        let peers = self.client.list_peers(&self.interface).await?;
        let peer_id = peers
            .iter()
            .find(|p| p.comment.as_deref() == Some(&comment))
            .map(|p| p.id.clone());

        info!(subject_id = spec.subject_id, profile_id = spec.profile_id, ?peer_id, "Peer created");

        Ok(ReconcileOutcome {
            action: PeerAction::Created,
            peer_id,
        })
    }

    async fn converge_existing(
        &self,
        peer: &RemotePeer,
        spec: &PeerSpec,
        allowed_address: &str,
        name: &str,
        comment: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let psk_differs = match &spec.preshared_key {
            Some(psk) => peer.preshared_key.as_deref() != Some(psk.as_str()),
            None => false,
        };
        let differs = peer.allowed_address != allowed_address
            || peer.public_key != spec.public_key
            || peer.name.as_deref() != Some(name)
            || peer.comment.as_deref() != Some(comment)
            || psk_differs;

        if !differs {
            debug!(peer_id = %peer.id, "Peer already in sync");
            return Ok(ReconcileOutcome {
                action: PeerAction::Exists,
                peer_id: Some(peer.id.clone()),
            });
        }

        if self.dry_run {
            debug!(peer_id = %peer.id, "Dry run: would update peer");
            return Ok(ReconcileOutcome {
                action: PeerAction::DryRun,
                peer_id: Some(peer.id.clone()),
            });
        }

        self.client
            .update_peer(
                &peer.id,
                &PeerPatch {
                    name: Some(name.to_string()),
                    public_key: Some(spec.public_key.clone()),
                    allowed_address: Some(allowed_address.to_string()),
                    preshared_key: spec.preshared_key.clone(),
                    comment: Some(comment.to_string()),
                },
            )
            .await?;

        info!(peer_id = %peer.id, profile_id = spec.profile_id, "Peer updated");

        Ok(ReconcileOutcome {
            action: PeerAction::Updated,
            peer_id: Some(peer.id.clone()),
        })
    }
}
