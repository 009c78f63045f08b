//! Provisioning Service
//!
//! The end-to-end flows: allocate-and-create (or reissue) a profile
//! in the store, then reconcile the router's peer table against it.
//! A reconciliation failure never rolls back the committed profile -
//! the user still gets a working config, the failure is audited, and
//! a later reconciliation run repairs the router.

use crate::audit::AuditSink;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use wgprov_profiles::{
    CredentialGenerator, Ipv4Cidr, Profile, ProfileStore, StoreError, DEFAULT_ALLOCATION_RETRIES,
};
use wgprov_router::{
    PeerAction, PeerReconciler, PeerSpec, RemoteClientError, RouterApi,
};

/// Result of a provisioning or reissue request.
///
/// `peer_synced == false` means the profile is committed and usable
/// but the router was not updated; the audit trail carries the error.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub profile: Profile,
    pub action: Option<PeerAction>,
    pub peer_synced: bool,
}

/// Service errors; reconciliation failures are not errors here
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// Ties the store, credential generator and peer reconciler together
pub struct ProvisioningService<C> {
    store: Arc<ProfileStore>,
    generator: CredentialGenerator,
    reconciler: PeerReconciler<C>,
    audit: Arc<dyn AuditSink>,
    cidr: Ipv4Cidr,
}

impl<C: RouterApi> ProvisioningService<C> {
    /// Assemble the service. The address pool comes from the
    /// generator's server settings.
    pub fn new(
        store: Arc<ProfileStore>,
        generator: CredentialGenerator,
        reconciler: PeerReconciler<C>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let cidr = generator.config().network_cidr;
        Self {
            store,
            generator,
            reconciler,
            audit,
            cidr,
        }
    }

    /// Issue a profile for the user (idempotent), then sync the router
    pub async fn provision(
        &self,
        user_id: i64,
        telegram_id: i64,
    ) -> Result<ProvisionOutcome, ServiceError> {
        let store = Arc::clone(&self.store);
        let builder = self.generator.clone();
        let cidr = self.cidr;

        let profile = tokio::task::spawn_blocking(move || {
            store.allocate_and_create(
                user_id,
                telegram_id,
                &cidr,
                &builder,
                DEFAULT_ALLOCATION_RETRIES,
            )
        })
        .await
        .map_err(|e| ServiceError::Task(e.to_string()))??;

        self.audit.record(
            "profile_issued",
            json!({
                "profile_id": profile.id,
                "ip_address": profile.ip_address.to_string(),
            }),
            Some(user_id),
        );

        Ok(self.sync_peer(profile).await)
    }

    /// Rotate the user's key material in place, then sync the router
    pub async fn reissue(
        &self,
        user_id: i64,
        telegram_id: i64,
    ) -> Result<ProvisionOutcome, ServiceError> {
        let store = Arc::clone(&self.store);
        let builder = self.generator.clone();

        let profile = tokio::task::spawn_blocking(move || {
            store.reissue_for_user(user_id, telegram_id, &builder)
        })
        .await
        .map_err(|e| ServiceError::Task(e.to_string()))??;

        self.audit.record(
            "profile_reissued",
            json!({
                "profile_id": profile.id,
                "ip_address": profile.ip_address.to_string(),
            }),
            Some(user_id),
        );

        Ok(self.sync_peer(profile).await)
    }

    /// Re-run reconciliation for an already-issued profile
    pub async fn resync(&self, profile: Profile) -> ProvisionOutcome {
        self.sync_peer(profile).await
    }

    /// Router health check via the device identity endpoint
    pub async fn router_check(&self) -> Result<String, RemoteClientError> {
        let result = self.reconciler.client().identity().await;
        match &result {
            Ok(name) => self.audit.record("router_check", json!({"identity": name}), None),
            Err(err) => self.audit.record(
                "router_check_failed",
                json!({"error": err.to_string()}),
                None,
            ),
        }
        result
    }

    async fn sync_peer(&self, profile: Profile) -> ProvisionOutcome {
        let spec = PeerSpec {
            subject_id: profile.telegram_id,
            profile_id: profile.id,
            public_key: profile.public_key.clone(),
            address: profile.ip_address.to_string(),
            preshared_key: Some(profile.preshared_key.clone()),
            remote_peer_id: profile.remote_peer_id.clone(),
        };

        match self.reconciler.ensure_peer(&spec).await {
            Ok(outcome) => {
                let mut profile = profile;
                if outcome.peer_id != profile.remote_peer_id {
                    if let Err(err) = self
                        .attach_peer(profile.id, outcome.peer_id.clone())
                        .await
                    {
                        warn!(profile_id = profile.id, error = %err, "Failed to record peer id");
                    } else {
                        profile.remote_peer_id = outcome.peer_id.clone();
                    }
                }

                self.audit.record(
                    "peer_reconciled",
                    json!({
                        "profile_id": profile.id,
                        "action": outcome.action.as_str(),
                        "peer_id": outcome.peer_id,
                    }),
                    Some(profile.user_id),
                );

                ProvisionOutcome {
                    action: Some(outcome.action),
                    peer_synced: true,
                    profile,
                }
            }
            Err(err) => {
                warn!(profile_id = profile.id, error = %err, "Peer reconciliation failed");
                self.audit.record(
                    "peer_sync_failed",
                    json!({
                        "profile_id": profile.id,
                        "error": err.to_string(),
                    }),
                    Some(profile.user_id),
                );

                ProvisionOutcome {
                    action: None,
                    peer_synced: false,
                    profile,
                }
            }
        }
    }

    async fn attach_peer(
        &self,
        profile_id: i64,
        peer_id: Option<String>,
    ) -> Result<(), ServiceError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            store.attach_remote_peer(profile_id, peer_id.as_deref())
        })
        .await
        .map_err(|e| ServiceError::Task(e.to_string()))??;
        Ok(())
    }
}
