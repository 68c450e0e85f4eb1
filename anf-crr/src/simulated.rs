//! In-process NetApp control plane.
//!
//! Behaves like the management API as far as the waits are concerned:
//! mutations are accepted immediately, but a created resource only becomes
//! visible to lookups after `latency`, a deleted one keeps being returned
//! for `latency`, and a replication needs `latency` to reach "Mirrored"
//! after authorization (and again to reach "Broken" after a break).
//!
//! Time is measured with `tokio::time::Instant`, so tests can drive the
//! simulation with a paused clock.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::client::{
    AnfClient, AuthorizeRequest, CapacityPool, CapacityPoolRequest, EndpointType, NetAppAccount,
    ReplicationStatus, ResourceReader, Snapshot, Volume, VolumeRequest,
};
use crate::error::{AnfError, Result};
use crate::resource_uri::{
    CAPACITY_POOLS, NETAPP_ACCOUNTS, NETAPP_PROVIDER, SNAPSHOTS, VOLUMES, build_path,
};

const SUCCEEDED: &str = "Succeeded";

#[derive(Clone, Debug)]
enum Resource {
    Account(NetAppAccount),
    Pool(CapacityPool),
    Volume(Volume),
    Snapshot(Snapshot),
}

struct Entry {
    resource: Resource,
    visible_at: Instant,
    gone_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.gone_at.is_none_or(|gone| now < gone)
    }

    fn is_visible(&self, now: Instant) -> bool {
        now >= self.visible_at && self.is_live(now)
    }

    /// Not deleted yet, whether or not lookups already see it.
    fn is_pending_or_live(&self) -> bool {
        self.gone_at.is_none()
    }
}

/// Replication relationship, keyed by its destination volume.
struct Replication {
    source_id: String,
    authorized_at: Instant,
    broken_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    resources: HashMap<String, Entry>,
    replications: HashMap<String, Replication>,
}

fn key(id: &str) -> String {
    id.to_ascii_lowercase()
}

impl State {
    fn visible(&self, id: &str, now: Instant) -> Result<Resource> {
        self.resources
            .get(&key(id))
            .filter(|e| e.is_visible(now))
            .map(|e| e.resource.clone())
            .ok_or_else(|| AnfError::NotFound(id.to_string()))
    }

    /// Entry that exists and has not been deleted. Used for mutations,
    /// which do not suffer the read delay.
    fn existing(&mut self, id: &str) -> Result<&mut Entry> {
        self.resources
            .get_mut(&key(id))
            .filter(|e| e.is_pending_or_live())
            .ok_or_else(|| AnfError::NotFound(id.to_string()))
    }

    fn has_children(&self, id: &str) -> bool {
        let prefix = format!("{}/", key(id));
        self.resources
            .iter()
            .any(|(k, e)| k.starts_with(&prefix) && e.is_pending_or_live())
    }

    fn has_replication(&self, volume_id: &str) -> bool {
        self.replications.contains_key(&key(volume_id))
            || self
                .replications
                .values()
                .any(|r| r.source_id.eq_ignore_ascii_case(volume_id))
    }

    /// Forget resources whose deletion has completed.
    fn prune(&mut self, now: Instant) {
        self.resources.retain(|_, e| e.is_live(now));
    }

    /// Create or update. Updating a live resource keeps its visibility.
    fn insert(&mut self, id: &str, resource: Resource, visible_at: Instant) {
        self.prune(Instant::now());
        let visible_at = match self.resources.get(&key(id)) {
            Some(existing) if existing.is_pending_or_live() => existing.visible_at,
            _ => visible_at,
        };
        self.resources.insert(
            key(id),
            Entry {
                resource,
                visible_at,
                gone_at: None,
            },
        );
    }

    /// Mark a resource deleted. Refused while it has nested resources or
    /// takes part in a replication.
    fn delete(&mut self, id: &str, gone_at: Instant) -> Result<()> {
        self.prune(Instant::now());
        if self.has_children(id) {
            return Err(AnfError::Conflict(format!(
                "{id} cannot be deleted while it has nested resources"
            )));
        }
        if self.has_replication(id) {
            return Err(AnfError::Conflict(format!(
                "{id} cannot be deleted while it has an active replication"
            )));
        }
        let entry = self.existing(id)?;
        entry.gone_at = Some(gone_at);
        Ok(())
    }
}

/// Simulated NetApp control plane for one subscription.
pub struct SimulatedAnf {
    subscription_id: String,
    latency: Duration,
    state: RwLock<State>,
}

impl SimulatedAnf {
    pub fn new(subscription_id: impl Into<String>, latency: Duration) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            latency,
            state: RwLock::new(State::default()),
        }
    }

    pub fn account_id(&self, resource_group: &str, account: &str) -> String {
        build_path(
            &self.subscription_id,
            resource_group,
            NETAPP_PROVIDER,
            &format!("{NETAPP_ACCOUNTS}/{account}"),
        )
    }

    pub fn pool_id(&self, resource_group: &str, account: &str, pool: &str) -> String {
        format!(
            "{}/{CAPACITY_POOLS}/{pool}",
            self.account_id(resource_group, account)
        )
    }

    pub fn volume_id(&self, resource_group: &str, account: &str, pool: &str, volume: &str) -> String {
        format!(
            "{}/{VOLUMES}/{volume}",
            self.pool_id(resource_group, account, pool)
        )
    }

    pub fn snapshot_id(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        snapshot: &str,
    ) -> String {
        format!(
            "{}/{SNAPSHOTS}/{snapshot}",
            self.volume_id(resource_group, account, pool, volume)
        )
    }

    fn ready_at(&self) -> Instant {
        Instant::now() + self.latency
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.delete(id, self.ready_at())?;
        debug!(resource_id = %id, "Deletion accepted");
        Ok(())
    }
}

#[async_trait]
impl ResourceReader for SimulatedAnf {
    async fn get_account(&self, resource_group: &str, account: &str) -> Result<NetAppAccount> {
        let id = self.account_id(resource_group, account);
        match self.state.read().await.visible(&id, Instant::now())? {
            Resource::Account(account) => Ok(account),
            _ => Err(AnfError::NotFound(id)),
        }
    }

    async fn get_pool(&self, resource_group: &str, account: &str, pool: &str) -> Result<CapacityPool> {
        let id = self.pool_id(resource_group, account, pool);
        match self.state.read().await.visible(&id, Instant::now())? {
            Resource::Pool(pool) => Ok(pool),
            _ => Err(AnfError::NotFound(id)),
        }
    }

    async fn get_volume(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
    ) -> Result<Volume> {
        let id = self.volume_id(resource_group, account, pool, volume);
        match self.state.read().await.visible(&id, Instant::now())? {
            Resource::Volume(volume) => Ok(volume),
            _ => Err(AnfError::NotFound(id)),
        }
    }

    async fn get_snapshot(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        snapshot: &str,
    ) -> Result<Snapshot> {
        let id = self.snapshot_id(resource_group, account, pool, volume, snapshot);
        match self.state.read().await.visible(&id, Instant::now())? {
            Resource::Snapshot(snapshot) => Ok(snapshot),
            _ => Err(AnfError::NotFound(id)),
        }
    }

    async fn replication_status(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
    ) -> Result<ReplicationStatus> {
        let id = self.volume_id(resource_group, account, pool, volume);
        let now = Instant::now();
        let state = self.state.read().await;

        let Resource::Volume(volume) = state.visible(&id, now)? else {
            return Err(AnfError::NotFound(id));
        };
        let is_destination = volume
            .data_protection
            .and_then(|dp| dp.replication)
            .is_some_and(|r| r.endpoint_type == EndpointType::Dst);
        if !is_destination {
            return Err(AnfError::Api {
                status: 400,
                code: Some("VolumeReplicationMissing".to_string()),
                message: format!("Volume {id} is not a replication destination"),
            });
        }

        let Some(replication) = state.replications.get(&key(&id)) else {
            return Err(AnfError::Api {
                status: 409,
                code: Some("ReplicationCreating".to_string()),
                message: "Replication is creating, waiting for the source volume authorization"
                    .to_string(),
            });
        };

        let (mirror_state, relationship_status, total_progress) = match replication.broken_at {
            Some(broken) if now >= broken + self.latency => ("Broken", "Idle", None),
            _ if now < replication.authorized_at + self.latency => {
                ("Uninitialized", "Transferring", Some("0".to_string()))
            }
            _ => ("Mirrored", "Idle", None),
        };

        Ok(ReplicationStatus {
            healthy: true,
            relationship_status: relationship_status.to_string(),
            mirror_state: mirror_state.to_string(),
            total_progress,
            error_message: None,
        })
    }
}

#[async_trait]
impl AnfClient for SimulatedAnf {
    async fn create_account(
        &self,
        resource_group: &str,
        account: &str,
        location: &str,
    ) -> Result<NetAppAccount> {
        let id = self.account_id(resource_group, account);
        if id.is_empty() {
            return Err(AnfError::InvalidResourceId {
                id: format!("{resource_group}/{account}"),
                segment: "account",
            });
        }
        let created = NetAppAccount {
            id: id.clone(),
            name: account.to_string(),
            location: location.to_string(),
            provisioning_state: SUCCEEDED.to_string(),
        };

        let mut state = self.state.write().await;
        state.insert(&id, Resource::Account(created.clone()), self.ready_at());
        debug!(resource_id = %id, "Account creation accepted");
        Ok(created)
    }

    async fn create_pool(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        request: CapacityPoolRequest,
    ) -> Result<CapacityPool> {
        let id = self.pool_id(resource_group, account, pool);
        let mut state = self.state.write().await;
        state.existing(&self.account_id(resource_group, account))?;

        let created = CapacityPool {
            id: id.clone(),
            name: format!("{account}/{pool}"),
            location: request.location,
            service_level: request.service_level,
            size: request.size,
            provisioning_state: SUCCEEDED.to_string(),
        };
        state.insert(&id, Resource::Pool(created.clone()), self.ready_at());
        debug!(resource_id = %id, "Capacity pool creation accepted");
        Ok(created)
    }

    async fn create_volume(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        request: VolumeRequest,
    ) -> Result<Volume> {
        let id = self.volume_id(resource_group, account, pool, volume);
        let mut state = self.state.write().await;
        state.existing(&self.pool_id(resource_group, account, pool))?;

        if let Some(replication) = request
            .data_protection
            .as_ref()
            .and_then(|dp| dp.replication.as_ref())
            .filter(|r| r.endpoint_type == EndpointType::Dst)
        {
            state.existing(&replication.remote_volume_resource_id)?;
        }

        let created = Volume {
            id: id.clone(),
            name: format!("{account}/{pool}/{volume}"),
            location: request.location,
            creation_token: request.creation_token,
            service_level: request.service_level,
            usage_threshold: request.usage_threshold,
            subnet_id: request.subnet_id,
            protocol_types: request.protocol_types,
            export_policy: request.export_policy,
            data_protection: request.data_protection,
            file_system_id: Uuid::new_v4().to_string(),
            provisioning_state: SUCCEEDED.to_string(),
        };
        state.insert(&id, Resource::Volume(created.clone()), self.ready_at());
        debug!(resource_id = %id, "Volume creation accepted");
        Ok(created)
    }

    async fn authorize_replication(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        request: AuthorizeRequest,
    ) -> Result<()> {
        let source_id = self.volume_id(resource_group, account, pool, volume);
        let destination_id = request.remote_volume_resource_id;
        let mut state = self.state.write().await;
        state.existing(&source_id)?;

        let Resource::Volume(destination) = &state.existing(&destination_id)?.resource else {
            return Err(AnfError::NotFound(destination_id));
        };
        let pairs_with_source = destination
            .data_protection
            .as_ref()
            .and_then(|dp| dp.replication.as_ref())
            .is_some_and(|r| {
                r.endpoint_type == EndpointType::Dst
                    && r.remote_volume_resource_id.eq_ignore_ascii_case(&source_id)
            });
        if !pairs_with_source {
            return Err(AnfError::Conflict(format!(
                "{destination_id} is not a replication destination of {source_id}"
            )));
        }

        state.replications.insert(
            key(&destination_id),
            Replication {
                source_id: source_id.clone(),
                authorized_at: Instant::now(),
                broken_at: None,
            },
        );
        debug!(source = %source_id, destination = %destination_id, "Replication authorized");
        Ok(())
    }

    async fn break_replication(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
    ) -> Result<()> {
        let id = self.volume_id(resource_group, account, pool, volume);
        let now = Instant::now();
        let latency = self.latency;
        let mut state = self.state.write().await;

        let replication = state
            .replications
            .get_mut(&key(&id))
            .ok_or_else(|| AnfError::NotFound(format!("replication of {id}")))?;
        if replication.broken_at.is_some() || now < replication.authorized_at + latency {
            return Err(AnfError::Conflict(format!("replication of {id} is not mirrored")));
        }
        replication.broken_at = Some(now);
        debug!(resource_id = %id, "Replication break accepted");
        Ok(())
    }

    async fn delete_replication(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
    ) -> Result<()> {
        let id = self.volume_id(resource_group, account, pool, volume);
        let mut state = self.state.write().await;

        let entry = state.existing(&id)?;
        if let Resource::Volume(volume) = &mut entry.resource {
            volume.data_protection = None;
        }
        state.replications.remove(&key(&id));
        debug!(resource_id = %id, "Replication deleted");
        Ok(())
    }

    async fn create_snapshot(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        snapshot: &str,
    ) -> Result<Snapshot> {
        let id = self.snapshot_id(resource_group, account, pool, volume, snapshot);
        let mut state = self.state.write().await;
        let parent = state.existing(&self.volume_id(resource_group, account, pool, volume))?;
        let location = match &parent.resource {
            Resource::Volume(volume) => volume.location.clone(),
            _ => String::new(),
        };

        let created = Snapshot {
            id: id.clone(),
            name: format!("{account}/{pool}/{volume}/{snapshot}"),
            location,
            created: chrono::Utc::now(),
        };
        state.insert(&id, Resource::Snapshot(created.clone()), self.ready_at());
        debug!(resource_id = %id, "Snapshot creation accepted");
        Ok(created)
    }

    async fn delete_snapshot(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        snapshot: &str,
    ) -> Result<()> {
        let id = self.snapshot_id(resource_group, account, pool, volume, snapshot);
        self.delete_resource(&id).await
    }

    async fn delete_volume(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
    ) -> Result<()> {
        let id = self.volume_id(resource_group, account, pool, volume);
        self.delete_resource(&id).await
    }

    async fn delete_pool(&self, resource_group: &str, account: &str, pool: &str) -> Result<()> {
        let id = self.pool_id(resource_group, account, pool);
        self.delete_resource(&id).await
    }

    async fn delete_account(&self, resource_group: &str, account: &str) -> Result<()> {
        let id = self.account_id(resource_group, account);
        self.delete_resource(&id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DataProtection, ExportPolicy, ReplicationObject, ReplicationSchedule};

    const LATENCY: Duration = Duration::from_secs(30);

    fn volume_request(data_protection: Option<DataProtection>) -> VolumeRequest {
        VolumeRequest {
            location: "westus".to_string(),
            service_level: "Standard".to_string(),
            creation_token: "vol".to_string(),
            usage_threshold: 100 << 30,
            subnet_id: "subnet".to_string(),
            protocol_types: vec!["NFSv4.1".to_string()],
            export_policy: ExportPolicy::default(),
            data_protection,
        }
    }

    async fn with_pool(anf: &SimulatedAnf) {
        anf.create_account("rg", "acc", "westus").await.unwrap();
        anf.create_pool(
            "rg",
            "acc",
            "pool",
            CapacityPoolRequest {
                location: "westus".to_string(),
                service_level: "Standard".to_string(),
                size: 4 << 40,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_resource_visible_after_latency() {
        let anf = SimulatedAnf::new("sub", LATENCY);
        let account = anf.create_account("rg", "acc", "westus").await.unwrap();
        assert_eq!(
            account.id,
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.NetApp/netAppAccounts/acc"
        );

        assert!(anf.get_account("rg", "acc").await.unwrap_err().is_not_found());
        tokio::time::advance(LATENCY).await;
        assert_eq!(anf.get_account("RG", "ACC").await.unwrap().name, "acc");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_names_and_parent_check() {
        let anf = SimulatedAnf::new("sub", LATENCY);
        let err = anf
            .create_volume("rg", "acc", "pool", "vol", volume_request(None))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        with_pool(&anf).await;
        let volume = anf
            .create_volume("rg", "acc", "pool", "vol", volume_request(None))
            .await
            .unwrap();
        assert_eq!(volume.name, "acc/pool/vol");
        assert_eq!(volume.id, anf.volume_id("rg", "acc", "pool", "vol"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_resource_lingers() {
        let anf = SimulatedAnf::new("sub", LATENCY);
        with_pool(&anf).await;
        tokio::time::advance(LATENCY).await;

        // Account still has a pool
        assert!(matches!(
            anf.delete_account("rg", "acc").await,
            Err(AnfError::Conflict(_))
        ));

        anf.delete_pool("rg", "acc", "pool").await.unwrap();
        assert!(anf.get_pool("rg", "acc", "pool").await.is_ok());
        tokio::time::advance(LATENCY).await;
        assert!(anf.get_pool("rg", "acc", "pool").await.unwrap_err().is_not_found());
        anf.delete_account("rg", "acc").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_replication_lifecycle() {
        let anf = SimulatedAnf::new("sub", LATENCY);
        with_pool(&anf).await;
        let source = anf
            .create_volume("rg", "acc", "pool", "src", volume_request(None))
            .await
            .unwrap();
        let replication = DataProtection {
            replication: Some(ReplicationObject {
                endpoint_type: EndpointType::Dst,
                remote_volume_region: "westus".to_string(),
                remote_volume_resource_id: source.id.clone(),
                replication_schedule: ReplicationSchedule::Hourly,
            }),
        };
        let destination = anf
            .create_volume("rg", "acc", "pool", "dst", volume_request(Some(replication)))
            .await
            .unwrap();
        tokio::time::advance(LATENCY).await;

        let err = anf
            .replication_status("rg", "acc", "pool", "dst")
            .await
            .unwrap_err();
        assert!(err.is_replication_creating());

        anf.authorize_replication(
            "rg",
            "acc",
            "pool",
            "src",
            AuthorizeRequest {
                remote_volume_resource_id: destination.id.clone(),
            },
        )
        .await
        .unwrap();
        let status = anf.replication_status("rg", "acc", "pool", "dst").await.unwrap();
        assert_eq!(status.mirror_state, "Uninitialized");

        tokio::time::advance(LATENCY).await;
        let status = anf.replication_status("rg", "acc", "pool", "dst").await.unwrap();
        assert_eq!(status.mirror_state, "Mirrored");

        // Both ends are pinned while replicating
        assert!(anf.delete_volume("rg", "acc", "pool", "src").await.is_err());
        assert!(anf.delete_volume("rg", "acc", "pool", "dst").await.is_err());

        anf.break_replication("rg", "acc", "pool", "dst").await.unwrap();
        tokio::time::advance(LATENCY).await;
        let status = anf.replication_status("rg", "acc", "pool", "dst").await.unwrap();
        assert_eq!(status.mirror_state, "Broken");

        anf.delete_replication("rg", "acc", "pool", "dst").await.unwrap();
        anf.delete_volume("rg", "acc", "pool", "dst").await.unwrap();
        anf.delete_volume("rg", "acc", "pool", "src").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_delete_refuses_replicated_volume() {
        let now = Instant::now();
        let volume = Volume {
            id: "/v/src".to_string(),
            name: "src".to_string(),
            location: "westus".to_string(),
            creation_token: "src".to_string(),
            service_level: "Standard".to_string(),
            usage_threshold: 100 << 30,
            subnet_id: "subnet".to_string(),
            protocol_types: vec!["NFSv4.1".to_string()],
            export_policy: ExportPolicy::default(),
            data_protection: None,
            file_system_id: "fs-1".to_string(),
            provisioning_state: SUCCEEDED.to_string(),
        };
        let mut state = State::default();
        state.insert("/v/src", Resource::Volume(volume), now);
        state.replications.insert(
            key("/v/dst"),
            Replication {
                source_id: "/V/SRC".to_string(),
                authorized_at: now,
                broken_at: None,
            },
        );

        assert!(matches!(
            state.delete("/v/src", now + LATENCY),
            Err(AnfError::Conflict(_))
        ));
        assert!(state.existing("/v/src").is_ok());

        state.replications.clear();
        state.delete("/v/src", now + LATENCY).unwrap();
        assert!(state.existing("/v/src").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_deletions_are_pruned() {
        let anf = SimulatedAnf::new("sub", LATENCY);
        with_pool(&anf).await;
        tokio::time::advance(LATENCY).await;

        anf.delete_pool("rg", "acc", "pool").await.unwrap();
        assert_eq!(anf.state.read().await.resources.len(), 2);

        // Still lingering, so it is kept
        anf.create_account("rg", "other", "westus").await.unwrap();
        assert_eq!(anf.state.read().await.resources.len(), 3);

        tokio::time::advance(LATENCY).await;
        anf.create_account("rg", "third", "westus").await.unwrap();
        let state = anf.state.read().await;
        assert_eq!(state.resources.len(), 3);
        assert!(!state.resources.contains_key(&key(&anf.pool_id("rg", "acc", "pool"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorize_requires_matching_destination() {
        let anf = SimulatedAnf::new("sub", LATENCY);
        with_pool(&anf).await;
        anf.create_volume("rg", "acc", "pool", "src", volume_request(None))
            .await
            .unwrap();
        let other = anf
            .create_volume("rg", "acc", "pool", "other", volume_request(None))
            .await
            .unwrap();

        let err = anf
            .authorize_replication(
                "rg",
                "acc",
                "pool",
                "src",
                AuthorizeRequest {
                    remote_volume_resource_id: other.id,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AnfError::Conflict(_)));
    }
}
