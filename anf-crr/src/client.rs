//! NetApp management client capability and resource models.
//!
//! The convergence waits only need the lookups in [`ResourceReader`]. The
//! replication workflow additionally issues the mutations in [`AnfClient`].
//! Mutations return once the request is accepted; the resource converges
//! later and callers wait for it with [`crate::wait`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetAppAccount {
    pub id: String,
    pub name: String,
    pub location: String,
    pub provisioning_state: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityPool {
    pub id: String,
    pub name: String,
    pub location: String,
    pub service_level: String,
    pub size: u64,
    pub provisioning_state: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPolicyRule {
    pub rule_index: u32,
    pub allowed_clients: String,
    pub unix_read_only: bool,
    pub unix_read_write: bool,
    pub cifs: bool,
    pub nfsv3: bool,
    pub nfsv41: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPolicy {
    pub rules: Vec<ExportPolicyRule>,
}

/// Which side of a replication pair a volume is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    Src,
    Dst,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplicationSchedule {
    #[serde(rename = "_10minutely")]
    TenMinutely,
    Hourly,
    Daily,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationObject {
    pub endpoint_type: EndpointType,
    pub remote_volume_region: String,
    pub remote_volume_resource_id: String,
    pub replication_schedule: ReplicationSchedule,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProtection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationObject>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub location: String,
    pub creation_token: String,
    pub service_level: String,
    pub usage_threshold: u64,
    pub subnet_id: String,
    pub protocol_types: Vec<String>,
    pub export_policy: ExportPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_protection: Option<DataProtection>,
    pub file_system_id: String,
    pub provisioning_state: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub location: String,
    pub created: DateTime<Utc>,
}

/// Replication status as reported for the destination volume.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationStatus {
    pub healthy: bool,
    pub relationship_status: String,
    /// "Uninitialized", "Mirrored" or "Broken".
    pub mirror_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityPoolRequest {
    pub location: String,
    pub service_level: String,
    pub size: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequest {
    pub location: String,
    pub service_level: String,
    pub creation_token: String,
    pub usage_threshold: u64,
    pub subnet_id: String,
    pub protocol_types: Vec<String>,
    pub export_policy: ExportPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_protection: Option<DataProtection>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub remote_volume_resource_id: String,
}

/// Read access to NetApp resources.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn get_account(&self, resource_group: &str, account: &str) -> Result<NetAppAccount>;

    async fn get_pool(&self, resource_group: &str, account: &str, pool: &str)
    -> Result<CapacityPool>;

    async fn get_volume(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
    ) -> Result<Volume>;

    async fn get_snapshot(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        snapshot: &str,
    ) -> Result<Snapshot>;

    /// Replication status of a destination volume.
    async fn replication_status(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
    ) -> Result<ReplicationStatus>;
}

/// Full management client used by the replication workflow.
#[async_trait]
pub trait AnfClient: ResourceReader {
    async fn create_account(
        &self,
        resource_group: &str,
        account: &str,
        location: &str,
    ) -> Result<NetAppAccount>;

    async fn create_pool(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        request: CapacityPoolRequest,
    ) -> Result<CapacityPool>;

    async fn create_volume(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        request: VolumeRequest,
    ) -> Result<Volume>;

    /// Authorize replication on the source volume.
    async fn authorize_replication(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        request: AuthorizeRequest,
    ) -> Result<()>;

    /// Break the mirror on the destination volume.
    async fn break_replication(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
    ) -> Result<()>;

    /// Remove the replication relationship from the destination volume.
    async fn delete_replication(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
    ) -> Result<()>;

    async fn create_snapshot(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        snapshot: &str,
    ) -> Result<Snapshot>;

    async fn delete_snapshot(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
        snapshot: &str,
    ) -> Result<()>;

    async fn delete_volume(
        &self,
        resource_group: &str,
        account: &str,
        pool: &str,
        volume: &str,
    ) -> Result<()>;

    async fn delete_pool(&self, resource_group: &str, account: &str, pool: &str) -> Result<()>;

    async fn delete_account(&self, resource_group: &str, account: &str) -> Result<()>;
}
