//! Cross-region replication setup.
//!
//! Creates an account, capacity pool and volume in the primary region, a
//! data replication volume in the secondary region, authorizes the pair and
//! waits for the mirror. Optionally breaks the mirror and tears everything
//! down again, waiting for each deletion before deleting the parent.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::client::{
    AnfClient, AuthorizeRequest, CapacityPoolRequest, DataProtection, EndpointType, ExportPolicy,
    ExportPolicyRule, ReplicationObject, VolumeRequest,
};
use crate::config::{CrrConfig, RegionConfig};
use crate::resource_uri::{ResourceKind, extract_account, extract_pool};
use crate::wait::{Absence, PollSpec, wait_for_absent, wait_for_broken, wait_for_exists, wait_for_mirrored};

const NFS_V41: &str = "NFSv4.1";

/// Resources created in one region.
#[derive(Debug, Clone)]
pub struct RegionResources {
    pub resource_group: String,
    pub account: String,
    pub pool: String,
    pub volume: String,
    pub account_id: String,
    pub pool_id: String,
    pub volume_id: String,
}

/// What a workflow run did.
#[derive(Debug, Clone)]
pub struct CrrReport {
    pub primary: RegionResources,
    pub secondary: RegionResources,
    pub broken: bool,
    pub cleaned_up: bool,
    /// Resources whose deletion was requested but never observed.
    pub unconfirmed_deletions: Vec<String>,
}

fn export_policy() -> ExportPolicy {
    ExportPolicy {
        rules: vec![ExportPolicyRule {
            rule_index: 1,
            allowed_clients: "0.0.0.0".to_string(),
            unix_read_only: false,
            unix_read_write: true,
            cifs: false,
            nfsv3: false,
            nfsv41: true,
        }],
    }
}

pub struct CrrWorkflow<'a, C: ?Sized> {
    client: &'a C,
    config: &'a CrrConfig,
    poll: PollSpec,
}

impl<'a, C> CrrWorkflow<'a, C>
where
    C: AnfClient + ?Sized,
{
    pub fn new(client: &'a C, config: &'a CrrConfig) -> Self {
        Self {
            client,
            config,
            poll: config.poll.spec(),
        }
    }

    pub async fn run(&self) -> Result<CrrReport> {
        let primary = self
            .create_region(&self.config.primary, None)
            .await
            .context("Failed to set up primary region")?;

        let replication = ReplicationObject {
            endpoint_type: EndpointType::Dst,
            remote_volume_region: self.config.primary.location.clone(),
            remote_volume_resource_id: primary.volume_id.clone(),
            replication_schedule: self.config.replication_schedule,
        };
        let secondary = self
            .create_region(&self.config.secondary, Some(replication))
            .await
            .context("Failed to set up secondary region")?;

        info!(source = %primary.volume_id, "Authorizing replication in source region");
        self.client
            .authorize_replication(
                &primary.resource_group,
                &primary.account,
                &primary.pool,
                &primary.volume,
                AuthorizeRequest {
                    remote_volume_resource_id: secondary.volume_id.clone(),
                },
            )
            .await
            .context("Failed to authorize replication")?;

        wait_for_mirrored(self.client, &secondary.volume_id, self.poll)
            .await
            .context("Replication never reached the mirrored state")?;
        info!("Cross-region replication established");

        let broken = if self.config.break_replication {
            self.break_mirror(&secondary).await?;
            true
        } else {
            false
        };

        let mut report = CrrReport {
            primary,
            secondary,
            broken,
            cleaned_up: false,
            unconfirmed_deletions: Vec::new(),
        };

        if self.config.cleanup {
            report.unconfirmed_deletions = self
                .cleanup(&report.primary, &report.secondary)
                .await
                .context("Failed to clean up resources")?;
            report.cleaned_up = true;
        }

        Ok(report)
    }

    async fn create_region(
        &self,
        region: &RegionConfig,
        replication: Option<ReplicationObject>,
    ) -> Result<RegionResources> {
        let rg = region.resource_group.as_str();
        let location = region.location.to_lowercase();

        info!(location = %location, account = %region.account, "Creating account");
        let account = self
            .client
            .create_account(rg, &region.account, &location)
            .await
            .with_context(|| format!("Failed to create account {}", region.account))?;
        info!(resource_id = %account.id, "Account created");

        // Nested resources come back named "account/pool", take names from the id
        let account_name = extract_account(&account.id)
            .with_context(|| format!("Account id {} has no account segment", account.id))?;

        let pool = self
            .client
            .create_pool(
                rg,
                &account_name,
                &region.pool,
                CapacityPoolRequest {
                    location: location.clone(),
                    service_level: self.config.service_level.clone(),
                    size: self.config.pool_size,
                },
            )
            .await
            .with_context(|| format!("Failed to create capacity pool {}", region.pool))?;
        info!(resource_id = %pool.id, "Capacity pool created");

        let pool_name = extract_pool(&pool.id)
            .with_context(|| format!("Pool id {} has no capacity pool segment", pool.id))?;

        let is_replica = replication.is_some();
        let volume = self
            .client
            .create_volume(
                rg,
                &account_name,
                &pool_name,
                &region.volume,
                VolumeRequest {
                    location,
                    service_level: self.config.service_level.clone(),
                    creation_token: region.volume.clone(),
                    usage_threshold: self.config.volume_size,
                    subnet_id: region.subnet_id(&self.config.subscription_id),
                    protocol_types: vec![NFS_V41.to_string()],
                    export_policy: export_policy(),
                    data_protection: replication.map(|r| DataProtection {
                        replication: Some(r),
                    }),
                },
            )
            .await
            .with_context(|| format!("Failed to create volume {}", region.volume))?;
        info!(resource_id = %volume.id, replica = is_replica, "Volume creation requested");

        wait_for_exists(self.client, ResourceKind::Volume, &volume.id, self.poll)
            .await
            .with_context(|| format!("Volume {} never became available", volume.id))?;

        Ok(RegionResources {
            resource_group: rg.to_string(),
            account: account_name,
            pool: pool_name,
            volume: region.volume.clone(),
            account_id: account.id,
            pool_id: pool.id,
            volume_id: volume.id,
        })
    }

    async fn break_mirror(&self, secondary: &RegionResources) -> Result<()> {
        info!(resource_id = %secondary.volume_id, "Breaking replication");
        self.client
            .break_replication(
                &secondary.resource_group,
                &secondary.account,
                &secondary.pool,
                &secondary.volume,
            )
            .await
            .context("Failed to break replication")?;

        wait_for_broken(self.client, &secondary.volume_id, self.poll)
            .await
            .context("Replication never reached the broken state")?;
        Ok(())
    }

    /// Delete the replication, then each region bottom-up. Returns the ids
    /// whose deletion could not be confirmed.
    async fn cleanup(
        &self,
        primary: &RegionResources,
        secondary: &RegionResources,
    ) -> Result<Vec<String>> {
        info!(resource_id = %secondary.volume_id, "Deleting replication");
        self.client
            .delete_replication(
                &secondary.resource_group,
                &secondary.account,
                &secondary.pool,
                &secondary.volume,
            )
            .await
            .context("Failed to delete replication")?;

        let mut unconfirmed = self.delete_region(secondary).await?;
        unconfirmed.extend(self.delete_region(primary).await?);
        Ok(unconfirmed)
    }

    async fn delete_region(&self, region: &RegionResources) -> Result<Vec<String>> {
        let rg = region.resource_group.as_str();
        let mut unconfirmed = Vec::new();

        info!(resource_id = %region.volume_id, "Deleting volume");
        self.client
            .delete_volume(rg, &region.account, &region.pool, &region.volume)
            .await
            .with_context(|| format!("Failed to delete volume {}", region.volume_id))?;
        self.await_deletion(ResourceKind::Volume, &region.volume_id, &mut unconfirmed)
            .await?;

        info!(resource_id = %region.pool_id, "Deleting capacity pool");
        self.client
            .delete_pool(rg, &region.account, &region.pool)
            .await
            .with_context(|| format!("Failed to delete capacity pool {}", region.pool_id))?;
        self.await_deletion(ResourceKind::Pool, &region.pool_id, &mut unconfirmed)
            .await?;

        info!(resource_id = %region.account_id, "Deleting account");
        self.client
            .delete_account(rg, &region.account)
            .await
            .with_context(|| format!("Failed to delete account {}", region.account_id))?;
        self.await_deletion(ResourceKind::Account, &region.account_id, &mut unconfirmed)
            .await?;

        Ok(unconfirmed)
    }

    async fn await_deletion(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        unconfirmed: &mut Vec<String>,
    ) -> Result<()> {
        let absence = wait_for_absent(self.client, kind, resource_id, self.poll)
            .await
            .with_context(|| format!("Failed waiting for {kind} {resource_id} to be deleted"))?;
        if let Absence::Unconfirmed { .. } = absence {
            warn!(%kind, resource_id, "Deletion not confirmed, continuing with parent");
            unconfirmed.push(resource_id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::ResourceReader;
    use crate::config::PollConfig;
    use crate::resource_uri::ResourceIdentifier;
    use crate::simulated::SimulatedAnf;

    fn region(side: &str, location: &str) -> RegionConfig {
        RegionConfig {
            resource_group: format!("{side}-rg"),
            location: location.to_string(),
            vnet: format!("{side}-vnet"),
            subnet: "anf-sn".to_string(),
            account: format!("{side}acc"),
            pool: format!("{side}pool"),
            volume: format!("{side}vol"),
        }
    }

    fn config() -> CrrConfig {
        serde_json::from_value(serde_json::json!({
            "subscriptionId": "sub",
            "primary": region("primary", "WestUS"),
            "secondary": region("secondary", "EastUS"),
            "poll": PollConfig { interval_secs: 10, retries: 10 },
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sets_up_replication() {
        let anf = SimulatedAnf::new("sub", Duration::from_secs(25));
        let config = config();

        let report = CrrWorkflow::new(&anf, &config).run().await.unwrap();
        assert!(!report.broken);
        assert!(!report.cleaned_up);

        let destination = ResourceIdentifier::parse(&report.secondary.volume_id);
        assert_eq!(destination.resource_group(), Some("secondary-rg"));
        assert_eq!(destination.pool_name(), Some("secondarypool"));

        let volume = anf
            .get_volume("primary-rg", "primaryacc", "primarypool", "primaryvol")
            .await
            .unwrap();
        assert_eq!(volume.location, "westus");
        assert_eq!(volume.export_policy.rules.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_control_plane_exhausts() {
        let anf = SimulatedAnf::new("sub", Duration::from_secs(600));
        let config = config();

        let err = CrrWorkflow::new(&anf, &config).run().await.unwrap_err();
        assert!(format!("{err:#}").contains("never became available"));
    }
}
