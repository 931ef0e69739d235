//! Storage and command-and-control grants for a cluster's service accounts.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use forge_cloud::{C2Channel, CloudError, IamClient, PubSubAdmin, service_account_member};

use crate::error::ProvisionResult;
use crate::reconcile::ServiceAccounts;

/// Read/write on the orchestrator bucket.
pub const STORAGE_ROLE: &str = "roles/storage.objectAdmin";
/// Consume the cluster's command-and-control subscription.
pub const SUBSCRIBER_ROLE: &str = "roles/pubsub.subscriber";

/// Whether the controller can consume its command-and-control subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Wired,
    Degraded { reason: String },
}

impl ChannelStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ChannelStatus::Degraded { .. })
    }
}

pub struct PermissionSync {
    iam: Arc<dyn IamClient>,
    pubsub: Arc<dyn PubSubAdmin>,
    bucket: String,
    channel: C2Channel,
}

impl PermissionSync {
    pub fn new(
        iam: Arc<dyn IamClient>,
        pubsub: Arc<dyn PubSubAdmin>,
        bucket: &str,
        channel: C2Channel,
    ) -> Self {
        Self {
            iam,
            pubsub,
            bucket: bucket.to_string(),
            channel,
        }
    }

    /// Grant every distinct account read/write on the bucket.
    pub async fn grant_storage_permissions(&self, accounts: &BTreeSet<String>) -> ProvisionResult<()> {
        for email in accounts {
            self.iam
                .grant_bucket_role(&self.bucket, &service_account_member(email), STORAGE_ROLE)
                .await?;
        }
        info!(bucket = %self.bucket, count = accounts.len(), "storage permissions granted");
        Ok(())
    }

    /// Ensure the cluster's subscription exists and the controller may consume it.
    ///
    /// A denied IAM grant is not an error: the channel is reported degraded.
    pub async fn wire_command_channel(
        &self,
        cluster_id: &str,
        cluster_project: Option<&str>,
        controller_account: Option<&str>,
    ) -> ProvisionResult<ChannelStatus> {
        let subscription = self.channel.subscription_path(cluster_id);
        let created = self
            .pubsub
            .create_subscription(&subscription, &self.channel.topic_path())
            .await?;
        if created {
            info!(cluster = cluster_id, %subscription, "command-and-control subscription created");
        }

        let Some(account) = controller_account else {
            warn!(cluster = cluster_id, "no controller service account, command-and-control will not work");
            return Ok(ChannelStatus::Degraded {
                reason: "controller service account unknown".to_string(),
            });
        };

        match self
            .iam
            .grant_subscription_role(&subscription, &service_account_member(account), SUBSCRIBER_ROLE)
            .await
        {
            Ok(()) => {
                info!(cluster = cluster_id, account, "command-and-control wired");
                Ok(ChannelStatus::Wired)
            }
            Err(CloudError::PermissionDenied(reason)) => {
                warn!(
                    cluster = cluster_id,
                    %reason,
                    "permission denied granting subscription access, command-and-control may not work; \
                     grant the orchestrator account pubsub.admin"
                );
                if let Some(project) = cluster_project.filter(|p| *p != self.channel.project_id()) {
                    error!(
                        cluster = cluster_id,
                        cluster_project = project,
                        orchestrator_project = self.channel.project_id(),
                        "cluster project differs from orchestrator project, command-and-control will not work"
                    );
                }
                Ok(ChannelStatus::Degraded { reason })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Storage grants for every account, then the channel for the controller.
    pub async fn sync(
        &self,
        cluster_id: &str,
        cluster_project: Option<&str>,
        accounts: &ServiceAccounts,
    ) -> ProvisionResult<ChannelStatus> {
        self.grant_storage_permissions(&accounts.distinct()).await?;
        self.wire_command_channel(cluster_id, cluster_project, accounts.controller.as_deref())
            .await
    }

    /// Remove the cluster's subscription. Returns false if it was already gone.
    pub async fn unwire_command_channel(&self, cluster_id: &str) -> ProvisionResult<bool> {
        let subscription = self.channel.subscription_path(cluster_id);
        let existed = self.pubsub.delete_subscription(&subscription).await?;
        info!(cluster = cluster_id, %subscription, existed, "command-and-control subscription removed");
        Ok(existed)
    }
}
