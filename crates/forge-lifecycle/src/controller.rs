//! Cluster lifecycle controller: drives the cluster state machine.
//!
//! ```text
//! new -> preparing -> configuring -> initializing -> ready
//!                         |               |
//!                         +---> error <---+
//! ready | error -> terminating -> destroyed
//! ```
//!
//! Every state-mutating operation runs under the cluster's lease. Status
//! changes are persisted before and after each long-running step so
//! operators can follow progress through the stored record.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use forge_blueprint::BlueprintGenerator;
use forge_cloud::{
    C2Channel, C2Command, C2CommandKind, C2Response, C2Subject, GcloudCli, IamClient, MemoryCloud,
    ObjectStore, PubSubAdmin, ResponseRouter,
};
use forge_core::ForgeConfig;
use forge_core::layout::TF_STATE_FILE;
use forge_state::{
    ApplicationInstallationLocation, CloudCredential, CloudState, Cluster, ClusterStatus,
    MountPoint, NodeRole, Partition, StateStore, project_id_from_detail, relative_to_mount,
    resolve_mount,
};
use forge_provision::{
    BootstrapPublisher, ChannelStatus, CommandRunner, PermissionSync, ProvisioningEngine,
    Reconciler, ServiceAccounts, StateSnapshot, Workspace,
};

use crate::error::{LifecycleError, LifecycleResult};
use crate::lease::{ClusterLease, ClusterLeases};

/// Cloud collaborators used by the controller.
#[derive(Clone)]
pub struct CloudServices {
    pub objects: Arc<dyn ObjectStore>,
    pub iam: Arc<dyn IamClient>,
    pub pubsub: Arc<dyn PubSubAdmin>,
}

impl CloudServices {
    /// Everything through the `gcloud` CLI.
    pub fn gcloud(config: &ForgeConfig) -> Self {
        let cli = Arc::new(GcloudCli::new(&config.gcloud()));
        Self {
            objects: cli.clone(),
            iam: cli.clone(),
            pubsub: cli,
        }
    }

    /// Everything in one in-memory cloud.
    pub fn memory(cloud: Arc<MemoryCloud>) -> Self {
        Self {
            objects: cloud.clone(),
            iam: cloud.clone(),
            pubsub: cloud,
        }
    }
}

pub struct ClusterLifecycle {
    config: ForgeConfig,
    store: StateStore,
    engine: ProvisioningEngine,
    blueprints: BlueprintGenerator,
    bootstrap: BootstrapPublisher,
    permissions: PermissionSync,
    reconciler: Reconciler,
    leases: ClusterLeases,
    channel: C2Channel,
    pubsub: Arc<dyn PubSubAdmin>,
    responses: ResponseRouter,
}

impl ClusterLifecycle {
    pub fn new(
        config: ForgeConfig,
        store: StateStore,
        runner: Arc<dyn CommandRunner>,
        cloud: CloudServices,
    ) -> LifecycleResult<Self> {
        let channel = C2Channel::from_config(&config);
        let mut bootstrap =
            BootstrapPublisher::new(&config.server.bucket, channel.clone(), cloud.objects)?;
        if let Some(dir) = &config.server.templates_dir {
            bootstrap = bootstrap.with_templates_dir(dir)?;
        }
        Ok(Self {
            engine: ProvisioningEngine::from_config(runner, &config),
            blueprints: BlueprintGenerator::new(&config.server.bucket),
            bootstrap,
            permissions: PermissionSync::new(
                cloud.iam,
                cloud.pubsub.clone(),
                &config.server.bucket,
                channel.clone(),
            ),
            reconciler: Reconciler::new(store.clone()),
            leases: ClusterLeases::new(),
            channel,
            pubsub: cloud.pubsub,
            responses: ResponseRouter::new(),
            store,
            config,
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn cluster(&self, cluster_id: &str) -> LifecycleResult<Cluster> {
        self.store
            .get_cluster(cluster_id)?
            .ok_or_else(|| LifecycleError::ClusterNotFound(cluster_id.to_string()))
    }

    /// All stored clusters.
    pub fn clusters(&self) -> LifecycleResult<Vec<Cluster>> {
        Ok(self.store.list_clusters()?)
    }

    /// Rendered blueprint text for the cluster's current layout.
    ///
    /// Uses the credential installed in the workspace once `prepare` has
    /// run, the stored credential before that.
    pub fn render_blueprint(&self, cluster_id: &str) -> LifecycleResult<String> {
        let cluster = self.cluster(cluster_id)?;
        let credential = match Workspace::open(&self.config.cluster_dir(cluster_id)) {
            Ok(workspace) if workspace.credentials_path().is_file() => {
                self.installed_credential(&cluster, &workspace)?
            }
            _ => self.stored_credential(&cluster)?,
        };
        Ok(self.blueprints.render(&cluster, &credential)?)
    }

    /// Forget a cluster that is `new` or `destroyed`, deleting its workspace.
    pub fn remove(&self, cluster_id: &str) -> LifecycleResult<()> {
        let _lease = self.lease(cluster_id)?;
        let cluster = self.cluster(cluster_id)?;
        if !matches!(cluster.status, ClusterStatus::New | ClusterStatus::Destroyed) {
            return Err(self.invalid("remove", &cluster));
        }
        if let Ok(workspace) = Workspace::open(&self.config.cluster_dir(cluster_id)) {
            workspace.remove();
        }
        self.store.delete_cluster(cluster_id)?;
        info!(cluster = cluster_id, "cluster removed");
        Ok(())
    }

    // ── prepare / update ──────────────────────────────────────────

    /// Create the workspace, install credentials, render blueprint and
    /// bootstrap scripts. `new -> preparing -> configuring`.
    ///
    /// On failure the cluster returns to `new` and a workspace created by
    /// this call is removed.
    pub async fn prepare(&self, cluster_id: &str, credential: Option<&str>) -> LifecycleResult<()> {
        let _lease = self.lease(cluster_id)?;
        let mut cluster = self.cluster(cluster_id)?;
        cluster.transition(ClusterStatus::Preparing)?;
        self.save(&mut cluster)?;
        info!(cluster = cluster_id, "preparing cluster");

        let result = match Workspace::create(&self.config.cluster_dir(cluster_id)) {
            Ok(workspace) => {
                let result = self.populate_workspace(&cluster, &workspace, credential).await;
                if result.is_err() {
                    workspace.remove();
                }
                result
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                cluster.transition(ClusterStatus::Configuring)?;
                self.save(&mut cluster)?;
                info!(cluster = cluster_id, "cluster prepared");
                Ok(())
            }
            Err(e) => {
                error!(cluster = cluster_id, error = %e, "prepare failed");
                cluster.transition(ClusterStatus::New)?;
                self.save(&mut cluster)?;
                Err(e)
            }
        }
    }

    async fn populate_workspace(
        &self,
        cluster: &Cluster,
        workspace: &Workspace,
        explicit: Option<&str>,
    ) -> LifecycleResult<()> {
        let credential = match explicit {
            Some(detail) => CloudCredential {
                id: cluster
                    .cloud_credential
                    .clone()
                    .unwrap_or_else(|| format!("cluster-{}", cluster.id)),
                detail: detail.to_string(),
            },
            None => self.stored_credential(cluster)?,
        };
        workspace
            .install_credentials(
                self.engine.runner().as_ref(),
                &self.config.ssh_keygen(),
                &credential.detail,
            )
            .await?;
        self.render_assets(cluster, workspace, &credential).await
    }

    /// Re-render blueprint and bootstrap scripts in place.
    ///
    /// Allowed while nothing has been applied. Re-running without layout
    /// changes rewrites identical files.
    pub async fn update(&self, cluster_id: &str) -> LifecycleResult<()> {
        let _lease = self.lease(cluster_id)?;
        let cluster = self.cluster(cluster_id)?;
        if !matches!(cluster.status, ClusterStatus::Preparing | ClusterStatus::Configuring) {
            return Err(self.invalid("update", &cluster));
        }
        let workspace = Workspace::open(&self.config.cluster_dir(cluster_id))?;
        let credential = self.installed_credential(&cluster, &workspace)?;
        self.render_assets(&cluster, &workspace, &credential).await?;
        info!(cluster = cluster_id, "cluster assets updated");
        Ok(())
    }

    async fn render_assets(
        &self,
        cluster: &Cluster,
        workspace: &Workspace,
        credential: &CloudCredential,
    ) -> LifecycleResult<()> {
        self.blueprints.write(workspace.root(), cluster, credential)?;
        self.bootstrap.publish(cluster).await?;
        Ok(())
    }

    /// Replace mount points and partitions before provisioning starts.
    pub fn reconfigure(
        &self,
        cluster_id: &str,
        mount_points: Vec<MountPoint>,
        partitions: Vec<Partition>,
    ) -> LifecycleResult<()> {
        let _lease = self.lease(cluster_id)?;
        let mut cluster = self.cluster(cluster_id)?;
        if cluster.layout_locked() {
            return Err(LifecycleError::LayoutLocked(cluster_id.to_string()));
        }
        cluster.mount_points = mount_points;
        cluster.partitions = partitions;
        self.save(&mut cluster)?;
        info!(
            cluster = cluster_id,
            mounts = cluster.mount_points.len(),
            partitions = cluster.partitions.len(),
            "cluster layout replaced"
        );
        Ok(())
    }

    // ── start ─────────────────────────────────────────────────────

    /// Provision the cluster. `configuring -> initializing -> ready`.
    ///
    /// Any failure moves the cluster to `error` and is returned. A failed
    /// apply is followed by one compensating destroy before returning.
    pub async fn start(&self, cluster_id: &str) -> LifecycleResult<()> {
        let _lease = self.lease(cluster_id)?;
        let mut cluster = self.cluster(cluster_id)?;
        if cluster.status != ClusterStatus::Configuring {
            return Err(self.invalid("start", &cluster));
        }
        info!(cluster = cluster_id, "starting cluster");

        match self.provision(&mut cluster).await {
            Ok(()) => {
                info!(cluster = cluster_id, "cluster ready");
                Ok(())
            }
            Err(e) => {
                error!(cluster = cluster_id, status = %cluster.status, error = %e, "start failed");
                Err(self.mark_failed(&mut cluster, e))
            }
        }
    }

    /// Record `error` status and hand back `cause` whatever happens to the
    /// bookkeeping.
    fn mark_failed(&self, cluster: &mut Cluster, cause: LifecycleError) -> LifecycleError {
        let recorded = cluster
            .transition(ClusterStatus::Error)
            .map_err(LifecycleError::from)
            .and_then(|()| self.save(cluster));
        if let Err(e) = recorded {
            error!(cluster = %cluster.id, error = %e, "could not record start failure");
        }
        cause
    }

    async fn provision(&self, cluster: &mut Cluster) -> LifecycleResult<()> {
        let workspace = Workspace::open(&self.config.cluster_dir(&cluster.id))?;
        self.engine.compile(&workspace).await?;
        self.engine.initialize(&workspace, &cluster.cloud_id).await?;

        if let Err(e) = self.engine.apply(&workspace, &cluster.cloud_id).await {
            self.compensating_destroy(cluster, &workspace).await;
            return Err(e.into());
        }
        cluster.cloud_state = CloudState::Provisioned;
        cluster.transition(ClusterStatus::Initializing)?;
        self.save(cluster)?;

        let snapshot =
            StateSnapshot::load(&workspace.engine_dir(&cluster.cloud_id).join(TF_STATE_FILE))?;
        let reconciled = self.reconciler.reconcile(cluster, &snapshot)?;
        self.save(cluster)?;
        info!(
            cluster = %cluster.id,
            instances = reconciled.instance_count(),
            "instances reconciled"
        );

        let project = self.cluster_project(cluster, &workspace);
        let channel = self
            .permissions
            .sync(&cluster.id, project.as_deref(), &reconciled.service_accounts)
            .await?;
        cluster.c2_degraded = channel.is_degraded();

        self.configure_spack_install(cluster)?;

        cluster.transition(ClusterStatus::Ready)?;
        self.save(cluster)
    }

    async fn compensating_destroy(&self, cluster: &Cluster, workspace: &Workspace) {
        warn!(cluster = %cluster.id, "apply failed, destroying partially created resources");
        if let Err(e) = self.engine.destroy(workspace, &cluster.cloud_id).await {
            error!(cluster = %cluster.id, error = %e, "compensating destroy failed");
        }
    }

    fn configure_spack_install(&self, cluster: &mut Cluster) -> LifecycleResult<()> {
        match self.install_location(cluster, &cluster.spack_dir)? {
            Some(location) => {
                info!(
                    cluster = %cluster.id,
                    location = location.id,
                    export = %location.export_id,
                    path = %location.path,
                    "spack install location configured"
                );
                cluster.spack_install = Some(location.id);
            }
            None => {
                error!(
                    cluster = %cluster.id,
                    spack_dir = %cluster.spack_dir,
                    "no mount point matches the spack directory"
                );
            }
        }
        Ok(())
    }

    // ── stop ──────────────────────────────────────────────────────

    /// Tear the cluster down. `ready | error -> terminating -> destroyed`.
    ///
    /// A failed destroy leaves the cluster `terminating`; running `stop`
    /// again retries it. Destroy is skipped when nothing was ever applied
    /// (no state snapshot and never provisioned).
    pub async fn stop(&self, cluster_id: &str) -> LifecycleResult<()> {
        let _lease = self.lease(cluster_id)?;
        let mut cluster = self.cluster(cluster_id)?;
        let previous = cluster.cloud_state;
        cluster.transition(ClusterStatus::Terminating)?;
        cluster.cloud_state = CloudState::Destroying;
        self.save(&mut cluster)?;
        info!(cluster = cluster_id, "stopping cluster");

        let workspace = Workspace::open(&self.config.cluster_dir(cluster_id))?;
        let state_file = workspace.engine_dir(&cluster.cloud_id).join(TF_STATE_FILE);
        let applied = matches!(previous, CloudState::Provisioned | CloudState::Destroying)
            || state_file.is_file();
        if !applied {
            info!(cluster = cluster_id, "nothing was applied, skipping destroy");
        } else if let Err(e) = self.engine.destroy(&workspace, &cluster.cloud_id).await {
            error!(cluster = cluster_id, error = %e, "destroy failed, cluster left terminating");
            return Err(e.into());
        }

        let controllers = self
            .store
            .delete_instances_with_role(cluster_id, NodeRole::Controller)?;
        let logins = self.store.delete_instances_with_role(cluster_id, NodeRole::Login)?;
        cluster.controller_node = None;
        info!(cluster = cluster_id, controllers, logins, "instance records deleted");

        self.permissions.unwire_command_channel(cluster_id).await?;

        cluster.cloud_state = CloudState::Destroyed;
        cluster.transition(ClusterStatus::Destroyed)?;
        self.save(&mut cluster)?;
        info!(cluster = cluster_id, "cluster destroyed");
        Ok(())
    }

    // ── permissions ───────────────────────────────────────────────

    /// Re-run the storage and command-and-control grants for a ready cluster.
    pub async fn repair_permissions(&self, cluster_id: &str) -> LifecycleResult<ChannelStatus> {
        let _lease = self.lease(cluster_id)?;
        let mut cluster = self.cluster(cluster_id)?;
        if cluster.status != ClusterStatus::Ready {
            return Err(self.invalid("repair permissions of", &cluster));
        }
        let workspace = Workspace::open(&self.config.cluster_dir(cluster_id))?;
        let accounts = ServiceAccounts::from_instances(&self.store.list_instances_for_cluster(cluster_id)?);
        let project = self.cluster_project(&cluster, &workspace);

        let channel = self
            .permissions
            .sync(cluster_id, project.as_deref(), &accounts)
            .await?;
        cluster.c2_degraded = channel.is_degraded();
        self.save(&mut cluster)?;
        info!(cluster = cluster_id, degraded = cluster.c2_degraded, "permissions repaired");
        Ok(channel)
    }

    // ── command and control ───────────────────────────────────────

    /// Publish `command` to a ready cluster and register for replies about
    /// `subject`.
    pub async fn send_command(
        &self,
        command: C2Command,
        subject: C2Subject,
    ) -> LifecycleResult<mpsc::UnboundedReceiver<C2Response>> {
        let cluster = self.cluster(&command.cluster_id)?;
        if cluster.status != ClusterStatus::Ready {
            return Err(self.invalid("send commands to", &cluster));
        }
        if cluster.c2_degraded {
            return Err(LifecycleError::ChannelDegraded(cluster.id));
        }

        let message = command.to_json()?;
        let replies = self.responses.register(&cluster.id, subject.clone());
        if let Err(e) = self.pubsub.publish(&self.channel.topic_path(), &message).await {
            self.responses.unregister(&cluster.id, &subject);
            return Err(e.into());
        }
        info!(cluster = %cluster.id, command = ?command.command, "command published");
        Ok(replies)
    }

    /// Ask a ready cluster's controller to answer.
    pub async fn ping(&self, cluster_id: &str) -> LifecycleResult<mpsc::UnboundedReceiver<C2Response>> {
        let command = C2Command::new(C2CommandKind::Ping, cluster_id).with("sent_at", now_secs());
        self.send_command(command, C2Subject::Cluster).await
    }

    /// Hand a reply pulled from `cluster_id`'s subscription to whoever waits
    /// for it. False when nobody does. A reply naming another cluster is
    /// logged and still routed by what it names.
    pub fn deliver_response(&self, cluster_id: &str, payload: &[u8]) -> LifecycleResult<bool> {
        let response = C2Response::parse(payload)?;
        for mismatch in response.check_origin(cluster_id, &response.subject) {
            warn!(cluster = cluster_id, ?mismatch, "response origin mismatch");
        }
        Ok(self.responses.deliver(response))
    }

    // ── install locations ─────────────────────────────────────────

    /// Install location for an application at `path` on the cluster's mounts.
    /// `None` when no mount point covers `path`.
    pub fn resolve_install_location(
        &self,
        cluster_id: &str,
        path: &str,
    ) -> LifecycleResult<Option<ApplicationInstallationLocation>> {
        let cluster = self.cluster(cluster_id)?;
        let location = self.install_location(&cluster, path)?;
        if location.is_none() {
            warn!(cluster = cluster_id, path, "no mount point matches install path");
        }
        Ok(location)
    }

    fn install_location(
        &self,
        cluster: &Cluster,
        path: &str,
    ) -> LifecycleResult<Option<ApplicationInstallationLocation>> {
        let Some(mount) = resolve_mount(path, &cluster.mount_points) else {
            return Ok(None);
        };
        let Some(relative) = relative_to_mount(path, mount) else {
            return Ok(None);
        };
        Ok(Some(
            self.store
                .lookup_or_create_install_location(&mount.export.id, &relative)?,
        ))
    }

    // ── helpers ───────────────────────────────────────────────────

    fn lease(&self, cluster_id: &str) -> LifecycleResult<ClusterLease> {
        self.leases
            .try_acquire(cluster_id)
            .ok_or_else(|| LifecycleError::Busy(cluster_id.to_string()))
    }

    fn save(&self, cluster: &mut Cluster) -> LifecycleResult<()> {
        cluster.updated_at = now_secs();
        self.store.put_cluster(cluster)?;
        Ok(())
    }

    fn invalid(&self, operation: &'static str, cluster: &Cluster) -> LifecycleError {
        LifecycleError::InvalidOperation {
            operation,
            cluster_id: cluster.id.clone(),
            status: cluster.status,
        }
    }

    fn stored_credential(&self, cluster: &Cluster) -> LifecycleResult<CloudCredential> {
        let id = cluster
            .cloud_credential
            .as_deref()
            .ok_or_else(|| LifecycleError::NoCredential(cluster.id.clone()))?;
        self.store
            .get_credential(id)?
            .ok_or_else(|| LifecycleError::NoCredential(cluster.id.clone()))
    }

    /// The credential installed in the workspace during `prepare`.
    fn installed_credential(
        &self,
        cluster: &Cluster,
        workspace: &Workspace,
    ) -> LifecycleResult<CloudCredential> {
        let detail = std::fs::read_to_string(workspace.credentials_path())
            .map_err(|_| LifecycleError::NoCredential(cluster.id.clone()))?;
        Ok(CloudCredential {
            id: cluster
                .cloud_credential
                .clone()
                .unwrap_or_else(|| format!("cluster-{}", cluster.id)),
            detail,
        })
    }

    fn cluster_project(&self, cluster: &Cluster, workspace: &Workspace) -> Option<String> {
        self.installed_credential(cluster, workspace)
            .ok()
            .and_then(|c| project_id_from_detail(&c.detail))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
