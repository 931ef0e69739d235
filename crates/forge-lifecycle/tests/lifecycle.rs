//! Cluster lifecycle integration tests.
//!
//! Drives prepare / start / stop against an in-memory cloud, an in-memory
//! entity store and a scripted command runner that stands in for
//! ssh-keygen, the blueprint compiler and terraform. The runner writes the
//! files those tools would produce (keypair, engine directory, state
//! snapshot) so every step after an invocation sees realistic output.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use forge_cloud::MemoryCloud;
use forge_core::ForgeConfig;
use forge_lifecycle::{CloudServices, ClusterLifecycle, Job, JobDispatcher, LifecycleError};
use forge_provision::{ChannelStatus, CommandRunner, Invocation, Outcome, ProvisionError, Stage};
use forge_state::*;

const CLOUD_ID: &str = "hpc-1";
const SUBSCRIPTION: &str = "projects/front-proj/subscriptions/forge-c2-cluster-1";

/// Pretends to be every external tool.
struct ScriptedRunner {
    calls: Mutex<Vec<Invocation>>,
    fail_on: Mutex<Vec<&'static str>>,
    login_nodes: usize,
}

impl ScriptedRunner {
    fn new(login_nodes: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(Vec::new()),
            login_nodes,
        }
    }

    fn fail_on(&self, commands: &[&'static str]) {
        *self.fail_on.lock().unwrap() = commands.to_vec();
    }

    /// Subcommands in invocation order (`create`, `init`, `apply`, ...).
    fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|i| !is_keygen(i))
            .filter_map(|i| i.subcommand().map(str::to_string))
            .collect()
    }

    fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    fn state_document(&self) -> Value {
        let node = |name: String, ip: String, sa: &str| {
            json!({"attributes": {
                "name": name,
                "machine_type": "n2-standard-2",
                "network_interface": [{"network_ip": ip, "access_config": [{"nat_ip": "34.1.1.1"}]}],
                "service_account": [{"email": sa}]
            }})
        };
        let logins: Vec<Value> = (0..self.login_nodes)
            .map(|i| node(format!("{CLOUD_ID}-login{i}"), format!("10.0.0.{}", 10 + i), "login@proj-1.iam"))
            .collect();
        json!({
            "version": 4,
            "resources": [
                {
                    "module": "module.slurm_controller.module.slurm_cluster_controller",
                    "name": "controller_node",
                    "instances": [node(format!("{CLOUD_ID}-controller"), "10.0.0.2".into(), "ctrl@proj-1.iam")]
                },
                {
                    "module": "module.slurm_login.module.slurm_cluster_login_node",
                    "name": "login_node",
                    "instances": logins
                }
            ]
        })
    }
}

fn is_keygen(invocation: &Invocation) -> bool {
    invocation.program.ends_with("ssh-keygen")
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<Outcome> {
        self.calls.lock().unwrap().push(invocation.clone());

        if is_keygen(invocation) {
            let key = PathBuf::from(&invocation.args[3]);
            std::fs::write(&key, "PRIVATE KEY")?;
            std::fs::write(key.with_extension("pub"), "ssh-rsa AAAA forge@mgmt")?;
            return Ok(Outcome::success());
        }

        let command = invocation.subcommand().unwrap_or_default();
        if self.fail_on.lock().unwrap().iter().any(|c| *c == command) {
            // a failed apply still leaves a snapshot of whatever it created
            if command == "apply" {
                std::fs::write(invocation.cwd.join("terraform.tfstate"), r#"{"version":4,"resources":[]}"#)?;
            }
            return Ok(Outcome::failure(1, &format!("Error: {command} exploded")));
        }
        match command {
            "create" => {
                std::fs::create_dir_all(invocation.cwd.join(CLOUD_ID).join("primary"))?;
            }
            "apply" => {
                std::fs::write(
                    invocation.cwd.join("terraform.tfstate"),
                    self.state_document().to_string(),
                )?;
            }
            _ => {}
        }
        Ok(Outcome::success())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    config: ForgeConfig,
    store: StateStore,
    cloud: Arc<MemoryCloud>,
    runner: Arc<ScriptedRunner>,
    lifecycle: Arc<ClusterLifecycle>,
}

impl Harness {
    fn new(login_nodes_in_state: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ForgeConfig::scaffold(&dir.path().join("forge"), "forge-bucket", "front-proj");
        let store = StateStore::open_in_memory().unwrap();
        let cloud = Arc::new(MemoryCloud::new());
        let runner = Arc::new(ScriptedRunner::new(login_nodes_in_state));

        store
            .put_credential(&CloudCredential {
                id: "cred-1".into(),
                detail: json!({"type": "service_account", "project_id": "proj-1"}).to_string(),
            })
            .unwrap();
        store
            .put_instance_type(&InstanceType {
                name: "n2-standard-2".into(),
                cpus: Some(2),
                memory_mb: Some(8192),
            })
            .unwrap();
        store.put_cluster(&test_cluster()).unwrap();

        let lifecycle = ClusterLifecycle::new(
            config.clone(),
            store.clone(),
            runner.clone(),
            CloudServices::memory(cloud.clone()),
        )
        .unwrap();

        Self {
            _dir: dir,
            config,
            store,
            cloud,
            runner,
            lifecycle: Arc::new(lifecycle),
        }
    }

    fn cluster(&self) -> Cluster {
        self.store.get_cluster("1").unwrap().unwrap()
    }

    fn workspace(&self) -> PathBuf {
        self.config.cluster_dir("1")
    }
}

fn test_cluster() -> Cluster {
    let mut cluster = Cluster::new(
        "1",
        "demo",
        CLOUD_ID,
        "us-central1",
        "us-central1-a",
        SubnetRef {
            vpc_cloud_id: "hpc-vpc".into(),
            cloud_id: "hpc-subnet".into(),
        },
    );
    cluster.cloud_credential = Some("cred-1".into());
    cluster.num_login_nodes = 2;
    cluster.mount_points = vec![MountPoint {
        export: FilesystemExport {
            id: "fs-1".into(),
            server_name: "10.0.0.50".into(),
            export_name: "/opt/cluster".into(),
        },
        mount_path: "/opt/cluster".into(),
        mount_options: "defaults,hard,intr".into(),
        fs_type: "nfs".into(),
        mount_order: 0,
    }];
    cluster.partitions = vec![partition("batch", "n2-standard-2"), partition("gpu", "a2-highgpu-1g")];
    cluster
}

fn partition(name: &str, machine_type: &str) -> Partition {
    Partition {
        name: name.into(),
        machine_type: machine_type.into(),
        max_node_count: 4,
        enable_placement: false,
        enable_hyperthreads: false,
        enable_node_reuse: true,
        image: None,
    }
}

fn exists(path: &Path) -> bool {
    path.exists()
}

#[tokio::test]
async fn test_end_to_end_prepare_start_stop() {
    let h = Harness::new(2);

    // prepare
    h.lifecycle.prepare("1", None).await.unwrap();
    let ws = h.workspace();
    assert!(exists(&ws.join("cloud_credentials")));
    assert!(exists(&ws.join(".ssh/id_rsa")));
    assert!(exists(&ws.join(".ssh/id_rsa.pub")));
    assert!(exists(&ws.join("cluster.yaml")));
    assert_eq!(h.cluster().status, ClusterStatus::Configuring);
    assert_eq!(h.cloud.object_count(), 3);
    assert!(h.cloud.object("forge-bucket", "clusters/1/bootstrap_controller.sh").is_some());

    // start
    h.lifecycle.start("1").await.unwrap();
    assert_eq!(h.runner.commands(), vec!["create", "init", "validate", "plan", "apply"]);

    let cluster = h.cluster();
    assert_eq!(cluster.status, ClusterStatus::Ready);
    assert_eq!(cluster.cloud_state, CloudState::Provisioned);
    assert_eq!(cluster.controller_node.as_deref(), Some("1:controller-0"));
    assert!(!cluster.c2_degraded);

    let instances = h.store.list_instances_for_cluster("1").unwrap();
    assert_eq!(instances.len(), 3);
    assert_eq!(h.store.list_login_nodes("1").unwrap().len(), 2);
    let controller = h.store.get_instance("1:controller-0").unwrap().unwrap();
    assert_eq!(controller.instance_type.as_deref(), Some("n2-standard-2"));
    assert_eq!(controller.internal_ip.as_deref(), Some("10.0.0.2"));

    // permissions
    assert_eq!(h.cloud.bucket_members("forge-bucket", "roles/storage.objectAdmin").len(), 2);
    assert_eq!(
        h.cloud.subscription_members(SUBSCRIPTION, "roles/pubsub.subscriber"),
        vec!["serviceAccount:ctrl@proj-1.iam"]
    );

    // spack install location: /opt/cluster/spack on the /opt/cluster mount
    let install = h
        .store
        .get_install_location(cluster.spack_install.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(install.export_id, "fs-1");
    assert_eq!(install.path, "spack");

    // stop
    h.lifecycle.stop("1").await.unwrap();
    let cluster = h.cluster();
    assert_eq!(cluster.status, ClusterStatus::Destroyed);
    assert_eq!(cluster.cloud_state, CloudState::Destroyed);
    assert_eq!(cluster.controller_node, None);
    assert!(h.store.list_instances_for_cluster("1").unwrap().is_empty());
    assert!(!h.cloud.has_subscription(SUBSCRIPTION));
    assert_eq!(h.runner.count("destroy"), 1);
}

#[tokio::test]
async fn test_apply_failure_runs_one_compensating_destroy() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    h.runner.fail_on(&["apply"]);

    let err = h.lifecycle.start("1").await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Provision(ProvisionError::Command { stage: Stage::Apply, exit_code: 1, .. })
    ));
    assert_eq!(h.runner.commands(), vec!["create", "init", "validate", "plan", "apply", "destroy"]);

    let cluster = h.cluster();
    assert_eq!(cluster.status, ClusterStatus::Error);
    assert_eq!(cluster.cloud_state, CloudState::NotProvisioned);
    assert!(h.store.list_instances_for_cluster("1").unwrap().is_empty());

    // the operator can still tear down from error
    h.runner.fail_on(&[]);
    h.lifecycle.stop("1").await.unwrap();
    assert_eq!(h.cluster().status, ClusterStatus::Destroyed);
    assert_eq!(h.runner.count("destroy"), 2);
}

#[tokio::test]
async fn test_failed_compensating_destroy_still_returns_apply_error() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    h.runner.fail_on(&["apply", "destroy"]);

    let err = h.lifecycle.start("1").await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Provision(ProvisionError::Command { stage: Stage::Apply, .. })
    ));
    assert_eq!(h.runner.count("destroy"), 1);
    assert_eq!(h.cluster().status, ClusterStatus::Error);
}

#[tokio::test]
async fn test_plan_failure_does_not_destroy() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    h.runner.fail_on(&["plan"]);

    let err = h.lifecycle.start("1").await.unwrap_err();
    match err {
        LifecycleError::Provision(ProvisionError::Command { stage, stderr, .. }) => {
            assert_eq!(stage, Stage::Plan);
            assert_eq!(stderr.as_deref(), Some("Error: plan exploded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.runner.count("destroy"), 0);
    assert_eq!(h.cluster().status, ClusterStatus::Error);
}

#[tokio::test]
async fn test_stop_after_compile_failure_skips_destroy() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    h.runner.fail_on(&["create"]);

    let err = h.lifecycle.start("1").await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Provision(ProvisionError::Command { stage: Stage::Compile, .. })
    ));
    assert_eq!(h.cluster().status, ClusterStatus::Error);
    assert!(!exists(&h.workspace().join(CLOUD_ID)));

    h.runner.fail_on(&[]);
    h.lifecycle.stop("1").await.unwrap();
    let cluster = h.cluster();
    assert_eq!(cluster.status, ClusterStatus::Destroyed);
    assert_eq!(cluster.cloud_state, CloudState::Destroyed);
    assert_eq!(h.runner.count("destroy"), 0);
}

#[tokio::test]
async fn test_stop_after_init_failure_skips_destroy() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    h.runner.fail_on(&["init"]);

    h.lifecycle.start("1").await.unwrap_err();
    assert_eq!(h.cluster().status, ClusterStatus::Error);
    assert!(exists(&h.workspace().join(CLOUD_ID).join("primary")));

    h.runner.fail_on(&[]);
    h.lifecycle.stop("1").await.unwrap();
    assert_eq!(h.cluster().status, ClusterStatus::Destroyed);
    assert_eq!(h.runner.count("destroy"), 0);
}

#[tokio::test]
async fn test_login_count_mismatch_still_ready() {
    let h = Harness::new(1);
    h.lifecycle.prepare("1", None).await.unwrap();
    h.lifecycle.start("1").await.unwrap();

    assert_eq!(h.cluster().status, ClusterStatus::Ready);
    assert_eq!(h.store.list_login_nodes("1").unwrap().len(), 1);
    assert_eq!(h.store.list_instances_for_cluster("1").unwrap().len(), 2);
}

#[tokio::test]
async fn test_existing_workspace_rejects_prepare() {
    let h = Harness::new(2);
    std::fs::create_dir_all(h.workspace()).unwrap();
    std::fs::write(h.workspace().join("keep.txt"), "operator data").unwrap();

    let err = h.lifecycle.prepare("1", None).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Provision(ProvisionError::WorkspaceExists(_))));
    assert_eq!(h.cluster().status, ClusterStatus::New);
    assert!(exists(&h.workspace().join("keep.txt")));
}

#[tokio::test]
async fn test_failed_prepare_removes_workspace() {
    let h = Harness::new(2);
    h.cloud.fail_upload("clusters/1/bootstrap_compute.sh");

    let err = h.lifecycle.prepare("1", None).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Provision(ProvisionError::Publish(_))));
    assert_eq!(h.cluster().status, ClusterStatus::New);
    assert!(!exists(&h.workspace()));
}

#[tokio::test]
async fn test_prepare_without_credential() {
    let h = Harness::new(2);
    let mut cluster = h.cluster();
    cluster.cloud_credential = None;
    h.store.put_cluster(&cluster).unwrap();

    let err = h.lifecycle.prepare("1", None).await.unwrap_err();
    assert!(matches!(err, LifecycleError::NoCredential(_)));
    assert_eq!(h.cluster().status, ClusterStatus::New);

    // an explicit credential blob is enough
    let blob = json!({"project_id": "proj-2"}).to_string();
    h.lifecycle.prepare("1", Some(&blob)).await.unwrap();
    let installed = std::fs::read_to_string(h.workspace().join("cloud_credentials")).unwrap();
    assert_eq!(installed, blob);
    let yaml = std::fs::read_to_string(h.workspace().join("cluster.yaml")).unwrap();
    assert!(yaml.contains("project_id: proj-2"));

    // rendering later uses the installed credential, not the missing stored one
    let rendered = h.lifecycle.render_blueprint("1").unwrap();
    assert_eq!(rendered, yaml);
}

#[tokio::test]
async fn test_update_is_idempotent() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    let first = std::fs::read_to_string(h.workspace().join("cluster.yaml")).unwrap();

    h.lifecycle.update("1").await.unwrap();
    h.lifecycle.update("1").await.unwrap();
    let again = std::fs::read_to_string(h.workspace().join("cluster.yaml")).unwrap();
    assert_eq!(first, again);
    assert_eq!(h.cluster().status, ClusterStatus::Configuring);
}

#[tokio::test]
async fn test_update_after_start_is_rejected() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    h.lifecycle.start("1").await.unwrap();

    let err = h.lifecycle.update("1").await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidOperation { status: ClusterStatus::Ready, .. }));
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let h = Harness::new(2);
    // start before prepare
    let err = h.lifecycle.start("1").await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidOperation { status: ClusterStatus::New, .. }));
    // stop before anything was provisioned
    let err = h.lifecycle.stop("1").await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidTransition(_)));

    h.lifecycle.prepare("1", None).await.unwrap();
    let err = h.lifecycle.prepare("1", None).await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidTransition(_)));
    assert!(h.runner.commands().is_empty());
}

#[tokio::test]
async fn test_unknown_cluster() {
    let h = Harness::new(2);
    let err = h.lifecycle.start("404").await.unwrap_err();
    assert!(matches!(err, LifecycleError::ClusterNotFound(id) if id == "404"));
}

#[tokio::test]
async fn test_layout_locked_after_start() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();

    let mounts = h.cluster().mount_points;
    h.lifecycle
        .reconfigure("1", mounts.clone(), vec![partition("only", "n2-standard-2")])
        .unwrap();
    assert_eq!(h.cluster().partitions.len(), 1);

    h.lifecycle.start("1").await.unwrap();
    let err = h
        .lifecycle
        .reconfigure("1", mounts, vec![partition("late", "n2-standard-2")])
        .unwrap_err();
    assert!(matches!(err, LifecycleError::LayoutLocked(_)));
    assert_eq!(h.cluster().partitions[0].name, "only");
}

#[tokio::test]
async fn test_denied_channel_grant_degrades_then_repairs() {
    let h = Harness::new(2);
    h.cloud.deny_subscription_grants(true);
    h.lifecycle.prepare("1", None).await.unwrap();
    h.lifecycle.start("1").await.unwrap();

    let cluster = h.cluster();
    assert_eq!(cluster.status, ClusterStatus::Ready);
    assert!(cluster.c2_degraded);
    assert!(h.cloud.has_subscription(SUBSCRIPTION));

    h.cloud.deny_subscription_grants(false);
    let status = h.lifecycle.repair_permissions("1").await.unwrap();
    assert_eq!(status, ChannelStatus::Wired);
    assert!(!h.cluster().c2_degraded);
    assert_eq!(
        h.cloud.subscription_members(SUBSCRIPTION, "roles/pubsub.subscriber"),
        vec!["serviceAccount:ctrl@proj-1.iam"]
    );

    // repeat is harmless
    h.lifecycle.repair_permissions("1").await.unwrap();
    assert_eq!(h.cloud.bucket_binding_count(), 2);
}

#[tokio::test]
async fn test_failed_destroy_leaves_terminating_and_can_be_retried() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    h.lifecycle.start("1").await.unwrap();

    h.runner.fail_on(&["destroy"]);
    let err = h.lifecycle.stop("1").await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Provision(ProvisionError::Command { stage: Stage::Destroy, .. })
    ));
    let cluster = h.cluster();
    assert_eq!(cluster.status, ClusterStatus::Terminating);
    assert_eq!(cluster.cloud_state, CloudState::Destroying);
    assert_eq!(h.store.list_instances_for_cluster("1").unwrap().len(), 3);
    assert_eq!(h.runner.count("destroy"), 1);

    h.runner.fail_on(&[]);
    h.lifecycle.stop("1").await.unwrap();
    assert_eq!(h.cluster().status, ClusterStatus::Destroyed);
    assert!(h.store.list_instances_for_cluster("1").unwrap().is_empty());
}

#[tokio::test]
async fn test_install_location_lookup_is_idempotent() {
    let h = Harness::new(2);
    let first = h
        .lifecycle
        .resolve_install_location("1", "/opt/cluster/apps/gromacs")
        .unwrap()
        .unwrap();
    let second = h
        .lifecycle
        .resolve_install_location("1", "/opt/cluster/apps/gromacs")
        .unwrap()
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.path, "apps/gromacs");
    assert_eq!(h.store.list_install_locations().unwrap().len(), 1);

    assert!(h.lifecycle.resolve_install_location("1", "/home/user").unwrap().is_none());
}

#[tokio::test]
async fn test_render_blueprint_matches_written_file() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    let rendered = h.lifecycle.render_blueprint("1").unwrap();
    let written = std::fs::read_to_string(h.workspace().join("cluster.yaml")).unwrap();
    assert_eq!(rendered, written);
}

#[tokio::test]
async fn test_dispatcher_single_flight() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    let dispatcher = JobDispatcher::new(Arc::clone(&h.lifecycle));

    let handle = dispatcher.submit(Job::Start("1".into())).unwrap();
    assert!(dispatcher.is_running("1"));
    let err = dispatcher.submit(Job::Stop("1".into())).unwrap_err();
    assert!(matches!(err, LifecycleError::Busy(id) if id == "1"));

    handle.await.unwrap().unwrap();
    assert!(!dispatcher.is_running("1"));
    assert_eq!(h.cluster().status, ClusterStatus::Ready);

    dispatcher.submit(Job::Stop("1".into())).unwrap().await.unwrap().unwrap();
    assert_eq!(h.cluster().status, ClusterStatus::Destroyed);
}

#[tokio::test]
async fn test_remove_only_new_or_destroyed_clusters() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();

    let err = h.lifecycle.remove("1").unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidOperation { operation: "remove", .. }));
    assert_eq!(h.lifecycle.clusters().unwrap().len(), 1);

    h.lifecycle.start("1").await.unwrap();
    h.lifecycle.stop("1").await.unwrap();
    h.lifecycle.remove("1").unwrap();
    assert!(h.lifecycle.clusters().unwrap().is_empty());
    assert!(!exists(&h.workspace()));
    assert!(matches!(h.lifecycle.cluster("1"), Err(LifecycleError::ClusterNotFound(_))));
}

#[tokio::test]
async fn test_ping_publishes_and_routes_reply() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    h.lifecycle.start("1").await.unwrap();

    let mut replies = h.lifecycle.ping("1").await.unwrap();
    let published = h.cloud.published("projects/front-proj/topics/forge-c2");
    assert_eq!(published.len(), 1);
    let message: Value = serde_json::from_str(&published[0]).unwrap();
    assert_eq!(message["command"], "PING");
    assert_eq!(message["cluster_id"], "1");
    assert!(message["data"]["sent_at"].is_u64());

    let payload = json!({"cluster_id": 1, "status": "r"}).to_string();
    assert!(h.lifecycle.deliver_response("1", payload.as_bytes()).unwrap());
    let reply = replies.recv().await.unwrap();
    assert_eq!(reply.status, "r");

    // nobody waits for another cluster, mismatched origin is not fatal
    let stray = json!({"cluster_id": "2", "status": "r"}).to_string();
    assert!(!h.lifecycle.deliver_response("1", stray.as_bytes()).unwrap());

    let garbled = h.lifecycle.deliver_response("1", b"{\"status\": \"r\"}");
    assert!(matches!(garbled, Err(LifecycleError::Cloud(_))));
}

#[tokio::test]
async fn test_ping_requires_a_ready_wired_cluster() {
    let h = Harness::new(2);
    h.lifecycle.prepare("1", None).await.unwrap();
    let err = h.lifecycle.ping("1").await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidOperation { .. }));

    h.cloud.deny_subscription_grants(true);
    h.lifecycle.start("1").await.unwrap();
    let err = h.lifecycle.ping("1").await.unwrap_err();
    assert!(matches!(err, LifecycleError::ChannelDegraded(id) if id == "1"));
    assert!(h.cloud.published("projects/front-proj/topics/forge-c2").is_empty());
}
