//! Per-role startup scripts published to object storage.
//!
//! Templates are minijinja sources. The built-in ones are compiled into the
//! binary; a `templates_dir` containing `bootstrap_{role}.sh` overrides the
//! matching role.

use std::path::Path;
use std::sync::Arc;

use minijinja::{Environment, UndefinedBehavior, context};
use tracing::{debug, error, info};

use forge_cloud::{C2Channel, ObjectStore};
use forge_core::BootstrapRole;
use forge_state::Cluster;

use crate::error::{ProvisionError, ProvisionResult};

const CONTROLLER_TEMPLATE: &str = include_str!("../templates/bootstrap_controller.sh");
const LOGIN_TEMPLATE: &str = include_str!("../templates/bootstrap_login.sh");
const COMPUTE_TEMPLATE: &str = include_str!("../templates/bootstrap_compute.sh");

fn builtin(role: BootstrapRole) -> &'static str {
    match role {
        BootstrapRole::Controller => CONTROLLER_TEMPLATE,
        BootstrapRole::Login => LOGIN_TEMPLATE,
        BootstrapRole::Compute => COMPUTE_TEMPLATE,
    }
}

pub struct BootstrapPublisher {
    env: Environment<'static>,
    bucket: String,
    channel: C2Channel,
    objects: Arc<dyn ObjectStore>,
}

impl BootstrapPublisher {
    pub fn new(bucket: &str, channel: C2Channel, objects: Arc<dyn ObjectStore>) -> ProvisionResult<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        for role in BootstrapRole::ALL {
            env.add_template(template_name(role), builtin(role))
                .map_err(|e| template_error(role, e))?;
        }
        Ok(Self {
            env,
            bucket: bucket.to_string(),
            channel,
            objects,
        })
    }

    /// Replace built-in templates with any `bootstrap_{role}.sh` found in `dir`.
    pub fn with_templates_dir(mut self, dir: &Path) -> ProvisionResult<Self> {
        for role in BootstrapRole::ALL {
            let path = dir.join(role.file_name());
            if !path.is_file() {
                continue;
            }
            let source = std::fs::read_to_string(&path)?;
            self.env
                .add_template_owned(template_name(role), source)
                .map_err(|e| template_error(role, e))?;
            debug!(template = %path.display(), "using template override");
        }
        Ok(self)
    }

    /// Render one role's script for `cluster`.
    pub fn render(&self, cluster: &Cluster, role: BootstrapRole) -> ProvisionResult<String> {
        let template = self
            .env
            .get_template(template_name(role))
            .map_err(|e| template_error(role, e))?;
        template
            .render(context! {
                server_bucket => &self.bucket,
                cluster => cluster,
                spack_dir => &cluster.spack_dir,
                c2_topic => self.channel.topic_path(),
                c2_subscription => self.channel.subscription_path(&cluster.id),
            })
            .map_err(|e| template_error(role, e))
    }

    /// Render and upload all three roles.
    ///
    /// Every role is attempted; any failure fails the whole step with
    /// one error listing each failed role.
    pub async fn publish(&self, cluster: &Cluster) -> ProvisionResult<()> {
        let mut failures = Vec::new();
        for role in BootstrapRole::ALL {
            let path = role.object_path(&cluster.id);
            let result = match self.render(cluster, role) {
                Ok(script) => self
                    .objects
                    .upload(&self.bucket, &path, &script)
                    .await
                    .map_err(ProvisionError::from),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => debug!(cluster = %cluster.id, %role, object = %path, "bootstrap published"),
                Err(e) => {
                    error!(cluster = %cluster.id, %role, error = %e, "bootstrap publish failed");
                    failures.push(format!("{role}: {e}"));
                }
            }
        }
        if !failures.is_empty() {
            return Err(ProvisionError::Publish(failures));
        }
        info!(cluster = %cluster.id, bucket = %self.bucket, "bootstrap scripts published");
        Ok(())
    }
}

fn template_name(role: BootstrapRole) -> &'static str {
    match role {
        BootstrapRole::Controller => "bootstrap_controller.sh",
        BootstrapRole::Login => "bootstrap_login.sh",
        BootstrapRole::Compute => "bootstrap_compute.sh",
    }
}

fn template_error(role: BootstrapRole, e: minijinja::Error) -> ProvisionError {
    ProvisionError::Template {
        name: template_name(role).to_string(),
        message: e.to_string(),
    }
}
