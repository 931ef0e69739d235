//! Blueprint compiler and infrastructure engine invocations.
//!
//! Pipeline for a cluster workspace:
//! 1. `ghpc create cluster.yaml` in the workspace root
//! 2. `terraform init` / `validate` / `plan` in `{cloud_id}/primary`
//! 3. `terraform apply`, later `terraform destroy`
//!
//! Credentials reach terraform only through the environment of the
//! individual invocation. Logs land next to where each tool runs, named
//! `{tool}_{command}_log.stdout|stderr`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use forge_core::ForgeConfig;
use forge_core::layout::{BLUEPRINT_FILE, CREDENTIALS_ENV};

use crate::error::{ProvisionError, ProvisionResult};
use crate::runner::{CommandRunner, Invocation};
use crate::workspace::Workspace;

/// Which external step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Keygen,
    Compile,
    Init,
    Validate,
    Plan,
    Apply,
    Destroy,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Keygen => "keygen",
            Stage::Compile => "compile",
            Stage::Init => "init",
            Stage::Validate => "validate",
            Stage::Plan => "plan",
            Stage::Apply => "apply",
            Stage::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ProvisioningEngine {
    runner: Arc<dyn CommandRunner>,
    compiler: PathBuf,
    terraform: PathBuf,
}

impl ProvisioningEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, compiler: &Path, terraform: &Path) -> Self {
        Self {
            runner,
            compiler: compiler.to_path_buf(),
            terraform: terraform.to_path_buf(),
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &ForgeConfig) -> Self {
        Self::new(runner, &config.blueprint_compiler(), &config.terraform())
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    /// Compile the workspace blueprint into an engine directory.
    pub async fn compile(&self, workspace: &Workspace) -> ProvisionResult<()> {
        info!(workspace = %workspace.root().display(), "compiling blueprint");
        let invocation = Invocation::new(&self.compiler, workspace.root(), "ghpc_create_log")
            .arg("create")
            .arg(BLUEPRINT_FILE);
        self.run(Stage::Compile, &invocation, true).await
    }

    /// `init`, `validate` and `plan`. Failures carry the captured stderr.
    pub async fn initialize(&self, workspace: &Workspace, cloud_id: &str) -> ProvisionResult<()> {
        let dir = workspace.engine_dir(cloud_id);
        info!(dir = %dir.display(), "initializing terraform");
        let init = self.terraform_call(&dir, "init").arg("-input=false");
        self.run(Stage::Init, &init, true).await?;

        let validate = self.with_credentials(self.terraform_call(&dir, "validate"), workspace);
        self.run(Stage::Validate, &validate, true).await?;

        info!(dir = %dir.display(), "planning");
        let plan = self
            .with_credentials(self.terraform_call(&dir, "plan"), workspace)
            .arg("-input=false");
        self.run(Stage::Plan, &plan, true).await
    }

    /// `apply`. Operators inspect the log files for failure detail.
    pub async fn apply(&self, workspace: &Workspace, cloud_id: &str) -> ProvisionResult<()> {
        let dir = workspace.engine_dir(cloud_id);
        info!(dir = %dir.display(), "applying");
        let apply = self
            .with_credentials(self.terraform_call(&dir, "apply"), workspace)
            .args(["-input=false", "-auto-approve"]);
        self.run(Stage::Apply, &apply, false).await
    }

    /// `destroy`. Operators inspect the log files for failure detail.
    pub async fn destroy(&self, workspace: &Workspace, cloud_id: &str) -> ProvisionResult<()> {
        let dir = workspace.engine_dir(cloud_id);
        info!(dir = %dir.display(), "destroying");
        let destroy = self
            .with_credentials(self.terraform_call(&dir, "destroy"), workspace)
            .arg("-auto-approve");
        self.run(Stage::Destroy, &destroy, false).await
    }

    fn terraform_call(&self, dir: &Path, command: &str) -> Invocation {
        Invocation::new(&self.terraform, dir, &format!("terraform_{command}_log")).arg(command)
    }

    fn with_credentials(&self, invocation: Invocation, workspace: &Workspace) -> Invocation {
        invocation.env(CREDENTIALS_ENV, workspace.credentials_path().display().to_string())
    }

    async fn run(&self, stage: Stage, invocation: &Invocation, keep_stderr: bool) -> ProvisionResult<()> {
        let outcome = self.runner.run(invocation).await?;
        if outcome.is_success() {
            return Ok(());
        }
        error!(
            %stage,
            exit_code = outcome.exit_code,
            log = %invocation.stderr_log.display(),
            "external command failed"
        );
        Err(ProvisionError::Command {
            stage,
            exit_code: outcome.exit_code,
            stderr: keep_stderr.then_some(outcome.stderr),
        })
    }
}
