//! Per-cluster workspace directories.
//!
//! A workspace holds the blueprint, the installed credential, the cluster's
//! SSH keypair, the compiled engine directory and every invocation log.
//! Creating one that already exists is an error; re-runs go through
//! `update` against the existing directory instead.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use forge_core::layout::{self, BLUEPRINT_FILE, CREDENTIALS_FILE};

use crate::engine::Stage;
use crate::error::{ProvisionError, ProvisionResult};
use crate::runner::{CommandRunner, Invocation};

const SSH_DIR: &str = ".ssh";
const KEY_FILE: &str = "id_rsa";
const KEY_COMMENT: &str = "forge@mgmt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create the directory. Fails with `WorkspaceExists` if it is already there.
    pub fn create(root: &Path) -> ProvisionResult<Self> {
        if root.exists() {
            return Err(ProvisionError::WorkspaceExists(root.to_path_buf()));
        }
        std::fs::create_dir_all(root)?;
        info!(path = %root.display(), "created workspace");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Attach to a workspace created earlier.
    pub fn open(root: &Path) -> ProvisionResult<Self> {
        if !root.is_dir() {
            return Err(ProvisionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("workspace {} does not exist", root.display()),
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.root.join(CREDENTIALS_FILE)
    }

    pub fn blueprint_path(&self) -> PathBuf {
        self.root.join(BLUEPRINT_FILE)
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.root.join(SSH_DIR).join(KEY_FILE)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.root.join(SSH_DIR).join(format!("{KEY_FILE}.pub"))
    }

    /// Directory the infrastructure engine runs in.
    pub fn engine_dir(&self, cloud_id: &str) -> PathBuf {
        layout::engine_dir(&self.root, cloud_id)
    }

    /// Write the credential blob and generate a passphrase-less keypair.
    pub async fn install_credentials(
        &self,
        runner: &dyn CommandRunner,
        ssh_keygen: &Path,
        credential: &str,
    ) -> ProvisionResult<()> {
        std::fs::write(self.credentials_path(), credential)?;
        debug!(path = %self.credentials_path().display(), "wrote credential file");

        let ssh_dir = self.root.join(SSH_DIR);
        std::fs::create_dir_all(&ssh_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&ssh_dir, std::fs::Permissions::from_mode(0o711))?;
        }

        let key_path = self.private_key_path();
        let invocation = Invocation::new(ssh_keygen, &self.root, "keygen_log")
            .args(["-t", "rsa", "-f"])
            .arg(key_path.display().to_string())
            .args(["-N", "", "-C", KEY_COMMENT]);
        let outcome = runner.run(&invocation).await?;
        if !outcome.is_success() {
            return Err(ProvisionError::Command {
                stage: Stage::Keygen,
                exit_code: outcome.exit_code,
                stderr: Some(outcome.stderr),
            });
        }
        info!(key = %key_path.display(), "generated cluster keypair");
        Ok(())
    }

    /// Delete the whole directory tree.
    pub fn remove(self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            warn!(path = %self.root.display(), error = %e, "failed to remove workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Outcome;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct KeygenRunner {
        seen: Mutex<Vec<Invocation>>,
        fail: bool,
    }

    #[async_trait]
    impl CommandRunner for KeygenRunner {
        async fn run(&self, invocation: &Invocation) -> std::io::Result<Outcome> {
            self.seen.lock().unwrap().push(invocation.clone());
            if self.fail {
                return Ok(Outcome::failure(1, "keygen broke"));
            }
            let key = PathBuf::from(&invocation.args[3]);
            std::fs::write(&key, "PRIVATE")?;
            std::fs::write(key.with_extension("pub"), "PUBLIC")?;
            Ok(Outcome::success())
        }
    }

    #[test]
    fn create_refuses_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cluster_1");
        Workspace::create(&root).unwrap();
        let err = Workspace::create(&root).unwrap_err();
        assert!(matches!(err, ProvisionError::WorkspaceExists(p) if p == root));
    }

    #[test]
    fn open_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Workspace::open(&dir.path().join("missing")).is_err());
        assert!(Workspace::open(dir.path()).is_ok());
    }

    #[tokio::test]
    async fn install_credentials_writes_blob_and_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(&dir.path().join("cluster_2")).unwrap();
        let runner = KeygenRunner::default();

        ws.install_credentials(&runner, Path::new("ssh-keygen"), r#"{"project_id":"p"}"#)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(ws.credentials_path()).unwrap(),
            r#"{"project_id":"p"}"#
        );
        assert!(ws.private_key_path().is_file());
        assert!(ws.public_key_path().is_file());

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].args,
            vec![
                "-t".to_string(),
                "rsa".into(),
                "-f".into(),
                ws.private_key_path().display().to_string(),
                "-N".into(),
                "".into(),
                "-C".into(),
                "forge@mgmt".into(),
            ]
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(ws.root().join(".ssh")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o711);
        }
    }

    #[tokio::test]
    async fn keygen_failure_is_command_error() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(&dir.path().join("cluster_3")).unwrap();
        let runner = KeygenRunner {
            fail: true,
            ..Default::default()
        };
        let err = ws
            .install_credentials(&runner, Path::new("ssh-keygen"), "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Command { stage: Stage::Keygen, exit_code: 1, .. }));
    }

    #[test]
    fn remove_deletes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cluster_4");
        let ws = Workspace::create(&root).unwrap();
        std::fs::write(ws.blueprint_path(), "x").unwrap();
        ws.remove();
        assert!(!root.exists());
    }
}
