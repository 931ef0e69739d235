//! Cloud collaborators backed by the `gcloud` CLI.
//!
//! Each operation is one `gcloud` invocation. Failures are classified from
//! stderr: permission errors become `CloudError::PermissionDenied`, missing
//! resources `CloudError::NotFound`, everything else `CloudError::Command`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{CloudError, CloudResult};
use crate::traits::{IamClient, ObjectStore, PubSubAdmin};

/// Output of a finished `gcloud` call.
struct Finished {
    code: i32,
    stderr: String,
}

impl Finished {
    fn success(&self) -> bool {
        self.code == 0
    }
}

/// `gcloud`-driven implementation of the cloud traits.
#[derive(Debug, Clone)]
pub struct GcloudCli {
    program: PathBuf,
}

impl GcloudCli {
    pub fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
        }
    }

    async fn run(&self, args: &[&str], stdin: Option<&str>) -> CloudResult<Finished> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .arg("--quiet")
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(program = %self.program.display(), ?args, "running gcloud");
        let mut child = cmd.spawn()?;
        if let (Some(contents), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(contents.as_bytes()).await?;
            pipe.shutdown().await?;
        }
        let output = child.wait_with_output().await?;

        Ok(Finished {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn classify(&self, subject: &str, finished: Finished) -> CloudError {
        classify_failure(&self.program, subject, finished.code, finished.stderr)
    }
}

fn classify_failure(program: &Path, subject: &str, code: i32, stderr: String) -> CloudError {
    if is_permission_error(&stderr) {
        CloudError::PermissionDenied(format!("{subject}: {stderr}"))
    } else if is_not_found(&stderr) {
        CloudError::NotFound(subject.to_string())
    } else {
        CloudError::Command {
            program: program.display().to_string(),
            code,
            stderr,
        }
    }
}

// Only gcloud's status tokens and its `HTTPError <code>` prefix count:
// stderr echoes resource names, which may contain any digits.
fn has_status(stderr: &str, token: &str, http_code: u16) -> bool {
    stderr.contains(token) || stderr.contains(&format!("HTTPError {http_code}:"))
}

fn is_permission_error(stderr: &str) -> bool {
    has_status(stderr, "PERMISSION_DENIED", 403)
}

fn is_not_found(stderr: &str) -> bool {
    has_status(stderr, "NOT_FOUND", 404)
}

fn is_already_exists(stderr: &str) -> bool {
    has_status(stderr, "ALREADY_EXISTS", 409)
}

#[async_trait]
impl ObjectStore for GcloudCli {
    async fn upload(&self, bucket: &str, path: &str, contents: &str) -> CloudResult<()> {
        let url = format!("gs://{bucket}/{path}");
        let finished = self.run(&["storage", "cp", "-", &url], Some(contents)).await?;
        if !finished.success() {
            return Err(self.classify(&url, finished));
        }
        debug!(%url, bytes = contents.len(), "uploaded object");
        Ok(())
    }
}

#[async_trait]
impl IamClient for GcloudCli {
    async fn grant_bucket_role(&self, bucket: &str, member: &str, role: &str) -> CloudResult<()> {
        let url = format!("gs://{bucket}");
        let member_arg = format!("--member={member}");
        let role_arg = format!("--role={role}");
        let finished = self
            .run(
                &["storage", "buckets", "add-iam-policy-binding", &url, &member_arg, &role_arg],
                None,
            )
            .await?;
        if !finished.success() {
            return Err(self.classify(&url, finished));
        }
        info!(bucket, member, role, "granted bucket role");
        Ok(())
    }

    async fn grant_subscription_role(
        &self,
        subscription: &str,
        member: &str,
        role: &str,
    ) -> CloudResult<()> {
        let member_arg = format!("--member={member}");
        let role_arg = format!("--role={role}");
        let finished = self
            .run(
                &[
                    "pubsub",
                    "subscriptions",
                    "add-iam-policy-binding",
                    subscription,
                    &member_arg,
                    &role_arg,
                ],
                None,
            )
            .await?;
        if !finished.success() {
            return Err(self.classify(subscription, finished));
        }
        info!(subscription, member, role, "granted subscription role");
        Ok(())
    }
}

#[async_trait]
impl PubSubAdmin for GcloudCli {
    async fn create_subscription(&self, subscription: &str, topic: &str) -> CloudResult<bool> {
        let topic_arg = format!("--topic={topic}");
        let finished = self
            .run(&["pubsub", "subscriptions", "create", subscription, &topic_arg], None)
            .await?;
        if finished.success() {
            info!(subscription, topic, "created subscription");
            return Ok(true);
        }
        if is_already_exists(&finished.stderr) {
            debug!(subscription, "subscription already exists");
            return Ok(false);
        }
        Err(self.classify(subscription, finished))
    }

    async fn publish(&self, topic: &str, message: &str) -> CloudResult<()> {
        let message_arg = format!("--message={message}");
        let finished = self
            .run(&["pubsub", "topics", "publish", topic, &message_arg], None)
            .await?;
        if !finished.success() {
            return Err(self.classify(topic, finished));
        }
        debug!(topic, bytes = message.len(), "published message");
        Ok(())
    }

    async fn delete_subscription(&self, subscription: &str) -> CloudResult<bool> {
        let finished = self
            .run(&["pubsub", "subscriptions", "delete", subscription], None)
            .await?;
        if finished.success() {
            info!(subscription, "deleted subscription");
            return Ok(true);
        }
        match self.classify(subscription, finished) {
            CloudError::NotFound(_) => Ok(false),
            other => Err(other),
        }
    }
}
