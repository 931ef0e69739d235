//! The three cloud systems the orchestrator talks to.

use async_trait::async_trait;

use crate::error::CloudResult;

/// Durable object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `contents` to `gs://{bucket}/{path}`, replacing any existing object.
    async fn upload(&self, bucket: &str, path: &str, contents: &str) -> CloudResult<()>;
}

/// Resource-level IAM bindings.
#[async_trait]
pub trait IamClient: Send + Sync {
    /// Bind `member` to `role` on a bucket.
    async fn grant_bucket_role(&self, bucket: &str, member: &str, role: &str) -> CloudResult<()>;

    /// Bind `member` to `role` on a pub/sub subscription.
    async fn grant_subscription_role(
        &self,
        subscription: &str,
        member: &str,
        role: &str,
    ) -> CloudResult<()>;
}

/// Pub/sub administration for command-and-control subscriptions.
#[async_trait]
pub trait PubSubAdmin: Send + Sync {
    /// Create `subscription` on `topic`. Returns false if it already existed.
    async fn create_subscription(&self, subscription: &str, topic: &str) -> CloudResult<bool>;

    /// Publish one message on `topic`.
    async fn publish(&self, topic: &str, message: &str) -> CloudResult<()>;

    /// Delete `subscription`. Returns false if it did not exist.
    async fn delete_subscription(&self, subscription: &str) -> CloudResult<bool>;
}

/// IAM member string for a service account.
pub fn service_account_member(email: &str) -> String {
    format!("serviceAccount:{email}")
}
