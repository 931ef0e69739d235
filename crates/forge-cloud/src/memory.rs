//! In-process cloud used by tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CloudError, CloudResult};
use crate::traits::{IamClient, ObjectStore, PubSubAdmin};

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, String>,
    bucket_bindings: BTreeSet<(String, String, String)>,
    subscription_bindings: BTreeSet<(String, String, String)>,
    subscriptions: BTreeMap<String, String>,
    published: Vec<(String, String)>,
    deny_subscription_grants: bool,
    fail_uploads: BTreeSet<String>,
}

/// Object storage, IAM and pub/sub kept in memory.
///
/// Failure injection: `deny_subscription_grants` makes every subscription
/// IAM grant fail with `PermissionDenied`; `fail_upload` makes uploads to
/// one object path fail.
#[derive(Debug, Default)]
pub struct MemoryCloud {
    inner: Mutex<Inner>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn deny_subscription_grants(&self, deny: bool) {
        self.lock().deny_subscription_grants = deny;
    }

    pub fn fail_upload(&self, path: &str) {
        self.lock().fail_uploads.insert(path.to_string());
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<String> {
        self.lock().objects.get(&format!("{bucket}/{path}")).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Members holding `role` on `bucket`.
    pub fn bucket_members(&self, bucket: &str, role: &str) -> Vec<String> {
        self.lock()
            .bucket_bindings
            .iter()
            .filter(|(b, _, r)| b == bucket && r == role)
            .map(|(_, m, _)| m.clone())
            .collect()
    }

    pub fn bucket_binding_count(&self) -> usize {
        self.lock().bucket_bindings.len()
    }

    /// Members holding `role` on `subscription`.
    pub fn subscription_members(&self, subscription: &str, role: &str) -> Vec<String> {
        self.lock()
            .subscription_bindings
            .iter()
            .filter(|(s, _, r)| s == subscription && r == role)
            .map(|(_, m, _)| m.clone())
            .collect()
    }

    /// Messages published on `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn has_subscription(&self, subscription: &str) -> bool {
        self.lock().subscriptions.contains_key(subscription)
    }
}

#[async_trait]
impl ObjectStore for MemoryCloud {
    async fn upload(&self, bucket: &str, path: &str, contents: &str) -> CloudResult<()> {
        let mut inner = self.lock();
        if inner.fail_uploads.contains(path) {
            return Err(CloudError::Command {
                program: "memory".to_string(),
                code: 1,
                stderr: format!("injected upload failure for {path}"),
            });
        }
        inner.objects.insert(format!("{bucket}/{path}"), contents.to_string());
        Ok(())
    }
}

#[async_trait]
impl IamClient for MemoryCloud {
    async fn grant_bucket_role(&self, bucket: &str, member: &str, role: &str) -> CloudResult<()> {
        self.lock()
            .bucket_bindings
            .insert((bucket.to_string(), member.to_string(), role.to_string()));
        Ok(())
    }

    async fn grant_subscription_role(
        &self,
        subscription: &str,
        member: &str,
        role: &str,
    ) -> CloudResult<()> {
        let mut inner = self.lock();
        if inner.deny_subscription_grants {
            return Err(CloudError::PermissionDenied(format!(
                "setIamPolicy on {subscription}"
            )));
        }
        if !inner.subscriptions.contains_key(subscription) {
            return Err(CloudError::NotFound(subscription.to_string()));
        }
        inner
            .subscription_bindings
            .insert((subscription.to_string(), member.to_string(), role.to_string()));
        Ok(())
    }
}

#[async_trait]
impl PubSubAdmin for MemoryCloud {
    async fn create_subscription(&self, subscription: &str, topic: &str) -> CloudResult<bool> {
        let mut inner = self.lock();
        if inner.subscriptions.contains_key(subscription) {
            return Ok(false);
        }
        inner
            .subscriptions
            .insert(subscription.to_string(), topic.to_string());
        Ok(true)
    }

    async fn publish(&self, topic: &str, message: &str) -> CloudResult<()> {
        self.lock()
            .published
            .push((topic.to_string(), message.to_string()));
        Ok(())
    }

    async fn delete_subscription(&self, subscription: &str) -> CloudResult<bool> {
        let mut inner = self.lock();
        inner.subscription_bindings.retain(|(s, _, _)| s != subscription);
        Ok(inner.subscriptions.remove(subscription).is_some())
    }
}
