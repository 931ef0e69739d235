//! Command-and-control channel naming and message types.
//!
//! Every cluster gets its own subscription on a shared topic. Outgoing
//! commands are `C2Command`s; replies from cluster nodes are decoded into
//! `C2Response`s, validated before use, and routed to whoever registered
//! interest in their subject.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use forge_core::ForgeConfig;

use crate::error::{CloudError, CloudResult};

/// Addresses of the shared topic and per-cluster subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct C2Channel {
    project_id: String,
    topic: String,
}

impl C2Channel {
    pub fn new(project_id: &str, topic: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            topic: topic.to_string(),
        }
    }

    pub fn from_config(config: &ForgeConfig) -> Self {
        Self::new(&config.server.project_id, &config.server.c2_topic)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Fully-qualified topic path.
    pub fn topic_path(&self) -> String {
        format!("projects/{}/topics/{}", self.project_id, self.topic)
    }

    /// Fully-qualified subscription path for one cluster.
    pub fn subscription_path(&self, cluster_id: &str) -> String {
        format!(
            "projects/{}/subscriptions/{}-cluster-{cluster_id}",
            self.project_id, self.topic
        )
    }
}

// ── Commands ──────────────────────────────────────────────────────

/// Commands the orchestrator sends to a cluster's controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum C2CommandKind {
    SpackInstall,
    RunJob,
    Ping,
}

/// An outgoing command message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct C2Command {
    pub command: C2CommandKind,
    pub cluster_id: String,
    pub data: Map<String, Value>,
}

impl C2Command {
    pub fn new(command: C2CommandKind, cluster_id: &str) -> Self {
        Self {
            command,
            cluster_id: cluster_id.to_string(),
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn to_json(&self) -> CloudResult<String> {
        serde_json::to_string(self).map_err(|e| CloudError::InvalidMessage(e.to_string()))
    }
}

// ── Responses ─────────────────────────────────────────────────────

/// What a response reports on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum C2Subject {
    Application(String),
    Job(String),
    Cluster,
}

/// A validated reply from a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct C2Response {
    pub cluster_id: String,
    pub subject: C2Subject,
    /// Single-letter status code of the subject.
    pub status: String,
    pub log_message: Option<String>,
    /// Remaining payload fields, e.g. `spack_hash` or `slurm_job_id`.
    pub fields: Map<String, Value>,
}

/// A response that arrived for a different origin than expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum C2Mismatch {
    Cluster { expected: String, received: String },
    Subject { expected: C2Subject, received: C2Subject },
}

impl C2Response {
    /// Decode and validate a JSON payload.
    ///
    /// `cluster_id` and `status` are required; ids may arrive as strings
    /// or integers. A payload naming both an application and a job is
    /// rejected.
    pub fn parse(payload: &[u8]) -> CloudResult<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| CloudError::InvalidMessage(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(CloudError::InvalidMessage("payload is not an object".to_string()));
        };

        let cluster_id = take_id(&mut fields, "cluster_id")?
            .ok_or_else(|| CloudError::InvalidMessage("missing cluster_id".to_string()))?;
        let status = match fields.remove("status") {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(other) => {
                return Err(CloudError::InvalidMessage(format!("invalid status: {other}")));
            }
            None => return Err(CloudError::InvalidMessage("missing status".to_string())),
        };
        let app_id = take_id(&mut fields, "app_id")?;
        let job_id = take_id(&mut fields, "job_id")?;
        let subject = match (app_id, job_id) {
            (Some(app), None) => C2Subject::Application(app),
            (None, Some(job)) => C2Subject::Job(job),
            (None, None) => C2Subject::Cluster,
            (Some(_), Some(_)) => {
                return Err(CloudError::InvalidMessage(
                    "response names both app_id and job_id".to_string(),
                ));
            }
        };
        let log_message = match fields.remove("log_message") {
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        Ok(Self {
            cluster_id,
            subject,
            status,
            log_message,
            fields,
        })
    }

    /// Compare against the origin the caller expected.
    pub fn check_origin(&self, cluster_id: &str, subject: &C2Subject) -> Vec<C2Mismatch> {
        let mut mismatches = Vec::new();
        if self.cluster_id != cluster_id {
            mismatches.push(C2Mismatch::Cluster {
                expected: cluster_id.to_string(),
                received: self.cluster_id.clone(),
            });
        }
        if &self.subject != subject {
            mismatches.push(C2Mismatch::Subject {
                expected: subject.clone(),
                received: self.subject.clone(),
            });
        }
        mismatches
    }
}

fn take_id(fields: &mut Map<String, Value>, key: &str) -> CloudResult<Option<String>> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(CloudError::InvalidMessage(format!("invalid {key}: {other}"))),
    }
}

// ── Routing ───────────────────────────────────────────────────────

/// Routes validated responses to the receivers registered for their subject.
#[derive(Default)]
pub struct ResponseRouter {
    routes: Mutex<HashMap<(String, C2Subject), mpsc::UnboundedSender<C2Response>>>,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in replies about `subject` from `cluster_id`.
    pub fn register(
        &self,
        cluster_id: &str,
        subject: C2Subject,
    ) -> mpsc::UnboundedReceiver<C2Response> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.insert((cluster_id.to_string(), subject), tx);
        rx
    }

    /// Hand a decoded response to its receiver. Returns false when nobody
    /// is listening.
    pub fn deliver(&self, response: C2Response) -> bool {
        if let Some(message) = &response.log_message {
            info!(cluster = %response.cluster_id, subject = ?response.subject, "remote log: {message}");
        }
        let key = (response.cluster_id.clone(), response.subject.clone());
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = routes.get(&key) else {
            error!(cluster = %key.0, subject = ?key.1, "response with no registered receiver");
            return false;
        };
        if tx.send(response).is_err() {
            debug!(cluster = %key.0, subject = ?key.1, "receiver dropped, removing route");
            routes.remove(&key);
            return false;
        }
        true
    }

    /// Stop routing replies about `subject` from `cluster_id`.
    pub fn unregister(&self, cluster_id: &str, subject: &C2Subject) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.remove(&(cluster_id.to_string(), subject.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_paths() {
        let channel = C2Channel::new("front-proj", "forge-c2");
        assert_eq!(channel.topic_path(), "projects/front-proj/topics/forge-c2");
        assert_eq!(
            channel.subscription_path("12"),
            "projects/front-proj/subscriptions/forge-c2-cluster-12"
        );
    }

    #[test]
    fn command_serializes_kind_and_data() {
        let cmd = C2Command::new(C2CommandKind::SpackInstall, "3")
            .with("app_id", 9)
            .with("spec", "gromacs@2022");
        let json: Value = serde_json::from_str(&cmd.to_json().unwrap()).unwrap();
        assert_eq!(json["command"], "SPACK_INSTALL");
        assert_eq!(json["cluster_id"], "3");
        assert_eq!(json["data"]["app_id"], 9);
    }

    #[test]
    fn parse_application_response() {
        let payload = br#"{"cluster_id": 3, "app_id": 9, "status": "r", "spack_hash": "abc", "log_message": "done"}"#;
        let resp = C2Response::parse(payload).unwrap();
        assert_eq!(resp.cluster_id, "3");
        assert_eq!(resp.subject, C2Subject::Application("9".to_string()));
        assert_eq!(resp.status, "r");
        assert_eq!(resp.log_message.as_deref(), Some("done"));
        assert_eq!(resp.fields["spack_hash"], "abc");
        assert!(resp.fields.get("app_id").is_none());
    }

    #[test]
    fn parse_rejects_bad_schema() {
        assert!(C2Response::parse(b"[1,2]").is_err());
        assert!(C2Response::parse(br#"{"status":"r"}"#).is_err());
        assert!(C2Response::parse(br#"{"cluster_id":"1"}"#).is_err());
        assert!(C2Response::parse(br#"{"cluster_id":"1","status":5}"#).is_err());
        assert!(C2Response::parse(br#"{"cluster_id":[1],"status":"r"}"#).is_err());
        assert!(C2Response::parse(br#"{"cluster_id":"1","status":"r","app_id":1,"job_id":2}"#).is_err());
    }

    #[test]
    fn check_origin_reports_mismatches() {
        let resp = C2Response::parse(br#"{"cluster_id":"4","job_id":"7","status":"c"}"#).unwrap();
        assert!(resp.check_origin("4", &C2Subject::Job("7".to_string())).is_empty());

        let mismatches = resp.check_origin("5", &C2Subject::Job("8".to_string()));
        assert_eq!(mismatches.len(), 2);
        assert!(matches!(&mismatches[0], C2Mismatch::Cluster { expected, .. } if expected == "5"));
    }

    fn parse(payload: &[u8]) -> C2Response {
        C2Response::parse(payload).unwrap()
    }

    #[tokio::test]
    async fn router_delivers_to_registered_subject() {
        let router = ResponseRouter::new();
        let mut rx = router.register("4", C2Subject::Job("7".to_string()));

        let delivered = router.deliver(parse(br#"{"cluster_id":"4","job_id":7,"status":"q"}"#));
        assert!(delivered);
        let resp = rx.recv().await.unwrap();
        assert_eq!(resp.status, "q");

        let delivered = router.deliver(parse(br#"{"cluster_id":"4","job_id":8,"status":"q"}"#));
        assert!(!delivered);
    }

    #[test]
    fn router_drops_closed_receivers() {
        let router = ResponseRouter::new();
        let rx = router.register("1", C2Subject::Cluster);
        drop(rx);
        assert!(!router.deliver(parse(br#"{"cluster_id":"1","status":"r"}"#)));
    }
}
