use std::path::Path;
use std::time::Duration;

use forge_lifecycle::{ClusterLifecycle, Job, JobDispatcher};
use forge_provision::ChannelStatus;
use forge_state::ClusterStatus;

use super::open_lifecycle;

pub async fn prepare(config_path: &Path, id: &str, credentials: Option<&Path>) -> anyhow::Result<()> {
    let lifecycle = open_lifecycle(config_path)?;
    let blob = credentials.map(std::fs::read_to_string).transpose()?;
    lifecycle.prepare(id, blob.as_deref()).await?;
    println!("✓ Cluster {id} prepared ({})", lifecycle.cluster(id)?.status);
    Ok(())
}

pub async fn update(config_path: &Path, id: &str) -> anyhow::Result<()> {
    let lifecycle = open_lifecycle(config_path)?;
    lifecycle.update(id).await?;
    println!("✓ Cluster {id} assets refreshed");
    Ok(())
}

pub async fn start(config_path: &Path, id: &str, poll_interval: u64) -> anyhow::Result<()> {
    run_job(config_path, Job::Start(id.to_string()), poll_interval).await?;
    println!("✓ Cluster {id} started");
    Ok(())
}

pub async fn stop(config_path: &Path, id: &str, poll_interval: u64) -> anyhow::Result<()> {
    run_job(config_path, Job::Stop(id.to_string()), poll_interval).await?;
    println!("✓ Cluster {id} destroyed");
    Ok(())
}

pub async fn repair_permissions(config_path: &Path, id: &str) -> anyhow::Result<()> {
    let lifecycle = open_lifecycle(config_path)?;
    match lifecycle.repair_permissions(id).await? {
        ChannelStatus::Wired => println!("✓ Command channel wired for cluster {id}"),
        ChannelStatus::Degraded { reason } => {
            anyhow::bail!("command channel for cluster {id} still degraded: {reason}")
        }
    }
    Ok(())
}

pub fn install_location(config_path: &Path, id: &str, path: &str) -> anyhow::Result<()> {
    let lifecycle = open_lifecycle(config_path)?;
    let Some(location) = lifecycle.resolve_install_location(id, path)? else {
        anyhow::bail!("no mount point of cluster {id} covers {path}");
    };
    println!("{} {} {}", location.id, location.export_id, location.path);
    Ok(())
}

pub async fn ping(config_path: &Path, id: &str) -> anyhow::Result<()> {
    let lifecycle = open_lifecycle(config_path)?;
    lifecycle.ping(id).await?;
    println!("✓ Ping published to cluster {id}");
    Ok(())
}

/// Submit `job` and report persisted status changes until it finishes.
async fn run_job(config_path: &Path, job: Job, poll_interval: u64) -> anyhow::Result<()> {
    let dispatcher = JobDispatcher::new(open_lifecycle(config_path)?);
    let id = job.cluster_id().to_string();
    let handle = dispatcher.submit(job)?;

    let mut last = None;
    while dispatcher.is_running(&id) {
        report_status(dispatcher.lifecycle(), &id, &mut last);
        tokio::time::sleep(Duration::from_secs(poll_interval.max(1))).await;
    }
    handle.await??;
    report_status(dispatcher.lifecycle(), &id, &mut last);
    Ok(())
}

fn report_status(lifecycle: &ClusterLifecycle, id: &str, last: &mut Option<ClusterStatus>) {
    let Ok(cluster) = lifecycle.cluster(id) else {
        return;
    };
    if *last != Some(cluster.status) {
        println!("  {id}: {} ({})", cluster.status, cluster.cloud_state);
        *last = Some(cluster.status);
    }
}
