use crate::output::{label, print_json};
use clap::Subcommand;
use kitforge_cloud::{DeployAck, DeployStatus, Deployer};
use std::path::Path;
use std::time::Duration;

/// How often the CLI checks whether its in-process job has finished.
const JOB_POLL: Duration = Duration::from_secs(2);

#[derive(Subcommand)]
pub enum DeploySubcommand {
    /// Provision repository, database and services for the tenant's latest build
    Start { tenant: String },
    /// Push a fresh deploy to the tenant's existing services
    Redeploy { tenant: String },
    /// Return every service to its previous live deploy
    Rollback { tenant: String },
    /// Show deployment status with live service health
    Status { tenant: String },
    /// Mark a stuck deployment as cancelled
    Cancel { tenant: String },
}

pub fn run(root: &Path, subcmd: DeploySubcommand, json: bool) -> anyhow::Result<()> {
    super::block_on(async {
        let state = super::open_state(root).await?;
        let deployer = super::require_deployer(&state)?;
        match subcmd {
            DeploySubcommand::Start { tenant } => {
                let ack = deployer.deploy(&tenant).await?;
                follow(deployer, ack, json).await
            }
            DeploySubcommand::Redeploy { tenant } => {
                let ack = deployer.redeploy(&tenant).await?;
                follow(deployer, ack, json).await
            }
            DeploySubcommand::Rollback { tenant } => {
                let ack = deployer.rollback(&tenant).await?;
                follow(deployer, ack, json).await
            }
            DeploySubcommand::Status { tenant } => {
                let status = deployer.check_status(&tenant).await?;
                if json {
                    print_json(&status)
                } else {
                    print_status(&status);
                    Ok(())
                }
            }
            DeploySubcommand::Cancel { tenant } => {
                let ack = deployer.cancel(&tenant).await?;
                if json {
                    print_json(&ack)
                } else {
                    println!("Deployment for {} cancelled", ack.tenant_id);
                    Ok(())
                }
            }
        }
    })?
}

/// The job lives in this process, so stay until it settles and report the
/// outcome the ledger recorded.
async fn follow(deployer: &Deployer, ack: DeployAck, json: bool) -> anyhow::Result<()> {
    if !json {
        println!(
            "{} started for {} (job {})",
            ack.action, ack.tenant_id, ack.job_id
        );
    }
    while deployer.is_running(&ack.tenant_id).await {
        tokio::select! {
            _ = tokio::time::sleep(JOB_POLL) => {}
            _ = tokio::signal::ctrl_c() => {
                deployer.cancel(&ack.tenant_id).await?;
                anyhow::bail!("interrupted; deployment for {} cancelled", ack.tenant_id);
            }
        }
    }

    let status = deployer.check_status(&ack.tenant_id).await?;
    if json {
        print_json(&status)?;
    } else {
        print_status(&status);
    }
    if let Some(err) = &status.last_error {
        anyhow::bail!("{} failed: {err}", ack.action);
    }
    Ok(())
}

fn print_status(status: &DeployStatus) {
    println!("Tenant:   {}", status.tenant_id);
    println!("Status:   {} ({})", label(&status.status), status.tenant_status);
    for s in &status.services {
        println!(
            "  {:<10} {:<28} {}",
            s.role.as_str(),
            s.service_id,
            s.health.as_str()
        );
    }
    for (name, url) in [
        ("site", &status.urls.site),
        ("frontend", &status.urls.frontend),
        ("backend", &status.urls.backend),
    ] {
        if let Some(url) = url {
            println!("  {name}: {url}");
        }
    }
    if let Some(err) = &status.last_error {
        println!("Error:    {err}");
    }
}
