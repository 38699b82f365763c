use crate::output::{label, print_json, print_table};
use clap::Subcommand;
use kitforge_core::ledger::{BillingLink, Tenant};
use std::path::Path;

#[derive(Subcommand)]
pub enum TenantSubcommand {
    /// List all tenants
    List,
    /// Show a tenant, its services and deploy history
    Show { id: String },
    /// Attach billing identifiers to a tenant
    Billing {
        id: String,
        #[arg(long)]
        customer: String,
        #[arg(long)]
        subscription: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: TenantSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TenantSubcommand::List => list(root, json),
        TenantSubcommand::Show { id } => show(root, &id, json),
        TenantSubcommand::Billing {
            id,
            customer,
            subscription,
        } => billing(root, &id, customer, subscription, json),
    }
}

fn open_ledger(root: &Path) -> anyhow::Result<kitforge_core::Ledger> {
    let settings = super::load_settings(root)?;
    Ok(kitforge_core::Ledger::open(&settings.ledger_path())?)
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let tenants = open_ledger(root)?.list_tenants()?;

    if json {
        return print_json(&tenants);
    }
    if tenants.is_empty() {
        println!("No tenants.");
        return Ok(());
    }
    let rows = tenants
        .iter()
        .map(|t| {
            vec![
                t.id.clone(),
                t.company_name.clone(),
                t.status.to_string(),
                t.latest_build_id.clone().unwrap_or_else(|| "-".into()),
                primary_url(t).unwrap_or("-").to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "COMPANY", "STATUS", "LATEST BUILD", "URL"], rows);
    Ok(())
}

fn primary_url(t: &Tenant) -> Option<&str> {
    t.urls
        .site
        .as_deref()
        .or(t.urls.frontend.as_deref())
        .or(t.urls.backend.as_deref())
}

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let tenant = open_ledger(root)?.get_tenant(id)?;

    if json {
        return print_json(&tenant);
    }

    println!("Tenant:   {}", tenant.id);
    println!("Company:  {}", tenant.company_name);
    println!("Status:   {}", tenant.status);
    if let Some(build) = &tenant.latest_build_id {
        println!("Build:    {build}");
    }
    if let Some(billing) = &tenant.billing {
        match &billing.subscription_id {
            Some(sub) => println!("Billing:  {} / {sub}", billing.customer_id),
            None => println!("Billing:  {}", billing.customer_id),
        }
    }
    if let Some(repo) = &tenant.repository {
        println!("Repo:     {}", repo.url);
    }
    for (name, url) in [
        ("Site", &tenant.urls.site),
        ("Frontend", &tenant.urls.frontend),
        ("Backend", &tenant.urls.backend),
    ] {
        if let Some(url) = url {
            println!("{:<9} {url}", format!("{name}:"));
        }
    }
    if let Some(err) = &tenant.last_error {
        println!("Error:    {err}");
    }

    if !tenant.services.is_empty() {
        println!("\nServices:");
        for (role, id) in &tenant.services {
            println!("  {:<10} {id}", role.as_str());
        }
    }
    if !tenant.pending.services.is_empty() {
        println!("\nPending (from an unfinished deploy):");
        for (role, id) in &tenant.pending.services {
            println!("  {:<10} {id}", role.as_str());
        }
    }
    if !tenant.deploy_history.is_empty() {
        println!("\nHistory:");
        for e in tenant.deploy_history.iter().rev() {
            let detail = e.detail.as_deref().map(|d| format!("  {d}")).unwrap_or_default();
            println!(
                "  {}  {:<9} {}{detail}",
                e.at.format("%Y-%m-%d %H:%M:%S"),
                e.action.as_str(),
                label(&e.outcome)
            );
        }
    }
    Ok(())
}

fn billing(
    root: &Path,
    id: &str,
    customer: String,
    subscription: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    if customer.trim().is_empty() {
        anyhow::bail!("--customer must not be empty");
    }
    let link = BillingLink {
        customer_id: customer,
        subscription_id: subscription,
    };
    let tenant = open_ledger(root)?.set_billing(id, link)?;

    if json {
        return print_json(&serde_json::json!({
            "id": tenant.id,
            "billing": tenant.billing,
        }));
    }
    println!("Billing updated for {}", tenant.id);
    Ok(())
}
