mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    builds::BuildsSubcommand, config::ConfigSubcommand, deploy::DeploySubcommand,
    manifest::ManifestSubcommand, tenant::TenantSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kitforge",
    about = "Generate branded software packages from templates, store them and deploy them per tenant",
    version,
    propagate_version = true
)]
struct Cli {
    /// Root holding kitforge.yaml (default: auto-detect upward from the current directory)
    #[arg(long, global = true, env = "KITFORGE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a package from a build config (YAML or JSON)
    Generate {
        config: PathBuf,
        /// Tenant to record the build under (default: the company slug)
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Inspect product feature manifests
    Manifest {
        #[command(subcommand)]
        subcommand: ManifestSubcommand,
    },

    /// Manage recorded builds
    Builds {
        #[command(subcommand)]
        subcommand: BuildsSubcommand,
    },

    /// Inspect tenants
    Tenant {
        #[command(subcommand)]
        subcommand: TenantSubcommand,
    },

    /// Deploy tenants to the cloud platform
    Deploy {
        #[command(subcommand)]
        subcommand: DeploySubcommand,
    },

    /// Show or validate settings
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Run the HTTP API
    Serve {
        /// Address to bind (overrides server.bind)
        #[arg(long, env = "KITFORGE_BIND")]
        bind: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Deploy { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Generate { config, tenant } => {
            cmd::generate::run(&root, &config, tenant.as_deref(), cli.json)
        }
        Commands::Manifest { subcommand } => cmd::manifest::run(&root, subcommand, cli.json),
        Commands::Builds { subcommand } => cmd::builds::run(&root, subcommand, cli.json),
        Commands::Tenant { subcommand } => cmd::tenant::run(&root, subcommand, cli.json),
        Commands::Deploy { subcommand } => cmd::deploy::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Serve { bind } => cmd::serve::run(&root, bind),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
