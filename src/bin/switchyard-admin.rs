use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use switchyard::config::{DatabaseBackend, DatabaseConfig};
use switchyard::models::{NewLink, Target};
use switchyard::storage::{PostgresStorage, SqliteStorage, Storage, StorageError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "switchyard-admin")]
#[command(about = "Switchyard link and domain management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a custom domain
    AddDomain {
        /// Host name, e.g. go.acme.com
        host: String,
        /// Register without marking it verified
        #[arg(long)]
        unverified: bool,
    },
    /// Create a short link
    CreateLink {
        slug: String,
        /// Fallback destination
        original_url: String,
        /// Owner id (sub claim of the owner's token)
        #[arg(long)]
        owner: String,
        /// Verified custom domain host; omit for the default host
        #[arg(long)]
        domain: Option<String>,
        /// Rotation target as URL or URL,WEIGHT (weight defaults to 1); repeatable
        #[arg(long = "target")]
        targets: Vec<String>,
        /// Serve the destination under the short URL
        #[arg(long)]
        cloaked: bool,
        /// Rotation window start (Unix seconds)
        #[arg(long)]
        rotation_start: Option<i64>,
        /// Rotation window end (Unix seconds)
        #[arg(long)]
        rotation_end: Option<i64>,
        /// Stop rotating after this many clicks
        #[arg(long)]
        click_limit: Option<i64>,
    },
    /// Delete a link and its analytics
    DeleteLink { id: i64 },
    /// Print a link as JSON
    ShowLink { id: i64 },
}

fn parse_target(raw: &str) -> Result<Target> {
    if let Some((url, weight)) = raw.rsplit_once(',') {
        if let Ok(weight) = weight.parse::<u32>() {
            return Ok(Target {
                url: url.to_string(),
                weight,
            });
        }
    }
    if raw.trim().is_empty() {
        bail!("empty target");
    }
    Ok(Target {
        url: raw.to_string(),
        weight: 1,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = DatabaseConfig::from_env();

    let storage: Arc<dyn Storage> = match config.backend {
        DatabaseBackend::Sqlite => {
            Arc::new(SqliteStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            Arc::new(PostgresStorage::new(&config.url, config.max_connections).await?)
        }
    };

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::AddDomain { host, unverified } => {
            match storage.create_domain(&host, !unverified).await {
                Ok(domain) => println!(
                    "✓ Registered domain '{}' (id {}, verified: {})",
                    domain.host, domain.id, domain.verified
                ),
                Err(StorageError::Conflict) => bail!("domain '{}' already exists", host),
                Err(err) => return Err(err.into()),
            }
        }
        Commands::CreateLink {
            slug,
            original_url,
            owner,
            domain,
            targets,
            cloaked,
            rotation_start,
            rotation_end,
            click_limit,
        } => {
            let domain_id = match domain {
                Some(host) => Some(
                    storage
                        .find_verified_domain(&host.to_lowercase())
                        .await?
                        .with_context(|| format!("no verified domain '{}'", host))?
                        .id,
                ),
                None => None,
            };

            let targets = targets
                .iter()
                .map(|t| parse_target(t))
                .collect::<Result<Vec<_>>>()?;

            let new_link = NewLink {
                slug: slug.clone(),
                domain_id,
                owner_id: owner,
                original_url,
                targets,
                is_cloaked: cloaked,
                rotation_start,
                rotation_end,
                click_limit,
            };

            match storage.create_link(&new_link).await {
                Ok(link) => println!("✓ Created link '{}' with id {}", link.slug, link.id),
                Err(StorageError::Conflict) => {
                    bail!("slug '{}' is already taken in that domain", slug)
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::DeleteLink { id } => {
            if storage.delete_link(id).await? {
                println!("✓ Deleted link {}", id);
            } else {
                println!("⚠ Link {} does not exist", id);
            }
        }
        Commands::ShowLink { id } => match storage.get_link(id).await? {
            Some(link) => println!("{}", serde_json::to_string_pretty(&link)?),
            None => println!("⚠ Link {} does not exist", id),
        },
    }

    Ok(())
}
