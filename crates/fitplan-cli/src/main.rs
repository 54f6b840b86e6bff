mod config;
mod plan_cmds;
mod serve_cmd;
#[cfg(test)]
mod test_util;
mod user_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use fitplan_core::activation::PlanActivationService;
use fitplan_core::catalog::PlanCatalog;
use fitplan_core::query::PlanQueryService;
use fitplan_db::models::Family;
use fitplan_db::pool;

use config::FitplanConfig;

#[derive(Parser)]
#[command(name = "fitplan", about = "Active diet and workout plan manager")]
struct Cli {
    /// Database URL (overrides FITPLAN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a fitplan config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/fitplan")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database and run migrations
    DbInit,
    /// User setup
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// List built-in plan templates
    Catalog {
        /// Only show this family (diet or workout)
        family: Option<Family>,
    },
    /// List a user's plans in a family
    Plans {
        /// diet or workout
        family: Family,
        /// Owner user ID
        #[arg(long)]
        owner: Uuid,
        /// Show templates and custom plans merged, as users see them
        #[arg(long)]
        display: bool,
    },
    /// Make a plan or template the active one
    Activate {
        /// diet or workout
        family: Family,
        /// Owner user ID
        #[arg(long)]
        owner: Uuid,
        /// ID of a plan the owner already has
        #[arg(long, conflicts_with = "template")]
        plan: Option<Uuid>,
        /// Catalog template ID (see `fitplan catalog`)
        #[arg(long)]
        template: Option<String>,
    },
    /// Create a custom plan from a JSON file and activate it
    Create {
        /// diet or workout
        family: Family,
        /// Owner user ID
        #[arg(long)]
        owner: Uuid,
        /// Path to the plan JSON file
        #[arg(long)]
        file: PathBuf,
    },
    /// Apply a partial JSON update to an owned plan
    Update {
        /// diet or workout
        family: Family,
        /// Plan ID to update
        plan_id: Uuid,
        /// Owner user ID
        #[arg(long)]
        owner: Uuid,
        /// Path to the JSON file with the fields to change
        #[arg(long)]
        file: PathBuf,
    },
    /// Serve the plan API over HTTP
    Serve {
        /// Address to bind (defaults to the config file or 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (defaults to the config file or 3000)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user
    Add {
        /// Email address
        email: String,
    },
    /// Show a user's active plan pointers
    Show {
        /// User ID
        id: Uuid,
    },
}

/// Execute the `fitplan init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
            max_connections: None,
        },
        server: config::ServerSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  server       = {}:{}", cfg.server.bind, cfg.server.port);
    println!();
    println!("Next: run `fitplan db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `fitplan db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = FitplanConfig::resolve(cli_db_url)?;

    println!("Initializing fitplan database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let result = pool::run_migrations(&db_pool).await;
    let summary = match result {
        Ok(()) => pool::store_summary(&db_pool).await,
        Err(e) => Err(e),
    };
    db_pool.close().await;
    let summary = summary?;

    println!("Database ready.");
    println!("  users:        {}", summary.users);
    println!("  plans:        {}", summary.plans);
    println!("    preset:     {}", summary.preset_plans);
    println!("    custom:     {}", summary.custom_plans);
    println!("    active:     {}", summary.active_plans);
    println!("fitplan db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Catalog { family } => {
            let catalog = PlanCatalog::builtin()?;
            plan_cmds::run_catalog(&catalog, family);
        }
        Commands::User { command } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = user_cmd::run_user_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Plans {
            family,
            owner,
            display,
        } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let query = PlanQueryService::new(db_pool.clone(), Arc::new(PlanCatalog::builtin()?));
            let result = plan_cmds::run_plans(&query, family, owner, display).await;
            db_pool.close().await;
            result?;
        }
        Commands::Activate {
            family,
            owner,
            plan,
            template,
        } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let service =
                PlanActivationService::new(db_pool.clone(), Arc::new(PlanCatalog::builtin()?));
            let result = plan_cmds::run_activate(&service, family, owner, plan, template).await;
            db_pool.close().await;
            result?;
        }
        Commands::Create {
            family,
            owner,
            file,
        } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let service =
                PlanActivationService::new(db_pool.clone(), Arc::new(PlanCatalog::builtin()?));
            let result = plan_cmds::run_create(&service, family, owner, &file).await;
            db_pool.close().await;
            result?;
        }
        Commands::Update {
            family,
            plan_id,
            owner,
            file,
        } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let service =
                PlanActivationService::new(db_pool.clone(), Arc::new(PlanCatalog::builtin()?));
            let result = plan_cmds::run_update(&service, family, owner, plan_id, &file).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let catalog = Arc::new(PlanCatalog::builtin()?);
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let bind = bind.unwrap_or(resolved.server.bind);
            let port = port.unwrap_or(resolved.server.port);
            let result = serve_cmd::run_serve(db_pool.clone(), catalog, &bind, port).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
