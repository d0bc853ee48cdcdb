use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use tenant_authz::authz::catalog::PLATFORM_ADMIN;
use tenant_authz::authz::{AuthzConfig, AuthzEngine};
use tenant_authz::events::verify_event_chain;
use tenant_authz::jwt::JwtConfig;
use tenant_authz::models::membership::{Membership, MembershipStatus};
use tenant_authz::models::tenant::Tenant;
use tenant_authz::store::SqliteStore;
use tenant_authz::utils::utc_now;

#[derive(Parser, Debug)]
#[command(author, version, about = "tenant-authz admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Create the platform root tenant and seed the permission catalog
    Bootstrap {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "root")]
        slug: String,
        /// Actor that becomes platform admin of the root
        #[arg(long)]
        admin: Option<Uuid>,
    },
    /// Mint a bearer token for local development
    IssueToken {
        #[arg(long)]
        user: Uuid,
        /// Global role, only read in legacy mode
        #[arg(long)]
        role: Option<String>,
    },
    /// Print the actors visible under a tenant
    Expand { tenant_id: Uuid },
    /// Print the permission keys a role grants
    EffectivePermissions { role_id: Uuid },
    /// Recompute the audit hash chain
    VerifyAudit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::Bootstrap { name, slug, admin } => {
            let pool = get_pool().await?;
            get_migrator().await?.run(&pool).await?;
            bootstrap(SqliteStore::new(pool), &name, &slug, admin).await?;
        }
        Commands::IssueToken { user, role } => {
            let jwt = JwtConfig::from_env()?;
            println!("{}", jwt.encode(user, role.as_deref())?);
        }
        Commands::Expand { tenant_id } => {
            let engine = engine().await?;
            let scope = engine.expand_to_actor_ids(tenant_id).await?;
            if scope.is_empty() {
                println!("(no visible actors)");
            }
            for actor in scope.iter() {
                println!("{actor}");
            }
        }
        Commands::EffectivePermissions { role_id } => {
            let engine = engine().await?;
            let permissions = engine
                .list_effective_permissions(role_id)
                .await?
                .with_context(|| format!("role {role_id} not found"))?;
            for key in permissions.iter() {
                println!("{key}");
            }
        }
        Commands::VerifyAudit => {
            let pool = get_pool().await?;
            match verify_event_chain(&pool).await? {
                Ok(count) => println!("event chain intact ({count} events)"),
                Err(id) => anyhow::bail!("event chain broken at {id}"),
            }
        }
    }

    Ok(())
}

async fn bootstrap(store: SqliteStore, name: &str, slug: &str, admin: Option<Uuid>) -> anyhow::Result<()> {
    store.seed_catalog().await?;

    if let Some(existing) = store.platform_root().await? {
        anyhow::bail!("platform root already exists: {} ({})", existing.id, existing.path);
    }

    let root = Tenant::root(name, slug)?;
    store.insert_tenant(&root).await?;
    println!("Created platform root {} ({})", root.id, root.path);

    if let Some(user_id) = admin {
        let now = utc_now();
        let membership = Membership {
            id: Uuid::new_v4(),
            user_id,
            tenant_id: root.id,
            role_id: PLATFORM_ADMIN.id,
            status: MembershipStatus::Active,
            created_at: now,
            updated_at: now,
        };
        store.insert_membership(&membership).await?;
        println!("Granted {} to {}", PLATFORM_ADMIN.name, user_id);
    }

    Ok(())
}

async fn engine() -> anyhow::Result<AuthzEngine> {
    let pool = get_pool().await?;
    let config = AuthzConfig::from_env()?;
    Ok(AuthzEngine::new(Arc::new(SqliteStore::new(pool)), config))
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sanitized = sanitize_name(name);
    let filename = format!("{}_{}.sql", timestamp, sanitized);
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let options = SqliteConnectOptions::from_str(&database_url)
        .context("invalid DATABASE_URL")?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let has_table: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;

    let applied_versions: HashSet<i64> = if has_table.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // ./migrations when run from the repo root, else the crate's own folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", display))
}
