//! Keystone CLI - operator commands
//!
//! Usage:
//!   keystone check-password <password>
//!   keystone gen-secret [--length 64]
//!   keystone init-db [--config keystone.toml]
//!   keystone purge [--config keystone.toml]

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use keystone_core::auth::{
    policy, postgres, Argon2Hasher, AuthDependencies, AuthService, PasswordConfig,
};
use keystone_core::config::MIN_SECRET_LEN;
use keystone_core::{AppConfig, DatabaseBackend, SystemClock, TracingAuditSink};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "keystone")]
#[command(about = "Keystone authentication service operator tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a candidate password against the password policy
    CheckPassword {
        password: String,
        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a random signing secret for JWT_SECRET
    GenSecret {
        #[arg(long, default_value_t = 64)]
        length: usize,
    },
    /// Create the PostgreSQL tables if they do not exist
    InitDb {
        /// TOML configuration file; environment variables override it
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Delete expired blacklist entries and refresh tokens
    Purge {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn check_password(password: &str, json: bool) -> anyhow::Result<()> {
    let verdict = policy::evaluate(password);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "accepted": verdict.is_accepted(),
                "violations": verdict.violations(),
                "messages": verdict.messages(),
            })
        );
    } else if verdict.is_accepted() {
        println!("Password accepted");
    } else {
        println!("Password rejected:");
        for message in verdict.messages() {
            println!("  - {message}");
        }
    }

    if !verdict.is_accepted() {
        std::process::exit(1);
    }
    Ok(())
}

fn random_secret(length: usize) -> anyhow::Result<String> {
    if length < MIN_SECRET_LEN {
        bail!("secret length must be at least {MIN_SECRET_LEN}");
    }
    Ok(rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect())
}

fn gen_secret(length: usize) -> anyhow::Result<()> {
    println!("{}", random_secret(length)?);
    Ok(())
}

async fn connect(config: Option<PathBuf>) -> anyhow::Result<(AppConfig, postgres::PgPool)> {
    let config = AppConfig::load(config).context("loading configuration")?;
    if config.database.backend != DatabaseBackend::Postgres {
        bail!("the memory backend keeps nothing between runs; set DATABASE_BACKEND=postgres");
    }
    let pool = postgres::connect(&config.database)
        .await
        .context("connecting to PostgreSQL")?;
    Ok((config, pool))
}

async fn init_db(config: Option<PathBuf>) -> anyhow::Result<()> {
    let (_, pool) = connect(config).await?;
    postgres::ensure_schema(&pool).await?;
    println!("Schema is up to date");
    Ok(())
}

async fn purge(config: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, pool) = connect(config).await?;
    let deps = AuthDependencies::postgres(
        pool,
        Arc::new(Argon2Hasher::new(PasswordConfig::default())),
        Arc::new(TracingAuditSink),
        Arc::new(SystemClock),
    );
    let service = AuthService::new(&config, deps);

    let report = service.purge_expired().await?;
    println!(
        "Removed {} blacklist entries and {} refresh tokens",
        report.blacklist_entries, report.refresh_tokens
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keystone_core=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckPassword { password, json } => check_password(&password, json)?,
        Commands::GenSecret { length } => gen_secret(length)?,
        Commands::InitDb { config } => init_db(config).await?,
        Commands::Purge { config } => purge(config).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_secret_length_and_alphabet() {
        let secret = random_secret(48).unwrap();
        assert_eq!(secret.len(), 48);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(secret, random_secret(48).unwrap());
    }

    #[test]
    fn test_random_secret_rejects_short_length() {
        assert!(random_secret(MIN_SECRET_LEN - 1).is_err());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["keystone", "check-password", "hunter2", "--json"]);
        assert!(matches!(
            cli.command,
            Commands::CheckPassword { ref password, json: true } if password == "hunter2"
        ));

        let cli = Cli::parse_from(["keystone", "gen-secret"]);
        assert!(matches!(cli.command, Commands::GenSecret { length: 64 }));

        let cli = Cli::parse_from(["keystone", "purge", "--config", "keystone.toml"]);
        assert!(matches!(cli.command, Commands::Purge { config: Some(_) }));
    }
}
