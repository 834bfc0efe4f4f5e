use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use datasetdb::{
    APP_HASH_KEY, FilePoolOpener, IDEMPOTENCY_KEY, OsFilesystem, Registry, RegistryOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dataset-tool")]
#[command(about = "Developer tooling for datasetdb registry directories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the directory (rolling back any unfinished session) and list datasets
    List { dir: PathBuf },
    /// Show the commit bookkeeping a dataset carries
    Inspect { dir: PathBuf, dbid: String },
    /// Run a read-only statement against committed data
    Query {
        dir: PathBuf,
        dbid: String,
        sql: String,
    },
    /// Apply statements to one dataset in a single commit
    Apply {
        dir: PathBuf,
        #[arg(long)]
        key: String,
        /// Replay a commit that may have been interrupted
        #[arg(long)]
        recovery: bool,
        dbid: String,
        #[arg(required = true)]
        sql: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::List { dir } => list(&dir).await,
        Command::Inspect { dir, dbid } => inspect(&dir, &dbid).await,
        Command::Query { dir, dbid, sql } => query(&dir, &dbid, &sql).await,
        Command::Apply {
            dir,
            key,
            recovery,
            dbid,
            sql,
        } => apply(&dir, &key, recovery, &dbid, &sql).await,
    }
}

async fn open(dir: &Path) -> Result<Registry> {
    let fs = Arc::new(OsFilesystem::new());
    let opener = Arc::new(FilePoolOpener::new(fs.clone()));
    let options = RegistryOptions::new().filesystem(fs).name("dataset-tool");

    Registry::new(opener, dir, options)
        .await
        .with_context(|| format!("Failed to open registry at '{}'", dir.display()))
}

async fn list(dir: &Path) -> Result<()> {
    let registry = open(dir).await?;
    for dbid in registry.list().await? {
        println!("{}", dbid);
    }
    registry.close().await?;
    Ok(())
}

async fn inspect(dir: &Path, dbid: &str) -> Result<()> {
    let registry = open(dir).await?;

    let key = registry.get(dbid, IDEMPOTENCY_KEY, false).await?;
    let app_hash = registry.get(dbid, APP_HASH_KEY, false).await?;

    let render = |value: Option<Vec<u8>>| value.map(hex::encode).unwrap_or_else(|| "-".to_string());
    println!("dataset:         {}", dbid);
    println!("idempotency key: {}", render(key));
    println!("app hash:        {}", render(app_hash));

    registry.close().await?;
    Ok(())
}

async fn query(dir: &Path, dbid: &str, sql: &str) -> Result<()> {
    let registry = open(dir).await?;
    let result = registry
        .query(dbid, sql, &[])
        .await
        .with_context(|| format!("Query against '{}' failed", dbid))?;
    print!("{}", result);
    registry.close().await?;
    Ok(())
}

async fn apply(dir: &Path, key: &str, recovery: bool, dbid: &str, sql: &[String]) -> Result<()> {
    if key.is_empty() {
        return Err(anyhow!("--key must not be empty"));
    }

    let registry = open(dir).await?;
    let outcome = apply_in_session(&registry, key.as_bytes(), recovery, dbid, sql).await;

    if outcome.is_err() && registry.in_session().await {
        if let Err(err) = registry.cancel().await {
            eprintln!("cancel after failure also failed: {}", err);
        }
    }
    registry.close().await?;

    let hash = outcome?;
    println!("{}", hex::encode(hash));
    Ok(())
}

async fn apply_in_session(
    registry: &Registry,
    key: &[u8],
    recovery: bool,
    dbid: &str,
    sql: &[String],
) -> Result<Vec<u8>> {
    if recovery {
        registry.begin_recovery(key).await?;
    } else {
        registry.begin(key).await?;
    }

    if recovery || !registry.list().await?.iter().any(|d| d == dbid) {
        registry
            .create(dbid)
            .await
            .with_context(|| format!("Failed to create dataset '{}'", dbid))?;
    }

    for stmt in sql {
        registry
            .execute(dbid, stmt, &[])
            .await
            .with_context(|| format!("Statement failed: {}", stmt))?;
    }

    Ok(registry.commit(key).await?)
}
