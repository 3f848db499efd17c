//! outbox CLI: operator interface to the outbox table.

use chrono::Utc;
use clap::{Parser, Subcommand};
use outbox_rs::config::Config;
use outbox_rs::config::secrets::ExposeSecret;
use outbox_rs::db::Db;
use outbox_rs::error::Error;
use outbox_rs::model::{OutboxRecord, RecordId, Status};
use outbox_rs::reaper::Reaper;
use outbox_rs::store::OutboxStore;
use outbox_rs::telemetry::{TelemetryConfig, init_telemetry};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "outbox", about = "Inspect and maintain the transactional outbox")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// List outbox records, newest first
    List {
        /// Filter by status (pending, locked, success, fail)
        #[arg(long)]
        status: Option<String>,
        /// Maximum records to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show one record
    Show {
        /// Record ID (full UUID or prefix)
        id: String,
    },
    /// Release locks held longer than the stale threshold
    Reap {
        /// Override OUTBOX_STALE_AFTER_SECS
        #[arg(long)]
        stale_after_secs: Option<u64>,
    },
    /// Re-arm a failed record for another attempt
    Rearm {
        /// Record ID (full UUID or prefix)
        id: String,
    },
    /// Re-arm failed records still under the retry cap
    RearmAll {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Delete old terminal records
    Purge {
        /// success or fail
        #[arg(long)]
        status: String,
        /// Only records last modified more than this many days ago
        #[arg(long)]
        older_than_days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "outbox".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Command::List { status, limit } => cmd_list(&db, status, limit).await,
        Command::Show { id } => cmd_show(&db, &id).await,
        Command::Reap { stale_after_secs } => {
            let stale_after = stale_after_secs
                .map(Duration::from_secs)
                .unwrap_or(config.stale_after);
            let reaper = Reaper::new(db, stale_after, config.max_attempts);
            let count = reaper.reap_stale().await?;
            println!("Released {count} stale lock(s).");
            Ok(())
        }
        Command::Rearm { id } => {
            let id = resolve_id(&db, &id).await?;
            let reaper = Reaper::new(Arc::clone(&db), config.stale_after, config.max_attempts);
            if reaper.rearm(id).await? {
                println!("Re-armed {id}.");
            } else {
                anyhow::bail!(
                    "{id} was not re-armed: it is not failed or has used {} attempt(s)",
                    config.max_attempts
                );
            }
            Ok(())
        }
        Command::RearmAll { limit } => {
            let reaper = Reaper::new(db, config.stale_after, config.max_attempts);
            let count = reaper.rearm_all(limit).await?;
            println!("Re-armed {count} record(s).");
            Ok(())
        }
        Command::Purge {
            status,
            older_than_days,
        } => {
            let status: Status = status.parse()?;
            let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
            let reaper = Reaper::new(db, config.stale_after, config.max_attempts);
            let count = reaper.purge(status, cutoff).await?;
            println!("Purged {count} {status} record(s).");
            Ok(())
        }
    }
}

async fn cmd_list(db: &Db, status: Option<String>, limit: i64) -> anyhow::Result<()> {
    let status: Option<Status> = status.map(|s| s.parse()).transpose()?;
    let records = db.list(status, limit).await?;

    if records.is_empty() {
        println!("No outbox records found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<40}  {:<8}  {:<4}  CREATED",
        "ID", "METHOD", "STATUS", "TRY"
    );
    println!("{}", "-".repeat(90));

    for record in &records {
        let method = format!("{}::{}", record.target_type, record.method_name);
        let method = if method.len() > 40 {
            method.chars().take(40).collect()
        } else {
            method
        };
        println!(
            "{:<8}  {:<40}  {:<8}  {:<4}  {}",
            record.id.short(),
            method,
            record.status,
            record.attempts,
            record.created_date.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} record(s)", records.len());
    Ok(())
}

async fn cmd_show(db: &Db, id: &str) -> anyhow::Result<()> {
    let id = resolve_id(db, id).await?;
    let record = db
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    print_record(&record);
    Ok(())
}

fn print_record(record: &OutboxRecord) {
    println!("ID:          {}", record.id);
    println!("Target:      {}", record.target_type);
    println!("Method:      {}", record.method_name);
    println!("Param Types: {}", record.param_types);
    println!("Params:      {}", record.param_values);
    println!("Status:      {}", record.status);
    println!(
        "Lock:        {}",
        record
            .lock_id
            .as_ref()
            .map(|l| l.to_string())
            .unwrap_or("-".to_string())
    );
    println!("Attempts:    {}", record.attempts);
    println!("Created:     {}", record.created_date);
    println!("Modified:    {}", record.modified_date);
    if let Some(ref err) = record.error_message {
        println!("---");
        println!("Error:       {err}");
    }
}

/// Accept a full UUID or a unique prefix of one.
async fn resolve_id(db: &Db, id_str: &str) -> anyhow::Result<RecordId> {
    if id_str.len() >= 36 {
        return Ok(RecordId(uuid::Uuid::parse_str(id_str)?));
    }

    let matches = db.find_by_prefix(id_str, 2).await?;
    match matches.len() {
        0 => anyhow::bail!("no outbox record matching prefix '{id_str}'"),
        1 => Ok(matches[0]),
        _ => anyhow::bail!("several outbox records match prefix '{id_str}', be more specific"),
    }
}
