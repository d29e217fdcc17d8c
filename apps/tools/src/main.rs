use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use server_api::warehouse::parse_rows;
use shared::domain::{ScriptId, UsageEventType};
use storage::{DateRange, NewUsageLog, Storage, DEFAULT_RECENT_USAGE};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/kiosk.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    ListScripts,
    ShowScript {
        script_id: i64,
    },
    RecentUsage {
        #[arg(long, default_value_t = DEFAULT_RECENT_USAGE)]
        limit: u32,
    },
    Analytics {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Loads a saved warehouse reply (`{"rows": [...]}`) into the catalog.
    ImportProperties {
        path: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::ListScripts => {
            for script in storage.list_scripts().await? {
                println!(
                    "{}\t{}\t{} steps\tupdated {}",
                    script.id.0, script.name, script.step_count, script.updated_at
                );
            }
        }
        Command::ShowScript { script_id } => {
            let script = storage
                .get_script(ScriptId(script_id))
                .await?
                .with_context(|| format!("script {script_id} not found"))?;
            println!("{} ({} steps)", script.name, script.steps.len());
            for (index, step) in script.steps.iter().enumerate() {
                println!("  {}. {}", index + 1, step.summary());
            }
        }
        Command::RecentUsage { limit } => {
            for log in storage.recent_usage(limit).await? {
                println!(
                    "{}\t{}\t{}",
                    log.created_at,
                    log.event_type,
                    log.canvas_pid.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Analytics { start, end, limit } => {
            let report = storage
                .usage_analytics(DateRange { start, end }, limit)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::ImportProperties { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            let reply: serde_json::Value = serde_json::from_str(&raw)?;
            let rows = reply
                .get("rows")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            let batch = parse_rows(rows);
            let inserted = storage.replace_properties(&batch.properties).await?;
            storage
                .record_usage(&NewUsageLog::event(
                    UsageEventType::AdminRefresh,
                    serde_json::json!({ "recordsProcessed": batch.rows_received }),
                ))
                .await?;
            println!(
                "imported {inserted} properties from {} rows",
                batch.rows_received
            );
        }
    }

    Ok(())
}
