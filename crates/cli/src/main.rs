//! `alarmctl` CLI entry-point.
//!
//! Available sub-commands:
//! - `show`       — print one alarm with all of its metrics.
//! - `list`       — list the tenant's alarms, optionally filtered.
//! - `metrics`    — print the metrics linked to an alarm.
//! - `sub-alarms` — print the sub-alarm expressions of an alarm.
//! - `delete`     — permanently delete an alarm.

use std::time::Duration;

use alarms::models::fold_alarm_metrics;
use alarms::{AlarmFilters, AlarmsRepository, ExecutorConfig, PgExecutor};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "alarmctl",
    about = "Inspect and delete tenant alarms",
    version
)]
struct Cli {
    #[command(flatten)]
    db: DbArgs,

    /// Tenant whose alarms are addressed.
    #[arg(long, env = "ALARMS_TENANT_ID")]
    tenant_id: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct DbArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Retries for transient database errors.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    #[arg(long, default_value_t = 100)]
    retry_base_delay_ms: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Print one alarm with all of its metrics.
    Show { alarm_id: String },
    /// List alarms matching every given filter.
    List {
        #[arg(long)]
        alarm_definition_id: Option<String>,
        #[arg(long)]
        metric_name: Option<String>,
        /// OK, ALARM or UNDETERMINED.
        #[arg(long)]
        state: Option<String>,
        /// Comma-separated `name:value` pairs, all of which must match.
        #[arg(long)]
        metric_dimensions: Option<String>,
    },
    /// Print the metrics linked to an alarm.
    Metrics { alarm_id: String },
    /// Print the sub-alarm expressions of an alarm.
    SubAlarms { alarm_id: String },
    /// Permanently delete an alarm.
    Delete { alarm_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let pool = alarms::pool::create_pool(&cli.db.database_url, cli.db.max_connections)
        .await
        .context("failed to connect to database")?;
    let config = ExecutorConfig {
        max_retries: cli.db.max_retries,
        retry_base_delay: Duration::from_millis(cli.db.retry_base_delay_ms),
    };
    let repo = AlarmsRepository::new(PgExecutor::new(pool, config));
    let tenant = cli.tenant_id.as_str();

    match cli.command {
        Command::Show { alarm_id } => {
            let alarm = repo.find_alarm(tenant, &alarm_id).await?;
            println!("{}", serde_json::to_string_pretty(&alarm)?);
        }
        Command::List {
            alarm_definition_id,
            metric_name,
            state,
            metric_dimensions,
        } => {
            let params = [
                ("alarm_definition_id", alarm_definition_id),
                ("metric_name", metric_name),
                ("state", state),
                ("metric_dimensions", metric_dimensions),
            ];
            let filters = AlarmFilters::from_query_params(
                params
                    .iter()
                    .filter_map(|(key, value)| value.as_deref().map(|v| (*key, v))),
            )?;
            let alarms = repo.find_alarms(tenant, &filters).await?;
            info!("{} alarms matched", alarms.len());
            println!("{}", serde_json::to_string_pretty(&alarms)?);
        }
        Command::Metrics { alarm_id } => {
            // Authorize against the tenant before the unscoped metrics read.
            repo.get_alarm(tenant, &alarm_id).await?;
            let metrics = fold_alarm_metrics(repo.get_alarm_metrics(&alarm_id).await?);
            let metrics: Vec<_> = metrics.into_iter().flat_map(|(_, m)| m).collect();
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Command::SubAlarms { alarm_id } => {
            let subs = repo.get_sub_alarms(tenant, &alarm_id).await?;
            println!("{}", serde_json::to_string_pretty(&subs)?);
        }
        Command::Delete { alarm_id } => {
            repo.delete_alarm(tenant, &alarm_id).await?;
            println!("deleted alarm {alarm_id}");
        }
    }

    Ok(())
}
