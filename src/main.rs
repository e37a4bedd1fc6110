use anyhow::Context;
use clap::{Parser, Subcommand};
use plan_rollup::config::EngineConfig;
use plan_rollup::telemetry::init_tracing;
use plan_rollup::types::{Payload, Row, TableRef, Version};
use plan_rollup::PlanService;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "plan-rollup", about = "Hierarchical plan aggregation and approval engine")]
struct Cli {
    /// Engine configuration JSON.
    #[arg(long, short, default_value = "config/heating_plan.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and exit.
    Check,
    /// Print the displayed data of a table.
    View {
        project: String,
        table: String,
        /// Fall back to a leaf's draft when nothing is submitted.
        #[arg(long)]
        preview: bool,
    },
    /// Print one stored version of a table.
    Snapshot {
        project: String,
        table: String,
        #[arg(long, default_value = "submitted")]
        version: Version,
    },
    /// Print display statuses; all tables when none are named.
    Status { project: String, tables: Vec<String> },
    /// Print visible history, newest first.
    History {
        project: String,
        /// Limit to one table.
        table: Option<String>,
    },
    /// Store rows (a JSON array) as the table's draft.
    SaveDraft {
        project: String,
        table: String,
        #[arg(long = "as")]
        principal: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Store rows (a JSON array) as the table's submission.
    Submit {
        project: String,
        table: String,
        #[arg(long = "as")]
        principal: String,
        #[arg(long)]
        file: PathBuf,
    },
    Approve {
        project: String,
        table: String,
        #[arg(long = "as")]
        principal: String,
    },
    Unapprove {
        project: String,
        table: String,
        #[arg(long = "as")]
        principal: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_rows(table: &str, path: &Path) -> anyhow::Result<Payload> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let rows: Vec<Row> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing rows in {}", path.display()))?;
    Ok(Payload::new(
        TableRef {
            id: table.to_string(),
            name: String::new(),
        },
        rows,
    ))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config)?;
    init_tracing(&config.log_filter);

    if let Command::Check = cli.command {
        let catalog = config.catalog()?;
        let directory = config.directory()?;
        for registry in catalog.projects() {
            println!("{}: {} tables", registry.project(), registry.tables().count());
        }
        println!("{} users", directory.len());
        return Ok(());
    }

    let service = PlanService::from_config(&config)?;

    match cli.command {
        Command::Check => {}
        Command::View { project, table, preview } => {
            let view = if preview {
                service.preview_view(&project, &table)?
            } else {
                service.compute_view(&project, &table)?
            };
            match view {
                Some(view) => print_json(&view)?,
                None => println!("no data for table {table}"),
            }
        }
        Command::Snapshot {
            project,
            table,
            version,
        } => match service.snapshot(&project, &table, version)? {
            Some(payload) => print_json(&payload)?,
            None => println!("no {version} snapshot for table {table}"),
        },
        Command::Status { project, tables } => {
            let tables = if tables.is_empty() {
                let registry = service
                    .catalog()
                    .get(&project)
                    .with_context(|| format!("unknown project `{project}`"))?;
                registry.tables().map(|t| t.id.clone()).collect::<Vec<_>>()
            } else {
                tables
            };
            print_json(&service.statuses(&project, &tables)?)?;
        }
        Command::History { project, table } => {
            let events = match table {
                Some(table) => service.history(&project, &table)?,
                None => service.project_history(&project)?,
            };
            print_json(&events)?;
        }
        Command::SaveDraft { project, table, principal, file } => {
            let payload = read_rows(&table, &file)?;
            service.save_draft(&project, &table, &principal, payload)?;
            println!("draft saved for table {table}");
        }
        Command::Submit { project, table, principal, file } => {
            let payload = read_rows(&table, &file)?;
            service.submit(&project, &table, &principal, payload)?;
            println!("table {table} submitted");
        }
        Command::Approve { project, table, principal } => {
            let approved = service.approve(&project, &table, &principal)?;
            println!(
                "table {table} approved, digest {}",
                approved.approval_digest.unwrap_or_default()
            );
        }
        Command::Unapprove { project, table, principal } => {
            let marker = service.unapprove(&project, &table, &principal)?;
            println!(
                "approval of table {table} withdrawn at {}",
                marker.withdrawn_at.to_datetime_utc()
            );
        }
    }

    service.flush()
}
