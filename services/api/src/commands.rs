use crate::infra::{build_service, parse_date};
use chrono::NaiveDate;
use clap::Args;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;
use visitor_desk::config::AppConfig;
use visitor_desk::db::SqliteRepository;
use visitor_desk::error::AppError;
use visitor_desk::telemetry;
use visitor_desk::workflows::confirmations::{reference_date, EventId, VisitorId};
use visitor_desk::workflows::roster::{VisitorExporter, VisitorImporter};

#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    /// Roster CSV with First Name, Last Name, Email, Phone, Organization and Event columns
    pub(crate) csv: PathBuf,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ExportArgs {
    /// Only list visitors assigned to the event with this name
    #[arg(long)]
    pub(crate) event: Option<String>,
    /// Write to this file instead of stdout
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct StatusArgs {
    /// Visitor id (UUID)
    #[arg(long)]
    pub(crate) visitor: VisitorId,
    /// Event id (UUID)
    #[arg(long)]
    pub(crate) event: EventId,
}

#[derive(Args, Debug, Default)]
pub(crate) struct RemindArgs {
    /// Reference date for the upcoming-event window (defaults to today)
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Limit reminders to a single event
    #[arg(long)]
    pub(crate) event: Option<EventId>,
}

fn load_for_cli() -> Result<AppConfig, AppError> {
    let config = AppConfig::load()?;
    telemetry::init_for_cli(&config.telemetry)?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let mut stdout = std::io::stdout();
    serde_json::to_writer_pretty(&mut stdout, value).map_err(std::io::Error::from)?;
    writeln!(stdout)?;
    Ok(())
}

pub(crate) async fn run_import(args: ImportArgs) -> Result<(), AppError> {
    let config = load_for_cli()?;
    let repository = std::sync::Arc::new(SqliteRepository::open(&config.database).await?);
    let report = VisitorImporter::new(repository)
        .import_path(&args.csv)
        .await?;
    print_json(&report)
}

pub(crate) async fn run_export(args: ExportArgs) -> Result<(), AppError> {
    let config = load_for_cli()?;
    let repository = std::sync::Arc::new(SqliteRepository::open(&config.database).await?);
    let exporter = VisitorExporter::new(repository);
    let event = args.event.as_deref();

    let lines = match &args.output {
        Some(path) => {
            let writer = BufWriter::new(File::create(path)?);
            exporter.export(writer, event).await?
        }
        None => exporter.export(std::io::stdout(), event).await?,
    };
    info!(lines, event = event.unwrap_or("all"), "roster exported");
    Ok(())
}

pub(crate) async fn run_status(args: StatusArgs) -> Result<(), AppError> {
    let config = load_for_cli()?;
    let service = build_service(&config).await?;
    let status = service
        .resolve_confirmation_status(args.visitor, args.event)
        .await?;
    print_json(&status)
}

pub(crate) async fn run_remind(args: RemindArgs) -> Result<(), AppError> {
    let config = load_for_cli()?;
    let service = build_service(&config).await?;
    let today = reference_date(args.today);
    let sent = service.send_reminders(today, args.event).await?;
    print_json(&serde_json::json!({ "today": today, "recipients": sent }))
}
