use crate::commands::{
    run_export, run_import, run_remind, run_status, ExportArgs, ImportArgs, RemindArgs,
    StatusArgs,
};
use crate::server;
use clap::{Args, Parser, Subcommand};
use visitor_desk::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Visitor Desk",
    about = "Track visitor document confirmations and manage event rosters",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Import visitors from a roster CSV and print the row report
    Import(ImportArgs),
    /// Write the visitor roster as CSV
    Export(ExportArgs),
    /// Show one visitor's confirmation status for an event
    Status(StatusArgs),
    /// Send reminders to visitors with outstanding confirmations
    Remind(RemindArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Import(args) => run_import(args).await,
        Command::Export(args) => run_export(args).await,
        Command::Status(args) => run_status(args).await,
        Command::Remind(args) => run_remind(args).await,
    }
}
