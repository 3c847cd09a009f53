use async_trait::async_trait;
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;
use visitor_desk::config::AppConfig;
use visitor_desk::db::SqliteRepository;
use visitor_desk::error::AppError;
use visitor_desk::files::LocalDocumentStorage;
use visitor_desk::workflows::confirmations::{
    ConfirmationService, ReminderDispatcher, ReminderError, ReminderRecipient,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Stands in for the hosted mail function: each batch becomes one log event.
#[derive(Debug, Default, Clone)]
pub(crate) struct LogReminderDispatcher;

#[async_trait]
impl ReminderDispatcher for LogReminderDispatcher {
    async fn dispatch(&self, recipients: Vec<ReminderRecipient>) -> Result<(), ReminderError> {
        let emails: Vec<&str> = recipients
            .iter()
            .map(|recipient| recipient.email.as_str())
            .collect();
        info!(count = recipients.len(), ?emails, "reminder batch dispatched");
        Ok(())
    }
}

/// Opens the database and wires the service the same way for the server and the CLI.
pub(crate) async fn build_service(
    config: &AppConfig,
) -> Result<Arc<ConfirmationService<SqliteRepository>>, AppError> {
    let repository = Arc::new(SqliteRepository::open(&config.database).await?);
    let files = Arc::new(LocalDocumentStorage::new(
        config.storage.root.clone(),
        config.storage.public_base_url.clone(),
    ));
    Ok(Arc::new(ConfirmationService::new(
        repository,
        files,
        Arc::new(LogReminderDispatcher),
        config.reminders.clone(),
    )))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
