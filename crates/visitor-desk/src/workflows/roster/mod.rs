//! Bulk visitor import from the six-column roster sheet, and the matching export.
//!
//! A malformed sheet (unreadable bytes, missing column) fails the whole import. Anything
//! wrong with a single row is reported against that row and the rest carry on.

mod export;
mod normalizer;
mod parser;
mod validation;

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::workflows::confirmations::domain::{EventId, OrganizationId, Visitor, VisitorId};
use crate::workflows::confirmations::repository::{ConfirmationRepository, RepositoryError};

pub use export::{RosterExportError, VisitorExporter};
pub use parser::ROSTER_HEADERS;

use normalizer::{normalize_email, normalize_header};
use parser::RosterRow;
use validation::{is_valid_email, is_valid_phone};

#[derive(Debug)]
pub enum RosterImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    MissingColumn(&'static str),
    Repository(RepositoryError),
}

impl std::fmt::Display for RosterImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RosterImportError::Io(err) => write!(f, "failed to read roster file: {}", err),
            RosterImportError::Csv(err) => write!(f, "invalid roster CSV data: {}", err),
            RosterImportError::MissingColumn(column) => {
                write!(f, "roster is missing the '{}' column", column)
            }
            RosterImportError::Repository(err) => write!(f, "roster lookup failed: {}", err),
        }
    }
}

impl std::error::Error for RosterImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RosterImportError::Io(err) => Some(err),
            RosterImportError::Csv(err) => Some(err),
            RosterImportError::MissingColumn(_) => None,
            RosterImportError::Repository(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for RosterImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for RosterImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<RepositoryError> for RosterImportError {
    fn from(err: RepositoryError) -> Self {
        Self::Repository(err)
    }
}

/// Why a single row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowErrorKind {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid email '{0}'")]
    InvalidEmail(String),
    #[error("invalid phone '{0}', expected 000-000-0000")]
    InvalidPhone(String),
    #[error("unknown organization '{0}'")]
    UnknownOrganization(String),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("a visitor with this email already exists")]
    DuplicateEmail,
    #[error("'{0}' is not valid UTF-8 text")]
    InvalidEncoding(&'static str),
    #[error("could not save row: {0}")]
    Storage(String),
}

impl RowErrorKind {
    pub const fn code(&self) -> &'static str {
        match self {
            RowErrorKind::MissingField(_) => "missing_field",
            RowErrorKind::InvalidEmail(_) => "invalid_email",
            RowErrorKind::InvalidPhone(_) => "invalid_phone",
            RowErrorKind::UnknownOrganization(_) => "unknown_organization",
            RowErrorKind::UnknownEvent(_) => "unknown_event",
            RowErrorKind::DuplicateEmail => "duplicate_email",
            RowErrorKind::InvalidEncoding(_) => "invalid_encoding",
            RowErrorKind::Storage(_) => "storage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// 1-based data row, header excluded.
    pub row: usize,
    pub email: Option<String>,
    pub kind: RowErrorKind,
}

impl Serialize for RowError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RowError", 4)?;
        state.serialize_field("row", &self.row)?;
        state.serialize_field("email", &self.email)?;
        state.serialize_field("reason", self.kind.code())?;
        state.serialize_field("message", &self.kind.to_string())?;
        state.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub success: usize,
    pub errors: Vec<RowError>,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.success + self.errors.len()
    }
}

/// Imports roster sheets into the visitor directory.
pub struct VisitorImporter<R> {
    repository: Arc<R>,
}

#[derive(Default)]
struct LookupCache {
    organizations: HashMap<String, Option<OrganizationId>>,
    events: HashMap<String, Option<EventId>>,
}

impl<R> VisitorImporter<R>
where
    R: ConfirmationRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub async fn import_path<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<ImportReport, RosterImportError> {
        let bytes = tokio::fs::read(path).await?;
        self.import_reader(bytes.as_slice()).await
    }

    pub async fn import_reader<Rd: Read + Send>(
        &self,
        reader: Rd,
    ) -> Result<ImportReport, RosterImportError> {
        let rows = parser::parse_rows(reader)?;
        let mut cache = LookupCache::default();
        let mut report = ImportReport::default();

        for row in rows {
            let row = match row {
                Ok(row) => row,
                Err(undecodable) => {
                    let kind = RowErrorKind::InvalidEncoding(undecodable.column);
                    warn!(row = undecodable.row, error = %kind, "roster row rejected");
                    report.errors.push(RowError {
                        row: undecodable.row,
                        email: undecodable.email.as_deref().map(normalize_email),
                        kind,
                    });
                    continue;
                }
            };
            let number = row.row;
            let email = row.email.as_deref().map(normalize_email);
            match self.apply_row(row, &mut cache).await {
                Ok(()) => report.success += 1,
                Err(RowOutcome::Rejected(kind)) => {
                    warn!(row = number, error = %kind, "roster row rejected");
                    report.errors.push(RowError {
                        row: number,
                        email,
                        kind,
                    });
                }
                Err(RowOutcome::Fatal(err)) => return Err(err.into()),
            }
        }

        info!(
            success = report.success,
            failed = report.errors.len(),
            "visitor import finished"
        );
        Ok(report)
    }

    async fn apply_row(&self, row: RosterRow, cache: &mut LookupCache) -> Result<(), RowOutcome> {
        let first_name = row.first_name.ok_or(RowErrorKind::MissingField("First Name"))?;
        let last_name = row.last_name.ok_or(RowErrorKind::MissingField("Last Name"))?;
        let raw_email = row.email.ok_or(RowErrorKind::MissingField("Email"))?;
        let email = normalize_email(&raw_email);
        if !is_valid_email(&email) {
            return Err(RowErrorKind::InvalidEmail(raw_email).into());
        }
        if let Some(phone) = &row.phone {
            if !is_valid_phone(phone) {
                return Err(RowErrorKind::InvalidPhone(phone.clone()).into());
            }
        }

        let organization_id = match &row.organization {
            Some(name) => Some(
                self.organization_id(name, cache)
                    .await?
                    .ok_or_else(|| RowErrorKind::UnknownOrganization(name.clone()))?,
            ),
            None => None,
        };
        let event_id = match &row.event {
            Some(name) => Some(
                self.event_id(name, cache)
                    .await?
                    .ok_or_else(|| RowErrorKind::UnknownEvent(name.clone()))?,
            ),
            None => None,
        };

        self.repository
            .register_visitor(
                Visitor {
                    id: VisitorId::new(),
                    first_name,
                    last_name,
                    email,
                    phone: row.phone,
                    organization_id,
                    profile_id: None,
                },
                event_id,
            )
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => RowErrorKind::DuplicateEmail,
                other => RowErrorKind::Storage(other.to_string()),
            })?;
        Ok(())
    }

    async fn organization_id(
        &self,
        name: &str,
        cache: &mut LookupCache,
    ) -> Result<Option<OrganizationId>, RowOutcome> {
        let key = normalize_header(name);
        if let Some(hit) = cache.organizations.get(&key) {
            return Ok(*hit);
        }
        let found = self
            .repository
            .find_organization_by_name(name)
            .await
            .map_err(RowOutcome::Fatal)?
            .map(|org| org.id);
        cache.organizations.insert(key, found);
        Ok(found)
    }

    async fn event_id(
        &self,
        name: &str,
        cache: &mut LookupCache,
    ) -> Result<Option<EventId>, RowOutcome> {
        let key = normalize_header(name);
        if let Some(hit) = cache.events.get(&key) {
            return Ok(*hit);
        }
        let found = self
            .repository
            .find_event_by_name(name)
            .await
            .map_err(RowOutcome::Fatal)?
            .map(|event| event.id);
        cache.events.insert(key, found);
        Ok(found)
    }
}

/// Lookups that fail outright abort the import; everything else is the row's problem.
enum RowOutcome {
    Rejected(RowErrorKind),
    Fatal(RepositoryError),
}

impl From<RowErrorKind> for RowOutcome {
    fn from(kind: RowErrorKind) -> Self {
        RowOutcome::Rejected(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::workflows::confirmations::domain::{Event, Organization};
    use chrono::NaiveDate;
    use std::io::Cursor;

    const HEADER: &str = "First Name,Last Name,Email,Phone,Organization,Event\n";

    async fn seeded() -> (Arc<MemoryRepository>, Event) {
        let repository = Arc::new(MemoryRepository::default());
        repository
            .insert_organization(Organization {
                id: OrganizationId::new(),
                name: "Acme Corp".to_string(),
            })
            .await
            .expect("organization");
        let event = repository
            .insert_event(Event {
                id: EventId::new(),
                name: "Plant Tour".to_string(),
                organization_id: None,
                starts_on: NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date"),
                ends_on: None,
            })
            .await
            .expect("event");
        (repository, event)
    }

    #[tokio::test]
    async fn bad_phone_rejects_only_its_row() {
        let (repository, event) = seeded().await;
        let mut csv = HEADER.to_string();
        for index in 1..=10 {
            let phone = if index == 5 { "5155550105" } else { "515-555-0100" };
            csv.push_str(&format!(
                "Visitor,Number{index},visitor{index}@example.com,{phone},Acme Corp,Plant Tour\n"
            ));
        }

        let report = VisitorImporter::new(repository.clone())
            .import_reader(Cursor::new(csv))
            .await
            .expect("import runs");

        assert_eq!(report.success, 9);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 5);
        assert_eq!(report.errors[0].email.as_deref(), Some("visitor5@example.com"));
        assert!(matches!(report.errors[0].kind, RowErrorKind::InvalidPhone(_)));
        assert_eq!(repository.list_visitors().await.expect("list").len(), 9);
        assert_eq!(
            repository.event_assignments(event.id).await.expect("assignments").len(),
            9
        );
    }

    #[tokio::test]
    async fn undecodable_row_rejects_only_itself() {
        let (repository, _) = seeded().await;
        let mut csv = HEADER.as_bytes().to_vec();
        for index in 1..=10 {
            if index == 5 {
                csv.extend_from_slice(b"Jos\xE9,Bad,visitor5@example.com,,,\n");
            } else {
                csv.extend_from_slice(
                    format!("Visitor,Number{index},visitor{index}@example.com,,Acme Corp,\n")
                        .as_bytes(),
                );
            }
        }

        let report = VisitorImporter::new(repository.clone())
            .import_reader(Cursor::new(csv))
            .await
            .expect("import runs");

        assert_eq!(report.success, 9);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 5);
        assert_eq!(report.errors[0].email.as_deref(), Some("visitor5@example.com"));
        assert_eq!(
            report.errors[0].kind,
            RowErrorKind::InvalidEncoding("First Name")
        );
        assert_eq!(repository.list_visitors().await.expect("list").len(), 9);
    }

    #[tokio::test]
    async fn optional_columns_may_be_blank() {
        let (repository, _) = seeded().await;
        let csv = format!("{HEADER}Ada,Lovelace,ADA@Example.com,,,\n");

        let report = VisitorImporter::new(repository.clone())
            .import_reader(Cursor::new(csv))
            .await
            .expect("import runs");

        assert_eq!(report.success, 1);
        let visitors = repository.list_visitors().await.expect("list");
        assert_eq!(visitors[0].email, "ada@example.com");
        assert_eq!(visitors[0].organization_id, None);
        assert!(repository
            .visitor_assignments(visitors[0].id)
            .await
            .expect("assignments")
            .is_empty());
    }

    #[tokio::test]
    async fn row_errors_cover_each_rule() {
        let (repository, _) = seeded().await;
        let csv = format!(
            "{HEADER}\
,Lovelace,ada@example.com,,,\n\
Grace,Hopper,not-an-email,,,\n\
Alan,Turing,alan@example.com,,Unknown Org,\n\
Edsger,Dijkstra,edsger@example.com,,,Unknown Event\n\
Barbara,Liskov,barbara@example.com,,acme   corp,plant tour\n\
Barbara,Liskov,Barbara@example.com,,,\n"
        );

        let report = VisitorImporter::new(repository)
            .import_reader(Cursor::new(csv))
            .await
            .expect("import runs");

        let kinds: Vec<(usize, &str)> = report
            .errors
            .iter()
            .map(|error| (error.row, error.kind.code()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (1, "missing_field"),
                (2, "invalid_email"),
                (3, "unknown_organization"),
                (4, "unknown_event"),
                (6, "duplicate_email"),
            ]
        );
        assert_eq!(report.success, 1);
        assert_eq!(report.total(), 6);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let (repository, _) = seeded().await;
        let error = VisitorImporter::new(repository)
            .import_path("./does-not-exist.csv")
            .await
            .expect_err("expected io error");
        assert!(matches!(error, RosterImportError::Io(_)));
    }

    #[test]
    fn row_errors_serialize_with_reason_and_message() {
        let error = RowError {
            row: 5,
            email: Some("visitor5@example.com".to_string()),
            kind: RowErrorKind::InvalidPhone("5155550105".to_string()),
        };
        let value = serde_json::to_value(&error).expect("serialize");
        assert_eq!(value["row"], 5);
        assert_eq!(value["reason"], "invalid_phone");
        assert_eq!(
            value["message"],
            "invalid phone '5155550105', expected 000-000-0000"
        );
    }
}
