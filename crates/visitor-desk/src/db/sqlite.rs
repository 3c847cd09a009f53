use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::workflows::confirmations::domain::{
    AssignedDocument, ConfirmationId, Document, DocumentId, DocumentType, DocumentTypeId,
    DocumentVersion, DocumentVersionId, Event, EventId, EventVisitor, NewDocumentVersion,
    Organization, OrganizationId, RsvpStatus, Visitor, VisitorConfirmation, VisitorId,
};
use crate::workflows::confirmations::repository::{
    normalize_key, ConfirmationRepository, RepositoryError,
};

use super::init::init_database;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Repository backed by a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(config: &DatabaseConfig) -> Result<Self, RepositoryError> {
        let pool = init_database(config).await.map_err(map_sqlx)?;
        Ok(Self::new(pool))
    }

    pub async fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::open(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Write transaction holding the database write lock from `BEGIN`; concurrent
    /// writers queue on the busy timeout.
    async fn begin(&self) -> Result<Transaction<'static, Sqlite>, RepositoryError> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(map_sqlx)
    }
}

fn map_sqlx(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
        _ => RepositoryError::Unavailable(err.to_string()),
    }
}

fn corrupt(column: &str, value: &str) -> RepositoryError {
    RepositoryError::Unavailable(format!("unreadable {column} value '{value}'"))
}

fn parse_uuid(column: &str, value: &str) -> Result<Uuid, RepositoryError> {
    Uuid::try_parse(value).map_err(|_| corrupt(column, value))
}

fn parse_date(column: &str, value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| corrupt(column, value))
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt(column, value))
}

fn parse_optional_uuid(column: &str, value: Option<String>) -> Result<Option<Uuid>, RepositoryError> {
    value.map(|raw| parse_uuid(column, &raw)).transpose()
}

type EventRow = (String, String, Option<String>, String, Option<String>);

fn event_from_row(row: EventRow) -> Result<Event, RepositoryError> {
    let (id, name, organization_id, starts_on, ends_on) = row;
    Ok(Event {
        id: EventId(parse_uuid("events.id", &id)?),
        name,
        organization_id: parse_optional_uuid("events.organization_id", organization_id)?
            .map(OrganizationId),
        starts_on: parse_date("events.starts_on", &starts_on)?,
        ends_on: ends_on
            .map(|raw| parse_date("events.ends_on", &raw))
            .transpose()?,
    })
}

type VisitorRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn visitor_from_row(row: VisitorRow) -> Result<Visitor, RepositoryError> {
    let (id, first_name, last_name, email, phone, organization_id, profile_id) = row;
    Ok(Visitor {
        id: VisitorId(parse_uuid("visitors.id", &id)?),
        first_name,
        last_name,
        email,
        phone,
        organization_id: parse_optional_uuid("visitors.organization_id", organization_id)?
            .map(OrganizationId),
        profile_id,
    })
}

type AssignmentRow = (String, String, String);

fn assignment_from_row(row: AssignmentRow) -> Result<EventVisitor, RepositoryError> {
    let (visitor_id, event_id, status) = row;
    Ok(EventVisitor {
        visitor_id: VisitorId(parse_uuid("event_visitors.visitor_id", &visitor_id)?),
        event_id: EventId(parse_uuid("event_visitors.event_id", &event_id)?),
        rsvp_status: RsvpStatus::from_str(&status)
            .map_err(|_| corrupt("event_visitors.rsvp_status", &status))?,
    })
}

type VersionRow = (String, String, i64, String, bool, String);

fn version_from_row(row: VersionRow) -> Result<DocumentVersion, RepositoryError> {
    let (id, document_id, version_number, file_path, is_current, uploaded_at) = row;
    Ok(DocumentVersion {
        id: DocumentVersionId(parse_uuid("document_versions.id", &id)?),
        document_id: DocumentId(parse_uuid("document_versions.document_id", &document_id)?),
        version_number: u32::try_from(version_number)
            .map_err(|_| corrupt("document_versions.version_number", &version_number.to_string()))?,
        file_path,
        is_current,
        uploaded_at: parse_timestamp("document_versions.uploaded_at", &uploaded_at)?,
    })
}

type ConfirmationRow = (String, String, String, String, String, String);

fn confirmation_from_row(row: ConfirmationRow) -> Result<VisitorConfirmation, RepositoryError> {
    let (id, visitor_id, event_id, document_id, version_id, confirmed_at) = row;
    Ok(VisitorConfirmation {
        id: ConfirmationId(parse_uuid("visitor_confirmations.id", &id)?),
        visitor_id: VisitorId(parse_uuid("visitor_confirmations.visitor_id", &visitor_id)?),
        event_id: EventId(parse_uuid("visitor_confirmations.event_id", &event_id)?),
        document_id: DocumentId(parse_uuid("visitor_confirmations.document_id", &document_id)?),
        document_version_id: DocumentVersionId(parse_uuid(
            "visitor_confirmations.document_version_id",
            &version_id,
        )?),
        confirmed_at: parse_timestamp("visitor_confirmations.confirmed_at", &confirmed_at)?,
    })
}

async fn insert_visitor_row<'e, E>(executor: E, visitor: &Visitor) -> Result<(), RepositoryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO visitors(id, first_name, last_name, email, email_key, phone,
                              organization_id, profile_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(visitor.id.to_string())
    .bind(visitor.first_name.clone())
    .bind(visitor.last_name.clone())
    .bind(visitor.email.clone())
    .bind(normalize_key(&visitor.email))
    .bind(visitor.phone.clone())
    .bind(visitor.organization_id.map(|id| id.to_string()))
    .bind(visitor.profile_id.clone())
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

async fn insert_assignment_row<'e, E>(
    executor: E,
    assignment: &EventVisitor,
) -> Result<(), RepositoryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT INTO event_visitors(visitor_id, event_id, rsvp_status) VALUES(?, ?, ?)")
        .bind(assignment.visitor_id.to_string())
        .bind(assignment.event_id.to_string())
        .bind(assignment.rsvp_status.label())
        .execute(executor)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

async fn insert_document_row<'e, E>(executor: E, document: &Document) -> Result<(), RepositoryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT INTO documents(id, document_type_id, title, is_active) VALUES(?, ?, ?, ?)")
        .bind(document.id.to_string())
        .bind(document.document_type_id.to_string())
        .bind(document.title.clone())
        .bind(document.is_active)
        .execute(executor)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

/// Inserts `version` as the current one; callers clear the previous current row first.
async fn insert_version_row<'e, E>(
    executor: E,
    version: &NewDocumentVersion,
    version_number: i64,
) -> Result<(), RepositoryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO document_versions(id, document_id, version_number, file_path, is_current, uploaded_at)
         VALUES(?, ?, ?, ?, 1, ?)",
    )
    .bind(version.id.to_string())
    .bind(version.document_id.to_string())
    .bind(version_number)
    .bind(version.file_path.clone())
    .bind(version.uploaded_at.to_rfc3339())
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

const EVENT_COLUMNS: &str = "id, name, organization_id, starts_on, ends_on";
const VISITOR_COLUMNS: &str =
    "id, first_name, last_name, email, phone, organization_id, profile_id";
const VERSION_COLUMNS: &str =
    "id, document_id, version_number, file_path, is_current, uploaded_at";

#[async_trait]
impl ConfirmationRepository for SqliteRepository {
    async fn insert_organization(
        &self,
        organization: Organization,
    ) -> Result<Organization, RepositoryError> {
        sqlx::query("INSERT INTO organizations(id, name, name_key) VALUES(?, ?, ?)")
            .bind(organization.id.to_string())
            .bind(&organization.name)
            .bind(normalize_key(&organization.name))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(organization)
    }

    async fn fetch_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, RepositoryError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, name FROM organizations WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(|(id, name)| {
            Ok(Organization {
                id: OrganizationId(parse_uuid("organizations.id", &id)?),
                name,
            })
        })
        .transpose()
    }

    async fn find_organization_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Organization>, RepositoryError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, name FROM organizations WHERE name_key = ?")
                .bind(normalize_key(name))
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(|(id, name)| {
            Ok(Organization {
                id: OrganizationId(parse_uuid("organizations.id", &id)?),
                name,
            })
        })
        .transpose()
    }

    async fn insert_event(&self, event: Event) -> Result<Event, RepositoryError> {
        sqlx::query(
            "INSERT INTO events(id, name, name_key, organization_id, starts_on, ends_on)
             VALUES(?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(&event.name)
        .bind(normalize_key(&event.name))
        .bind(event.organization_id.map(|id| id.to_string()))
        .bind(event.starts_on.format(DATE_FORMAT).to_string())
        .bind(event.ends_on.map(|date| date.format(DATE_FORMAT).to_string()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(event)
    }

    async fn fetch_event(&self, id: EventId) -> Result<Option<Event>, RepositoryError> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(event_from_row).transpose()
    }

    async fn find_event_by_name(&self, name: &str) -> Result<Option<Event>, RepositoryError> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE name_key = ?"))
                .bind(normalize_key(name))
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(event_from_row).transpose()
    }

    async fn events_starting_between(
        &self,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<Event>, RepositoryError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE starts_on >= ? AND starts_on <= ?
             ORDER BY starts_on, name"
        ))
        .bind(from.format(DATE_FORMAT).to_string())
        .bind(until.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(event_from_row).collect()
    }

    async fn insert_visitor(&self, visitor: Visitor) -> Result<Visitor, RepositoryError> {
        insert_visitor_row(&self.pool, &visitor).await?;
        Ok(visitor)
    }

    async fn register_visitor(
        &self,
        visitor: Visitor,
        invite_to: Option<EventId>,
    ) -> Result<Visitor, RepositoryError> {
        let mut tx = self.begin().await?;
        insert_visitor_row(&mut *tx, &visitor).await?;
        if let Some(event_id) = invite_to {
            insert_assignment_row(
                &mut *tx,
                &EventVisitor {
                    visitor_id: visitor.id,
                    event_id,
                    rsvp_status: RsvpStatus::Invited,
                },
            )
            .await?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(visitor)
    }

    async fn fetch_visitor(&self, id: VisitorId) -> Result<Option<Visitor>, RepositoryError> {
        let row: Option<VisitorRow> =
            sqlx::query_as(&format!("SELECT {VISITOR_COLUMNS} FROM visitors WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(visitor_from_row).transpose()
    }

    async fn list_visitors(&self) -> Result<Vec<Visitor>, RepositoryError> {
        let rows: Vec<VisitorRow> = sqlx::query_as(&format!(
            "SELECT {VISITOR_COLUMNS} FROM visitors ORDER BY last_name, first_name, email"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(visitor_from_row).collect()
    }

    async fn assign_visitor(&self, assignment: EventVisitor) -> Result<(), RepositoryError> {
        insert_assignment_row(&self.pool, &assignment).await
    }

    async fn fetch_assignment(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
    ) -> Result<Option<EventVisitor>, RepositoryError> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            "SELECT visitor_id, event_id, rsvp_status FROM event_visitors
             WHERE visitor_id = ? AND event_id = ?",
        )
        .bind(visitor_id.to_string())
        .bind(event_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(assignment_from_row).transpose()
    }

    async fn event_assignments(
        &self,
        event_id: EventId,
    ) -> Result<Vec<EventVisitor>, RepositoryError> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(
            "SELECT visitor_id, event_id, rsvp_status FROM event_visitors
             WHERE event_id = ? ORDER BY rowid",
        )
        .bind(event_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(assignment_from_row).collect()
    }

    async fn visitor_assignments(
        &self,
        visitor_id: VisitorId,
    ) -> Result<Vec<EventVisitor>, RepositoryError> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(
            "SELECT visitor_id, event_id, rsvp_status FROM event_visitors
             WHERE visitor_id = ? ORDER BY rowid",
        )
        .bind(visitor_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(assignment_from_row).collect()
    }

    async fn set_rsvp_status(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
        status: RsvpStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE event_visitors SET rsvp_status = ? WHERE visitor_id = ? AND event_id = ?",
        )
        .bind(status.label())
        .bind(visitor_id.to_string())
        .bind(event_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn insert_document_type(
        &self,
        document_type: DocumentType,
    ) -> Result<DocumentType, RepositoryError> {
        sqlx::query("INSERT INTO document_types(id, name, requires_confirmation) VALUES(?, ?, ?)")
            .bind(document_type.id.to_string())
            .bind(&document_type.name)
            .bind(document_type.requires_confirmation)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(document_type)
    }

    async fn insert_document(&self, document: Document) -> Result<Document, RepositoryError> {
        insert_document_row(&self.pool, &document).await?;
        Ok(document)
    }

    async fn insert_document_with_version(
        &self,
        document: Document,
        version: NewDocumentVersion,
        event_id: Option<EventId>,
    ) -> Result<(Document, DocumentVersion), RepositoryError> {
        if version.document_id != document.id {
            return Err(RepositoryError::NotFound);
        }
        let mut tx = self.begin().await?;
        insert_document_row(&mut *tx, &document).await?;
        insert_version_row(&mut *tx, &version, 1).await?;
        if let Some(event_id) = event_id {
            sqlx::query("INSERT INTO document_events(document_id, event_id) VALUES(?, ?)")
                .bind(document.id.to_string())
                .bind(event_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)?;

        let stored = DocumentVersion {
            id: version.id,
            document_id: document.id,
            version_number: 1,
            file_path: version.file_path,
            is_current: true,
            uploaded_at: version.uploaded_at,
        };
        Ok((document, stored))
    }

    async fn fetch_document(&self, id: DocumentId) -> Result<Option<Document>, RepositoryError> {
        let row: Option<(String, String, String, bool)> = sqlx::query_as(
            "SELECT id, document_type_id, title, is_active FROM documents WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(|(id, type_id, title, is_active)| {
            Ok(Document {
                id: DocumentId(parse_uuid("documents.id", &id)?),
                document_type_id: DocumentTypeId(parse_uuid("documents.document_type_id", &type_id)?),
                title,
                is_active,
            })
        })
        .transpose()
    }

    async fn assign_document(
        &self,
        document_id: DocumentId,
        event_id: EventId,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT OR IGNORE INTO document_events(document_id, event_id) VALUES(?, ?)")
            .bind(document_id.to_string())
            .bind(event_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn event_documents(
        &self,
        event_id: EventId,
    ) -> Result<Vec<AssignedDocument>, RepositoryError> {
        // One statement so the document, its type and its current version come from the
        // same snapshot.
        type Row = (
            String,
            String,
            String,
            bool,
            String,
            bool,
            Option<String>,
            Option<i64>,
            Option<String>,
            Option<String>,
        );
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT d.id, d.title, t.id, d.is_active, t.name, t.requires_confirmation,
                    v.id, v.version_number, v.file_path, v.uploaded_at
             FROM document_events de
             JOIN documents d ON d.id = de.document_id
             JOIN document_types t ON t.id = d.document_type_id
             LEFT JOIN document_versions v ON v.document_id = d.id AND v.is_current = 1
             WHERE de.event_id = ?
             ORDER BY d.title, d.id",
        )
        .bind(event_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut assigned = Vec::with_capacity(rows.len());
        for (doc_id, title, type_id, is_active, type_name, requires, v_id, v_num, v_path, v_at) in
            rows
        {
            let document_id = DocumentId(parse_uuid("documents.id", &doc_id)?);
            let document_type_id = DocumentTypeId(parse_uuid("document_types.id", &type_id)?);
            let current_version = match (v_id, v_num, v_path, v_at) {
                (Some(id), Some(number), Some(file_path), Some(uploaded_at)) => {
                    Some(version_from_row((
                        id,
                        doc_id.clone(),
                        number,
                        file_path,
                        true,
                        uploaded_at,
                    ))?)
                }
                _ => None,
            };
            assigned.push(AssignedDocument {
                document: Document {
                    id: document_id,
                    document_type_id,
                    title,
                    is_active,
                },
                document_type: DocumentType {
                    id: document_type_id,
                    name: type_name,
                    requires_confirmation: requires,
                },
                current_version,
            });
        }
        Ok(assigned)
    }

    async fn add_version(
        &self,
        version: NewDocumentVersion,
    ) -> Result<DocumentVersion, RepositoryError> {
        let mut tx = self.begin().await?;
        let document_id = version.document_id.to_string();

        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM documents WHERE id = ?")
            .bind(&document_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound);
        }

        let (next_number,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(version_number), 0) + 1 FROM document_versions WHERE document_id = ?",
        )
        .bind(&document_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query("UPDATE document_versions SET is_current = 0 WHERE document_id = ? AND is_current = 1")
            .bind(&document_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        insert_version_row(&mut *tx, &version, next_number).await?;

        tx.commit().await.map_err(map_sqlx)?;
        debug!(document_id = %version.document_id, version_number = next_number, "version appended");

        Ok(DocumentVersion {
            id: version.id,
            document_id: version.document_id,
            version_number: u32::try_from(next_number)
                .map_err(|_| corrupt("document_versions.version_number", &next_number.to_string()))?,
            file_path: version.file_path,
            is_current: true,
            uploaded_at: version.uploaded_at,
        })
    }

    async fn document_versions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<DocumentVersion>, RepositoryError> {
        let rows: Vec<VersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM document_versions
             WHERE document_id = ? ORDER BY version_number"
        ))
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(version_from_row).collect()
    }

    async fn set_current_version(
        &self,
        document_id: DocumentId,
        version_id: DocumentVersionId,
    ) -> Result<DocumentVersion, RepositoryError> {
        let mut tx = self.begin().await?;

        let target: Option<VersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM document_versions WHERE id = ? AND document_id = ?"
        ))
        .bind(version_id.to_string())
        .bind(document_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let Some(target) = target else {
            return Err(RepositoryError::NotFound);
        };

        // Clear before set: the partial unique index rejects two current rows even
        // transiently. Both steps commit together or not at all.
        sqlx::query(
            "UPDATE document_versions SET is_current = 0
             WHERE document_id = ? AND is_current = 1 AND id <> ?",
        )
        .bind(document_id.to_string())
        .bind(version_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        sqlx::query("UPDATE document_versions SET is_current = 1 WHERE id = ?")
            .bind(version_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;

        let mut current = version_from_row(target)?;
        current.is_current = true;
        Ok(current)
    }

    async fn insert_confirmation(
        &self,
        confirmation: VisitorConfirmation,
    ) -> Result<VisitorConfirmation, RepositoryError> {
        let belongs: Option<(String,)> =
            sqlx::query_as("SELECT id FROM document_versions WHERE id = ? AND document_id = ?")
                .bind(confirmation.document_version_id.to_string())
                .bind(confirmation.document_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        if belongs.is_none() {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query(
            "INSERT INTO visitor_confirmations(id, visitor_id, event_id, document_id,
                                               document_version_id, confirmed_at)
             VALUES(?, ?, ?, ?, ?, ?)",
        )
        .bind(confirmation.id.to_string())
        .bind(confirmation.visitor_id.to_string())
        .bind(confirmation.event_id.to_string())
        .bind(confirmation.document_id.to_string())
        .bind(confirmation.document_version_id.to_string())
        .bind(confirmation.confirmed_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(confirmation)
    }

    async fn visitor_confirmations(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
    ) -> Result<Vec<VisitorConfirmation>, RepositoryError> {
        let rows: Vec<ConfirmationRow> = sqlx::query_as(
            "SELECT id, visitor_id, event_id, document_id, document_version_id, confirmed_at
             FROM visitor_confirmations
             WHERE visitor_id = ? AND event_id = ?
             ORDER BY confirmed_at",
        )
        .bind(visitor_id.to_string())
        .bind(event_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(confirmation_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn seeded() -> (SqliteRepository, DocumentId) {
        let repo = SqliteRepository::open_in_memory().await.expect("open");
        let kind = repo
            .insert_document_type(DocumentType {
                id: DocumentTypeId::new(),
                name: "Safety".to_string(),
                requires_confirmation: true,
            })
            .await
            .expect("type");
        let document = repo
            .insert_document(Document {
                id: DocumentId::new(),
                document_type_id: kind.id,
                title: "Site safety rules".to_string(),
                is_active: true,
            })
            .await
            .expect("document");
        (repo, document.id)
    }

    fn new_version(document_id: DocumentId, minute: u32) -> NewDocumentVersion {
        let id = DocumentVersionId::new();
        NewDocumentVersion {
            id,
            document_id,
            file_path: format!("documents/{document_id}/{id}-rules.pdf"),
            uploaded_at: Utc.with_ymd_and_hms(2025, 5, 1, 12, minute, 0).unwrap(),
        }
    }

    async fn current_count(repo: &SqliteRepository, document_id: DocumentId) -> usize {
        repo.document_versions(document_id)
            .await
            .expect("versions")
            .iter()
            .filter(|version| version.is_current)
            .count()
    }

    #[tokio::test]
    async fn add_version_numbers_monotonically_and_moves_current_flag() {
        let (repo, document_id) = seeded().await;

        let v1 = repo.add_version(new_version(document_id, 0)).await.expect("v1");
        let v2 = repo.add_version(new_version(document_id, 1)).await.expect("v2");

        assert_eq!(v1.version_number, 1);
        assert_eq!(v2.version_number, 2);
        assert_eq!(current_count(&repo, document_id).await, 1);
        let versions = repo.document_versions(document_id).await.expect("versions");
        assert!(versions.iter().any(|v| v.id == v2.id && v.is_current));
    }

    #[tokio::test]
    async fn set_current_version_can_move_back_to_older_version() {
        let (repo, document_id) = seeded().await;
        let v1 = repo.add_version(new_version(document_id, 0)).await.expect("v1");
        let _v2 = repo.add_version(new_version(document_id, 1)).await.expect("v2");

        let current = repo
            .set_current_version(document_id, v1.id)
            .await
            .expect("switch back");

        assert_eq!(current.id, v1.id);
        assert!(current.is_current);
        assert_eq!(current_count(&repo, document_id).await, 1);

        let again = repo
            .set_current_version(document_id, v1.id)
            .await
            .expect("idempotent switch");
        assert_eq!(again.id, v1.id);
        assert_eq!(current_count(&repo, document_id).await, 1);
    }

    #[tokio::test]
    async fn set_current_version_rejects_foreign_version() {
        let (repo, document_id) = seeded().await;
        let v1 = repo.add_version(new_version(document_id, 0)).await.expect("v1");

        let error = repo
            .set_current_version(DocumentId::new(), v1.id)
            .await
            .expect_err("wrong document");
        assert!(matches!(error, RepositoryError::NotFound));
        assert_eq!(current_count(&repo, document_id).await, 1);
    }

    #[tokio::test]
    async fn partial_index_blocks_second_current_row() {
        let (repo, document_id) = seeded().await;
        repo.add_version(new_version(document_id, 0)).await.expect("v1");

        let result = sqlx::query(
            "INSERT INTO document_versions(id, document_id, version_number, file_path, is_current, uploaded_at)
             VALUES(?, ?, 99, 'x', 1, '2025-05-01T00:00:00+00:00')",
        )
        .bind(DocumentVersionId::new().to_string())
        .bind(document_id.to_string())
        .execute(repo.pool())
        .await;

        assert!(matches!(map_sqlx(result.expect_err("rejected")), RepositoryError::Conflict));
    }

    #[tokio::test]
    async fn duplicate_email_maps_to_conflict() {
        let repo = SqliteRepository::open_in_memory().await.expect("open");
        let visitor = Visitor {
            id: VisitorId::new(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: None,
            organization_id: None,
            profile_id: None,
        };
        repo.insert_visitor(visitor.clone()).await.expect("first insert");

        let duplicate = Visitor {
            id: VisitorId::new(),
            email: " ADA@example.com ".to_string(),
            ..visitor
        };
        let error = repo.insert_visitor(duplicate).await.expect_err("duplicate");
        assert!(matches!(error, RepositoryError::Conflict));
    }

    #[tokio::test]
    async fn event_documents_join_current_version_only() {
        let (repo, document_id) = seeded().await;
        let event = repo
            .insert_event(Event {
                id: EventId::new(),
                name: "Plant tour".to_string(),
                organization_id: None,
                starts_on: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                ends_on: None,
            })
            .await
            .expect("event");
        repo.assign_document(document_id, event.id).await.expect("assign");
        repo.assign_document(document_id, event.id)
            .await
            .expect("assign twice");

        let before = repo.event_documents(event.id).await.expect("documents");
        assert_eq!(before.len(), 1);
        assert!(before[0].current_version.is_none());

        repo.add_version(new_version(document_id, 0)).await.expect("v1");
        let v2 = repo.add_version(new_version(document_id, 1)).await.expect("v2");

        let after = repo.event_documents(event.id).await.expect("documents");
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].current_version.as_ref().map(|v| v.id), Some(v2.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_version_uploads_are_serialized() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("desk.db").display()),
            max_connections: 5,
        };
        let repo = std::sync::Arc::new(SqliteRepository::open(&config).await.expect("open"));
        let kind = repo
            .insert_document_type(DocumentType {
                id: DocumentTypeId::new(),
                name: "Safety".to_string(),
                requires_confirmation: true,
            })
            .await
            .expect("type");
        let document = repo
            .insert_document(Document {
                id: DocumentId::new(),
                document_type_id: kind.id,
                title: "Site safety rules".to_string(),
                is_active: true,
            })
            .await
            .expect("document");

        let mut handles = Vec::new();
        for writer in 0..4u32 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..5u32 {
                    repo.add_version(new_version(document.id, writer * 5 + round))
                        .await
                        .expect("queued writer succeeds");
                }
            }));
        }
        for handle in handles {
            handle.await.expect("writer task");
        }

        let numbers: Vec<u32> = repo
            .document_versions(document.id)
            .await
            .expect("versions")
            .iter()
            .map(|version| version.version_number)
            .collect();
        assert_eq!(numbers, (1..=20).collect::<Vec<u32>>());
        assert_eq!(current_count(&repo, document.id).await, 1);
    }

    #[tokio::test]
    async fn register_visitor_stores_nothing_when_the_invitation_fails() {
        let repo = SqliteRepository::open_in_memory().await.expect("open");
        let visitor = Visitor {
            id: VisitorId::new(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: None,
            organization_id: None,
            profile_id: None,
        };

        let error = repo
            .register_visitor(visitor.clone(), Some(EventId::new()))
            .await
            .expect_err("unknown event");
        assert!(matches!(error, RepositoryError::NotFound));
        assert!(repo.list_visitors().await.expect("list").is_empty());

        repo.register_visitor(visitor, None).await.expect("no invitation");
        assert_eq!(repo.list_visitors().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn document_with_first_version_is_all_or_nothing() {
        let repo = SqliteRepository::open_in_memory().await.expect("open");
        let kind = repo
            .insert_document_type(DocumentType {
                id: DocumentTypeId::new(),
                name: "Safety".to_string(),
                requires_confirmation: true,
            })
            .await
            .expect("type");
        let document = Document {
            id: DocumentId::new(),
            document_type_id: kind.id,
            title: "Waiver".to_string(),
            is_active: true,
        };

        let error = repo
            .insert_document_with_version(
                document.clone(),
                new_version(document.id, 0),
                Some(EventId::new()),
            )
            .await
            .expect_err("unknown event");
        assert!(matches!(error, RepositoryError::NotFound));
        assert!(repo.fetch_document(document.id).await.expect("fetch").is_none());
        assert!(repo
            .document_versions(document.id)
            .await
            .expect("versions")
            .is_empty());

        let (_, version) = repo
            .insert_document_with_version(document.clone(), new_version(document.id, 1), None)
            .await
            .expect("stored");
        assert_eq!(version.version_number, 1);
        assert_eq!(current_count(&repo, document.id).await, 1);
    }
}
