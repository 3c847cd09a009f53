use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ReminderConfig;
use crate::files::{parse_content_type, version_path, DocumentStorage, StorageError, StoredFile};

use super::domain::{
    ConfirmationId, Document, DocumentId, DocumentTypeId, DocumentVersion, DocumentVersionId,
    EventId, NewDocumentVersion, VisitorConfirmation, VisitorId,
};
use super::reminders::{
    reminder_recipients, OutstandingConfirmation, ReminderDispatcher, ReminderError,
};
use super::repository::{ConfirmationRepository, RepositoryError};
use super::tracker::{
    confirmation_status, derive_rsvp, required_documents, ConfirmationStatus, RequiredDocument,
};

/// A file as received from an uploader, before it is stored.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A brand-new document together with its first file.
#[derive(Debug, Clone)]
pub struct NewDocumentUpload {
    pub document_type_id: DocumentTypeId,
    pub title: String,
    pub event_id: Option<EventId>,
    pub file: FileUpload,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedDocument {
    pub document: Document,
    pub version: DocumentVersion,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationReceipt {
    pub confirmation: VisitorConfirmation,
    /// False when the current version had already been acknowledged.
    pub created: bool,
    pub status: ConfirmationStatus,
}

/// Service composing the repository, document file storage and the reminder hook.
pub struct ConfirmationService<R> {
    repository: Arc<R>,
    files: Arc<dyn DocumentStorage>,
    reminders: Arc<dyn ReminderDispatcher>,
    config: ReminderConfig,
}

impl<R> ConfirmationService<R>
where
    R: ConfirmationRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        files: Arc<dyn DocumentStorage>,
        reminders: Arc<dyn ReminderDispatcher>,
        config: ReminderConfig,
    ) -> Self {
        Self {
            repository,
            files,
            reminders,
            config,
        }
    }

    pub fn repository(&self) -> Arc<R> {
        Arc::clone(&self.repository)
    }

    /// Required documents for an event, each pinned to its current version.
    pub async fn resolve_required_documents(
        &self,
        event_id: EventId,
    ) -> Result<Vec<RequiredDocument>, ConfirmationServiceError> {
        self.repository
            .fetch_event(event_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        let assigned = self.repository.event_documents(event_id).await?;
        Ok(required_documents(&assigned))
    }

    /// Completion summary; a visitor not assigned to the event gets a non-applicable
    /// summary rather than an error.
    pub async fn resolve_confirmation_status(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
    ) -> Result<ConfirmationStatus, ConfirmationServiceError> {
        let Some(assignment) = self
            .repository
            .fetch_assignment(visitor_id, event_id)
            .await?
        else {
            return Ok(ConfirmationStatus::not_applicable(visitor_id, event_id));
        };

        let assigned = self.repository.event_documents(event_id).await?;
        let required = required_documents(&assigned);
        let confirmations = self
            .repository
            .visitor_confirmations(visitor_id, event_id)
            .await?;

        Ok(confirmation_status(
            visitor_id,
            event_id,
            Some(&assignment),
            &required,
            &confirmations,
        ))
    }

    /// Acknowledge the current version of a required document.
    pub async fn record_confirmation(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
        document_id: DocumentId,
        version_id: DocumentVersionId,
    ) -> Result<ConfirmationReceipt, ConfirmationServiceError> {
        self.repository
            .fetch_assignment(visitor_id, event_id)
            .await?
            .ok_or(ConfirmationServiceError::NotAssigned)?;

        let assigned = self.repository.event_documents(event_id).await?;
        let entry = assigned
            .iter()
            .find(|entry| entry.document.id == document_id)
            .filter(|entry| entry.document_type.requires_confirmation && entry.document.is_active)
            .ok_or(ConfirmationServiceError::DocumentNotRequired)?;
        let current = entry
            .current_version
            .as_ref()
            .ok_or(ConfirmationServiceError::NoCurrentVersion)?;
        if current.id != version_id {
            return Err(ConfirmationServiceError::VersionNotCurrent {
                current: current.id,
            });
        }

        let existing = self
            .repository
            .visitor_confirmations(visitor_id, event_id)
            .await?
            .into_iter()
            .find(|row| row.document_id == document_id && row.document_version_id == version_id);

        let (confirmation, created) = match existing {
            Some(row) => (row, false),
            None => {
                let row = self
                    .repository
                    .insert_confirmation(VisitorConfirmation {
                        id: ConfirmationId::new(),
                        visitor_id,
                        event_id,
                        document_id,
                        document_version_id: version_id,
                        confirmed_at: Utc::now(),
                    })
                    .await?;
                info!(
                    visitor_id = %visitor_id,
                    event_id = %event_id,
                    document_id = %document_id,
                    version = current.version_number,
                    "confirmation recorded"
                );
                (row, true)
            }
        };

        let status = self.reconcile_rsvp(visitor_id, event_id).await?;
        Ok(ConfirmationReceipt {
            confirmation,
            created,
            status,
        })
    }

    /// Recompute the completion summary and promote the RSVP when it is complete.
    ///
    /// Safe to run any number of times; the returned summary carries the RSVP as stored.
    pub async fn reconcile_rsvp(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
    ) -> Result<ConfirmationStatus, ConfirmationServiceError> {
        let mut status = self
            .resolve_confirmation_status(visitor_id, event_id)
            .await?;
        let Some(current) = status.rsvp_status else {
            return Ok(status);
        };

        if let Some(next) = derive_rsvp(current, &status) {
            self.repository
                .set_rsvp_status(visitor_id, event_id, next)
                .await?;
            info!(
                visitor_id = %visitor_id,
                event_id = %event_id,
                from = %current,
                to = %next,
                "rsvp reconciled"
            );
            status.rsvp_status = Some(next);
        }
        Ok(status)
    }

    /// Make `version_id` the current version. Earlier acknowledgments stay on record and
    /// become stale.
    pub async fn set_current_version(
        &self,
        document_id: DocumentId,
        version_id: DocumentVersionId,
    ) -> Result<DocumentVersion, ConfirmationServiceError> {
        let version = self
            .repository
            .set_current_version(document_id, version_id)
            .await?;
        info!(
            document_id = %document_id,
            version = version.version_number,
            "current version switched"
        );
        Ok(version)
    }

    /// Create a document with its first version, optionally assigned to an event.
    ///
    /// The file is stored first; the document, version and assignment are then written
    /// in one repository call, so a failed upload leaves no document behind.
    pub async fn upload_document(
        &self,
        upload: NewDocumentUpload,
    ) -> Result<UploadedDocument, ConfirmationServiceError> {
        check_file(&upload.file)?;
        if let Some(event_id) = upload.event_id {
            self.repository
                .fetch_event(event_id)
                .await?
                .ok_or(RepositoryError::NotFound)?;
        }

        let content_type = parse_content_type(&upload.file.content_type)?;
        let document = Document {
            id: DocumentId::new(),
            document_type_id: upload.document_type_id,
            title: upload.title.trim().to_string(),
            is_active: true,
        };
        let document_id = document.id;
        let version_id = DocumentVersionId::new();
        let path = version_path(document_id, version_id, &upload.file.file_name);

        self.files
            .upload(&path, upload.file.bytes, &content_type)
            .await?;

        let (document, version) = match self
            .repository
            .insert_document_with_version(
                document,
                NewDocumentVersion {
                    id: version_id,
                    document_id,
                    file_path: path.clone(),
                    uploaded_at: Utc::now(),
                },
                upload.event_id,
            )
            .await
        {
            Ok(stored) => stored,
            Err(error) => {
                warn!(path = %path, error = %error, "orphaned upload");
                return Err(error.into());
            }
        };

        info!(document_id = %document.id, title = %document.title, "document created");
        let url = self.version_url(&version);
        Ok(UploadedDocument {
            document,
            version,
            url,
        })
    }

    /// Store a new file for an existing document and make it current.
    pub async fn upload_version(
        &self,
        document_id: DocumentId,
        file: FileUpload,
    ) -> Result<DocumentVersion, ConfirmationServiceError> {
        check_file(&file)?;
        self.repository
            .fetch_document(document_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        self.store_version(document_id, file).await
    }

    async fn store_version(
        &self,
        document_id: DocumentId,
        file: FileUpload,
    ) -> Result<DocumentVersion, ConfirmationServiceError> {
        let content_type = parse_content_type(&file.content_type)?;
        let version_id = DocumentVersionId::new();
        let path = version_path(document_id, version_id, &file.file_name);

        self.files.upload(&path, file.bytes, &content_type).await?;

        let version = match self
            .repository
            .add_version(NewDocumentVersion {
                id: version_id,
                document_id,
                file_path: path.clone(),
                uploaded_at: Utc::now(),
            })
            .await
        {
            Ok(version) => version,
            Err(error) => {
                warn!(document_id = %document_id, path = %path, error = %error, "orphaned upload");
                return Err(error.into());
            }
        };

        info!(
            document_id = %document_id,
            version = version.version_number,
            "document version uploaded"
        );
        Ok(version)
    }

    pub async fn assign_document(
        &self,
        document_id: DocumentId,
        event_id: EventId,
    ) -> Result<(), ConfirmationServiceError> {
        self.repository
            .fetch_document(document_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        self.repository
            .fetch_event(event_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        self.repository.assign_document(document_id, event_id).await?;
        Ok(())
    }

    /// Version history, oldest first. Unknown documents are `NotFound`.
    pub async fn document_versions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<DocumentVersion>, ConfirmationServiceError> {
        self.repository
            .fetch_document(document_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        Ok(self.repository.document_versions(document_id).await?)
    }

    pub fn version_url(&self, version: &DocumentVersion) -> String {
        self.files.public_url(&version.file_path)
    }

    /// Stored bytes behind a version URL path, `None` when nothing lives there.
    pub async fn open_file(&self, path: &str) -> Result<Option<StoredFile>, ConfirmationServiceError> {
        Ok(self.files.download(path).await?)
    }

    /// Visitors with missing or stale acknowledgments for events starting within the
    /// configured lookahead window. Declined and cancelled invitations are skipped.
    pub async fn outstanding_confirmations(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<OutstandingConfirmation>, ConfirmationServiceError> {
        let until = today
            .checked_add_days(Days::new(u64::from(self.config.lookahead_days)))
            .unwrap_or(NaiveDate::MAX);
        let events = self.repository.events_starting_between(today, until).await?;

        let mut outstanding = Vec::new();
        for event in events {
            let required = required_documents(&self.repository.event_documents(event.id).await?);
            if required.is_empty() {
                continue;
            }

            for assignment in self.repository.event_assignments(event.id).await? {
                if !assignment.rsvp_status.expects_attendance() {
                    continue;
                }
                let Some(visitor) = self.repository.fetch_visitor(assignment.visitor_id).await?
                else {
                    warn!(visitor_id = %assignment.visitor_id, "assignment without visitor");
                    continue;
                };
                let confirmations = self
                    .repository
                    .visitor_confirmations(visitor.id, event.id)
                    .await?;
                let status = confirmation_status(
                    visitor.id,
                    event.id,
                    Some(&assignment),
                    &required,
                    &confirmations,
                );
                if status.has_outstanding() {
                    outstanding.push(OutstandingConfirmation {
                        event: event.clone(),
                        visitor,
                        status,
                    });
                }
            }
        }
        Ok(outstanding)
    }

    /// Hand every distinct outstanding visitor to the reminder dispatcher in one batch.
    ///
    /// Returns the number of recipients; nothing is dispatched when there are none.
    pub async fn send_reminders(
        &self,
        today: NaiveDate,
        event_id: Option<EventId>,
    ) -> Result<usize, ConfirmationServiceError> {
        let mut outstanding = self.outstanding_confirmations(today).await?;
        if let Some(event_id) = event_id {
            outstanding.retain(|entry| entry.event.id == event_id);
        }

        let recipients = reminder_recipients(&outstanding);
        if recipients.is_empty() {
            info!("no reminders to send");
            return Ok(0);
        }

        let count = recipients.len();
        self.reminders.dispatch(recipients).await?;
        info!(recipients = count, "reminders dispatched");
        Ok(count)
    }
}

/// The day outstanding windows are measured from: the caller's date, else today in UTC.
pub fn reference_date(today: Option<NaiveDate>) -> NaiveDate {
    today.unwrap_or_else(|| Utc::now().date_naive())
}

fn check_file(file: &FileUpload) -> Result<(), ConfirmationServiceError> {
    if file.bytes.is_empty() {
        return Err(StorageError::Empty.into());
    }
    parse_content_type(&file.content_type)?;
    Ok(())
}

/// Error raised by the confirmation service.
#[derive(Debug, thiserror::Error)]
pub enum ConfirmationServiceError {
    #[error("visitor is not assigned to this event")]
    NotAssigned,
    #[error("document is not required for this event")]
    DocumentNotRequired,
    #[error("document has no uploaded file yet")]
    NoCurrentVersion,
    #[error("only the current version ({current}) can be confirmed")]
    VersionNotCurrent { current: DocumentVersionId },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Reminder(#[from] ReminderError),
}
