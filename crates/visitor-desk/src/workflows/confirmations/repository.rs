use async_trait::async_trait;
use chrono::NaiveDate;

use super::domain::{
    AssignedDocument, Document, DocumentId, DocumentType, DocumentVersion, DocumentVersionId, Event,
    EventId, EventVisitor, NewDocumentVersion, Organization, OrganizationId, RsvpStatus, Visitor,
    VisitorConfirmation, VisitorId,
};

/// Storage abstraction so the service module can be exercised in isolation.
///
/// Name lookups are case-insensitive on trimmed input. Implementations must keep
/// `add_version` and `set_current_version` atomic: no reader may observe a document
/// with versions but zero or two current ones.
#[async_trait]
pub trait ConfirmationRepository: Send + Sync {
    async fn insert_organization(
        &self,
        organization: Organization,
    ) -> Result<Organization, RepositoryError>;
    async fn fetch_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, RepositoryError>;
    async fn find_organization_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Organization>, RepositoryError>;

    async fn insert_event(&self, event: Event) -> Result<Event, RepositoryError>;
    async fn fetch_event(&self, id: EventId) -> Result<Option<Event>, RepositoryError>;
    async fn find_event_by_name(&self, name: &str) -> Result<Option<Event>, RepositoryError>;
    /// Events whose start date falls inside `[from, until]`, earliest first.
    async fn events_starting_between(
        &self,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<Event>, RepositoryError>;

    /// Fails with `Conflict` when another visitor already uses the email.
    async fn insert_visitor(&self, visitor: Visitor) -> Result<Visitor, RepositoryError>;
    /// Inserts the visitor and, when `invite_to` is set, an `invited` assignment to that
    /// event. Either both are stored or neither is.
    async fn register_visitor(
        &self,
        visitor: Visitor,
        invite_to: Option<EventId>,
    ) -> Result<Visitor, RepositoryError>;
    async fn fetch_visitor(&self, id: VisitorId) -> Result<Option<Visitor>, RepositoryError>;
    async fn list_visitors(&self) -> Result<Vec<Visitor>, RepositoryError>;

    /// Fails with `Conflict` when the visitor is already assigned to the event.
    async fn assign_visitor(&self, assignment: EventVisitor) -> Result<(), RepositoryError>;
    async fn fetch_assignment(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
    ) -> Result<Option<EventVisitor>, RepositoryError>;
    async fn event_assignments(&self, event_id: EventId)
        -> Result<Vec<EventVisitor>, RepositoryError>;
    async fn visitor_assignments(
        &self,
        visitor_id: VisitorId,
    ) -> Result<Vec<EventVisitor>, RepositoryError>;
    async fn set_rsvp_status(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
        status: RsvpStatus,
    ) -> Result<(), RepositoryError>;

    async fn insert_document_type(
        &self,
        document_type: DocumentType,
    ) -> Result<DocumentType, RepositoryError>;
    async fn insert_document(&self, document: Document) -> Result<Document, RepositoryError>;
    /// Inserts a document with its first (current) version and, when `event_id` is set,
    /// its event assignment. Either everything is stored or nothing is.
    async fn insert_document_with_version(
        &self,
        document: Document,
        version: NewDocumentVersion,
        event_id: Option<EventId>,
    ) -> Result<(Document, DocumentVersion), RepositoryError>;
    async fn fetch_document(&self, id: DocumentId) -> Result<Option<Document>, RepositoryError>;
    /// Idempotent: assigning twice leaves a single assignment.
    async fn assign_document(
        &self,
        document_id: DocumentId,
        event_id: EventId,
    ) -> Result<(), RepositoryError>;
    /// Documents assigned to the event with their type and current version.
    async fn event_documents(&self, event_id: EventId)
        -> Result<Vec<AssignedDocument>, RepositoryError>;

    /// Appends the next version number and makes it the only current version.
    async fn add_version(
        &self,
        version: NewDocumentVersion,
    ) -> Result<DocumentVersion, RepositoryError>;
    /// Versions of one document, oldest first.
    async fn document_versions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<DocumentVersion>, RepositoryError>;
    /// Makes `version_id` the only current version of `document_id`.
    async fn set_current_version(
        &self,
        document_id: DocumentId,
        version_id: DocumentVersionId,
    ) -> Result<DocumentVersion, RepositoryError>;

    async fn insert_confirmation(
        &self,
        confirmation: VisitorConfirmation,
    ) -> Result<VisitorConfirmation, RepositoryError>;
    async fn visitor_confirmations(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
    ) -> Result<Vec<VisitorConfirmation>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

pub(crate) fn normalize_key(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
