//! Visitor document confirmations.
//!
//! Tracks which required documents each visitor has acknowledged for an event, against
//! which version, and whether a newer upload has made an acknowledgment stale.

pub mod domain;
pub mod reminders;
pub mod repository;
pub mod router;
pub mod service;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use domain::{
    AssignedDocument, ConfirmationId, Document, DocumentId, DocumentType, DocumentTypeId,
    DocumentVersion, DocumentVersionId, Event, EventId, EventVisitor, NewDocumentVersion,
    Organization, OrganizationId, RsvpStatus, Visitor, VisitorConfirmation, VisitorId,
};
pub use reminders::{
    OutstandingConfirmation, ReminderDispatcher, ReminderError, ReminderRecipient,
};
pub use repository::{ConfirmationRepository, RepositoryError};
pub use router::confirmation_router;
pub use service::{
    reference_date, ConfirmationReceipt, ConfirmationService, ConfirmationServiceError,
    FileUpload, NewDocumentUpload, UploadedDocument,
};
pub use tracker::{
    confirmation_status, derive_rsvp, required_documents, ConfirmationStatus,
    DocumentConfirmationState, DocumentState, RequiredDocument,
};
