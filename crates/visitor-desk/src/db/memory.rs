use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::workflows::confirmations::domain::{
    AssignedDocument, Document, DocumentAssignment, DocumentId, DocumentType, DocumentVersion,
    DocumentVersionId, Event, EventId, EventVisitor, NewDocumentVersion, Organization,
    OrganizationId, RsvpStatus, Visitor, VisitorConfirmation, VisitorId,
};
use crate::workflows::confirmations::repository::{
    normalize_key, ConfirmationRepository, RepositoryError,
};

#[derive(Debug, Default)]
struct Tables {
    organizations: Vec<Organization>,
    events: Vec<Event>,
    visitors: Vec<Visitor>,
    assignments: Vec<EventVisitor>,
    document_types: Vec<DocumentType>,
    documents: Vec<Document>,
    document_events: Vec<DocumentAssignment>,
    versions: Vec<DocumentVersion>,
    confirmations: Vec<VisitorConfirmation>,
}

impl Tables {
    fn has_event(&self, id: EventId) -> bool {
        self.events.iter().any(|event| event.id == id)
    }

    fn has_visitor(&self, id: VisitorId) -> bool {
        self.visitors.iter().any(|visitor| visitor.id == id)
    }

    fn has_document(&self, id: DocumentId) -> bool {
        self.documents.iter().any(|document| document.id == id)
    }

    fn has_organization(&self, id: Option<OrganizationId>) -> bool {
        match id {
            Some(id) => self.organizations.iter().any(|org| org.id == id),
            None => true,
        }
    }
}

/// Repository kept entirely in memory.
///
/// A single mutex guards every table, so each trait call is atomic with respect to the
/// others, including the current-version switch.
#[derive(Debug, Default, Clone)]
pub struct MemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryRepository {
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository mutex poisoned".to_string()))
    }

    pub fn document_count(&self) -> usize {
        self.tables
            .lock()
            .map(|tables| tables.documents.len())
            .unwrap_or(0)
    }

    /// Number of confirmation rows, duplicates included.
    pub fn confirmation_count(&self) -> usize {
        self.tables
            .lock()
            .map(|tables| tables.confirmations.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConfirmationRepository for MemoryRepository {
    async fn insert_organization(
        &self,
        organization: Organization,
    ) -> Result<Organization, RepositoryError> {
        let mut tables = self.lock()?;
        let key = normalize_key(&organization.name);
        if tables
            .organizations
            .iter()
            .any(|existing| existing.id == organization.id || normalize_key(&existing.name) == key)
        {
            return Err(RepositoryError::Conflict);
        }
        tables.organizations.push(organization.clone());
        Ok(organization)
    }

    async fn fetch_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables.organizations.iter().find(|org| org.id == id).cloned())
    }

    async fn find_organization_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Organization>, RepositoryError> {
        let tables = self.lock()?;
        let key = normalize_key(name);
        Ok(tables
            .organizations
            .iter()
            .find(|org| normalize_key(&org.name) == key)
            .cloned())
    }

    async fn insert_event(&self, event: Event) -> Result<Event, RepositoryError> {
        let mut tables = self.lock()?;
        if !tables.has_organization(event.organization_id) {
            return Err(RepositoryError::NotFound);
        }
        let key = normalize_key(&event.name);
        if tables
            .events
            .iter()
            .any(|existing| existing.id == event.id || normalize_key(&existing.name) == key)
        {
            return Err(RepositoryError::Conflict);
        }
        tables.events.push(event.clone());
        Ok(event)
    }

    async fn fetch_event(&self, id: EventId) -> Result<Option<Event>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables.events.iter().find(|event| event.id == id).cloned())
    }

    async fn find_event_by_name(&self, name: &str) -> Result<Option<Event>, RepositoryError> {
        let tables = self.lock()?;
        let key = normalize_key(name);
        Ok(tables
            .events
            .iter()
            .find(|event| normalize_key(&event.name) == key)
            .cloned())
    }

    async fn events_starting_between(
        &self,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<Event>, RepositoryError> {
        let tables = self.lock()?;
        let mut events: Vec<Event> = tables
            .events
            .iter()
            .filter(|event| event.starts_on >= from && event.starts_on <= until)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.starts_on.cmp(&b.starts_on).then_with(|| a.name.cmp(&b.name)));
        Ok(events)
    }

    async fn insert_visitor(&self, visitor: Visitor) -> Result<Visitor, RepositoryError> {
        let mut tables = self.lock()?;
        if !tables.has_organization(visitor.organization_id) {
            return Err(RepositoryError::NotFound);
        }
        let key = normalize_key(&visitor.email);
        if tables
            .visitors
            .iter()
            .any(|existing| existing.id == visitor.id || normalize_key(&existing.email) == key)
        {
            return Err(RepositoryError::Conflict);
        }
        tables.visitors.push(visitor.clone());
        Ok(visitor)
    }

    async fn register_visitor(
        &self,
        visitor: Visitor,
        invite_to: Option<EventId>,
    ) -> Result<Visitor, RepositoryError> {
        let mut tables = self.lock()?;
        if !tables.has_organization(visitor.organization_id) {
            return Err(RepositoryError::NotFound);
        }
        if let Some(event_id) = invite_to {
            if !tables.has_event(event_id) {
                return Err(RepositoryError::NotFound);
            }
        }
        let key = normalize_key(&visitor.email);
        if tables
            .visitors
            .iter()
            .any(|existing| existing.id == visitor.id || normalize_key(&existing.email) == key)
        {
            return Err(RepositoryError::Conflict);
        }

        tables.visitors.push(visitor.clone());
        if let Some(event_id) = invite_to {
            tables.assignments.push(EventVisitor {
                visitor_id: visitor.id,
                event_id,
                rsvp_status: RsvpStatus::Invited,
            });
        }
        Ok(visitor)
    }

    async fn fetch_visitor(&self, id: VisitorId) -> Result<Option<Visitor>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables.visitors.iter().find(|visitor| visitor.id == id).cloned())
    }

    async fn list_visitors(&self) -> Result<Vec<Visitor>, RepositoryError> {
        let tables = self.lock()?;
        let mut visitors = tables.visitors.clone();
        visitors.sort_by(|a, b| {
            a.last_name
                .cmp(&b.last_name)
                .then_with(|| a.first_name.cmp(&b.first_name))
                .then_with(|| a.email.cmp(&b.email))
        });
        Ok(visitors)
    }

    async fn assign_visitor(&self, assignment: EventVisitor) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        if !tables.has_visitor(assignment.visitor_id) || !tables.has_event(assignment.event_id) {
            return Err(RepositoryError::NotFound);
        }
        if tables.assignments.iter().any(|existing| {
            existing.visitor_id == assignment.visitor_id && existing.event_id == assignment.event_id
        }) {
            return Err(RepositoryError::Conflict);
        }
        tables.assignments.push(assignment);
        Ok(())
    }

    async fn fetch_assignment(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
    ) -> Result<Option<EventVisitor>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .assignments
            .iter()
            .find(|row| row.visitor_id == visitor_id && row.event_id == event_id)
            .copied())
    }

    async fn event_assignments(
        &self,
        event_id: EventId,
    ) -> Result<Vec<EventVisitor>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .assignments
            .iter()
            .filter(|row| row.event_id == event_id)
            .copied()
            .collect())
    }

    async fn visitor_assignments(
        &self,
        visitor_id: VisitorId,
    ) -> Result<Vec<EventVisitor>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .assignments
            .iter()
            .filter(|row| row.visitor_id == visitor_id)
            .copied()
            .collect())
    }

    async fn set_rsvp_status(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
        status: RsvpStatus,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        let row = tables
            .assignments
            .iter_mut()
            .find(|row| row.visitor_id == visitor_id && row.event_id == event_id)
            .ok_or(RepositoryError::NotFound)?;
        row.rsvp_status = status;
        Ok(())
    }

    async fn insert_document_type(
        &self,
        document_type: DocumentType,
    ) -> Result<DocumentType, RepositoryError> {
        let mut tables = self.lock()?;
        if tables
            .document_types
            .iter()
            .any(|existing| existing.id == document_type.id)
        {
            return Err(RepositoryError::Conflict);
        }
        tables.document_types.push(document_type.clone());
        Ok(document_type)
    }

    async fn insert_document(&self, document: Document) -> Result<Document, RepositoryError> {
        let mut tables = self.lock()?;
        if !tables
            .document_types
            .iter()
            .any(|kind| kind.id == document.document_type_id)
        {
            return Err(RepositoryError::NotFound);
        }
        if tables.has_document(document.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.documents.push(document.clone());
        Ok(document)
    }

    async fn insert_document_with_version(
        &self,
        document: Document,
        version: NewDocumentVersion,
        event_id: Option<EventId>,
    ) -> Result<(Document, DocumentVersion), RepositoryError> {
        let mut tables = self.lock()?;
        let known_type = tables
            .document_types
            .iter()
            .any(|kind| kind.id == document.document_type_id);
        let known_event = event_id.map_or(true, |id| tables.has_event(id));
        if !known_type || !known_event || version.document_id != document.id {
            return Err(RepositoryError::NotFound);
        }
        if tables.has_document(document.id)
            || tables.versions.iter().any(|existing| existing.id == version.id)
        {
            return Err(RepositoryError::Conflict);
        }

        let stored = DocumentVersion {
            id: version.id,
            document_id: document.id,
            version_number: 1,
            file_path: version.file_path,
            is_current: true,
            uploaded_at: version.uploaded_at,
        };
        tables.documents.push(document.clone());
        tables.versions.push(stored.clone());
        if let Some(event_id) = event_id {
            tables.document_events.push(DocumentAssignment {
                document_id: document.id,
                event_id,
            });
        }
        Ok((document, stored))
    }

    async fn fetch_document(&self, id: DocumentId) -> Result<Option<Document>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables.documents.iter().find(|document| document.id == id).cloned())
    }

    async fn assign_document(
        &self,
        document_id: DocumentId,
        event_id: EventId,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        if !tables.has_document(document_id) || !tables.has_event(event_id) {
            return Err(RepositoryError::NotFound);
        }
        let assignment = DocumentAssignment {
            document_id,
            event_id,
        };
        if !tables.document_events.contains(&assignment) {
            tables.document_events.push(assignment);
        }
        Ok(())
    }

    async fn event_documents(
        &self,
        event_id: EventId,
    ) -> Result<Vec<AssignedDocument>, RepositoryError> {
        let tables = self.lock()?;
        let mut assigned = Vec::new();
        for link in tables
            .document_events
            .iter()
            .filter(|link| link.event_id == event_id)
        {
            let Some(document) = tables.documents.iter().find(|d| d.id == link.document_id) else {
                continue;
            };
            let Some(document_type) = tables
                .document_types
                .iter()
                .find(|kind| kind.id == document.document_type_id)
            else {
                continue;
            };
            let current_version = tables
                .versions
                .iter()
                .find(|version| version.document_id == document.id && version.is_current)
                .cloned();
            assigned.push(AssignedDocument {
                document: document.clone(),
                document_type: document_type.clone(),
                current_version,
            });
        }
        Ok(assigned)
    }

    async fn add_version(
        &self,
        version: NewDocumentVersion,
    ) -> Result<DocumentVersion, RepositoryError> {
        let mut tables = self.lock()?;
        if !tables.has_document(version.document_id) {
            return Err(RepositoryError::NotFound);
        }
        if tables.versions.iter().any(|existing| existing.id == version.id) {
            return Err(RepositoryError::Conflict);
        }
        let next_number = tables
            .versions
            .iter()
            .filter(|existing| existing.document_id == version.document_id)
            .map(|existing| existing.version_number)
            .max()
            .unwrap_or(0)
            + 1;

        for existing in tables
            .versions
            .iter_mut()
            .filter(|existing| existing.document_id == version.document_id)
        {
            existing.is_current = false;
        }

        let stored = DocumentVersion {
            id: version.id,
            document_id: version.document_id,
            version_number: next_number,
            file_path: version.file_path,
            is_current: true,
            uploaded_at: version.uploaded_at,
        };
        tables.versions.push(stored.clone());
        Ok(stored)
    }

    async fn document_versions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<DocumentVersion>, RepositoryError> {
        let tables = self.lock()?;
        let mut versions: Vec<DocumentVersion> = tables
            .versions
            .iter()
            .filter(|version| version.document_id == document_id)
            .cloned()
            .collect();
        versions.sort_by_key(|version| version.version_number);
        Ok(versions)
    }

    async fn set_current_version(
        &self,
        document_id: DocumentId,
        version_id: DocumentVersionId,
    ) -> Result<DocumentVersion, RepositoryError> {
        let mut tables = self.lock()?;
        if !tables
            .versions
            .iter()
            .any(|version| version.id == version_id && version.document_id == document_id)
        {
            return Err(RepositoryError::NotFound);
        }

        let mut current = None;
        for version in tables
            .versions
            .iter_mut()
            .filter(|version| version.document_id == document_id)
        {
            version.is_current = version.id == version_id;
            if version.is_current {
                current = Some(version.clone());
            }
        }
        current.ok_or(RepositoryError::NotFound)
    }

    async fn insert_confirmation(
        &self,
        confirmation: VisitorConfirmation,
    ) -> Result<VisitorConfirmation, RepositoryError> {
        let mut tables = self.lock()?;
        let version_matches = tables.versions.iter().any(|version| {
            version.id == confirmation.document_version_id
                && version.document_id == confirmation.document_id
        });
        if !tables.has_visitor(confirmation.visitor_id)
            || !tables.has_event(confirmation.event_id)
            || !version_matches
        {
            return Err(RepositoryError::NotFound);
        }
        if tables
            .confirmations
            .iter()
            .any(|existing| existing.id == confirmation.id)
        {
            return Err(RepositoryError::Conflict);
        }
        tables.confirmations.push(confirmation.clone());
        Ok(confirmation)
    }

    async fn visitor_confirmations(
        &self,
        visitor_id: VisitorId,
        event_id: EventId,
    ) -> Result<Vec<VisitorConfirmation>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .confirmations
            .iter()
            .filter(|row| row.visitor_id == visitor_id && row.event_id == event_id)
            .cloned()
            .collect())
    }
}
