//! Confirmation consistency rules.
//!
//! Everything here is a pure function over rows already read from the repository, so the
//! same rules back the visitor view, the admin dashboard, and RSVP reconciliation.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::domain::{
    AssignedDocument, DocumentId, DocumentVersionId, EventId, EventVisitor, RsvpStatus, VisitorConfirmation,
    VisitorId,
};

/// A document the visitor must acknowledge, pinned to its current version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequiredDocument {
    pub document_id: DocumentId,
    pub title: String,
    pub current_version_id: DocumentVersionId,
    pub current_version_number: u32,
}

/// Where a visitor stands on one required document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DocumentState {
    Unconfirmed,
    Confirmed {
        version_id: DocumentVersionId,
    },
    /// Acknowledged, but a newer version has since become current.
    Stale {
        confirmed_version_id: DocumentVersionId,
        current_version_id: DocumentVersionId,
    },
}

impl DocumentState {
    pub const fn is_stale(self) -> bool {
        matches!(self, DocumentState::Stale { .. })
    }

    pub const fn is_confirmed(self) -> bool {
        matches!(self, DocumentState::Confirmed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentConfirmationState {
    pub document_id: DocumentId,
    pub title: String,
    pub current_version_id: DocumentVersionId,
    pub current_version_number: u32,
    #[serde(flatten)]
    pub state: DocumentState,
}

/// Completion summary for one visitor at one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationStatus {
    pub visitor_id: VisitorId,
    pub event_id: EventId,
    /// False when the visitor is not assigned to the event; counts are then zero.
    pub applicable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsvp_status: Option<RsvpStatus>,
    pub required_count: usize,
    pub confirmed_count: usize,
    pub documents: Vec<DocumentConfirmationState>,
}

impl ConfirmationStatus {
    pub fn not_applicable(visitor_id: VisitorId, event_id: EventId) -> Self {
        Self {
            visitor_id,
            event_id,
            applicable: false,
            rsvp_status: None,
            required_count: 0,
            confirmed_count: 0,
            documents: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.confirmed_count == self.required_count
    }

    pub fn has_outstanding(&self) -> bool {
        self.applicable && !self.is_complete()
    }

    pub fn stale_count(&self) -> usize {
        self.documents
            .iter()
            .filter(|document| document.state.is_stale())
            .count()
    }

    /// Per-document stale flags, in required-document order.
    pub fn stale_flags(&self) -> Vec<(DocumentId, bool)> {
        self.documents
            .iter()
            .map(|document| (document.document_id, document.state.is_stale()))
            .collect()
    }

    pub fn state_of(&self, document_id: DocumentId) -> Option<DocumentState> {
        self.documents
            .iter()
            .find(|document| document.document_id == document_id)
            .map(|document| document.state)
    }
}

/// Documents assigned to an event whose type requires confirmation.
///
/// Inactive documents and documents without an uploaded version are skipped; the output
/// holds one entry per document, ordered by title.
pub fn required_documents(assigned: &[AssignedDocument]) -> Vec<RequiredDocument> {
    let mut seen = HashSet::new();
    let mut required: Vec<RequiredDocument> = assigned
        .iter()
        .filter(|entry| entry.document_type.requires_confirmation && entry.document.is_active)
        .filter_map(|entry| {
            let version = entry.current_version.as_ref()?;
            if version.document_id != entry.document.id || !version.is_current {
                return None;
            }
            seen.insert(entry.document.id).then(|| RequiredDocument {
                document_id: entry.document.id,
                title: entry.document.title.clone(),
                current_version_id: version.id,
                current_version_number: version.version_number,
            })
        })
        .collect();

    required.sort_by(|a, b| {
        a.title
            .cmp(&b.title)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    required
}

/// Classifies every required document for one visitor.
///
/// `confirmations` may contain rows for other events or duplicates; only rows for this
/// visitor and event are considered.
pub fn confirmation_status(
    visitor_id: VisitorId,
    event_id: EventId,
    assignment: Option<&EventVisitor>,
    required: &[RequiredDocument],
    confirmations: &[VisitorConfirmation],
) -> ConfirmationStatus {
    let Some(assignment) = assignment else {
        return ConfirmationStatus::not_applicable(visitor_id, event_id);
    };

    let mut confirmed_versions: HashMap<DocumentId, Vec<&VisitorConfirmation>> = HashMap::new();
    for confirmation in confirmations
        .iter()
        .filter(|row| row.visitor_id == visitor_id && row.event_id == event_id)
    {
        confirmed_versions
            .entry(confirmation.document_id)
            .or_default()
            .push(confirmation);
    }

    let documents: Vec<DocumentConfirmationState> = required
        .iter()
        .map(|document| {
            let rows = confirmed_versions
                .get(&document.document_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let state = classify(document, rows);
            DocumentConfirmationState {
                document_id: document.document_id,
                title: document.title.clone(),
                current_version_id: document.current_version_id,
                current_version_number: document.current_version_number,
                state,
            }
        })
        .collect();

    let confirmed_count = documents
        .iter()
        .filter(|document| document.state.is_confirmed())
        .count();

    ConfirmationStatus {
        visitor_id,
        event_id,
        applicable: true,
        rsvp_status: Some(assignment.rsvp_status),
        required_count: required.len(),
        confirmed_count,
        documents,
    }
}

fn classify(document: &RequiredDocument, rows: &[&VisitorConfirmation]) -> DocumentState {
    if rows
        .iter()
        .any(|row| row.document_version_id == document.current_version_id)
    {
        return DocumentState::Confirmed {
            version_id: document.current_version_id,
        };
    }

    match rows.iter().max_by_key(|row| row.confirmed_at) {
        Some(latest) => DocumentState::Stale {
            confirmed_version_id: latest.document_version_id,
            current_version_id: document.current_version_id,
        },
        None => DocumentState::Unconfirmed,
    }
}

/// RSVP transition implied by a completion summary, if any.
///
/// Only an invited visitor with at least one required document, all confirmed at their
/// current versions, moves to `Confirmed`. Applying the result twice is a no-op.
pub fn derive_rsvp(current: RsvpStatus, status: &ConfirmationStatus) -> Option<RsvpStatus> {
    let complete = status.applicable && status.required_count > 0 && status.is_complete();
    match (current, complete) {
        (RsvpStatus::Invited, true) => Some(RsvpStatus::Confirmed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::confirmations::domain::{
        ConfirmationId, Document, DocumentType, DocumentTypeId, DocumentVersion,
    };
    use chrono::{Duration, TimeZone, Utc};

    fn doc_type(requires_confirmation: bool) -> DocumentType {
        DocumentType {
            id: DocumentTypeId::new(),
            name: if requires_confirmation {
                "Safety briefing".to_string()
            } else {
                "Agenda".to_string()
            },
            requires_confirmation,
        }
    }

    fn assigned(title: &str, requires_confirmation: bool, version_number: u32) -> AssignedDocument {
        let document = Document {
            id: DocumentId::new(),
            document_type_id: DocumentTypeId::new(),
            title: title.to_string(),
            is_active: true,
        };
        let current_version = DocumentVersion {
            id: DocumentVersionId::new(),
            document_id: document.id,
            version_number,
            file_path: format!("documents/{}/v{version_number}.pdf", document.id),
            is_current: true,
            uploaded_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        };
        AssignedDocument {
            document,
            document_type: doc_type(requires_confirmation),
            current_version: Some(current_version),
        }
    }

    fn confirm(
        visitor_id: VisitorId,
        event_id: EventId,
        document_id: DocumentId,
        version_id: DocumentVersionId,
        minutes: i64,
    ) -> VisitorConfirmation {
        VisitorConfirmation {
            id: ConfirmationId::new(),
            visitor_id,
            event_id,
            document_id,
            document_version_id: version_id,
            confirmed_at: Utc.with_ymd_and_hms(2025, 3, 2, 8, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    fn invited(visitor_id: VisitorId, event_id: EventId) -> EventVisitor {
        EventVisitor {
            visitor_id,
            event_id,
            rsvp_status: RsvpStatus::Invited,
        }
    }

    #[test]
    fn required_set_only_includes_confirmation_types() {
        let waiver = assigned("Liability waiver", true, 1);
        let agenda = assigned("Agenda", false, 1);

        let required = required_documents(&[waiver.clone(), agenda]);

        assert_eq!(required.len(), 1);
        assert_eq!(required[0].document_id, waiver.document.id);
    }

    #[test]
    fn required_set_skips_inactive_and_unuploaded_documents() {
        let mut inactive = assigned("Old waiver", true, 2);
        inactive.document.is_active = false;
        let mut missing_upload = assigned("NDA", true, 1);
        missing_upload.current_version = None;
        let active = assigned("Badge policy", true, 1);

        let required = required_documents(&[inactive, missing_upload, active.clone(), active.clone()]);

        assert_eq!(required.len(), 1, "duplicates collapse to one entry");
        assert_eq!(required[0].document_id, active.document.id);
    }

    #[test]
    fn missing_assignment_is_not_applicable() {
        let required = required_documents(&[assigned("Liability waiver", true, 1)]);
        let status = confirmation_status(VisitorId::new(), EventId::new(), None, &required, &[]);

        assert!(!status.applicable);
        assert_eq!(status.required_count, 0);
        assert_eq!(status.confirmed_count, 0);
        assert!(!status.has_outstanding());
    }

    #[test]
    fn confirmation_against_old_version_is_stale() {
        let visitor_id = VisitorId::new();
        let event_id = EventId::new();
        let waiver = assigned("Liability waiver", true, 2);
        let old_version = DocumentVersionId::new();
        let required = required_documents(&[waiver.clone()]);
        let rows = vec![confirm(visitor_id, event_id, waiver.document.id, old_version, 0)];

        let status = confirmation_status(
            visitor_id,
            event_id,
            Some(&invited(visitor_id, event_id)),
            &required,
            &rows,
        );

        assert_eq!(status.required_count, 1);
        assert_eq!(status.confirmed_count, 0);
        assert_eq!(status.stale_count(), 1);
        assert_eq!(
            status.state_of(waiver.document.id),
            Some(DocumentState::Stale {
                confirmed_version_id: old_version,
                current_version_id: required[0].current_version_id,
            })
        );
        assert_eq!(status.stale_flags(), vec![(waiver.document.id, true)]);
    }

    #[test]
    fn reconfirming_current_version_clears_stale_flag() {
        let visitor_id = VisitorId::new();
        let event_id = EventId::new();
        let waiver = assigned("Liability waiver", true, 2);
        let required = required_documents(&[waiver.clone()]);
        let rows = vec![
            confirm(visitor_id, event_id, waiver.document.id, DocumentVersionId::new(), 0),
            confirm(visitor_id, event_id, waiver.document.id, required[0].current_version_id, 5),
        ];

        let status = confirmation_status(
            visitor_id,
            event_id,
            Some(&invited(visitor_id, event_id)),
            &required,
            &rows,
        );

        assert!(status.is_complete());
        assert_eq!(status.stale_count(), 0);
    }

    #[test]
    fn confirmations_for_other_events_are_ignored() {
        let visitor_id = VisitorId::new();
        let event_id = EventId::new();
        let waiver = assigned("Liability waiver", true, 1);
        let required = required_documents(&[waiver.clone()]);
        let rows = vec![confirm(
            visitor_id,
            EventId::new(),
            waiver.document.id,
            required[0].current_version_id,
            0,
        )];

        let status = confirmation_status(
            visitor_id,
            event_id,
            Some(&invited(visitor_id, event_id)),
            &required,
            &rows,
        );

        assert_eq!(status.state_of(waiver.document.id), Some(DocumentState::Unconfirmed));
    }

    #[test]
    fn derive_rsvp_only_promotes_complete_invitations() {
        let visitor_id = VisitorId::new();
        let event_id = EventId::new();
        let waiver = assigned("Liability waiver", true, 1);
        let required = required_documents(&[waiver.clone()]);
        let rows = vec![confirm(
            visitor_id,
            event_id,
            waiver.document.id,
            required[0].current_version_id,
            0,
        )];
        let assignment = invited(visitor_id, event_id);
        let complete = confirmation_status(visitor_id, event_id, Some(&assignment), &required, &rows);
        let incomplete = confirmation_status(visitor_id, event_id, Some(&assignment), &required, &[]);
        let nothing_required = confirmation_status(visitor_id, event_id, Some(&assignment), &[], &[]);

        assert_eq!(derive_rsvp(RsvpStatus::Invited, &complete), Some(RsvpStatus::Confirmed));
        assert_eq!(derive_rsvp(RsvpStatus::Confirmed, &complete), None);
        assert_eq!(derive_rsvp(RsvpStatus::Declined, &complete), None);
        assert_eq!(derive_rsvp(RsvpStatus::Invited, &incomplete), None);
        assert_eq!(derive_rsvp(RsvpStatus::Invited, &nothing_required), None);
    }
}
