use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Uuid::try_parse(value.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Company or agency a visitor belongs to.
    OrganizationId
);
uuid_id!(EventId);
uuid_id!(VisitorId);
uuid_id!(DocumentTypeId);
uuid_id!(DocumentId);
uuid_id!(DocumentVersionId);
uuid_id!(ConfirmationId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub organization_id: Option<OrganizationId>,
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visitor {
    pub id: VisitorId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub organization_id: Option<OrganizationId>,
    /// Identity assigned by the external auth provider once the visitor signs up.
    pub profile_id: Option<String>,
}

impl Visitor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentType {
    pub id: DocumentTypeId,
    pub name: String,
    pub requires_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub document_type_id: DocumentTypeId,
    pub title: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: DocumentVersionId,
    pub document_id: DocumentId,
    pub version_number: u32,
    pub file_path: String,
    pub is_current: bool,
    pub uploaded_at: DateTime<Utc>,
}

/// Version row to be appended; the repository assigns the number and current flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocumentVersion {
    pub id: DocumentVersionId,
    pub document_id: DocumentId,
    pub file_path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Declares that a document must be available to visitors of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentAssignment {
    pub document_id: DocumentId,
    pub event_id: EventId,
}

/// Per-event attendance and acknowledgment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    Invited,
    Confirmed,
    Declined,
    Attended,
    Cancelled,
}

impl RsvpStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RsvpStatus::Invited => "invited",
            RsvpStatus::Confirmed => "confirmed",
            RsvpStatus::Declined => "declined",
            RsvpStatus::Attended => "attended",
            RsvpStatus::Cancelled => "cancelled",
        }
    }

    /// Visitors who opted out no longer owe any acknowledgments.
    pub const fn expects_attendance(self) -> bool {
        !matches!(self, RsvpStatus::Declined | RsvpStatus::Cancelled)
    }
}

impl fmt::Display for RsvpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rsvp status '{0}'")]
pub struct UnknownRsvpStatus(pub String);

impl FromStr for RsvpStatus {
    type Err = UnknownRsvpStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "invited" => Ok(RsvpStatus::Invited),
            "confirmed" => Ok(RsvpStatus::Confirmed),
            "declined" => Ok(RsvpStatus::Declined),
            "attended" => Ok(RsvpStatus::Attended),
            "cancelled" | "canceled" => Ok(RsvpStatus::Cancelled),
            other => Err(UnknownRsvpStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventVisitor {
    pub visitor_id: VisitorId,
    pub event_id: EventId,
    pub rsvp_status: RsvpStatus,
}

/// Immutable acknowledgment of one document version for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorConfirmation {
    pub id: ConfirmationId,
    pub visitor_id: VisitorId,
    pub event_id: EventId,
    pub document_id: DocumentId,
    pub document_version_id: DocumentVersionId,
    pub confirmed_at: DateTime<Utc>,
}

/// An event document joined with its type and current version, as read in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedDocument {
    pub document: Document,
    pub document_type: DocumentType,
    pub current_version: Option<DocumentVersion>,
}
