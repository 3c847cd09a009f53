use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{Event, Visitor};
use super::tracker::ConfirmationStatus;

/// Payload handed to the external mail function, one entry per person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRecipient {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Outbound reminder hook (e.g. a hosted e-mail function).
///
/// Delivery is opaque: one call per batch, one success or error signal.
#[async_trait]
pub trait ReminderDispatcher: Send + Sync {
    async fn dispatch(&self, recipients: Vec<ReminderRecipient>) -> Result<(), ReminderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error("reminder transport unavailable: {0}")]
    Transport(String),
}

/// A visitor with missing or stale acknowledgments for an upcoming event.
#[derive(Debug, Clone, Serialize)]
pub struct OutstandingConfirmation {
    pub event: Event,
    pub visitor: Visitor,
    pub status: ConfirmationStatus,
}

impl OutstandingConfirmation {
    pub fn missing_count(&self) -> usize {
        self.status
            .required_count
            .saturating_sub(self.status.confirmed_count)
    }
}

/// Distinct recipients for the outstanding set, deduplicated by email.
pub fn reminder_recipients(outstanding: &[OutstandingConfirmation]) -> Vec<ReminderRecipient> {
    let mut seen = HashSet::new();
    outstanding
        .iter()
        .filter(|entry| entry.status.has_outstanding())
        .filter(|entry| seen.insert(entry.visitor.email.trim().to_lowercase()))
        .map(|entry| ReminderRecipient {
            email: entry.visitor.email.trim().to_string(),
            first_name: entry.visitor.first_name.clone(),
            last_name: entry.visitor.last_name.clone(),
        })
        .collect()
}
