use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use crate::workflows::confirmations::domain::{Event, EventId, OrganizationId, Visitor};
use crate::workflows::confirmations::repository::{ConfirmationRepository, RepositoryError};

use super::parser::ROSTER_HEADERS;

#[derive(Debug, thiserror::Error)]
pub enum RosterExportError {
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("failed to write roster: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to write roster: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes the directory back out in the import layout, so an export can be edited and
/// re-imported elsewhere.
pub struct VisitorExporter<R> {
    repository: Arc<R>,
}

impl<R> VisitorExporter<R>
where
    R: ConfirmationRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// One line per (visitor, event) assignment. Without a filter, visitors with no
    /// assignment get a single line with an empty event column.
    ///
    /// Returns the number of data lines written.
    pub async fn export<W: Write + Send>(
        &self,
        writer: W,
        event_name: Option<&str>,
    ) -> Result<usize, RosterExportError> {
        let lines = self.collect_lines(event_name).await?;

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(ROSTER_HEADERS)?;
        for line in &lines {
            csv_writer.write_record(line)?;
        }
        csv_writer.flush()?;
        Ok(lines.len())
    }

    pub async fn export_to_string(
        &self,
        event_name: Option<&str>,
    ) -> Result<String, RosterExportError> {
        let mut buffer = Vec::new();
        self.export(&mut buffer, event_name).await?;
        String::from_utf8(buffer)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err).into())
    }

    async fn collect_lines(
        &self,
        event_name: Option<&str>,
    ) -> Result<Vec<[String; 6]>, RosterExportError> {
        let filter = match event_name {
            Some(name) => Some(
                self.repository
                    .find_event_by_name(name)
                    .await?
                    .ok_or_else(|| RosterExportError::UnknownEvent(name.to_string()))?,
            ),
            None => None,
        };

        let mut organizations: HashMap<OrganizationId, String> = HashMap::new();
        let mut events: HashMap<EventId, Event> = HashMap::new();
        if let Some(event) = &filter {
            events.insert(event.id, event.clone());
        }

        let mut lines = Vec::new();
        for visitor in self.repository.list_visitors().await? {
            let organization = match visitor.organization_id {
                Some(id) => self.organization_name(id, &mut organizations).await?,
                None => String::new(),
            };

            let mut assigned = Vec::new();
            for assignment in self.repository.visitor_assignments(visitor.id).await? {
                if filter
                    .as_ref()
                    .is_some_and(|event| event.id != assignment.event_id)
                {
                    continue;
                }
                if let Some(event) = self.event(assignment.event_id, &mut events).await? {
                    assigned.push(event);
                }
            }
            assigned.sort_by(|a, b| a.starts_on.cmp(&b.starts_on).then_with(|| a.name.cmp(&b.name)));

            if assigned.is_empty() {
                if filter.is_none() {
                    lines.push(line(&visitor, &organization, ""));
                }
                continue;
            }
            for event in assigned {
                lines.push(line(&visitor, &organization, &event.name));
            }
        }
        Ok(lines)
    }

    async fn organization_name(
        &self,
        id: OrganizationId,
        cache: &mut HashMap<OrganizationId, String>,
    ) -> Result<String, RepositoryError> {
        if let Some(name) = cache.get(&id) {
            return Ok(name.clone());
        }
        let name = self
            .repository
            .fetch_organization(id)
            .await?
            .map(|org| org.name)
            .unwrap_or_default();
        cache.insert(id, name.clone());
        Ok(name)
    }

    async fn event(
        &self,
        id: EventId,
        cache: &mut HashMap<EventId, Event>,
    ) -> Result<Option<Event>, RepositoryError> {
        if let Some(event) = cache.get(&id) {
            return Ok(Some(event.clone()));
        }
        let fetched = self.repository.fetch_event(id).await?;
        if let Some(event) = &fetched {
            cache.insert(id, event.clone());
        }
        Ok(fetched)
    }
}

fn line(visitor: &Visitor, organization: &str, event: &str) -> [String; 6] {
    [
        visitor.first_name.clone(),
        visitor.last_name.clone(),
        visitor.email.clone(),
        visitor.phone.clone().unwrap_or_default(),
        organization.to_string(),
        event.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::workflows::confirmations::domain::{
        EventVisitor, Organization, RsvpStatus, VisitorId,
    };
    use crate::workflows::roster::VisitorImporter;
    use chrono::NaiveDate;
    use std::io::Cursor;

    async fn event(repository: &MemoryRepository, name: &str, day: u32) -> Event {
        repository
            .insert_event(Event {
                id: EventId::new(),
                name: name.to_string(),
                organization_id: None,
                starts_on: NaiveDate::from_ymd_opt(2025, 6, day).expect("valid date"),
                ends_on: None,
            })
            .await
            .expect("event")
    }

    fn visitor(first: &str, last: &str, organization_id: Option<OrganizationId>) -> Visitor {
        Visitor {
            id: VisitorId::new(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: format!("{}@example.com", first.to_lowercase()),
            phone: None,
            organization_id,
            profile_id: None,
        }
    }

    #[tokio::test]
    async fn export_lists_assignments_and_unassigned_visitors() {
        let repository = Arc::new(MemoryRepository::default());
        let acme = repository
            .insert_organization(Organization {
                id: OrganizationId::new(),
                name: "Acme Corp".to_string(),
            })
            .await
            .expect("organization");
        let tour = event(&repository, "Plant Tour", 1).await;
        let audit = event(&repository, "Audit", 2).await;

        let ada = repository
            .insert_visitor(visitor("Ada", "Lovelace", Some(acme.id)))
            .await
            .expect("ada");
        repository
            .insert_visitor(visitor("Grace", "Hopper", None))
            .await
            .expect("grace");
        for event_id in [audit.id, tour.id] {
            repository
                .assign_visitor(EventVisitor {
                    visitor_id: ada.id,
                    event_id,
                    rsvp_status: RsvpStatus::Invited,
                })
                .await
                .expect("assign");
        }

        let exporter = VisitorExporter::new(repository.clone());
        let csv = exporter.export_to_string(None).await.expect("export");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "First Name,Last Name,Email,Phone,Organization,Event");
        assert!(lines.contains(&"Grace,Hopper,grace@example.com,,,"));
        assert!(lines.contains(&"Ada,Lovelace,ada@example.com,,Acme Corp,Plant Tour"));
        assert!(lines.contains(&"Ada,Lovelace,ada@example.com,,Acme Corp,Audit"));
        assert_eq!(lines.len(), 4);

        let filtered = exporter
            .export_to_string(Some("plant tour"))
            .await
            .expect("filtered export");
        assert_eq!(filtered.lines().count(), 2);

        let error = exporter
            .export_to_string(Some("Nope"))
            .await
            .expect_err("unknown event");
        assert!(matches!(error, RosterExportError::UnknownEvent(_)));
    }

    #[tokio::test]
    async fn export_output_imports_cleanly_into_an_empty_directory() {
        let source = Arc::new(MemoryRepository::default());
        event(&source, "Plant Tour", 1).await;
        let mut seeded = visitor("Ada", "Lovelace", None);
        seeded.phone = Some("515-555-0101".to_string());
        let ada = source.insert_visitor(seeded).await.expect("ada");
        let tour = source
            .find_event_by_name("Plant Tour")
            .await
            .expect("lookup")
            .expect("event");
        source
            .assign_visitor(EventVisitor {
                visitor_id: ada.id,
                event_id: tour.id,
                rsvp_status: RsvpStatus::Invited,
            })
            .await
            .expect("assign");

        let csv = VisitorExporter::new(source)
            .export_to_string(None)
            .await
            .expect("export");

        let target = Arc::new(MemoryRepository::default());
        event(&target, "Plant Tour", 1).await;
        let report = VisitorImporter::new(target.clone())
            .import_reader(Cursor::new(csv))
            .await
            .expect("import");
        assert_eq!(report.success, 1);
        assert!(report.errors.is_empty());
    }
}
