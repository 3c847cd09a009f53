use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::config::ReminderConfig;
use crate::db::MemoryRepository;
use crate::files::{DocumentStorage, MemoryDocumentStorage, StorageError, StoredFile};
use crate::workflows::confirmations::domain::{
    Document, DocumentId, DocumentType, DocumentTypeId, Event, EventId, EventVisitor, RsvpStatus,
    Visitor, VisitorId,
};
use crate::workflows::confirmations::reminders::{
    ReminderDispatcher, ReminderError, ReminderRecipient,
};
use crate::workflows::confirmations::repository::ConfirmationRepository;
use crate::workflows::confirmations::service::{
    ConfirmationService, FileUpload, NewDocumentUpload, UploadedDocument,
};

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// Reference "today" for window calculations.
pub(super) fn today() -> NaiveDate {
    date(2025, 6, 1)
}

#[derive(Default)]
pub(super) struct RecordingDispatcher {
    batches: Mutex<Vec<Vec<ReminderRecipient>>>,
}

impl RecordingDispatcher {
    pub(super) fn batches(&self) -> Vec<Vec<ReminderRecipient>> {
        self.batches.lock().expect("dispatcher mutex poisoned").clone()
    }
}

#[async_trait]
impl ReminderDispatcher for RecordingDispatcher {
    async fn dispatch(&self, recipients: Vec<ReminderRecipient>) -> Result<(), ReminderError> {
        self.batches
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(recipients);
        Ok(())
    }
}

pub(super) struct FailingDispatcher;

#[async_trait]
impl ReminderDispatcher for FailingDispatcher {
    async fn dispatch(&self, _recipients: Vec<ReminderRecipient>) -> Result<(), ReminderError> {
        Err(ReminderError::Transport("mail function returned 500".to_string()))
    }
}

/// Storage whose disk is always full.
pub(super) struct FailingStorage;

#[async_trait]
impl DocumentStorage for FailingStorage {
    async fn upload(
        &self,
        _path: &str,
        _bytes: Vec<u8>,
        _content_type: &mime::Mime,
    ) -> Result<(), StorageError> {
        Err(StorageError::Io(std::io::Error::other("no space left on device")))
    }

    async fn download(&self, _path: &str) -> Result<Option<StoredFile>, StorageError> {
        Ok(None)
    }

    fn public_url(&self, path: &str) -> String {
        format!("https://files.example.com/files/{path}")
    }
}

pub(super) struct Fixture {
    pub(super) service: Arc<ConfirmationService<MemoryRepository>>,
    pub(super) repository: Arc<MemoryRepository>,
    pub(super) files: Arc<MemoryDocumentStorage>,
    pub(super) dispatcher: Arc<RecordingDispatcher>,
    pub(super) event: Event,
    pub(super) visitor: Visitor,
    pub(super) safety_type: DocumentType,
    pub(super) info_type: DocumentType,
}

pub(super) async fn fixture() -> Fixture {
    fixture_with_dispatcher(None).await
}

pub(super) async fn fixture_with_dispatcher(
    dispatcher: Option<Arc<dyn ReminderDispatcher>>,
) -> Fixture {
    let repository = Arc::new(MemoryRepository::default());
    let files = Arc::new(MemoryDocumentStorage::with_base_url("https://files.example.com/files"));
    let recording = Arc::new(RecordingDispatcher::default());
    let reminders: Arc<dyn ReminderDispatcher> = match dispatcher {
        Some(custom) => custom,
        None => recording.clone(),
    };
    let service = Arc::new(ConfirmationService::new(
        repository.clone(),
        files.clone(),
        reminders,
        ReminderConfig { lookahead_days: 30 },
    ));

    let event = insert_event(&repository, "Plant Tour", date(2025, 6, 10)).await;
    let visitor = insert_visitor(&repository, "Ada", "Lovelace", "ada@example.com").await;
    assign(&repository, visitor.id, event.id, RsvpStatus::Invited).await;

    let safety_type = repository
        .insert_document_type(DocumentType {
            id: DocumentTypeId::new(),
            name: "Safety".to_string(),
            requires_confirmation: true,
        })
        .await
        .expect("safety type");
    let info_type = repository
        .insert_document_type(DocumentType {
            id: DocumentTypeId::new(),
            name: "Information".to_string(),
            requires_confirmation: false,
        })
        .await
        .expect("info type");

    Fixture {
        service,
        repository,
        files,
        dispatcher: recording,
        event,
        visitor,
        safety_type,
        info_type,
    }
}

pub(super) async fn insert_event(
    repository: &MemoryRepository,
    name: &str,
    starts_on: NaiveDate,
) -> Event {
    repository
        .insert_event(Event {
            id: EventId::new(),
            name: name.to_string(),
            organization_id: None,
            starts_on,
            ends_on: None,
        })
        .await
        .expect("event inserted")
}

pub(super) async fn insert_visitor(
    repository: &MemoryRepository,
    first_name: &str,
    last_name: &str,
    email: &str,
) -> Visitor {
    repository
        .insert_visitor(Visitor {
            id: VisitorId::new(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            phone: None,
            organization_id: None,
            profile_id: None,
        })
        .await
        .expect("visitor inserted")
}

pub(super) async fn assign(
    repository: &MemoryRepository,
    visitor_id: VisitorId,
    event_id: EventId,
    rsvp_status: RsvpStatus,
) {
    repository
        .assign_visitor(EventVisitor {
            visitor_id,
            event_id,
            rsvp_status,
        })
        .await
        .expect("visitor assigned");
}

pub(super) fn pdf(name: &str) -> FileUpload {
    FileUpload {
        file_name: name.to_string(),
        content_type: "application/pdf".to_string(),
        bytes: format!("%PDF-1.7 {name}").into_bytes(),
    }
}

/// Uploads a document with one version and assigns it to `event_id`.
pub(super) async fn upload(
    fixture: &Fixture,
    title: &str,
    document_type: &DocumentType,
    event_id: EventId,
) -> UploadedDocument {
    fixture
        .service
        .upload_document(NewDocumentUpload {
            document_type_id: document_type.id,
            title: title.to_string(),
            event_id: Some(event_id),
            file: pdf(&format!("{title}.pdf")),
        })
        .await
        .expect("document uploaded")
}

/// A required document that was assigned but never had a file uploaded.
pub(super) async fn document_without_upload(fixture: &Fixture, title: &str) -> DocumentId {
    let document = fixture
        .repository
        .insert_document(Document {
            id: DocumentId::new(),
            document_type_id: fixture.safety_type.id,
            title: title.to_string(),
            is_active: true,
        })
        .await
        .expect("document inserted");
    fixture
        .repository
        .assign_document(document.id, fixture.event.id)
        .await
        .expect("document assigned");
    document.id
}

pub(super) fn visitor_request(
    method: &str,
    uri: &str,
    visitor_id: VisitorId,
    body: Body,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", "user-visitor")
        .header("x-visitor-id", visitor_id.to_string())
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .expect("request builds")
}

pub(super) fn admin_request(
    method: &str,
    uri: &str,
    content_type: &str,
    body: Body,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", "user-admin")
        .header("x-admin", "true")
        .header(axum::http::header::CONTENT_TYPE, content_type)
        .body(body)
        .expect("request builds")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) async fn read_text_body(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}
