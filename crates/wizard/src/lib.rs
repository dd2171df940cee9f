//! Three-step wizard state machine: create a job, an inventory item, and an
//! image, then reload each of them through the store capabilities.

use std::{
    fmt,
    sync::atomic::{AtomicI64, Ordering},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use identity::IdentityGateway;
use shared::{
    domain::{Document, ItemRecord, JobRecord, JobStatus, Session},
    error::{AuthError, BlobError, StoreError},
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use url::Url;

pub const JOBS_COLLECTION: &str = "jobs";
pub const ITEMS_COLLECTION: &str = "items";

/// Key-value document interface: single-document put/get by collection+id,
/// no querying or transactions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(
        &self,
        collection: &str,
        doc_id: &str,
        document: &Document,
    ) -> Result<(), StoreError>;
    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Document>, StoreError>;
}

/// Path-addressed byte storage with on-demand URL resolution.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError>;
    async fn resolve_url(&self, path: &str) -> Result<Option<Url>, BlobError>;
}

pub struct MissingDocumentStore;

#[async_trait]
impl DocumentStore for MissingDocumentStore {
    async fn put(
        &self,
        collection: &str,
        doc_id: &str,
        _document: &Document,
    ) -> Result<(), StoreError> {
        Err(StoreError(format!(
            "document store is unavailable for {collection}/{doc_id}"
        )))
    }

    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Document>, StoreError> {
        Err(StoreError(format!(
            "document store is unavailable for {collection}/{doc_id}"
        )))
    }
}

pub struct MissingBlobStore;

#[async_trait]
impl BlobStore for MissingBlobStore {
    async fn upload(&self, path: &str, _bytes: &[u8]) -> Result<(), BlobError> {
        Err(BlobError(format!("blob store is unavailable for '{path}'")))
    }

    async fn resolve_url(&self, path: &str) -> Result<Option<Url>, BlobError> {
        Err(BlobError(format!("blob store is unavailable for '{path}'")))
    }
}

#[async_trait]
impl DocumentStore for storage::DocumentStorage {
    async fn put(
        &self,
        collection: &str,
        doc_id: &str,
        document: &Document,
    ) -> Result<(), StoreError> {
        storage::DocumentStorage::put(self, collection, doc_id, document)
            .await
            .map_err(|err| StoreError(err.to_string()))
    }

    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Document>, StoreError> {
        storage::DocumentStorage::get(self, collection, doc_id)
            .await
            .map_err(|err| StoreError(err.to_string()))
    }
}

#[async_trait]
impl BlobStore for storage::BlobStorage {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError> {
        storage::BlobStorage::upload(self, path, bytes)
            .await
            .map_err(|err| BlobError(err.to_string()))
    }

    async fn resolve_url(&self, path: &str) -> Result<Option<Url>, BlobError> {
        storage::BlobStorage::resolve_url(self, path)
            .await
            .map_err(|err| BlobError(err.to_string()))
    }
}

/// The six independent sub-flows. Each key guards its own reentry; different
/// keys may run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKey {
    JobCreate,
    ItemCreate,
    ImageUpload,
    JobLoad,
    ItemLoad,
    ImageLoad,
}

impl OpKey {
    pub fn label(self) -> &'static str {
        match self {
            OpKey::JobCreate => "create job",
            OpKey::ItemCreate => "create item",
            OpKey::ImageUpload => "upload image",
            OpKey::JobLoad => "load job",
            OpKey::ItemLoad => "load item",
            OpKey::ImageLoad => "load image",
        }
    }
}

impl fmt::Display for OpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fixed-shape per-operation loading record. A set flag marks an in-flight
/// call and suppresses reentry for that key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadingFlags {
    pub job_create: bool,
    pub item_create: bool,
    pub image_upload: bool,
    pub job_load: bool,
    pub item_load: bool,
    pub image_load: bool,
}

impl LoadingFlags {
    fn slot_mut(&mut self, op: OpKey) -> &mut bool {
        match op {
            OpKey::JobCreate => &mut self.job_create,
            OpKey::ItemCreate => &mut self.item_create,
            OpKey::ImageUpload => &mut self.image_upload,
            OpKey::JobLoad => &mut self.job_load,
            OpKey::ItemLoad => &mut self.item_load,
            OpKey::ImageLoad => &mut self.image_load,
        }
    }

    pub fn is_set(&self, op: OpKey) -> bool {
        match op {
            OpKey::JobCreate => self.job_create,
            OpKey::ItemCreate => self.item_create,
            OpKey::ImageUpload => self.image_upload,
            OpKey::JobLoad => self.job_load,
            OpKey::ItemLoad => self.item_load,
            OpKey::ImageLoad => self.image_load,
        }
    }

    pub fn any_set(&self) -> bool {
        self.job_create
            || self.item_create
            || self.image_upload
            || self.job_load
            || self.item_load
            || self.image_load
    }
}

/// Forward-only step progression; the only way back to step 1 is a full reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WizardStep {
    #[default]
    CreateResources,
    LoadResources,
    Done,
}

impl WizardStep {
    pub fn index(self) -> u8 {
        match self {
            WizardStep::CreateResources => 1,
            WizardStep::LoadResources => 2,
            WizardStep::Done => 3,
        }
    }

    fn next(self) -> Option<WizardStep> {
        match self {
            WizardStep::CreateResources => Some(WizardStep::LoadResources),
            WizardStep::LoadResources => Some(WizardStep::Done),
            WizardStep::Done => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum WizardError {
    #[error("no active session; sign in first")]
    SignedOut,
    #[error("{0} is already in progress")]
    Busy(OpKey),
    #[error("create a job before loading it")]
    MissingJob,
    #[error("create an item before loading it")]
    MissingItem,
    #[error("upload an image before loading it")]
    MissingImage,
    #[error("invalid image filename '{0}'")]
    InvalidFilename(String),
    #[error("wizard is already on the last step")]
    NoFurtherStep,
    #[error("finish is only available on the last step")]
    NotFinished,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Blob(#[from] BlobError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
    Neutral,
}

/// Toast-equivalent notifications plus structural state changes, broadcast to
/// whatever shell renders the wizard.
#[derive(Debug, Clone)]
pub enum WizardEvent {
    Notice {
        kind: NoticeKind,
        title: String,
        detail: Option<String>,
    },
    StepChanged(WizardStep),
    Reset,
}

/// In-memory wizard state for one signed-in UI lifetime. Discarded on
/// sign-out or Start Over, never persisted.
#[derive(Debug, Clone, Default)]
pub struct WizardState {
    pub step: WizardStep,
    pub job_id: Option<String>,
    pub item_id: Option<String>,
    pub image_path: Option<String>,
    pub loaded_job: Option<Document>,
    pub loaded_item: Option<Document>,
    pub loaded_image_url: Option<Url>,
    pub loading: LoadingFlags,
}

pub struct WizardController {
    identity: Arc<IdentityGateway>,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    state: Mutex<WizardState>,
    events: broadcast::Sender<WizardEvent>,
}

impl WizardController {
    pub fn new(identity: Arc<IdentityGateway>) -> Arc<Self> {
        Self::new_with_capabilities(
            identity,
            Arc::new(MissingDocumentStore),
            Arc::new(MissingBlobStore),
        )
    }

    pub fn new_with_capabilities(
        identity: Arc<IdentityGateway>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            identity,
            documents,
            blobs,
            state: Mutex::new(WizardState::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WizardEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> WizardState {
        self.state.lock().await.clone()
    }

    pub async fn create_job(&self) -> Result<String, WizardError> {
        let session = self.require_session().await?;
        self.begin(OpKey::JobCreate).await?;
        let outcome = self.create_job_inner(&session).await;
        self.finish_op(OpKey::JobCreate).await;
        match outcome {
            Ok(job_id) => {
                self.state.lock().await.job_id = Some(job_id.clone());
                info!(%job_id, "job created");
                self.notify(
                    NoticeKind::Success,
                    "Job created",
                    Some(format!("Job ID: {job_id}")),
                );
                Ok(job_id)
            }
            Err(err) => {
                warn!("job create failed: {err}");
                self.notify(
                    NoticeKind::Error,
                    "Failed to create job",
                    Some(err.to_string()),
                );
                Err(err)
            }
        }
    }

    async fn create_job_inner(&self, session: &Session) -> Result<String, WizardError> {
        let job_id = derived_id("job", &session.uid, next_id_millis());
        let record = JobRecord {
            title: "Emergency Repair Task".to_string(),
            status: JobStatus::New,
            created_at: Utc::now(),
            assigned_to: session.display_name.clone(),
        };
        let document = to_document(&record)?;
        self.documents
            .put(JOBS_COLLECTION, &job_id, &document)
            .await?;
        Ok(job_id)
    }

    pub async fn create_item(&self) -> Result<String, WizardError> {
        let session = self.require_session().await?;
        self.begin(OpKey::ItemCreate).await?;
        let outcome = self.create_item_inner(&session).await;
        self.finish_op(OpKey::ItemCreate).await;
        match outcome {
            Ok(item_id) => {
                self.state.lock().await.item_id = Some(item_id.clone());
                info!(%item_id, "item created");
                self.notify(
                    NoticeKind::Success,
                    "Item created",
                    Some(format!("Item ID: {item_id}")),
                );
                Ok(item_id)
            }
            Err(err) => {
                warn!("item create failed: {err}");
                self.notify(
                    NoticeKind::Error,
                    "Failed to create inventory item",
                    Some(err.to_string()),
                );
                Err(err)
            }
        }
    }

    async fn create_item_inner(&self, session: &Session) -> Result<String, WizardError> {
        let millis = next_id_millis();
        let item_id = derived_id("item", &session.uid, millis);
        let record = ItemRecord {
            name: "Replacement Part".to_string(),
            sku: format!("SKU-{}", 1000 + millis % 9000),
            quantity: 10,
            added_by: session.email.clone(),
        };
        let document = to_document(&record)?;
        self.documents
            .put(ITEMS_COLLECTION, &item_id, &document)
            .await?;
        Ok(item_id)
    }

    pub async fn upload_image(&self, filename: &str, bytes: &[u8]) -> Result<String, WizardError> {
        let session = self.require_session().await?;
        if filename.is_empty() || filename.contains('/') || filename.contains('\\') {
            return Err(WizardError::InvalidFilename(filename.to_string()));
        }
        self.begin(OpKey::ImageUpload).await?;
        let image_path = format!("images/{}/{filename}", session.uid);
        let outcome = self.blobs.upload(&image_path, bytes).await;
        self.finish_op(OpKey::ImageUpload).await;
        match outcome {
            Ok(()) => {
                self.state.lock().await.image_path = Some(image_path.clone());
                info!(path = %image_path, "image uploaded");
                self.notify(
                    NoticeKind::Success,
                    "Image uploaded",
                    Some(filename.to_string()),
                );
                Ok(image_path)
            }
            Err(err) => {
                warn!("image upload failed: {err}");
                self.notify(
                    NoticeKind::Error,
                    "Failed to upload image",
                    Some(err.to_string()),
                );
                Err(err.into())
            }
        }
    }

    pub async fn load_job(&self) -> Result<Option<Document>, WizardError> {
        let job_id = {
            let state = self.state.lock().await;
            state.job_id.clone()
        }
        .ok_or(WizardError::MissingJob)?;

        self.begin(OpKey::JobLoad).await?;
        let outcome = self.documents.get(JOBS_COLLECTION, &job_id).await;
        self.finish_op(OpKey::JobLoad).await;
        match outcome {
            Ok(Some(document)) => {
                self.state.lock().await.loaded_job = Some(document.clone());
                self.notify(NoticeKind::Success, "Job loaded", None);
                Ok(Some(document))
            }
            Ok(None) => {
                self.notify(
                    NoticeKind::Error,
                    "Not found",
                    Some("Job data not found.".to_string()),
                );
                Ok(None)
            }
            Err(err) => {
                warn!("job load failed: {err}");
                self.notify(
                    NoticeKind::Error,
                    "Failed to load job",
                    Some(err.to_string()),
                );
                Err(err.into())
            }
        }
    }

    pub async fn load_item(&self) -> Result<Option<Document>, WizardError> {
        let item_id = {
            let state = self.state.lock().await;
            state.item_id.clone()
        }
        .ok_or(WizardError::MissingItem)?;

        self.begin(OpKey::ItemLoad).await?;
        let outcome = self.documents.get(ITEMS_COLLECTION, &item_id).await;
        self.finish_op(OpKey::ItemLoad).await;
        match outcome {
            Ok(Some(document)) => {
                self.state.lock().await.loaded_item = Some(document.clone());
                self.notify(NoticeKind::Success, "Item loaded", None);
                Ok(Some(document))
            }
            Ok(None) => {
                self.notify(
                    NoticeKind::Error,
                    "Not found",
                    Some("Item data not found.".to_string()),
                );
                Ok(None)
            }
            Err(err) => {
                warn!("item load failed: {err}");
                self.notify(
                    NoticeKind::Error,
                    "Failed to load item",
                    Some(err.to_string()),
                );
                Err(err.into())
            }
        }
    }

    pub async fn load_image(&self) -> Result<Option<Url>, WizardError> {
        let image_path = {
            let state = self.state.lock().await;
            state.image_path.clone()
        }
        .ok_or(WizardError::MissingImage)?;

        self.begin(OpKey::ImageLoad).await?;
        let outcome = self.blobs.resolve_url(&image_path).await;
        self.finish_op(OpKey::ImageLoad).await;
        match outcome {
            Ok(Some(url)) => {
                self.state.lock().await.loaded_image_url = Some(url.clone());
                self.notify(NoticeKind::Success, "Image loaded", None);
                Ok(Some(url))
            }
            Ok(None) => {
                self.notify(
                    NoticeKind::Error,
                    "Not found",
                    Some("Image data not found.".to_string()),
                );
                Ok(None)
            }
            Err(err) => {
                warn!("image load failed: {err}");
                self.notify(
                    NoticeKind::Error,
                    "Failed to load image",
                    Some(err.to_string()),
                );
                Err(err.into())
            }
        }
    }

    pub async fn advance_step(&self) -> Result<WizardStep, WizardError> {
        let next = {
            let mut state = self.state.lock().await;
            let next = state.step.next().ok_or(WizardError::NoFurtherStep)?;
            state.step = next;
            next
        };
        info!(step = next.index(), "wizard advanced");
        let _ = self.events.send(WizardEvent::StepChanged(next));
        Ok(next)
    }

    /// Confirm-gated Start Over: only legal once the last step is reached.
    pub async fn finish(&self) -> Result<(), WizardError> {
        {
            let state = self.state.lock().await;
            if state.step != WizardStep::Done {
                return Err(WizardError::NotFinished);
            }
        }
        self.reset().await;
        Ok(())
    }

    /// Clears all created/loaded slots and returns to step 1.
    pub async fn reset(&self) {
        {
            let mut state = self.state.lock().await;
            *state = WizardState::default();
        }
        info!("wizard reset");
        let _ = self.events.send(WizardEvent::Reset);
    }

    /// Signs out through the gateway. On success the wizard state is
    /// discarded; on failure the session and state are left untouched.
    pub async fn sign_out(&self) -> Result<(), WizardError> {
        match self.identity.sign_out().await {
            Ok(()) => {
                self.reset().await;
                Ok(())
            }
            Err(err) => {
                warn!("sign out failed: {err}");
                self.notify(
                    NoticeKind::Error,
                    "Sign out failed",
                    Some("Could not sign you out. Please try again.".to_string()),
                );
                Err(err.into())
            }
        }
    }

    async fn require_session(&self) -> Result<Session, WizardError> {
        self.identity
            .current_session()
            .await
            .ok_or(WizardError::SignedOut)
    }

    async fn begin(&self, op: OpKey) -> Result<(), WizardError> {
        let mut state = self.state.lock().await;
        let slot = state.loading.slot_mut(op);
        if *slot {
            return Err(WizardError::Busy(op));
        }
        *slot = true;
        Ok(())
    }

    async fn finish_op(&self, op: OpKey) {
        let mut state = self.state.lock().await;
        *state.loading.slot_mut(op) = false;
    }

    fn notify(&self, kind: NoticeKind, title: &str, detail: Option<String>) {
        let _ = self.events.send(WizardEvent::Notice {
            kind,
            title: title.to_string(),
            detail,
        });
    }
}

static LAST_ID_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Millisecond clock with a monotonic bump so back-to-back creates in the
/// same process never collide. Uniqueness across devices is not guaranteed,
/// which is an accepted limitation of the derived-id scheme.
fn next_id_millis() -> i64 {
    let now = Utc::now().timestamp_millis();
    let mut last = LAST_ID_MILLIS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_ID_MILLIS.compare_exchange(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return candidate,
            Err(observed) => last = observed,
        }
    }
}

fn derived_id(prefix: &str, uid: &str, millis: i64) -> String {
    let uid_prefix: String = uid.chars().take(5).collect();
    format!("{prefix}_{uid_prefix}_{millis}")
}

fn to_document<T: serde::Serialize>(record: &T) -> Result<Document, WizardError> {
    match serde_json::to_value(record) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError("record did not serialize to a JSON object".into()).into()),
        Err(err) => Err(StoreError(format!("failed to encode record: {err}")).into()),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
