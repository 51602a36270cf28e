//! New-post composer: create the document first, attach the image after.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::app::error::FeedError;
use crate::domain::path::{self, CollectionPath, DocumentPath};
use crate::domain::post::fields::IMAGE_URL;
use crate::domain::post::PostFields;
use crate::domain::session::Session;
use crate::infra::store::{BlobStore, Caller, DocumentStore, Fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposerPhase {
    Idle,
    Submitting,
    DocumentCreated,
    Uploading,
    Uploaded,
    Patched,
}

/// What happens to the draft when the image stage fails after the post exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResetPolicy {
    /// Clear the draft once the post document exists.
    #[default]
    Always,
    /// Keep the draft unless every stage succeeded.
    OnSuccess,
}

impl FromStr for ResetPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "always" => Ok(Self::Always),
            "on-success" => Ok(Self::OnSuccess),
            other => Err(format!("unknown reset policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub data: Bytes,
    pub content_type: String,
}

impl ImageAttachment {
    /// Parses `data:<type>;base64,<payload>` as produced by a file reader.
    pub fn from_data_url(data_url: &str, max_bytes: usize) -> Result<Self, FeedError> {
        let invalid = |reason: &str| FeedError::Invalid(format!("image {}", reason));

        let rest = data_url
            .strip_prefix("data:")
            .ok_or_else(|| invalid("is not a data URL"))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| invalid("data URL has no payload"))?;
        let declared = meta
            .strip_suffix(";base64")
            .ok_or_else(|| invalid("data URL is not base64 encoded"))?;

        let data = STANDARD
            .decode(payload.trim())
            .map_err(|err| invalid(&format!("payload is not valid base64: {}", err)))?;
        if data.len() > max_bytes {
            return Err(invalid(&format!("exceeds {} bytes", max_bytes)));
        }

        Self::sniff(Bytes::from(data), declared)
    }

    /// Content type from the bytes themselves, falling back to a declared
    /// `image/*` type for formats the sniffer does not know.
    fn sniff(data: Bytes, declared: &str) -> Result<Self, FeedError> {
        if data.is_empty() {
            return Err(FeedError::Invalid("image is empty".to_string()));
        }
        let content_type = match image::guess_format(&data) {
            Ok(format) => format.to_mime_type().to_string(),
            Err(_) if declared.starts_with("image/") => declared.to_string(),
            Err(_) => return Err(FeedError::Invalid("payload is not an image".to_string())),
        };
        Ok(Self { data, content_type })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub image: Option<ImageAttachment>,
    pub show_emojis: bool,
}

impl Draft {
    pub fn can_submit(&self) -> bool {
        !self.text.trim().is_empty() || self.image.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStage {
    Upload,
    DownloadUrl,
    Patch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageOutcome {
    None,
    Attached { url: String },
    Failed { stage: ImageStage, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    pub post_id: String,
    pub image: ImageOutcome,
}

/// Clears the in-flight flag and returns the phase to idle however
/// `submit` exits.
struct InFlight<'a> {
    flag: &'a AtomicBool,
    phase: &'a watch::Sender<ComposerPhase>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.phase.send_replace(ComposerPhase::Idle);
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct Composer {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    policy: ResetPolicy,
    draft: Mutex<Draft>,
    phase: watch::Sender<ComposerPhase>,
    in_flight: AtomicBool,
}

impl Composer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        policy: ResetPolicy,
    ) -> Self {
        let (phase, _) = watch::channel(ComposerPhase::Idle);
        Self {
            store,
            blobs,
            policy,
            draft: Mutex::new(Draft::default()),
            phase,
            in_flight: AtomicBool::new(false),
        }
    }

    fn draft_mut(&self) -> MutexGuard<'_, Draft> {
        self.draft.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn draft(&self) -> Draft {
        self.draft_mut().clone()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        self.draft_mut().text = text.into();
    }

    /// Appends a picker emoji given as hyphen-separated hex code points,
    /// e.g. `1f1fa-1f1f8`.
    pub fn add_emoji(&self, unified: &str) -> Result<(), FeedError> {
        let emoji = unified
            .split('-')
            .map(|code| {
                u32::from_str_radix(code, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| FeedError::Invalid(format!("invalid emoji code: {}", unified)))
            })
            .collect::<Result<String, FeedError>>()?;
        self.draft_mut().text.push_str(&emoji);
        Ok(())
    }

    pub fn toggle_emojis(&self) -> bool {
        let mut draft = self.draft_mut();
        draft.show_emojis = !draft.show_emojis;
        draft.show_emojis
    }

    pub fn select_image(&self, image: ImageAttachment) {
        self.draft_mut().image = Some(image);
    }

    pub fn clear_image(&self) {
        self.draft_mut().image = None;
    }

    pub fn can_submit(&self) -> bool {
        self.draft_mut().can_submit()
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> ComposerPhase {
        *self.phase.borrow()
    }

    pub fn phases(&self) -> watch::Receiver<ComposerPhase> {
        self.phase.subscribe()
    }

    fn reset(&self) {
        let mut draft = self.draft_mut();
        draft.text.clear();
        draft.image = None;
        draft.show_emojis = false;
    }

    fn claim(&self, session: &Session) -> Result<InFlight<'_>, FeedError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(user_id = %session.user_id, "submission already in flight");
            return Err(FeedError::Busy);
        }
        Ok(InFlight {
            flag: &self.in_flight,
            phase: &self.phase,
        })
    }

    /// Publishes the current draft.
    ///
    /// Fails with [`FeedError::Busy`] without writing anything while an
    /// earlier submission from this composer is still running. A failure to create
    /// the post leaves the draft intact; image-stage failures are reported
    /// in [`Submitted::image`] and never remove the created post.
    pub async fn submit(&self, session: &Session) -> Result<Submitted, FeedError> {
        let in_flight = self.claim(session)?;
        let draft = self.draft();
        self.publish(session, draft, in_flight).await
    }

    /// Replaces the draft with `draft` and publishes it, as one submission.
    ///
    /// A busy composer rejects the call before the draft is touched, so the
    /// running submission keeps the draft it started with.
    pub async fn submit_draft(
        &self,
        session: &Session,
        draft: Draft,
    ) -> Result<Submitted, FeedError> {
        let in_flight = self.claim(session)?;
        *self.draft_mut() = draft.clone();
        self.publish(session, draft, in_flight).await
    }

    async fn publish(
        &self,
        session: &Session,
        draft: Draft,
        _in_flight: InFlight<'_>,
    ) -> Result<Submitted, FeedError> {
        if !draft.can_submit() {
            return Err(FeedError::Invalid("post is empty".to_string()));
        }

        self.phase.send_replace(ComposerPhase::Submitting);
        let caller = Caller::from(session);
        let fields = PostFields::authored(session, draft.text.clone()).into_map()?;
        let path = self
            .store
            .create_document(&caller, &CollectionPath::posts(), fields)
            .await
            .map_err(|err| {
                warn!(error = %err, user_id = %session.user_id, "failed to create post");
                FeedError::WriteRejected(err)
            })?;
        self.phase.send_replace(ComposerPhase::DocumentCreated);
        info!(post_id = %path.id(), "post created");

        let image = match &draft.image {
            Some(image) => self.attach(&caller, &path, image).await,
            None => ImageOutcome::None,
        };

        let complete = !matches!(image, ImageOutcome::Failed { .. });
        if complete || self.policy == ResetPolicy::Always {
            self.reset();
        }

        Ok(Submitted {
            post_id: path.id().to_string(),
            image,
        })
    }

    async fn attach(
        &self,
        caller: &Caller,
        post: &DocumentPath,
        image: &ImageAttachment,
    ) -> ImageOutcome {
        let failed = |stage: ImageStage, err: &dyn std::fmt::Display| {
            warn!(error = %err, post_id = %post.id(), ?stage, "image attachment failed");
            ImageOutcome::Failed {
                stage,
                error: err.to_string(),
            }
        };

        self.phase.send_replace(ComposerPhase::Uploading);
        let storage_path = path::post_image(post.id());
        if let Err(err) = self
            .blobs
            .upload_blob(caller, &storage_path, image.data.clone(), &image.content_type)
            .await
        {
            return failed(ImageStage::Upload, &err);
        }
        self.phase.send_replace(ComposerPhase::Uploaded);

        let url = match self.blobs.download_url(&storage_path).await {
            Ok(url) => url,
            Err(err) => return failed(ImageStage::DownloadUrl, &err),
        };

        let mut patch = Fields::new();
        patch.insert(IMAGE_URL.to_string(), Value::String(url.clone()));
        if let Err(err) = self.store.update_document(caller, post, patch).await {
            return failed(ImageStage::Patch, &err);
        }
        self.phase.send_replace(ComposerPhase::Patched);
        info!(post_id = %post.id(), "post image attached");

        ImageOutcome::Attached { url }
    }
}
