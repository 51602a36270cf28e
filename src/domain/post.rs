use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::domain::session::Session;
use crate::infra::store::Document;

/// Field names as stored on a post document.
pub mod fields {
    pub const AUTHOR_ID: &str = "authorId";
    pub const IMAGE_URL: &str = "imageUrl";
    pub const TEXT: &str = "text";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
    pub author_handle: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Stored shape of a post, without the store-owned id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostFields {
    pub author_id: String,
    pub author_name: String,
    #[serde(default)]
    pub author_avatar_url: Option<String>,
    pub author_handle: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl PostFields {
    pub fn authored(session: &Session, text: impl Into<String>) -> Self {
        Self {
            author_id: session.user_id.clone(),
            author_name: session.name.clone(),
            author_avatar_url: session.avatar_url.clone(),
            author_handle: session.handle.clone(),
            text: text.into(),
            image_url: None,
        }
    }

    pub fn into_map(self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

impl Post {
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let fields: PostFields = serde_json::from_value(Value::Object(doc.fields.clone()))?;
        Ok(Self {
            id: doc.id().to_string(),
            author_id: fields.author_id,
            author_name: fields.author_name,
            author_avatar_url: fields.author_avatar_url,
            author_handle: fields.author_handle,
            text: fields.text,
            image_url: fields.image_url,
            created_at: doc.created_at,
        })
    }

    pub fn is_authored_by(&self, session: &Session) -> bool {
        self.author_id == session.user_id
    }

    /// Title of the post detail page.
    pub fn page_title(&self) -> String {
        format!("{} on Chirp: \"{}\"", self.author_name, self.text)
    }
}
