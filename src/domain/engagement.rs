use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::domain::session::Session;
use crate::infra::store::Document;

/// A like lives at `posts/{post_id}/likes/{user_id}`, so its id is the liker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Like {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LikeFields {
    username: String,
}

impl Like {
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let fields: LikeFields = serde_json::from_value(Value::Object(doc.fields.clone()))?;
        Ok(Self {
            user_id: doc.id().to_string(),
            username: fields.username,
        })
    }

    pub fn fields_for(session: &Session) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("username".to_string(), Value::String(session.name.clone()));
        map
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
    pub author_handle: String,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentFields {
    pub author_id: String,
    pub author_name: String,
    #[serde(default)]
    pub author_avatar_url: Option<String>,
    pub author_handle: String,
    pub text: String,
}

impl CommentFields {
    pub fn authored(session: &Session, text: impl Into<String>) -> Self {
        Self {
            author_id: session.user_id.clone(),
            author_name: session.name.clone(),
            author_avatar_url: session.avatar_url.clone(),
            author_handle: session.handle.clone(),
            text: text.into(),
        }
    }

    pub fn into_map(self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

impl Comment {
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let fields: CommentFields = serde_json::from_value(Value::Object(doc.fields.clone()))?;
        let post_id = doc
            .path
            .collection()
            .parent()
            .map(|parent| parent.id().to_string())
            .unwrap_or_default();
        Ok(Self {
            id: doc.id().to_string(),
            post_id,
            author_id: fields.author_id,
            author_name: fields.author_name,
            author_avatar_url: fields.author_avatar_url,
            author_handle: fields.author_handle,
            text: fields.text,
            created_at: doc.created_at,
        })
    }
}
