//! Slash-delimited store paths.
//!
//! Collections sit at odd depths (`posts`, `posts/{id}/likes`) and documents
//! at even depths (`posts/{id}`, `posts/{id}/likes/{uid}`).

use serde::{Deserialize, Serialize};
use std::fmt;

pub const POSTS: &str = "posts";
pub const COMMENTS: &str = "comments";
pub const LIKES: &str = "likes";
const IMAGE_SLOT: &str = "image";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentPath(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPath(pub String);

impl fmt::Display for InvalidPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid path: {}", self.0)
    }
}

fn segments(raw: &str) -> Result<Vec<&str>, InvalidPath> {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(InvalidPath(raw.to_string()));
    }
    Ok(parts)
}

impl CollectionPath {
    pub fn parse(raw: &str) -> Result<Self, InvalidPath> {
        let parts = segments(raw)?;
        if parts.len() % 2 == 0 {
            return Err(InvalidPath(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn posts() -> Self {
        Self(POSTS.to_string())
    }

    pub fn comments(post_id: &str) -> Self {
        Self(format!("{}/{}/{}", POSTS, post_id, COMMENTS))
    }

    pub fn likes(post_id: &str) -> Self {
        Self(format!("{}/{}/{}", POSTS, post_id, LIKES))
    }

    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath(format!("{}/{}", self.0, id))
    }

    /// Last segment, e.g. `likes` for `posts/p1/likes`.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// The document this collection hangs off, `None` for root collections.
    pub fn parent(&self) -> Option<DocumentPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| DocumentPath(parent.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DocumentPath {
    pub fn parse(raw: &str) -> Result<Self, InvalidPath> {
        let parts = segments(raw)?;
        if parts.len() % 2 != 0 {
            return Err(InvalidPath(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn post(post_id: &str) -> Self {
        CollectionPath::posts().doc(post_id)
    }

    pub fn like(post_id: &str, user_id: &str) -> Self {
        CollectionPath::likes(post_id).doc(user_id)
    }

    pub fn comment(post_id: &str, comment_id: &str) -> Self {
        CollectionPath::comments(post_id).doc(comment_id)
    }

    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn collection(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((collection, _)) => CollectionPath(collection.to_string()),
            None => CollectionPath(self.0.clone()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single path segment usable as a document id.
pub fn check_id(id: &str) -> Result<&str, InvalidPath> {
    if id.is_empty() || id.contains('/') {
        return Err(InvalidPath(id.to_string()));
    }
    Ok(id)
}

/// Blob location of a post's single attachment slot.
pub fn post_image(post_id: &str) -> String {
    format!("{}/{}/{}", POSTS, post_id, IMAGE_SLOT)
}

/// Post id owning a blob path, if the path lives under `posts/{id}/`.
pub fn blob_post_id(storage_path: &str) -> Option<&str> {
    let mut parts = storage_path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(POSTS), Some(id), Some(_)) if !id.is_empty() => Some(id),
        _ => None,
    }
}
