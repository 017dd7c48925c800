//! Core data models shared by the credential store, the index and the HTTP
//! layer.
//!
//! `User`, `File` and `FileDoc` mirror rows in SQLite. `IngestedDoc`,
//! `Chunk`, `Source` and `ContextFilter` are transient values that only
//! travel between the index, the services and API responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form metadata attached to a document unit (`file_name`,
/// `page_label`, `doc_id`).
pub type DocMetadata = BTreeMap<String, String>;

/// A registered user. Never serialized directly; see [`UserView`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hashed_password: String,
    pub access_level: i64,
}

/// Public projection of a [`User`] without the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserView {
    pub id: i64,
    pub username: String,
    pub access_level: i64,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            access_level: user.access_level,
        }
    }
}

/// An ingested source file and the level required to read it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct File {
    pub id: i64,
    pub file_name: String,
    pub access_level: i64,
}

/// Ownership link from a [`File`] to one document unit in the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDoc {
    pub id: i64,
    pub file_id: i64,
    pub doc_id: String,
}

/// Descriptor of a document unit held by the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestedDoc {
    pub object: String,
    pub doc_id: String,
    pub doc_metadata: Option<DocMetadata>,
}

impl IngestedDoc {
    pub fn new(doc_id: impl Into<String>, doc_metadata: Option<DocMetadata>) -> Self {
        Self {
            object: "ingest.document".to_string(),
            doc_id: doc_id.into(),
            doc_metadata,
        }
    }

    /// The `file_name` metadata entry, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.doc_metadata
            .as_ref()
            .and_then(|m| m.get("file_name"))
            .map(String::as_str)
    }
}

/// A scored passage returned by retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub object: String,
    pub score: f32,
    pub document: IngestedDoc,
    pub text: String,
}

impl Chunk {
    pub fn new(score: f32, document: IngestedDoc, text: String) -> Self {
        Self {
            object: "context.chunk".to_string(),
            score,
            document,
            text,
        }
    }
}

/// Restricts a vector search to a set of documents.
///
/// `doc_ids: None` places no restriction; `Some(vec![])` matches nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextFilter {
    #[serde(default, alias = "docs_ids")]
    pub doc_ids: Option<Vec<String>>,
}

impl ContextFilter {
    pub fn only(doc_ids: Vec<String>) -> Self {
        Self {
            doc_ids: Some(doc_ids),
        }
    }

    pub fn allows(&self, doc_id: &str) -> bool {
        match &self.doc_ids {
            None => true,
            Some(ids) => ids.iter().any(|id| id == doc_id),
        }
    }
}

/// A citation rendered from a [`Chunk`]. Missing metadata renders as `"-"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Source {
    pub file: String,
    pub page: String,
    pub text: String,
}

impl Source {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let meta = chunk.document.doc_metadata.as_ref();
        let field = |key: &str| {
            meta.and_then(|m| m.get(key))
                .cloned()
                .unwrap_or_else(|| "-".to_string())
        };
        Self {
            file: field("file_name"),
            page: field("page_label"),
            text: chunk.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_view_omits_hash() {
        let user = User {
            id: 7,
            username: "ada".into(),
            hashed_password: "$argon2id$...".into(),
            access_level: 2,
        };
        let json = serde_json::to_value(UserView::from(&user)).unwrap();
        assert_eq!(json["username"], "ada");
        assert!(json.get("hashed_password").is_none());
    }

    #[test]
    fn test_context_filter_accepts_docs_ids_alias() {
        let f: ContextFilter = serde_json::from_str(r#"{"docs_ids": ["a"]}"#).unwrap();
        assert_eq!(f.doc_ids, Some(vec!["a".to_string()]));
        assert!(f.allows("a"));
        assert!(!f.allows("b"));
    }

    #[test]
    fn test_empty_filter_allows_nothing() {
        let f = ContextFilter::only(vec![]);
        assert!(!f.allows("a"));
        assert!(ContextFilter::default().allows("a"));
    }

    #[test]
    fn test_source_defaults_missing_metadata() {
        let chunk = Chunk::new(0.5, IngestedDoc::new("d1", None), "hello".into());
        let source = Source::from_chunk(&chunk);
        assert_eq!(source.file, "-");
        assert_eq!(source.page, "-");
        assert_eq!(source.text, "hello");
    }
}
