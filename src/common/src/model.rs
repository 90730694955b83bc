//! Entity model of the managed collections.
//!
//! References between collections are plain string IDs; the store enforces
//! nothing. Only the fields this engine reads or writes are modelled, every
//! other field stays untouched because writes are field-level.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of a collection in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionName {
    Users,
    Articles,
    Collections,
    Bookmarks,
    BookmarkFolders,
    BookmarkFolderLinks,
    Reports,
    ModerationAuditLogs,
    Feedbacks,
}

impl CollectionName {
    pub const ALL: [CollectionName; 9] = [
        CollectionName::Users,
        CollectionName::Articles,
        CollectionName::Collections,
        CollectionName::Bookmarks,
        CollectionName::BookmarkFolders,
        CollectionName::BookmarkFolderLinks,
        CollectionName::Reports,
        CollectionName::ModerationAuditLogs,
        CollectionName::Feedbacks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionName::Users => "users",
            CollectionName::Articles => "articles",
            CollectionName::Collections => "collections",
            CollectionName::Bookmarks => "bookmarks",
            CollectionName::BookmarkFolders => "bookmarkfolders",
            CollectionName::BookmarkFolderLinks => "bookmarkfolderlinks",
            CollectionName::Reports => "reports",
            CollectionName::ModerationAuditLogs => "moderationauditlogs",
            CollectionName::Feedbacks => "feedbacks",
        }
    }

    /// Audit-trail collections are never mutated by this engine.
    pub fn is_audit_trail(&self) -> bool {
        matches!(
            self,
            CollectionName::Reports | CollectionName::ModerationAuditLogs
        )
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_ascii_lowercase().replace(['-', '_'], "");
        CollectionName::ALL
            .into_iter()
            .find(|name| name.as_str() == normalized)
            .ok_or_else(|| format!("Unknown collection: {s}"))
    }
}

/// One curated entry of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by_user_id: Option<String>,
    /// Remaining entry fields (timestamps, notes) carried through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CollectionEntry {
    pub fn new(article_id: &str, added_by_user_id: &str) -> Self {
        Self {
            article_id: Some(article_id.to_string()),
            added_by_user_id: Some(added_by_user_id.to_string()),
            extra: serde_json::Map::new(),
        }
    }
}

/// Projection of a `collections` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDoc {
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub entries: Vec<CollectionEntry>,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub valid_entries_count: Option<u64>,
    #[serde(default)]
    pub followers_count: Option<u64>,
}

impl CollectionDoc {
    pub const PROJECTION: &'static [&'static str] = &[
        "creatorId",
        "entries",
        "followers",
        "validEntriesCount",
        "followersCount",
    ];
}

/// Projection of a `bookmarks` document. `nuggetId` points at an article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkDoc {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub nugget_id: Option<String>,
}

impl BookmarkDoc {
    pub const PROJECTION: &'static [&'static str] = &["userId", "nuggetId"];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkFolderDoc {
    #[serde(default)]
    pub user_id: Option<String>,
}

impl BookmarkFolderDoc {
    pub const PROJECTION: &'static [&'static str] = &["userId"];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkFolderLinkDoc {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub bookmark_id: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

impl BookmarkFolderLinkDoc {
    pub const PROJECTION: &'static [&'static str] = &["userId", "bookmarkId", "folderId"];
}
