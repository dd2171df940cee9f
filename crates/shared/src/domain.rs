use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Arbitrary key/value document body as stored by the document store.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Profile attributes of the authenticated principal for the current login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub uid: String,
    pub display_name: String,
    pub email: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    New,
    InProgress,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub title: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub name: String,
    pub sku: String,
    pub quantity: u32,
    pub added_by: String,
}
